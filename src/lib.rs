//! # ChatHome
//!
//! A multi-tenant chat backend. Authenticated users keep conversations with a
//! language model; each send assembles grounded context (history, web search
//! results, extracted attachments), streams the completion back and persists
//! both sides of the exchange.
//!
//! ## Architecture
//!
//! ```text
//! request ──▶ IdentityGate ──▶ SendPipeline ──┬──▶ AttachmentExtractor ──┐
//!                                             └──▶ WebSearchBridge ──────┤
//!                                                                        ▼
//! SSE / JSON / text ◀── StreamingEngine ◀── provider ◀── context assembler
//!                            │
//!                            ▼
//!                    SQLite store + blobs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite [`Store`](chathome_core::store::Store) |
//! | [`blob`] | Attachment bytes keyed by owner |
//! | [`auth`] | Bearer tokens and the identity gate |
//! | [`extract`] | Attachment text and image extraction |
//! | [`provider`] | Model-provider client and test double |
//! | [`web_search`] | Relevance classifier and search bridge |
//! | [`pipeline`] | The send pipeline |
//! | [`engine`] | Completion streaming and finalisation |
//! | [`relay`] | Peer-messaging relay |
//! | [`server`] | HTTP API |
//! | [`users`] | Account and token commands |

pub mod auth;
pub mod blob;
pub mod config;
pub mod db;
pub mod engine;
pub mod extract;
pub mod migrate;
pub mod pipeline;
pub mod provider;
pub mod relay;
pub mod server;
pub mod sqlite_store;
pub mod users;
pub mod web_search;
