//! # ChatHome Core
//!
//! Shared, runtime-free logic for ChatHome: the data model, the error
//! taxonomy, the storage abstraction, role prompt templates, title rules,
//! search-result formatting, and the context assembler that turns history
//! plus a new user turn into the message list sent to the model.
//!
//! This crate contains no tokio, sqlx, HTTP clients, or filesystem I/O.
//! Everything here is deterministic and unit-testable without a runtime.

pub mod context;
pub mod error;
pub mod graceful;
pub mod models;
pub mod prompt;
pub mod search;
pub mod store;
pub mod title;

pub use error::ChatError;
pub use graceful::Graceful;
