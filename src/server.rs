//! HTTP API.
//!
//! Every route except `/health` requires `Authorization: Bearer <token>`.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/auth/me` | Resolved identity of the caller |
//! | `GET`  | `/api/chat/conversations` | Caller's conversations, most recent first |
//! | `POST` | `/api/chat/conversations` | Create an empty conversation |
//! | `GET`  | `/api/chat/conversations/{id}` | Conversation with all messages |
//! | `PATCH`| `/api/chat/conversations/{id}` | Rename |
//! | `DELETE`| `/api/chat/conversations/{id}` | Delete with messages and blobs |
//! | `POST` | `/api/chat/conversations/{id}/messages` | Send into an existing conversation |
//! | `POST` | `/api/chat/send` | Send; creates the conversation when no id is given |
//! | `POST` | `/api/chat/upload` | Multipart upload of one attachment |
//! | `GET`  | `/api/chat/files/{*key}` | Fetch an attachment from the caller's namespace |
//! | `POST` | `/api/users/message` | Relay a message to another user |
//! | `GET`  | `/api/users/unread-count` | Unread relayed messages |
//! | `GET`  | `/api/users/messages` | Relay inbox (marks listed messages read) |
//!
//! # Send responses
//!
//! One engine, three shapes, picked from the `Accept` header:
//!
//! - `text/event-stream` (default): `data: {"content": ...}` events, then
//!   `{"done": true, "messageId": ...}` or `{"error": ...}`.
//! - `application/json`: `{userMessage, assistantMessage, chat?}` once the
//!   exchange is finalised.
//! - `text/plain`: raw text chunks; a failed completion aborts the body.
//!
//! Streaming shapes carry `X-Chat-Id`, `X-Chat-Title` and (for new
//! conversations) `X-Chat-Created: 1`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "validation_failed", "message": "message content must not be empty" } }
//! ```
//!
//! Codes: `unauthenticated` (401), `not_found` (404), `validation_failed`
//! (400), `upstream_unavailable` (502), `persistence_failed` (500).

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{header, request::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{future, stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use chathome_core::models::{AttachmentRef, Conversation, Identity, Message};
use chathome_core::store::Store;
use chathome_core::title::{display_title, sanitize_title};
use chathome_core::ChatError;

use crate::auth::{bearer_token, IdentityGate};
use crate::blob::{conversation_prefix, owns_key, upload_key, validate_key, BlobStore, FsBlobStore};
use crate::config::{ChatConfig, Config};
use crate::engine::{ExchangeOutcome, StreamEvent, StreamingEngine};
use crate::pipeline::{SendPipeline, SendRequest, StartedExchange};
use crate::provider::{create_provider, CompletionProvider};
use crate::relay::{PeerRelay, RelayRequest, INBOX_LIMIT};
use crate::sqlite_store::SqliteStore;
use crate::web_search::{create_search, SearchProvider, WebSearchBridge};

/// Message sent to streaming clients when the completion fails.
const STREAM_FAILURE_MESSAGE: &str = "Failed to generate response";

/// Multipart framing allowance on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// External collaborators, constructed once at startup.
#[derive(Clone)]
pub struct AppServices {
    pub store: Arc<dyn Store>,
    pub blobs: Arc<dyn BlobStore>,
    pub provider: Arc<dyn CompletionProvider>,
    pub search: Option<Arc<dyn SearchProvider>>,
}

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    gate: IdentityGate,
    store: Arc<dyn Store>,
    blobs: Arc<dyn BlobStore>,
    pipeline: SendPipeline,
    relay: PeerRelay,
    chat: ChatConfig,
}

impl AppState {
    pub fn new(config: &Config, services: AppServices, secret: &[u8]) -> Self {
        let engine = StreamingEngine::new(
            services.provider.clone(),
            services.store.clone(),
            config.chat.title_max_chars,
        );
        let search = WebSearchBridge::new(
            services.provider.clone(),
            services.search.clone(),
            &config.search,
        );
        let pipeline = SendPipeline::new(
            services.store.clone(),
            services.blobs.clone(),
            search,
            engine,
            config.chat.clone(),
        );
        Self {
            gate: IdentityGate::new(services.store.clone(), secret),
            relay: PeerRelay::new(
                services.store.clone(),
                services.provider.clone(),
                config.chat.max_message_chars,
            ),
            store: services.store,
            blobs: services.blobs,
            pipeline,
            chat: config.chat.clone(),
        }
    }
}

/// Build the router with CORS and request tracing.
pub fn router(config: &Config, state: AppState) -> Router {
    let upload_limit = state.chat.max_upload_bytes * 2 + MULTIPART_OVERHEAD;
    Router::new()
        .route("/health", get(handle_health))
        .route("/api/auth/me", get(handle_me))
        .route(
            "/api/chat/conversations",
            get(handle_list_conversations).post(handle_create_conversation),
        )
        .route(
            "/api/chat/conversations/{id}",
            get(handle_get_conversation)
                .patch(handle_rename_conversation)
                .delete(handle_delete_conversation),
        )
        .route(
            "/api/chat/conversations/{id}/messages",
            post(handle_send_to_conversation),
        )
        .route("/api/chat/send", post(handle_send))
        .route(
            "/api/chat/upload",
            post(handle_upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/api/chat/files/{*key}", get(handle_fetch_file))
        .route("/api/users/message", post(handle_relay))
        .route("/api/users/unread-count", get(handle_unread_count))
        .route("/api/users/messages", get(handle_inbox))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.server.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static("x-chat-id"),
            HeaderName::from_static("x-chat-title"),
            HeaderName::from_static("x-chat-created"),
        ]);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Starts the HTTP server.
///
/// Runs migrations, constructs the SQLite store, filesystem blob store,
/// model provider and search client, then serves until Ctrl-C or SIGTERM.
pub async fn run_server(config: &Config) -> Result<()> {
    let pool = crate::migrate::run_migrations(config).await?;
    let services = AppServices {
        store: Arc::new(SqliteStore::new(pool)),
        blobs: Arc::new(FsBlobStore::new(&config.storage.blob_root)),
        provider: create_provider(&config.provider)?,
        search: create_search(&config.search)?,
    };
    let secret = config.auth.secret()?;
    let state = AppState::new(config, services, secret.as_bytes());
    let app = router(config, state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(addr = %config.server.bind, "chathome listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"not_found"`).
    code: &'static str,
    message: String,
}

/// [`ChatError`] as an HTTP response.
#[derive(Debug)]
pub struct AppError(pub ChatError);

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            ChatError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            ChatError::PersistenceFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = match &self.0 {
            ChatError::PersistenceFailed(detail) => {
                error!(detail = %detail, "persistence failure");
                "internal storage error".to_string()
            }
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

// ============ Authentication ============

/// Extractor for the caller's resolved identity.
pub struct Authed(pub Identity);

impl FromRequestParts<AppState> for Authed {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let identity = state.gate.resolve(bearer_token(header)).await?;
        Ok(Authed(identity))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_me(Authed(identity): Authed) -> Json<Identity> {
    Json(identity)
}

// ============ Conversations ============

async fn handle_list_conversations(
    State(state): State<AppState>,
    Authed(identity): Authed,
) -> Result<Json<serde_json::Value>, AppError> {
    let conversations = state
        .store
        .list_conversations(&identity.user_id)
        .await
        .map_err(ChatError::persistence)?;
    Ok(Json(serde_json::json!({ "conversations": conversations })))
}

#[derive(Debug, Default, Deserialize)]
struct CreateConversationBody {
    #[serde(default)]
    title: Option<String>,
}

async fn handle_create_conversation(
    State(state): State<AppState>,
    Authed(identity): Authed,
    body: Bytes,
) -> Result<(StatusCode, Json<Conversation>), AppError> {
    let body: CreateConversationBody = if body.iter().all(u8::is_ascii_whitespace) {
        CreateConversationBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ChatError::validation(format!("invalid request body: {}", e)))?
    };
    let mut conversation = Conversation::new(&identity.user_id);
    conversation.title = body
        .title
        .and_then(|t| sanitize_title(&t, state.chat.title_max_chars));
    state
        .store
        .create_conversation(&conversation)
        .await
        .map_err(ChatError::persistence)?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn handle_get_conversation(
    State(state): State<AppState>,
    Authed(identity): Authed,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let found = state
        .store
        .get_with_messages(&identity.user_id, &id)
        .await
        .map_err(ChatError::persistence)?
        .ok_or(ChatError::NotFound)?;
    Ok(Json(found).into_response())
}

#[derive(Debug, Deserialize)]
struct RenameBody {
    title: String,
}

async fn handle_rename_conversation(
    State(state): State<AppState>,
    Authed(identity): Authed,
    Path(id): Path<String>,
    Json(body): Json<RenameBody>,
) -> Result<Json<Conversation>, AppError> {
    let title = sanitize_title(&body.title, state.chat.title_max_chars)
        .ok_or_else(|| ChatError::validation("title must not be empty"))?;
    let renamed = state
        .store
        .rename_conversation(&identity.user_id, &id, &title)
        .await
        .map_err(ChatError::persistence)?;
    if !renamed {
        return Err(ChatError::NotFound.into());
    }
    let conversation = state
        .store
        .get_conversation(&identity.user_id, &id)
        .await
        .map_err(ChatError::persistence)?
        .ok_or(ChatError::NotFound)?;
    Ok(Json(conversation))
}

async fn handle_delete_conversation(
    State(state): State<AppState>,
    Authed(identity): Authed,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .store
        .delete_conversation(&identity.user_id, &id)
        .await
        .map_err(ChatError::persistence)?;
    if !deleted {
        return Err(ChatError::NotFound.into());
    }
    let prefix = conversation_prefix(&identity.user_id, &id);
    match state.blobs.delete_prefix(&prefix).await {
        Ok(n) => info!(conversation_id = %id, blobs = n, "conversation deleted"),
        Err(e) => warn!(conversation_id = %id, error = %e, "conversation blobs not removed"),
    }
    Ok(StatusCode::NO_CONTENT)
}

// ============ Send ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseMode {
    EventStream,
    Json,
    PlainText,
}

fn response_mode(headers: &HeaderMap) -> ResponseMode {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();
    if accept.contains("text/event-stream") {
        ResponseMode::EventStream
    } else if accept.contains("application/json") {
        ResponseMode::Json
    } else if accept.contains("text/plain") {
        ResponseMode::PlainText
    } else {
        ResponseMode::EventStream
    }
}

async fn handle_send(
    State(state): State<AppState>,
    Authed(identity): Authed,
    headers: HeaderMap,
    Json(request): Json<SendRequest>,
) -> Result<Response, AppError> {
    let started = state.pipeline.send(&identity, request).await?;
    respond(&state, &identity, response_mode(&headers), started).await
}

async fn handle_send_to_conversation(
    State(state): State<AppState>,
    Authed(identity): Authed,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(mut request): Json<SendRequest>,
) -> Result<Response, AppError> {
    request.conversation_id = Some(id);
    let started = state.pipeline.send(&identity, request).await?;
    respond(&state, &identity, response_mode(&headers), started).await
}

async fn respond(
    state: &AppState,
    identity: &Identity,
    mode: ResponseMode,
    started: StartedExchange,
) -> Result<Response, AppError> {
    match mode {
        ResponseMode::Json => json_response(state, identity, started).await,
        ResponseMode::EventStream => {
            let headers = chat_headers(&started);
            let events = until_terminal(started.handle.events)
                .map(|event| Ok::<_, Infallible>(Event::default().data(sse_payload(&event).to_string())));
            Ok((headers, Sse::new(events).keep_alive(KeepAlive::default())).into_response())
        }
        ResponseMode::PlainText => {
            let mut headers = chat_headers(&started);
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; charset=utf-8"),
            );
            headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform"));
            let chunks = until_terminal(started.handle.events).filter_map(|event| {
                future::ready(match event {
                    StreamEvent::Delta(text) => Some(Ok(Bytes::from(text))),
                    StreamEvent::Done { .. } => None,
                    StreamEvent::Failed { error } => Some(Err(std::io::Error::other(error.to_string()))),
                })
            });
            Ok((headers, Body::from_stream(chunks)).into_response())
        }
    }
}

/// Events up to and including the terminal one. The engine keeps its sender
/// while it writes the title, so the transport must not wait for the channel
/// to close.
fn until_terminal(rx: mpsc::Receiver<StreamEvent>) -> impl Stream<Item = StreamEvent> + Send {
    stream::unfold(
        (ReceiverStream::new(rx), false),
        |(mut events, finished)| async move {
            if finished {
                return None;
            }
            let event = events.next().await?;
            let terminal = event.is_terminal();
            Some((event, (events, terminal)))
        },
    )
}

fn sse_payload(event: &StreamEvent) -> serde_json::Value {
    match event {
        StreamEvent::Delta(text) => serde_json::json!({ "content": text }),
        StreamEvent::Done { message_id } => {
            serde_json::json!({ "done": true, "messageId": message_id })
        }
        StreamEvent::Failed { .. } => serde_json::json!({ "error": STREAM_FAILURE_MESSAGE }),
    }
}

fn chat_headers(started: &StartedExchange) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let title = display_title(started.conversation.title.as_deref());
    if let Ok(v) = HeaderValue::from_str(&started.conversation.id) {
        headers.insert(HeaderName::from_static("x-chat-id"), v);
    }
    // Header values must be visible ASCII; non-ASCII titles are omitted.
    if let Ok(v) = HeaderValue::from_str(title) {
        headers.insert(HeaderName::from_static("x-chat-title"), v);
    }
    if started.created {
        headers.insert(
            HeaderName::from_static("x-chat-created"),
            HeaderValue::from_static("1"),
        );
    }
    headers
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    user_message: Message,
    assistant_message: Message,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat: Option<Conversation>,
}

async fn json_response(
    state: &AppState,
    identity: &Identity,
    started: StartedExchange,
) -> Result<Response, AppError> {
    let StartedExchange {
        conversation,
        created,
        user_message,
        handle,
        ..
    } = started;
    let mut events = handle.events;
    // Hold the receiver until the task is done; dropping it would abort.
    while let Some(event) = events.recv().await {
        if event.is_terminal() {
            break;
        }
    }
    let outcome = handle.task.await.map_err(|e| {
        error!(error = %e, "exchange task panicked");
        ChatError::upstream("completion task failed")
    })?;
    drop(events);

    match outcome {
        ExchangeOutcome::Completed { message, .. } => {
            let chat = if created {
                state
                    .store
                    .get_conversation(&identity.user_id, &conversation.id)
                    .await
                    .map_err(ChatError::persistence)?
            } else {
                None
            };
            Ok(Json(SendResponse {
                user_message,
                assistant_message: message,
                chat,
            })
            .into_response())
        }
        ExchangeOutcome::Failed { error, .. } => Err(error.into()),
        ExchangeOutcome::Aborted { .. } => Err(ChatError::upstream("completion aborted").into()),
    }
}

// ============ Attachments ============

async fn handle_upload(
    State(state): State<AppState>,
    Authed(identity): Authed,
    mut multipart: Multipart,
) -> Result<Json<AttachmentRef>, AppError> {
    let mut file: Option<(String, String, Bytes)> = None;
    let mut conversation_id: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ChatError::validation(format!("invalid upload: {}", e.body_text())))?
    {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field.file_name().unwrap_or("file").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ChatError::validation(format!("invalid upload: {}", e.body_text())))?;
                file = Some((name, content_type, bytes));
            }
            Some("conversationId") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ChatError::validation(format!("invalid upload: {}", e.body_text())))?;
                conversation_id = Some(text.trim().to_string()).filter(|t| !t.is_empty());
            }
            _ => {}
        }
    }

    let (name, content_type, bytes) =
        file.ok_or_else(|| ChatError::validation("missing file field"))?;
    if bytes.len() > state.chat.max_upload_bytes {
        return Err(ChatError::validation(format!(
            "file is {} bytes; the limit is {}",
            bytes.len(),
            state.chat.max_upload_bytes
        ))
        .into());
    }
    if let Some(id) = &conversation_id {
        state
            .store
            .get_conversation(&identity.user_id, id)
            .await
            .map_err(ChatError::persistence)?
            .ok_or(ChatError::NotFound)?;
    }

    let key = upload_key(&identity.user_id, conversation_id.as_deref(), &name);
    let info = state
        .blobs
        .put(&key, &name, &content_type, &bytes)
        .await
        .map_err(ChatError::persistence)?;
    info!(user_id = %identity.user_id, key = %info.key, size = info.size, "attachment uploaded");
    Ok(Json(AttachmentRef {
        key: info.key,
        name: info.name,
        size: info.size,
        content_type: info.content_type,
    }))
}

async fn handle_fetch_file(
    State(state): State<AppState>,
    Authed(identity): Authed,
    Path(key): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if !owns_key(&identity.user_id, &key) || validate_key(&key).is_err() {
        return Err(ChatError::NotFound.into());
    }
    let blob = state
        .blobs
        .get(&key)
        .await
        .map_err(ChatError::persistence)?
        .ok_or(ChatError::NotFound)?;

    let etag = format!("\"{}\"", blob.info.etag);
    let cached = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag);
    let mut response = if cached {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        Body::from(blob.bytes).into_response()
    };
    let h = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&blob.info.content_type) {
        h.insert(header::CONTENT_TYPE, v);
    }
    if let Ok(v) = HeaderValue::from_str(&etag) {
        h.insert(header::ETAG, v);
    }
    h.insert(header::CACHE_CONTROL, HeaderValue::from_static("private, max-age=3600"));
    Ok(response)
}

// ============ Peer messages ============

async fn handle_relay(
    State(state): State<AppState>,
    Authed(identity): Authed,
    Json(request): Json<RelayRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.relay.relay(&identity, request).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

async fn handle_unread_count(
    State(state): State<AppState>,
    Authed(identity): Authed,
) -> Result<Json<serde_json::Value>, AppError> {
    let count = state.relay.unread_count(&identity).await?;
    Ok(Json(serde_json::json!({ "count": count })))
}

#[derive(Debug, Deserialize)]
struct InboxQuery {
    #[serde(default)]
    limit: Option<usize>,
}

async fn handle_inbox(
    State(state): State<AppState>,
    Authed(identity): Authed,
    Query(query): Query<InboxQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let limit = query.limit.unwrap_or(INBOX_LIMIT).clamp(1, 200);
    let messages = state.relay.inbox(&identity, limit).await?;
    Ok(Json(serde_json::json!({ "messages": messages })))
}
