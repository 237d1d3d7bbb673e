//! Purpose: Provide the HTTP/JSON + WebSocket server for snipstore.
//! Exports: `ServeConfig`, `serve`.
//! Role: Axum-based server exposing snippet CRUD and the realtime channel.
//! Invariants: Every REST response uses the `{success, message, count, data}`
//! envelope; error kinds map onto stable HTTP statuses.
//! Invariants: Commit and broadcast stay decoupled: the write path never
//! publishes, and a failed delivery never fails a committed request.

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, Path as AxumPath, Query, State};
use axum::http::{HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use std::error::Error as StdError;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use snipstore::api::{
    ClientEvent, Durability, Error, ErrorKind, ListQuery, LocalClient, Relay, SessionRegistry,
    SnippetDraft, SnippetPatch, SortField, SortOrder,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub data_dir: PathBuf,
    pub cors_origins: Vec<String>,
    pub debug_errors: bool,
    pub max_body_bytes: u64,
    pub durability: Durability,
}

struct AppState {
    client: LocalClient,
    registry: Arc<SessionRegistry>,
    relay: Relay,
    started: Instant,
    debug_errors: bool,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    let cors_origins = validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config.max_body_bytes.try_into().map_err(|_| {
        Error::new(ErrorKind::Validation).with_message("--max-body-bytes is too large")
    })?;

    let registry = Arc::new(SessionRegistry::new());
    let state = Arc::new(AppState {
        client: LocalClient::new()
            .with_data_dir(config.data_dir)
            .with_durability(config.durability),
        registry: registry.clone(),
        relay: Relay::new(registry),
        started: Instant::now(),
        debug_errors: config.debug_errors,
    });

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(cors_origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/snippets", get(list_snippets).post(create_snippet))
        .route("/snippets/languages/all", get(all_languages))
        .route("/snippets/language/:language", get(snippets_by_language))
        .route(
            "/snippets/:id",
            get(get_snippet).put(update_snippet).delete(delete_snippet),
        )
        .route("/realtime", get(realtime))
        .fallback(unknown_route)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    info!(bind = %config.bind, "snipstore server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn validate_config(config: &ServeConfig) -> Result<Vec<HeaderValue>, Error> {
    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Validation)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 10485760."));
    }

    if config.cors_origins.is_empty() {
        return Err(Error::new(ErrorKind::Validation)
            .with_message("at least one CORS origin is required")
            .with_hint("Pass --cors-origin or set SNIPSTORE_CLIENT_URL."));
    }

    config
        .cors_origins
        .iter()
        .map(|origin| {
            origin.parse::<HeaderValue>().map_err(|err| {
                Error::new(ErrorKind::Validation)
                    .with_message(format!("invalid CORS origin: {origin}"))
                    .with_source(err)
            })
        })
        .collect()
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

#[derive(Debug, Deserialize)]
struct ListParams {
    search: Option<String>,
    language: Option<String>,
    #[serde(rename = "sortBy")]
    sort_by: Option<String>,
    order: Option<String>,
}

impl ListParams {
    // Empty query values behave like absent ones.
    fn into_query(self) -> Result<ListQuery, Error> {
        let mut query = ListQuery {
            search: self.search.filter(|value| !value.is_empty()),
            language: self.language.filter(|value| !value.is_empty()),
            ..ListQuery::default()
        };
        if let Some(sort_by) = self.sort_by.filter(|value| !value.is_empty()) {
            query.sort.field = SortField::parse(&sort_by)?;
        }
        if let Some(order) = self.order.filter(|value| !value.is_empty()) {
            query.sort.order = SortOrder::parse(&order)?;
        }
        Ok(query)
    }
}

async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    let timestamp = time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default();
    Json(json!({
        "success": true,
        "message": "server is running",
        "uptime": state.started.elapsed().as_secs_f64(),
        "timestamp": timestamp,
    }))
    .into_response()
}

async fn list_snippets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Response {
    let query = match params.into_query() {
        Ok(query) => query,
        Err(err) => return error_response(&err, state.debug_errors),
    };
    match state.client.list_snippets(&query) {
        Ok(snippets) => listing_response(snippets),
        Err(err) => error_response(&err, state.debug_errors),
    }
}

async fn get_snippet(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<String>) -> Response {
    match state.client.get_snippet(&id) {
        Ok(snippet) => success_response(StatusCode::OK, None, None, json!(snippet)),
        Err(err) => error_response(&err, state.debug_errors),
    }
}

async fn create_snippet(
    State(state): State<Arc<AppState>>,
    body: Result<Json<SnippetDraft>, JsonRejection>,
) -> Response {
    let Json(draft) = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection_response(rejection, state.debug_errors),
    };
    match state.client.create_snippet(draft) {
        Ok(snippet) => success_response(
            StatusCode::CREATED,
            Some("snippet created successfully"),
            None,
            json!(snippet),
        ),
        Err(err) => error_response(&err, state.debug_errors),
    }
}

async fn update_snippet(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
    body: Result<Json<SnippetPatch>, JsonRejection>,
) -> Response {
    let Json(patch) = match body {
        Ok(body) => body,
        Err(rejection) => return body_rejection_response(rejection, state.debug_errors),
    };
    match state.client.update_snippet(&id, &patch) {
        Ok(snippet) => success_response(
            StatusCode::OK,
            Some("snippet updated successfully"),
            None,
            json!(snippet),
        ),
        Err(err) => error_response(&err, state.debug_errors),
    }
}

async fn delete_snippet(
    State(state): State<Arc<AppState>>,
    AxumPath(id): AxumPath<String>,
) -> Response {
    match state.client.delete_snippet(&id) {
        Ok(()) => success_response(
            StatusCode::OK,
            Some("snippet deleted successfully"),
            None,
            json!({}),
        ),
        Err(err) => error_response(&err, state.debug_errors),
    }
}

async fn snippets_by_language(
    State(state): State<Arc<AppState>>,
    AxumPath(language): AxumPath<String>,
) -> Response {
    let query = ListQuery::default().with_language(language);
    match state.client.list_snippets(&query) {
        Ok(snippets) => listing_response(snippets),
        Err(err) => error_response(&err, state.debug_errors),
    }
}

async fn all_languages(State(state): State<Arc<AppState>>) -> Response {
    match state.client.distinct_languages() {
        Ok(languages) => success_response(
            StatusCode::OK,
            None,
            Some(languages.len()),
            json!(languages),
        ),
        Err(err) => error_response(&err, state.debug_errors),
    }
}

async fn unknown_route(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "message": format!("route not found: {}", uri.path()),
        })),
    )
        .into_response()
}

async fn realtime(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_session(state, socket))
}

/// One connected realtime session: register, relay inbound mutation events to
/// everyone else, drain the per-session outbound queue, and announce presence
/// on both edges of the connection.
async fn run_session(state: Arc<AppState>, mut socket: WebSocket) {
    let (session_id, mut outbound) = match state.registry.register() {
        Ok(admitted) => admitted,
        Err(err) => {
            debug!(%err, "failed to admit realtime session");
            return;
        }
    };
    info!(session = %session_id, count = state.registry.count(), "session connected");
    state.relay.broadcast_user_count();

    loop {
        tokio::select! {
            event = outbound.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        debug!(session = %session_id, %err, "failed to encode event");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(&text) {
                            Ok(event) => state.relay.publish(event.into_broadcast(), &session_id),
                            Err(err) => {
                                debug!(session = %session_id, %err, "ignoring malformed event");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(session = %session_id, %err, "session read failed");
                        break;
                    }
                }
            }
        }
    }

    state.registry.unregister(&session_id);
    state.relay.broadcast_user_count();
    info!(session = %session_id, count = state.registry.count(), "session disconnected");
}

fn listing_response(snippets: Vec<snipstore::api::Snippet>) -> Response {
    success_response(
        StatusCode::OK,
        None,
        Some(snippets.len()),
        json!(snippets),
    )
}

fn success_response(
    status: StatusCode,
    message: Option<&str>,
    count: Option<usize>,
    data: Value,
) -> Response {
    let mut body = serde_json::Map::new();
    body.insert("success".to_string(), json!(true));
    if let Some(message) = message {
        body.insert("message".to_string(), json!(message));
    }
    if let Some(count) = count {
        body.insert("count".to_string(), json!(count));
    }
    body.insert("data".to_string(), data);
    (status, Json(Value::Object(body))).into_response()
}

fn body_rejection_response(rejection: JsonRejection, debug_errors: bool) -> Response {
    let err = Error::new(ErrorKind::Validation)
        .with_message(format!("invalid request body: {}", rejection.body_text()));
    error_response(&err, debug_errors)
}

fn error_response(err: &Error, debug_errors: bool) -> Response {
    let status = match err.kind() {
        ErrorKind::Validation | ErrorKind::Duplicate => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::Busy => StatusCode::LOCKED,
        ErrorKind::Corrupt | ErrorKind::Io | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let mut body = serde_json::Map::new();
    body.insert("success".to_string(), json!(false));
    body.insert(
        "message".to_string(),
        json!(err.message().unwrap_or("server error")),
    );
    if debug_errors {
        body.insert("detail".to_string(), json!(detail_chain(err)));
        if let Some(hint) = err.hint() {
            body.insert("hint".to_string(), json!(hint));
        }
    }
    (status, Json(Value::Object(body))).into_response()
}

// Diagnostic detail is only exposed when the operator opted in.
fn detail_chain(err: &Error) -> String {
    let mut detail = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        detail.push_str(": ");
        detail.push_str(&cause.to_string());
        source = cause.source();
    }
    detail
}

#[cfg(test)]
mod tests {
    use super::{ServeConfig, validate_config};
    use snipstore::api::{Durability, ErrorKind};

    fn config() -> ServeConfig {
        ServeConfig {
            bind: "127.0.0.1:0".parse().expect("bind"),
            data_dir: std::env::temp_dir(),
            cors_origins: vec!["http://localhost:3000".to_string()],
            debug_errors: false,
            max_body_bytes: 10 * 1024 * 1024,
            durability: Durability::Fast,
        }
    }

    #[test]
    fn default_config_is_valid() {
        let origins = validate_config(&config()).expect("valid");
        assert_eq!(origins.len(), 1);
    }

    #[test]
    fn zero_body_limit_is_rejected() {
        let mut config = config();
        config.max_body_bytes = 0;
        let err = validate_config(&config).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn empty_cors_origins_are_rejected() {
        let mut config = config();
        config.cors_origins.clear();
        let err = validate_config(&config).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn malformed_cors_origin_is_rejected() {
        let mut config = config();
        config.cors_origins = vec!["bad\norigin".to_string()];
        let err = validate_config(&config).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
