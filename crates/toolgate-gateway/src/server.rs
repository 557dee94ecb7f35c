use crate::middleware::auth_middleware;
use crate::sessions::{SessionRegistry, StreamGuard};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware as axum_mw,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::wrappers::ReceiverStream;
use toolgate_core::ToolgateResult;
use toolgate_mcp::transport::SESSION_ID_HEADER;
use toolgate_mcp::McpServer;
use tracing::{debug, info};
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    /// The MCP server host answering every message.
    pub server: Arc<McpServer>,
    /// Sessions of connected MCP clients.
    pub sessions: Arc<SessionRegistry>,
    base_path: String,
}

/// Mounts an [`McpServer`] on HTTP.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the router: the MCP endpoints under the server's `base_path`
    /// (behind the auth middleware) and an open `/health`.
    pub fn build(server: Arc<McpServer>) -> Router {
        let base = normalize_base_path(&server.config().base_path);
        let state = Arc::new(AppState {
            server: Arc::clone(&server),
            sessions: SessionRegistry::new(),
            base_path: base.clone(),
        });

        let root = if base.is_empty() { "/" } else { base.as_str() };
        Router::new()
            .route(root, post(streamable_post).delete(streamable_delete))
            .route(&format!("{base}/sse"), get(sse_connect))
            .route(&format!("{base}/messages"), post(sse_message))
            .route_layer(axum_mw::from_fn_with_state(server, auth_middleware))
            .route("/health", get(health_handler))
            .with_state(state)
    }

    /// Serve the router on `listener` until `shutdown` resolves.
    pub async fn serve<F>(listener: TcpListener, server: Arc<McpServer>, shutdown: F) -> ToolgateResult<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        let base = normalize_base_path(&server.config().base_path);
        info!(addr = %addr, base_path = %base, "MCP gateway listening");
        axum::serve(listener, Self::build(server))
            .with_graceful_shutdown(shutdown)
            .await?;
        info!("MCP gateway stopped");
        Ok(())
    }
}

/// `"/mcp/"` becomes `"/mcp"`, `"mcp"` becomes `"/mcp"`, `"/"` becomes `""`.
fn normalize_base_path(raw: &str) -> String {
    let trimmed = raw.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "toolgate",
        "tools": state.server.skills().skill_count(),
        "sessions": state.sessions.session_count(),
    }))
}

fn parse_body(body: &Bytes) -> Result<Value, Response> {
    serde_json::from_slice(body).map_err(|e| {
        let reply = serde_json::json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": {"code": toolgate_mcp::protocol::PARSE_ERROR, "message": format!("Parse error: {e}")}
        });
        (StatusCode::BAD_REQUEST, Json(reply)).into_response()
    })
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok())
}

fn unknown_session() -> Response {
    (StatusCode::NOT_FOUND, "Unknown MCP session").into_response()
}

/// `POST {base}`: one JSON-RPC message (or batch) per request.
async fn streamable_post(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message = match parse_body(&body) {
        Ok(message) => message,
        Err(response) => return response,
    };

    let session = match session_header(&headers) {
        Some(raw) => match Uuid::parse_str(raw) {
            Ok(id) if state.sessions.has_http(id) => Some(id),
            _ => return unknown_session(),
        },
        None => None,
    };
    let is_initialize = message.get("method").and_then(Value::as_str) == Some("initialize");
    let issued = if is_initialize && session.is_none() {
        Some(state.sessions.open_http())
    } else {
        None
    };

    match state.server.handle_message(message).await {
        Some(reply) => {
            let mut response = Json(reply).into_response();
            if let Some(id) = issued {
                if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
                    response.headers_mut().insert(SESSION_ID_HEADER, value);
                }
            }
            response
        }
        None => StatusCode::ACCEPTED.into_response(),
    }
}

/// `DELETE {base}`: ends a streamable HTTP session.
async fn streamable_delete(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(raw) = session_header(&headers) else {
        return (StatusCode::BAD_REQUEST, "Missing MCP session id").into_response();
    };
    match Uuid::parse_str(raw) {
        Ok(id) if state.sessions.close_http(id) => StatusCode::NO_CONTENT.into_response(),
        _ => unknown_session(),
    }
}

/// `GET {base}/sse`: opens a legacy event stream. The first event names the
/// URL the client posts its messages to.
async fn sse_connect(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (id, rx) = state.sessions.open_stream();
    let endpoint = format!("{}/messages?sessionId={id}", state.base_path);
    let guard = StreamGuard {
        id,
        sessions: Arc::clone(&state.sessions),
    };

    let first = stream::once(async move { Ok(Event::default().event("endpoint").data(endpoint)) });
    let messages = ReceiverStream::new(rx).map(move |json| {
        // Keeps the session registered exactly as long as the stream lives.
        let _session = &guard;
        Ok(Event::default().event("message").data(json))
    });
    Sse::new(first.chain(messages)).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Uuid,
}

/// `POST {base}/messages?sessionId=...`: the reply is delivered on the
/// session's event stream.
async fn sse_message(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessageQuery>,
    body: Bytes,
) -> Response {
    let Some(tx) = state.sessions.stream(query.session_id) else {
        return unknown_session();
    };
    let message = match parse_body(&body) {
        Ok(message) => message,
        Err(response) => return response,
    };

    let server = Arc::clone(&state.server);
    let session_id = query.session_id;
    tokio::spawn(async move {
        if let Some(reply) = server.handle_message(message).await {
            if tx.send(reply.to_string()).await.is_err() {
                debug!(session_id = %session_id, "Event stream closed before the reply was sent");
            }
        }
    });
    StatusCode::ACCEPTED.into_response()
}
