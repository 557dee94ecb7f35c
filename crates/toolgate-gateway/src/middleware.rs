use axum::{
    extract::{Request, State},
    http::{header::WWW_AUTHENTICATE, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use toolgate_mcp::McpServer;
use tracing::warn;

/// Auth middleware: requires `Authorization: Bearer <token>` when the server
/// host has a token configured.
///
/// The comparison runs in constant time; any failure answers 401.
pub async fn auth_middleware(
    State(server): State<Arc<McpServer>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if server.authenticate(&headers) {
        return next.run(request).await;
    }

    let reason = if headers.contains_key("authorization") {
        "invalid bearer token"
    } else {
        "missing bearer token"
    };
    warn!(path = %request.uri().path(), reason, "Rejected MCP request");
    (
        StatusCode::UNAUTHORIZED,
        [(WWW_AUTHENTICATE, "Bearer")],
        "Unauthorized",
    )
        .into_response()
}
