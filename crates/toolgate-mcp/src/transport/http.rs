//! Streamable HTTP transport: every message is a `POST` to one endpoint and
//! each response comes back either as a JSON body or as an event stream.

use super::event_stream::SseDecoder;
use super::Transport;
use crate::config::TransportKind;
use crate::protocol::{Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use toolgate_core::{ToolgateError, ToolgateResult};
use toolgate_security::{GuardedClient, GuardedRequest, SecureUrl};
use tracing::{debug, warn};

/// Header carrying the session id issued by the server.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

/// Header announcing the negotiated protocol revision.
pub const PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

const ACCEPT_BOTH: &str = "application/json, text/event-stream";
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_BODY_PREVIEW: usize = 200;

/// Transport for servers speaking streamable HTTP.
pub struct StreamableHttpTransport {
    server: String,
    client: GuardedClient,
    url: SecureUrl,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    protocol_version: Mutex<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl StreamableHttpTransport {
    /// Creates the transport. No request is sent until the first message.
    pub fn new(server: &str, client: GuardedClient, url: SecureUrl, headers: HeaderMap) -> Self {
        Self {
            server: server.to_string(),
            client,
            url,
            headers,
            session_id: Mutex::new(None),
            protocol_version: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Session id issued by the server, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    fn build(&self, method: Method, body: Option<Vec<u8>>) -> GuardedRequest {
        let mut request = GuardedRequest::new(method, self.url.clone())
            .headers(&self.headers)
            .header(ACCEPT, HeaderValue::from_static(ACCEPT_BOTH));
        if let Some(body) = body {
            request = request
                .body(body)
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(id) = self.session_id() {
            if let Ok(value) = HeaderValue::from_str(&id) {
                request = request.header(HeaderName::from_static(SESSION_ID_HEADER), value);
            }
        }
        if let Some(version) = self.protocol_version.lock().clone() {
            if let Ok(value) = HeaderValue::from_str(&version) {
                request = request.header(HeaderName::from_static(PROTOCOL_VERSION_HEADER), value);
            }
        }
        request
    }

    async fn post(&self, body: Vec<u8>) -> ToolgateResult<reqwest::Response> {
        if self.is_closed() {
            return Err(ToolgateError::Transport("transport closed".into()));
        }
        let response = self
            .client
            .send(self.build(Method::POST, Some(body)))
            .await
            .map_err(into_transport_error)?;

        if let Some(id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut session = self.session_id.lock();
            if session.as_deref() != Some(id) {
                debug!(server = %self.server, "MCP session established");
                *session = Some(id.to_string());
            }
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND && self.session_id().is_some() {
            return Err(ToolgateError::Transport("MCP session expired".into()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
            return Err(ToolgateError::Transport(format!(
                "MCP endpoint answered HTTP {status}: {preview}"
            )));
        }
        Ok(response)
    }

    async fn read_event_stream(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> ToolgateResult<JsonRpcResponse> {
        let mut decoder = SseDecoder::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                ToolgateError::Transport(format!("event stream failed: {}", e.without_url()))
            })?;
            for event in decoder.push(&chunk)? {
                if let Some(resp) = self.match_event(&event.event, &event.data, id) {
                    return Ok(resp);
                }
            }
        }
        if let Some(event) = decoder.finish() {
            if let Some(resp) = self.match_event(&event.event, &event.data, id) {
                return Ok(resp);
            }
        }
        Err(ToolgateError::Transport(
            "event stream ended before the response arrived".into(),
        ))
    }

    fn match_event(&self, event: &str, data: &str, id: u64) -> Option<JsonRpcResponse> {
        if event != "message" {
            return None;
        }
        match Incoming::parse(data) {
            Ok(Incoming::Response(resp)) if resp.numeric_id() == Some(id) => Some(resp),
            Ok(Incoming::Response(_)) => {
                debug!(server = %self.server, "Ignoring response for another request");
                None
            }
            Ok(Incoming::Request { method, .. }) | Ok(Incoming::Notification { method, .. }) => {
                debug!(server = %self.server, method = %method, "Ignoring server message on request stream");
                None
            }
            Err(e) => {
                warn!(server = %self.server, error = %e, "Malformed event from MCP server");
                None
            }
        }
    }

    fn remember_protocol_version(&self, method: &str, response: &JsonRpcResponse) {
        if method != "initialize" {
            return;
        }
        if let Some(version) = response
            .result
            .as_ref()
            .and_then(|r| r.get("protocolVersion"))
            .and_then(Value::as_str)
        {
            *self.protocol_version.lock() = Some(version.to_string());
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn request(&self, method: &str, params: Option<Value>) -> ToolgateResult<JsonRpcResponse> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = serde_json::to_vec(&JsonRpcRequest::new(id, method, params))?;
        let response = self.post(body).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let resp = if content_type.starts_with("text/event-stream") {
            self.read_event_stream(response, id).await?
        } else {
            let bytes = response.bytes().await.map_err(|e| {
                ToolgateError::Transport(format!("failed to read response: {}", e.without_url()))
            })?;
            match Incoming::parse(&String::from_utf8_lossy(&bytes)) {
                Ok(Incoming::Response(resp)) => resp,
                Ok(_) => {
                    return Err(ToolgateError::Protocol(
                        "expected a JSON-RPC response body".into(),
                    ))
                }
                Err(e) => return Err(ToolgateError::Protocol(e)),
            }
        };
        self.remember_protocol_version(method, &resp);
        Ok(resp)
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> ToolgateResult<()> {
        let body = serde_json::to_vec(&JsonRpcNotification::new(method, params))?;
        self.post(body).await.map(|_| ())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.session_id().is_none() {
            return;
        }
        let request = self.build(Method::DELETE, None).timeout(CLOSE_TIMEOUT);
        match self.client.send(request).await {
            Ok(resp) => {
                debug!(server = %self.server, status = %resp.status(), "Ended MCP session");
            }
            Err(e) => debug!(server = %self.server, error = %e, "Failed to end MCP session"),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Keeps SSRF rejections as they are; anything else is a transport failure.
fn into_transport_error(err: ToolgateError) -> ToolgateError {
    match err {
        ToolgateError::ForbiddenTarget { .. } | ToolgateError::InvalidUrl(_) => err,
        ToolgateError::Transport(_) => err,
        other => ToolgateError::Transport(other.to_string()),
    }
}
