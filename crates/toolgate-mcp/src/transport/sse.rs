//! Legacy HTTP+SSE transport: a long-lived `GET` event stream delivers
//! responses, and requests are `POST`ed to the endpoint the stream announces.

use super::event_stream::SseDecoder;
use super::pending::PendingRequests;
use super::stdio::answer_server_request;
use super::Transport;
use crate::config::TransportKind;
use crate::protocol::{Incoming, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use async_trait::async_trait;
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use toolgate_core::{ToolgateError, ToolgateResult};
use toolgate_security::{redact_url, GuardedClient, GuardedRequest, SecureUrl};
use tracing::{debug, info, warn};

/// How long to wait for the `endpoint` event after the stream opens.
const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport for servers speaking the legacy HTTP+SSE protocol.
pub struct SseTransport {
    server: String,
    client: GuardedClient,
    endpoint: SecureUrl,
    headers: HeaderMap,
    pending: Arc<PendingRequests>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Opens the event stream at `url` and waits for the message endpoint.
    ///
    /// The endpoint must share the stream's origin and pass the SSRF guard.
    pub async fn connect(
        server: &str,
        client: GuardedClient,
        url: SecureUrl,
        headers: HeaderMap,
    ) -> ToolgateResult<Self> {
        let request = GuardedRequest::get(url.clone())
            .headers(&headers)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"));
        let response = client.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolgateError::Transport(format!(
                "event stream answered HTTP {status}"
            )));
        }
        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("text/event-stream"));
        if !is_event_stream {
            return Err(ToolgateError::Protocol(
                "server did not answer with an event stream".into(),
            ));
        }

        let pending = PendingRequests::new();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (replies_tx, replies_rx) = tokio::sync::mpsc::unbounded_channel();
        let reader = tokio::spawn(read_stream(
            server.to_string(),
            response,
            Arc::clone(&pending),
            endpoint_tx,
            replies_tx,
        ));

        let raw_endpoint = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err(ToolgateError::Transport(
                    "event stream closed before announcing an endpoint".into(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(ToolgateError::Transport(
                    "no endpoint event received from the event stream".into(),
                ));
            }
        };

        let endpoint = match resolve_endpoint(&client, &url, &raw_endpoint).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };
        info!(server = %server, endpoint = %endpoint, "MCP event stream connected");

        let transport = Self {
            server: server.to_string(),
            client,
            endpoint,
            headers,
            pending,
            reader: Mutex::new(Some(reader)),
        };
        transport.spawn_reply_forwarder(replies_rx);
        Ok(transport)
    }

    /// The URL requests are posted to.
    pub fn endpoint(&self) -> &SecureUrl {
        &self.endpoint
    }

    /// Answers server-initiated requests read off the stream.
    fn spawn_reply_forwarder(
        &self,
        mut replies: tokio::sync::mpsc::UnboundedReceiver<JsonRpcResponse>,
    ) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let headers = self.headers.clone();
        let server = self.server.clone();
        tokio::spawn(async move {
            while let Some(reply) = replies.recv().await {
                if let Err(e) = post_json(&client, &endpoint, &headers, &reply).await {
                    warn!(server = %server, error = %e, "Failed to answer server request");
                }
            }
        });
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn request(&self, method: &str, params: Option<Value>) -> ToolgateResult<JsonRpcResponse> {
        let pending = self.pending.register()?;
        let request = JsonRpcRequest::new(pending.id(), method, params);
        post_json(&self.client, &self.endpoint, &self.headers, &request).await?;
        pending.wait().await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> ToolgateResult<()> {
        if self.pending.is_closed() {
            return Err(ToolgateError::Transport(self.pending.close_reason()));
        }
        let notification = JsonRpcNotification::new(method, params);
        post_json(&self.client, &self.endpoint, &self.headers, &notification).await
    }

    async fn close(&self) {
        self.pending.close("transport closed");
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
            debug!(server = %self.server, "Closed MCP event stream");
        }
    }

    fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

async fn post_json<T: Serialize>(
    client: &GuardedClient,
    endpoint: &SecureUrl,
    headers: &HeaderMap,
    message: &T,
) -> ToolgateResult<()> {
    let body = serde_json::to_vec(message)?;
    let request = GuardedRequest::post(endpoint.clone(), body)
        .headers(headers)
        .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let response = client.send(request).await.map_err(|e| match e {
        ToolgateError::ForbiddenTarget { .. } | ToolgateError::InvalidUrl(_) => e,
        other => ToolgateError::Transport(other.to_string()),
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(ToolgateError::Transport(format!(
            "message endpoint answered HTTP {status}"
        )));
    }
    Ok(())
}

/// Resolves the announced endpoint against the stream URL and checks it.
async fn resolve_endpoint(
    client: &GuardedClient,
    stream_url: &SecureUrl,
    raw: &str,
) -> ToolgateResult<SecureUrl> {
    let joined = stream_url
        .as_url()
        .join(raw.trim())
        .map_err(|e| ToolgateError::Protocol(format!("invalid endpoint event: {e}")))?;
    let endpoint = client.validate(joined.as_str()).await?;
    if endpoint.origin() != stream_url.origin() {
        return Err(ToolgateError::ForbiddenTarget {
            host: joined.host_str().unwrap_or_default().to_string(),
            reason: format!(
                "endpoint {} is not on the event stream's origin",
                redact_url(&joined)
            ),
        });
    }
    Ok(endpoint)
}

async fn read_stream(
    server: String,
    response: reqwest::Response,
    pending: Arc<PendingRequests>,
    endpoint_tx: oneshot::Sender<String>,
    replies: tokio::sync::mpsc::UnboundedSender<JsonRpcResponse>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut decoder = SseDecoder::new();
    let mut stream = response.bytes_stream();

    let reason = loop {
        let chunk = match stream.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => break format!("event stream failed: {}", e.without_url()),
            None => break "event stream ended".to_string(),
        };
        let events = match decoder.push(&chunk) {
            Ok(events) => events,
            Err(e) => break e.to_string(),
        };
        for event in events {
            match event.event.as_str() {
                "endpoint" => match endpoint_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(event.data);
                    }
                    None => debug!(server = %server, "Ignoring repeated endpoint event"),
                },
                "message" => match Incoming::parse(&event.data) {
                    Ok(Incoming::Response(resp)) => {
                        if !pending.complete(resp) {
                            debug!(server = %server, "Discarding response to an abandoned request");
                        }
                    }
                    Ok(Incoming::Request { id, method, .. }) => {
                        let _ = replies.send(answer_server_request(id, &method));
                    }
                    Ok(Incoming::Notification { method, .. }) => {
                        debug!(server = %server, method = %method, "Ignoring MCP notification");
                    }
                    Err(e) => warn!(server = %server, error = %e, "Malformed event from MCP server"),
                },
                other => debug!(server = %server, event = %other, "Ignoring unknown event"),
            }
        }
    };
    debug!(server = %server, reason = %reason, "MCP event stream finished");
    pending.close(reason);
}
