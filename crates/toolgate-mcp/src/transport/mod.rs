//! Transports carrying JSON-RPC between Toolgate and one MCP server.
//!
//! Every transport correlates responses to requests by id, so a single
//! transport can serve concurrent calls. [`create_transport`] is the only
//! place that turns a [`ServerConfig`] into a live transport.

mod event_stream;
mod http;
mod pending;
mod sse;
mod stdio;

pub use event_stream::{SseDecoder, SseEvent};
pub use http::{StreamableHttpTransport, PROTOCOL_VERSION_HEADER, SESSION_ID_HEADER};
pub use sse::SseTransport;
pub use stdio::StdioTransport;

use crate::config::{header_map, ClientOptions, ServerConfig, TransportKind};
use crate::protocol::JsonRpcResponse;
use async_trait::async_trait;
use serde_json::Value;
use toolgate_core::ToolgateResult;
use toolgate_security::GuardedClient;
use tracing::debug;

/// A bidirectional JSON-RPC channel to one MCP server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which transport this is.
    fn kind(&self) -> TransportKind;

    /// Sends a request and waits for its response.
    ///
    /// There is no timeout here; callers race this future against their own.
    async fn request(&self, method: &str, params: Option<Value>) -> ToolgateResult<JsonRpcResponse>;

    /// Sends a notification.
    async fn notify(&self, method: &str, params: Option<Value>) -> ToolgateResult<()>;

    /// Releases the underlying process or stream. Idempotent.
    async fn close(&self);

    /// Whether the peer went away or [`Transport::close`] was called.
    fn is_closed(&self) -> bool;

    /// Recent diagnostic output of the peer, used to enrich connection errors.
    async fn diagnostics(&self) -> Option<String> {
        None
    }
}

/// Builds a transport for `config`.
///
/// Configuration is validated before any process is spawned or any request
/// is sent; `sse` and `http` URLs must pass the SSRF guard of `options`.
pub async fn create_transport(
    server: &str,
    config: &ServerConfig,
    options: &ClientOptions,
) -> ToolgateResult<Box<dyn Transport>> {
    config.validate()?;
    debug!(server = %server, transport = %config.kind(), "Creating MCP transport");

    match config {
        ServerConfig::Stdio { command, args, env } => {
            let transport = StdioTransport::spawn(server, command, args, env)?;
            Ok(Box::new(transport))
        }
        ServerConfig::Sse { url, headers } => {
            let client = GuardedClient::new(options.ssrf.clone())?;
            let url = client.validate(url).await?;
            let transport =
                SseTransport::connect(server, client, url, header_map(headers)?).await?;
            Ok(Box::new(transport))
        }
        ServerConfig::Http { url, headers } => {
            let client = GuardedClient::new(options.ssrf.clone())?;
            let url = client.validate(url).await?;
            let transport = StreamableHttpTransport::new(server, client, url, header_map(headers)?);
            Ok(Box::new(transport))
        }
    }
}

/// Opens transports on behalf of client connections.
///
/// Production code uses [`DefaultConnector`]; tests substitute in-memory peers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a transport to the server named `server`.
    async fn open(
        &self,
        server: &str,
        config: &ServerConfig,
        options: &ClientOptions,
    ) -> ToolgateResult<Box<dyn Transport>>;
}

/// Connector backed by [`create_transport`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn open(
        &self,
        server: &str,
        config: &ServerConfig,
        options: &ClientOptions,
    ) -> ToolgateResult<Box<dyn Transport>> {
        create_transport(server, config, options).await
    }
}
