//! Named registry of MCP server connections.
//!
//! [`ClientManager`] owns one [`ClientConnection`] per configured server,
//! coalesces concurrent connects and resolves tool names to servers.

use crate::config::{ClientOptions, ServerConfig};
use crate::connection::{ClientConnection, ConnectionState, ServerStatus};
use crate::protocol::{McpToolResult, ToolDescriptor};
use crate::transport::{Connector, DefaultConnector};
use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use toolgate_core::{ToolgateError, ToolgateResult};
use tracing::{info, warn};

type PendingConnect = Shared<BoxFuture<'static, Arc<ClientConnection>>>;

/// Registry of MCP server connections for one host session.
///
/// Connections are opened lazily on first use, or eagerly through
/// [`connect_all`](Self::connect_all). Concurrent first uses of the same
/// server share a single connect attempt.
pub struct ClientManager {
    configs: BTreeMap<String, ServerConfig>,
    options: ClientOptions,
    connector: Arc<dyn Connector>,
    connections: Arc<RwLock<BTreeMap<String, Arc<ClientConnection>>>>,
    in_flight: Arc<Mutex<HashMap<String, PendingConnect>>>,
}

impl ClientManager {
    /// Creates a manager that opens real transports.
    pub fn new(configs: BTreeMap<String, ServerConfig>, options: ClientOptions) -> Self {
        Self::with_connector(configs, options, Arc::new(DefaultConnector))
    }

    /// Creates a manager that opens transports through `connector`.
    pub fn with_connector(
        configs: BTreeMap<String, ServerConfig>,
        options: ClientOptions,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            configs,
            options,
            connector,
            connections: Arc::new(RwLock::new(BTreeMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Names of all configured servers, sorted.
    pub fn server_names(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    /// Client-side settings shared by all connections.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The current connection for `name`, whatever its state.
    pub fn get(&self, name: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(name).cloned()
    }

    /// Returns a connected connection for `name`, connecting if needed.
    ///
    /// A failed or closed connection is replaced by a fresh one. All callers
    /// that arrive while a connect is running get its outcome.
    pub async fn ensure_connected(&self, name: &str) -> ToolgateResult<Arc<ClientConnection>> {
        let attempt = {
            let mut in_flight = self.in_flight.lock();
            if let Some(conn) = self.get(name) {
                if conn.state() == ConnectionState::Connected {
                    return Ok(conn);
                }
            }
            match in_flight.get(name) {
                Some(attempt) => attempt.clone(),
                None => {
                    let attempt = self.start_connect(name)?;
                    in_flight.insert(name.to_string(), attempt.clone());
                    attempt
                }
            }
        };

        let conn = attempt.await;
        match conn.state() {
            ConnectionState::Connected => Ok(conn),
            _ => Err(conn.failure().unwrap_or_else(|| ToolgateError::NotConnected {
                server: name.to_string(),
            })),
        }
    }

    fn start_connect(&self, name: &str) -> ToolgateResult<PendingConnect> {
        let config = self.configs.get(name).cloned().ok_or_else(|| {
            ToolgateError::Config(format!("no MCP server named '{name}' is configured"))
        })?;
        let conn = Arc::new(ClientConnection::new(
            name,
            config,
            self.options.clone(),
            Arc::clone(&self.connector),
        ));
        let connections = Arc::clone(&self.connections);
        let in_flight = Arc::clone(&self.in_flight);
        let key = name.to_string();

        Ok(async move {
            // The outcome is recorded on the connection itself.
            let _ = conn.connect().await;
            let replaced = connections.write().insert(key.clone(), Arc::clone(&conn));
            in_flight.lock().remove(&key);
            if let Some(old) = replaced {
                if !Arc::ptr_eq(&old, &conn) {
                    old.close().await;
                }
            }
            conn
        }
        .boxed()
        .shared())
    }

    /// Connects every configured server concurrently and returns the failures.
    pub async fn connect_all(&self) -> Vec<ToolgateError> {
        let names = self.server_names();
        let results = future::join_all(names.iter().map(|name| self.ensure_connected(name))).await;

        let mut errors = Vec::new();
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(conn) => {
                    let tools = conn.list_tools().map(|t| t.len()).unwrap_or_default();
                    info!(server = %name, tools, "MCP server ready");
                }
                Err(e) => {
                    warn!(server = %name, error = %e, "Failed to connect MCP server");
                    errors.push(e);
                }
            }
        }
        errors
    }

    /// Every tool of every connected server, ordered by server name.
    pub fn list_all_tools(&self) -> Vec<(String, ToolDescriptor)> {
        let connections: Vec<_> = self.connections.read().values().cloned().collect();
        connections
            .iter()
            .filter_map(|conn| conn.list_tools().ok().map(|tools| (conn.name(), tools)))
            .flat_map(|(server, tools)| tools.into_iter().map(move |t| (server.to_string(), t)))
            .collect()
    }

    /// Calls a tool by `server:tool` or by an unambiguous bare name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolgateResult<McpToolResult> {
        self.call_tool_with_timeout(name, arguments, None).await
    }

    /// Like [`call_tool`](Self::call_tool) with an explicit timeout.
    ///
    /// A server that was never connected, or whose connection failed, is
    /// (re)connected first. A server closed through [`close`](Self::close)
    /// answers `NotConnected` until [`ensure_connected`](Self::ensure_connected)
    /// is called for it.
    pub async fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Option<Duration>,
    ) -> ToolgateResult<McpToolResult> {
        let (server, tool) = self.resolve(name)?;
        let conn = match self.get(&server) {
            Some(conn) if conn.state() != ConnectionState::Failed => conn,
            _ => self.ensure_connected(&server).await?,
        };
        conn.call_tool(&tool, arguments, timeout).await
    }

    /// Splits a tool reference into `(server, tool)`.
    ///
    /// A `server:tool` prefix naming a configured server wins; otherwise the
    /// name is looked up in the catalogs of connected servers.
    pub fn resolve(&self, name: &str) -> ToolgateResult<(String, String)> {
        if let Some((server, tool)) = name.split_once(':') {
            if !tool.is_empty() && self.configs.contains_key(server) {
                return Ok((server.to_string(), tool.to_string()));
            }
        }

        let owners: Vec<String> = self
            .list_all_tools()
            .into_iter()
            .filter(|(_, t)| t.name == name)
            .map(|(server, _)| server)
            .collect();
        match owners.as_slice() {
            [] => Err(ToolgateError::UnknownTool(name.to_string())),
            [server] => Ok((server.clone(), name.to_string())),
            _ => Err(ToolgateError::AmbiguousTool {
                tool: name.to_string(),
                servers: owners,
            }),
        }
    }

    /// Closes the connection for `name`. Returns false when there was none.
    pub async fn close(&self, name: &str) -> bool {
        match self.get(name) {
            Some(conn) => {
                conn.close().await;
                true
            }
            None => false,
        }
    }

    /// Closes every connection.
    pub async fn close_all(&self) {
        let connections: Vec<_> = self.connections.read().values().cloned().collect();
        future::join_all(connections.iter().map(|c| c.close())).await;
    }

    /// One status entry per configured server, including never-connected ones.
    pub fn status(&self) -> Vec<ServerStatus> {
        let connections = self.connections.read();
        self.configs
            .iter()
            .map(|(name, config)| match connections.get(name) {
                Some(conn) => conn.status(),
                None => ServerStatus {
                    name: name.clone(),
                    transport: config.kind(),
                    state: ConnectionState::Idle,
                    tool_count: 0,
                    connected_at: None,
                    last_error: None,
                },
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use crate::protocol::JsonRpcResponse;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory server exporting a fixed set of tools.
    struct FakeTransport {
        tools: Vec<&'static str>,
        call_delay: Duration,
        closed: AtomicBool,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn kind(&self) -> TransportKind {
            TransportKind::Stdio
        }

        async fn request(
            &self,
            method: &str,
            params: Option<Value>,
        ) -> ToolgateResult<JsonRpcResponse> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ToolgateError::Transport("closed".into()));
            }
            let result = match method {
                "initialize" => json!({"protocolVersion": "2025-03-26", "capabilities": {}}),
                "tools/list" => json!({
                    "tools": self.tools.iter().map(|n| json!({"name": n})).collect::<Vec<_>>()
                }),
                "tools/call" => {
                    tokio::time::sleep(self.call_delay).await;
                    let params = params.unwrap_or_default();
                    if params["name"] == "explode" {
                        return Ok(JsonRpcResponse::failure(
                            json!(1),
                            crate::protocol::JsonRpcError::new(-32000, "disk on fire"),
                        ));
                    }
                    json!({"content": [{"type": "text", "text": format!("ran {}", params["name"])}]})
                }
                _ => json!({}),
            };
            Ok(JsonRpcResponse::success(json!(1), result))
        }

        async fn notify(&self, _method: &str, _params: Option<Value>) -> ToolgateResult<()> {
            Ok(())
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    /// Counts opens; the first `failing_opens` opens fail.
    struct CountingConnector {
        opens: AtomicUsize,
        delay: Duration,
        failing_opens: usize,
        call_delay: Duration,
    }

    impl CountingConnector {
        fn new() -> Arc<Self> {
            Self::with(false, Duration::ZERO)
        }

        fn with(fail: bool, call_delay: Duration) -> Arc<Self> {
            Self::failing_first(if fail { usize::MAX } else { 0 }, call_delay)
        }

        fn failing_first(failing_opens: usize, call_delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                opens: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
                failing_opens,
                call_delay,
            })
        }
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn open(
            &self,
            server: &str,
            _config: &ServerConfig,
            _options: &ClientOptions,
        ) -> ToolgateResult<Box<dyn Transport>> {
            let previous = self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if previous < self.failing_opens {
                return Err(ToolgateError::Transport("connection refused".into()));
            }
            let tools = match server {
                "files" => vec!["read_file", "search"],
                _ => vec!["search", "fetch"],
            };
            Ok(Box::new(FakeTransport {
                tools,
                call_delay: self.call_delay,
                closed: AtomicBool::new(false),
            }))
        }
    }

    fn configs(names: &[&str]) -> BTreeMap<String, ServerConfig> {
        names
            .iter()
            .map(|n| {
                (
                    n.to_string(),
                    ServerConfig::Stdio {
                        command: format!("./{n}-server"),
                        args: vec![],
                        env: BTreeMap::new(),
                    },
                )
            })
            .collect()
    }

    fn manager(names: &[&str], connector: Arc<CountingConnector>) -> ClientManager {
        ClientManager::with_connector(configs(names), ClientOptions::default(), connector)
    }

    #[tokio::test]
    async fn test_concurrent_ensure_connected_share_one_connect() {
        let connector = CountingConnector::new();
        let manager = manager(&["files"], Arc::clone(&connector));

        let results =
            future::join_all((0..10).map(|_| manager.ensure_connected("files"))).await;
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);

        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert_eq!(first.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_attempt() {
        let connector = CountingConnector::with(true, Duration::ZERO);
        let manager = manager(&["files"], Arc::clone(&connector));

        let results =
            future::join_all((0..5).map(|_| manager.ensure_connected("files"))).await;
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
        for result in results {
            match result {
                Err(ToolgateError::Connection { server, message }) => {
                    assert_eq!(server, "files");
                    assert!(message.contains("connection refused"));
                }
                other => panic!("expected connection error, got {other:?}"),
            }
        }
        assert_eq!(manager.get("files").unwrap().state(), ConnectionState::Failed);
    }

    #[tokio::test]
    async fn test_unconfigured_server_is_config_error() {
        let manager = manager(&["files"], CountingConnector::new());
        let err = manager.ensure_connected("nope").await.unwrap_err();
        assert!(matches!(err, ToolgateError::Config(_)));
    }

    #[tokio::test]
    async fn test_call_tool_resolution() {
        let connector = CountingConnector::new();
        let manager = manager(&["files", "web"], Arc::clone(&connector));
        assert!(manager.connect_all().await.is_empty());

        let result = manager.call_tool("files:read_file", json!({})).await.unwrap();
        assert_eq!(result.text(), "ran \"read_file\"");

        // Unique bare name.
        let result = manager.call_tool("fetch", json!({})).await.unwrap();
        assert_eq!(result.text(), "ran \"fetch\"");

        match manager.call_tool("search", json!({})).await.unwrap_err() {
            ToolgateError::AmbiguousTool { servers, .. } => {
                assert_eq!(servers, vec!["files", "web"]);
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }

        let err = manager.call_tool("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, ToolgateError::UnknownTool(_)));

        let tools = manager.list_all_tools();
        assert_eq!(tools.len(), 4);
        assert_eq!(tools[0].0, "files");
    }

    #[tokio::test]
    async fn test_qualified_call_connects_lazily() {
        let connector = CountingConnector::new();
        let manager = manager(&["files"], Arc::clone(&connector));
        assert!(manager.get("files").is_none());

        manager.call_tool("files:read_file", json!({})).await.unwrap();
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get("files").unwrap().state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_closed_server_is_not_resurrected_by_calls() {
        let connector = CountingConnector::new();
        let manager = manager(&["files"], Arc::clone(&connector));
        manager.ensure_connected("files").await.unwrap();

        assert!(manager.close("files").await);
        let err = manager
            .call_tool("files:read_file", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolgateError::NotConnected { ref server } if server == "files"));
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);

        // Explicit reconnect builds a fresh instance.
        let conn = manager.ensure_connected("files").await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_server_reconnects_on_next_call() {
        let connector = CountingConnector::failing_first(1, Duration::ZERO);
        let manager = manager(&["files"], Arc::clone(&connector));

        let errors = manager.connect_all().await;
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_retryable());
        assert_eq!(manager.get("files").unwrap().state(), ConnectionState::Failed);

        let result = manager.call_tool("files:read_file", json!({})).await.unwrap();
        assert_eq!(result.text(), "ran \"read_file\"");
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
        assert_eq!(manager.get("files").unwrap().state(), ConnectionState::Connected);

        // Further calls reuse the new connection.
        manager.call_tool("files:search", json!({})).await.unwrap();
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tool_timeout_and_protocol_error() {
        let connector = CountingConnector::with(false, Duration::from_millis(200));
        let manager = manager(&["files"], connector);
        manager.ensure_connected("files").await.unwrap();

        let err = manager
            .call_tool_with_timeout(
                "files:read_file",
                json!({}),
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());

        let err = manager
            .call_tool("files:explode", json!({}))
            .await
            .unwrap_err();
        match err {
            ToolgateError::Tool {
                message,
                is_timeout,
                ..
            } => {
                assert!(!is_timeout);
                assert_eq!(message, "disk on fire");
            }
            other => panic!("expected tool error, got {other:?}"),
        }
        // A tool failure leaves the connection usable.
        assert_eq!(
            manager.get("files").unwrap().state(),
            ConnectionState::Connected
        );
    }

    #[tokio::test]
    async fn test_status_lists_every_configured_server() {
        let manager = manager(&["files", "web"], CountingConnector::new());
        manager.ensure_connected("web").await.unwrap();
        let status = manager.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].name, "files");
        assert_eq!(status[0].state, ConnectionState::Idle);
        assert_eq!(status[1].state, ConnectionState::Connected);
        assert_eq!(status[1].tool_count, 2);
        assert!(status[1].connected_at.is_some());

        manager.close_all().await;
        assert_eq!(manager.status()[1].state, ConnectionState::Closed);
    }
}
