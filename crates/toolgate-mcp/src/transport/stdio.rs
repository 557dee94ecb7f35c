//! Stdio transport: the MCP server is a child process speaking
//! newline-delimited JSON-RPC on its stdin/stdout.

use super::pending::PendingRequests;
use super::Transport;
use crate::config::TransportKind;
use crate::protocol::{
    Incoming, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    METHOD_NOT_FOUND,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use toolgate_core::{ToolgateError, ToolgateResult};
use tracing::{debug, error, info, warn};

/// Number of stderr lines kept per child.
const STDERR_CAPACITY: usize = 50;

/// Longest line accepted from a child's stdout.
const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// How long a failed connect waits for the child's last stderr output.
const STDERR_SETTLE: Duration = Duration::from_millis(500);

type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// Transport over the stdin/stdout of a child process (or any byte pipe).
pub struct StdioTransport {
    server: String,
    writer: SharedWriter,
    pending: Arc<PendingRequests>,
    child: Mutex<Option<Child>>,
    stderr: Option<Arc<StderrLog>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StdioTransport {
    /// Spawns `command` and wires its pipes. The child is killed when the
    /// transport is closed or dropped.
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> ToolgateResult<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ToolgateError::connection(server, format!("failed to spawn '{command}': {e}"))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolgateError::connection(server, "child stdin not available"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolgateError::connection(server, "child stdout not available"))?;
        let stderr = child.stderr.take();

        info!(server = %server, command = %command, pid = ?child.id(), "Spawned MCP server");

        let mut transport = Self::from_io(server, stdout, stdin);
        if let Some(stderr) = stderr {
            let log = StderrLog::new();
            transport
                .tasks
                .lock()
                .push(log.clone().capture(server.to_string(), stderr));
            transport.stderr = Some(log);
        }
        *transport.child.lock() = Some(child);
        Ok(transport)
    }

    /// Wraps an existing pipe pair: `reader` carries the server's output,
    /// `writer` its input.
    pub fn from_io<R, W>(server: &str, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Box::new(writer)));
        let pending = PendingRequests::new();
        let reader_task = tokio::spawn(read_loop(
            server.to_string(),
            reader,
            Arc::clone(&pending),
            Arc::clone(&writer),
        ));
        Self {
            server: server.to_string(),
            writer,
            pending,
            child: Mutex::new(None),
            stderr: None,
            tasks: Mutex::new(vec![reader_task]),
        }
    }

    async fn send<T: Serialize>(&self, message: &T) -> ToolgateResult<()> {
        if let Err(e) = write_message(&self.writer, message).await {
            self.pending.close(format!("write to MCP server failed: {e}"));
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    async fn request(&self, method: &str, params: Option<Value>) -> ToolgateResult<JsonRpcResponse> {
        let pending = self.pending.register()?;
        let request = JsonRpcRequest::new(pending.id(), method, params);
        self.send(&request).await?;
        pending.wait().await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> ToolgateResult<()> {
        if self.pending.is_closed() {
            return Err(ToolgateError::Transport(self.pending.close_reason()));
        }
        self.send(&JsonRpcNotification::new(method, params)).await
    }

    async fn close(&self) {
        self.pending.close("transport closed");
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                debug!(server = %self.server, error = %e, "Failed to kill MCP server");
            } else {
                info!(server = %self.server, "Stopped MCP server");
            }
        }
        let _ = self.writer.lock().await.shutdown().await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    fn is_closed(&self) -> bool {
        self.pending.is_closed()
    }

    async fn diagnostics(&self) -> Option<String> {
        let log = self.stderr.as_ref()?;
        if self.pending.is_closed() {
            // The child is gone; give its last stderr lines a moment to arrive.
            let _ = tokio::time::timeout(STDERR_SETTLE, log.finished()).await;
        }
        let lines = log.tail();
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn write_message<T: Serialize>(writer: &SharedWriter, message: &T) -> ToolgateResult<()> {
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    let mut writer = writer.lock().await;
    writer
        .write_all(&line)
        .await
        .map_err(|e| ToolgateError::Transport(format!("failed to write to MCP server: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ToolgateError::Transport(format!("failed to flush MCP server input: {e}")))
}

async fn read_loop<R>(
    server: String,
    reader: R,
    pending: Arc<PendingRequests>,
    writer: SharedWriter,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    let reason = loop {
        line.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut line)
            .await;
        match read {
            Ok(0) => break "MCP server closed its output".to_string(),
            Ok(_) => {
                if line.len() > MAX_LINE_BYTES && line.last() != Some(&b'\n') {
                    warn!(server = %server, limit = MAX_LINE_BYTES, "Dropping over-long line from MCP server");
                    if let Err(e) = skip_line(&mut reader).await {
                        break format!("error reading MCP server output: {e}");
                    }
                    continue;
                }
                let Ok(text) = std::str::from_utf8(&line) else {
                    debug!(server = %server, "Non-UTF-8 line from MCP server");
                    continue;
                };
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match Incoming::parse(trimmed) {
                    Ok(Incoming::Response(resp)) => {
                        if !pending.complete(resp) {
                            debug!(server = %server, "Discarding response to an abandoned request");
                        }
                    }
                    Ok(Incoming::Request { id, method, .. }) => {
                        let reply = answer_server_request(id, &method);
                        if let Err(e) = write_message(&writer, &reply).await {
                            warn!(server = %server, error = %e, "Failed to answer server request");
                        }
                    }
                    Ok(Incoming::Notification { method, .. }) => {
                        debug!(server = %server, method = %method, "Ignoring MCP notification");
                    }
                    Err(e) => {
                        debug!(server = %server, error = %e, "Non-JSON-RPC line from MCP server");
                    }
                }
            }
            Err(e) => {
                error!(server = %server, error = %e, "Error reading MCP server output");
                break format!("error reading MCP server output: {e}");
            }
        }
    };
    debug!(server = %server, reason = %reason, "MCP stdio reader finished");
    pending.close(reason);
}

/// Consumes input up to and including the next newline.
async fn skip_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Replies to a request initiated by the server. Only `ping` is supported.
pub(crate) fn answer_server_request(id: Value, method: &str) -> JsonRpcResponse {
    if method == "ping" {
        JsonRpcResponse::success(id, serde_json::json!({}))
    } else {
        JsonRpcResponse::failure(
            id,
            JsonRpcError::new(METHOD_NOT_FOUND, format!("Method not found: {method}")),
        )
    }
}

/// Bounded buffer of a child's most recent stderr lines.
struct StderrLog {
    lines: Mutex<VecDeque<String>>,
    done: Notify,
    finished: std::sync::atomic::AtomicBool,
}

impl StderrLog {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            lines: Mutex::new(VecDeque::with_capacity(STDERR_CAPACITY)),
            done: Notify::new(),
            finished: std::sync::atomic::AtomicBool::new(false),
        })
    }

    fn capture<R>(self: Arc<Self>, server: String, stderr: R) -> JoinHandle<()>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(server = %server, line = %line, "MCP server stderr");
                let mut buf = self.lines.lock();
                if buf.len() == STDERR_CAPACITY {
                    buf.pop_front();
                }
                buf.push_back(line);
            }
            self.finished
                .store(true, std::sync::atomic::Ordering::SeqCst);
            self.done.notify_waiters();
        })
    }

    async fn finished(&self) {
        let notified = self.done.notified();
        if self.finished.load(std::sync::atomic::Ordering::SeqCst) {
            return;
        }
        notified.await;
    }

    fn tail(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }
}
