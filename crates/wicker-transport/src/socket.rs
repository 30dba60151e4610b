//! Raw TCP socket widgets.
//!
//! A socket widget either listens (`mode: server`) or dials out
//! (`mode: client`). Data is length-free: each read of up to `bufferSize`
//! bytes invokes the `event.data` process and any non-null return is written
//! back. `keepAlive` steers the connection lifecycle: `-1` closes after one
//! exchange, `0` keeps the link (and, for clients, redials indefinitely),
//! `> 0` is a client reconnect budget with `attemptAfter` between tries.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wicker_core::{Kernel, ProcessError, ProcessResult, Widget, WidgetKind};

/// Event → process bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SocketEvents {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connected: Option<String>,
}

/// A declarative socket document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketDefinition {
    pub name: String,
    /// `server` or `client`.
    #[serde(default = "default_mode")]
    pub mode: String,
    /// Only `tcp` is supported.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: String,
    #[serde(rename = "bufferSize", default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(rename = "keepAlive", default)]
    pub keep_alive: i64,
    /// Dial timeout in seconds (client mode); 0 means 5s.
    #[serde(default)]
    pub timeout: u64,
    /// Dial attempts per connection (client mode); 0 means 1.
    #[serde(default)]
    pub attempts: u32,
    /// Delay between attempts/reconnects, in milliseconds.
    #[serde(rename = "attemptAfter", default = "default_attempt_after")]
    pub attempt_after: u64,
    #[serde(default)]
    pub event: SocketEvents,
}

fn default_mode() -> String {
    "server".to_string()
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_buffer_size() -> usize {
    4096
}

fn default_attempt_after() -> u64 {
    1000
}

impl SocketDefinition {
    fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn dial_timeout(&self) -> Duration {
        Duration::from_secs(if self.timeout == 0 { 5 } else { self.timeout })
    }
}

/// A loaded socket endpoint.
pub struct SocketWidget {
    id: String,
    source: String,
    pub definition: SocketDefinition,
    running: Mutex<Option<CancellationToken>>,
}

impl SocketWidget {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        definition: SocketDefinition,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            definition,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Stops the socket loop; returns `false` when it was not running.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

impl Widget for SocketWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Socket
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Starts a socket widget's accept/dial loop. Returns `false` when it is
/// already running.
pub async fn start(kernel: &Arc<Kernel>, widget: &Arc<SocketWidget>) -> ProcessResult<bool> {
    if widget.definition.protocol != "tcp" {
        return Err(ProcessError::load(format!(
            "socket '{}' protocol '{}' is not supported",
            widget.id(),
            widget.definition.protocol
        )));
    }
    let token = {
        let mut running = widget.running.lock();
        if running.is_some() {
            return Ok(false);
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());
        token
    };

    match widget.definition.mode.as_str() {
        "server" => {
            let listener = TcpListener::bind(widget.definition.addr()).await.map_err(|e| {
                widget.stop();
                ProcessError::internal(format!(
                    "socket '{}' bind {} failed: {e}",
                    widget.id(),
                    widget.definition.addr()
                ))
            })?;
            info!(socket = %widget.id(), addr = %widget.definition.addr(), "Socket listening");
            let kernel = Arc::clone(kernel);
            let widget = Arc::clone(widget);
            tokio::spawn(async move { accept_loop(kernel, widget, listener, token).await });
        }
        "client" => {
            info!(socket = %widget.id(), addr = %widget.definition.addr(), "Socket dialing");
            let kernel = Arc::clone(kernel);
            let widget = Arc::clone(widget);
            tokio::spawn(async move { client_loop(kernel, widget, token).await });
        }
        other => {
            widget.stop();
            return Err(ProcessError::load(format!(
                "socket '{}' mode '{other}' is not supported",
                widget.id()
            )));
        }
    }
    Ok(true)
}

/// Starts every loaded socket widget.
pub async fn start_all(kernel: &Arc<Kernel>) -> ProcessResult<()> {
    for widget in kernel.registry().widgets(WidgetKind::Socket) {
        if let Ok(socket) = widget.as_any().downcast::<SocketWidget>() {
            start(kernel, &socket).await?;
        }
    }
    Ok(())
}

/// Stops every running socket widget.
pub fn stop_all(kernel: &Arc<Kernel>) {
    for widget in kernel.registry().widgets(WidgetKind::Socket) {
        if let Ok(socket) = widget.as_any().downcast::<SocketWidget>() {
            socket.stop();
        }
    }
}

async fn accept_loop(
    kernel: Arc<Kernel>,
    widget: Arc<SocketWidget>,
    listener: TcpListener,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = cancel.cancelled() => break,
        };
        match accepted {
            Ok((stream, addr)) => {
                debug!(socket = %widget.id(), remote = %addr, "Socket accepted");
                let kernel = Arc::clone(&kernel);
                let widget = Arc::clone(&widget);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    serve_stream(kernel, widget, stream, cancel).await;
                });
            }
            Err(err) => {
                error!(socket = %widget.id(), error = %err, "Socket accept failed");
                break;
            }
        }
    }
    info!(socket = %widget.id(), "Socket listener stopped");
}

async fn client_loop(kernel: Arc<Kernel>, widget: Arc<SocketWidget>, cancel: CancellationToken) {
    let keep_alive = widget.definition.keep_alive;
    let mut reconnects_left = keep_alive.max(0);
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match dial(&widget, &cancel).await {
            Some(stream) => {
                serve_stream(Arc::clone(&kernel), Arc::clone(&widget), stream, cancel.clone())
                    .await;
            }
            None => break,
        }
        // -1 closes after one exchange, 0 redials forever, >0 is a budget.
        if keep_alive < 0 {
            break;
        }
        if keep_alive > 0 {
            reconnects_left -= 1;
            if reconnects_left <= 0 {
                break;
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(widget.definition.attempt_after)) => {}
            _ = cancel.cancelled() => break,
        }
    }
    widget.stop();
    info!(socket = %widget.id(), "Socket client stopped");
}

async fn dial(widget: &Arc<SocketWidget>, cancel: &CancellationToken) -> Option<TcpStream> {
    let attempts = widget.definition.attempts.max(1);
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return None;
        }
        let connect = tokio::time::timeout(
            widget.definition.dial_timeout(),
            TcpStream::connect(widget.definition.addr()),
        );
        match connect.await {
            Ok(Ok(stream)) => return Some(stream),
            Ok(Err(err)) => {
                warn!(socket = %widget.id(), attempt, error = %err, "Socket dial failed");
            }
            Err(_) => {
                warn!(socket = %widget.id(), attempt, "Socket dial timed out");
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(widget.definition.attempt_after)) => {}
            _ = cancel.cancelled() => return None,
        }
    }
    None
}

async fn serve_stream(
    kernel: Arc<Kernel>,
    widget: Arc<SocketWidget>,
    mut stream: TcpStream,
    cancel: CancellationToken,
) {
    let info = connection_info(&widget, &stream);
    fire(&kernel, widget.definition.event.connected.as_deref(), vec![info.clone()]).await;

    let mut buffer = vec![0u8; widget.definition.buffer_size.max(1)];
    loop {
        let read = tokio::select! {
            read = stream.read(&mut buffer) => read,
            _ = cancel.cancelled() => break,
        };
        match read {
            Ok(0) => {
                fire(&kernel, widget.definition.event.closed.as_deref(), vec![info.clone()]).await;
                break;
            }
            Ok(n) => {
                let data = String::from_utf8_lossy(&buffer[..n]).into_owned();
                let reply = dispatch_data(&kernel, &widget, data, &info).await;
                match reply {
                    Ok(reply) => {
                        if let Some(bytes) = reply_bytes(reply)
                            && stream.write_all(&bytes).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(err) => {
                        fire(
                            &kernel,
                            widget.definition.event.error.as_deref(),
                            vec![Value::from(err.message.clone()), info.clone()],
                        )
                        .await;
                    }
                }
                if widget.definition.keep_alive < 0 {
                    // One exchange only.
                    fire(&kernel, widget.definition.event.closed.as_deref(), vec![info.clone()])
                        .await;
                    break;
                }
            }
            Err(err) => {
                fire(
                    &kernel,
                    widget.definition.event.error.as_deref(),
                    vec![Value::from(err.to_string()), info.clone()],
                )
                .await;
                break;
            }
        }
    }
}

async fn dispatch_data(
    kernel: &Arc<Kernel>,
    widget: &Arc<SocketWidget>,
    data: String,
    info: &Value,
) -> ProcessResult<Value> {
    let Some(process) = widget.definition.event.data.as_deref() else {
        return Ok(Value::Null);
    };
    kernel
        .process(process, vec![Value::from(data), info.clone()])?
        .exec()
        .await
}

/// Fires a lifecycle event process, logging instead of propagating failures.
async fn fire(kernel: &Arc<Kernel>, process: Option<&str>, args: Vec<Value>) {
    let Some(process) = process else { return };
    let result = match kernel.process(process, args) {
        Ok(process) => process.exec().await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        warn!(process = %process, error = %err.message, "Socket event process failed");
    }
}

fn connection_info(widget: &Arc<SocketWidget>, stream: &TcpStream) -> Value {
    json!({
        "name": widget.id(),
        "mode": widget.definition.mode,
        "remote": stream.peer_addr().map(|a| a.to_string()).unwrap_or_default(),
        "local": stream.local_addr().map(|a| a.to_string()).unwrap_or_default(),
    })
}

/// Handler returns become wire bytes: strings verbatim, byte arrays raw,
/// null writes nothing.
fn reply_bytes(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text.into_bytes()),
        Value::Array(items) if items.iter().all(|v| v.as_u64().is_some_and(|n| n < 256)) => Some(
            items
                .iter()
                .filter_map(|v| v.as_u64().map(|n| n as u8))
                .collect(),
        ),
        other => Some(other.to_string().into_bytes()),
    }
}
