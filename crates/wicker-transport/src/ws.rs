//! WebSocket endpoints.
//!
//! Each WebSocket widget owns a hub tracking its live connections. Inbound
//! frames are passed verbatim to the configured process (text as a string,
//! binary as a byte array); the return value decides the reply frame type.
//! `websocket.<name>.broadcast` fans a message out to every connection;
//! delivery order per connection matches enqueue order.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Path as AxumPath, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use wicker_core::kernel::handler;
use wicker_core::{
    HandlerGroup, Kernel, Process, ProcessError, ProcessResult, RequestContext, Widget, WidgetKind,
};

/// Read/write channel capacities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsBuffer {
    #[serde(default = "default_buffer")]
    pub read: usize,
    #[serde(default = "default_buffer")]
    pub write: usize,
}

fn default_buffer() -> usize {
    256
}

impl Default for WsBuffer {
    fn default() -> Self {
        Self {
            read: default_buffer(),
            write: default_buffer(),
        }
    }
}

/// Frame limits; only `max_message` is enforceable with the axum upgrader,
/// the wait values are kept for widget compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WsLimit {
    #[serde(rename = "writeWait", default)]
    pub write_wait: u64,
    #[serde(rename = "pongWait", default)]
    pub pong_wait: u64,
    #[serde(rename = "maxMessage", default)]
    pub max_message: usize,
}

/// A declarative WebSocket document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSocketDefinition {
    pub name: String,
    #[serde(default)]
    pub protocols: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default)]
    pub buffer: WsBuffer,
    #[serde(default)]
    pub limit: WsLimit,
    #[serde(default)]
    pub timeout: u64,
    /// Process invoked per inbound frame.
    pub process: String,
}

/// Live-connection fan-out state.
pub struct Hub {
    connections: parking_lot::RwLock<HashMap<u64, mpsc::Sender<Message>>>,
    next_id: AtomicU64,
    cancel: CancellationToken,
}

impl Hub {
    fn new() -> Self {
        Self {
            connections: parking_lot::RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    fn register(&self, sender: mpsc::Sender<Message>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.connections.write().insert(id, sender);
        id
    }

    fn unregister(&self, id: u64) {
        self.connections.write().remove(&id);
    }

    /// Queues `message` on every live connection; returns the fan-out count.
    pub async fn broadcast(&self, message: Message) -> usize {
        let senders: Vec<_> = self.connections.read().values().cloned().collect();
        let mut delivered = 0;
        for sender in senders {
            if sender.send(message.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Stops every connection loop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

/// A loaded WebSocket endpoint.
pub struct WebSocketWidget {
    id: String,
    source: String,
    pub definition: WebSocketDefinition,
    pub hub: Hub,
}

impl WebSocketWidget {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        definition: WebSocketDefinition,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            definition,
            hub: Hub::new(),
        }
    }
}

impl Widget for WebSocketWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::WebSocket
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

/// Mounts `<root>/websocket/{name}` for every loaded WebSocket widget.
pub fn mount(router: Router, kernel: &Arc<Kernel>, root: &str) -> Router {
    if kernel.registry().list(WidgetKind::WebSocket).is_empty() {
        return router;
    }
    let kernel = Arc::clone(kernel);
    let route = {
        let root = root.trim_matches('/');
        if root.is_empty() {
            "/websocket/{name}".to_string()
        } else {
            format!("/{root}/websocket/{{name}}")
        }
    };
    info!(route = %route, "Mounting WebSocket upgrader");
    router.route(
        &route,
        any(move |AxumPath(name): AxumPath<String>, request: Request| {
            let kernel = Arc::clone(&kernel);
            async move { upgrade(kernel, name, request).await }
        }),
    )
}

async fn upgrade(kernel: Arc<Kernel>, name: String, request: Request) -> Response {
    let widget: Arc<WebSocketWidget> =
        match kernel.registry().select_as(WidgetKind::WebSocket, &name) {
            Ok(widget) => widget,
            Err(err) => return crate::http::server::error_response(&err),
        };

    // Guard processes run during the upgrade and may reject it.
    if let Some(guard) = widget.definition.guard.clone() {
        let args = vec![json!({ "name": name, "path": request.uri().path() })];
        let result = match kernel.process(&guard, args) {
            Ok(process) => process.exec().await,
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(widget = %name, error = %err.message, "WebSocket guard rejected upgrade");
            return crate::http::server::error_response(&err);
        }
    }

    let (mut parts, body) = request.into_parts();
    let upgrader = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrader) => upgrader,
        Err(reject) => return reject.into_response(),
    };
    let mut upgrader = upgrader;
    if widget.definition.limit.max_message > 0 {
        upgrader = upgrader.max_message_size(widget.definition.limit.max_message);
    }
    if !widget.definition.protocols.is_empty() {
        upgrader = upgrader.protocols(widget.definition.protocols.clone());
    }
    drop(body);
    upgrader.on_upgrade(move |socket| serve_connection(kernel, widget, socket))
}

async fn serve_connection(kernel: Arc<Kernel>, widget: Arc<WebSocketWidget>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let (sender, mut receiver) = mpsc::channel::<Message>(widget.definition.buffer.write.max(1));
    let connection_id = widget.hub.register(sender);
    let cancel = widget.hub.cancel.clone();
    info!(widget = %widget.id(), connection = connection_id, "WebSocket connected");

    // Writer side: broadcast and reply frames funnel through one queue, so
    // per-connection delivery order matches enqueue order.
    let write_task = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            _ = cancel.cancelled() => break,
        };
        let Some(Ok(message)) = message else { break };
        let data = match message {
            Message::Text(text) => Value::from(text.as_str()),
            Message::Binary(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
            Message::Close(_) => break,
            _ => continue,
        };

        let reply = match kernel.process(
            &widget.definition.process,
            vec![data, Value::from(connection_id)],
        ) {
            Ok(process) => process.with_context(RequestContext::new()).exec().await,
            Err(err) => Err(err),
        };
        let frame = match reply {
            Ok(value) => value_to_frame(value),
            Err(err) => {
                debug!(widget = %widget.id(), error = %err.message, "WebSocket handler failed");
                Some(Message::Text(err.to_response_value().to_string().into()))
            }
        };
        if let Some(frame) = frame {
            let send = {
                let senders = widget.hub.connections.read();
                senders.get(&connection_id).cloned()
            };
            match send {
                Some(sender) => {
                    if sender.send(frame).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
        }
    }

    widget.hub.unregister(connection_id);
    write_task.abort();
    info!(widget = %widget.id(), connection = connection_id, "WebSocket disconnected");
}

/// The handler's return type decides the frame type: strings go out as text,
/// byte arrays as binary, null suppresses the reply, anything else as JSON.
fn value_to_frame(value: Value) -> Option<Message> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(Message::Text(text.into())),
        Value::Array(items) if items.iter().all(|v| v.as_u64().is_some_and(|n| n < 256)) => {
            let bytes: Vec<u8> = items
                .iter()
                .filter_map(|v| v.as_u64().map(|n| n as u8))
                .collect();
            Some(Message::Binary(bytes.into()))
        }
        other => Some(Message::Text(other.to_string().into())),
    }
}

/// Installs the `websocket` handler group (`websocket.<name>.broadcast`).
pub fn install(kernel: &Arc<Kernel>) {
    let group = HandlerGroup::new().with("broadcast", handler(broadcast_exec));
    kernel.register_group("websocket", group);
}

async fn broadcast_exec(p: Process) -> ProcessResult<Value> {
    let widget: Arc<WebSocketWidget> = p
        .kernel()
        .registry()
        .select_as(WidgetKind::WebSocket, p.class())?;
    let message = match p.arg_value(0)? {
        Value::String(text) => Message::Text(text.into()),
        other => Message::Text(other.to_string().into()),
    };
    let delivered = widget.hub.broadcast(message).await;
    Ok(Value::from(delivered as u64))
}

/// Stops every hub; called by the orchestrator at shutdown.
pub fn shutdown_all(kernel: &Arc<Kernel>) {
    for widget in kernel.registry().widgets(WidgetKind::WebSocket) {
        if let Ok(ws) = widget.as_any().downcast::<WebSocketWidget>() {
            ws.hub.shutdown();
        }
    }
}
