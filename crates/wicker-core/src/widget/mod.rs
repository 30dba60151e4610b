//! Widget model.
//!
//! A *widget* is a loaded declarative artifact: an API, a flow, a model, a
//! store, … Every kind shares the same registration contract ([`Widget`]);
//! the concrete payload types live next to the subsystem that executes them
//! (flows and models here, scripts in `wicker-script`, plugins in
//! `wicker-plugin`, and so on).

mod flow;
mod model;
mod store;

pub use flow::{FlowDefinition, FlowNode, FlowWidget};
pub use model::{ModelDefinition, ModelWidget};
pub use store::{StoreDefinition, StoreWidget};

use std::any::Any;
use std::sync::Arc;

/// The closed set of widget kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WidgetKind {
    Api,
    Flow,
    Model,
    Plugin,
    Socket,
    WebSocket,
    Schedule,
    Task,
    Store,
    Script,
    Crypt,
}

impl WidgetKind {
    /// Every kind, in registry iteration order.
    pub const ALL: [WidgetKind; 11] = [
        WidgetKind::Api,
        WidgetKind::Flow,
        WidgetKind::Model,
        WidgetKind::Plugin,
        WidgetKind::Socket,
        WidgetKind::WebSocket,
        WidgetKind::Schedule,
        WidgetKind::Task,
        WidgetKind::Store,
        WidgetKind::Script,
        WidgetKind::Crypt,
    ];

    /// Lowercase name used in logs and error messages.
    pub fn name(self) -> &'static str {
        match self {
            WidgetKind::Api => "api",
            WidgetKind::Flow => "flow",
            WidgetKind::Model => "model",
            WidgetKind::Plugin => "plugin",
            WidgetKind::Socket => "socket",
            WidgetKind::WebSocket => "websocket",
            WidgetKind::Schedule => "schedule",
            WidgetKind::Task => "task",
            WidgetKind::Store => "store",
            WidgetKind::Script => "script",
            WidgetKind::Crypt => "crypt",
        }
    }

    /// Maps a dotted-name type segment (`models`, `flows`, …) to the widget
    /// kind backing it. `None` for non-registry types (`fs`, `http`, `ssl`,
    /// user-registered groups).
    pub fn from_process_type(kind: &str) -> Option<WidgetKind> {
        match kind {
            "models" => Some(WidgetKind::Model),
            "flows" => Some(WidgetKind::Flow),
            "plugins" => Some(WidgetKind::Plugin),
            "stores" => Some(WidgetKind::Store),
            "scripts" => Some(WidgetKind::Script),
            "tasks" => Some(WidgetKind::Task),
            "schedules" => Some(WidgetKind::Schedule),
            "websocket" => Some(WidgetKind::WebSocket),
            _ => None,
        }
    }
}

impl std::fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The registration contract shared by every widget kind.
///
/// Ids are matched case-insensitively by the registry; `id()` returns the
/// original casing for diagnostics. `source()` is the locator the widget was
/// loaded from (`file://…` or the inline document itself) so it can be
/// reloaded.
pub trait Widget: Send + Sync + 'static {
    fn kind(&self) -> WidgetKind;

    fn id(&self) -> &str;

    fn source(&self) -> &str;

    /// Downcast support; implementations return `self`.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Shared handle to a registered widget.
pub type SharedWidget = Arc<dyn Widget>;
