//! The process dispatch kernel.
//!
//! A [`Kernel`] owns every dispatch table: the widget [`Registry`], the
//! handler groups keyed by type segment, full-name custom handlers, template
//! helpers, and the query-executor slot. It is threaded explicitly into
//! handlers and servers; there is no module-scope state.
//!
//! # Name resolution
//!
//! `type.class.method` (≥ 3 segments, case-insensitive):
//!
//! 1. A full-name custom handler wins outright (this is also the only way a
//!    two-segment helper name like `utils.Now` resolves).
//! 2. `flows.<name>`: everything after the type segment is the flow id.
//! 3. Otherwise the first segment selects a handler group, the last segment a
//!    method in it (or the group's wildcard), and the middle segments join
//!    into the class. Registry-backed types require the class widget to be
//!    loaded at construction time.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::binding::{self, BindScope, HelperFn};
use crate::context::RequestContext;
use crate::error::{ProcessError, ProcessResult};
use crate::process::Process;
use crate::query::SharedQueryExecutor;
use crate::registry::Registry;
use crate::widget::WidgetKind;

/// Boxed handler future.
pub type HandlerFuture = BoxFuture<'static, ProcessResult<Value>>;

/// The typed handler signature every process resolves to.
pub type HandlerFn = Arc<dyn Fn(Process) -> HandlerFuture + Send + Sync>;

/// Wraps an async fn into a [`HandlerFn`].
pub fn handler<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Process) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProcessResult<Value>> + Send + 'static,
{
    Arc::new(move |process| Box::pin(f(process)))
}

/// A resolved handler plus its trust requirement.
#[derive(Clone)]
pub struct HandlerEntry {
    pub func: HandlerFn,
    /// Restricted to root callers (root scripts, embedder code).
    pub root_only: bool,
}

impl HandlerEntry {
    pub fn new(func: HandlerFn) -> Self {
        Self {
            func,
            root_only: false,
        }
    }

    pub fn root(func: HandlerFn) -> Self {
        Self {
            func,
            root_only: true,
        }
    }
}

/// A named table of `method → handler` registered under a type segment.
#[derive(Default)]
pub struct HandlerGroup {
    handlers: HashMap<String, HandlerEntry>,
    /// Fallback used when the method has no table entry (`scripts`,
    /// `plugins`); `None` makes unknown methods a hard miss.
    wildcard: Option<HandlerEntry>,
}

impl HandlerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method handler (method names are matched lowercased).
    pub fn with(mut self, method: &str, func: HandlerFn) -> Self {
        self.handlers
            .insert(method.to_lowercase(), HandlerEntry::new(func));
        self
    }

    /// Adds a root-only method handler.
    pub fn with_root(mut self, method: &str, func: HandlerFn) -> Self {
        self.handlers
            .insert(method.to_lowercase(), HandlerEntry::root(func));
        self
    }

    /// Sets the wildcard fallback handler.
    pub fn with_wildcard(mut self, func: HandlerFn) -> Self {
        self.wildcard = Some(HandlerEntry::new(func));
        self
    }

    fn resolve(&self, method: &str) -> Option<HandlerEntry> {
        self.handlers
            .get(method)
            .or(self.wildcard.as_ref())
            .cloned()
    }
}

/// The dispatch kernel: registry plus every handler table.
pub struct Kernel {
    registry: Registry,
    groups: RwLock<HashMap<String, Arc<HandlerGroup>>>,
    customs: RwLock<HashMap<String, HandlerEntry>>,
    helpers: RwLock<HashMap<String, HelperFn>>,
    query: RwLock<Option<SharedQueryExecutor>>,
}

impl Kernel {
    /// Creates a kernel with the built-in `models`, `stores`, and `flows`
    /// groups installed. Transport, script, schedule, task, fs, and plugin
    /// groups are installed by their own crates.
    pub fn new() -> Arc<Self> {
        let kernel = Arc::new(Self {
            registry: Registry::new(),
            groups: RwLock::new(HashMap::new()),
            customs: RwLock::new(HashMap::new()),
            helpers: RwLock::new(HashMap::new()),
            query: RwLock::new(None),
        });
        crate::groups::install(&kernel);
        crate::flow::install(&kernel);
        kernel
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    // ── table registration ───────────────────────────────────────────────

    /// Registers (or replaces) a handler group under a type segment.
    pub fn register_group(&self, kind: &str, group: HandlerGroup) {
        debug!(group = %kind, "Registered handler group");
        self.groups
            .write()
            .insert(kind.to_lowercase(), Arc::new(group));
    }

    /// True when a handler group is registered for `kind`.
    pub fn has_group(&self, kind: &str) -> bool {
        self.groups.read().contains_key(&kind.to_lowercase())
    }

    /// Registers a full-name custom handler; overrides group handlers.
    pub fn register_handler(&self, name: &str, func: HandlerFn) {
        self.customs
            .write()
            .insert(name.to_lowercase(), HandlerEntry::new(func));
    }

    /// Registers a root-only full-name handler.
    pub fn register_root_handler(&self, name: &str, func: HandlerFn) {
        self.customs
            .write()
            .insert(name.to_lowercase(), HandlerEntry::root(func));
    }

    /// Registers a template helper usable as `{{ name(args…) }}`.
    pub fn register_helper(&self, name: &str, func: HelperFn) {
        self.helpers.write().insert(name.to_lowercase(), func);
    }

    /// Sets the data-model collaborator.
    pub fn set_query_executor(&self, executor: SharedQueryExecutor) {
        *self.query.write() = Some(executor);
    }

    /// Returns the configured query executor.
    pub fn query_executor(&self) -> ProcessResult<SharedQueryExecutor> {
        self.query
            .read()
            .clone()
            .ok_or_else(|| ProcessError::internal("no query executor is configured"))
    }

    /// Binds templates in `value` with this kernel's helper table.
    pub fn bind(&self, value: &Value, scope: &BindScope) -> Value {
        let helpers = self.helpers.read().clone();
        binding::bind_with(value, scope, &helpers)
    }

    // ── process construction ─────────────────────────────────────────────

    /// Constructs a [`Process`] from a dotted name, binding its handler.
    ///
    /// Fails fast: a malformed name is [`BadProcessName`], an unknown
    /// type/method is [`HandlerNotFound`], and a registry miss for a
    /// registry-backed type is [`NotLoaded`]. A constructed process never
    /// carries an unbound handler.
    ///
    /// [`BadProcessName`]: crate::error::ErrorKind::BadProcessName
    /// [`HandlerNotFound`]: crate::error::ErrorKind::HandlerNotFound
    /// [`NotLoaded`]: crate::error::ErrorKind::NotLoaded
    pub fn process(self: &Arc<Self>, name: &str, args: Vec<Value>) -> ProcessResult<Process> {
        let lower = name.to_lowercase();
        if lower.is_empty() || lower.split('.').any(|s| s.is_empty()) {
            return Err(ProcessError::bad_name(format!(
                "'{name}' is not a valid process name"
            )));
        }
        let segments: Vec<&str> = lower.split('.').collect();

        // Full-name custom handlers override everything else.
        if let Some(entry) = self.customs.read().get(&lower).cloned() {
            let (class, method) = if segments.len() >= 3 {
                (
                    segments[1..segments.len() - 1].join("."),
                    segments[segments.len() - 1].to_string(),
                )
            } else {
                (
                    String::new(),
                    segments.last().copied().unwrap_or("").to_string(),
                )
            };
            return Ok(self.build(name, segments[0], class, method, args, entry));
        }

        if segments.len() < 2 {
            return Err(ProcessError::bad_name(format!(
                "'{name}' is not a valid process name"
            )));
        }
        let kind = segments[0].to_string();

        // `flows.<name>`: the flow id is everything after the type segment.
        if kind == "flows" {
            let flow_id = segments[1..].join(".");
            if !self.registry.contains(WidgetKind::Flow, &flow_id) {
                return Err(ProcessError::not_loaded(format!(
                    "flow '{flow_id}' is not loaded"
                )));
            }
            let entry = self
                .groups
                .read()
                .get("flows")
                .and_then(|g| g.resolve(""))
                .ok_or_else(|| ProcessError::not_found("the flow group is not installed"))?;
            return Ok(self.build(name, &kind, flow_id, String::new(), args, entry));
        }

        if segments.len() < 3 {
            return Err(ProcessError::bad_name(format!(
                "'{name}' needs at least 3 segments (type.class.method)"
            )));
        }
        let method = segments[segments.len() - 1].to_string();
        let class = segments[1..segments.len() - 1].join(".");

        // Registry-backed types fail fast when the class widget is absent.
        if let Some(widget_kind) = WidgetKind::from_process_type(&kind)
            && !self.registry.contains(widget_kind, &class)
        {
            return Err(ProcessError::not_loaded(format!(
                "{widget_kind} '{class}' is not loaded"
            )));
        }

        let entry = self
            .groups
            .read()
            .get(&kind)
            .and_then(|group| group.resolve(&method))
            .ok_or_else(|| {
                ProcessError::not_found(format!("no handler for '{kind}.*.{method}'"))
            })?;
        Ok(self.build(name, &kind, class, method, args, entry))
    }

    fn build(
        self: &Arc<Self>,
        name: &str,
        kind: &str,
        class: String,
        method: String,
        args: Vec<Value>,
        handler: HandlerEntry,
    ) -> Process {
        Process {
            name: name.to_string(),
            kind: kind.to_string(),
            class,
            method,
            args,
            context: RequestContext::new(),
            cancel: CancellationToken::new(),
            kernel: Arc::clone(self),
            handler,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::widget::{FlowDefinition, FlowWidget, ModelDefinition, ModelWidget};
    use serde_json::{Value, json};

    fn kernel_with_model(id: &str) -> Arc<Kernel> {
        let kernel = Kernel::new();
        kernel.registry().register(Arc::new(ModelWidget::new(
            id,
            "inline",
            ModelDefinition::default(),
        )));
        kernel
    }

    #[test]
    fn test_dotted_class_resolution() {
        let kernel = kernel_with_model("a.b");
        let process = kernel.process("models.a.b.find", vec![]).unwrap();
        assert_eq!(process.class(), "a.b");
        assert_eq!(process.method(), "find");
    }

    #[test]
    fn test_short_name_is_bad_process_name() {
        let kernel = kernel_with_model("user");
        let err = kernel.process("models.find", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadProcessName);
    }

    #[test]
    fn test_missing_widget_is_not_loaded() {
        let kernel = Kernel::new();
        let err = kernel.process("models.ghost.find", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotLoaded);
    }

    #[test]
    fn test_unknown_group_is_handler_not_found() {
        let kernel = Kernel::new();
        let err = kernel.process("nothing.x.y", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::HandlerNotFound);
    }

    #[test]
    fn test_unknown_method_is_handler_not_found() {
        let kernel = kernel_with_model("user");
        let err = kernel.process("models.user.explode", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::HandlerNotFound);
    }

    #[test]
    fn test_dispatch_is_case_insensitive() {
        let kernel = kernel_with_model("User");
        let process = kernel.process("Models.User.Find", vec![]).unwrap();
        assert_eq!(process.name(), "Models.User.Find");
        assert_eq!(process.method(), "find");
    }

    #[test]
    fn test_custom_handler_two_segments() {
        let kernel = Kernel::new();
        kernel.register_handler(
            "utils.now",
            handler(|_p| async { Ok(json!("2026-08-01T00:00:00Z")) }),
        );
        let process = kernel.process("utils.Now", vec![]).unwrap();
        assert_eq!(process.type_name(), "utils");
        assert_eq!(process.method(), "now");
    }

    #[tokio::test]
    async fn test_custom_handler_overrides_group() {
        let kernel = kernel_with_model("user");
        kernel.register_handler("models.user.find", handler(|_p| async { Ok(json!("custom")) }));
        let result = kernel
            .process("models.user.Find", vec![])
            .unwrap()
            .exec()
            .await
            .unwrap();
        assert_eq!(result, json!("custom"));
    }

    #[test]
    fn test_flow_two_segment_name_resolves() {
        let kernel = Kernel::new();
        kernel.registry().register(Arc::new(FlowWidget::new(
            "stat",
            "inline",
            FlowDefinition::default(),
        )));
        let process = kernel.process("flows.stat", vec![]).unwrap();
        assert_eq!(process.class(), "stat");
    }

    #[test]
    fn test_flow_missing_is_not_loaded() {
        let kernel = Kernel::new();
        let err = kernel.process("flows.ghost", vec![]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotLoaded);
    }

    #[tokio::test]
    async fn test_context_travels_into_handler() {
        let kernel = Kernel::new();
        kernel.register_handler(
            "utils.ctx.echo",
            handler(|p: Process| async move {
                Ok(json!({
                    "sid": p.context().sid(),
                    "k": p.context().global().get("k").cloned().unwrap_or(Value::Null),
                }))
            }),
        );
        let mut global = serde_json::Map::new();
        global.insert("k".into(), json!("v"));
        let result = kernel
            .process("utils.ctx.echo", vec![])
            .unwrap()
            .with_sid("S")
            .with_global(global)
            .exec()
            .await
            .unwrap();
        assert_eq!(result, json!({"sid": "S", "k": "v"}));
    }

    #[tokio::test]
    async fn test_cancelled_before_execution() {
        let kernel = Kernel::new();
        kernel.register_handler("utils.slow.run", handler(|_p| async { Ok(Value::Null) }));
        let token = CancellationToken::new();
        token.cancel();
        let err = kernel
            .process("utils.slow.run", vec![])
            .unwrap()
            .with_cancel(token)
            .exec()
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_argument_helpers() {
        let kernel = kernel_with_model("user");
        let process = kernel
            .process(
                "models.user.find",
                vec![json!(1), json!({"select": ["id", "name"]})],
            )
            .unwrap();
        assert_eq!(process.arg_int(0).unwrap(), 1);
        let param = process.arg_query_param(1).unwrap();
        assert_eq!(param.select, vec!["id", "name"]);
        let err = process.arg_string(2).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Argument);
    }
}
