//! Script loading, compilation, and invocation.
//!
//! A script compiles once at load time to a shared AST; exported functions
//! are enumerated (name, arity, line) for dispatch-time validation. Any
//! pooled engine can run any compiled script.
//!
//! Two trust tiers exist: scripts loaded via [`ScriptRuntime::load`] run
//! sandboxed (their `Process` intrinsic may only reach non-root handlers);
//! scripts loaded via [`ScriptRuntime::root_load`] additionally get the
//! `Studio` intrinsic and must be entered through
//! [`ScriptRuntime::root_call`].

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use wicker_core::kernel::handler;
use wicker_core::{
    HandlerGroup, Kernel, Process, ProcessError, ProcessResult, RequestContext, Widget, WidgetKind,
};

use crate::bridge::{self, CallContext};
use crate::pool::EnginePool;

/// Default engine-pool capacity. Recursive `Process("scripts.…")` calls hold
/// one engine per nesting level, so the pool must be deeper than any
/// realistic script recursion.
pub const DEFAULT_POOL_CAPACITY: usize = 8;

/// Metadata of one exported script function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFunction {
    /// Declared parameter count.
    pub num_args: usize,
    /// 1-based source line of the declaration (0 when unknown).
    pub line: usize,
}

/// A loaded, compiled script.
pub struct ScriptWidget {
    id: String,
    source: String,
    pub functions: HashMap<String, ScriptFunction>,
    pub ast: rhai::AST,
    /// Loaded through the privileged path.
    pub root: bool,
}

impl Widget for ScriptWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Script
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

/// The pooled script runtime.
pub struct ScriptRuntime {
    pool: Arc<EnginePool>,
}

impl ScriptRuntime {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            pool: EnginePool::new(capacity, build_engine),
        })
    }

    /// Compiles and registers a sandboxed script.
    pub fn load(
        &self,
        kernel: &Arc<Kernel>,
        name: &str,
        locator: &str,
        source: &str,
    ) -> ProcessResult<Arc<ScriptWidget>> {
        self.load_tier(kernel, name, locator, source, false)
    }

    /// Compiles and registers a privileged script.
    pub fn root_load(
        &self,
        kernel: &Arc<Kernel>,
        name: &str,
        locator: &str,
        source: &str,
    ) -> ProcessResult<Arc<ScriptWidget>> {
        self.load_tier(kernel, name, locator, source, true)
    }

    fn load_tier(
        &self,
        kernel: &Arc<Kernel>,
        name: &str,
        locator: &str,
        source: &str,
        root: bool,
    ) -> ProcessResult<Arc<ScriptWidget>> {
        let widget = Arc::new(compile(name, locator, source, root)?);
        info!(
            script = %name,
            functions = widget.functions.len(),
            root,
            "Loaded script"
        );
        kernel.registry().register(widget.clone());
        Ok(widget)
    }

    /// Starts a sandboxed invocation of `script.method`.
    pub fn call(self: &Arc<Self>, script: Arc<ScriptWidget>, method: &str) -> ScriptCall {
        ScriptCall {
            runtime: Arc::clone(self),
            script,
            method: method.to_lowercase(),
            context: RequestContext::new(),
            cancel: CancellationToken::new(),
            root: false,
        }
    }

    /// Starts a privileged invocation; required to enter a root script.
    pub fn root_call(self: &Arc<Self>, script: Arc<ScriptWidget>, method: &str) -> ScriptCall {
        let mut call = self.call(script, method);
        call.root = true;
        call
    }
}

/// A prepared script invocation.
pub struct ScriptCall {
    runtime: Arc<ScriptRuntime>,
    script: Arc<ScriptWidget>,
    method: String,
    context: RequestContext,
    cancel: CancellationToken,
    root: bool,
}

impl ScriptCall {
    pub fn with_sid(self, sid: impl Into<String>) -> Self {
        self.context.adopt_sid(&sid.into());
        self
    }

    pub fn with_global(mut self, global: serde_json::Map<String, Value>) -> Self {
        self.context = self.context.extend_global(global);
        self
    }

    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the function on a pooled engine and returns its exported value.
    pub async fn call(self, kernel: Arc<Kernel>, args: Vec<Value>) -> ProcessResult<Value> {
        let Some(function) = self.script.functions.get(&self.method) else {
            return Err(ProcessError::not_found(format!(
                "script '{}' has no function '{}'",
                self.script.id(),
                self.method
            )));
        };
        if args.len() < function.num_args {
            return Err(ProcessError::argument(format!(
                "script '{}' function '{}' takes {} arguments, got {}",
                self.script.id(),
                self.method,
                function.num_args,
                args.len()
            )));
        }
        if self.script.root && !self.root {
            return Err(ProcessError::not_found(format!(
                "script '{}' is root-only and requires a root call",
                self.script.id()
            ))
            .with_code(403));
        }
        if self.cancel.is_cancelled() {
            return Err(ProcessError::cancelled("script call cancelled"));
        }

        let pooled = self.runtime.pool.acquire().await?;
        let ctx = CallContext {
            kernel,
            context: self.context.clone(),
            cancel: self.cancel.clone(),
            root: self.root,
            handle: tokio::runtime::Handle::current(),
        };
        let script = Arc::clone(&self.script);
        let method = self.method.clone();
        let sid = self.context.sid();
        let global = self.context.global_value();

        debug!(script = %script.id(), function = %method, "Calling script function");
        tokio::task::spawn_blocking(move || {
            bridge::with_call_context(ctx, || {
                let engine = pooled.engine();
                let mut scope = Scope::new();
                scope.push_constant("__sid", sid);
                let global = to_dynamic(&global)
                    .map_err(|e| ProcessError::script(format!("global bind: {e}")))?;
                scope.push_constant_dynamic("__global", global);
                let args = args
                    .iter()
                    .map(to_dynamic)
                    .collect::<Result<Vec<Dynamic>, _>>()
                    .map_err(|e| ProcessError::script(format!("argument bind: {e}")))?;
                let out = engine
                    .call_fn::<Dynamic>(&mut scope, &script.ast, &method, args)
                    .map_err(|e| bridge::decode_error(&e))?;
                from_dynamic::<Value>(&out)
                    .map_err(|e| ProcessError::script(format!("result bind: {e}")))
            })
        })
        .await
        .map_err(|e| ProcessError::script(format!("script task failed: {e}")))?
    }
}

/// Compiles a script source and enumerates its functions.
fn compile(name: &str, locator: &str, source: &str, root: bool) -> ProcessResult<ScriptWidget> {
    let engine = Engine::new();
    let ast = engine
        .compile(source)
        .map_err(|e| ProcessError::script(format!("script '{name}' failed to compile: {e}")))?;

    let mut functions = HashMap::new();
    for meta in ast.iter_functions() {
        functions.insert(
            meta.name.to_lowercase(),
            ScriptFunction {
                num_args: meta.params.len(),
                line: function_line(source, meta.name),
            },
        );
    }

    Ok(ScriptWidget {
        id: name.to_string(),
        source: locator.to_string(),
        functions,
        ast,
        root,
    })
}

/// Finds the 1-based declaration line of `fn name(` in the source.
fn function_line(source: &str, name: &str) -> usize {
    for (idx, line) in source.lines().enumerate() {
        let trimmed = line.trim_start();
        let rest = trimmed
            .strip_prefix("private fn ")
            .or_else(|| trimmed.strip_prefix("fn "));
        if let Some(rest) = rest {
            let rest = rest.trim_start();
            if rest.starts_with(name) && rest[name.len()..].trim_start().starts_with('(') {
                return idx + 1;
            }
        }
    }
    0
}

/// Builds a pool engine: safety limits, log sinks, intrinsics, cancellation.
fn build_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_max_expr_depths(64, 64);
    engine.set_max_operations(50_000_000);
    engine.set_max_string_size(1_000_000);
    engine.set_max_array_size(10_000);
    engine.set_max_map_size(10_000);

    engine.on_print(|text| info!(target: "wicker::script", "{text}"));
    engine.on_debug(|text, source, pos| {
        debug!(target: "wicker::script", source = source.unwrap_or(""), line = pos.line().unwrap_or(0), "{text}");
    });
    engine.on_progress(|_ops| {
        bridge::current_cancelled().then(|| Dynamic::from("cancelled"))
    });

    bridge::register_intrinsics(&mut engine);
    engine
}

/// Installs the `scripts` handler group: `scripts.<name>.<function>` invokes
/// the compiled function with the caller's context forwarded.
pub fn install(kernel: &Arc<Kernel>, scripts: &Arc<ScriptRuntime>) {
    let scripts = Arc::clone(scripts);
    let group = HandlerGroup::new().with_wildcard(handler(move |p: Process| {
        let scripts = Arc::clone(&scripts);
        async move {
            let widget: Arc<ScriptWidget> = p
                .kernel()
                .registry()
                .select_as(WidgetKind::Script, p.class())?;
            let kernel = Arc::clone(p.kernel());
            let method = p.method().to_string();
            let context = p.context().clone();
            let cancel = p.cancel_token().clone();
            scripts
                .call(widget, &method)
                .with_context(context)
                .with_cancel(cancel)
                .call(kernel, p.into_args())
                .await
        }
    }));
    kernel.register_group("scripts", group);
}
