//! The process invocation record.
//!
//! A [`Process`] is one invocation of a dotted-named operation
//! (`type.class.method`) with arguments and request context. It is created
//! per call by [`Kernel::process`](crate::kernel::Kernel::process), carries a
//! resolved handler, and is consumed by `exec`.

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use std::sync::Arc;

use crate::context::RequestContext;
use crate::error::{ProcessError, ProcessResult};
use crate::kernel::{HandlerEntry, Kernel};
use crate::types::QueryParam;

/// A single invocation of a dotted-named operation.
///
/// Mutable only by its own task; never shared across tasks. The original-case
/// name is preserved for diagnostics while dispatch is case-insensitive.
pub struct Process {
    pub(crate) name: String,
    pub(crate) kind: String,
    pub(crate) class: String,
    pub(crate) method: String,
    pub(crate) args: Vec<Value>,
    pub(crate) context: RequestContext,
    pub(crate) cancel: CancellationToken,
    pub(crate) kernel: Arc<Kernel>,
    pub(crate) handler: HandlerEntry,
}

impl Process {
    /// The full name as written by the caller.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The lowercased type segment (`models`, `flows`, `fs`, …).
    pub fn type_name(&self) -> &str {
        &self.kind
    }

    /// The lowercased class segment (widget id; may contain embedded dots).
    pub fn class(&self) -> &str {
        &self.class
    }

    /// The lowercased method segment.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn into_args(self) -> Vec<Value> {
        self.args
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// True when the resolved handler is restricted to root callers.
    pub fn root_only(&self) -> bool {
        self.handler.root_only
    }

    // ── request context ──────────────────────────────────────────────────

    /// Establishes the session id for this invocation.
    pub fn with_sid(self, sid: impl Into<String>) -> Self {
        self.context.adopt_sid(&sid.into());
        self
    }

    /// Extends the request globals; additions stay within this call tree.
    pub fn with_global(mut self, global: Map<String, Value>) -> Self {
        self.context = self.context.extend_global(global);
        self
    }

    /// Attaches an inherited request context (nested calls).
    pub fn with_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Attaches a cancellation token; checked before the handler runs.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    // ── invocation ───────────────────────────────────────────────────────

    /// Invokes the bound handler, returning its result.
    pub async fn exec(self) -> ProcessResult<Value> {
        if self.cancel.is_cancelled() {
            return Err(ProcessError::cancelled(format!(
                "process '{}' cancelled before execution",
                self.name
            )));
        }
        debug!(process = %self.name, args = self.args.len(), "Executing process");
        let entry = self.handler.clone();
        (entry.func)(self).await
    }

    /// [`exec`](Self::exec) with the failure logged at the call boundary.
    pub async fn run(self) -> ProcessResult<Value> {
        let name = self.name.clone();
        let result = self.exec().await;
        if let Err(err) = &result {
            error!(process = %name, code = err.code, error = %err.message, "Process failed");
        }
        result
    }

    // ── argument coercion ────────────────────────────────────────────────

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index).filter(|v| !v.is_null())
    }

    fn missing(&self, index: usize, expected: &str) -> ProcessError {
        ProcessError::argument(format!(
            "process '{}' requires a {expected} at argument {index}",
            self.name
        ))
    }

    fn mismatch(&self, index: usize, expected: &str, got: &Value) -> ProcessError {
        ProcessError::argument(format!(
            "process '{}' argument {index} must be a {expected}, got {got}",
            self.name
        ))
    }

    /// Required argument of any type.
    pub fn arg_value(&self, index: usize) -> ProcessResult<Value> {
        self.args
            .get(index)
            .cloned()
            .ok_or_else(|| self.missing(index, "value"))
    }

    /// Required string; numbers are stringified, other types fail.
    pub fn arg_string(&self, index: usize) -> ProcessResult<String> {
        match self.arg(index) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(self.mismatch(index, "string", other)),
            None => Err(self.missing(index, "string")),
        }
    }

    /// Optional string with a default.
    pub fn arg_string_or(&self, index: usize, default: &str) -> ProcessResult<String> {
        match self.arg(index) {
            None => Ok(default.to_string()),
            Some(_) => self.arg_string(index),
        }
    }

    /// Required integer; accepts numbers and numeric strings.
    pub fn arg_int(&self, index: usize) -> ProcessResult<i64> {
        match self.arg(index) {
            Some(Value::Number(n)) => n
                .as_i64()
                .ok_or_else(|| self.mismatch(index, "integer", &Value::Number(n.clone()))),
            Some(Value::String(s)) => s
                .parse()
                .map_err(|_| self.mismatch(index, "integer", &Value::String(s.clone()))),
            Some(other) => Err(self.mismatch(index, "integer", other)),
            None => Err(self.missing(index, "integer")),
        }
    }

    /// Optional integer with a default.
    pub fn arg_int_or(&self, index: usize, default: i64) -> ProcessResult<i64> {
        match self.arg(index) {
            None => Ok(default),
            Some(_) => self.arg_int(index),
        }
    }

    /// Optional unsigned integer with a default.
    pub fn arg_u64_or(&self, index: usize, default: u64) -> ProcessResult<u64> {
        let value = self.arg_int_or(index, default as i64)?;
        u64::try_from(value)
            .map_err(|_| self.mismatch(index, "non-negative integer", &Value::from(value)))
    }

    /// Optional boolean with a default; accepts `true`/`false` and 0/1.
    pub fn arg_bool_or(&self, index: usize, default: bool) -> ProcessResult<bool> {
        match self.arg(index) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Number(n)) => Ok(n.as_i64() == Some(1)),
            Some(other) => Err(self.mismatch(index, "boolean", other)),
        }
    }

    /// Required object.
    pub fn arg_map(&self, index: usize) -> ProcessResult<Map<String, Value>> {
        match self.arg(index) {
            Some(Value::Object(map)) => Ok(map.clone()),
            Some(other) => Err(self.mismatch(index, "object", other)),
            None => Err(self.missing(index, "object")),
        }
    }

    /// Optional object.
    pub fn arg_map_opt(&self, index: usize) -> ProcessResult<Option<Map<String, Value>>> {
        match self.arg(index) {
            None => Ok(None),
            Some(_) => self.arg_map(index).map(Some),
        }
    }

    /// Required array.
    pub fn arg_array(&self, index: usize) -> ProcessResult<Vec<Value>> {
        match self.arg(index) {
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(other) => Err(self.mismatch(index, "array", other)),
            None => Err(self.missing(index, "array")),
        }
    }

    /// Required array of objects (model rows).
    pub fn arg_records(&self, index: usize) -> ProcessResult<Vec<Map<String, Value>>> {
        let items = self.arg_array(index)?;
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(map) => Ok(map),
                other => Err(ProcessError::argument(format!(
                    "process '{}' argument {index}[{i}] must be an object, got {other}",
                    self.name
                ))),
            })
            .collect()
    }

    /// Required array of strings.
    pub fn arg_strings(&self, index: usize) -> ProcessResult<Vec<String>> {
        let items = self.arg_array(index)?;
        items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(self.mismatch(index, "array of strings", &other)),
            })
            .collect()
    }

    /// Optional array of strings.
    pub fn arg_strings_or_default(&self, index: usize) -> ProcessResult<Vec<String>> {
        match self.arg(index) {
            None => Ok(Vec::new()),
            Some(_) => self.arg_strings(index),
        }
    }

    /// Query-shaping argument; missing or null yields the default param.
    pub fn arg_query_param(&self, index: usize) -> ProcessResult<QueryParam> {
        match self.arg(index) {
            None => Ok(QueryParam::default()),
            Some(value) => QueryParam::from_value(value),
        }
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("name", &self.name)
            .field("type", &self.kind)
            .field("class", &self.class)
            .field("method", &self.method)
            .field("args", &self.args.len())
            .finish()
    }
}
