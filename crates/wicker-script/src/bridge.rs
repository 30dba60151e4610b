//! The script ↔ kernel bridge.
//!
//! Scripts re-enter the dispatcher through two intrinsics:
//!
//! - `Process(name, args…)`: available to every script; refuses root-only
//!   targets when the calling script is sandboxed.
//! - `Studio(name, args…)`: the privileged entry; only usable from scripts
//!   entered via a root call, and permitted to reach root-only handlers.
//!
//! The per-call state (kernel handle, request context, cancellation token,
//! trust tier, tokio handle) travels through a thread-local set around the
//! blocking evaluation, so pooled engines stay context-free. Nested kernel
//! errors cross the VM boundary as `"<code>|<message>"` runtime errors and
//! are re-parsed into [`ProcessError`]s on the way out.

use std::cell::RefCell;

use rhai::serde::{from_dynamic, to_dynamic};
use rhai::{Dynamic, EvalAltResult};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use std::sync::Arc;

use wicker_core::{ErrorKind, Kernel, ProcessError, RequestContext};

/// Per-call state visible to the intrinsics.
#[derive(Clone)]
pub(crate) struct CallContext {
    pub kernel: Arc<Kernel>,
    pub context: RequestContext,
    pub cancel: CancellationToken,
    /// Trust tier: root calls may reach root-only handlers.
    pub root: bool,
    pub handle: tokio::runtime::Handle,
}

thread_local! {
    static CALL_CTX: RefCell<Option<CallContext>> = const { RefCell::new(None) };
}

/// Runs `f` with the call context installed on this thread.
pub(crate) fn with_call_context<T>(ctx: CallContext, f: impl FnOnce() -> T) -> T {
    CALL_CTX.with(|cell| *cell.borrow_mut() = Some(ctx));
    let out = f();
    CALL_CTX.with(|cell| *cell.borrow_mut() = None);
    out
}

fn current() -> Result<CallContext, Box<EvalAltResult>> {
    CALL_CTX
        .with(|cell| cell.borrow().clone())
        .ok_or_else(|| "500|script call context is missing".into())
}

/// True when the current call has been cancelled (checked by `on_progress`).
pub(crate) fn current_cancelled() -> bool {
    CALL_CTX.with(|cell| {
        cell.borrow()
            .as_ref()
            .is_some_and(|ctx| ctx.cancel.is_cancelled())
    })
}

/// Encodes a kernel error for the VM boundary.
pub(crate) fn encode_error(err: &ProcessError) -> String {
    format!("{}|{}", err.code, err.message)
}

/// Re-parses a VM error into a [`ProcessError`].
///
/// Accepts the `"<code>|<message>"` shape produced by the intrinsics and the
/// legacy `"Exception|<code>:<message>"` shape; anything else is a plain
/// script error. Termination (cancellation) maps to [`ErrorKind::Cancelled`].
pub(crate) fn decode_error(err: &EvalAltResult) -> ProcessError {
    if matches!(err, EvalAltResult::ErrorTerminated(..)) {
        return ProcessError::cancelled("script execution cancelled");
    }
    let text = err.to_string();
    if let Some(parsed) = parse_encoded(&text) {
        return parsed;
    }
    ProcessError::script(text)
}

fn parse_encoded(text: &str) -> Option<ProcessError> {
    if let Some(rest) = text_find(text, "Exception|") {
        let (code, message) = rest.split_once(':')?;
        let code: u16 = code.trim().parse().ok()?;
        return Some(make_error(code, message.trim()));
    }
    // Find a `NNN|` code marker anywhere in the error text (rhai wraps
    // runtime errors with its own prefix and position info).
    let bytes = text.as_bytes();
    for (idx, b) in bytes.iter().enumerate() {
        if *b == b'|' && idx >= 3 {
            let code = text
                .get(idx - 3..idx)
                .and_then(|s| s.parse::<u16>().ok());
            if let (Some(code), Some(rest)) = (code, text.get(idx + 1..)) {
                // Strip rhai's trailing position annotation if present.
                let message = rest.split(" (line ").next().unwrap_or(rest);
                return Some(make_error(code, message.trim()));
            }
        }
    }
    None
}

fn text_find<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    text.find(prefix).map(|idx| &text[idx + prefix.len()..])
}

fn make_error(code: u16, message: &str) -> ProcessError {
    let kind = match code {
        400 => ErrorKind::Argument,
        404 => ErrorKind::HandlerNotFound,
        499 => ErrorKind::Cancelled,
        500 => ErrorKind::Internal,
        504 => ErrorKind::Timeout,
        _ => ErrorKind::Internal,
    };
    ProcessError::new(kind, message).with_code(code)
}

// ── intrinsics ───────────────────────────────────────────────────────────

fn reenter(name: &str, args: Vec<Dynamic>, studio: bool) -> Result<Dynamic, Box<EvalAltResult>> {
    let ctx = current()?;
    if ctx.cancel.is_cancelled() {
        return Err("499|script execution cancelled".into());
    }
    if studio && !ctx.root {
        return Err("403|Studio is only available to root scripts".into());
    }

    let json_args: Vec<Value> = args
        .iter()
        .map(from_dynamic)
        .collect::<Result<_, _>>()
        .map_err(|e| -> Box<EvalAltResult> { format!("400|invalid argument: {e}").into() })?;

    let process = ctx
        .kernel
        .process(name, json_args)
        .map_err(|e| -> Box<EvalAltResult> { encode_error(&e).into() })?;
    if process.root_only() && !studio {
        return Err(format!("404|process '{name}' is not available to sandboxed scripts").into());
    }

    let future = process
        .with_context(ctx.context.clone())
        .with_cancel(ctx.cancel.clone())
        .exec();
    let result = ctx
        .handle
        .block_on(future)
        .map_err(|e| -> Box<EvalAltResult> { encode_error(&e).into() })?;
    to_dynamic(&result).map_err(|e| -> Box<EvalAltResult> { format!("500|{e}").into() })
}

macro_rules! register_reentry {
    ($engine:expr, $fn_name:literal, $studio:expr) => {
        $engine.register_fn($fn_name, move |name: String| {
            reenter(&name, vec![], $studio)
        });
        $engine.register_fn($fn_name, move |name: String, a: Dynamic| {
            reenter(&name, vec![a], $studio)
        });
        $engine.register_fn($fn_name, move |name: String, a: Dynamic, b: Dynamic| {
            reenter(&name, vec![a, b], $studio)
        });
        $engine.register_fn(
            $fn_name,
            move |name: String, a: Dynamic, b: Dynamic, c: Dynamic| {
                reenter(&name, vec![a, b, c], $studio)
            },
        );
        $engine.register_fn(
            $fn_name,
            move |name: String, a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| {
                reenter(&name, vec![a, b, c, d], $studio)
            },
        );
        $engine.register_fn(
            $fn_name,
            move |name: String, a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic, e: Dynamic| {
                reenter(&name, vec![a, b, c, d, e], $studio)
            },
        );
    };
}

/// Registers the `Process` and `Studio` intrinsics (arities 1–6).
pub(crate) fn register_intrinsics(engine: &mut rhai::Engine) {
    register_reentry!(engine, "Process", false);
    register_reentry!(engine, "Studio", true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_encoded_error() {
        let err = EvalAltResult::ErrorRuntime("404|no handler".into(), rhai::Position::NONE);
        let decoded = decode_error(&err);
        assert_eq!(decoded.code, 404);
        assert_eq!(decoded.kind, ErrorKind::HandlerNotFound);
        assert_eq!(decoded.message, "no handler");
    }

    #[test]
    fn test_decode_exception_shape() {
        let err =
            EvalAltResult::ErrorRuntime("Exception|400:bad argument".into(), rhai::Position::NONE);
        let decoded = decode_error(&err);
        assert_eq!(decoded.code, 400);
        assert_eq!(decoded.message, "bad argument");
    }

    #[test]
    fn test_decode_unshaped_error_is_script_kind() {
        let err = EvalAltResult::ErrorRuntime("something broke".into(), rhai::Position::NONE);
        let decoded = decode_error(&err);
        assert_eq!(decoded.kind, ErrorKind::Script);
    }

    #[test]
    fn test_encode_roundtrip() {
        let original = ProcessError::not_found("no handler for 'x'");
        let encoded = encode_error(&original);
        let decoded = parse_encoded(&encoded).unwrap();
        assert_eq!(decoded.code, original.code);
        assert_eq!(decoded.message, original.message);
    }
}
