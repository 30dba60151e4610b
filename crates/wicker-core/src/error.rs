//! Unified error type for the Wicker kernel.
//!
//! Every handler, loader, and transport boundary reports failures as a
//! [`ProcessError`]: a kind from the runtime taxonomy, an HTTP-style status
//! code, a human-readable message, and an optional structured context value.
//! Handlers return errors; only the outermost request boundary converts them
//! into wire responses.

use serde_json::Value;
use thiserror::Error;

/// The failure taxonomy of the runtime.
///
/// Each kind carries a default HTTP-style status code used when the error is
/// rendered at a request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed dotted process name.
    BadProcessName,
    /// Unknown type or method.
    HandlerNotFound,
    /// Registry miss.
    NotLoaded,
    /// Missing or ill-typed argument.
    Argument,
    /// Model column validation failure.
    Validation,
    /// Widget parse or registration failure.
    Load,
    /// A flow recursed into itself.
    FlowSelfCall,
    /// Script compile or run failure.
    Script,
    /// Plugin subprocess or RPC failure.
    PluginRpc,
    /// Context cancellation.
    Cancelled,
    /// Deadline exceeded.
    Timeout,
    /// Catch-all.
    Internal,
}

impl ErrorKind {
    /// Default status code for this kind.
    pub fn code(self) -> u16 {
        match self {
            ErrorKind::BadProcessName => 400,
            ErrorKind::HandlerNotFound => 404,
            ErrorKind::NotLoaded => 500,
            ErrorKind::Argument => 400,
            ErrorKind::Validation => 400,
            ErrorKind::Load => 400,
            ErrorKind::FlowSelfCall => 400,
            ErrorKind::Script => 500,
            ErrorKind::PluginRpc => 500,
            ErrorKind::Cancelled => 499,
            ErrorKind::Timeout => 504,
            ErrorKind::Internal => 500,
        }
    }

    /// Stable lowercase name, used in logs and wire payloads.
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::BadProcessName => "bad_process_name",
            ErrorKind::HandlerNotFound => "handler_not_found",
            ErrorKind::NotLoaded => "not_loaded",
            ErrorKind::Argument => "argument",
            ErrorKind::Validation => "validation",
            ErrorKind::Load => "load",
            ErrorKind::FlowSelfCall => "flow_self_call",
            ErrorKind::Script => "script",
            ErrorKind::PluginRpc => "plugin_rpc",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

/// A runtime failure.
///
/// `code` defaults to the kind's status code but may be overridden (e.g. a
/// guard process raising 401/403).
#[derive(Debug, Clone, Error)]
#[error("{message} ({} {code})", kind.name())]
pub struct ProcessError {
    /// The taxonomy kind.
    pub kind: ErrorKind,
    /// HTTP-style status code.
    pub code: u16,
    /// Human-readable message.
    pub message: String,
    /// Optional structured context (offending value, widget id, …).
    pub context: Option<Value>,
}

impl ProcessError {
    /// Creates an error of `kind` with its default code.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.code(),
            message: message.into(),
            context: None,
        }
    }

    /// Overrides the status code.
    pub fn with_code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Attaches a structured context value.
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    pub fn bad_name(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadProcessName, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::HandlerNotFound, message)
    }

    pub fn not_loaded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotLoaded, message)
    }

    pub fn argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Argument, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Load, message)
    }

    pub fn flow_self_call(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FlowSelfCall, message)
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Script, message)
    }

    pub fn plugin(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PluginRpc, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Wire shape rendered at request boundaries: `{code, message}`.
    pub fn to_response_value(&self) -> Value {
        serde_json::json!({ "code": self.code, "message": self.message })
    }
}

impl From<std::io::Error> for ProcessError {
    fn from(err: std::io::Error) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<serde_json::Error> for ProcessError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("json: {err}"))
    }
}

/// Result type for kernel operations.
pub type ProcessResult<T> = Result<T, ProcessError>;
