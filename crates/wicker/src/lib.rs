//! # Wicker
//!
//! Wicker turns declarative JSON/YAML documents (*widgets*) into live,
//! callable services: HTTP APIs, WebSocket endpoints, raw TCP sockets, cron
//! schedules, background task queues, and data-model endpoints, all
//! dispatched through a uniform `type.class.method` process invocation
//! model.
//!
//! This crate re-exports the whole workspace:
//!
//! - [`wicker_core`]: registry, process kernel, flow engine, template
//!   binding, collaborator traits.
//! - [`wicker_script`]: pooled script runtime with kernel re-entry.
//! - [`wicker_plugin`]: out-of-process plugin host.
//! - [`wicker_transport`]: HTTP/WebSocket/TCP transports.
//! - [`wicker_runtime`]: widget loader, stores, schedules, tasks, and the
//!   server orchestrator.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use wicker::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = Runtime::new();
//!     runtime.load(WidgetKind::Flow, "hello", r#"{
//!         "name": "hello",
//!         "nodes": [{"name": "greet", "process": "utils.greet.now", "args": ["{{ $in.0 }}"]}]
//!     }"#).await?;
//!
//!     Server::new(runtime, ServerConfig::from_env()?)
//!         .serve(CancellationToken::new(), || {})
//!         .await?;
//!     Ok(())
//! }
//! ```

pub use wicker_core;
pub use wicker_plugin;
pub use wicker_runtime;
pub use wicker_script;
pub use wicker_transport;

pub use wicker_core::{
    ErrorKind, Kernel, Process, ProcessError, ProcessResult, RequestContext, WidgetKind, handler,
};
pub use wicker_runtime::{Runtime, Server, ServerConfig};

/// Prelude for common imports.
pub mod prelude {
    pub use wicker_core::prelude::*;
    pub use wicker_runtime::logging::LoggingBuilder;
    pub use wicker_runtime::{Runtime, Server, ServerConfig};
    pub use wicker_script::ScriptRuntime;
    pub use wicker_transport::MountOptions;
}
