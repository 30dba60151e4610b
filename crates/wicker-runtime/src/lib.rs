//! # Wicker Runtime
//!
//! The orchestration layer of the Wicker application runtime:
//!
//! - **Loader**: reads widget documents (`file://` or inline, JSON or
//!   YAML), validates them, and registers the widgets
//!   ([`Runtime::load`]).
//! - **Stores**: the in-process memory backend plus the factory table for
//!   external backends ([`stores`]).
//! - **Schedules**: cron loops with `schedules.<id>.start/stop`
//!   ([`schedule`]).
//! - **Tasks**: bounded queues with worker pools and queryable progress
//!   ([`task`]).
//! - **Filesystem roots**: sandboxed `fs.<root>.<op>` handlers ([`fs`]).
//! - **Server**: the orchestrator that mounts HTTP/WebSocket widgets,
//!   starts every background service, and shuts the whole instance down in
//!   order ([`Server`]).
//!
//! # Example
//!
//! ```rust,ignore
//! use wicker_runtime::{Runtime, Server, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     wicker_runtime::logging::LoggingBuilder::new().init();
//!
//!     let runtime = Runtime::new();
//!     runtime
//!         .load(wicker_core::WidgetKind::Api, "ping", r#"{"name":"ping","paths":[
//!             {"path":"/ping","method":"GET","process":"flows.ping"}
//!         ]}"#)
//!         .await?;
//!
//!     let shutdown = CancellationToken::new();
//!     Server::new(runtime, ServerConfig::from_env()?)
//!         .serve(shutdown, || {})
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crypt;
pub mod fs;
mod loader;
pub mod logging;
mod runtime;
pub mod schedule;
pub mod server;
pub mod stores;
pub mod task;

pub use config::ServerConfig;
pub use crypt::{CryptDefinition, CryptWidget};
pub use fs::FsRoots;
pub use runtime::Runtime;
pub use schedule::{ScheduleDefinition, ScheduleWidget};
pub use server::{BoundServer, Middleware, Server};
pub use stores::{MemoryStore, StoreFactories, StoreFactory};
pub use task::{TaskDefinition, TaskProgress, TaskWidget};
