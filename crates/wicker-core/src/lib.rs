//! # Wicker Core
//!
//! The process dispatch and orchestration kernel of the Wicker runtime.
//!
//! Wicker turns declarative JSON/YAML *widget* documents into live services.
//! This crate provides the pieces everything else builds on:
//!
//! - **Registry**: concurrent, name-indexed storage of loaded widgets,
//!   one map per kind ([`Registry`]).
//! - **Process kernel**: the uniform `type.class.method` invocation model:
//!   name parsing, handler resolution, request-context propagation
//!   ([`Kernel`], [`Process`]).
//! - **Flow engine**: sequential node orchestration with template binding
//!   between nodes ([`flow`]).
//! - **Template binding**: `{{ expr }}` / `{{ fn(args) }}` resolution in
//!   JSON trees ([`binding`]).
//! - **Collaborator traits**: the query executor and key/value store
//!   interfaces the kernel consumes but does not implement ([`QueryExecutor`],
//!   [`KVStore`]).
//!
//! Handler groups for transports, scripts, schedules, tasks, filesystems,
//! and plugins are installed by their own crates onto a shared [`Kernel`]
//! value; nothing in Wicker lives at module scope.
//!
//! ## Example
//!
//! ```rust,ignore
//! use wicker_core::{Kernel, handler};
//! use serde_json::json;
//!
//! let kernel = Kernel::new();
//! kernel.register_handler("utils.hello.world", handler(|p| async move {
//!     Ok(json!({"hello": p.arg_string_or(0, "world")?}))
//! }));
//!
//! let result = kernel
//!     .process("utils.hello.world", vec![json!("wicker")])?
//!     .with_sid("sess-1")
//!     .exec()
//!     .await?;
//! ```

pub mod binding;
pub mod context;
pub mod error;
pub mod flow;
mod groups;
pub mod kernel;
pub mod kv;
pub mod process;
pub mod query;
pub mod registry;
pub mod types;
pub mod widget;

pub use binding::{BindScope, HelperFn, bind, bind_with};
pub use context::RequestContext;
pub use error::{ErrorKind, ProcessError, ProcessResult};
pub use kernel::{HandlerEntry, HandlerFn, HandlerFuture, HandlerGroup, Kernel, handler};
pub use kv::{KVStore, SharedStore};
pub use process::Process;
pub use query::{QueryExecutor, SharedQueryExecutor};
pub use registry::Registry;
pub use types::{QueryOrder, QueryParam, QueryWhere, UploadFile};
pub use widget::{
    FlowDefinition, FlowNode, FlowWidget, ModelDefinition, ModelWidget, SharedWidget,
    StoreDefinition, StoreWidget, Widget, WidgetKind,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::binding::{BindScope, HelperFn};
    pub use crate::context::RequestContext;
    pub use crate::error::{ErrorKind, ProcessError, ProcessResult};
    pub use crate::kernel::{HandlerGroup, Kernel, handler};
    pub use crate::kv::{KVStore, SharedStore};
    pub use crate::process::Process;
    pub use crate::query::QueryExecutor;
    pub use crate::types::{QueryParam, UploadFile};
    pub use crate::widget::{Widget, WidgetKind};
}
