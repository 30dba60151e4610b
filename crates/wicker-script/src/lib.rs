//! # Wicker Script
//!
//! The pooled script runtime of the Wicker application runtime.
//!
//! Scripts are [Rhai](https://rhai.rs) sources compiled once at load time;
//! exported functions are enumerated with their arity and invoked through
//! `scripts.<name>.<function>` process names or directly via
//! [`ScriptRuntime::call`]. A bounded engine pool amortises engine setup, and
//! the `Process`/`Studio` intrinsics let scripts re-enter the dispatch kernel
//! with the caller's session and globals preserved.
//!
//! Trust is two-tier: [`ScriptRuntime::load`] produces sandboxed scripts,
//! [`ScriptRuntime::root_load`] privileged ones that must be entered through
//! [`ScriptRuntime::root_call`].

mod bridge;
mod pool;
mod runtime;

pub use pool::EnginePool;
pub use runtime::{
    DEFAULT_POOL_CAPACITY, ScriptCall, ScriptFunction, ScriptRuntime, ScriptWidget, install,
};
