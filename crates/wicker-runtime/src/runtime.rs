//! The runtime aggregate.
//!
//! A [`Runtime`] wires a dispatch [`Kernel`] together with the script
//! runtime, store factories, and filesystem roots, and installs every
//! built-in handler group. It is the value embedders hold: load widgets
//! through it, then hand it to a [`Server`](crate::server::Server).

use std::path::PathBuf;
use std::sync::Arc;

use wicker_core::{Kernel, SharedQueryExecutor};
use wicker_script::ScriptRuntime;

use crate::fs::FsRoots;
use crate::stores::{StoreFactories, StoreFactory};

/// Everything one Wicker instance owns.
pub struct Runtime {
    kernel: Arc<Kernel>,
    scripts: Arc<ScriptRuntime>,
    stores: StoreFactories,
    fs_roots: Arc<FsRoots>,
}

impl Runtime {
    /// Creates a runtime with every built-in handler group installed:
    /// `models`/`stores`/`flows` (kernel), `scripts`, `plugins`, `http`,
    /// `websocket`, `fs`, `schedules`, and `tasks`.
    pub fn new() -> Arc<Self> {
        let kernel = Kernel::new();
        let scripts = ScriptRuntime::new();
        let fs_roots = FsRoots::new();

        wicker_script::install(&kernel, &scripts);
        wicker_plugin::install(&kernel);
        wicker_transport::http::install_http_client(&kernel);
        wicker_transport::ws::install(&kernel);
        crate::fs::install(&kernel, &fs_roots);
        crate::schedule::install(&kernel);
        crate::task::install(&kernel);

        Arc::new(Self {
            kernel,
            scripts,
            stores: StoreFactories::with_builtins(),
            fs_roots,
        })
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn scripts(&self) -> &Arc<ScriptRuntime> {
        &self.scripts
    }

    pub fn store_factories(&self) -> &StoreFactories {
        &self.stores
    }

    /// Registers a sandbox root usable as `fs.<name>.<op>`.
    pub fn register_fs_root(&self, name: &str, path: impl Into<PathBuf>) {
        self.fs_roots.register(name, path);
    }

    /// Registers a store backend type (`redis`, `mongo`, …).
    pub fn register_store_factory(&self, kind: &str, factory: StoreFactory) {
        self.stores.register(kind, factory);
    }

    /// Sets the data-model collaborator.
    pub fn set_query_executor(&self, executor: SharedQueryExecutor) {
        self.kernel.set_query_executor(executor);
    }
}
