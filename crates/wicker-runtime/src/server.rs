//! Server orchestration.
//!
//! One [`Server`] composes a complete runtime instance: it mounts every API
//! widget onto the router, wires the WebSocket upgrader, starts task pools,
//! schedules, and socket widgets, then serves until either the cooperative
//! shutdown token fires or the process receives INT/TERM/QUIT. Teardown is
//! ordered: graceful HTTP drain within the grace window, then schedules,
//! task workers, WebSocket hubs, sockets, plugin subprocesses, and finally
//! the `on_shutdown` callback, which is invoked exactly once.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use wicker_core::{ProcessError, ProcessResult};
use wicker_transport::http::{GuardFn, MountOptions};
use wicker_transport::{http, socket, ws};

use crate::config::ServerConfig;
use crate::runtime::Runtime;
use crate::{schedule, task};

/// Router middleware applied after widget mounting.
pub type Middleware = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// An unbound server instance.
pub struct Server {
    runtime: Arc<Runtime>,
    config: ServerConfig,
    guards: HashMap<String, GuardFn>,
    middlewares: Vec<Middleware>,
}

impl Server {
    pub fn new(runtime: Arc<Runtime>, config: ServerConfig) -> Self {
        Self {
            runtime,
            config,
            guards: HashMap::new(),
            middlewares: Vec::new(),
        }
    }

    /// Registers a named guard middleware; guard names on API widgets
    /// resolve here before falling back to process invocation.
    pub fn with_guard(mut self, name: impl Into<String>, guard: GuardFn) -> Self {
        self.guards.insert(name.into(), guard);
        self
    }

    /// Adds a global router middleware.
    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Builds the router and binds the listener.
    ///
    /// Binding to port 0 picks an ephemeral port; the bound address is
    /// available on the returned handle.
    pub async fn bind(self) -> ProcessResult<BoundServer> {
        let kernel = self.runtime.kernel();
        let options = MountOptions {
            root: self.config.root.clone(),
            guards: self.guards.clone(),
        };
        let mut router = http::mount(Router::new(), kernel, &options)?;
        router = ws::mount(router, kernel, &self.config.root);
        for middleware in &self.middlewares {
            router = middleware(router);
        }

        let listener = TcpListener::bind(self.config.bind_addr()).await.map_err(|e| {
            ProcessError::internal(format!("bind {} failed: {e}", self.config.bind_addr()))
        })?;
        let addr = listener
            .local_addr()
            .map_err(|e| ProcessError::internal(format!("listener address unavailable: {e}")))?;
        info!(addr = %addr, "HTTP server listening");

        Ok(BoundServer {
            runtime: self.runtime,
            config: self.config,
            listener,
            router,
            addr,
        })
    }

    /// Binds and serves in one step.
    pub async fn serve(
        self,
        shutdown: CancellationToken,
        on_shutdown: impl FnOnce() + Send + 'static,
    ) -> ProcessResult<()> {
        self.bind().await?.serve(shutdown, on_shutdown).await
    }
}

/// A bound, not-yet-serving instance.
pub struct BoundServer {
    runtime: Arc<Runtime>,
    config: ServerConfig,
    listener: TcpListener,
    router: Router,
    addr: SocketAddr,
}

impl BoundServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Runs until `shutdown` fires or an INT/TERM/QUIT signal arrives, then
    /// tears everything down in order.
    pub async fn serve(
        self,
        shutdown: CancellationToken,
        on_shutdown: impl FnOnce() + Send + 'static,
    ) -> ProcessResult<()> {
        let kernel = Arc::clone(self.runtime.kernel());

        task::start_all(&kernel);
        schedule::start_all(&kernel)?;
        socket::start_all(&kernel).await?;

        let drain = CancellationToken::new();
        let server_task = {
            let drain = drain.clone();
            let listener = self.listener;
            let router = self.router;
            tokio::spawn(async move {
                axum::serve(listener, router)
                    .with_graceful_shutdown(async move { drain.cancelled().await })
                    .await
            })
        };

        wait_for_shutdown(&shutdown).await;

        // (a) Drain the HTTP server inside the grace window.
        drain.cancel();
        let grace = Duration::from_secs(self.config.grace.max(1));
        match tokio::time::timeout(grace, server_task).await {
            Ok(Ok(Ok(()))) => info!("HTTP server drained"),
            Ok(Ok(Err(err))) => error!(error = %err, "HTTP server error during drain"),
            Ok(Err(err)) => error!(error = %err, "HTTP server task failed"),
            Err(_) => warn!(grace = grace.as_secs(), "Grace window elapsed, dropping connections"),
        }

        // (b)–(e) Stop the background machinery, then the plugins.
        schedule::stop_all(&kernel);
        task::stop_all(&kernel);
        ws::shutdown_all(&kernel);
        socket::stop_all(&kernel);
        wicker_plugin::kill_all(&kernel).await;

        // (f) Exactly once.
        on_shutdown();
        info!("Runtime stopped");
        Ok(())
    }
}

/// Blocks on the two cancel sources: the cooperative token and OS signals.
async fn wait_for_shutdown(shutdown: &CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).expect("register SIGTERM handler");
        let mut sigquit = signal(SignalKind::quit()).expect("register SIGQUIT handler");
        tokio::select! {
            _ = shutdown.cancelled() => info!("Shutdown requested"),
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigquit.recv() => info!("Received SIGQUIT, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = shutdown.cancelled() => info!("Shutdown requested"),
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
        }
    }
}
