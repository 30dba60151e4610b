//! Bounded engine pool.
//!
//! Script engines are expensive to configure (safety limits, intrinsics), so
//! a fixed-capacity free list amortises them across calls. Compilation is not
//! tied to an engine: scripts compile once to a shared AST at load time and
//! any pooled engine can run it.
//!
//! Each engine is single-threaded; a checked-out engine is owned exclusively
//! by its call and returned to the free list on drop.

use std::sync::Arc;

use parking_lot::Mutex;
use rhai::Engine;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use wicker_core::{ProcessError, ProcessResult};

/// Fixed-capacity pool of pre-configured engines.
pub struct EnginePool {
    free: Mutex<Vec<Engine>>,
    permits: Arc<Semaphore>,
    build: fn() -> Engine,
}

impl EnginePool {
    /// Creates a pool of at most `capacity` engines built by `build`.
    ///
    /// Engines are created lazily: the pool starts empty and grows up to the
    /// capacity as calls come in.
    pub fn new(capacity: usize, build: fn() -> Engine) -> Arc<Self> {
        Arc::new(Self {
            free: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            build,
        })
    }

    /// Checks out an engine, waiting for capacity when the pool is busy.
    pub async fn acquire(self: &Arc<Self>) -> ProcessResult<PooledEngine> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ProcessError::internal("script engine pool is closed"))?;
        let engine = self.free.lock().pop().unwrap_or_else(self.build);
        Ok(PooledEngine {
            engine: Some(engine),
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    fn give_back(&self, engine: Engine) {
        self.free.lock().push(engine);
    }
}

/// An exclusively owned engine, returned to the pool on drop.
pub struct PooledEngine {
    engine: Option<Engine>,
    pool: Arc<EnginePool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledEngine {
    pub fn engine(&self) -> &Engine {
        self.engine.as_ref().expect("engine present until drop")
    }
}

impl Drop for PooledEngine {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.take() {
            self.pool.give_back(engine);
        }
    }
}
