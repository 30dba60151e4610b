//! Store backends and the store-factory table.
//!
//! The built-in backend is an in-process map with lazy TTL eviction and a
//! capacity bound, registered for `type: "memory"` and `type: "lru"`.
//! Network backends (Redis, Mongo, …) stay outside the runtime; embedders
//! register factories for them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use wicker_core::{KVStore, ProcessError, ProcessResult, SharedStore, StoreDefinition};

/// Builds a store backend from its definition.
pub type StoreFactory = Arc<dyn Fn(&StoreDefinition) -> ProcessResult<SharedStore> + Send + Sync>;

/// Named store factories.
pub struct StoreFactories {
    map: RwLock<HashMap<String, StoreFactory>>,
}

impl StoreFactories {
    /// A table with the in-process backend registered.
    pub fn with_builtins() -> Self {
        let factories = Self {
            map: RwLock::new(HashMap::new()),
        };
        let memory: StoreFactory = Arc::new(|definition: &StoreDefinition| {
            Ok(Arc::new(MemoryStore::from_definition(definition)) as SharedStore)
        });
        factories.register("memory", memory.clone());
        factories.register("lru", memory);
        factories
    }

    /// Registers a backend type; replaces a previous registration.
    pub fn register(&self, kind: &str, factory: StoreFactory) {
        self.map.write().insert(kind.to_lowercase(), factory);
    }

    /// Builds a backend for `definition`, defaulting to `memory`.
    pub fn build(&self, definition: &StoreDefinition) -> ProcessResult<SharedStore> {
        let kind = if definition.kind.is_empty() {
            "memory".to_string()
        } else {
            definition.kind.to_lowercase()
        };
        let factory = self.map.read().get(&kind).cloned().ok_or_else(|| {
            ProcessError::load(format!(
                "store '{}' has unknown type '{kind}'",
                definition.name
            ))
        })?;
        factory(definition)
    }
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Instant::now())
    }
}

/// Bounded in-process store with lazy TTL eviction.
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    capacity: usize,
    default_ttl: Option<Duration>,
}

impl MemoryStore {
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    /// Options: `size` (entry capacity, default 10240) and `ttl` (seconds).
    pub fn from_definition(definition: &StoreDefinition) -> Self {
        let capacity = definition
            .option
            .get("size")
            .and_then(Value::as_u64)
            .unwrap_or(10240) as usize;
        let ttl = definition
            .option
            .get("ttl")
            .and_then(Value::as_u64)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        Self::new(capacity, ttl)
    }

    fn entry(&self, value: Value, ttl: Option<Duration>) -> Entry {
        Entry {
            value,
            expires_at: ttl.or(self.default_ttl).map(|ttl| Instant::now() + ttl),
        }
    }

    /// Drops expired entries, then an arbitrary one if still at capacity.
    fn make_room(&self) {
        if self.entries.len() < self.capacity {
            return;
        }
        self.entries.retain(|_, entry| !entry.expired());
        while self.entries.len() >= self.capacity {
            let Some(key) = self.entries.iter().next().map(|e| e.key().clone()) else {
                return;
            };
            self.entries.remove(&key);
        }
    }
}

#[async_trait]
impl KVStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Value> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.expired() {
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }
        None
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        self.make_room();
        self.entries.insert(key.to_string(), self.entry(value, ttl));
    }

    async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    async fn del(&self, key: &str) {
        self.entries.remove(key);
    }

    async fn get_del(&self, key: &str) -> Option<Value> {
        let value = self.get(key).await;
        self.entries.remove(key);
        value
    }

    async fn get_set(&self, key: &str, default: Value, ttl: Option<Duration>) -> Value {
        if let Some(value) = self.get(key).await {
            return value;
        }
        self.set(key, default.clone(), ttl).await;
        default
    }

    async fn len(&self) -> usize {
        self.entries.retain(|_, entry| !entry.expired());
        self.entries.len()
    }

    async fn keys(&self) -> Vec<String> {
        self.entries.retain(|_, entry| !entry.expired());
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    async fn clear(&self) {
        self.entries.clear();
    }
}
