//! Key/value store collaborator interface.
//!
//! Concrete backends (in-process, Redis, Mongo, …) live outside the kernel;
//! the `stores` handler group and the session facet only speak this trait.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// A shared key/value store.
///
/// All operations are infallible from the kernel's point of view: a backend
/// that can fail (network stores) reports misses and logs its own errors.
#[async_trait]
pub trait KVStore: Send + Sync {
    /// Returns the value for `key`, if present and not expired.
    async fn get(&self, key: &str) -> Option<Value>;

    /// Inserts or replaces `key`. A `ttl` of `None` means no expiry.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    /// True when `key` is present.
    async fn has(&self, key: &str) -> bool;

    /// Removes `key`. No-op when absent.
    async fn del(&self, key: &str);

    /// Removes `key`, returning the previous value if any.
    async fn get_del(&self, key: &str) -> Option<Value>;

    /// Returns the existing value for `key`, or stores and returns `default`.
    async fn get_set(&self, key: &str, default: Value, ttl: Option<Duration>) -> Value;

    /// Number of live entries.
    async fn len(&self) -> usize;

    /// Snapshot of the live keys, unordered.
    async fn keys(&self) -> Vec<String>;

    /// Removes every entry.
    async fn clear(&self);
}

/// Shared handle to a store backend.
pub type SharedStore = Arc<dyn KVStore>;
