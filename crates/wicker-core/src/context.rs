//! Request-scoped context carried through every process invocation.
//!
//! A [`RequestContext`] travels from the inbound request through every nested
//! process, flow node, and script call. The global map is copy-on-write: a
//! nested call may extend its own view, but additions never leak back to the
//! caller. The session id is an opaque string; the only permitted mutation is
//! adoption: filling an empty sid once (e.g. when a session-start handler
//! runs inside a flow).

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Session id plus request-global variables.
#[derive(Clone, Default)]
pub struct RequestContext {
    sid: Arc<Mutex<String>>,
    global: Arc<Map<String, Value>>,
}

impl RequestContext {
    /// Creates an empty context (no sid, no globals).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context with the given session id.
    pub fn with_sid(sid: impl Into<String>) -> Self {
        Self {
            sid: Arc::new(Mutex::new(sid.into())),
            global: Arc::new(Map::new()),
        }
    }

    /// Returns the current session id ("" when none was established).
    pub fn sid(&self) -> String {
        self.sid.lock().clone()
    }

    /// True when a session id has been established.
    pub fn has_sid(&self) -> bool {
        !self.sid.lock().is_empty()
    }

    /// Fills the session id if it is still empty.
    ///
    /// Returns `true` when the sid was adopted. An established sid is never
    /// replaced.
    pub fn adopt_sid(&self, sid: &str) -> bool {
        if sid.is_empty() {
            return false;
        }
        let mut slot = self.sid.lock();
        if slot.is_empty() {
            *slot = sid.to_string();
            true
        } else {
            false
        }
    }

    /// Returns the global variable map.
    pub fn global(&self) -> &Map<String, Value> {
        &self.global
    }

    /// Returns the globals as a JSON value (for binding scopes and scripts).
    pub fn global_value(&self) -> Value {
        Value::Object((*self.global).clone())
    }

    /// Returns a view with `map` merged over the current globals.
    ///
    /// The receiver is unchanged; the sid cell stays shared so adoption in
    /// the child remains visible to the parent.
    pub fn extend_global(&self, map: Map<String, Value>) -> Self {
        if map.is_empty() {
            return self.clone();
        }
        let mut merged = (*self.global).clone();
        for (key, value) in map {
            merged.insert(key, value);
        }
        Self {
            sid: Arc::clone(&self.sid),
            global: Arc::new(merged),
        }
    }

    /// Replaces the global map wholesale, keeping the shared sid cell.
    pub fn replace_global(&self, map: Map<String, Value>) -> Self {
        Self {
            sid: Arc::clone(&self.sid),
            global: Arc::new(map),
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("sid", &self.sid())
            .field("globals", &self.global.len())
            .finish()
    }
}
