//! Name-indexed storage of loaded widgets.
//!
//! One concurrent map per widget kind. The hot path is read-only process
//! dispatch; mutations (load, reload, unload) are infrequent and take the
//! per-kind write lock.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ProcessError, ProcessResult};
use crate::widget::{SharedWidget, Widget, WidgetKind};

/// Per-kind widget maps, keyed by lowercased id.
pub struct Registry {
    maps: HashMap<WidgetKind, RwLock<HashMap<String, SharedWidget>>>,
}

impl Registry {
    pub fn new() -> Self {
        let maps = WidgetKind::ALL
            .into_iter()
            .map(|kind| (kind, RwLock::new(HashMap::new())))
            .collect();
        Self { maps }
    }

    fn map(&self, kind: WidgetKind) -> &RwLock<HashMap<String, SharedWidget>> {
        // All kinds are pre-created in `new`.
        &self.maps[&kind]
    }

    /// Inserts or replaces a widget; last writer wins.
    ///
    /// Returns the previous widget under the same id, if any.
    pub fn register(&self, widget: SharedWidget) -> Option<SharedWidget> {
        let kind = widget.kind();
        let key = widget.id().to_lowercase();
        let previous = self.map(kind).write().insert(key, widget);
        debug!(kind = %kind, replaced = previous.is_some(), "Registered widget");
        previous
    }

    /// Read-only lookup. A miss is a [`NotLoaded`] error, never a zero value.
    ///
    /// [`NotLoaded`]: crate::error::ErrorKind::NotLoaded
    pub fn select(&self, kind: WidgetKind, id: &str) -> ProcessResult<SharedWidget> {
        self.map(kind)
            .read()
            .get(&id.to_lowercase())
            .cloned()
            .ok_or_else(|| ProcessError::not_loaded(format!("{kind} '{id}' is not loaded")))
    }

    /// Typed lookup; the widget must be of payload type `T`.
    pub fn select_as<T: Widget>(&self, kind: WidgetKind, id: &str) -> ProcessResult<Arc<T>> {
        let widget = self.select(kind, id)?;
        widget
            .as_any()
            .downcast::<T>()
            .map_err(|_| ProcessError::internal(format!("{kind} '{id}' has an unexpected payload")))
    }

    /// True when a widget of `kind` with `id` is loaded.
    pub fn contains(&self, kind: WidgetKind, id: &str) -> bool {
        self.map(kind).read().contains_key(&id.to_lowercase())
    }

    /// Unordered snapshot of the loaded ids for `kind`.
    pub fn list(&self, kind: WidgetKind) -> Vec<String> {
        self.map(kind).read().keys().cloned().collect()
    }

    /// Snapshot of every widget of `kind`.
    pub fn widgets(&self, kind: WidgetKind) -> Vec<SharedWidget> {
        self.map(kind).read().values().cloned().collect()
    }

    /// Removes a widget; no-op when absent. Returns the removed widget.
    pub fn unload(&self, kind: WidgetKind, id: &str) -> Option<SharedWidget> {
        let removed = self.map(kind).write().remove(&id.to_lowercase());
        if removed.is_some() {
            debug!(kind = %kind, id = %id, "Unloaded widget");
        }
        removed
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
