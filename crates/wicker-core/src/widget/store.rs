//! Store widget definition.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Widget, WidgetKind};
use crate::kv::SharedStore;

/// A declarative store document: `{name, type, option}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDefinition {
    pub name: String,
    /// Backend type (`memory`, `lru`, `redis`, …), resolved through the
    /// loader's store-factory table.
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Backend options (capacity, ttl, connection settings, …).
    #[serde(default)]
    pub option: Map<String, Value>,
}

/// A loaded store: the definition plus the live backend instance.
pub struct StoreWidget {
    id: String,
    source: String,
    pub definition: StoreDefinition,
    pub store: SharedStore,
}

impl StoreWidget {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        definition: StoreDefinition,
        store: SharedStore,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            definition,
            store,
        }
    }
}

impl Widget for StoreWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Store
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
