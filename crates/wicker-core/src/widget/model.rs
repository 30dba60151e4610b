//! Model widget definition.
//!
//! Column schemas, relations, and migrations belong to the external
//! [`QueryExecutor`](crate::query::QueryExecutor); the kernel only needs the
//! model to exist in the registry so `models.<id>.<method>` names resolve.
//! The full document is kept as pass-through metadata.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Widget, WidgetKind};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Value>,
    /// The rest of the document (columns, indexes, relations, option).
    #[serde(flatten)]
    pub metadata: serde_json::Map<String, Value>,
}

/// A loaded data model.
pub struct ModelWidget {
    id: String,
    source: String,
    pub definition: ModelDefinition,
}

impl ModelWidget {
    pub fn new(id: impl Into<String>, source: impl Into<String>, definition: ModelDefinition) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            definition,
        }
    }
}

impl Widget for ModelWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Model
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
