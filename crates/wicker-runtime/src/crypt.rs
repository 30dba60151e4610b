//! Crypt widget.
//!
//! Crypto primitives are pluggable and live outside the runtime; the widget
//! kind exists so crypt documents register like everything else and
//! embedder-provided handler groups can dispatch on them.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use wicker_core::{Widget, WidgetKind};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CryptDefinition {
    pub name: String,
    /// Algorithm family, interpreted by the embedder's handler group.
    #[serde(rename = "type", default)]
    pub kind: String,
}

pub struct CryptWidget {
    id: String,
    source: String,
    pub definition: CryptDefinition,
}

impl CryptWidget {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        definition: CryptDefinition,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            definition,
        }
    }
}

impl Widget for CryptWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Crypt
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
