//! Flow widget definition.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Widget, WidgetKind};

/// One step of a flow.
///
/// Exactly one of `process`, `query`, or `script` is the primary operator;
/// when several are present they run in query → process → script order and
/// the later one sees the earlier one's response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowNode {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    /// Query-DSL engine name, required when `query` is present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    /// Script alias (flow-local) or globally loaded script name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
    /// Output templates; empty means "store the raw response".
    #[serde(default)]
    pub outs: Vec<Value>,
}

/// A node-based orchestration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    /// Output template bound over `{$in, $res, $global}`; `None` returns the
    /// node result map verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Flow-local scripts, alias → source (inline text or `file://` path).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub scripts: HashMap<String, String>,
}

/// A loaded flow.
pub struct FlowWidget {
    id: String,
    source: String,
    pub definition: FlowDefinition,
}

impl FlowWidget {
    pub fn new(id: impl Into<String>, source: impl Into<String>, definition: FlowDefinition) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            definition,
        }
    }
}

impl Widget for FlowWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Flow
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
