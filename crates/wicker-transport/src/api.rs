//! API (HTTP) widget definition.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Map;
use serde_json::Value;

use wicker_core::{Widget, WidgetKind};

/// One declarative input token.
///
/// Two shapes are accepted: a plain token string (`":query"`,
/// `"$param.id"`) or an object carrying a default value. Unknown facet
/// tokens are rejected loudly at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InSpec {
    Token(String),
    Spec {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Value>,
    },
}

impl InSpec {
    pub fn token(&self) -> &str {
        match self {
            InSpec::Token(token) => token,
            InSpec::Spec { name, .. } => name,
        }
    }

    pub fn default_value(&self) -> Option<&Value> {
        match self {
            InSpec::Token(_) => None,
            InSpec::Spec { default, .. } => default.as_ref(),
        }
    }
}

/// Response rendering directives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutSpec {
    #[serde(default = "default_status")]
    pub status: u16,
    /// Response content type; inferred from the body shape when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Header templates, bindable from the response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Map<String, Value>>,
}

impl Default for OutSpec {
    fn default() -> Self {
        Self {
            status: default_status(),
            content_type: None,
            headers: None,
        }
    }
}

fn default_status() -> u16 {
    200
}

/// One HTTP path of an API widget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSpec {
    pub path: String,
    /// `GET`, `POST`, …, or `Any`.
    pub method: String,
    pub process: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(rename = "in", default)]
    pub input: Vec<InSpec>,
    #[serde(default)]
    pub out: OutSpec,
}

/// A declarative HTTP API document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiDefinition {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Mount prefix; derived from the widget id when empty.
    #[serde(default)]
    pub group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    #[serde(default)]
    pub paths: Vec<PathSpec>,
}

/// A loaded HTTP API.
pub struct ApiWidget {
    id: String,
    source: String,
    pub definition: ApiDefinition,
}

impl ApiWidget {
    pub fn new(id: impl Into<String>, source: impl Into<String>, definition: ApiDefinition) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            definition,
        }
    }
}

impl Widget for ApiWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Api
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
