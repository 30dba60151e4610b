//! Widget loading.
//!
//! One uniform contract for every kind: `load(kind, id, source)` where
//! `source` is either `file://<path>` or the inline document text. The
//! format is sniffed from the first non-whitespace byte (`{`/`[` → JSON,
//! anything else YAML); script sources are code and skip document parsing.
//!
//! After decoding the loader assigns defaults, substitutes `$ENV.NAME`
//! values on the declared string fields, validates the definition, and
//! registers the widget. `reload` re-reads the recorded source and keeps the
//! previous widget when the new load fails.

use std::sync::Arc;

use regex_lite::Regex;
use serde_json::Value;
use tracing::info;

use wicker_core::{
    FlowDefinition, FlowWidget, ModelDefinition, ModelWidget, ProcessError, ProcessResult,
    SharedWidget, StoreDefinition, StoreWidget, Widget, WidgetKind,
};
use wicker_plugin::PluginDefinition;
use wicker_transport::api::{ApiDefinition, ApiWidget};
use wicker_transport::http::validate_token;
use wicker_transport::socket::{SocketDefinition, SocketWidget};
use wicker_transport::ws::{WebSocketDefinition, WebSocketWidget};

use crate::crypt::{CryptDefinition, CryptWidget};
use crate::runtime::Runtime;
use crate::schedule::{ScheduleDefinition, ScheduleWidget};
use crate::task::{TaskDefinition, TaskWidget};

const HTTP_METHODS: [&str; 8] = [
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "ANY",
];

impl Runtime {
    /// Loads a widget from a `file://` path or inline text and registers it.
    pub async fn load(
        &self,
        kind: WidgetKind,
        id: &str,
        source: &str,
    ) -> ProcessResult<SharedWidget> {
        let text = resolve_source(source).await?;

        // Script sources are code, not documents.
        if kind == WidgetKind::Script {
            let widget = self
                .scripts()
                .load(self.kernel(), id, source, &text)
                .map_err(|err| load_error(kind, id, err))?;
            return Ok(widget as SharedWidget);
        }

        let mut document = parse_document(&text).map_err(|err| load_error(kind, id, err))?;
        substitute_env(kind, &mut document);

        let widget = self
            .build_widget(kind, id, source, document)
            .await
            .map_err(|err| load_error(kind, id, err))?;
        self.kernel().registry().register(widget.clone());
        info!(kind = %kind, widget = %id, "Widget loaded");
        Ok(widget)
    }

    /// Loads a widget from a file, deriving the id from the file stem.
    pub async fn load_file(&self, kind: WidgetKind, path: &str) -> ProcessResult<SharedWidget> {
        let stem = std::path::Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| ProcessError::load(format!("'{path}' has no file name")))?;
        // `user.http.json` style documents drop the kind suffix.
        let id = stem.split('.').next().unwrap_or(&stem).to_string();
        self.load(kind, &id, &format!("file://{path}")).await
    }

    /// Re-reads the original source; on failure the previous widget stays.
    pub async fn reload(&self, kind: WidgetKind, id: &str) -> ProcessResult<SharedWidget> {
        let widget = self.kernel().registry().select(kind, id)?;
        let source = widget.source().to_string();
        self.load(kind, id, &source).await
    }

    /// Removes a widget, stopping whatever it was running first.
    pub async fn unload(&self, kind: WidgetKind, id: &str) {
        let Some(widget) = self.kernel().registry().unload(kind, id) else {
            return;
        };
        match kind {
            WidgetKind::Plugin => {
                if let Ok(plugin) = widget.as_any().downcast::<wicker_plugin::PluginWidget>() {
                    plugin.client.kill().await;
                }
            }
            WidgetKind::Schedule => {
                if let Ok(schedule) = widget.as_any().downcast::<ScheduleWidget>() {
                    schedule.stop();
                }
            }
            WidgetKind::Task => {
                if let Ok(task) = widget.as_any().downcast::<TaskWidget>() {
                    task.stop();
                }
            }
            WidgetKind::Socket => {
                if let Ok(socket) = widget.as_any().downcast::<SocketWidget>() {
                    socket.stop();
                }
            }
            WidgetKind::WebSocket => {
                if let Ok(ws) = widget.as_any().downcast::<WebSocketWidget>() {
                    ws.hub.shutdown();
                }
            }
            _ => {}
        }
        info!(kind = %kind, widget = %id, "Widget unloaded");
    }

    async fn build_widget(
        &self,
        kind: WidgetKind,
        id: &str,
        source: &str,
        document: Value,
    ) -> ProcessResult<SharedWidget> {
        Ok(match kind {
            WidgetKind::Api => {
                let mut definition: ApiDefinition = decode(document)?;
                if definition.group.is_empty() {
                    definition.group = id.replace('.', "/");
                }
                validate_api(&definition)?;
                Arc::new(ApiWidget::new(id, source, definition))
            }
            WidgetKind::Flow => {
                let definition: FlowDefinition = decode(document)?;
                validate_flow(&definition)?;
                for (alias, script_source) in &definition.scripts {
                    let text = resolve_source(script_source).await?;
                    self.scripts().load(
                        self.kernel(),
                        &format!("flows.{}.{alias}", id.to_lowercase()),
                        script_source,
                        &text,
                    )?;
                }
                Arc::new(FlowWidget::new(id, source, definition))
            }
            WidgetKind::Model => {
                let definition: ModelDefinition = decode(document)?;
                Arc::new(ModelWidget::new(id, source, definition))
            }
            WidgetKind::Store => {
                let definition: StoreDefinition = decode(document)?;
                let store = self.store_factories().build(&definition)?;
                Arc::new(StoreWidget::new(id, source, definition, store))
            }
            WidgetKind::Plugin => {
                let definition: PluginDefinition = decode(document)?;
                return wicker_plugin::load_plugin(self.kernel(), id, source, definition)
                    .await
                    .map(|widget| widget as SharedWidget);
            }
            WidgetKind::Socket => {
                let definition: SocketDefinition = decode(document)?;
                Arc::new(SocketWidget::new(id, source, definition))
            }
            WidgetKind::WebSocket => {
                let definition: WebSocketDefinition = decode(document)?;
                if definition.process.is_empty() {
                    return Err(ProcessError::load("websocket needs a process"));
                }
                Arc::new(WebSocketWidget::new(id, source, definition))
            }
            WidgetKind::Schedule => {
                let definition: ScheduleDefinition = decode(document)?;
                definition.validate()?;
                Arc::new(ScheduleWidget::new(id, source, definition))
            }
            WidgetKind::Task => {
                let definition: TaskDefinition = decode(document)?;
                if definition.process.is_empty() {
                    return Err(ProcessError::load("task needs a process"));
                }
                Arc::new(TaskWidget::new(id, source, definition))
            }
            WidgetKind::Crypt => {
                let definition: CryptDefinition = decode(document)?;
                Arc::new(CryptWidget::new(id, source, definition))
            }
            WidgetKind::Script => unreachable!("scripts are loaded before document parsing"),
        })
    }
}

/// `file://<path>` opens the file; anything else is the document itself.
async fn resolve_source(source: &str) -> ProcessResult<String> {
    match source.strip_prefix("file://") {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProcessError::load(format!("cannot read '{path}': {e}"))),
        None => Ok(source.to_string()),
    }
}

/// Sniffs JSON vs YAML from the first non-whitespace byte.
fn parse_document(text: &str) -> ProcessResult<Value> {
    let first = text.trim_start().bytes().next().unwrap_or(b' ');
    if first == b'{' || first == b'[' {
        serde_json::from_str(text).map_err(|e| ProcessError::load(format!("invalid JSON: {e}")))
    } else {
        serde_yaml::from_str(text).map_err(|e| ProcessError::load(format!("invalid YAML: {e}")))
    }
}

fn decode<T: serde::de::DeserializeOwned>(document: Value) -> ProcessResult<T> {
    serde_json::from_value(document)
        .map_err(|e| ProcessError::load(format!("invalid definition: {e}")))
}

fn load_error(kind: WidgetKind, id: &str, err: ProcessError) -> ProcessError {
    if err.kind == wicker_core::ErrorKind::Load {
        err.with_context(serde_json::json!({ "kind": kind.name(), "widget": id }))
    } else {
        err
    }
}

/// Replaces whole-string `$ENV.NAME` values on the declared fields of each
/// kind (store options, socket host/port, plugin command). Nested values
/// elsewhere are left untouched to avoid accidental capture.
fn substitute_env(kind: WidgetKind, document: &mut Value) {
    let fields: &[&str] = match kind {
        WidgetKind::Store => &["option"],
        WidgetKind::Socket => &["host", "port"],
        WidgetKind::Plugin => &["cmd"],
        _ => return,
    };
    let Some(map) = document.as_object_mut() else {
        return;
    };
    let re = Regex::new(r"^\$ENV\.([A-Za-z_][A-Za-z0-9_]*)$").expect("static regex");
    let substitute = |text: &mut String| {
        let name = re
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        if let Some(name) = name {
            *text = std::env::var(&name).unwrap_or_default();
        }
    };
    for field in fields {
        match map.get_mut(*field) {
            Some(Value::String(text)) => substitute(text),
            Some(Value::Object(section)) => {
                for value in section.values_mut() {
                    if let Value::String(text) = value {
                        substitute(text);
                    }
                }
            }
            _ => {}
        }
    }
}

fn validate_api(definition: &ApiDefinition) -> ProcessResult<()> {
    let mut seen = std::collections::HashSet::new();
    for path in &definition.paths {
        let method = path.method.to_uppercase();
        if !HTTP_METHODS.contains(&method.as_str()) {
            return Err(ProcessError::load(format!(
                "path '{}' has unsupported method '{}'",
                path.path, path.method
            )));
        }
        if !seen.insert((method, path.path.clone())) {
            return Err(ProcessError::load(format!(
                "duplicate path {} {}",
                path.method, path.path
            )));
        }
        if path.process.is_empty() {
            return Err(ProcessError::load(format!(
                "path '{}' needs a process",
                path.path
            )));
        }
        for input in &path.input {
            if !validate_token(input.token()) {
                return Err(ProcessError::load(format!(
                    "path '{}' has unknown input token '{}'",
                    path.path,
                    input.token()
                )));
            }
        }
    }
    Ok(())
}

fn validate_flow(definition: &FlowDefinition) -> ProcessResult<()> {
    let mut seen = std::collections::HashSet::new();
    for node in &definition.nodes {
        if node.name.is_empty() {
            return Err(ProcessError::load("flow node needs a name"));
        }
        if !seen.insert(node.name.to_lowercase()) {
            return Err(ProcessError::load(format!(
                "duplicate flow node '{}'",
                node.name
            )));
        }
    }
    Ok(())
}
