//! Plugin widget and host operations.
//!
//! Plugins live in the widget registry like every other kind; their payload
//! is the [`PluginClient`] owning the subprocess. `load` kills any previous
//! process registered under the same name, `select` transparently relaunches
//! an exited plugin before returning, and `kill_all` is invoked by the
//! orchestrator during shutdown.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use wicker_core::kernel::handler;
use wicker_core::{HandlerGroup, Kernel, Process, ProcessResult, Widget, WidgetKind};

use crate::client::{PluginClient, PluginCommand};

/// Default per-call RPC timeout, overridable per definition.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// A declarative plugin document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginDefinition {
    pub name: String,
    /// Launch command; argv-split unless `shell` is set.
    pub cmd: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Explicit opt-in to `sh -c` execution.
    #[serde(default)]
    pub shell: bool,
    /// Per-call timeout in seconds; 0 uses the default.
    #[serde(default)]
    pub timeout: u64,
}

impl PluginDefinition {
    fn call_timeout(&self) -> Duration {
        if self.timeout == 0 {
            DEFAULT_CALL_TIMEOUT
        } else {
            Duration::from_secs(self.timeout)
        }
    }
}

/// A loaded plugin: definition plus the live subprocess client.
pub struct PluginWidget {
    id: String,
    source: String,
    pub definition: PluginDefinition,
    pub client: PluginClient,
}

impl PluginWidget {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        definition: PluginDefinition,
    ) -> Self {
        let id = id.into();
        let command = PluginCommand {
            cmd: definition.cmd.clone(),
            args: definition.args.clone(),
            shell: definition.shell,
        };
        Self {
            client: PluginClient::new(id.clone(), command),
            id,
            source: source.into(),
            definition,
        }
    }

    /// Dispatches one RPC call to the subprocess.
    pub async fn exec(&self, method: &str, args: &[Value]) -> ProcessResult<Value> {
        self.client
            .exec(method, args, self.definition.call_timeout())
            .await
    }
}

impl Widget for PluginWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Plugin
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

/// Launches a plugin and registers it, killing any previous process under
/// the same name.
pub async fn load_plugin(
    kernel: &Arc<Kernel>,
    id: &str,
    source: &str,
    definition: PluginDefinition,
) -> ProcessResult<Arc<PluginWidget>> {
    if let Ok(previous) = kernel
        .registry()
        .select_as::<PluginWidget>(WidgetKind::Plugin, id)
    {
        previous.client.kill().await;
    }

    let widget = Arc::new(PluginWidget::new(id, source, definition));
    widget.client.ensure_running().await?;
    kernel.registry().register(widget.clone());
    info!(plugin = %id, "Plugin loaded");
    Ok(widget)
}

/// Selects a plugin, relaunching its subprocess first when it has exited.
pub async fn select_plugin(kernel: &Arc<Kernel>, id: &str) -> ProcessResult<Arc<PluginWidget>> {
    let widget: Arc<PluginWidget> = kernel.registry().select_as(WidgetKind::Plugin, id)?;
    widget.client.ensure_running().await?;
    Ok(widget)
}

/// Kills every non-exited plugin subprocess. Called at shutdown.
pub async fn kill_all(kernel: &Arc<Kernel>) {
    for widget in kernel.registry().widgets(WidgetKind::Plugin) {
        if let Ok(plugin) = widget.as_any().downcast::<PluginWidget>() {
            if !plugin.client.exited().await {
                info!(plugin = %plugin.id, "Killing plugin");
                plugin.client.kill().await;
            }
        }
    }
}

/// Installs the `plugins` handler group: `plugins.<name>.<method>` dispatches
/// the method over RPC to the plugin subprocess.
pub fn install(kernel: &Arc<Kernel>) {
    let group = HandlerGroup::new().with_wildcard(handler(|p: Process| async move {
        let plugin = select_plugin(p.kernel(), p.class()).await?;
        plugin.exec(p.method(), p.args()).await
    }));
    kernel.register_group("plugins", group);
}
