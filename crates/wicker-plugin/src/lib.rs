//! # Wicker Plugin
//!
//! The out-of-process plugin host of the Wicker application runtime.
//!
//! A plugin is a long-lived subprocess speaking newline-delimited JSON over
//! stdio (handshake line, then `{id, method, args}` / `{id, result|error}`
//! frames). The host owns the full lifecycle: launch with retry, exit
//! detection, transparent relaunch on the next use, and kill-on-shutdown.
//! `plugins.<name>.<method>` process names dispatch RPC calls to the
//! subprocess.
//!
//! Commands are argv-split by default; `shell: true` in the plugin
//! definition is the explicit opt-in for `sh -c` execution.

mod client;
mod host;

pub use client::{PROTOCOL_VERSION, PluginClient, PluginCommand, PluginState};
pub use host::{
    DEFAULT_CALL_TIMEOUT, PluginDefinition, PluginWidget, install, kill_all, load_plugin,
    select_plugin,
};
