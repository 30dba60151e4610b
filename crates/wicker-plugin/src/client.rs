//! Plugin subprocess client.
//!
//! Each plugin is a long-lived child process speaking newline-delimited JSON
//! over stdio. On launch the plugin announces itself with a handshake line
//! `{"wicker": 1, "name": …}`; afterwards the host sends
//! `{"id", "method", "args"}` requests and reads `{"id", "result"}` /
//! `{"id", "error"}` responses. Calls serialise on the client.
//!
//! State machine:
//!
//! ```text
//! Idle → Launching → Running → Exited → (Idle via relaunch)
//!                      ↓
//!                   Killing
//! ```
//!
//! An exited process is relaunched transparently on the next call using the
//! original command.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use wicker_core::{ProcessError, ProcessResult};

/// Protocol version expected in the handshake line.
pub const PROTOCOL_VERSION: u64 = 1;

/// Spawn retry budget, and how long the plugin gets to hand-shake.
const MAX_SPAWN_ATTEMPTS: usize = 3;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// How a plugin process is started.
///
/// The command is argv-split by default; `shell` opts into `sh -c` execution
/// and must be enabled explicitly in the plugin definition.
#[derive(Debug, Clone)]
pub struct PluginCommand {
    pub cmd: String,
    pub args: Vec<String>,
    pub shell: bool,
}

impl PluginCommand {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            args: Vec::new(),
            shell: false,
        }
    }

    fn build(&self) -> ProcessResult<Command> {
        if self.shell {
            let mut command = Command::new("sh");
            command.arg("-c").arg(&self.cmd);
            return Ok(command);
        }
        let mut parts = self.cmd.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| ProcessError::plugin("plugin command is empty"))?;
        let mut command = Command::new(program);
        command.args(parts).args(&self.args);
        Ok(command)
    }
}

/// Lifecycle states of a plugin subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginState {
    Idle,
    Launching,
    Running,
    Exited,
    Killing,
}

#[derive(Debug, Deserialize)]
struct Handshake {
    wicker: u64,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    id: u64,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

struct LiveProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

struct ClientInner {
    state: PluginState,
    live: Option<LiveProcess>,
    next_id: u64,
}

/// Serialised RPC client owning one plugin subprocess.
pub struct PluginClient {
    name: String,
    command: PluginCommand,
    inner: Mutex<ClientInner>,
}

impl PluginClient {
    pub fn new(name: impl Into<String>, command: PluginCommand) -> Self {
        Self {
            name: name.into(),
            command,
            inner: Mutex::new(ClientInner {
                state: PluginState::Idle,
                live: None,
                next_id: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state (exit detection included).
    pub async fn state(&self) -> PluginState {
        let mut inner = self.inner.lock().await;
        refresh_exit(&mut inner);
        inner.state
    }

    /// True when the subprocess is gone (never launched, exited, or killed).
    pub async fn exited(&self) -> bool {
        !matches!(self.state().await, PluginState::Running)
    }

    /// Ensures a live subprocess, launching or relaunching as needed.
    pub async fn ensure_running(&self) -> ProcessResult<()> {
        let mut inner = self.inner.lock().await;
        self.ensure_running_locked(&mut inner).await
    }

    async fn ensure_running_locked(&self, inner: &mut ClientInner) -> ProcessResult<()> {
        refresh_exit(inner);
        if inner.state == PluginState::Running {
            return Ok(());
        }

        inner.state = PluginState::Launching;
        inner.live = None;
        let mut last_error = None;
        for attempt in 1..=MAX_SPAWN_ATTEMPTS {
            match self.launch_once().await {
                Ok(live) => {
                    inner.live = Some(live);
                    inner.state = PluginState::Running;
                    info!(plugin = %self.name, attempt, "Plugin launched");
                    return Ok(());
                }
                Err(err) => {
                    warn!(plugin = %self.name, attempt, error = %err.message, "Plugin launch failed");
                    last_error = Some(err);
                }
            }
        }
        inner.state = PluginState::Exited;
        Err(last_error
            .unwrap_or_else(|| ProcessError::plugin(format!("plugin '{}' failed to launch", self.name))))
    }

    async fn launch_once(&self) -> ProcessResult<LiveProcess> {
        let mut command = self.command.build()?;
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        let mut child = command
            .spawn()
            .map_err(|e| ProcessError::plugin(format!("plugin '{}' spawn failed: {e}", self.name)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::plugin("plugin stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::plugin("plugin stdout unavailable"))?;
        let mut stdout = BufReader::new(stdout);

        // The plugin speaks first: a single handshake line.
        let mut line = String::new();
        let read = timeout(HANDSHAKE_TIMEOUT, stdout.read_line(&mut line)).await;
        let ok = match read {
            Ok(Ok(n)) if n > 0 => serde_json::from_str::<Handshake>(line.trim())
                .ok()
                .filter(|h| h.wicker == PROTOCOL_VERSION),
            _ => None,
        };
        match ok {
            Some(handshake) => {
                debug!(plugin = %self.name, announced = %handshake.name, "Plugin handshake complete");
                Ok(LiveProcess {
                    child,
                    stdin,
                    stdout,
                })
            }
            None => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                Err(ProcessError::plugin(format!(
                    "plugin '{}' handshake failed",
                    self.name
                )))
            }
        }
    }

    /// Round-trips one RPC call, relaunching the subprocess if it exited.
    pub async fn exec(
        &self,
        method: &str,
        args: &[Value],
        call_timeout: Duration,
    ) -> ProcessResult<Value> {
        let mut inner = self.inner.lock().await;
        self.ensure_running_locked(&mut inner).await?;

        inner.next_id += 1;
        let id = inner.next_id;
        let request = json!({ "id": id, "method": method, "args": args });
        let live = inner.live.as_mut().expect("running implies live");

        let round_trip = async {
            let mut payload = request.to_string();
            payload.push('\n');
            live.stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|e| ProcessError::plugin(format!("plugin write failed: {e}")))?;
            live.stdin
                .flush()
                .await
                .map_err(|e| ProcessError::plugin(format!("plugin write failed: {e}")))?;

            let mut line = String::new();
            let n = live
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| ProcessError::plugin(format!("plugin read failed: {e}")))?;
            if n == 0 {
                return Err(ProcessError::plugin("plugin closed its stdout"));
            }
            serde_json::from_str::<RpcResponse>(line.trim())
                .map_err(|e| ProcessError::plugin(format!("plugin response malformed: {e}")))
        };

        let outcome = timeout(call_timeout, round_trip).await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                // Transport failure: the stream is unusable, force relaunch.
                self.teardown(&mut inner).await;
                return Err(err);
            }
            Err(_) => {
                // A late response would poison the stream; kill to resync.
                self.teardown(&mut inner).await;
                return Err(ProcessError::timeout(format!(
                    "plugin '{}' call '{method}' timed out",
                    self.name
                )));
            }
        };

        if response.id != id {
            self.teardown(&mut inner).await;
            return Err(ProcessError::plugin(format!(
                "plugin '{}' answered out of order",
                self.name
            )));
        }
        match response.error {
            Some(message) => Err(ProcessError::plugin(message)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    /// Kills the subprocess; the next call relaunches it.
    pub async fn kill(&self) {
        let mut inner = self.inner.lock().await;
        self.teardown(&mut inner).await;
    }

    async fn teardown(&self, inner: &mut ClientInner) {
        if let Some(mut live) = inner.live.take() {
            inner.state = PluginState::Killing;
            let _ = live.child.start_kill();
            let _ = live.child.wait().await;
            debug!(plugin = %self.name, "Plugin process killed");
        }
        inner.state = PluginState::Exited;
    }
}

/// Detects a silently exited child and downgrades the state.
fn refresh_exit(inner: &mut ClientInner) {
    if inner.state == PluginState::Running
        && let Some(live) = inner.live.as_mut()
        && matches!(live.child.try_wait(), Ok(Some(_)) | Err(_))
    {
        inner.live = None;
        inner.state = PluginState::Exited;
    }
}
