//! Cron schedules.
//!
//! A schedule widget runs a process (or enqueues a task) on a cron
//! expression with seconds granularity. `schedules.<id>.start` and
//! `schedules.<id>.stop` control it at runtime; the orchestrator starts
//! every loaded schedule at boot and stops them during shutdown.

use std::any::Any;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use wicker_core::kernel::handler;
use wicker_core::{
    HandlerGroup, Kernel, Process, ProcessError, ProcessResult, Widget, WidgetKind,
};

/// A declarative schedule document. One of `process` or `task` is required.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleDefinition {
    pub name: String,
    /// Cron expression with seconds field (e.g. `"*/5 * * * * *"`).
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,
    /// Task widget id to enqueue instead of running a process directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl ScheduleDefinition {
    pub fn validate(&self) -> ProcessResult<()> {
        cron::Schedule::from_str(&self.schedule).map_err(|e| {
            ProcessError::load(format!(
                "schedule '{}' has an invalid cron expression: {e}",
                self.name
            ))
        })?;
        if self.process.is_none() && self.task.is_none() {
            return Err(ProcessError::load(format!(
                "schedule '{}' needs a process or a task",
                self.name
            )));
        }
        Ok(())
    }
}

/// A loaded schedule.
pub struct ScheduleWidget {
    id: String,
    source: String,
    pub definition: ScheduleDefinition,
    running: Mutex<Option<CancellationToken>>,
}

impl ScheduleWidget {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        definition: ScheduleDefinition,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            definition,
            running: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Stops the cron loop; `false` when it was not running.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(token) => {
                token.cancel();
                info!(schedule = %self.id, "Schedule stopped");
                true
            }
            None => false,
        }
    }
}

impl Widget for ScheduleWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Schedule
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

/// Starts the cron loop; `false` when already running.
pub fn start(kernel: &Arc<Kernel>, widget: &Arc<ScheduleWidget>) -> ProcessResult<bool> {
    let schedule = cron::Schedule::from_str(&widget.definition.schedule).map_err(|e| {
        ProcessError::load(format!(
            "schedule '{}' has an invalid cron expression: {e}",
            widget.id()
        ))
    })?;
    let token = {
        let mut running = widget.running.lock();
        if running.is_some() {
            return Ok(false);
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());
        token
    };

    info!(schedule = %widget.id(), cron = %widget.definition.schedule, "Schedule started");
    let kernel = Arc::clone(kernel);
    let widget = Arc::clone(widget);
    tokio::spawn(async move { run_cron(kernel, widget, schedule, token).await });
    Ok(true)
}

/// Starts every loaded schedule.
pub fn start_all(kernel: &Arc<Kernel>) -> ProcessResult<()> {
    for widget in kernel.registry().widgets(WidgetKind::Schedule) {
        if let Ok(schedule) = widget.as_any().downcast::<ScheduleWidget>() {
            start(kernel, &schedule)?;
        }
    }
    Ok(())
}

/// Stops every running schedule.
pub fn stop_all(kernel: &Arc<Kernel>) {
    for widget in kernel.registry().widgets(WidgetKind::Schedule) {
        if let Ok(schedule) = widget.as_any().downcast::<ScheduleWidget>() {
            schedule.stop();
        }
    }
}

async fn run_cron(
    kernel: Arc<Kernel>,
    widget: Arc<ScheduleWidget>,
    schedule: cron::Schedule,
    cancel: CancellationToken,
) {
    loop {
        let now = chrono::Utc::now();
        let Some(next) = schedule.upcoming(chrono::Utc).next() else {
            warn!(schedule = %widget.id(), "No more upcoming cron executions");
            break;
        };
        let until = (next - now).to_std().unwrap_or(Duration::from_secs(1));

        tokio::select! {
            _ = tokio::time::sleep(until) => {
                debug!(schedule = %widget.id(), "Schedule tick");
                tick(&kernel, &widget).await;
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn tick(kernel: &Arc<Kernel>, widget: &Arc<ScheduleWidget>) {
    let definition = &widget.definition;
    let target = match (&definition.process, &definition.task) {
        (Some(process), _) => process.clone(),
        (None, Some(task)) => format!("tasks.{task}.push"),
        (None, None) => return,
    };
    let result = match kernel.process(&target, definition.args.clone()) {
        Ok(process) => process.exec().await,
        Err(err) => Err(err),
    };
    if let Err(err) = result {
        error!(schedule = %widget.id(), process = %target, error = %err.message, "Schedule tick failed");
    }
}

/// Installs the `schedules` handler group (`start`, `stop`).
pub fn install(kernel: &Arc<Kernel>) {
    let group = HandlerGroup::new()
        .with(
            "start",
            handler(|p: Process| async move {
                let widget: Arc<ScheduleWidget> = p
                    .kernel()
                    .registry()
                    .select_as(WidgetKind::Schedule, p.class())?;
                let started = start(p.kernel(), &widget)?;
                Ok(Value::Bool(started))
            }),
        )
        .with(
            "stop",
            handler(|p: Process| async move {
                let widget: Arc<ScheduleWidget> = p
                    .kernel()
                    .registry()
                    .select_as(WidgetKind::Schedule, p.class())?;
                Ok(Value::Bool(widget.stop()))
            }),
        );
    kernel.register_group("schedules", group);
}
