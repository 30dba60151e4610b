//! Background task queues.
//!
//! A task widget owns a bounded queue and a pool of worker consumers; each
//! job runs the configured process. `tasks.<id>.push` enqueues and returns a
//! job id, `tasks.<id>.get` returns the full progress record,
//! `tasks.<id>.progress` just the status
//! (`queued | running | done | failed`).

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use wicker_core::kernel::handler;
use wicker_core::{
    HandlerGroup, Kernel, Process, ProcessError, ProcessResult, Widget, WidgetKind,
};

/// A declarative task document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    /// Process run per job.
    pub process: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(rename = "queueSize", default = "default_queue_size")]
    pub queue_size: usize,
    /// Per-job timeout in seconds; 0 disables.
    #[serde(default)]
    pub timeout: u64,
}

fn default_workers() -> usize {
    1
}

fn default_queue_size() -> usize {
    1024
}

/// One job's progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub id: String,
    pub status: String,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Job {
    id: String,
    args: Vec<Value>,
}

/// A loaded task queue.
pub struct TaskWidget {
    id: String,
    source: String,
    pub definition: TaskDefinition,
    sender: mpsc::Sender<Job>,
    receiver: Mutex<Option<mpsc::Receiver<Job>>>,
    progress: DashMap<String, TaskProgress>,
    running: Mutex<Option<CancellationToken>>,
}

impl TaskWidget {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        definition: TaskDefinition,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(definition.queue_size.max(1));
        Self {
            id: id.into(),
            source: source.into(),
            definition,
            sender,
            receiver: Mutex::new(Some(receiver)),
            progress: DashMap::new(),
            running: Mutex::new(None),
        }
    }

    /// Enqueues a job; fails when the queue is full. Jobs enqueued before
    /// the workers start stay queued until the orchestrator starts them.
    pub fn push(&self, args: Vec<Value>) -> ProcessResult<String> {
        let id = Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            args,
        };
        self.progress.insert(
            id.clone(),
            TaskProgress {
                id: id.clone(),
                status: "queued".to_string(),
                created_at: now(),
                started_at: None,
                finished_at: None,
                result: None,
                error: None,
            },
        );
        self.sender.try_send(job).map_err(|_| {
            self.progress.remove(&id);
            ProcessError::internal(format!("task '{}' queue is full", self.id))
        })?;
        debug!(task = %self.id, job = %id, "Job enqueued");
        Ok(id)
    }

    /// Full progress record for a job id.
    pub fn get(&self, job_id: &str) -> ProcessResult<TaskProgress> {
        self.progress
            .get(job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ProcessError::not_found(format!("task '{}' has no job '{job_id}'", self.id))
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Stops the workers; queued jobs stay queued for the next start.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(token) => {
                token.cancel();
                info!(task = %self.id, "Task workers stopped");
                true
            }
            None => false,
        }
    }

    fn update<F: FnOnce(&mut TaskProgress)>(&self, job_id: &str, apply: F) {
        if let Some(mut entry) = self.progress.get_mut(job_id) {
            apply(entry.value_mut());
        }
    }
}

impl Widget for TaskWidget {
    fn kind(&self) -> WidgetKind {
        WidgetKind::Task
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

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Starts the worker pool; `false` when already running.
pub fn start(kernel: &Arc<Kernel>, widget: &Arc<TaskWidget>) -> bool {
    let token = {
        let mut running = widget.running.lock();
        if running.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        *running = Some(token.clone());
        token
    };
    let Some(receiver) = widget.receiver.lock().take() else {
        return false;
    };
    let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

    info!(task = %widget.id(), workers = widget.definition.workers, "Task workers started");
    for worker in 0..widget.definition.workers.max(1) {
        let kernel = Arc::clone(kernel);
        let widget = Arc::clone(widget);
        let receiver = Arc::clone(&receiver);
        let token = token.clone();
        tokio::spawn(async move { worker_loop(kernel, widget, receiver, token, worker).await });
    }
    true
}

/// Starts every loaded task widget.
pub fn start_all(kernel: &Arc<Kernel>) {
    for widget in kernel.registry().widgets(WidgetKind::Task) {
        if let Ok(task) = widget.as_any().downcast::<TaskWidget>() {
            start(kernel, &task);
        }
    }
}

/// Stops every running task widget.
pub fn stop_all(kernel: &Arc<Kernel>) {
    for widget in kernel.registry().widgets(WidgetKind::Task) {
        if let Ok(task) = widget.as_any().downcast::<TaskWidget>() {
            task.stop();
        }
    }
}

async fn worker_loop(
    kernel: Arc<Kernel>,
    widget: Arc<TaskWidget>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    cancel: CancellationToken,
    worker: usize,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                job = receiver.recv() => job,
                _ = cancel.cancelled() => break,
            }
        };
        let Some(job) = job else { break };
        debug!(task = %widget.id(), worker, job = %job.id, "Job started");
        widget.update(&job.id, |progress| {
            progress.status = "running".to_string();
            progress.started_at = Some(now());
        });

        let run = async {
            kernel
                .process(&widget.definition.process, job.args.clone())?
                .with_cancel(cancel.clone())
                .exec()
                .await
        };
        let result = if widget.definition.timeout > 0 {
            match tokio::time::timeout(Duration::from_secs(widget.definition.timeout), run).await {
                Ok(result) => result,
                Err(_) => Err(ProcessError::timeout(format!(
                    "task '{}' job timed out",
                    widget.id()
                ))),
            }
        } else {
            run.await
        };

        match result {
            Ok(value) => widget.update(&job.id, |progress| {
                progress.status = "done".to_string();
                progress.finished_at = Some(now());
                progress.result = Some(value);
            }),
            Err(err) => {
                warn!(task = %widget.id(), job = %job.id, error = %err.message, "Job failed");
                widget.update(&job.id, |progress| {
                    progress.status = "failed".to_string();
                    progress.finished_at = Some(now());
                    progress.error = Some(err.message.clone());
                });
            }
        }
    }
}

/// Installs the `tasks` handler group (`push`, `get`, `progress`).
pub fn install(kernel: &Arc<Kernel>) {
    let group = HandlerGroup::new()
        .with(
            "push",
            handler(move |p: Process| async move {
                let widget: Arc<TaskWidget> =
                    p.kernel().registry().select_as(WidgetKind::Task, p.class())?;
                let id = widget.push(p.args().to_vec())?;
                Ok(Value::from(id))
            }),
        )
        .with(
            "get",
            handler(move |p: Process| async move {
                let widget: Arc<TaskWidget> =
                    p.kernel().registry().select_as(WidgetKind::Task, p.class())?;
                let progress = widget.get(&p.arg_string(0)?)?;
                Ok(serde_json::to_value(progress)?)
            }),
        )
        .with(
            "progress",
            handler(move |p: Process| async move {
                let widget: Arc<TaskWidget> =
                    p.kernel().registry().select_as(WidgetKind::Task, p.class())?;
                let progress = widget.get(&p.arg_string(0)?)?;
                Ok(Value::from(progress.status))
            }),
        );
    kernel.register_group("tasks", group);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task_widget(process: &str, timeout: u64) -> Arc<TaskWidget> {
        Arc::new(TaskWidget::new(
            "import",
            "inline",
            TaskDefinition {
                name: "import".to_string(),
                process: process.to_string(),
                workers: 2,
                queue_size: 8,
                timeout,
            },
        ))
    }

    async fn wait_status(widget: &Arc<TaskWidget>, job: &str, expect: &str) {
        for _ in 0..100 {
            if widget.get(job).unwrap().status == expect {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!(
            "job {job} never reached '{expect}', last status {}",
            widget.get(job).unwrap().status
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_push_run_get() {
        let kernel = Kernel::new();
        kernel.register_handler(
            "jobs.double.run",
            handler(|p: Process| async move { Ok(json!(p.arg_int(0)? * 2)) }),
        );
        let widget = task_widget("jobs.double.run", 0);
        kernel.registry().register(widget.clone());
        start(&kernel, &widget);

        let id = kernel
            .process("tasks.import.push", vec![json!(21)])
            .unwrap()
            .exec()
            .await
            .unwrap();
        let id = id.as_str().unwrap().to_string();

        wait_status(&widget, &id, "done").await;
        let record = kernel
            .process("tasks.import.get", vec![json!(id)])
            .unwrap()
            .exec()
            .await
            .unwrap();
        assert_eq!(record["result"], json!(42));
        assert_eq!(record["status"], json!("done"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_job_records_error() {
        let kernel = Kernel::new();
        kernel.register_handler(
            "jobs.explode.run",
            handler(|_p| async { Err(ProcessError::argument("boom")) }),
        );
        let widget = task_widget("jobs.explode.run", 0);
        kernel.registry().register(widget.clone());
        start(&kernel, &widget);

        let id = widget.push(vec![]).unwrap();
        wait_status(&widget, &id, "failed").await;
        assert_eq!(widget.get(&id).unwrap().error.as_deref(), Some("boom"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_timeout_marks_job_failed() {
        let kernel = Kernel::new();
        kernel.register_handler(
            "jobs.slow.run",
            handler(|_p| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }),
        );
        let widget = task_widget("jobs.slow.run", 1);
        kernel.registry().register(widget.clone());
        start(&kernel, &widget);

        let id = widget.push(vec![]).unwrap();
        wait_status(&widget, &id, "failed").await;
        assert!(widget.get(&id).unwrap().error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_queue_full() {
        let widget = Arc::new(TaskWidget::new(
            "tiny",
            "inline",
            TaskDefinition {
                name: "tiny".to_string(),
                process: "x.y.z".to_string(),
                workers: 1,
                queue_size: 1,
                timeout: 0,
            },
        ));
        assert!(widget.push(vec![]).is_ok());
        let err = widget.push(vec![]).unwrap_err();
        assert!(err.message.contains("queue is full"));
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let widget = task_widget("x.y.z", 0);
        let err = widget.get("nope").unwrap_err();
        assert_eq!(err.kind, wicker_core::ErrorKind::HandlerNotFound);
    }
}
