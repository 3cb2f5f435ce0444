//! In-memory task registry and scheduler
//!
//! Owns every task created in this process. `start` binds exactly one
//! supervised worker to a pending task; `stop` signals it and waits until
//! the worker has cancelled its orders and written its last log line.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};

use super::model::{new_task_id, TaskConfig, TaskId, TaskStatus, TaskView};
use super::worker::{self, StrategyContext, WorkerExit};
use crate::alerts::AlertClient;
use crate::config::EngineSettings;
use crate::error::TaskError;
use crate::exchange::ExchangeClient;
use crate::strategies::build_strategy;
use crate::task_log::{LogOrder, TaskLog};
use crate::token_store::TokenStore;
use crate::trade_db::TradeLedger;

/// Handles to a live worker
struct Control {
    cancel: watch::Sender<bool>,
    done: watch::Receiver<bool>,
}

struct TaskState {
    status: TaskStatus,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    error: Option<String>,
    control: Option<Control>,
}

struct TaskEntry {
    id: TaskId,
    config: TaskConfig,
    created_at: DateTime<Utc>,
    log: Arc<TaskLog>,
    state: Mutex<TaskState>,
}

impl TaskEntry {
    fn view(&self) -> TaskView {
        let state = self.state.lock();
        TaskView {
            id: self.id.clone(),
            config: self.config.clone(),
            status: state.status,
            created_at: self.created_at,
            started_at: state.started_at,
            stopped_at: state.stopped_at,
            error: state.error.clone(),
            log_count: self.log.len(),
        }
    }
}

struct Inner {
    tasks: DashMap<TaskId, Arc<TaskEntry>>,
    exchange: Arc<dyn ExchangeClient>,
    tokens: Arc<TokenStore>,
    ledger: Arc<TradeLedger>,
    settings: EngineSettings,
    alerts: AlertClient,
}

#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Inner>,
}

impl TaskRegistry {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        tokens: Arc<TokenStore>,
        ledger: Arc<TradeLedger>,
        settings: EngineSettings,
        alerts: AlertClient,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                tasks: DashMap::new(),
                exchange,
                tokens,
                ledger,
                settings,
                alerts,
            }),
        }
    }

    pub fn exchange(&self) -> Arc<dyn ExchangeClient> {
        self.inner.exchange.clone()
    }

    pub fn tokens(&self) -> Arc<TokenStore> {
        self.inner.tokens.clone()
    }

    pub fn ledger(&self) -> Arc<TradeLedger> {
        self.inner.ledger.clone()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.inner.settings
    }

    fn entry(&self, id: &str) -> Result<Arc<TaskEntry>, TaskError> {
        self.inner
            .tasks
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| TaskError::NotFound(id.to_string()))
    }

    fn archive(&self, view: &TaskView) {
        if let Err(e) = self.inner.ledger.save_task(view) {
            warn!("Failed to archive task {}: {}", view.id, e);
        }
    }

    /// Register a validated task in `pending`
    pub fn create(&self, config: TaskConfig) -> Result<TaskView, TaskError> {
        config.validate()?;

        let id = new_task_id();
        let entry = Arc::new(TaskEntry {
            id: id.clone(),
            log: Arc::new(TaskLog::new(id.clone(), self.inner.settings.log_capacity)),
            config,
            created_at: Utc::now(),
            state: Mutex::new(TaskState {
                status: TaskStatus::Pending,
                started_at: None,
                stopped_at: None,
                error: None,
                control: None,
            }),
        });

        let view = entry.view();
        self.inner.tasks.insert(id.clone(), entry);
        self.archive(&view);
        info!("📝 Created task {} ({})", id, view.config.kind().as_str());
        Ok(view)
    }

    /// Spawn the task's worker; only valid from `pending`
    pub fn start(&self, id: &str) -> Result<TaskView, TaskError> {
        let entry = self.entry(id)?;
        let interval = entry.config.interval()?;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);

        {
            let mut state = entry.state.lock();
            if state.status != TaskStatus::Pending {
                return Err(TaskError::InvalidTransition {
                    from: state.status,
                    action: "start",
                });
            }
            state.status = TaskStatus::Running;
            state.started_at = Some(Utc::now());
            state.control = Some(Control {
                cancel: cancel_tx,
                done: done_rx,
            });
        }

        let inner = &self.inner;
        let ctx = StrategyContext::new(
            entry.id.clone(),
            inner.exchange.clone(),
            inner.tokens.clone(),
            inner.ledger.clone(),
            entry.log.clone(),
            inner.settings.clone(),
            cancel_rx,
        );
        let strategy = build_strategy(&entry.config);
        let worker = tokio::spawn(worker::run(strategy, ctx, interval));

        let registry = self.clone();
        let supervised = entry.clone();
        tokio::spawn(async move {
            let exit = match worker.await {
                Ok(exit) => exit,
                Err(e) => {
                    supervised.log.error(format!("❌ Worker crashed: {}", e));
                    WorkerExit::Failed(format!("worker crashed: {}", e))
                }
            };
            registry.finish(&supervised, exit, done_tx).await;
        });

        let view = entry.view();
        self.archive(&view);
        info!("▶️ Started task {}", id);

        let alerts = inner.alerts.clone();
        let kind = entry.config.kind();
        let task_id = entry.id.clone();
        let dry_run = inner.settings.dry_run;
        tokio::spawn(async move { alerts.task_started(&task_id, kind, dry_run).await });

        Ok(view)
    }

    /// Apply the worker's exit, then release anyone waiting in `stop`
    async fn finish(&self, entry: &TaskEntry, exit: WorkerExit, done: watch::Sender<bool>) {
        let (status, detail) = {
            let mut state = entry.state.lock();
            let (status, detail) = match exit {
                WorkerExit::Stopped => (TaskStatus::Stopped, String::new()),
                WorkerExit::Completed(msg) => (TaskStatus::Completed, msg),
                WorkerExit::Failed(msg) => {
                    state.error = Some(msg.clone());
                    (TaskStatus::Error, msg)
                }
            };
            state.status = status;
            state.stopped_at = Some(Utc::now());
            state.control = None;
            (status, detail)
        };

        match status {
            TaskStatus::Error => error!("Task {} failed: {}", entry.id, detail),
            _ => info!("⏹️ Task {} is {}", entry.id, status),
        }
        self.archive(&entry.view());
        let _ = done.send(true);

        self.inner
            .alerts
            .task_finished(&entry.id, entry.config.kind(), status, &detail)
            .await;
    }

    /// Signal cancellation and wait for the worker to wind down
    pub async fn stop(&self, id: &str) -> Result<TaskView, TaskError> {
        let entry = self.entry(id)?;

        let mut done = {
            let state = entry.state.lock();
            let control = match (&state.control, state.status) {
                (Some(control), TaskStatus::Running) => control,
                _ => {
                    return Err(TaskError::InvalidTransition {
                        from: state.status,
                        action: "stop",
                    })
                }
            };
            let _ = control.cancel.send(true);
            control.done.clone()
        };

        info!("🛑 Stopping task {}", id);
        // Sender dropped means the supervisor is gone; the state is final either way
        let _ = done.wait_for(|finished| *finished).await;
        Ok(entry.view())
    }

    /// Stop every running task concurrently
    pub async fn stop_all(&self) {
        let running: Vec<TaskId> = self
            .inner
            .tasks
            .iter()
            .filter(|e| e.value().state.lock().status == TaskStatus::Running)
            .map(|e| e.key().clone())
            .collect();

        if running.is_empty() {
            return;
        }
        info!("Stopping {} running task(s)", running.len());

        let results = join_all(running.iter().map(|id| self.stop(id))).await;
        for (id, result) in running.iter().zip(results) {
            if let Err(e) = result {
                warn!("Task {} not stopped: {}", id, e);
            }
        }
    }

    /// In-memory task, or the archived record from an earlier run
    pub fn get(&self, id: &str) -> Result<TaskView, TaskError> {
        if let Ok(entry) = self.entry(id) {
            return Ok(entry.view());
        }
        match self.inner.ledger.find_task(id) {
            Ok(Some(view)) => Ok(view),
            Ok(None) => Err(TaskError::NotFound(id.to_string())),
            Err(e) => {
                warn!("Task archive lookup failed: {}", e);
                Err(TaskError::NotFound(id.to_string()))
            }
        }
    }

    /// Tasks of this process, newest first
    pub fn list(&self) -> Vec<TaskView> {
        let mut views: Vec<TaskView> = self.inner.tasks.iter().map(|e| e.value().view()).collect();
        views.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        views
    }

    /// Live tasks first, then archived ones not held in memory
    pub fn history(&self, limit: u32) -> Vec<TaskView> {
        let mut views = self.list();
        match self.inner.ledger.task_history(limit) {
            Ok(archived) => views.extend(
                archived
                    .into_iter()
                    .filter(|t| !self.inner.tasks.contains_key(&t.id)),
            ),
            Err(e) => warn!("Task archive read failed: {}", e),
        }
        views.truncate(limit as usize);
        views
    }

    pub fn running_count(&self) -> usize {
        self.inner
            .tasks
            .iter()
            .filter(|e| e.value().state.lock().status == TaskStatus::Running)
            .count()
    }

    pub fn logs(&self, id: &str, limit: usize, order: LogOrder) -> Result<Vec<String>, TaskError> {
        Ok(self.entry(id)?.log.tail(limit, order))
    }

    pub fn subscribe_logs(&self, id: &str) -> Result<broadcast::Receiver<String>, TaskError> {
        Ok(self.entry(id)?.log.subscribe())
    }
}
