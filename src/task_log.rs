//! Per-task bounded log stream.
//!
//! The owning worker is the only writer; status queries and WebSocket
//! subscribers read concurrently.

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

pub const DEFAULT_LOG_CAPACITY: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

/// Order in which `tail` returns lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogOrder {
    #[default]
    Chronological,
    NewestFirst,
}

pub struct TaskLog {
    task_id: String,
    capacity: usize,
    entries: Mutex<VecDeque<LogEntry>>,
    live: broadcast::Sender<String>,
}

impl TaskLog {
    pub fn new(task_id: impl Into<String>, capacity: usize) -> Self {
        let (live, _) = broadcast::channel(256);
        Self {
            task_id: task_id.into(),
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
            live,
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    fn push(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info => info!(task_id = %self.task_id, "{}", message),
            LogLevel::Warn => warn!(task_id = %self.task_id, "{}", message),
            LogLevel::Error => error!(task_id = %self.task_id, "{}", message),
        }

        let entry = LogEntry {
            timestamp: Local::now(),
            level,
            message,
        };
        let line = entry.render();

        {
            let mut entries = self.entries.lock();
            entries.push_back(entry);
            while entries.len() > self.capacity {
                entries.pop_front();
            }
        }

        // No subscribers is fine
        let _ = self.live.send(line);
    }

    /// Up to `limit` most recent lines
    pub fn tail(&self, limit: usize, order: LogOrder) -> Vec<String> {
        let entries = self.entries.lock();
        let skip = entries.len().saturating_sub(limit);
        let mut lines: Vec<String> = entries.iter().skip(skip).map(LogEntry::render).collect();
        if order == LogOrder::NewestFirst {
            lines.reverse();
        }
        lines
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Last message written, without the timestamp
    pub fn last_message(&self) -> Option<String> {
        self.entries.lock().back().map(|e| e.message.clone())
    }

    /// Stream of lines written from now on
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.live.subscribe()
    }
}
