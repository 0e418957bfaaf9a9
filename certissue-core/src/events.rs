//! Pipeline events and progress publication.
//!
//! Listeners are called synchronously in registration order. A listener that
//! panics is logged and skipped; it never reaches the batch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use tracing::error;

use crate::settings::BatchMode;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// Snapshot published after every participant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub state: RunState,
    pub processed: usize,
    pub total: usize,
    pub current_name: Option<String>,
    pub success: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    #[serde(rename_all = "camelCase")]
    BatchStarted {
        run_id: String,
        mode: BatchMode,
        total: usize,
    },
    #[serde(rename_all = "camelCase")]
    RowsRejected { count: usize },
    #[serde(rename_all = "camelCase")]
    DuplicateSkipped { name: String, email: String },
    #[serde(rename_all = "camelCase")]
    ParticipantStarted {
        index: usize,
        name: String,
        certificate_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ParticipantFinished {
        name: String,
        certificate_id: String,
        success: bool,
        attempts: u32,
        error: Option<String>,
    },
    Progress(BatchStatus),
    #[serde(rename_all = "camelCase")]
    BatchCompleted {
        run_id: String,
        success: usize,
        failed: usize,
    },
    #[serde(rename_all = "camelCase")]
    BatchFailed { run_id: String, error: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl PipelineEvent {
    /// One human-readable line, as shown to an operator.
    pub fn describe(&self) -> (LogLevel, String) {
        match self {
            PipelineEvent::BatchStarted { mode, total, .. } => {
                (LogLevel::Info, format!("Starting batch of {} participant(s) in {} mode", total, mode))
            }
            PipelineEvent::RowsRejected { count } => {
                (LogLevel::Warn, format!("{} invalid row(s) skipped", count))
            }
            PipelineEvent::DuplicateSkipped { name, email } => {
                (LogLevel::Warn, format!("Duplicate skipped: {} <{}>", name, email))
            }
            PipelineEvent::ParticipantStarted { index, name, certificate_id } => (
                LogLevel::Info,
                format!("[{}] Processing {} ({})", index, name, certificate_id),
            ),
            PipelineEvent::ParticipantFinished { name, success: true, .. } => {
                (LogLevel::Info, format!("Certificate delivered to {}", name))
            }
            PipelineEvent::ParticipantFinished { name, error, .. } => (
                LogLevel::Error,
                format!(
                    "Delivery failed for {}: {}",
                    name,
                    error.as_deref().unwrap_or("unknown error")
                ),
            ),
            PipelineEvent::Progress(status) => (
                LogLevel::Info,
                format!("Progress {}/{}", status.processed, status.total),
            ),
            PipelineEvent::BatchCompleted { success, failed, .. } => (
                LogLevel::Info,
                format!("Batch completed: {} sent, {} failed", success, failed),
            ),
            PipelineEvent::BatchFailed { error, .. } => {
                (LogLevel::Error, format!("Batch failed: {}", error))
            }
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &PipelineEvent);
}

impl<F> EventListener for F
where
    F: Fn(&PipelineEvent) + Send + Sync,
{
    fn on_event(&self, event: &PipelineEvent) {
        self(event)
    }
}

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    pub fn emit(&self, event: &PipelineEvent) {
        // Clone the list so a listener may subscribe without deadlocking.
        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_event(event))).is_err() {
                error!("event listener panicked; continuing");
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Bounded buffer of the most recent event lines. Oldest lines are dropped.
pub struct LogBuffer {
    lines: Mutex<VecDeque<LogLine>>,
    capacity: usize,
}

impl LogBuffer {
    pub const DEFAULT_CAPACITY: usize = 500;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Lines in chronological order.
    pub fn lines(&self) -> Vec<LogLine> {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl EventListener for LogBuffer {
    fn on_event(&self, event: &PipelineEvent) {
        // Progress is a status update, not a log line.
        if matches!(event, PipelineEvent::Progress(_)) {
            return;
        }
        let (level, message) = event.describe();
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == self.capacity {
                lines.pop_front();
            }
            lines.push_back(LogLine {
                timestamp: Utc::now(),
                level,
                message,
            });
        }
    }
}
