//! Structured log records for the host service.
//!
//! The scheduler and the request executor report through [`LogSink::add_log`],
//! which must never block or fail the call path.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{common::Queue, utils};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub run_id: String,
    pub level: LogLevel,
    pub message: String,
    pub metadata: Value,
    /// epoch millis
    pub timestamp: i64,
}

/// Fire-and-forget log collaborator.
pub trait LogSink: Send + Sync {
    fn add_log(
        &self,
        run_id: &str,
        level: LogLevel,
        message: &str,
        metadata: Value,
    );
}

/// Default sink: mirrors every record to `tracing` and queues it for the host.
///
/// When the queue is full the record is dropped; the `tracing` event is still emitted.
#[derive(Clone)]
pub struct LogChannel {
    queue: Arc<Queue<LogRecord>>,
}

impl LogChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Queue::new(capacity),
        }
    }

    /// Waits for the next record, for hosts that persist logs in a background task.
    pub async fn next(&self) -> Option<LogRecord> {
        self.queue.next_async().await
    }

    /// Takes every queued record.
    pub fn drain(&self) -> Vec<LogRecord> {
        self.queue.drain()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl LogSink for LogChannel {
    fn add_log(
        &self,
        run_id: &str,
        level: LogLevel,
        message: &str,
        metadata: Value,
    ) {
        match level {
            LogLevel::Debug => tracing::debug!(run_id, %metadata, "{}", message),
            LogLevel::Info => tracing::info!(run_id, %metadata, "{}", message),
            LogLevel::Warn => tracing::warn!(run_id, %metadata, "{}", message),
            LogLevel::Error => tracing::error!(run_id, %metadata, "{}", message),
        }

        let record = LogRecord {
            run_id: run_id.to_string(),
            level,
            message: message.to_string(),
            metadata,
            timestamp: utils::time::time_millis(),
        };
        if self.queue.try_send(record).is_err() {
            tracing::trace!(run_id, "log queue full, record dropped");
        }
    }
}
