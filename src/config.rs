use std::{fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::{CallflowError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// outbound http config
    pub http: HttpConfig,
    /// defaults for polling nodes that leave interval or max attempts unset
    pub polling: PollingConfig,
    /// defaults for retrying nodes that leave the retry delay unset
    pub retry: RetryConfig,
    /// log channel config
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// per-request timeout in milliseconds when neither the node nor the interface sets one
    pub request_timeout_ms: u64,
    /// envelope codes treated as success
    pub success_codes: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// delay between polling attempts in milliseconds
    pub interval_ms: u64,
    /// maximum number of polling attempts
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// delay between retry attempts in milliseconds
    pub delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// capacity of the log record queue, records are dropped once it is full
    pub queue_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            success_codes: vec![0, 200],
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1_000,
            max_attempts: 10,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1_000,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            queue_size: 4096,
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Config {
    pub fn create<T: AsRef<Path>>(path: T) -> Result<Self> {
        let data = fs::read_to_string(path.as_ref())
            .map_err(|err| CallflowError::Config(format!("failed to load config file {:?}: {}", path.as_ref(), err)))?;

        Self::load_from_str(data.as_str())
    }

    pub fn load_from_str(toml_str: &str) -> Result<Self> {
        toml::from_str::<Config>(toml_str).map_err(|err| CallflowError::Config(format!("failed to parse the toml str: {}", err)))
    }
}
