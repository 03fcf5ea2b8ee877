//! Engine configuration surface.

use core::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};
use crate::id::ProcessId;

/// Placeholder replaced by the process guid in `async_process_url`.
pub const GUID_PLACEHOLDER: &str = "{guid}";

/// HTTP method of the outbound async trigger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl FromStr for HttpMethod {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            other => Err(QueueError::validation(format!(
                "async method must be GET or POST, got {other}"
            ))),
        }
    }
}

/// Backoff strategy applied before a failed item becomes eligible again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    #[default]
    Fixed,
    /// Linear backoff: base * attempt
    Linear,
    /// Exponential backoff: base * 2^(attempt - 1)
    Exponential,
}

impl FromStr for BackoffStrategy {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(Self::Fixed),
            "linear" => Ok(Self::Linear),
            "exponential" => Ok(Self::Exponential),
            other => Err(QueueError::validation(format!("unknown backoff strategy: {other}"))),
        }
    }
}

/// Delay applied to `earliest_start_timestamp` when `fail` recycles an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBackoff {
    pub strategy: BackoffStrategy,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryBackoff {
    fn default() -> Self {
        Self::none()
    }
}

impl RetryBackoff {
    /// Failed items are eligible again immediately.
    pub fn none() -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn fixed(delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Fixed,
            base_delay: delay,
            max_delay: delay,
        }
    }

    pub fn exponential(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            base_delay,
            max_delay,
        }
    }

    /// Delay for a given retry number (1-indexed).
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay,
            BackoffStrategy::Linear => self.base_delay.saturating_mul(retry),
            BackoffStrategy::Exponential => {
                let factor = 2_u32.checked_pow(retry - 1).unwrap_or(u32::MAX);
                self.base_delay.saturating_mul(factor)
            }
        };

        if self.max_delay.is_zero() {
            delay
        } else {
            delay.min(self.max_delay)
        }
    }
}

/// Everything the engine reads from its host integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Global cap on simultaneously IN_PROGRESS items.
    pub max_concurrent_running: usize,
    /// Failures tolerated before an item becomes FAILED.
    pub max_retries: u32,
    /// Default inactivity period after which an IN_PROGRESS item is reclaimed.
    pub max_task_inactivity: Duration,
    /// Lease lifetime of one runner generation.
    pub max_runner_alive_time: Duration,
    /// Pause before a runner hands over to the next generation.
    pub wakeup_delay: Duration,
    pub async_process_method: HttpMethod,
    /// Trigger URL; `{guid}` is replaced by the process guid.
    pub async_process_url: String,
    /// Timeout of one outbound trigger call.
    pub async_request_timeout: Duration,
    /// Estimated duration of one outbound call, used for batch wait times.
    pub async_request_duration: Duration,
    /// Branching factor of async batches.
    pub async_batch_size: usize,
    pub default_queue_name: String,
    pub scheduler_queue_name: String,
    /// Minimum age of the last schedule check before the tick enqueues another.
    pub scheduler_time_threshold: Duration,
    pub retry_backoff: RetryBackoff,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_running: 8,
            max_retries: 5,
            max_task_inactivity: Duration::from_secs(30),
            max_runner_alive_time: Duration::from_secs(60),
            wakeup_delay: Duration::from_secs(5),
            async_process_method: HttpMethod::Post,
            async_process_url: format!("http://127.0.0.1:8080/async/{GUID_PLACEHOLDER}"),
            async_request_timeout: Duration::from_secs(1),
            async_request_duration: Duration::from_secs(1),
            async_batch_size: 8,
            default_queue_name: "default".to_string(),
            scheduler_queue_name: "scheduler".to_string(),
            scheduler_time_threshold: Duration::from_secs(60),
            retry_backoff: RetryBackoff::none(),
        }
    }
}

impl QueueConfig {
    /// Read `SHIPQ_*` variables from the process environment.
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse::<usize>(&lookup, "SHIPQ_MAX_CONCURRENT_RUNNING")? {
            config.max_concurrent_running = v;
        }
        if let Some(v) = parse::<u32>(&lookup, "SHIPQ_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = parse::<u64>(&lookup, "SHIPQ_MAX_TASK_INACTIVITY_SECS")? {
            config.max_task_inactivity = Duration::from_secs(v);
        }
        if let Some(v) = parse::<u64>(&lookup, "SHIPQ_MAX_RUNNER_ALIVE_SECS")? {
            config.max_runner_alive_time = Duration::from_secs(v);
        }
        if let Some(v) = parse::<u64>(&lookup, "SHIPQ_WAKEUP_DELAY_MS")? {
            config.wakeup_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse::<HttpMethod>(&lookup, "SHIPQ_ASYNC_METHOD")? {
            config.async_process_method = v;
        }
        if let Some(v) = lookup("SHIPQ_ASYNC_URL") {
            config.async_process_url = v;
        }
        if let Some(v) = parse::<u64>(&lookup, "SHIPQ_ASYNC_TIMEOUT_MS")? {
            config.async_request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = parse::<u64>(&lookup, "SHIPQ_ASYNC_REQUEST_DURATION_MS")? {
            config.async_request_duration = Duration::from_millis(v);
        }
        if let Some(v) = parse::<usize>(&lookup, "SHIPQ_ASYNC_BATCH_SIZE")? {
            config.async_batch_size = v;
        }
        if let Some(v) = lookup("SHIPQ_DEFAULT_QUEUE") {
            config.default_queue_name = v;
        }
        if let Some(v) = lookup("SHIPQ_SCHEDULER_QUEUE") {
            config.scheduler_queue_name = v;
        }
        if let Some(v) = parse::<u64>(&lookup, "SHIPQ_SCHEDULER_THRESHOLD_SECS")? {
            config.scheduler_time_threshold = Duration::from_secs(v);
        }
        if let Some(v) = parse::<BackoffStrategy>(&lookup, "SHIPQ_RETRY_BACKOFF")? {
            config.retry_backoff.strategy = v;
        }
        if let Some(v) = parse::<u64>(&lookup, "SHIPQ_RETRY_BASE_DELAY_MS")? {
            config.retry_backoff.base_delay = Duration::from_millis(v);
        }
        if let Some(v) = parse::<u64>(&lookup, "SHIPQ_RETRY_MAX_DELAY_MS")? {
            config.retry_backoff.max_delay = Duration::from_millis(v);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_max_concurrent_running(mut self, max: usize) -> Self {
        self.max_concurrent_running = max;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    pub fn with_max_task_inactivity(mut self, period: Duration) -> Self {
        self.max_task_inactivity = period;
        self
    }

    pub fn with_max_runner_alive_time(mut self, period: Duration) -> Self {
        self.max_runner_alive_time = period;
        self
    }

    pub fn with_wakeup_delay(mut self, delay: Duration) -> Self {
        self.wakeup_delay = delay;
        self
    }

    pub fn with_async_process(mut self, method: HttpMethod, url: impl Into<String>) -> Self {
        self.async_process_method = method;
        self.async_process_url = url.into();
        self
    }

    pub fn with_async_batch_size(mut self, size: usize) -> Self {
        self.async_batch_size = size;
        self
    }

    pub fn with_scheduler_time_threshold(mut self, threshold: Duration) -> Self {
        self.scheduler_time_threshold = threshold;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: RetryBackoff) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn validate(&self) -> QueueResult<()> {
        if self.max_concurrent_running == 0 {
            return Err(QueueError::validation("max_concurrent_running must be at least 1"));
        }
        if self.async_batch_size < 2 {
            return Err(QueueError::validation("async_batch_size must be at least 2"));
        }
        if !self.async_process_url.contains(GUID_PLACEHOLDER) {
            return Err(QueueError::validation(format!(
                "async_process_url must contain {GUID_PLACEHOLDER}"
            )));
        }
        if self.default_queue_name.is_empty() || self.scheduler_queue_name.is_empty() {
            return Err(QueueError::validation("queue names must not be empty"));
        }
        Ok(())
    }

    /// Trigger URL for one process.
    pub fn async_process_url_for(&self, guid: ProcessId) -> String {
        self.async_process_url
            .replace(GUID_PLACEHOLDER, &guid.to_string())
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> QueueResult<Option<T>>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| QueueError::validation(format!("{key}: {e}"))),
    }
}
