//! interlink application settings
use serde::{Deserialize, Serialize};

use crate::limiters::Algorithm;
use crate::queue::ProcessingMode;

pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const STANDARD_PORT_HTTP: u16 = 8420;
pub const DEFAULT_PORT_HTTP: &str = "8420";

pub const DEFAULT_MAX_REQUESTS: u32 = 100;
pub const DEFAULT_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 60_000;

pub const DEFAULT_QUEUE_MAX_SIZE: usize = 1000;
pub const DEFAULT_PROCESSING_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

pub const CONFLICT_HISTORY_LIMIT: usize = 1000;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_ms: u64,
    pub algorithm: Algorithm,
    /// How often expired entries are swept from storage
    pub sweep_interval_ms: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: DEFAULT_MAX_REQUESTS,
            window_ms: DEFAULT_WINDOW_MS,
            algorithm: Algorithm::SlidingWindow,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
        }
    }
}

impl RateLimitSettings {
    pub fn new(max_requests: u32, window_ms: u64, algorithm: Algorithm) -> Self {
        Self {
            max_requests,
            window_ms,
            algorithm,
            ..Default::default()
        }
    }

    /// Token bucket refill rate
    pub fn tokens_per_ms(&self) -> f64 {
        f64::from(self.max_requests) / self.window_ms.max(1) as f64
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct QueueSettings {
    pub max_size: usize,
    pub processing_mode: ProcessingMode,
    /// Snapshot the queue to storage after every change
    pub persistence: bool,
    /// Interval of the background drain loop
    pub processing_interval_ms: u64,
    pub retry: RetrySettings,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_QUEUE_MAX_SIZE,
            processing_mode: ProcessingMode::Priority,
            persistence: false,
            processing_interval_ms: DEFAULT_PROCESSING_INTERVAL_MS,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    // Server listen address
    pub listen_address: String,

    // HTTP API listen port
    pub listen_port: u16,

    pub rate_limit: RateLimitSettings,

    pub queue: QueueSettings,

    // Resolved conflicts kept for statistics
    pub conflict_history_limit: usize,
}

impl Settings {
    /// Reject values the components cannot work with
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.rate_limit.window_ms == 0 {
            return Err(crate::config_error!("rate limit window must be greater than 0"));
        }
        if self.rate_limit.max_requests == 0 {
            return Err(crate::config_error!("rate limit max requests must be greater than 0"));
        }
        if self.queue.max_size == 0 {
            return Err(crate::config_error!("queue max size must be greater than 0"));
        }
        if self.queue.retry.backoff_multiplier < 1.0 {
            return Err(crate::config_error!(
                "backoff multiplier {} must be at least 1.0",
                self.queue.retry.backoff_multiplier
            ));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0".to_string(),
            listen_port: STANDARD_PORT_HTTP,
            rate_limit: RateLimitSettings::default(),
            queue: QueueSettings::default(),
            conflict_history_limit: CONFLICT_HISTORY_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_rate() {
        let settings = RateLimitSettings::new(5, 1000, Algorithm::TokenBucket);
        assert!((settings.tokens_per_ms() - 0.005).abs() < f64::EPSILON);
    }

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.listen_port, STANDARD_PORT_HTTP);
        assert_eq!(settings.queue.processing_mode, ProcessingMode::Priority);
        assert_eq!(settings.conflict_history_limit, 1000);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_zero_window() {
        let mut settings = Settings::default();
        settings.rate_limit.window_ms = 0;
        assert!(settings.validate().is_err());
    }
}
