//! Retry policy and exponential backoff
use std::sync::Arc;

use super::message::QueueMessage;
use crate::settings::RetrySettings;

/// Decides whether a failed message is worth another attempt
pub type RetryCondition = Arc<dyn Fn(&QueueMessage, &anyhow::Error) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
    pub retry_condition: Option<RetryCondition>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("retry_condition", &self.retry_condition.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay_ms: settings.initial_delay_ms,
            backoff_multiplier: settings.backoff_multiplier,
            max_delay_ms: settings.max_delay_ms,
            retry_condition: None,
        }
    }
}

impl RetryPolicy {
    pub fn with_condition<F>(mut self, condition: F) -> Self
    where
        F: Fn(&QueueMessage, &anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.retry_condition = Some(Arc::new(condition));
        self
    }

    /// Delay before attempt number `retry_count + 1`, where `retry_count`
    /// already includes the failure being handled.
    pub fn delay_for(&self, retry_count: u32) -> u64 {
        let exponent = retry_count.saturating_sub(1) as i32;
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        if !delay.is_finite() || delay >= self.max_delay_ms as f64 {
            self.max_delay_ms
        } else {
            delay.round() as u64
        }
    }

    pub fn should_retry(&self, message: &QueueMessage, err: &anyhow::Error) -> bool {
        self.retry_condition
            .as_ref()
            .map_or(true, |condition| condition(message, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 300,
            retry_condition: None,
        }
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = policy();
        assert_eq!(policy.delay_for(1), 100);
        assert_eq!(policy.delay_for(2), 200);
        assert_eq!(policy.delay_for(3), 300);
        assert_eq!(policy.delay_for(60), 300);
    }

    #[test]
    fn condition_is_consulted() {
        let policy = policy().with_condition(|_, err| !err.to_string().contains("fatal"));
        let message = crate::queue::NewMessage::new("t", "s", serde_json::Value::Null).into_message(0, 3, 0);
        assert!(policy.should_retry(&message, &anyhow::anyhow!("timeout")));
        assert!(!policy.should_retry(&message, &anyhow::anyhow!("fatal: bad input")));
        assert!(RetryPolicy::default().should_retry(&message, &anyhow::anyhow!("fatal")));
    }
}
