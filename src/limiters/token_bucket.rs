//! Token bucket rate limiting algorithm
use serde::{Deserialize, Serialize};

use super::RateLimitDecision;
use crate::settings::RateLimitSettings;

/// Token bucket for rate limiting
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenBucket {
    pub tokens: f64,
    pub last_call: i64,
    /// Unix ms at which the bucket would be full again
    pub reset_time: i64,
}

impl TokenBucket {
    pub fn new(max_calls: u32, now: i64) -> Self {
        TokenBucket {
            tokens: f64::from(max_calls),
            last_call: now,
            reset_time: now,
        }
    }

    /// Tokens are added at the rate of token_rate * time_since_last_request
    pub fn add_tokens_to_bucket(&mut self, settings: &RateLimitSettings, now: i64) -> &mut Self {
        let diff_ms = now - self.last_call;
        if diff_ms <= 0 {
            return self;
        }
        let tokens_to_add = settings.tokens_per_ms() * diff_ms as f64;
        self.tokens = (self.tokens + tokens_to_add).clamp(0.0, f64::from(settings.max_requests));
        self.last_call = now;
        self
    }

    /// Subtract a full token (represents a request)
    pub fn decrement(&mut self) -> &mut Self {
        self.tokens -= 1f64;
        self
    }

    /// Must have at least 1 full token
    pub fn check_if_allowed(&self) -> bool {
        self.tokens >= 1f64
    }

    pub fn tokens_to_u32(&self) -> u32 {
        self.tokens.trunc().clamp(0.0, u32::MAX.into()) as u32
    }

    /// Milliseconds until one whole token is available
    pub fn ms_until_next_token(&self, settings: &RateLimitSettings) -> u64 {
        let missing = (1f64 - self.tokens).max(0.0);
        (missing / settings.tokens_per_ms()).ceil() as u64
    }

    fn update_reset_time(&mut self, settings: &RateLimitSettings, now: i64) {
        let missing = (f64::from(settings.max_requests) - self.tokens).max(0.0);
        self.reset_time = now + (missing / settings.tokens_per_ms()).ceil() as i64;
    }
}

pub fn check(
    bucket: Option<TokenBucket>,
    settings: &RateLimitSettings,
    now: i64,
) -> (TokenBucket, RateLimitDecision) {
    let mut bucket = bucket.unwrap_or_else(|| TokenBucket::new(settings.max_requests, now));
    bucket.add_tokens_to_bucket(settings, now);

    let decision = if bucket.check_if_allowed() {
        bucket.decrement();
        bucket.update_reset_time(settings, now);
        RateLimitDecision::allow(bucket.tokens_to_u32(), bucket.reset_time)
    } else {
        bucket.update_reset_time(settings, now);
        RateLimitDecision::deny(bucket.reset_time, bucket.ms_until_next_token(settings))
    };
    (bucket, decision)
}

pub fn peek(bucket: Option<&TokenBucket>, settings: &RateLimitSettings, now: i64) -> RateLimitDecision {
    match bucket {
        Some(bucket) => {
            let mut bucket = bucket.clone();
            bucket.add_tokens_to_bucket(settings, now);
            bucket.update_reset_time(settings, now);
            if bucket.check_if_allowed() {
                RateLimitDecision::allow(bucket.tokens_to_u32(), bucket.reset_time)
            } else {
                RateLimitDecision::deny(bucket.reset_time, bucket.ms_until_next_token(settings))
            }
        }
        None => RateLimitDecision::allow(settings.max_requests, now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiters::Algorithm;

    fn settings() -> RateLimitSettings {
        // one token every 200ms
        RateLimitSettings::new(5, 1000, Algorithm::TokenBucket)
    }

    #[test]
    fn test_bucket_add_tokens() {
        let settings = settings();
        let mut bucket = TokenBucket::new(5, 0);
        bucket.tokens = 0.0;
        bucket.add_tokens_to_bucket(&settings, 100);
        assert!((bucket.tokens - 0.5).abs() < 1e-9);
        assert_eq!(bucket.last_call, 100);

        // never above capacity
        bucket.add_tokens_to_bucket(&settings, 100_000);
        assert_eq!(bucket.tokens, 5.0);
    }

    #[test]
    fn test_bucket_drains_and_reports_retry() {
        let settings = settings();
        let mut bucket = None;
        for expected in (0..5).rev() {
            let (next, decision) = check(bucket, &settings, 0);
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected);
            bucket = Some(next);
        }
        let (bucket, denied) = check(bucket, &settings, 0);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(200));
        assert_eq!(denied.reset_time, 1000);

        // half a token later: still denied, half the wait left
        let (bucket, denied) = check(Some(bucket), &settings, 100);
        assert_eq!(denied.retry_after, Some(100));

        let (_, allowed) = check(Some(bucket), &settings, 200);
        assert!(allowed.allowed);
    }

    #[test]
    fn test_peek_leaves_bucket_alone() {
        let settings = settings();
        let (bucket, _) = check(None, &settings, 0);
        let decision = peek(Some(&bucket), &settings, 0);
        assert_eq!(decision.remaining, 4);
        assert_eq!(bucket.tokens, 4.0);
    }
}
