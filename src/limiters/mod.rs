//! Rate limiting algorithms and the middleware that applies them to events
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod fixed_window;
pub mod middleware;
pub mod rate_limit;
pub mod sliding_window;
pub mod token_bucket;

pub use middleware::RateLimitMiddleware;
pub use rate_limit::RateLimiter;
pub use sliding_window::RateLimitEntry;
pub use token_bucket::TokenBucket;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Algorithm {
    #[default]
    SlidingWindow,
    TokenBucket,
    FixedWindow,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::SlidingWindow => write!(f, "sliding-window"),
            Algorithm::TokenBucket => write!(f, "token-bucket"),
            Algorithm::FixedWindow => write!(f, "fixed-window"),
        }
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sliding-window" | "sliding" | "rolling-window" => Ok(Algorithm::SlidingWindow),
            "token-bucket" | "bucket" => Ok(Algorithm::TokenBucket),
            "fixed-window" | "fixed" => Ok(Algorithm::FixedWindow),
            _ => Err(format!("Invalid rate limit algorithm: {}", s)),
        }
    }
}

/// Outcome of a single rate limit check
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Unix ms at which the allowance is restored
    pub reset_time: i64,
    /// Milliseconds to wait before retrying; only set on denial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    pub fn allow(remaining: u32, reset_time: i64) -> Self {
        Self {
            allowed: true,
            remaining,
            reset_time,
            retry_after: None,
        }
    }

    pub fn deny(reset_time: i64, retry_after: u64) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            reset_time,
            retry_after: Some(retry_after),
        }
    }
}
