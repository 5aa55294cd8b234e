//! Rolling window counter: a window opens on the first request after the
//! previous one expired and lasts `window_ms` from there.
use serde::{Deserialize, Serialize};

use super::RateLimitDecision;
use crate::settings::RateLimitSettings;

/// Counter state persisted per key
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_time: i64,
    pub first_request: i64,
}

impl RateLimitEntry {
    /// An empty window opening at `start`
    pub fn open(start: i64, window_ms: u64) -> Self {
        Self {
            count: 0,
            reset_time: start + window_ms as i64,
            first_request: start,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.reset_time
    }

    /// Count one request against this window if there is room left
    pub fn consume(&mut self, settings: &RateLimitSettings, now: i64) -> RateLimitDecision {
        if self.count >= settings.max_requests {
            let wait = (self.reset_time - now).max(0) as u64;
            return RateLimitDecision::deny(self.reset_time, wait);
        }
        self.count += 1;
        RateLimitDecision::allow(settings.max_requests - self.count, self.reset_time)
    }

    pub fn remaining(&self, settings: &RateLimitSettings) -> u32 {
        settings.max_requests.saturating_sub(self.count)
    }
}

/// Admit or deny one request, returning the entry to store back
pub fn check(
    entry: Option<RateLimitEntry>,
    settings: &RateLimitSettings,
    now: i64,
) -> (RateLimitEntry, RateLimitDecision) {
    let mut entry = match entry {
        Some(entry) if !entry.is_expired(now) => entry,
        _ => RateLimitEntry::open(now, settings.window_ms),
    };
    let decision = entry.consume(settings, now);
    (entry, decision)
}

/// Current allowance without counting a request
pub fn peek(entry: Option<&RateLimitEntry>, settings: &RateLimitSettings, now: i64) -> RateLimitDecision {
    match entry {
        Some(entry) if !entry.is_expired(now) => {
            let remaining = entry.remaining(settings);
            if remaining == 0 {
                RateLimitDecision::deny(entry.reset_time, (entry.reset_time - now).max(0) as u64)
            } else {
                RateLimitDecision::allow(remaining, entry.reset_time)
            }
        }
        _ => RateLimitDecision::allow(settings.max_requests, now + settings.window_ms as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiters::Algorithm;

    fn settings() -> RateLimitSettings {
        RateLimitSettings::new(3, 1000, Algorithm::SlidingWindow)
    }

    #[test]
    fn window_fills_then_denies() {
        let settings = settings();
        let (entry, first) = check(None, &settings, 0);
        assert!(first.allowed);
        assert_eq!(first.remaining, 2);
        assert_eq!(first.reset_time, 1000);

        let (entry, _) = check(Some(entry), &settings, 100);
        let (entry, third) = check(Some(entry), &settings, 200);
        assert!(third.allowed);
        assert_eq!(third.remaining, 0);

        let (entry, denied) = check(Some(entry), &settings, 400);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(600));
        // denials do not count
        assert_eq!(entry.count, 3);
    }

    #[test]
    fn window_restarts_from_now() {
        let settings = settings();
        let mut entry = RateLimitEntry::open(0, 1000);
        entry.count = 3;

        let (entry, decision) = check(Some(entry), &settings, 1000);
        assert!(decision.allowed);
        assert_eq!(entry.count, 1);
        assert_eq!(entry.first_request, 1000);
        assert_eq!(entry.reset_time, 2000);
    }

    #[test]
    fn peek_does_not_consume() {
        let settings = settings();
        let (entry, _) = check(None, &settings, 0);
        let peeked = peek(Some(&entry), &settings, 10);
        assert_eq!(peeked.remaining, 2);
        assert_eq!(entry.count, 1);
        assert_eq!(peek(None, &settings, 10).remaining, 3);
    }
}
