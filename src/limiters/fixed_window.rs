//! Fixed window counter aligned to multiples of `window_ms`.
//! Each discrete window gets its own storage key, so counters reset exactly
//! at the boundary.
use super::sliding_window::RateLimitEntry;
use super::RateLimitDecision;
use crate::settings::RateLimitSettings;

pub fn window_start(now: i64, window_ms: u64) -> i64 {
    let window = window_ms.max(1) as i64;
    now.div_euclid(window) * window
}

pub fn storage_key(key: &str, now: i64, window_ms: u64) -> String {
    format!("{}:{}", key, window_start(now, window_ms))
}

pub fn check(
    entry: Option<RateLimitEntry>,
    settings: &RateLimitSettings,
    now: i64,
) -> (RateLimitEntry, RateLimitDecision) {
    let start = window_start(now, settings.window_ms);
    let mut entry = match entry {
        Some(entry) if entry.first_request >= start && !entry.is_expired(now) => entry,
        _ => RateLimitEntry::open(start, settings.window_ms),
    };
    let decision = entry.consume(settings, now);
    (entry, decision)
}

pub fn peek(entry: Option<&RateLimitEntry>, settings: &RateLimitSettings, now: i64) -> RateLimitDecision {
    let start = window_start(now, settings.window_ms);
    let reset_time = start + settings.window_ms as i64;
    match entry {
        Some(entry) if entry.first_request >= start && !entry.is_expired(now) => {
            match entry.remaining(settings) {
                0 => RateLimitDecision::deny(reset_time, (reset_time - now) as u64),
                remaining => RateLimitDecision::allow(remaining, reset_time),
            }
        }
        _ => RateLimitDecision::allow(settings.max_requests, reset_time),
    }
}
