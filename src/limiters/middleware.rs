//! Admission control stage for the event pipeline
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{RateLimitDecision, RateLimiter};
use crate::error::PipelineError;
use crate::event::Event;
use crate::pipeline::{Middleware, Next};

pub type KeyGenerator = Arc<dyn Fn(&Event) -> String + Send + Sync>;
pub type SkipPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;
pub type LimitReachedHook = Arc<dyn Fn(&str, &Event, &RateLimitDecision) + Send + Sync>;

pub const RATE_LIMIT_PRIORITY: i32 = 20;

/// Consults a [`RateLimiter`] for every event and intercepts the run when the
/// key is over its allowance. Admitted events get `rateLimit.remaining`
/// attached to their metadata.
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    priority: i32,
    key_generator: KeyGenerator,
    skip: Option<SkipPredicate>,
    on_limit_reached: Option<LimitReachedHook>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            priority: RATE_LIMIT_PRIORITY,
            key_generator: Arc::new(|event: &Event| event.default_key()),
            skip: None,
            on_limit_reached: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn key_generator<F>(mut self, generator: F) -> Self
    where
        F: Fn(&Event) -> String + Send + Sync + 'static,
    {
        self.key_generator = Arc::new(generator);
        self
    }

    pub fn skip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    pub fn on_limit_reached<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &Event, &RateLimitDecision) + Send + Sync + 'static,
    {
        self.on_limit_reached = Some(Arc::new(hook));
        self
    }
}

#[async_trait]
impl Middleware<Event> for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate-limit"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn process(&self, mut event: Event, next: Next<'_, Event>) -> Result<Event, PipelineError> {
        if self.skip.as_ref().is_some_and(|skip| skip(&event)) {
            debug!(id = %event.id, "Skipping rate limit");
            return next.run(event).await;
        }

        let key = (self.key_generator)(&event);
        let decision = self.limiter.check_limit(&key).await;
        if !decision.allowed {
            if let Some(hook) = &self.on_limit_reached {
                hook(&key, &event, &decision);
            }
            return Err(PipelineError::intercept(
                format!("rate limit exceeded for '{}'", key),
                decision.retry_after,
            ));
        }

        event.set_metadata(
            "rateLimit",
            serde_json::json!({
                "remaining": decision.remaining,
                "resetTime": decision.reset_time,
            }),
        );
        next.run(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::limiters::Algorithm;
    use crate::pipeline::EventPipeline;
    use crate::settings::RateLimitSettings;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limiter(max: u32) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(
            RateLimitSettings::new(max, 1000, Algorithm::SlidingWindow),
            Arc::new(MemoryStorage::new()),
            Arc::new(ManualClock::new(0)),
        ))
    }

    #[tokio::test]
    async fn intercepts_over_limit() {
        let reached = Arc::new(AtomicUsize::new(0));
        let counter = reached.clone();
        let pipeline = EventPipeline::new("events");
        pipeline
            .register(Arc::new(RateLimitMiddleware::new(limiter(1)).on_limit_reached(
                move |key, _, _| {
                    assert_eq!(key, "click:app");
                    counter.fetch_add(1, Ordering::SeqCst);
                },
            )))
            .await;

        let delivered = pipeline
            .process(Event::new("click", "app", json!({})))
            .await
            .unwrap();
        assert_eq!(
            delivered.payload().metadata_value("rateLimit").unwrap()["remaining"],
            0
        );

        let err = pipeline
            .process(Event::new("click", "app", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_interception());
        assert_eq!(err.middleware(), "rate-limit");
        assert_eq!(err.retry_after_ms(), Some(1000));
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn skip_and_custom_key() {
        let pipeline = EventPipeline::new("events");
        pipeline
            .register(Arc::new(
                RateLimitMiddleware::new(limiter(1))
                    .key_generator(|event| event.source.clone())
                    .skip(|event| event.event_type == "heartbeat"),
            ))
            .await;

        for _ in 0..3 {
            let heartbeat = Event::new("heartbeat", "app", json!({}));
            assert!(pipeline.process(heartbeat).await.is_ok());
        }
        assert!(pipeline.process(Event::new("a", "app", json!({}))).await.is_ok());
        // same source, different type: same key
        assert!(pipeline.process(Event::new("b", "app", json!({}))).await.is_err());
    }
}
