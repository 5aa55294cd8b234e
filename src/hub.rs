//! Wires every component together from `Settings`
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::conflict::ConflictResolver;
use crate::error::{PipelineError, Result};
use crate::event::Event;
use crate::limiters::{RateLimitMiddleware, RateLimiter};
use crate::notify::{Notifier, TracingNotifier};
use crate::pipeline::{Delivery, EventPipeline, LoggingMiddleware, StatePipeline, ValidationMiddleware};
use crate::queue::{DeferredDeliveryMiddleware, MessageQueue};
use crate::settings::Settings;
use crate::state::SharedState;
use crate::storage::{MemoryStorage, Storage};

/// One instance of each component. Several hubs may live in one process.
pub struct Hub {
    pub settings: Settings,
    pub storage: Arc<dyn Storage>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub events: Arc<EventPipeline>,
    pub limiter: Arc<RateLimiter>,
    pub queue: MessageQueue,
    pub resolver: Arc<ConflictResolver>,
    pub state: Arc<SharedState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub").field("settings", &self.settings).finish()
    }
}

impl Hub {
    /// In-memory hub on the system clock
    pub async fn new(settings: Settings) -> Result<Self> {
        Self::with_parts(
            settings,
            Arc::new(MemoryStorage::new()),
            Arc::new(SystemClock),
            Arc::new(TracingNotifier),
        )
        .await
    }

    pub async fn with_parts(
        settings: Settings,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        settings.validate()?;

        let limiter = Arc::new(RateLimiter::new(
            settings.rate_limit.clone(),
            Arc::clone(&storage),
            Arc::clone(&clock),
        ));
        let queue = MessageQueue::with_storage(
            settings.queue.clone(),
            Arc::clone(&storage),
            Arc::clone(&clock),
            Arc::clone(&notifier),
        )
        .await;
        let resolver = Arc::new(
            ConflictResolver::new(Arc::clone(&clock), Arc::clone(&notifier))
                .with_history_limit(settings.conflict_history_limit)
                .with_default_rules(),
        );
        let state = Arc::new(SharedState::new(
            Arc::new(StatePipeline::new("state")),
            Arc::clone(&resolver),
            Arc::clone(&clock),
        ));

        let events = Arc::new(EventPipeline::new("events"));
        events.register(Arc::new(LoggingMiddleware::new())).await;
        events.register(Arc::new(ValidationMiddleware)).await;
        events
            .register(Arc::new(RateLimitMiddleware::new(Arc::clone(&limiter))))
            .await;

        info!(
            "Hub ready: {} rate limiting, {} queue",
            settings.rate_limit.algorithm, settings.queue.processing_mode
        );

        Ok(Self {
            settings,
            storage,
            clock,
            notifier,
            events,
            limiter,
            queue,
            resolver,
            state,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Run an event through the event pipeline
    pub async fn publish(&self, event: Event) -> std::result::Result<Delivery<Event>, PipelineError> {
        self.events.process(event).await
    }

    /// Send events of these types to the message queue instead of
    /// delivering them directly
    pub async fn defer_event_types<I, S>(&self, types: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events
            .register(Arc::new(DeferredDeliveryMiddleware::new(self.queue.clone(), types)))
            .await;
    }

    /// Spawn the rate limit sweeper and the queue drain loop
    pub fn start(&self) {
        let sweeper = self
            .limiter
            .spawn_expiry_task(Duration::from_millis(self.settings.rate_limit.sweep_interval_ms.max(1)));
        let drain = self.queue.start();
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(sweeper);
            tasks.push(drain);
        }
    }

    /// Stop background tasks started by `start`
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config_error;
    use serde_json::json;

    #[tokio::test]
    async fn publish_runs_builtin_chain() {
        let hub = Hub::new(Settings::default()).await.unwrap();
        let names: Vec<String> = hub.events.list().await.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["logging", "validation", "rate-limit"]);

        let delivered = hub
            .publish(Event::new("ping", "shell", json!({})))
            .await
            .unwrap();
        assert!(delivered.is_completed());

        let rejected = hub.publish(Event::new("ping", "", json!({}))).await.unwrap_err();
        assert_eq!(rejected.middleware(), "validation");
    }

    #[tokio::test]
    async fn invalid_settings_are_rejected() {
        let mut settings = Settings::default();
        settings.queue.max_size = 0;
        let err = Hub::new(settings).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            config_error!("queue max size must be greater than 0").to_string()
        );
    }

    #[tokio::test]
    async fn deferred_types_land_in_queue() {
        let hub = Hub::new(Settings::default()).await.unwrap();
        hub.defer_event_types(["export"]).await;
        let delivery = hub
            .publish(Event::new("export", "reports", json!({"id": 1})))
            .await
            .unwrap();
        assert!(!delivery.is_completed());
        assert_eq!(hub.queue.len().await, 1);
    }
}
