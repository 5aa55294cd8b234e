//! General purpose event middleware
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;
use tracing_futures::Instrument;

use super::manager::{Middleware, Next};
use crate::error::PipelineError;
use crate::event::Event;

/// Wraps the rest of the chain in a span and logs how the event fared
#[derive(Clone, Debug)]
pub struct LoggingMiddleware {
    priority: i32,
}

impl LoggingMiddleware {
    pub fn new() -> Self {
        Self { priority: 0 }
    }

    pub fn with_priority(priority: i32) -> Self {
        Self { priority }
    }
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Middleware<Event> for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn process(&self, event: Event, next: Next<'_, Event>) -> Result<Event, PipelineError> {
        let span = tracing::debug_span!(
            "event",
            id = %event.id,
            event_type = %event.event_type,
            source = %event.source,
        );
        let started = Instant::now();
        let result = next.run(event).instrument(span).await;
        match &result {
            Ok(event) => debug!(
                id = %event.id,
                elapsed_us = started.elapsed().as_micros() as u64,
                "Event passed through pipeline"
            ),
            Err(err) => debug!(
                elapsed_us = started.elapsed().as_micros() as u64,
                "Event stopped in pipeline: {}",
                err
            ),
        }
        result
    }
}

/// Rejects events without a type or source
#[derive(Clone, Debug, Default)]
pub struct ValidationMiddleware;

#[async_trait]
impl Middleware<Event> for ValidationMiddleware {
    fn name(&self) -> &str {
        "validation"
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn process(&self, event: Event, next: Next<'_, Event>) -> Result<Event, PipelineError> {
        if event.event_type.trim().is_empty() {
            return Err(PipelineError::failed(format!(
                "event {} has an empty type",
                event.id
            )));
        }
        if event.source.trim().is_empty() {
            return Err(PipelineError::failed(format!(
                "event {} has an empty source",
                event.id
            )));
        }
        next.run(event).await
    }
}
