//! Moves selected events off the synchronous path and onto the queue
use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::message::NewMessage;
use super::message_queue::MessageQueue;
use crate::error::PipelineError;
use crate::event::Event;
use crate::pipeline::{Middleware, Next};

pub const DEFERRED_DELIVERY_PRIORITY: i32 = 50;

/// Events whose type is in `types` are enqueued for background processing
/// and the run ends here. The returned event carries `queuedMessageId` in
/// its metadata.
pub struct DeferredDeliveryMiddleware {
    queue: MessageQueue,
    types: HashSet<String>,
}

impl DeferredDeliveryMiddleware {
    pub fn new<I, S>(queue: MessageQueue, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue,
            types: types.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Middleware<Event> for DeferredDeliveryMiddleware {
    fn name(&self) -> &str {
        "deferred-delivery"
    }

    fn priority(&self) -> i32 {
        DEFERRED_DELIVERY_PRIORITY
    }

    async fn process(&self, mut event: Event, next: Next<'_, Event>) -> Result<Event, PipelineError> {
        if !self.types.contains(&event.event_type) {
            return next.run(event).await;
        }

        let id = self
            .queue
            .enqueue(NewMessage::from(event.clone()))
            .await
            .map_err(|err| PipelineError::failed(err.to_string()))?;
        debug!(event = %event.id, message = %id, "Deferred event to queue");
        event.set_metadata("queuedMessageId", Value::String(id));
        Ok(event)
    }
}
