//! Durable, priority aware message queue
pub mod message;
pub mod message_queue;
pub mod middleware;
pub mod retry;
pub mod stats;

pub use message::{NewMessage, ProcessingMode, QueueMessage};
pub use message_queue::{MessageFilter, MessageProcessor, MessageQueue, PERSISTENCE_KEY};
pub use middleware::DeferredDeliveryMiddleware;
pub use retry::{RetryCondition, RetryPolicy};
pub use stats::QueueStats;
