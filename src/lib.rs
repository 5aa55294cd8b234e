//! Cross-application communication layer: event middleware, rate limiting,
//! a durable priority queue and conflict resolution for shared state.
pub mod api;
pub mod cli;
pub mod clock;
pub mod conflict;
pub mod error;
pub mod event;
pub mod hub;
pub mod limiters;
pub mod notify;
pub mod pipeline;
pub mod queue;
pub mod settings;
pub mod state;
pub mod storage;

pub use error::{LinkError, Result};
pub use hub::Hub;
