//! Ordered chain-of-responsibility for events and state actions
pub mod context;
pub mod manager;
pub mod middlewares;

pub use context::{ExecutionContext, RunState, StageRecord};
pub use manager::{
    Delivery, ErrorHandler, FinalHandler, Middleware, MiddlewareInfo, MiddlewareManager, Next,
    Passthrough, PipelineRun, DEFAULT_PRIORITY,
};
pub use middlewares::{LoggingMiddleware, ValidationMiddleware};

use crate::event::Event;
use crate::state::StateDispatch;

/// Chain every published event runs through
pub type EventPipeline = MiddlewareManager<Event>;

/// Chain every state action runs through before it is applied
pub type StatePipeline = MiddlewareManager<StateDispatch>;
