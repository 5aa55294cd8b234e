mod base;
mod conflicts;
mod events;
mod queue;
mod rate_limits;
mod state;

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
    error_handling::HandleErrorLayer, http::StatusCode, response::IntoResponse, routing, Router,
};
use tokio::time::Duration;
use tower::{BoxError, ServiceBuilder};
use tower_http::trace::TraceLayer;

pub mod paths;

pub use events::{PublishRequest, PublishResponse};

use crate::hub::Hub;

/// Build the HTTP API over a hub
pub fn api(hub: Arc<Hub>) -> Router {
    Router::new()
        .route(paths::base::ROOT, routing::get(base::root))
        .route(paths::base::HEALTH, routing::get(base::health))
        .route(paths::base::ABOUT, routing::get(base::about))
        // Events
        .route(paths::EVENTS, routing::post(events::publish))
        // Rate limiting
        .route(paths::rate_limits::CHECK, routing::get(rate_limits::check_limit))
        .route(paths::EXPIRE_KEYS, routing::post(rate_limits::expire_keys))
        // Message queue
        .route(paths::queue::QUEUE, routing::delete(queue::clear))
        .route(
            paths::queue::MESSAGES,
            routing::post(queue::enqueue).get(queue::list_messages),
        )
        .route(paths::queue::MESSAGE, routing::delete(queue::remove_message))
        .route(paths::queue::STATS, routing::get(queue::stats))
        .route(paths::queue::PROCESS, routing::post(queue::process))
        // Conflicts
        .route(paths::conflicts::PENDING, routing::get(conflicts::pending))
        .route(paths::conflicts::STATS, routing::get(conflicts::stats))
        .route(paths::conflicts::HISTORY, routing::get(conflicts::history))
        .route(paths::conflicts::RESOLVE, routing::post(conflicts::resolve))
        // Shared state
        .route(paths::state::ALL, routing::get(state::all))
        .route(paths::state::PATH, routing::get(state::read).put(state::write))
        .layer(
            ServiceBuilder::new()
                // Handle errors from middleware
                .layer(HandleErrorLayer::new(handle_error))
                .load_shed()
                .timeout(Duration::from_secs(10)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

async fn handle_error(error: BoxError) -> impl IntoResponse {
    if error.is::<tower::timeout::error::Elapsed>() {
        return (StatusCode::REQUEST_TIMEOUT, Cow::from("request timed out"));
    }

    if error.is::<tower::load_shed::error::Overloaded>() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Cow::from("service is overloaded, try again later"),
        );
    }

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Cow::from(format!("Unhandled internal error: {}", error)),
    )
}
