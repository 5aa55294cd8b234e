use std::sync::Arc;

use axum::{extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::instrument;

use crate::error::LinkError;
use crate::event::{Event, Priority};
use crate::hub::Hub;
use crate::pipeline::Delivery;

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl From<PublishRequest> for Event {
    fn from(request: PublishRequest) -> Self {
        let mut event = Event::new(request.event_type, request.source, request.data);
        event.target = request.target;
        event.priority = request.priority;
        event.metadata = request.metadata;
        event
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped_by: Option<String>,
    pub event: Event,
}

/// Delivered events answer 200; events a middleware took over (for example
/// deferred to the queue) answer 202.
#[instrument(skip(hub, request), level = "debug")]
pub async fn publish(
    State(hub): State<Arc<Hub>>,
    axum::Json(request): axum::Json<PublishRequest>,
) -> Result<(StatusCode, axum::Json<PublishResponse>), LinkError> {
    let (status, response) = match hub.publish(Event::from(request)).await? {
        Delivery::Completed(event) => (
            StatusCode::OK,
            PublishResponse {
                status: "delivered",
                stopped_by: None,
                event,
            },
        ),
        Delivery::ShortCircuited { middleware, payload } => (
            StatusCode::ACCEPTED,
            PublishResponse {
                status: "accepted",
                stopped_by: Some(middleware),
                event: payload,
            },
        ),
    };
    Ok((status, axum::Json(response)))
}
