use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::{json, Value};
use tracing::instrument;

use crate::error::LinkError;
use crate::hub::Hub;
use crate::queue::{NewMessage, QueueMessage, QueueStats};

#[instrument(skip(hub, message), level = "debug")]
pub async fn enqueue(
    State(hub): State<Arc<Hub>>,
    axum::Json(message): axum::Json<NewMessage>,
) -> Result<(StatusCode, axum::Json<Value>), LinkError> {
    let id = hub.queue.enqueue(message).await?;
    Ok((StatusCode::CREATED, axum::Json(json!({ "id": id }))))
}

#[instrument(skip(hub), level = "debug")]
pub async fn list_messages(State(hub): State<Arc<Hub>>) -> axum::Json<Vec<QueueMessage>> {
    axum::Json(hub.queue.messages().await)
}

#[instrument(skip(hub), level = "debug")]
pub async fn remove_message(
    Path(id): Path<String>,
    State(hub): State<Arc<Hub>>,
) -> Result<axum::Json<QueueMessage>, LinkError> {
    Ok(axum::Json(hub.queue.remove(&id).await?))
}

#[instrument(skip(hub), level = "debug")]
pub async fn stats(State(hub): State<Arc<Hub>>) -> axum::Json<QueueStats> {
    axum::Json(hub.queue.stats().await)
}

#[instrument(skip(hub), level = "debug")]
pub async fn process(State(hub): State<Arc<Hub>>) -> axum::Json<Value> {
    let handled = hub.queue.process_messages().await;
    axum::Json(json!({ "handled": handled }))
}

#[instrument(skip(hub), level = "debug")]
pub async fn clear(State(hub): State<Arc<Hub>>) -> axum::Json<Value> {
    let cleared = hub.queue.clear().await;
    axum::Json(json!({ "cleared": cleared }))
}
