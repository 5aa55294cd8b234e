use std::sync::Arc;

use axum::extract::{Path, State};
use serde_json::json;
use tracing::{event, instrument, Level};

use crate::error::LinkError;
use crate::hub::Hub;
use crate::limiters::RateLimitDecision;

#[instrument(skip(hub), level = "debug")]
pub async fn check_limit(
    Path(key): Path<String>,
    State(hub): State<Arc<Hub>>,
) -> Result<axum::Json<RateLimitDecision>, LinkError> {
    hub.limiter
        .peek(&key)
        .await
        .map_err(|err| {
            event!(
                Level::ERROR,
                message = "Failed checking limit",
                err = format!("{:?}", err)
            );
            err
        })
        .map(axum::Json)
}

#[instrument(skip(hub), level = "debug")]
pub async fn expire_keys(
    State(hub): State<Arc<Hub>>,
) -> Result<axum::Json<serde_json::Value>, LinkError> {
    let expired = hub.limiter.expire_keys().await?;
    Ok(axum::Json(json!({ "expired": expired })))
}
