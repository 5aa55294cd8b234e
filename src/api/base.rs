use std::sync::Arc;

use axum::extract::State;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::hub::Hub;
use crate::limiters::Algorithm;
use crate::queue::ProcessingMode;
use crate::settings::{APP_NAME, APP_VERSION};

// basic handler that responds with a static string
pub async fn root() -> &'static str {
    "Welcome to interlink"
}

pub async fn health() -> &'static str {
    "OK"
}

/// Build information plus the active limiter and queue configuration
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutResponse {
    pub name: String,
    pub version: String,
    pub rate_limit_algorithm: Algorithm,
    pub processing_mode: ProcessingMode,
    pub persistence: bool,
}

impl AboutResponse {
    fn from_hub(hub: &Hub) -> Self {
        Self {
            name: APP_NAME.to_string(),
            version: APP_VERSION.to_string(),
            rate_limit_algorithm: hub.settings.rate_limit.algorithm,
            processing_mode: hub.settings.queue.processing_mode,
            persistence: hub.settings.queue.persistence,
        }
    }
}

#[instrument(skip(hub))]
pub async fn about(State(hub): State<Arc<Hub>>) -> axum::Json<AboutResponse> {
    axum::Json(AboutResponse::from_hub(&hub))
}
