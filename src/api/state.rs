use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::error::LinkError;
use crate::hub::Hub;
use crate::state::{StateAction, StateCommit, StateEntry};

#[derive(Debug, Deserialize)]
pub struct WriteRequest {
    pub value: Value,
    pub source: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[instrument(skip(hub), level = "debug")]
pub async fn all(State(hub): State<Arc<Hub>>) -> axum::Json<HashMap<String, StateEntry>> {
    axum::Json(hub.state.snapshot())
}

#[instrument(skip(hub), level = "debug")]
pub async fn read(
    Path(path): Path<String>,
    State(hub): State<Arc<Hub>>,
) -> Result<axum::Json<StateEntry>, StatusCode> {
    hub.state
        .get(&path)
        .map(axum::Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[instrument(skip(hub, request), level = "debug")]
pub async fn write(
    Path(path): Path<String>,
    State(hub): State<Arc<Hub>>,
    axum::Json(request): axum::Json<WriteRequest>,
) -> Result<axum::Json<StateCommit>, LinkError> {
    let action = StateAction::Set {
        path,
        value: request.value,
        source: request.source,
        version: request.version,
        timestamp: request.timestamp,
    };
    Ok(axum::Json(hub.state.dispatch(action).await?))
}
