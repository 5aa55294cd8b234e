use std::sync::Arc;

use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::conflict::{ConflictData, ConflictResolution, ConflictStats};
use crate::error::LinkError;
use crate::hub::Hub;

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    /// Strategy name; the rule engine decides when absent
    #[serde(default)]
    pub strategy: Option<String>,
    /// Value for `user-choice`
    #[serde(default)]
    pub value: Option<Value>,
}

#[instrument(skip(hub), level = "debug")]
pub async fn pending(
    State(hub): State<Arc<Hub>>,
) -> Result<axum::Json<Vec<ConflictData>>, LinkError> {
    Ok(axum::Json(hub.resolver.pending()?))
}

#[instrument(skip(hub), level = "debug")]
pub async fn history(
    State(hub): State<Arc<Hub>>,
) -> Result<axum::Json<Vec<ConflictResolution>>, LinkError> {
    Ok(axum::Json(hub.resolver.history()?))
}

#[instrument(skip(hub), level = "debug")]
pub async fn stats(State(hub): State<Arc<Hub>>) -> Result<axum::Json<ConflictStats>, LinkError> {
    Ok(axum::Json(hub.resolver.stats()?))
}

#[instrument(skip(hub, request), level = "debug")]
pub async fn resolve(
    Path(id): Path<String>,
    State(hub): State<Arc<Hub>>,
    axum::Json(request): axum::Json<ResolveRequest>,
) -> Result<axum::Json<ConflictResolution>, LinkError> {
    let resolution = hub
        .resolver
        .resolve_conflict_named(&id, request.strategy.as_deref(), request.value)?;
    Ok(axum::Json(resolution))
}
