//! Versioned shared state. Every action runs through the state pipeline; the
//! pipeline's final stage applies it, reconciling writes that collide with a
//! value another application committed.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::conflict::{deep_equal, ConflictResolution, ConflictResolver, DetectOptions};
use crate::error::{PipelineError, Result};
use crate::pipeline::{Delivery, FinalHandler, StatePipeline};

/// A committed value
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateEntry {
    pub value: Value,
    pub version: u64,
    pub timestamp: i64,
    pub source: String,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StateAction {
    /// Write `value`. A writer that has seen the stored value passes a
    /// `version` greater than the stored one.
    #[serde(rename_all = "camelCase")]
    Set {
        path: String,
        value: Value,
        source: String,
        #[serde(default)]
        version: Option<u64>,
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Delete { path: String, source: String },
}

impl StateAction {
    pub fn set(path: impl Into<String>, value: Value, source: impl Into<String>) -> Self {
        StateAction::Set {
            path: path.into(),
            value,
            source: source.into(),
            version: None,
            timestamp: None,
        }
    }

    pub fn delete(path: impl Into<String>, source: impl Into<String>) -> Self {
        StateAction::Delete {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            StateAction::Set { path, .. } | StateAction::Delete { path, .. } => path,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            StateAction::Set { source, .. } | StateAction::Delete { source, .. } => source,
        }
    }
}

/// Payload of the state pipeline. `state` holds the stored entry before
/// the action is applied and the committed entry afterwards.
#[derive(Clone, Debug, PartialEq)]
pub struct StateDispatch {
    pub action: StateAction,
    pub state: Option<StateEntry>,
    pub resolution: Option<ConflictResolution>,
}

/// Result of a dispatched action
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StateCommit {
    pub path: String,
    pub entry: Option<StateEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ConflictResolution>,
    /// Middleware that ended the run before the action was applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_by: Option<String>,
}

pub struct SharedState {
    entries: DashMap<String, StateEntry>,
    pipeline: Arc<StatePipeline>,
    resolver: Arc<ConflictResolver>,
    clock: Arc<dyn Clock>,
    commit: Mutex<()>,
}

impl std::fmt::Debug for SharedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedState")
            .field("entries", &self.entries.len())
            .finish()
    }
}

struct ApplyAction<'a> {
    state: &'a SharedState,
}

#[async_trait]
impl<'a> FinalHandler<StateDispatch> for ApplyAction<'a> {
    async fn handle(&self, dispatch: StateDispatch) -> std::result::Result<StateDispatch, PipelineError> {
        self.state.apply(dispatch)
    }
}

impl SharedState {
    pub fn new(pipeline: Arc<StatePipeline>, resolver: Arc<ConflictResolver>, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            pipeline,
            resolver,
            clock,
            commit: Mutex::new(()),
        }
    }

    pub fn pipeline(&self) -> &Arc<StatePipeline> {
        &self.pipeline
    }

    pub fn get(&self, path: &str) -> Option<StateEntry> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> HashMap<String, StateEntry> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub async fn set(&self, path: &str, value: Value, source: &str) -> Result<StateCommit> {
        self.dispatch(StateAction::set(path, value, source)).await
    }

    pub async fn delete(&self, path: &str, source: &str) -> Result<StateCommit> {
        self.dispatch(StateAction::delete(path, source)).await
    }

    /// Run `action` through the state pipeline and apply it. Dispatches are
    /// applied one at a time.
    pub async fn dispatch(&self, action: StateAction) -> Result<StateCommit> {
        let _guard = self.commit.lock().await;
        let path = action.path().to_string();
        let dispatch = StateDispatch {
            state: self.get(&path),
            action,
            resolution: None,
        };

        let delivery = self
            .pipeline
            .process_with(dispatch, &ApplyAction { state: self })
            .await?;
        let commit = match delivery {
            Delivery::Completed(dispatch) => StateCommit {
                path,
                entry: dispatch.state,
                resolution: dispatch.resolution,
                skipped_by: None,
            },
            Delivery::ShortCircuited { middleware, .. } => StateCommit {
                entry: self.get(&path),
                path,
                resolution: None,
                skipped_by: Some(middleware),
            },
        };
        Ok(commit)
    }

    fn apply(&self, mut dispatch: StateDispatch) -> std::result::Result<StateDispatch, PipelineError> {
        let now = self.clock.now_ms();
        match &dispatch.action {
            StateAction::Delete { path, source } => {
                self.entries.remove(path);
                debug!(path = %path, source = %source, "Deleted state");
                dispatch.state = None;
            }
            StateAction::Set {
                path,
                value,
                source,
                version,
                timestamp,
            } => {
                let timestamp = timestamp.unwrap_or(now);
                let current = self.get(path);
                let entry = match current {
                    None => StateEntry {
                        value: value.clone(),
                        version: version.unwrap_or(1).max(1),
                        timestamp,
                        source: source.clone(),
                    },
                    Some(current)
                        if current.source == *source
                            || version.is_some_and(|v| v > current.version)
                            || deep_equal(&current.value, value) =>
                    {
                        StateEntry {
                            value: value.clone(),
                            version: version.unwrap_or(0).max(current.version + 1),
                            timestamp,
                            source: source.clone(),
                        }
                    }
                    Some(current) => {
                        let remote_version = version.unwrap_or(current.version);
                        let options = DetectOptions::default()
                            .versions(current.version, remote_version)
                            .timestamps(current.timestamp, timestamp)
                            .sources(current.source.clone(), source.clone());
                        let resolved = self
                            .resolver
                            .detect_conflict(path, current.value.clone(), value.clone(), options)
                            .and_then(|conflict| match conflict {
                                Some(conflict) => self.resolver.auto_resolve(&conflict.id).map(Some),
                                None => Ok(None),
                            })
                            .map_err(|err| PipelineError::failed(err.to_string()))?;

                        let value = match &resolved {
                            Some(resolution) => resolution.resolved_value.clone(),
                            None => value.clone(),
                        };
                        if let Some(resolution) = &resolved {
                            info!(
                                path = %path,
                                strategy = %resolution.strategy,
                                "Reconciled concurrent write"
                            );
                        }
                        dispatch.resolution = resolved;
                        StateEntry {
                            value,
                            version: current.version.max(remote_version) + 1,
                            timestamp: timestamp.max(current.timestamp),
                            source: source.clone(),
                        }
                    }
                };
                self.entries.insert(path.clone(), entry.clone());
                dispatch.state = Some(entry);
            }
        }
        Ok(dispatch)
    }
}
