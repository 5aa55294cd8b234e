use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::detect::classify;
use super::merge::{fallback_default, merge_deep, merge_shallow};
use super::rules::{default_rules, ConflictResolutionRule};
use super::types::{
    ConflictData, ConflictResolution, ConflictStats, DetectOptions, ResolutionStrategy,
};
use crate::clock::Clock;
use crate::concurrency_error;
use crate::error::{ConflictError, Result};
use crate::event::Priority;
use crate::notify::{Category, Notification, Notifier, Severity};
use crate::settings::CONFLICT_HISTORY_LIMIT;

/// Produces a value for conflicts at one path
pub type CustomResolver =
    Arc<dyn Fn(&ConflictData) -> std::result::Result<Value, String> + Send + Sync>;

/// Called for every newly detected conflict
pub type ConflictObserver = Arc<dyn Fn(&ConflictData) + Send + Sync>;

#[derive(Default)]
struct ResolverState {
    pending: HashMap<String, ConflictData>,
    history: VecDeque<ConflictResolution>,
    rules: Vec<ConflictResolutionRule>,
    custom_resolvers: HashMap<String, CustomResolver>,
    observers: Vec<ConflictObserver>,
    resolved: u64,
    failed: u64,
}

/// Detects conflicts, keeps them pending until resolved and archives every
/// resolution in a bounded history.
pub struct ConflictResolver {
    state: Mutex<ResolverState>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    history_limit: usize,
}

impl std::fmt::Debug for ConflictResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolver")
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

impl ConflictResolver {
    pub fn new(clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            state: Mutex::new(ResolverState::default()),
            clock,
            notifier,
            history_limit: CONFLICT_HISTORY_LIMIT,
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    /// Install the built-in rule set
    pub fn with_default_rules(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            for rule in default_rules() {
                Self::insert_rule(&mut state, rule);
            }
        }
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, ResolverState>> {
        self.state
            .lock()
            .map_err(|e| concurrency_error!("Failed to acquire conflict state lock: {}", e))
    }

    fn insert_rule(state: &mut ResolverState, rule: ConflictResolutionRule) {
        state.rules.retain(|existing| existing.name != rule.name);
        state.rules.push(rule);
        state.rules.sort_by_key(|rule| rule.priority);
    }

    /// Add or replace a rule by name
    pub fn add_rule(&self, rule: ConflictResolutionRule) -> Result<()> {
        let mut state = self.lock()?;
        debug!("Added conflict rule '{}' ({})", rule.name, rule.strategy);
        Self::insert_rule(&mut state, rule);
        Ok(())
    }

    pub fn remove_rule(&self, name: &str) -> Result<bool> {
        let mut state = self.lock()?;
        let before = state.rules.len();
        state.rules.retain(|rule| rule.name != name);
        Ok(before != state.rules.len())
    }

    pub fn rules(&self) -> Result<Vec<ConflictResolutionRule>> {
        Ok(self.lock()?.rules.clone())
    }

    pub fn register_custom_resolver<F>(&self, path: impl Into<String>, resolver: F) -> Result<()>
    where
        F: Fn(&ConflictData) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        self.lock()?
            .custom_resolvers
            .insert(path.into(), Arc::new(resolver));
        Ok(())
    }

    pub fn subscribe<F>(&self, observer: F) -> Result<()>
    where
        F: Fn(&ConflictData) + Send + Sync + 'static,
    {
        self.lock()?.observers.push(Arc::new(observer));
        Ok(())
    }

    /// Compare two copies of the value at `path`. Equal values yield `None`;
    /// otherwise the classified conflict is stored as pending and announced.
    pub fn detect_conflict(
        &self,
        path: &str,
        local: Value,
        remote: Value,
        options: DetectOptions,
    ) -> Result<Option<ConflictData>> {
        let Some(conflict_type) = classify(&local, &remote, &options) else {
            return Ok(None);
        };

        let now = self.clock.now_ms();
        let conflict = ConflictData {
            id: Uuid::new_v4().to_string(),
            path: path.to_string(),
            local_value: local,
            remote_value: remote,
            local_version: options.local_version.unwrap_or_default(),
            remote_version: options.remote_version.unwrap_or_default(),
            local_timestamp: options.local_timestamp.unwrap_or(now),
            remote_timestamp: options.remote_timestamp.unwrap_or(now),
            local_source: options.local_source.unwrap_or_else(|| "local".to_string()),
            remote_source: options.remote_source.unwrap_or_else(|| "remote".to_string()),
            conflict_type,
            severity: conflict_type.severity(),
            detected_at: now,
        };

        let observers = {
            let mut state = self.lock()?;
            state.pending.insert(conflict.id.clone(), conflict.clone());
            state.observers.clone()
        };
        info!(
            id = %conflict.id,
            path = %conflict.path,
            conflict_type = %conflict.conflict_type,
            severity = %conflict.severity,
            "Conflict detected"
        );
        for observer in observers {
            observer(&conflict);
        }

        let priority = match conflict.severity {
            Severity::Critical => Priority::Urgent,
            Severity::High => Priority::High,
            _ => Priority::Normal,
        };
        self.notifier.notify(
            Notification::new(
                format!(
                    "Conflict at '{}': {} between {} and {}",
                    conflict.path,
                    conflict.conflict_type,
                    conflict.local_source,
                    conflict.remote_source
                ),
                Category::Conflict,
                conflict.severity,
            )
            .with_priority(priority)
            .with_context(json!({
                "conflictId": conflict.id,
                "path": conflict.path,
                "type": conflict.conflict_type,
            })),
        );

        Ok(Some(conflict))
    }

    /// Strategy the rule engine picks for `conflict`
    pub fn select_strategy(&self, conflict: &ConflictData) -> Result<ResolutionStrategy> {
        let state = self.lock()?;
        let strategy = state
            .rules
            .iter()
            .find(|rule| rule.applies_to(conflict))
            .map(|rule| {
                debug!("Rule '{}' matched conflict {}", rule.name, conflict.id);
                rule.strategy
            })
            .unwrap_or(ResolutionStrategy::NewestWins);
        Ok(strategy)
    }

    /// Resolve a pending conflict. Without a strategy the rule engine picks
    /// one. `user_value` is required by `user-choice`.
    pub fn resolve_conflict(
        &self,
        id: &str,
        strategy: Option<ResolutionStrategy>,
        user_value: Option<Value>,
    ) -> Result<ConflictResolution> {
        let (conflict, custom) = {
            let state = self.lock()?;
            let conflict = state.pending.get(id).cloned();
            let custom = conflict
                .as_ref()
                .and_then(|c| state.custom_resolvers.get(&c.path).cloned());
            (conflict, custom)
        };
        let Some(conflict) = conflict else {
            return Err(self.record_failure(ConflictError::NotFound(id.to_string())));
        };

        let (strategy, automatic) = match strategy {
            Some(strategy) => (strategy, false),
            None => (self.select_strategy(&conflict)?, true),
        };

        let resolved_value = match apply_strategy(&conflict, strategy, user_value, custom) {
            Ok(value) => value,
            Err(err) => return Err(self.record_failure(err)),
        };

        let now = self.clock.now_ms();
        let resolution = ConflictResolution {
            conflict_id: conflict.id.clone(),
            path: conflict.path.clone(),
            conflict_type: conflict.conflict_type,
            strategy,
            resolved_value,
            resolved_at: now,
            resolution_time_ms: (now - conflict.detected_at).max(0),
            automatic,
        };

        let mut state = self.lock()?;
        if state.pending.remove(id).is_none() {
            // resolved by someone else while the strategy ran
            state.failed += 1;
            return Err(ConflictError::NotFound(id.to_string()).into());
        }
        if state.history.len() >= self.history_limit {
            state.history.pop_front();
        }
        state.history.push_back(resolution.clone());
        state.resolved += 1;
        drop(state);

        info!(
            id = %resolution.conflict_id,
            path = %resolution.path,
            strategy = %resolution.strategy,
            automatic = resolution.automatic,
            "Conflict resolved"
        );
        Ok(resolution)
    }

    /// Resolve using a strategy given by name, as received over the wire
    pub fn resolve_conflict_named(
        &self,
        id: &str,
        strategy: Option<&str>,
        user_value: Option<Value>,
    ) -> Result<ConflictResolution> {
        let strategy = match strategy.map(str::parse::<ResolutionStrategy>).transpose() {
            Ok(strategy) => strategy,
            Err(err) => return Err(self.record_failure(err)),
        };
        self.resolve_conflict(id, strategy, user_value)
    }

    /// Resolve with whatever the rule engine selects
    pub fn auto_resolve(&self, id: &str) -> Result<ConflictResolution> {
        self.resolve_conflict(id, None, None)
    }

    fn record_failure(&self, err: ConflictError) -> crate::error::LinkError {
        warn!("Conflict resolution failed: {}", err);
        match self.lock() {
            Ok(mut state) => {
                state.failed += 1;
                err.into()
            }
            Err(lock_err) => lock_err,
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<ConflictData>> {
        Ok(self.lock()?.pending.get(id).cloned())
    }

    /// Pending conflicts, oldest first
    pub fn pending(&self) -> Result<Vec<ConflictData>> {
        let mut pending: Vec<ConflictData> = self.lock()?.pending.values().cloned().collect();
        pending.sort_by_key(|c| c.detected_at);
        Ok(pending)
    }

    pub fn history(&self) -> Result<Vec<ConflictResolution>> {
        Ok(self.lock()?.history.iter().cloned().collect())
    }

    pub fn clear_history(&self) -> Result<()> {
        self.lock()?.history.clear();
        Ok(())
    }

    pub fn stats(&self) -> Result<ConflictStats> {
        let state = self.lock()?;
        let attempts = state.resolved + state.failed;
        let success_rate = if attempts == 0 {
            1.0
        } else {
            state.resolved as f64 / attempts as f64
        };
        let average_resolution_ms = if state.history.is_empty() {
            0.0
        } else {
            state
                .history
                .iter()
                .map(|r| r.resolution_time_ms as f64)
                .sum::<f64>()
                / state.history.len() as f64
        };

        let mut by_type = HashMap::new();
        let mut by_strategy = HashMap::new();
        for resolution in state.history.iter() {
            *by_type.entry(resolution.conflict_type).or_insert(0) += 1;
            *by_strategy.entry(resolution.strategy).or_insert(0) += 1;
        }

        Ok(ConflictStats {
            pending: state.pending.len(),
            resolved: state.resolved,
            failed: state.failed,
            success_rate,
            average_resolution_ms,
            by_type,
            by_strategy,
        })
    }
}

fn apply_strategy(
    conflict: &ConflictData,
    strategy: ResolutionStrategy,
    user_value: Option<Value>,
    custom: Option<CustomResolver>,
) -> std::result::Result<Value, ConflictError> {
    let local = &conflict.local_value;
    let remote = &conflict.remote_value;
    let value = match strategy {
        ResolutionStrategy::LocalWins => local.clone(),
        ResolutionStrategy::RemoteWins => remote.clone(),
        ResolutionStrategy::NewestWins => {
            let local_wins = match conflict.local_timestamp.cmp(&conflict.remote_timestamp) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Less => false,
                std::cmp::Ordering::Equal => conflict.local_version >= conflict.remote_version,
            };
            if local_wins { local.clone() } else { remote.clone() }
        }
        ResolutionStrategy::OldestWins => {
            let local_wins = match conflict.local_timestamp.cmp(&conflict.remote_timestamp) {
                std::cmp::Ordering::Less => true,
                std::cmp::Ordering::Greater => false,
                std::cmp::Ordering::Equal => conflict.local_version <= conflict.remote_version,
            };
            if local_wins { local.clone() } else { remote.clone() }
        }
        ResolutionStrategy::MergeDeep => merge_deep(local, remote),
        ResolutionStrategy::MergeShallow => merge_shallow(local, remote),
        ResolutionStrategy::UserChoice => {
            user_value.ok_or_else(|| ConflictError::MissingUserChoice(conflict.id.clone()))?
        }
        ResolutionStrategy::CustomResolver => {
            let resolver =
                custom.ok_or_else(|| ConflictError::NoCustomResolver(conflict.path.clone()))?;
            resolver(conflict).map_err(|reason| ConflictError::Resolver {
                path: conflict.path.clone(),
                reason,
            })?
        }
        ResolutionStrategy::FallbackDefault => fallback_default(local),
    };
    Ok(value)
}
