//! Rules consulted when a conflict is resolved without an explicit strategy
use std::sync::Arc;

use super::types::{ConflictData, ConflictType, ResolutionStrategy};
use crate::notify::Severity;

pub type RuleCondition = Arc<dyn Fn(&ConflictData) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ConflictResolutionRule {
    pub name: String,
    pub condition: RuleCondition,
    pub strategy: ResolutionStrategy,
    pub priority: i32,
    /// Apply even when the conflict is more than low severity
    pub auto_apply: bool,
}

impl std::fmt::Debug for ConflictResolutionRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConflictResolutionRule")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("priority", &self.priority)
            .field("auto_apply", &self.auto_apply)
            .finish()
    }
}

impl ConflictResolutionRule {
    pub fn new<F>(name: impl Into<String>, strategy: ResolutionStrategy, condition: F) -> Self
    where
        F: Fn(&ConflictData) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            condition: Arc::new(condition),
            strategy,
            priority: 100,
            auto_apply: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn auto_apply(mut self, auto_apply: bool) -> Self {
        self.auto_apply = auto_apply;
        self
    }

    /// Condition holds and the rule may be applied without a caller
    pub fn applies_to(&self, conflict: &ConflictData) -> bool {
        (self.condition)(conflict) && (self.auto_apply || conflict.severity == Severity::Low)
    }
}

/// Rules installed by `ConflictResolver::with_default_rules`
pub fn default_rules() -> Vec<ConflictResolutionRule> {
    vec![
        ConflictResolutionRule::new("merge-diverged-objects", ResolutionStrategy::MergeDeep, |c| {
            c.conflict_type == ConflictType::ContentDivergence
                && c.local_value.is_object()
                && c.remote_value.is_object()
        })
        .with_priority(10),
        ConflictResolutionRule::new("newest-timestamp", ResolutionStrategy::NewestWins, |c| {
            c.conflict_type == ConflictType::TimestampConflict
        })
        .with_priority(20),
        ConflictResolutionRule::new("higher-version", ResolutionStrategy::NewestWins, |c| {
            c.conflict_type == ConflictType::VersionMismatch
        })
        .with_priority(30),
        ConflictResolutionRule::new("merge-structure-change", ResolutionStrategy::MergeDeep, |c| {
            c.conflict_type == ConflictType::StructureChange
                && c.local_value.is_object()
                && c.remote_value.is_object()
        })
        .with_priority(40)
        .auto_apply(false),
    ]
}
