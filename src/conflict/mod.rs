//! Conflict detection and resolution for concurrently modified shared values
pub mod detect;
pub mod merge;
pub mod resolver;
pub mod rules;
pub mod types;

pub use detect::{classify, deep_equal};
pub use resolver::{ConflictObserver, ConflictResolver, CustomResolver};
pub use rules::{default_rules, ConflictResolutionRule, RuleCondition};
pub use types::{
    ConflictData, ConflictResolution, ConflictStats, ConflictType, DetectOptions,
    ResolutionStrategy,
};
