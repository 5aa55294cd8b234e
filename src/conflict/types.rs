use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConflictError;
use crate::notify::Severity;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
    VersionMismatch,
    TimestampConflict,
    TypeMismatch,
    StructureChange,
    ContentDivergence,
    DependencyConflict,
    ConcurrentModification,
}

impl ConflictType {
    pub fn severity(&self) -> Severity {
        match self {
            ConflictType::TypeMismatch | ConflictType::StructureChange => Severity::Critical,
            ConflictType::VersionMismatch | ConflictType::DependencyConflict => Severity::High,
            ConflictType::TimestampConflict | ConflictType::ConcurrentModification => {
                Severity::Medium
            }
            ConflictType::ContentDivergence => Severity::Low,
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictType::VersionMismatch => "version-mismatch",
            ConflictType::TimestampConflict => "timestamp-conflict",
            ConflictType::TypeMismatch => "type-mismatch",
            ConflictType::StructureChange => "structure-change",
            ConflictType::ContentDivergence => "content-divergence",
            ConflictType::DependencyConflict => "dependency-conflict",
            ConflictType::ConcurrentModification => "concurrent-modification",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    LocalWins,
    RemoteWins,
    NewestWins,
    OldestWins,
    MergeDeep,
    MergeShallow,
    UserChoice,
    CustomResolver,
    FallbackDefault,
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionStrategy::LocalWins => "local-wins",
            ResolutionStrategy::RemoteWins => "remote-wins",
            ResolutionStrategy::NewestWins => "newest-wins",
            ResolutionStrategy::OldestWins => "oldest-wins",
            ResolutionStrategy::MergeDeep => "merge-deep",
            ResolutionStrategy::MergeShallow => "merge-shallow",
            ResolutionStrategy::UserChoice => "user-choice",
            ResolutionStrategy::CustomResolver => "custom-resolver",
            ResolutionStrategy::FallbackDefault => "fallback-default",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for ResolutionStrategy {
    type Err = ConflictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "local-wins" => Ok(ResolutionStrategy::LocalWins),
            "remote-wins" => Ok(ResolutionStrategy::RemoteWins),
            "newest-wins" => Ok(ResolutionStrategy::NewestWins),
            "oldest-wins" => Ok(ResolutionStrategy::OldestWins),
            "merge-deep" => Ok(ResolutionStrategy::MergeDeep),
            "merge-shallow" => Ok(ResolutionStrategy::MergeShallow),
            "user-choice" => Ok(ResolutionStrategy::UserChoice),
            "custom-resolver" => Ok(ResolutionStrategy::CustomResolver),
            "fallback-default" => Ok(ResolutionStrategy::FallbackDefault),
            _ => Err(ConflictError::UnknownStrategy(s.to_string())),
        }
    }
}

/// Optional metadata about the two competing values
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DetectOptions {
    pub local_version: Option<u64>,
    pub remote_version: Option<u64>,
    pub local_timestamp: Option<i64>,
    pub remote_timestamp: Option<i64>,
    pub local_source: Option<String>,
    pub remote_source: Option<String>,
}

impl DetectOptions {
    pub fn versions(mut self, local: u64, remote: u64) -> Self {
        self.local_version = Some(local);
        self.remote_version = Some(remote);
        self
    }

    pub fn timestamps(mut self, local: i64, remote: i64) -> Self {
        self.local_timestamp = Some(local);
        self.remote_timestamp = Some(remote);
        self
    }

    pub fn sources(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.local_source = Some(local.into());
        self.remote_source = Some(remote.into());
        self
    }
}

/// A detected disagreement between two copies of the value at `path`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictData {
    pub id: String,
    pub path: String,
    pub local_value: Value,
    pub remote_value: Value,
    pub local_version: u64,
    pub remote_version: u64,
    pub local_timestamp: i64,
    pub remote_timestamp: i64,
    pub local_source: String,
    pub remote_source: String,
    pub conflict_type: ConflictType,
    pub severity: Severity,
    pub detected_at: i64,
}

/// Outcome of a successful resolution, kept in history
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResolution {
    pub conflict_id: String,
    pub path: String,
    pub conflict_type: ConflictType,
    pub strategy: ResolutionStrategy,
    pub resolved_value: Value,
    pub resolved_at: i64,
    /// Milliseconds between detection and resolution
    pub resolution_time_ms: i64,
    /// Selected by the rule engine rather than the caller
    pub automatic: bool,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConflictStats {
    pub pending: usize,
    pub resolved: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub average_resolution_ms: f64,
    pub by_type: HashMap<ConflictType, usize>,
    pub by_strategy: HashMap<ResolutionStrategy, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_mapping() {
        assert_eq!(ConflictType::TypeMismatch.severity(), Severity::Critical);
        assert_eq!(ConflictType::StructureChange.severity(), Severity::Critical);
        assert_eq!(ConflictType::VersionMismatch.severity(), Severity::High);
        assert_eq!(ConflictType::DependencyConflict.severity(), Severity::High);
        assert_eq!(ConflictType::TimestampConflict.severity(), Severity::Medium);
        assert_eq!(ConflictType::ConcurrentModification.severity(), Severity::Medium);
        assert_eq!(ConflictType::ContentDivergence.severity(), Severity::Low);
    }

    #[test]
    fn strategy_names() {
        assert_eq!(
            "merge_deep".parse::<ResolutionStrategy>(),
            Ok(ResolutionStrategy::MergeDeep)
        );
        assert_eq!(ResolutionStrategy::FallbackDefault.to_string(), "fallback-default");
        assert_eq!(
            "coin-flip".parse::<ResolutionStrategy>(),
            Err(ConflictError::UnknownStrategy("coin-flip".into()))
        );
        let json = serde_json::to_value(ResolutionStrategy::NewestWins).unwrap();
        assert_eq!(json, "newest-wins");
    }
}
