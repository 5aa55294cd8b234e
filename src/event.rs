//! Events routed between applications
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Delivery priority shared by events and queued messages.
/// Ordered so that `Urgent > High > Normal > Low`.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
            Priority::Urgent => write!(f, "urgent"),
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// A named, timestamped event travelling through the event pipeline.
///
/// `id` never changes once created; middleware may hand a modified copy
/// (new `data` or `metadata`) to the next stage.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub timestamp: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl Event {
    pub fn new(event_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            source: source.into(),
            target: None,
            timestamp: Utc::now().timestamp_millis(),
            data,
            priority: None,
            metadata: None,
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Insert a metadata entry, creating the map if needed
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.as_ref().and_then(|m| m.get(key))
    }

    /// Default rate-limit key: `type:source`
    pub fn default_key(&self) -> String {
        format!("{}:{}", self.event_type, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn priority_ordering() {
        assert!(Priority::Urgent > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
        assert_eq!("URGENT".parse::<Priority>().unwrap(), Priority::Urgent);
        assert!("whenever".parse::<Priority>().is_err());
    }

    #[test]
    fn event_wire_names() {
        let event = Event::new("cart:updated", "shop", json!({"items": 2}))
            .with_target("header")
            .with_priority(Priority::High);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "cart:updated");
        assert_eq!(value["priority"], "high");
        assert_eq!(value["target"], "header");
        assert!(value.get("metadata").is_none());
    }

    #[test]
    fn event_metadata_and_key() {
        let mut event = Event::new("user:login", "auth", Value::Null);
        assert_eq!(event.default_key(), "user:login:auth");
        event.set_metadata("trace", json!("abc"));
        assert_eq!(event.metadata_value("trace"), Some(&json!("abc")));
    }
}
