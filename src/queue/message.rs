//! Queued units of work
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::event::{Event, Priority};

/// Order in which queued messages are drained
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Fifo,
    Lifo,
    #[default]
    Priority,
}

impl fmt::Display for ProcessingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingMode::Fifo => write!(f, "fifo"),
            ProcessingMode::Lifo => write!(f, "lifo"),
            ProcessingMode::Priority => write!(f, "priority"),
        }
    }
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fifo" => Ok(ProcessingMode::Fifo),
            "lifo" => Ok(ProcessingMode::Lifo),
            "priority" => Ok(ProcessingMode::Priority),
            _ => Err(format!("Invalid processing mode: {}", s)),
        }
    }
}

/// A message held by the queue
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub data: Value,
    pub priority: Priority,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Earliest time a retried message may run again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_at: Option<i64>,
    /// Enqueue order, used to find the oldest message on overflow
    #[serde(default)]
    pub sequence: u64,
}

impl QueueMessage {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }

    pub fn is_available(&self, now: i64) -> bool {
        self.available_at.map_or(true, |at| at <= now)
    }

    pub fn age_ms(&self, now: i64) -> i64 {
        (now - self.timestamp).max(0)
    }
}

/// Caller supplied part of a message; the queue fills in the rest
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub priority: Priority,
    pub source: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    /// Relative expiry; the message is discarded if still queued afterwards
    #[serde(default)]
    pub expires_in_ms: Option<u64>,
    /// Overrides the queue-wide retry limit
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl NewMessage {
    pub fn new(message_type: impl Into<String>, source: impl Into<String>, data: Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
            priority: Priority::Normal,
            source: source.into(),
            target: None,
            metadata: None,
            expires_in_ms: None,
            max_retries: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn expires_in(mut self, ms: u64) -> Self {
        self.expires_in_ms = Some(ms);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub(crate) fn into_message(self, now: i64, default_max_retries: u32, sequence: u64) -> QueueMessage {
        QueueMessage {
            id: Uuid::new_v4().to_string(),
            message_type: self.message_type,
            data: self.data,
            priority: self.priority,
            timestamp: now,
            expires_at: self.expires_in_ms.map(|ms| now + ms as i64),
            retry_count: 0,
            max_retries: self.max_retries.unwrap_or(default_max_retries),
            source: self.source,
            target: self.target,
            metadata: self.metadata,
            available_at: None,
            sequence,
        }
    }
}

impl From<Event> for NewMessage {
    fn from(event: Event) -> Self {
        let mut metadata = event.metadata.unwrap_or_default();
        metadata.insert("eventId".to_string(), Value::String(event.id));
        Self {
            message_type: event.event_type,
            data: event.data,
            priority: event.priority.unwrap_or_default(),
            source: event.source,
            target: event.target,
            metadata: Some(metadata),
            expires_in_ms: None,
            max_retries: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_message_defaults() {
        let message = NewMessage::new("sync", "cart", json!({"n": 1}))
            .expires_in(500)
            .into_message(1_000, 3, 7);
        assert_eq!(message.priority, Priority::Normal);
        assert_eq!(message.expires_at, Some(1_500));
        assert_eq!(message.max_retries, 3);
        assert_eq!(message.retry_count, 0);
        assert_eq!(message.sequence, 7);
        assert!(!message.is_expired(1_500));
        assert!(message.is_expired(1_501));
        assert!(message.is_available(0));
    }

    #[test]
    fn deserializes_wire_shape() {
        let new: NewMessage = serde_json::from_value(json!({
            "type": "order.placed",
            "source": "checkout",
            "priority": "urgent",
            "data": {"id": 9}
        }))
        .unwrap();
        assert_eq!(new.message_type, "order.placed");
        assert_eq!(new.priority, Priority::Urgent);

        let message = new.into_message(0, 3, 0);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "order.placed");
        assert_eq!(value["retryCount"], 0);
        assert!(value.get("expiresAt").is_none());
    }

    #[test]
    fn from_event_keeps_origin() {
        let event = Event::new("notify", "shell", json!({})).with_priority(Priority::High);
        let id = event.id.clone();
        let new = NewMessage::from(event);
        assert_eq!(new.priority, Priority::High);
        assert_eq!(new.metadata.unwrap()["eventId"], Value::String(id));
    }

    #[test]
    fn mode_round_trip() {
        assert_eq!("LIFO".parse::<ProcessingMode>(), Ok(ProcessingMode::Lifo));
        assert_eq!(ProcessingMode::Priority.to_string(), "priority");
        assert!("random".parse::<ProcessingMode>().is_err());
    }
}
