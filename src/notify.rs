//! System notifications raised on terminal queue failures and detected
//! conflicts. The sink is pluggable; the default writes to `tracing`.
use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::event::Priority;

/// Coarse severity classification, lowest to highest
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Pipeline,
    RateLimit,
    Queue,
    Conflict,
    Storage,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Pipeline => write!(f, "pipeline"),
            Category::RateLimit => write!(f, "rate_limit"),
            Category::Queue => write!(f, "queue"),
            Category::Conflict => write!(f, "conflict"),
            Category::Storage => write!(f, "storage"),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Notification {
    pub message: String,
    pub category: Category,
    pub severity: Severity,
    pub priority: Priority,
    pub context: Value,
}

impl Notification {
    pub fn new(message: impl Into<String>, category: Category, severity: Severity) -> Self {
        Self {
            message: message.into(),
            category,
            severity,
            priority: Priority::Normal,
            context: Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// Sink for user-facing notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Critical | Severity::High => error!(
                category = %notification.category,
                severity = %notification.severity,
                priority = %notification.priority,
                context = %notification.context,
                "{}",
                notification.message
            ),
            Severity::Medium => warn!(
                category = %notification.category,
                context = %notification.context,
                "{}",
                notification.message
            ),
            Severity::Low => info!(
                category = %notification.category,
                "{}",
                notification.message
            ),
        }
    }
}

/// Keeps every notification in memory; handy for inspecting what a
/// component reported.
#[derive(Debug, Default)]
pub struct CollectingNotifier {
    received: Mutex<Vec<Notification>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.received
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }
}

impl Notifier for CollectingNotifier {
    fn notify(&self, notification: Notification) {
        if let Ok(mut received) = self.received.lock() {
            received.push(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_notifier_keeps_order() {
        let notifier = CollectingNotifier::new();
        notifier.notify(Notification::new("first", Category::Queue, Severity::High));
        notifier.notify(
            Notification::new("second", Category::Conflict, Severity::Critical)
                .with_priority(Priority::Urgent),
        );
        let got = notifier.notifications();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].message, "first");
        assert_eq!(got[1].priority, Priority::Urgent);
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
    }
}
