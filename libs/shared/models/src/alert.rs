use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    /// Band priority for a correlation magnitude.
    pub fn from_correlation(magnitude: f64) -> Self {
        let magnitude = magnitude.abs();
        if magnitude > 0.8 {
            AlertPriority::Critical
        } else if magnitude >= 0.6 {
            AlertPriority::High
        } else if magnitude >= 0.4 {
            AlertPriority::Medium
        } else {
            AlertPriority::Low
        }
    }
}

impl fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AlertPriority::Low => "low",
            AlertPriority::Medium => "medium",
            AlertPriority::High => "high",
            AlertPriority::Critical => "critical",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    CorrelationShift,
    Opportunity,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        priority: AlertPriority,
        title: impl Into<String>,
        message: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type,
            priority,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    pub fn system(priority: AlertPriority, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AlertType::System, priority, title, message, Value::Null)
    }

    pub fn league(&self) -> Option<&str> {
        self.data.get("league").and_then(Value::as_str)
    }
}
