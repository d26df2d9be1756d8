//! Opportunity alerts raised by the radar

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Breakout,
    Reversal,
    Momentum,
    VolumeSpike,
}

impl AlertType {
    /// How long an alert of this type stays active
    pub fn lifetime(&self) -> Duration {
        match self {
            AlertType::VolumeSpike => Duration::minutes(30),
            AlertType::Breakout => Duration::hours(2),
            AlertType::Reversal => Duration::hours(4),
            AlertType::Momentum => Duration::hours(6),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 90.0 {
            AlertPriority::Critical
        } else if confidence >= 80.0 {
            AlertPriority::High
        } else if confidence >= 70.0 {
            AlertPriority::Medium
        } else {
            AlertPriority::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityAlert {
    pub id: String,
    pub symbol: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    /// 0-100
    pub confidence: f64,
    pub message: String,
    pub details: HashMap<String, f64>,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl OpportunityAlert {
    pub fn new(symbol: &str, alert_type: AlertType, confidence: f64, message: String, timestamp: DateTime<Utc>) -> Self {
        let confidence = confidence.clamp(0.0, 100.0);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            alert_type,
            priority: AlertPriority::from_confidence(confidence),
            confidence,
            message,
            details: HashMap::new(),
            timestamp,
            expires_at: timestamp + alert_type.lifetime(),
        }
    }

    pub fn with_details(mut self, details: HashMap<String, f64>) -> Self {
        self.details = details;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}
