use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::bus::EventType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Push,
    InApp,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
            Channel::InApp => "in_app",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Channel::Email),
            "sms" => Some(Channel::Sms),
            "push" => Some(Channel::Push),
            "in_app" => Some(Channel::InApp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    Delivered,
    Skipped,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Skipped => "skipped",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryStatus::Sent | DeliveryStatus::Delivered)
    }
}

/// What one adapter send attempt produced.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub status: DeliveryStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub external_id: Option<String>,
    pub error: Option<String>,
}

/// One recorded dispatch: channel, outcome, payload.
#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub event_type: String,
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub payload_json: Value,
    pub sent_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub external_id: Option<String>,
}

/// Per-user channel preferences, stored as JSON.
///
/// `channels` switches a channel on or off globally; `events` maps an
/// event type to the channels it should use. The effective set for an
/// event is their intersection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub channels: BTreeMap<String, bool>,
    pub events: BTreeMap<String, Vec<String>>,
}

impl Default for NotificationPreferences {
    fn default() -> Self {
        let mut channels = BTreeMap::new();
        channels.insert(Channel::InApp.as_str().to_string(), true);
        channels.insert(Channel::Email.as_str().to_string(), true);
        channels.insert(Channel::Sms.as_str().to_string(), false);
        channels.insert(Channel::Push.as_str().to_string(), false);

        let mut events = BTreeMap::new();
        let in_app_only = vec![Channel::InApp.as_str().to_string()];
        for event in [
            EventType::OptimizationCompleted,
            EventType::OptimizationFailed,
            EventType::StockLow,
            EventType::OrderCreated,
            EventType::OrderStatusChanged,
            EventType::OrderCompleted,
            EventType::DocumentShared,
            EventType::CommentAdded,
        ] {
            events.insert(event.as_str().to_string(), in_app_only.clone());
        }
        events.insert(
            EventType::Mention.as_str().to_string(),
            vec![
                Channel::InApp.as_str().to_string(),
                Channel::Email.as_str().to_string(),
            ],
        );

        Self { channels, events }
    }
}

impl NotificationPreferences {
    fn channel_enabled(&self, channel: Channel) -> bool {
        self.channels.get(channel.as_str()).copied().unwrap_or(false)
    }

    /// `events[event] ∩ enabled channels`, preserving the configured
    /// order.
    pub fn resolve(&self, event_type: EventType) -> Vec<Channel> {
        self.events
            .get(event_type.as_str())
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| Channel::parse(n))
                    .filter(|c| self.channel_enabled(*c))
                    .collect()
            })
            .unwrap_or_default()
    }
}
