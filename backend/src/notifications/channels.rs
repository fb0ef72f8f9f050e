//! Channel adapters.
//!
//! The trait hides gateway details (SMTP, SMS providers, push
//! services) behind a uniform send. The in-app channel is first-party
//! and always available; the others ship as logging transports here
//! and are swapped for real gateway clients at deployment.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::notifications::model::{Channel, Delivery, DeliveryStatus};

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> Channel;

    /// One delivery attempt. Errors (and timeouts imposed by the
    /// caller) are retried per the service's backoff schedule.
    async fn send(&self, recipient: Uuid, payload: &Value) -> Result<Delivery, AppError>;

    /// Unavailable adapters are skipped without attempts.
    fn is_available(&self) -> bool;
}

/// In-app notifications are a row in the notifications table, which
/// the caller records for every channel anyway; delivery is immediate.
pub struct InAppChannel;

#[async_trait]
impl ChannelAdapter for InAppChannel {
    fn name(&self) -> Channel {
        Channel::InApp
    }

    async fn send(&self, _recipient: Uuid, _payload: &Value) -> Result<Delivery, AppError> {
        Ok(Delivery {
            status: DeliveryStatus::Delivered,
            sent_at: Some(Utc::now()),
            external_id: None,
            error: None,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Log-only stand-in for an outbound gateway channel.
pub struct LoggingChannel {
    channel: Channel,
}

impl LoggingChannel {
    pub fn email() -> Self {
        Self {
            channel: Channel::Email,
        }
    }

    pub fn sms() -> Self {
        Self {
            channel: Channel::Sms,
        }
    }

    pub fn push() -> Self {
        Self {
            channel: Channel::Push,
        }
    }
}

#[async_trait]
impl ChannelAdapter for LoggingChannel {
    fn name(&self) -> Channel {
        self.channel
    }

    async fn send(&self, recipient: Uuid, _payload: &Value) -> Result<Delivery, AppError> {
        let external_id = Uuid::new_v4().to_string();
        info!(
            channel = self.channel.as_str(),
            recipient = %recipient,
            external_id = %external_id,
            "notification handed to transport"
        );
        Ok(Delivery {
            status: DeliveryStatus::Sent,
            sent_at: Some(Utc::now()),
            external_id: Some(external_id),
            error: None,
        })
    }

    fn is_available(&self) -> bool {
        true
    }
}
