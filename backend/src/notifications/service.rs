//! Notification fan-out.
//!
//! For each recipient: resolve preferences (stored, else defaults),
//! intersect with the event's channel set, and dispatch to every
//! resulting adapter in parallel. Each attempt runs under the
//! per-channel timeout and retries through the backoff schedule before
//! a dispatch is recorded `failed`. One channel's failure never blocks
//! another. When every configured channel fails and in-app is
//! available, an in-app notification is still recorded: the user must
//! be able to see what the gateways dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use futures::future::join_all;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::bus::EventType;
use crate::config::NotificationSettings;
use crate::error::AppError;
use crate::metrics::counters::Counters;
use crate::notifications::channels::ChannelAdapter;
use crate::notifications::model::{Channel, DeliveryStatus, NotificationRow};
use crate::notifications::repository_sqlx::{SqlxNotificationRepository, SqlxPreferencesRepository};
use crate::tenant;

pub struct NotificationService {
    rows: Arc<SqlxNotificationRepository>,
    prefs: Arc<SqlxPreferencesRepository>,
    adapters: HashMap<Channel, Arc<dyn ChannelAdapter>>,
    cfg: NotificationSettings,
    counters: Counters,
}

impl NotificationService {
    pub fn new(
        rows: Arc<SqlxNotificationRepository>,
        prefs: Arc<SqlxPreferencesRepository>,
        adapters: Vec<Arc<dyn ChannelAdapter>>,
        cfg: NotificationSettings,
        counters: Counters,
    ) -> Arc<Self> {
        let adapters = adapters.into_iter().map(|a| (a.name(), a)).collect();
        Arc::new(Self {
            rows,
            prefs,
            adapters,
            cfg,
            counters,
        })
    }

    /// Fans one event out to `recipients`. Returns the recorded rows,
    /// one per attempted channel per recipient.
    #[instrument(
        skip(self, payload, recipients),
        target = "notifications",
        fields(event_type = event_type.as_str(), recipients = recipients.len())
    )]
    pub async fn notify(
        &self,
        tenant_id: Uuid,
        event_type: EventType,
        recipients: &[Uuid],
        payload: &Value,
    ) -> Result<Vec<NotificationRow>, AppError> {
        if !self.cfg.enabled {
            debug!("notifications disabled; nothing dispatched");
            return Ok(Vec::new());
        }

        tenant::run(tenant_id, async {
            let mut all_rows = Vec::new();
            for recipient in recipients {
                let rows = self
                    .notify_one(tenant_id, event_type, *recipient, payload)
                    .await?;
                all_rows.extend(rows);
            }
            Ok(all_rows)
        })
        .await
    }

    async fn notify_one(
        &self,
        tenant_id: Uuid,
        event_type: EventType,
        recipient: Uuid,
        payload: &Value,
    ) -> Result<Vec<NotificationRow>, AppError> {
        let prefs = self.prefs.fetch(&recipient).await?.unwrap_or_default();
        let channels = prefs.resolve(event_type);
        if channels.is_empty() {
            debug!(recipient = %recipient, "no channels configured for event");
            return Ok(Vec::new());
        }

        let dispatches = channels.iter().map(|&channel| {
            self.dispatch_channel(tenant_id, event_type, recipient, channel, payload)
        });
        let mut rows: Vec<NotificationRow> = join_all(dispatches).await;

        // canonical fallback: the user still gets an in-app trace when
        // every configured channel failed
        let any_success = rows.iter().any(|r| r.status.is_success());
        let tried_in_app = channels.contains(&Channel::InApp);
        if !any_success && !tried_in_app {
            if let Some(adapter) = self.adapters.get(&Channel::InApp) {
                if adapter.is_available() {
                    warn!(recipient = %recipient, "all channels failed; falling back to in-app");
                    rows.push(
                        self.dispatch_channel(
                            tenant_id,
                            event_type,
                            recipient,
                            Channel::InApp,
                            payload,
                        )
                        .await,
                    );
                }
            }
        }

        for row in &rows {
            if let Err(e) = self.rows.insert(row).await {
                warn!(error = %e, "failed to record notification row");
            }
        }
        Ok(rows)
    }

    /// One channel dispatch: availability check, timeout-bounded
    /// attempts through the backoff schedule, one recorded row.
    async fn dispatch_channel(
        &self,
        tenant_id: Uuid,
        event_type: EventType,
        recipient: Uuid,
        channel: Channel,
        payload: &Value,
    ) -> NotificationRow {
        let mut row = NotificationRow {
            id: Uuid::new_v4(),
            tenant_id,
            user_id: recipient,
            event_type: event_type.as_str().to_string(),
            channel,
            status: DeliveryStatus::Pending,
            payload_json: payload.clone(),
            sent_at: None,
            error: None,
            external_id: None,
        };

        let adapter = match self.adapters.get(&channel) {
            Some(a) if a.is_available() => a.clone(),
            _ => {
                self.counters.notif_skipped.fetch_add(1, Ordering::Relaxed);
                row.status = DeliveryStatus::Skipped;
                row.error = Some("channel unavailable".into());
                return row;
            }
        };

        let max_attempts = self.cfg.retry_backoff.len() + 1;
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                tokio::time::sleep(self.cfg.retry_backoff[attempt - 1]).await;
            }

            match timeout(self.cfg.per_channel_timeout, adapter.send(recipient, payload)).await {
                Ok(Ok(delivery)) => {
                    self.counters.notif_sent.fetch_add(1, Ordering::Relaxed);
                    row.status = delivery.status;
                    row.sent_at = delivery.sent_at;
                    row.external_id = delivery.external_id;
                    row.error = delivery.error;
                    return row;
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                }
                Err(_) => {
                    last_error = format!(
                        "channel timed out after {}ms",
                        self.cfg.per_channel_timeout.as_millis()
                    );
                }
            }
            debug!(
                channel = channel.as_str(),
                attempt = attempt + 1,
                error = %last_error,
                "channel send attempt failed"
            );
        }

        self.counters.notif_failed.fetch_add(1, Ordering::Relaxed);
        row.status = DeliveryStatus::Failed;
        row.error = Some(last_error);
        row
    }

    /// Stored preferences for a user, with the defaults as fallback.
    pub async fn get_preferences(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<crate::notifications::model::NotificationPreferences, AppError> {
        tenant::run(tenant_id, async {
            Ok(self.prefs.fetch(&user_id).await?.unwrap_or_default())
        })
        .await
    }

    pub async fn set_preferences(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        prefs: crate::notifications::model::NotificationPreferences,
    ) -> Result<(), AppError> {
        tenant::run(tenant_id, self.prefs.upsert(&user_id, &prefs)).await
    }
}
