//! In-process event bus.
//!
//! Responsibilities:
//! - Fan published events out to type-scoped subscribers.
//! - Run handlers sequentially per event, events in publish order.
//! - Bind the event's tenant around each handler invocation.
//! - Keep a bounded ring of recent events for diagnostics.
//!
//! Handler errors are logged and counted, never propagated: a broken
//! subscriber must not take the publisher down. Subscribing the same
//! handler id twice is a no-op.

pub mod broker;
pub mod event;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::AppError;
use crate::metrics::counters::Counters;
use crate::tenant;

pub use event::{Event, EventType};

const RECENT_CAP: usize = 256;

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable identity used for idempotent subscription.
    fn id(&self) -> &'static str;

    async fn handle(&self, event: Event) -> Result<(), AppError>;
}

struct BusInner {
    subs: RwLock<HashMap<EventType, Vec<Arc<dyn EventHandler>>>>,
    recent: Mutex<VecDeque<Event>>,
    counters: Counters,
}

pub struct EventBus {
    inner: Arc<BusInner>,
    tx: mpsc::UnboundedSender<Event>,
}

impl EventBus {
    /// Creates the bus and its dispatcher task. Must run inside a tokio
    /// runtime.
    pub fn new(counters: Counters) -> Arc<Self> {
        let inner = Arc::new(BusInner {
            subs: RwLock::new(HashMap::new()),
            recent: Mutex::new(VecDeque::with_capacity(RECENT_CAP)),
            counters,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch_loop(inner.clone(), rx));

        Arc::new(Self { inner, tx })
    }

    /// Registers `handler` for `event_type`. Duplicate registrations of
    /// the same handler id are ignored.
    pub fn subscribe(&self, event_type: EventType, handler: Arc<dyn EventHandler>) {
        let mut subs = self.inner.subs.write();
        let list = subs.entry(event_type).or_default();
        if list.iter().any(|h| h.id() == handler.id()) {
            debug!(event_type = event_type.as_str(), handler = handler.id(), "duplicate subscription ignored");
            return;
        }
        list.push(handler);
    }

    pub fn unsubscribe(&self, event_type: EventType, handler_id: &str) {
        if let Some(list) = self.inner.subs.write().get_mut(&event_type) {
            list.retain(|h| h.id() != handler_id);
        }
    }

    /// Enqueues the event for dispatch and records it in the recent
    /// ring. Non-blocking; dispatch happens on the bus task.
    pub fn publish(&self, event: Event) {
        {
            let mut recent = self.inner.recent.lock();
            if recent.len() == RECENT_CAP {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }
        self.inner
            .counters
            .bus_published
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if self.tx.send(event).is_err() {
            warn!("event bus dispatcher is gone; event dropped");
        }
    }

    /// Most recent events, newest first.
    pub fn get_recent_events(&self, limit: usize) -> Vec<Event> {
        self.inner
            .recent
            .lock()
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

async fn dispatch_loop(inner: Arc<BusInner>, mut rx: mpsc::UnboundedReceiver<Event>) {
    while let Some(event) = rx.recv().await {
        let handlers: Vec<Arc<dyn EventHandler>> = inner
            .subs
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            let outcome = match event.tenant_id {
                Some(tenant_id) => tenant::run(tenant_id, handler.handle(event.clone())).await,
                None => handler.handle(event.clone()).await,
            };

            if let Err(e) = outcome {
                inner
                    .counters
                    .bus_handler_errors
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                warn!(
                    event_type = event.event_type.as_str(),
                    handler = handler.id(),
                    error = %e,
                    "event handler failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use serde_json::json;
    use std::time::Duration;
    use uuid::Uuid;

    struct Recorder {
        id: &'static str,
        seen: Arc<PlMutex<Vec<(EventType, Option<Uuid>)>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn handle(&self, event: Event) -> Result<(), AppError> {
            self.seen
                .lock()
                .push((event.event_type, tenant::current_optional()));
            if self.fail {
                return Err(AppError::Internal("boom".into()));
            }
            Ok(())
        }
    }

    fn mk_event(event_type: EventType) -> Event {
        Event::new(event_type, "test", "t1", json!({}))
    }

    async fn drain(expected: usize, seen: &Arc<PlMutex<Vec<(EventType, Option<Uuid>)>>>) {
        for _ in 0..200 {
            if seen.lock().len() >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {expected} deliveries, saw {}", seen.lock().len());
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = EventBus::new(Counters::default());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        bus.subscribe(
            EventType::OrderCreated,
            Arc::new(Recorder { id: "r", seen: seen.clone(), fail: false }),
        );
        bus.subscribe(
            EventType::OrderCompleted,
            Arc::new(Recorder { id: "r", seen: seen.clone(), fail: false }),
        );

        bus.publish(mk_event(EventType::OrderCreated));
        bus.publish(mk_event(EventType::OrderCompleted));
        bus.publish(mk_event(EventType::OrderCreated));

        drain(3, &seen).await;
        let types: Vec<EventType> = seen.lock().iter().map(|(t, _)| *t).collect();
        assert_eq!(
            types,
            vec![
                EventType::OrderCreated,
                EventType::OrderCompleted,
                EventType::OrderCreated
            ]
        );
    }

    #[tokio::test]
    async fn duplicate_subscription_is_idempotent() {
        let bus = EventBus::new(Counters::default());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        for _ in 0..3 {
            bus.subscribe(
                EventType::Mention,
                Arc::new(Recorder { id: "dup", seen: seen.clone(), fail: false }),
            );
        }

        bus.publish(mk_event(EventType::Mention));
        drain(1, &seen).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn handler_runs_under_the_event_tenant() {
        let bus = EventBus::new(Counters::default());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        bus.subscribe(
            EventType::LockAcquired,
            Arc::new(Recorder { id: "t", seen: seen.clone(), fail: false }),
        );

        let tenant_id = Uuid::new_v4();
        bus.publish(mk_event(EventType::LockAcquired).with_tenant(tenant_id));

        drain(1, &seen).await;
        assert_eq!(seen.lock()[0].1, Some(tenant_id));
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_the_next_one() {
        let counters = Counters::default();
        let bus = EventBus::new(counters.clone());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        bus.subscribe(
            EventType::StockLow,
            Arc::new(Recorder { id: "bad", seen: seen.clone(), fail: true }),
        );
        bus.subscribe(
            EventType::StockLow,
            Arc::new(Recorder { id: "good", seen: seen.clone(), fail: false }),
        );

        bus.publish(mk_event(EventType::StockLow));
        drain(2, &seen).await;
        assert_eq!(
            counters
                .bus_handler_errors
                .load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }

    #[tokio::test]
    async fn recent_events_are_newest_first_and_bounded() {
        let bus = EventBus::new(Counters::default());
        for _ in 0..(RECENT_CAP + 10) {
            bus.publish(mk_event(EventType::OrderCreated));
        }
        bus.publish(mk_event(EventType::OrderCompleted));

        let recent = bus.get_recent_events(5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].event_type, EventType::OrderCompleted);
        assert!(bus.get_recent_events(usize::MAX).len() <= RECENT_CAP);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new(Counters::default());
        let seen = Arc::new(PlMutex::new(Vec::new()));
        bus.subscribe(
            EventType::CommentAdded,
            Arc::new(Recorder { id: "gone", seen: seen.clone(), fail: false }),
        );
        bus.unsubscribe(EventType::CommentAdded, "gone");

        bus.publish(mk_event(EventType::CommentAdded));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(seen.lock().is_empty());
    }
}
