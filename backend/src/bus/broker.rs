//! Message-broker port with an in-process implementation.
//!
//! The trait is the seam a durable broker client (NATS, AMQP) plugs
//! into: subjects correspond to event types, delivery is at-least-once
//! with manual acknowledgement. The in-memory implementation honours
//! the same contract — a handler that errors or misses the ack window
//! is redelivered until `max_deliveries`, then the message lands on the
//! subject's dead-letter queue.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::time::timeout;
use tracing::warn;

use crate::bus::{Event, EventBus};
use crate::config::BrokerSettings;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct BrokerMessage {
    pub subject: String,
    pub payload: Value,
    /// 1-based delivery attempt.
    pub delivery: u32,
}

/// Returning `Ok` acknowledges the delivery; anything else (including
/// running past the ack window) makes it eligible for redelivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: BrokerMessage) -> Result<(), AppError>;
}

#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, subject: &str, payload: Value) -> Result<(), AppError>;
    fn subscribe(&self, subject: &str, handler: Arc<dyn MessageHandler>);
}

pub struct InMemoryBroker {
    cfg: BrokerSettings,
    subs: RwLock<HashMap<String, Vec<Arc<dyn MessageHandler>>>>,
    dead: Arc<Mutex<HashMap<String, Vec<BrokerMessage>>>>,
}

impl InMemoryBroker {
    pub fn new(cfg: BrokerSettings) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            subs: RwLock::new(HashMap::new()),
            dead: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Dead-lettered messages for a subject's stream.
    pub fn dead_letters(&self, subject: &str) -> Vec<BrokerMessage> {
        self.dead
            .lock()
            .get(&dlq_subject(subject))
            .cloned()
            .unwrap_or_default()
    }
}

fn dlq_subject(subject: &str) -> String {
    format!("{subject}.dlq")
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, subject: &str, payload: Value) -> Result<(), AppError> {
        let handlers: Vec<Arc<dyn MessageHandler>> = self
            .subs
            .read()
            .get(subject)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            let msg = BrokerMessage {
                subject: subject.to_string(),
                payload: payload.clone(),
                delivery: 1,
            };
            let dead = self.dead.clone();
            let ack_timeout = self.cfg.ack_timeout;
            let max_deliveries = self.cfg.max_deliveries.max(1);

            tokio::spawn(async move {
                let mut msg = msg;
                loop {
                    match timeout(ack_timeout, handler.handle(msg.clone())).await {
                        Ok(Ok(())) => return,
                        Ok(Err(e)) => {
                            warn!(subject = %msg.subject, delivery = msg.delivery, error = %e, "broker handler failed");
                        }
                        Err(_) => {
                            warn!(subject = %msg.subject, delivery = msg.delivery, "broker handler missed ack window");
                        }
                    }
                    if msg.delivery >= max_deliveries {
                        warn!(subject = %msg.subject, "message dead-lettered");
                        dead.lock()
                            .entry(dlq_subject(&msg.subject))
                            .or_default()
                            .push(msg);
                        return;
                    }
                    msg.delivery += 1;
                }
            });
        }

        Ok(())
    }

    fn subscribe(&self, subject: &str, handler: Arc<dyn MessageHandler>) {
        self.subs
            .write()
            .entry(subject.to_string())
            .or_default()
            .push(handler);
    }
}

/// Bridges broker deliveries into the in-process bus. The payload is
/// the serialized event envelope; subjects are event type names.
pub struct BusForwarder {
    bus: Arc<EventBus>,
}

impl BusForwarder {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(Self { bus })
    }
}

#[async_trait]
impl MessageHandler for BusForwarder {
    async fn handle(&self, msg: BrokerMessage) -> Result<(), AppError> {
        let event: Event = serde_json::from_value(msg.payload.clone())?;
        self.bus.publish(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct FlakyHandler {
        calls: AtomicU32,
        succeed_on: Option<u32>,
    }

    #[async_trait]
    impl MessageHandler for FlakyHandler {
        async fn handle(&self, _msg: BrokerMessage) -> Result<(), AppError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.succeed_on == Some(n) {
                Ok(())
            } else {
                Err(AppError::DependencyUnavailable("store timeout".into()))
            }
        }
    }

    fn settings() -> BrokerSettings {
        BrokerSettings {
            ack_timeout: Duration::from_millis(200),
            max_deliveries: 2,
            ..BrokerSettings::default()
        }
    }

    #[tokio::test]
    async fn transient_failure_is_redelivered_once() {
        let broker = InMemoryBroker::new(settings());
        let handler = Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            succeed_on: Some(2),
        });
        broker.subscribe("OPTIMIZATION_RUN_REQUESTED", handler.clone());

        broker
            .publish("OPTIMIZATION_RUN_REQUESTED", json!({"scenario": "s1"}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert!(broker.dead_letters("OPTIMIZATION_RUN_REQUESTED").is_empty());
    }

    #[tokio::test]
    async fn persistent_failure_dead_letters_after_max_deliveries() {
        let broker = InMemoryBroker::new(settings());
        let handler = Arc::new(FlakyHandler {
            calls: AtomicU32::new(0),
            succeed_on: None,
        });
        broker.subscribe("ORDER_CREATED", handler.clone());

        broker.publish("ORDER_CREATED", json!({})).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        let dead = broker.dead_letters("ORDER_CREATED");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].delivery, 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_no_op() {
        let broker = InMemoryBroker::new(settings());
        broker.publish("STOCK_LOW", json!({})).await.unwrap();
        assert!(broker.dead_letters("STOCK_LOW").is_empty());
    }

    #[tokio::test]
    async fn forwarder_republishes_envelopes_onto_the_bus() {
        use crate::bus::EventType;
        use crate::metrics::counters::Counters;

        let broker = InMemoryBroker::new(settings());
        let bus = crate::bus::EventBus::new(Counters::default());
        let subject = EventType::OptimizationRunRequested.as_str();
        broker.subscribe(subject, BusForwarder::new(bus.clone()));

        let event = Event::new(
            EventType::OptimizationRunRequested,
            "optimization_scenario",
            "s1",
            json!({"kerf": 3}),
        );
        broker
            .publish(subject, serde_json::to_value(&event).unwrap())
            .await
            .unwrap();

        for _ in 0..100 {
            if !bus.get_recent_events(1).is_empty() {
                let seen = &bus.get_recent_events(1)[0];
                assert_eq!(seen.event_type, EventType::OptimizationRunRequested);
                assert_eq!(seen.payload["kerf"], 3);
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("forwarded event never reached the bus");
    }
}
