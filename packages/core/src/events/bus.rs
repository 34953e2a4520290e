//! Message Bus
//!
//! At-least-once, queue-group delivery with explicit acknowledgement.
//!
//! # Delivery Model
//!
//! - Each subscribing queue group receives every message published on the
//!   subject; within a group one member receives it (round robin)
//! - A [`Delivery`] must be acknowledged with [`Delivery::ack`]. Dropping it
//!   unacknowledged (handler error, handler panic, or shutdown) schedules a
//!   redelivery to the same group after `ack_wait`
//! - After `max_deliver` attempts the message is logged and discarded
//! - Messages published before any group subscribed to a subject are kept
//!   and handed to the first group that subscribes
//!
//! [`InMemoryBus`] implements this in-process. Another transport only has to
//! implement [`MessageBus`].

use crate::config::BusConfig;
use crate::events::messages::BusMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus is closed")]
    Closed,

    #[error("Failed to encode {subject} message: {source}")]
    Encode {
        subject: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to decode {subject} message: {source}")]
    Decode {
        subject: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Publish/subscribe transport
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish raw bytes; returns once the bus has accepted the message
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    /// Join queue `group` on `subject`
    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<Subscription, BusError>;
}

/// Serialize and publish a typed message on its subject
pub async fn publish_message<M: BusMessage>(bus: &dyn MessageBus, message: &M) -> Result<(), BusError> {
    let payload = serde_json::to_vec(message).map_err(|source| BusError::Encode {
        subject: M::SUBJECT,
        source,
    })?;
    bus.publish(M::SUBJECT, payload).await
}

/// Decode a typed message from a delivery payload
pub fn decode_message<M: BusMessage>(payload: &[u8]) -> Result<M, BusError> {
    serde_json::from_slice(payload).map_err(|source| BusError::Decode {
        subject: M::SUBJECT,
        source,
    })
}

/// Stream of deliveries for one queue group member
pub struct Subscription {
    subject: String,
    group: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    /// Next delivery, `None` once the bus is gone
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn group(&self) -> &str {
        &self.group
    }
}

/// One delivery attempt of a message
pub struct Delivery {
    subject: String,
    payload: Vec<u8>,
    attempt: u32,
    acked: bool,
    origin: Option<Origin>,
}

/// Where an unacknowledged delivery goes back to
struct Origin {
    shared: Weak<Shared>,
    group: String,
}

impl Delivery {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 1 for the first delivery, incremented on every redelivery
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Acknowledge: the message will not be delivered again
    pub fn ack(mut self) {
        self.acked = true;
    }

    /// Take the payload back without triggering redelivery
    fn disarm(mut self) -> (Vec<u8>, u32) {
        self.origin = None;
        (std::mem::take(&mut self.payload), self.attempt)
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        let Some(origin) = self.origin.take() else {
            return;
        };
        let Some(shared) = origin.shared.upgrade() else {
            return;
        };

        if self.acked {
            shared.settle();
            return;
        }

        if self.attempt >= shared.max_deliver {
            tracing::error!(
                "Discarding {} message after {} delivery attempts",
                self.subject,
                self.attempt
            );
            shared.settle();
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No runtime to redeliver {} message, dropping it", self.subject);
            shared.settle();
            return;
        };

        let subject = std::mem::take(&mut self.subject);
        let payload = std::mem::take(&mut self.payload);
        let attempt = self.attempt + 1;
        let wait = shared.ack_wait;
        let weak = Arc::downgrade(&shared);
        tracing::debug!("{} message not acknowledged, redelivering in {:?}", subject, wait);

        handle.spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(shared) = weak.upgrade() {
                shared.redeliver(&subject, &origin.group, payload, attempt).await;
            }
        });
    }
}

struct Shared {
    state: Mutex<BusState>,
    ack_wait: Duration,
    max_deliver: u32,
    /// Messages neither acknowledged nor discarded yet, per group
    in_flight: AtomicUsize,
}

#[derive(Default)]
struct BusState {
    subjects: HashMap<String, SubjectState>,
}

#[derive(Default)]
struct SubjectState {
    groups: HashMap<String, GroupState>,
    /// Published before any group existed
    backlog: Vec<Vec<u8>>,
}

#[derive(Default)]
struct GroupState {
    members: Vec<mpsc::UnboundedSender<Delivery>>,
    next: usize,
    /// Waiting for a live member
    pending: Vec<(Vec<u8>, u32)>,
}

impl GroupState {
    /// Hand a message to the next live member, or park it
    fn dispatch(&mut self, shared: &Weak<Shared>, subject: &str, group: &str, payload: Vec<u8>, attempt: u32) {
        let mut payload = payload;
        while !self.members.is_empty() {
            let idx = self.next % self.members.len();
            let delivery = Delivery {
                subject: subject.to_string(),
                payload,
                attempt,
                acked: false,
                origin: Some(Origin {
                    shared: shared.clone(),
                    group: group.to_string(),
                }),
            };
            match self.members[idx].send(delivery) {
                Ok(()) => {
                    self.next = idx + 1;
                    return;
                }
                Err(mpsc::error::SendError(returned)) => {
                    self.members.remove(idx);
                    payload = returned.disarm().0;
                }
            }
        }
        self.pending.push((payload, attempt));
    }
}

impl Shared {
    fn settle(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    async fn redeliver(self: &Arc<Self>, subject: &str, group: &str, payload: Vec<u8>, attempt: u32) {
        let weak = Arc::downgrade(self);
        let mut state = self.state.lock().await;
        match state
            .subjects
            .get_mut(subject)
            .and_then(|s| s.groups.get_mut(group))
        {
            Some(group_state) => group_state.dispatch(&weak, subject, group, payload, attempt),
            None => {
                tracing::warn!("Queue group {} on {} is gone, dropping redelivery", group, subject);
                self.settle();
            }
        }
    }
}

/// In-process message bus
#[derive(Clone)]
pub struct InMemoryBus {
    shared: Arc<Shared>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(&BusConfig::default())
    }
}

impl InMemoryBus {
    pub fn new(config: &BusConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BusState::default()),
                ack_wait: config.ack_wait(),
                max_deliver: config.max_deliver.max(1),
                in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Number of messages not yet acknowledged or discarded
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every published message is settled
    ///
    /// Returns `false` if `timeout` elapsed first. Messages parked for a
    /// subject or group without live subscribers keep the bus busy.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let weak = Arc::downgrade(&self.shared);
        let mut state = self.shared.state.lock().await;
        let subject_state = state.subjects.entry(subject.to_string()).or_default();

        if subject_state.groups.is_empty() {
            self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
            subject_state.backlog.push(payload);
            return Ok(());
        }
        self.shared
            .in_flight
            .fetch_add(subject_state.groups.len(), Ordering::SeqCst);
        for (group, group_state) in subject_state.groups.iter_mut() {
            group_state.dispatch(&weak, subject, group, payload.clone(), 1);
        }
        Ok(())
    }

    async fn queue_subscribe(&self, subject: &str, group: &str) -> Result<Subscription, BusError> {
        let weak = Arc::downgrade(&self.shared);
        let (tx, rx) = mpsc::unbounded_channel();

        let mut state = self.shared.state.lock().await;
        let subject_state = state.subjects.entry(subject.to_string()).or_default();
        let backlog = std::mem::take(&mut subject_state.backlog);
        let group_state = subject_state.groups.entry(group.to_string()).or_default();
        group_state.members.push(tx);

        let mut queued: Vec<(Vec<u8>, u32)> = std::mem::take(&mut group_state.pending);
        queued.extend(backlog.into_iter().map(|p| (p, 1)));
        for (payload, attempt) in queued {
            group_state.dispatch(&weak, subject, group, payload, attempt);
        }

        tracing::debug!("Subscribed queue group {} to {}", group, subject);
        Ok(Subscription {
            subject: subject.to_string(),
            group: group.to_string(),
            rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::messages::NodeCreated;
    use tokio::time::timeout;

    fn fast_bus(max_deliver: u32) -> InMemoryBus {
        InMemoryBus::new(&BusConfig {
            ack_wait_ms: 20,
            max_deliver,
        })
    }

    #[tokio::test]
    async fn test_acked_message_is_not_redelivered() -> anyhow::Result<()> {
        let bus = fast_bus(5);
        let mut sub = bus.queue_subscribe("s", "g").await?;
        bus.publish("s", b"hello".to_vec()).await?;

        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.payload(), b"hello");
        assert_eq!(delivery.attempt(), 1);
        delivery.ack();

        assert!(timeout(Duration::from_millis(100), sub.next()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered_until_max_deliver() -> anyhow::Result<()> {
        let bus = fast_bus(3);
        let mut sub = bus.queue_subscribe("s", "g").await?;
        bus.publish("s", b"retry".to_vec()).await?;

        for expected in 1..=3 {
            let delivery = timeout(Duration::from_secs(1), sub.next()).await?.unwrap();
            assert_eq!(delivery.attempt(), expected);
            drop(delivery);
        }
        assert!(timeout(Duration::from_millis(150), sub.next()).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_backlog_goes_to_first_group() -> anyhow::Result<()> {
        let bus = fast_bus(5);
        publish_message(&bus, &NodeCreated {
            profile_url: "https://a.test/p.json".to_string(),
            version: 0,
        })
        .await?;

        let mut sub = bus.queue_subscribe(NodeCreated::SUBJECT, "g").await?;
        let delivery = sub.next().await.unwrap();
        let message: NodeCreated = decode_message(delivery.payload())?;
        assert_eq!(message.version, 0);
        delivery.ack();
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_group_splits_and_groups_fan_out() -> anyhow::Result<()> {
        let bus = fast_bus(5);
        let mut a1 = bus.queue_subscribe("s", "a").await?;
        let mut a2 = bus.queue_subscribe("s", "a").await?;
        let mut b = bus.queue_subscribe("s", "b").await?;

        bus.publish("s", b"1".to_vec()).await?;
        bus.publish("s", b"2".to_vec()).await?;

        a1.next().await.unwrap().ack();
        a2.next().await.unwrap().ack();
        b.next().await.unwrap().ack();
        b.next().await.unwrap().ack();
        Ok(())
    }

    #[tokio::test]
    async fn test_wait_idle_tracks_settlement() -> anyhow::Result<()> {
        let bus = fast_bus(2);
        let mut sub = bus.queue_subscribe("s", "g").await?;
        bus.publish("s", b"a".to_vec()).await?;
        bus.publish("s", b"b".to_vec()).await?;
        assert_eq!(bus.in_flight(), 2);

        sub.next().await.unwrap().ack();
        assert_eq!(bus.in_flight(), 1);
        assert!(!bus.wait_idle(Duration::from_millis(30)).await);

        // Second message is discarded after its last attempt
        drop(sub.next().await.unwrap());
        drop(timeout(Duration::from_secs(1), sub.next()).await?.unwrap());
        assert!(bus.wait_idle(Duration::from_secs(1)).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_member_hands_over_to_peer() -> anyhow::Result<()> {
        let bus = fast_bus(5);
        let a1 = bus.queue_subscribe("s", "a").await?;
        let mut a2 = bus.queue_subscribe("s", "a").await?;
        drop(a1);

        bus.publish("s", b"x".to_vec()).await?;
        let delivery = timeout(Duration::from_secs(1), a2.next()).await?.unwrap();
        assert_eq!(delivery.attempt(), 1);
        delivery.ack();
        Ok(())
    }
}
