//! In-memory message bus.

use async_trait::async_trait;
use boxoffice_core::bus::{Delivery, Headers, MessageBus, MessageHandler};
use boxoffice_core::error::BusError;
use boxoffice_core::event::routing_keys;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

/// A message accepted by [`MessageBus::publish`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Routing key
    pub routing_key: String,
    /// JSON body
    pub payload: serde_json::Value,
    /// Headers
    pub headers: Headers,
}

/// A message accepted by [`MessageBus::schedule_expiration`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledMessage {
    /// JSON body
    pub payload: serde_json::Value,
    /// Requested TTL
    pub delay: Duration,
    /// Headers
    pub headers: Headers,
}

impl ScheduledMessage {
    /// The delivery the process queue would see once the TTL elapses.
    #[must_use]
    pub fn into_delivery(self) -> Delivery {
        Delivery {
            routing_key: routing_keys::RESERVATION_EXPIRE.to_string(),
            payload: self.payload.to_string().into_bytes(),
            headers: self.headers,
        }
    }
}

#[derive(Debug, Default)]
struct Recorded {
    published: Vec<PublishedMessage>,
    scheduled: Vec<ScheduledMessage>,
    acked: Vec<Delivery>,
    nacked: Vec<Delivery>,
}

#[derive(Debug)]
struct Queue {
    sender: Option<mpsc::UnboundedSender<Delivery>>,
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl Queue {
    fn open() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender: Some(sender),
            receiver: Some(receiver),
        }
    }
}

/// Message bus that records everything it is asked to do.
///
/// Queues are fed by the test through [`InMemoryMessageBus::push`]; `consume`
/// drains a queue until [`InMemoryMessageBus::close_queue`] is called and
/// records which deliveries were acknowledged.
#[derive(Debug, Default)]
pub struct InMemoryMessageBus {
    recorded: Mutex<Recorded>,
    queues: Mutex<HashMap<String, Queue>>,
    unavailable: AtomicBool,
    failures_left: AtomicUsize,
}

impl InMemoryMessageBus {
    /// Empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn recorded(&self) -> MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queues(&self) -> MutexGuard<'_, HashMap<String, Queue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every call fail with a connection error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Reject the next `count` publish or schedule calls.
    pub fn fail_publishes(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Messages published so far.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.recorded().published.clone()
    }

    /// Messages published under `routing_key`.
    #[must_use]
    pub fn published_with_key(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.recorded()
            .published
            .iter()
            .filter(|message| message.routing_key == routing_key)
            .cloned()
            .collect()
    }

    /// Expiration signals scheduled so far.
    #[must_use]
    pub fn scheduled(&self) -> Vec<ScheduledMessage> {
        self.recorded().scheduled.clone()
    }

    /// Deliveries the handler accepted.
    #[must_use]
    pub fn acked(&self) -> Vec<Delivery> {
        self.recorded().acked.clone()
    }

    /// Deliveries the handler rejected.
    #[must_use]
    pub fn nacked(&self) -> Vec<Delivery> {
        self.recorded().nacked.clone()
    }

    /// Enqueue a delivery on `queue`.
    pub fn push(&self, queue: &str, delivery: Delivery) {
        let mut queues = self.queues();
        let entry = queues.entry(queue.to_string()).or_insert_with(Queue::open);
        if let Some(sender) = &entry.sender {
            let _ = sender.send(delivery);
        }
    }

    /// End the stream of `queue` once its buffered deliveries are drained.
    pub fn close_queue(&self, queue: &str) {
        let mut queues = self.queues();
        queues
            .entry(queue.to_string())
            .or_insert_with(Queue::open)
            .sender = None;
    }

    fn check_publish(&self, routing_key: &str) -> Result<(), BusError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionFailed("broker unavailable".to_string()));
        }
        let rejected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(BusError::PublishFailed {
                routing_key: routing_key.to_string(),
                reason: "broker did not confirm".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(
        &self,
        routing_key: &str,
        payload: &serde_json::Value,
        headers: &Headers,
    ) -> Result<(), BusError> {
        self.check_publish(routing_key)?;
        self.recorded().published.push(PublishedMessage {
            routing_key: routing_key.to_string(),
            payload: payload.clone(),
            headers: headers.clone(),
        });
        Ok(())
    }

    async fn schedule_expiration(
        &self,
        payload: &serde_json::Value,
        delay: Duration,
        headers: &Headers,
    ) -> Result<(), BusError> {
        self.check_publish(routing_keys::RESERVATION_EXPIRE)?;
        self.recorded().scheduled.push(ScheduledMessage {
            payload: payload.clone(),
            delay,
            headers: headers.clone(),
        });
        Ok(())
    }

    async fn consume(&self, queue: &str, handler: Arc<dyn MessageHandler>) -> Result<(), BusError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BusError::ConnectionFailed("broker unavailable".to_string()));
        }
        let receiver = self
            .queues()
            .entry(queue.to_string())
            .or_insert_with(Queue::open)
            .receiver
            .take();
        let Some(mut receiver) = receiver else {
            return Err(BusError::ConsumeFailed {
                queue: queue.to_string(),
                reason: "queue already has a consumer".to_string(),
            });
        };

        while let Some(delivery) = receiver.recv().await {
            match handler.handle(&delivery).await {
                Ok(()) => self.recorded().acked.push(delivery),
                Err(_) => self.recorded().nacked.push(delivery),
            }
        }
        Ok(())
    }
}
