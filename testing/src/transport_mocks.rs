//! In-memory transport for fast, deterministic connector tests.
//!
//! [`InMemoryBroker`] behaves like a queue broker as far as the consume loop
//! can tell:
//!
//! - deliveries are dispatched only while the channel's unacknowledged count
//!   is below its prefetch limit
//! - delivery tags are channel-scoped and start at 1
//! - closing a session returns its unacknowledged deliveries to the front of
//!   their queue, flagged as redelivered
//! - every publish is recorded with the session it went through
//!
//! Failure injection: [`InMemoryBroker::refuse_connects`],
//! [`InMemoryBroker::fail_next_wait`] and [`InMemoryBroker::cancel_consumers`].

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Test utilities document panics where critical

use bpm_connector_core::delivery::{Delivery, OutboundMessage};
use bpm_connector_core::transport::{
    Channel, Consumer, Session, SessionId, Transport, TransportError, TransportFuture,
};
use std::collections::{HashMap, VecDeque};
use std::future::ready;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A message published through the in-memory broker.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    /// Session whose channel published the message
    pub session_id: SessionId,
    /// Target exchange (empty for the default exchange)
    pub exchange: String,
    /// Routing key (destination queue for the default exchange)
    pub routing_key: String,
    /// The message
    pub message: OutboundMessage,
}

impl PublishedMessage {
    /// Decode the payload as JSON.
    #[must_use]
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.message.payload).ok()
    }
}

/// Channel configuration as last set by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Owning session
    pub session_id: SessionId,
    /// Whether `confirm_select` was called
    pub confirm_mode: bool,
    /// Prefetch limit set through `basic_qos`
    pub prefetch: Option<u16>,
}

struct ChannelState {
    session_id: SessionId,
    confirm_mode: bool,
    prefetch: Option<u16>,
    next_tag: u64,
    unacked: Vec<(u64, String, Delivery)>,
}

#[derive(Default)]
struct BrokerState {
    queues: Mutex<HashMap<String, VecDeque<Delivery>>>,
    published: Mutex<Vec<PublishedMessage>>,
    acked: Mutex<Vec<(SessionId, u64)>>,
    rejected: Mutex<Vec<(SessionId, u64, bool)>>,
    sessions: Mutex<Vec<SessionId>>,
    close_calls: Mutex<Vec<SessionId>>,
    channels: Mutex<Vec<Arc<Mutex<ChannelState>>>>,
    refused_connects: AtomicUsize,
    pending_failures: AtomicUsize,
    consumer_generation: AtomicU64,
    max_unacked: AtomicUsize,
    notify: Notify,
}

/// Shared in-memory broker.
///
/// Cloning yields another handle to the same broker.
///
/// # Example
///
/// ```
/// use bpm_connector_core::delivery::Delivery;
/// use bpm_connector_testing::InMemoryBroker;
///
/// let broker = InMemoryBroker::new();
/// broker.enqueue("tasks", Delivery::new(0, b"{}".to_vec()));
/// assert_eq!(broker.queue_len("tasks"), 1);
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport connecting to this broker.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::new(InMemoryTransport::new(self.clone()))
    }

    /// Append a delivery to `queue`. Its tag is reassigned on dispatch.
    pub fn enqueue(&self, queue: &str, delivery: Delivery) {
        self.state
            .queues
            .lock()
            .unwrap()
            .entry(queue.to_string())
            .or_default()
            .push_back(delivery);
        self.state.notify.notify_waiters();
    }

    /// Number of deliveries waiting in `queue`.
    #[must_use]
    pub fn queue_len(&self, queue: &str) -> usize {
        self.state.queues.lock().unwrap().get(queue).map_or(0, VecDeque::len)
    }

    /// Every published message, in publish order.
    #[must_use]
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.state.published.lock().unwrap().clone()
    }

    /// Messages published with `routing_key`.
    #[must_use]
    pub fn published_to(&self, routing_key: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|published| published.routing_key == routing_key)
            .collect()
    }

    /// Acknowledged `(session, delivery tag)` pairs.
    #[must_use]
    pub fn acked(&self) -> Vec<(SessionId, u64)> {
        self.state.acked.lock().unwrap().clone()
    }

    /// Rejected `(session, delivery tag, requeue)` triples.
    #[must_use]
    pub fn rejected(&self) -> Vec<(SessionId, u64, bool)> {
        self.state.rejected.lock().unwrap().clone()
    }

    /// Sessions opened so far, in connect order.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionId> {
        self.state.sessions.lock().unwrap().clone()
    }

    /// Every call to `Session::close`, including repeated ones.
    #[must_use]
    pub fn close_calls(&self) -> Vec<SessionId> {
        self.state.close_calls.lock().unwrap().clone()
    }

    /// Settings of every channel opened so far.
    #[must_use]
    pub fn channel_settings(&self) -> Vec<ChannelSettings> {
        self.state
            .channels
            .lock()
            .unwrap()
            .iter()
            .map(|channel| {
                let channel = channel.lock().unwrap();
                ChannelSettings {
                    session_id: channel.session_id,
                    confirm_mode: channel.confirm_mode,
                    prefetch: channel.prefetch,
                }
            })
            .collect()
    }

    /// Deliveries currently dispatched but not acknowledged, across channels.
    #[must_use]
    pub fn unacked(&self) -> usize {
        self.state
            .channels
            .lock()
            .unwrap()
            .iter()
            .map(|channel| channel.lock().unwrap().unacked.len())
            .sum()
    }

    /// Highest number of unacknowledged deliveries any channel ever held.
    #[must_use]
    pub fn max_unacked(&self) -> usize {
        self.state.max_unacked.load(Ordering::SeqCst)
    }

    /// Refuse the next `count` connection attempts.
    pub fn refuse_connects(&self, count: usize) {
        self.state.refused_connects.fetch_add(count, Ordering::SeqCst);
    }

    /// Make the next consumer wait fail with a lost connection.
    pub fn fail_next_wait(&self) {
        self.state.pending_failures.fetch_add(1, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Cancel every active consumer, as a broker-side `basic.cancel` would.
    pub fn cancel_consumers(&self) {
        self.state.consumer_generation.fetch_add(1, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    /// Poll `condition` until it holds.
    pub async fn wait_for(&self, condition: impl Fn(&Self) -> bool) {
        while !condition(self) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn requeue_front(&self, queue: String, mut delivery: Delivery) {
        delivery.redelivered = true;
        self.state
            .queues
            .lock()
            .unwrap()
            .entry(queue)
            .or_default()
            .push_front(delivery);
    }
}

/// Transport opening sessions on an [`InMemoryBroker`].
#[derive(Clone)]
pub struct InMemoryTransport {
    broker: InMemoryBroker,
}

impl InMemoryTransport {
    /// Create a transport for `broker`.
    #[must_use]
    pub const fn new(broker: InMemoryBroker) -> Self {
        Self { broker }
    }
}

impl Transport for InMemoryTransport {
    fn connect(&self) -> TransportFuture<'_, Arc<dyn Session>> {
        if InMemoryBroker::take(&self.broker.state.refused_connects) {
            return Box::pin(ready(Err(TransportError::ConnectionFailed(
                "connection refused".to_string(),
            ))));
        }

        let id = SessionId::next();
        let closed = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(ChannelState {
            session_id: id,
            confirm_mode: false,
            prefetch: None,
            next_tag: 0,
            unacked: Vec::new(),
        }));

        self.broker.state.sessions.lock().unwrap().push(id);
        self.broker.state.channels.lock().unwrap().push(Arc::clone(&state));

        let session: Arc<dyn Session> = Arc::new(InMemorySession {
            id,
            closed: Arc::clone(&closed),
            channel: Arc::new(InMemoryChannel {
                broker: self.broker.clone(),
                state,
                closed,
            }),
        });
        Box::pin(ready(Ok(session)))
    }
}

struct InMemorySession {
    id: SessionId,
    closed: Arc<AtomicBool>,
    channel: Arc<InMemoryChannel>,
}

impl Session for InMemorySession {
    fn id(&self) -> SessionId {
        self.id
    }

    fn channel(&self) -> Arc<dyn Channel> {
        Arc::clone(&self.channel) as Arc<dyn Channel>
    }

    fn close(&self) -> TransportFuture<'_, ()> {
        let broker = &self.channel.broker;
        broker.state.close_calls.lock().unwrap().push(self.id);

        if self.closed.swap(true, Ordering::SeqCst) {
            return Box::pin(ready(Err(TransportError::AlreadyClosed)));
        }

        let unacked = std::mem::take(&mut self.channel.state.lock().unwrap().unacked);
        for (_, queue, delivery) in unacked.into_iter().rev() {
            broker.requeue_front(queue, delivery);
        }
        broker.state.notify.notify_waiters();

        Box::pin(ready(Ok(())))
    }
}

struct InMemoryChannel {
    broker: InMemoryBroker,
    state: Arc<Mutex<ChannelState>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryChannel {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::AlreadyClosed)
        } else {
            Ok(())
        }
    }

    fn settle(&self, delivery_tag: u64) -> Result<(String, Delivery), TransportError> {
        self.ensure_open()?;
        let mut state = self.state.lock().unwrap();
        let position = state
            .unacked
            .iter()
            .position(|(tag, _, _)| *tag == delivery_tag)
            .ok_or_else(|| TransportError::AckFailed {
                delivery_tag,
                reason: "unknown delivery tag".to_string(),
            })?;
        let (_, queue, delivery) = state.unacked.remove(position);
        Ok((queue, delivery))
    }

    fn session_id(&self) -> SessionId {
        self.state.lock().unwrap().session_id
    }
}

impl Channel for InMemoryChannel {
    fn confirm_select(&self) -> TransportFuture<'_, ()> {
        let result = self.ensure_open().map(|()| {
            self.state.lock().unwrap().confirm_mode = true;
        });
        Box::pin(ready(result))
    }

    fn basic_qos(&self, prefetch_count: u16) -> TransportFuture<'_, ()> {
        let result = self.ensure_open().map(|()| {
            self.state.lock().unwrap().prefetch = Some(prefetch_count);
        });
        Box::pin(ready(result))
    }

    fn consume(&self, queue: &str) -> TransportFuture<'_, Box<dyn Consumer>> {
        let result = self.ensure_open().map(|()| {
            Box::new(InMemoryConsumer {
                broker: self.broker.clone(),
                state: Arc::clone(&self.state),
                closed: Arc::clone(&self.closed),
                queue: queue.to_string(),
                generation: self.broker.state.consumer_generation.load(Ordering::SeqCst),
            }) as Box<dyn Consumer>
        });
        Box::pin(ready(result))
    }

    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> TransportFuture<'_, ()> {
        let result = self.ensure_open().map(|()| {
            self.broker.state.published.lock().unwrap().push(PublishedMessage {
                session_id: self.session_id(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                message,
            });
        });
        Box::pin(ready(result))
    }

    fn ack(&self, delivery_tag: u64) -> TransportFuture<'_, ()> {
        let result = self.settle(delivery_tag).map(|_| {
            self.broker
                .state
                .acked
                .lock()
                .unwrap()
                .push((self.session_id(), delivery_tag));
            self.broker.state.notify.notify_waiters();
        });
        Box::pin(ready(result))
    }

    fn reject(&self, delivery_tag: u64, requeue: bool) -> TransportFuture<'_, ()> {
        let result = self.settle(delivery_tag).map(|(queue, delivery)| {
            if requeue {
                self.broker.requeue_front(queue, delivery);
            }
            self.broker
                .state
                .rejected
                .lock()
                .unwrap()
                .push((self.session_id(), delivery_tag, requeue));
            self.broker.state.notify.notify_waiters();
        });
        Box::pin(ready(result))
    }
}

struct InMemoryConsumer {
    broker: InMemoryBroker,
    state: Arc<Mutex<ChannelState>>,
    closed: Arc<AtomicBool>,
    queue: String,
    generation: u64,
}

impl InMemoryConsumer {
    fn try_dispatch(&self) -> Option<Delivery> {
        let mut guard = self.state.lock().unwrap();
        let channel = &mut *guard;

        if let Some(prefetch) = channel.prefetch.filter(|prefetch| *prefetch > 0) {
            if channel.unacked.len() >= usize::from(prefetch) {
                return None;
            }
        }

        let mut delivery = self
            .broker
            .state
            .queues
            .lock()
            .unwrap()
            .get_mut(&self.queue)?
            .pop_front()?;

        channel.next_tag += 1;
        delivery.delivery_tag = channel.next_tag;
        channel
            .unacked
            .push((channel.next_tag, self.queue.clone(), delivery.clone()));
        self.broker
            .state
            .max_unacked
            .fetch_max(channel.unacked.len(), Ordering::SeqCst);

        Some(delivery)
    }
}

impl Consumer for InMemoryConsumer {
    fn is_consuming(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
            && self.broker.state.consumer_generation.load(Ordering::SeqCst) == self.generation
    }

    fn next_delivery(&mut self, timeout: Duration) -> TransportFuture<'_, Option<Delivery>> {
        Box::pin(async move {
            let deadline = tokio::time::Instant::now() + timeout;
            loop {
                let notified = self.broker.state.notify.notified();

                if self.closed.load(Ordering::SeqCst) {
                    return Err(TransportError::ConnectionLost("session closed".to_string()));
                }
                if InMemoryBroker::take(&self.broker.state.pending_failures) {
                    return Err(TransportError::ConnectionLost(
                        "simulated connection loss".to_string(),
                    ));
                }
                if !self.is_consuming() {
                    return Ok(None);
                }
                if let Some(delivery) = self.try_dispatch() {
                    return Ok(Some(delivery));
                }
                if tokio::time::timeout_at(deadline, notified).await.is_err() {
                    return Ok(None);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(payload: &str) -> Delivery {
        Delivery::new(0, payload.as_bytes().to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn prefetch_limits_dispatch() {
        let broker = InMemoryBroker::new();
        broker.enqueue("tasks", delivery("a"));
        broker.enqueue("tasks", delivery("b"));

        let session = broker.transport().connect().await.unwrap();
        let channel = session.channel();
        channel.basic_qos(1).await.unwrap();
        let mut consumer = channel.consume("tasks").await.unwrap();

        let first = consumer.next_delivery(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(first.delivery_tag, 1);
        assert!(consumer.next_delivery(Duration::from_millis(10)).await.unwrap().is_none());

        channel.ack(first.delivery_tag).await.unwrap();
        let second = consumer.next_delivery(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(second.delivery_tag, 2);
        assert_eq!(second.payload, b"b".to_vec());
        assert_eq!(broker.max_unacked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn close_requeues_unacked_and_reports_double_close() {
        let broker = InMemoryBroker::new();
        broker.enqueue("tasks", delivery("a"));

        let session = broker.transport().connect().await.unwrap();
        let mut consumer = session.channel().consume("tasks").await.unwrap();
        consumer.next_delivery(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(broker.queue_len("tasks"), 0);

        session.close().await.unwrap();
        assert_eq!(broker.queue_len("tasks"), 1);
        assert_eq!(session.close().await, Err(TransportError::AlreadyClosed));
        assert_eq!(broker.close_calls(), vec![session.id(), session.id()]);
        assert!(!consumer.is_consuming());
    }

    #[tokio::test(start_paused = true)]
    async fn injected_failures() {
        let broker = InMemoryBroker::new();
        broker.refuse_connects(1);
        assert!(broker.transport().connect().await.is_err());

        let session = broker.transport().connect().await.unwrap();
        let mut consumer = session.channel().consume("tasks").await.unwrap();

        broker.fail_next_wait();
        assert!(matches!(
            consumer.next_delivery(Duration::from_millis(10)).await,
            Err(TransportError::ConnectionLost(_))
        ));

        broker.cancel_consumers();
        assert!(!consumer.is_consuming());
        assert_eq!(consumer.next_delivery(Duration::from_millis(10)).await, Ok(None));
    }

    #[tokio::test]
    async fn unknown_tag_cannot_be_acked() {
        let broker = InMemoryBroker::new();
        let session = broker.transport().connect().await.unwrap();
        assert!(matches!(
            session.channel().ack(42).await,
            Err(TransportError::AckFailed { delivery_tag: 42, .. })
        ));
    }
}
