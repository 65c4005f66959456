//! Transport abstraction for queue connectivity.
//!
//! A [`Transport`] knows how to reach a broker. Each call to
//! [`Transport::connect`] yields a brand-new [`Session`] owning one connection
//! and one primary [`Channel`]. Sessions are never repaired in place: when
//! anything goes wrong the consume loop closes the session and asks the
//! transport for a fresh one.
//!
//! No retries happen inside a transport. Retry and backoff policy belongs to
//! the supervisor in `bpm-connector-runtime`.
//!
//! # Implementations
//!
//! - `AmqpTransport` (`bpm-connector-amqp`) - For production (AMQP 0-9-1)
//! - `InMemoryTransport` (`bpm-connector-testing`) - For testing
//!
//! # Dyn Compatibility
//!
//! These traits return `Pin<Box<dyn Future>>` instead of using `async fn` so
//! they can be used as trait objects (`Arc<dyn Transport>`), which is how the
//! supervisor holds them.

use crate::delivery::{Delivery, OutboundMessage};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by transport operations.
///
/// Every variant is recoverable at the supervisor level: the session is torn
/// down and a new one is established after the reconnect delay.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Failed to open a connection to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to open or configure a channel
    #[error("Channel error: {0}")]
    ChannelFailed(String),

    /// The connection dropped while in use
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to publish a message
    #[error("Publish failed for '{routing_key}': {reason}")]
    PublishFailed {
        /// Routing key (queue name for the default exchange)
        routing_key: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to register or drive a consumer
    #[error("Consume failed for queue '{queue}': {reason}")]
    ConsumeFailed {
        /// The queue being consumed
        queue: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to acknowledge or reject a delivery
    #[error("Acknowledgement failed for delivery {delivery_tag}: {reason}")]
    AckFailed {
        /// The delivery tag
        delivery_tag: u64,
        /// The reason for failure
        reason: String,
    },

    /// The session or channel was already closed
    #[error("Already closed")]
    AlreadyClosed,
}

impl TransportError {
    /// Whether this error only reports that the resource was already closed.
    #[must_use]
    pub const fn is_already_closed(&self) -> bool {
        matches!(self, Self::AlreadyClosed)
    }
}

/// Boxed future returned by transport operations.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Process-unique identifier of a [`Session`].
///
/// Every connect produces a new id, so comparing ids tells whether a session
/// was replaced across a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

impl SessionId {
    /// Allocate the next session id.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Something that can open sessions to a broker.
pub trait Transport: Send + Sync {
    /// Open a new connection and its primary channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionFailed`] or
    /// [`TransportError::ChannelFailed`] when the broker cannot be reached or
    /// refuses the connection.
    fn connect(&self) -> TransportFuture<'_, Arc<dyn Session>>;
}

/// One live connection plus its primary channel.
pub trait Session: Send + Sync {
    /// Identity of this session.
    fn id(&self) -> SessionId;

    /// The primary channel of this session.
    fn channel(&self) -> Arc<dyn Channel>;

    /// Close the connection.
    ///
    /// Closing twice must be harmless; implementations report the second
    /// close as [`TransportError::AlreadyClosed`].
    ///
    /// # Errors
    ///
    /// Returns an error when the broker rejects the close or the connection
    /// is already gone. Callers tearing down a session discard it.
    fn close(&self) -> TransportFuture<'_, ()>;
}

/// A channel on a session: publishing, consuming and acknowledgement.
pub trait Channel: Send + Sync {
    /// Switch the channel to publisher-confirm mode.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ChannelFailed`] if the broker refuses.
    fn confirm_select(&self) -> TransportFuture<'_, ()>;

    /// Limit unacknowledged deliveries held by consumers on this channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ChannelFailed`] if the broker refuses.
    fn basic_qos(&self, prefetch_count: u16) -> TransportFuture<'_, ()>;

    /// Start consuming a queue with manual acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConsumeFailed`] if the consumer cannot be registered.
    fn consume(&self, queue: &str) -> TransportFuture<'_, Box<dyn Consumer>>;

    /// Publish a message. An empty `exchange` targets the default exchange,
    /// where `routing_key` is the destination queue name.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PublishFailed`] if the message is refused or
    /// the confirm is negative.
    fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> TransportFuture<'_, ()>;

    /// Acknowledge a delivery.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AckFailed`] if the acknowledgement cannot be sent.
    fn ack(&self, delivery_tag: u64) -> TransportFuture<'_, ()>;

    /// Reject a delivery, optionally returning it to the queue.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AckFailed`] if the rejection cannot be sent.
    fn reject(&self, delivery_tag: u64, requeue: bool) -> TransportFuture<'_, ()>;
}

/// A registered consumer on a channel.
pub trait Consumer: Send {
    /// Whether the broker still considers this consumer active.
    fn is_consuming(&self) -> bool;

    /// Wait at most `timeout` for the next delivery.
    ///
    /// Returns `Ok(None)` when nothing arrived in time or the consumer was
    /// cancelled (in which case [`Consumer::is_consuming`] turns false).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionLost`] or another transport error
    /// when the underlying connection fails.
    fn next_delivery(&mut self, timeout: Duration) -> TransportFuture<'_, Option<Delivery>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let first = SessionId::next();
        let second = SessionId::next();
        assert_ne!(first, second);
        assert!(second > first);
    }

    #[test]
    fn already_closed_is_recognized() {
        assert!(TransportError::AlreadyClosed.is_already_closed());
        assert!(!TransportError::ConnectionLost("reset".to_string()).is_already_closed());
    }

    #[test]
    fn trait_objects_are_dyn_compatible() {
        fn assert_dyn(_: Option<&dyn Transport>, _: Option<&dyn Session>, _: Option<&dyn Channel>) {}
        assert_dyn(None, None, None);
    }
}
