//! Structured telemetry events and sinks.
//!
//! When the logging transport is enabled, every escalation is also published
//! as a [`TelemetryEvent`] to a dedicated logging queue over a second,
//! independent connection. Downstream log consumers use the `stage` and
//! process instance id to rebuild a per-instance timeline, since connectors
//! keep no state between deliveries.

use crate::delivery::OutboundMessage;
use crate::transport::{Channel, TransportError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Domain tag carried by every event.
pub const TELEMETRY_DOMAIN: &str = "bpm";

/// Logical channel name carried by events from the consuming side.
pub const INPUT_CHANNEL: &str = "input";

/// Where in the delivery pipeline an event was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Connection and subscription lifecycle
    Connection,
    /// The delivery has been received but not yet accepted
    Received,
    /// The delivery is being processed
    InProgress,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Received => write!(f, "received"),
            Self::InProgress => write!(f, "in_progress"),
        }
    }
}

/// Severity of an escalated message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational lifecycle message
    Info,
    /// Failure
    Error,
}

/// Who raised the event and about what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    /// Logical owner of the connector
    pub owner: String,
    /// Queue the connector consumes
    pub queue: String,
    /// Process instance the delivery belongs to, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_instance_id: Option<String>,
}

/// Upstream answer associated with the event, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseContext {
    /// HTTP status of the engine response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Event body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detail {
    /// Detail type, always `system` for connector-raised events
    #[serde(rename = "type")]
    pub kind: String,
    /// Human-readable message
    pub message: String,
}

/// Structured event published to the logging queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// Always [`TELEMETRY_DOMAIN`]
    pub domain: String,
    /// Pipeline stage
    pub stage: Stage,
    /// Severity
    pub level: Severity,
    /// Request side context
    pub request_context: RequestContext,
    /// Response side context
    pub response_context: ResponseContext,
    /// Event body
    pub detail: Detail,
    /// Logical channel name
    pub channel: String,
    /// Queue the event is published to
    pub logging_queue: String,
    /// When the event was raised
    pub timestamp: DateTime<Utc>,
}

/// Errors raised while emitting telemetry.
///
/// Escalation discards these: telemetry must never affect message processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    /// The event could not be serialized
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// The event could not be delivered
    #[error("Telemetry transport failed: {0}")]
    Transport(#[from] TransportError),
}

/// Boxed future returned by [`TelemetrySink::emit`].
pub type TelemetryFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TelemetryError>> + Send + 'a>>;

/// Destination for structured telemetry events.
pub trait TelemetrySink: Send + Sync {
    /// Emit one event.
    ///
    /// # Errors
    ///
    /// Returns a [`TelemetryError`] when the event cannot be delivered.
    fn emit(&self, event: &TelemetryEvent) -> TelemetryFuture<'_>;
}

/// Sink publishing events as JSON to a queue through a channel.
pub struct ChannelTelemetrySink {
    channel: Arc<dyn Channel>,
    queue: String,
}

impl ChannelTelemetrySink {
    /// Publish to `queue` on `channel` (through the default exchange).
    #[must_use]
    pub fn new(channel: Arc<dyn Channel>, queue: impl Into<String>) -> Self {
        Self {
            channel,
            queue: queue.into(),
        }
    }
}

impl TelemetrySink for ChannelTelemetrySink {
    fn emit(&self, event: &TelemetryEvent) -> TelemetryFuture<'_> {
        let message =
            OutboundMessage::json(event).map_err(|e| TelemetryError::Serialization(e.to_string()));

        Box::pin(async move {
            self.channel.publish("", &self.queue, message?).await?;
            Ok(())
        })
    }
}
