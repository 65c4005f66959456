//! # BPM Connector Core
//!
//! Core traits and types for connectors that bridge a work queue and a
//! business-process engine.
//!
//! A connector consumes task messages from a queue, validates their headers,
//! fetches process state from the engine, lets an injected handler do the
//! work, and answers synchronous (request/reply) callers on their transient
//! reply destination.
//!
//! ## Core Concepts
//!
//! - **Delivery**: One message received from the queue, with its acknowledgement tag
//! - **Transport**: Connects to the queue broker and hands out [`transport::Session`]s
//! - **Process Engine**: Reads and writes process-instance variables
//! - **Correlation**: The `correlation_id` / `reply_to` pair enabling request/reply
//! - **Escalation**: Recording a failure to the operational log and, optionally,
//!   to a structured telemetry sink
//! - **Delivery Handler**: The business callback, injected per connector
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   delivery   ┌────────────┐   headers ok   ┌──────────────────┐
//! │  Transport   │─────────────►│ Validator  │───────────────►│ DeliveryHandler  │
//! │  (session)   │              └────────────┘                └────────┬─────────┘
//! └──────▲───────┘                                                     │
//!        │ reply (correlation_id)                  Outcome             │
//!        └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The consume loop that drives these pieces lives in `bpm-connector-runtime`.
//!
//! ## Example
//!
//! ```ignore
//! use bpm_connector_core::handler::{DeliveryContext, DeliveryHandler, Outcome};
//! use bpm_connector_core::transport::TransportError;
//!
//! struct EchoHandler;
//!
//! #[async_trait::async_trait]
//! impl DeliveryHandler for EchoHandler {
//!     async fn process(&self, ctx: &DeliveryContext) -> Result<Outcome, TransportError> {
//!         match ctx.process_variables().await {
//!             Some(_) => Ok(Outcome::Completed),
//!             None => Ok(Outcome::failed("process variables unavailable")),
//!         }
//!     }
//! }
//! ```

pub mod config;
pub mod correlation;
pub mod delivery;
pub mod engine;
pub mod escalation;
pub mod handler;
pub mod telemetry;
pub mod transport;
pub mod validation;

// Re-export commonly used types
pub use config::{ConfigError, ConnectorConfig, EngineConfig, LoggingConfig, TransportEndpoint};
pub use correlation::{Correlation, ReplyEnvelope};
pub use delivery::{Delivery, Headers, OutboundMessage};
pub use engine::{EngineError, ProcessEngine, TypedValue, VariableFetch, VariableSet};
pub use escalation::Escalator;
pub use handler::{DeliveryContext, DeliveryHandler, Outcome};
pub use telemetry::{ChannelTelemetrySink, Severity, Stage, TelemetryEvent, TelemetryFuture, TelemetrySink};
pub use transport::{Channel, Consumer, Session, SessionId, Transport, TransportError};
pub use validation::{ValidationError, ValidationFailure};
