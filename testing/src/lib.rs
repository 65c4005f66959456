//! # BPM Connector Testing
//!
//! Test doubles for the BPM connector architecture.
//!
//! This crate provides:
//! - [`InMemoryBroker`] / [`InMemoryTransport`]: a broker that enforces
//!   prefetch, tracks unacknowledged deliveries and records every publish,
//!   with hooks to inject connection failures
//! - [`MockProcessEngine`]: scripted variable fetches, recorded updates
//! - [`RecordingTelemetrySink`]: captures telemetry events
//! - [`CountingRecorder`]: totals `metrics` counter increments
//!
//! ## Example
//!
//! ```ignore
//! use bpm_connector_testing::{InMemoryBroker, MockProcessEngine};
//!
//! #[tokio::test(start_paused = true)]
//! async fn replies_to_synchronous_requests() {
//!     let broker = InMemoryBroker::new();
//!     broker.enqueue("tasks", delivery);
//!     let supervisor = Supervisor::new(config, broker.transport(), engine, handler);
//!     // ... run until acked, then inspect broker.published_to("tmp-queue")
//! }
//! ```

pub mod engine_mocks;
pub mod metrics_mocks;
pub mod telemetry_mocks;
pub mod transport_mocks;

// Re-export commonly used items
pub use engine_mocks::MockProcessEngine;
pub use metrics_mocks::CountingRecorder;
pub use telemetry_mocks::RecordingTelemetrySink;
pub use transport_mocks::{ChannelSettings, InMemoryBroker, InMemoryTransport, PublishedMessage};
