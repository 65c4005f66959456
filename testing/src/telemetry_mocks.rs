//! Recording telemetry sink.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use bpm_connector_core::telemetry::{
    Stage, TelemetryError, TelemetryEvent, TelemetryFuture, TelemetrySink,
};
use bpm_connector_core::transport::TransportError;
use std::future::ready;
use std::sync::{Arc, Mutex};

/// Sink that keeps every event it is given.
///
/// A [`RecordingTelemetrySink::failing`] sink still records events but
/// reports every emit as failed, to check that telemetry errors never reach
/// the delivery pipeline.
#[derive(Clone, Default)]
pub struct RecordingTelemetrySink {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
    fail: bool,
}

impl RecordingTelemetrySink {
    /// Create a sink that accepts every event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that rejects every event after recording it.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            events: Arc::default(),
            fail: true,
        }
    }

    /// Recorded events, in emit order.
    #[must_use]
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Recorded events raised at `stage`.
    #[must_use]
    pub fn events_at(&self, stage: Stage) -> Vec<TelemetryEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.stage == stage)
            .collect()
    }

    /// Forget recorded events.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl TelemetrySink for RecordingTelemetrySink {
    fn emit(&self, event: &TelemetryEvent) -> TelemetryFuture<'_> {
        self.events.lock().unwrap().push(event.clone());

        let result = if self.fail {
            Err(TelemetryError::Transport(TransportError::AlreadyClosed))
        } else {
            Ok(())
        };
        Box::pin(ready(result))
    }
}
