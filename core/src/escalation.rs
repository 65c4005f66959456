//! Error escalation path.
//!
//! [`Escalator::escalate`] always writes a `tracing` event tagged with the
//! connector owner and queue. When a telemetry sink is attached it also
//! publishes a [`TelemetryEvent`]. Escalation never fails: sink errors are
//! logged at debug level and dropped.

use crate::telemetry::{
    Detail, INPUT_CHANNEL, RequestContext, ResponseContext, Severity, Stage, TELEMETRY_DOMAIN,
    TelemetryEvent, TelemetrySink,
};
use chrono::Utc;
use std::sync::Arc;

/// Records failures and lifecycle messages for one connector.
///
/// Cheap to clone. The supervisor builds one per session (the sink is bound
/// to that session's logging channel) and narrows it per delivery with
/// [`Escalator::for_process_instance`].
#[derive(Clone)]
pub struct Escalator {
    owner: String,
    queue: String,
    process_instance_id: Option<String>,
    sink: Option<(Arc<dyn TelemetrySink>, String)>,
}

impl Escalator {
    /// Escalator writing only to the operational log.
    #[must_use]
    pub fn new(owner: impl Into<String>, queue: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            queue: queue.into(),
            process_instance_id: None,
            sink: None,
        }
    }

    /// Also publish events to `sink`, tagged with `logging_queue`.
    #[must_use]
    pub fn with_sink(
        mut self,
        sink: Arc<dyn TelemetrySink>,
        logging_queue: impl Into<String>,
    ) -> Self {
        self.sink = Some((sink, logging_queue.into()));
        self
    }

    /// Copy of this escalator that tags events with a process instance id.
    #[must_use]
    pub fn for_process_instance(&self, process_instance_id: Option<&str>) -> Self {
        Self {
            process_instance_id: process_instance_id.map(ToString::to_string),
            ..self.clone()
        }
    }

    /// Escalate a failure.
    pub async fn error(&self, message: &str, stage: Stage) {
        self.escalate(message, Severity::Error, stage, None).await;
    }

    /// Record an informational lifecycle message.
    pub async fn info(&self, message: &str, stage: Stage) {
        self.escalate(message, Severity::Info, stage, None).await;
    }

    /// Escalate a failure caused by an upstream response with `status`.
    pub async fn error_with_status(&self, message: &str, stage: Stage, status: u16) {
        self.escalate(message, Severity::Error, stage, Some(status)).await;
    }

    /// Write `message` to the operational log and, if attached, the sink.
    pub async fn escalate(
        &self,
        message: &str,
        severity: Severity,
        stage: Stage,
        status: Option<u16>,
    ) {
        let process_instance_id = self.process_instance_id.as_deref().unwrap_or_default();
        match severity {
            Severity::Error => tracing::error!(
                owner = %self.owner,
                queue = %self.queue,
                stage = %stage,
                process_instance_id,
                "{message}"
            ),
            Severity::Info => tracing::info!(
                owner = %self.owner,
                queue = %self.queue,
                stage = %stage,
                process_instance_id,
                "{message}"
            ),
        }

        let Some((sink, logging_queue)) = &self.sink else {
            return;
        };

        let event = TelemetryEvent {
            domain: TELEMETRY_DOMAIN.to_string(),
            stage,
            level: severity,
            request_context: RequestContext {
                owner: self.owner.clone(),
                queue: self.queue.clone(),
                process_instance_id: self.process_instance_id.clone(),
            },
            response_context: ResponseContext { status },
            detail: Detail {
                kind: "system".to_string(),
                message: message.to_string(),
            },
            channel: INPUT_CHANNEL.to_string(),
            logging_queue: logging_queue.clone(),
            timestamp: Utc::now(),
        };

        // Telemetry failures must not reach the delivery pipeline.
        if let Err(e) = sink.emit(&event).await {
            metrics::counter!("connector.telemetry.dropped").increment(1);
            tracing::debug!(error = %e, logging_queue = %logging_queue, "Telemetry event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{TelemetryError, TelemetryFuture};
    use crate::transport::TransportError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingSink {
        events: Mutex<Vec<TelemetryEvent>>,
    }

    impl TelemetrySink for CapturingSink {
        fn emit(&self, event: &TelemetryEvent) -> TelemetryFuture<'_> {
            if let Ok(mut events) = self.events.lock() {
                events.push(event.clone());
            }
            Box::pin(async { Ok(()) })
        }
    }

    struct FailingSink;

    impl TelemetrySink for FailingSink {
        fn emit(&self, _event: &TelemetryEvent) -> TelemetryFuture<'_> {
            Box::pin(async { Err(TelemetryError::Transport(TransportError::AlreadyClosed)) })
        }
    }

    #[tokio::test]
    async fn without_sink_only_logs() {
        let escalator = Escalator::new("owner", "tasks");
        escalator.error("nothing listens", Stage::Received).await;
    }

    #[tokio::test]
    async fn sink_receives_structured_event() {
        let sink = Arc::new(CapturingSink::default());
        let escalator = Escalator::new("owner", "tasks")
            .with_sink(Arc::clone(&sink) as Arc<dyn TelemetrySink>, "bpm-logs")
            .for_process_instance(Some("proc-1"));

        escalator
            .error_with_status("instance not found", Stage::InProgress, 404)
            .await;

        let events = sink.events.lock().map(|events| events.clone()).unwrap_or_default();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.domain, "bpm");
        assert_eq!(event.level, Severity::Error);
        assert_eq!(event.stage, Stage::InProgress);
        assert_eq!(event.detail.kind, "system");
        assert_eq!(event.detail.message, "instance not found");
        assert_eq!(event.request_context.process_instance_id.as_deref(), Some("proc-1"));
        assert_eq!(event.response_context.status, Some(404));
        assert_eq!(event.logging_queue, "bpm-logs");
    }

    #[tokio::test]
    async fn sink_failure_is_swallowed() {
        let escalator = Escalator::new("owner", "tasks").with_sink(Arc::new(FailingSink), "bpm-logs");
        escalator.error("still fine", Stage::Received).await;
        escalator.info("still fine", Stage::Connection).await;
    }
}
