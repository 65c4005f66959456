//! Operational counters recorded by the connector.
//!
//! Counters go through the `metrics` facade and are dropped unless the
//! binary installs a recorder (for example a Prometheus exporter). Call
//! [`describe_metrics`] after installing it so the exporter can publish help
//! text for each counter.
//!
//! | Counter | Labels | Incremented when |
//! |---|---|---|
//! | `connector.deliveries.received` | | a delivery is taken from the queue |
//! | `connector.deliveries.acked` | | a delivery is acknowledged |
//! | `connector.deliveries.failed` | | the handler reports a failed outcome |
//! | `connector.deliveries.rejected` | | a delivery fails header validation |
//! | `connector.replies.published` | | a reply is sent to a correlated caller |
//! | `connector.reconnects` | `reason` | a session ends and a reconnect is scheduled |
//! | `connector.telemetry.dropped` | | a telemetry event could not be emitted |

use ::metrics::describe_counter;

/// Register descriptions for every connector counter with the installed
/// recorder.
pub fn describe_metrics() {
    describe_counter!(
        "connector.deliveries.received",
        "Total number of deliveries taken from the work queue"
    );
    describe_counter!(
        "connector.deliveries.acked",
        "Total number of deliveries acknowledged"
    );
    describe_counter!(
        "connector.deliveries.failed",
        "Total number of deliveries whose handler reported a failure"
    );
    describe_counter!(
        "connector.deliveries.rejected",
        "Total number of deliveries rejected for missing headers"
    );
    describe_counter!(
        "connector.replies.published",
        "Total number of replies published to correlated callers"
    );
    describe_counter!(
        "connector.reconnects",
        "Total number of reconnects, by reason"
    );
    describe_counter!(
        "connector.telemetry.dropped",
        "Total number of telemetry events that could not be emitted"
    );
}
