//! Request/reply correlation over a one-way queue.
//!
//! A caller that wants an answer publishes its task with a `correlation_id`
//! and a `reply_to` destination (usually an exclusive, auto-delete queue owned
//! by the caller's connection). Both must be present: a delivery carrying only
//! one of them is treated as fire-and-forget.
//!
//! For correlated deliveries the connector:
//!
//! 1. stores both values as process variables ([`Correlation::merge_into`]),
//!    so the engine can correlate later steps of the same request, and
//! 2. publishes exactly one [`ReplyEnvelope`] to `reply_to` through the
//!    channel the delivery arrived on, stamped with the original
//!    `correlation_id` ([`Correlation::send_reply`]).

use crate::delivery::{Delivery, OutboundMessage};
use crate::engine::{TypedValue, VariableSet};
use crate::transport::{Channel, TransportError};
use serde_json::{Map, Value, json};

/// Variable name under which the correlation token is stored in the engine.
pub const CORRELATION_ID_VARIABLE: &str = "rabbitCorrelationId";

/// Variable name under which the reply destination is stored in the engine.
pub const CORRELATION_REPLY_TO_VARIABLE: &str = "rabbitCorrelationReplyTo";

/// Correlation metadata of a synchronous request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    /// Token the caller matches replies against
    pub correlation_id: String,
    /// Destination the reply is published to
    pub reply_to: String,
}

impl Correlation {
    /// Extract correlation metadata from a delivery.
    ///
    /// Returns `None` unless both the correlation token and the reply
    /// destination are present and non-empty.
    #[must_use]
    pub fn from_delivery(delivery: &Delivery) -> Option<Self> {
        let correlation_id = delivery.correlation_id.as_deref().filter(|id| !id.is_empty())?;
        let reply_to = delivery.reply_to.as_deref().filter(|to| !to.is_empty())?;

        Some(Self {
            correlation_id: correlation_id.to_string(),
            reply_to: reply_to.to_string(),
        })
    }

    /// Add the correlation variables to an outgoing update set.
    pub fn merge_into(&self, updates: &mut VariableSet) {
        updates.insert(
            CORRELATION_ID_VARIABLE.to_string(),
            TypedValue::string(self.correlation_id.clone()),
        );
        updates.insert(
            CORRELATION_REPLY_TO_VARIABLE.to_string(),
            TypedValue::string(self.reply_to.clone()),
        );
    }

    /// Publish `reply` to the reply destination on `channel`.
    ///
    /// `channel` must be the channel the request was consumed on: reply
    /// destinations are scoped to the caller's transport session and are not
    /// re-resolved through a new channel.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::PublishFailed`] if the reply cannot be
    /// serialized or published.
    pub async fn send_reply(&self, channel: &dyn Channel, reply: &ReplyEnvelope) -> Result<(), TransportError> {
        let message = OutboundMessage::json(reply.as_json())
            .map_err(|e| TransportError::PublishFailed {
                routing_key: self.reply_to.clone(),
                reason: format!("Failed to serialize reply: {e}"),
            })?
            .with_correlation_id(self.correlation_id.clone());

        channel.publish("", &self.reply_to, message).await?;

        tracing::debug!(
            correlation_id = %self.correlation_id,
            reply_to = %self.reply_to,
            success = reply.is_success(),
            "Reply published"
        );
        Ok(())
    }
}

/// Add correlation variables to `updates` when `correlation` is present.
///
/// Fire-and-forget deliveries leave `updates` untouched.
pub fn merge_into_updates(correlation: Option<&Correlation>, updates: &mut VariableSet) {
    if let Some(correlation) = correlation {
        correlation.merge_into(updates);
    }
}

/// Body of a reply to a synchronous request.
///
/// Either `{"success": true}` (optionally with the process instance id under
/// the configured header name) or
/// `{"success": false, "error": [{"message": "..."}]}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyEnvelope(Value);

impl ReplyEnvelope {
    /// Plain success reply.
    #[must_use]
    pub fn success() -> Self {
        Self(json!({ "success": true }))
    }

    /// Success reply carrying the process instance id under `field`.
    #[must_use]
    pub fn success_for(field: &str, process_instance_id: &str) -> Self {
        let mut body = Map::new();
        body.insert("success".to_string(), Value::Bool(true));
        body.insert(field.to_string(), Value::String(process_instance_id.to_string()));
        Self(Value::Object(body))
    }

    /// Failure reply carrying one error message.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self(json!({
            "success": false,
            "error": [{ "message": message.into() }],
        }))
    }

    /// Whether this is a success reply.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.0.get("success").and_then(Value::as_bool).unwrap_or(false)
    }

    /// The JSON body.
    #[must_use]
    pub const fn as_json(&self) -> &Value {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn correlated() -> Delivery {
        Delivery::new(1, Vec::new())
            .with_correlation_id("abc")
            .with_reply_to("tmp-queue")
    }

    #[test]
    fn extracts_when_both_fields_present() {
        let correlation = Correlation::from_delivery(&correlated());
        assert_eq!(
            correlation,
            Some(Correlation {
                correlation_id: "abc".to_string(),
                reply_to: "tmp-queue".to_string(),
            })
        );
    }

    #[test]
    fn either_field_missing_means_fire_and_forget() {
        let only_id = Delivery::new(1, Vec::new()).with_correlation_id("abc");
        let only_reply = Delivery::new(1, Vec::new()).with_reply_to("tmp-queue");
        let empty_id = Delivery::new(1, Vec::new())
            .with_correlation_id("")
            .with_reply_to("tmp-queue");

        assert_eq!(Correlation::from_delivery(&only_id), None);
        assert_eq!(Correlation::from_delivery(&only_reply), None);
        assert_eq!(Correlation::from_delivery(&empty_id), None);
    }

    #[test]
    fn merge_injects_string_variables() {
        let correlation = Correlation::from_delivery(&correlated());
        let mut updates = VariableSet::new();
        updates.insert("approved".to_string(), TypedValue::boolean(true));

        merge_into_updates(correlation.as_ref(), &mut updates);

        assert_eq!(updates.len(), 3);
        assert_eq!(updates[CORRELATION_ID_VARIABLE], TypedValue::string("abc"));
        assert_eq!(updates[CORRELATION_REPLY_TO_VARIABLE], TypedValue::string("tmp-queue"));
    }

    #[test]
    fn merge_without_correlation_is_noop() {
        let mut updates = VariableSet::new();
        merge_into_updates(None, &mut updates);
        assert!(updates.is_empty());
    }

    #[test]
    fn envelope_shapes() {
        assert_eq!(ReplyEnvelope::success().as_json(), &json!({ "success": true }));
        assert_eq!(
            ReplyEnvelope::success_for("camundaProcessInstanceId", "proc-1").as_json(),
            &json!({ "success": true, "camundaProcessInstanceId": "proc-1" })
        );

        let failure = ReplyEnvelope::failure("boom");
        assert!(!failure.is_success());
        assert_eq!(
            failure.as_json(),
            &json!({ "success": false, "error": [{ "message": "boom" }] })
        );
    }
}
