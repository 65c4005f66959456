//! Inbound deliveries and outbound messages.
//!
//! A [`Delivery`] is transport-neutral: adapters translate their native
//! message representation (AMQP properties, header tables) into this shape so
//! that validation, correlation and escalation stay independent of the broker.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::collections::BTreeMap;

/// Message headers, keyed by header name.
///
/// Values are kept as JSON values so that adapters can map typed broker
/// header tables without losing numbers or booleans.
pub type Headers = BTreeMap<String, serde_json::Value>;

/// One message received from the queue, paired with its acknowledgement tag.
///
/// Created per received message and discarded after it is acknowledged or
/// rejected. The owning channel is not stored here: the consume loop keeps
/// the channel that produced the delivery and uses it for the reply and the
/// acknowledgement.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge or reject this delivery
    pub delivery_tag: u64,
    /// Opaque payload, interpreted by the delivery handler
    pub payload: Vec<u8>,
    /// Header mapping, `None` when the message carried no header table
    pub headers: Option<Headers>,
    /// Correlation token, present for synchronous requests
    pub correlation_id: Option<String>,
    /// Reply destination, present for synchronous requests
    pub reply_to: Option<String>,
    /// Whether the broker has delivered this message before
    pub redelivered: bool,
}

impl Delivery {
    /// Create a delivery with no headers and no correlation metadata.
    #[must_use]
    pub fn new(delivery_tag: u64, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            payload: payload.into(),
            headers: None,
            correlation_id: None,
            reply_to: None,
            redelivered: false,
        }
    }

    /// Replace the header mapping.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }

    /// Add a single header, creating the mapping if needed.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.headers
            .get_or_insert_with(Headers::new)
            .insert(key.into(), value.into());
        self
    }

    /// Set the correlation token.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Set the reply destination.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Look up a header as text.
    ///
    /// Strings are returned as-is and numbers in their decimal form, so a
    /// broker sending an integer id header still yields a usable id. Returns
    /// `None` when the header is missing or holds any other kind of value.
    #[must_use]
    pub fn header_text(&self, key: &str) -> Option<Cow<'_, str>> {
        match self.headers.as_ref()?.get(key)? {
            serde_json::Value::String(text) => Some(Cow::Borrowed(text)),
            serde_json::Value::Number(number) => Some(Cow::Owned(number.to_string())),
            _ => None,
        }
    }

    /// Deserialize the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the payload is not valid JSON for `T`.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// A message to publish on a channel.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutboundMessage {
    /// Message body
    pub payload: Vec<u8>,
    /// Correlation token to stamp on the message
    pub correlation_id: Option<String>,
    /// MIME content type of the body
    pub content_type: Option<String>,
}

impl OutboundMessage {
    /// Create a message with a raw body.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }

    /// Create a JSON message from any serializable value.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            payload: serde_json::to_vec(value)?,
            content_type: Some("application/json".to_string()),
            ..Self::default()
        })
    }

    /// Stamp the message with a correlation token.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use serde::Deserialize;

    #[test]
    fn header_text_reads_strings_and_numbers() {
        let delivery = Delivery::new(1, Vec::new())
            .with_header("camundaProcessInstanceId", "proc-1")
            .with_header("attempt", 3)
            .with_header("urgent", true)
            .with_header("tags", serde_json::json!(["a"]));

        assert_eq!(delivery.header_text("camundaProcessInstanceId").as_deref(), Some("proc-1"));
        assert_eq!(delivery.header_text("attempt").as_deref(), Some("3"));
        assert_eq!(delivery.header_text("urgent"), None);
        assert_eq!(delivery.header_text("tags"), None);
        assert_eq!(delivery.header_text("missing"), None);
    }

    #[test]
    fn header_text_without_headers() {
        let delivery = Delivery::new(1, Vec::new());
        assert_eq!(delivery.header_text("anything"), None);
    }

    #[test]
    fn payload_json_decodes_body() {
        #[derive(Deserialize)]
        struct Task {
            name: String,
        }

        let delivery = Delivery::new(7, br#"{"name":"approve"}"#.to_vec());
        let task: Task = delivery.payload_json().unwrap();
        assert_eq!(task.name, "approve");
    }

    #[test]
    fn json_message_sets_content_type() {
        let message = OutboundMessage::json(&serde_json::json!({ "success": true }))
            .unwrap()
            .with_correlation_id("abc");

        assert_eq!(message.content_type.as_deref(), Some("application/json"));
        assert_eq!(message.correlation_id.as_deref(), Some("abc"));
        assert_eq!(message.payload, br#"{"success":true}"#.to_vec());
    }
}
