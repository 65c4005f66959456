//! Process engine abstraction.
//!
//! The engine owns process instances and their variables. Connectors read
//! variables with [`ProcessEngine::fetch_variables`] and write changes back
//! with [`ProcessEngine::update_variables`].
//!
//! Variables are kept as [`TypedValue`] boxes: the raw JSON value together
//! with the engine's own type tag. Values are never coerced into native
//! types, so writing a fetched variable back preserves its type exactly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Fallback reason used when the engine reports a failure without a message.
pub const REQUEST_ERROR_MESSAGE: &str = "Request error";

/// HTTP status that marks a successful variable fetch.
pub const STATUS_OK: u16 = 200;

/// A variable value as the engine represents it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedValue {
    /// Raw value, untouched
    #[serde(default)]
    pub value: serde_json::Value,
    /// Engine type tag (`String`, `Boolean`, `Object`, ...)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    /// Engine metadata (serialization format, object type name, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_info: Option<serde_json::Value>,
}

impl TypedValue {
    /// Create a value with an explicit type tag.
    #[must_use]
    pub fn new(value: impl Into<serde_json::Value>, value_type: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            value_type: Some(value_type.into()),
            value_info: None,
        }
    }

    /// Create a `String` typed value.
    #[must_use]
    pub fn string(value: impl Into<String>) -> Self {
        Self::new(value.into(), "String")
    }

    /// Create a `Boolean` typed value.
    #[must_use]
    pub fn boolean(value: bool) -> Self {
        Self::new(value, "Boolean")
    }
}

/// Process variables keyed by variable name.
pub type VariableSet = BTreeMap<String, TypedValue>;

/// Raw result of a variable fetch.
///
/// The engine answered, but not necessarily with success: callers check
/// [`VariableFetch::is_success`] before trusting `variables`.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableFetch {
    /// HTTP status code returned by the engine
    pub status: u16,
    /// Decoded variables, present only on success
    pub variables: Option<VariableSet>,
    /// Error message from the engine's error body, if any
    pub message: Option<String>,
}

impl VariableFetch {
    /// A successful fetch.
    #[must_use]
    pub const fn ok(variables: VariableSet) -> Self {
        Self {
            status: STATUS_OK,
            variables: Some(variables),
            message: None,
        }
    }

    /// A failed fetch with the engine's status and optional message.
    #[must_use]
    pub const fn failed(status: u16, message: Option<String>) -> Self {
        Self {
            status,
            variables: None,
            message,
        }
    }

    /// Whether the engine answered with status 200.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }

    /// The reason to report for a failed fetch.
    #[must_use]
    pub fn failure_reason(&self) -> &str {
        self.message.as_deref().unwrap_or(REQUEST_ERROR_MESSAGE)
    }
}

/// Errors that can occur when talking to the process engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The request never got an answer (DNS, connection refused, timeout)
    #[error("Request failed: {0}")]
    RequestFailed(String),

    /// The process instance id cannot address a single engine resource
    #[error("Invalid process instance id '{0}'")]
    InvalidProcessInstanceId(String),

    /// The engine answered with a body we could not decode
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// The engine answered with an unexpected status
    #[error("Engine error (status {}): {}", .status, .message.as_deref().unwrap_or(REQUEST_ERROR_MESSAGE))]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message from the engine's error body
        message: Option<String>,
    },
}

/// Boxed future returned by engine operations.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// Client for the process engine's variable API.
pub trait ProcessEngine: Send + Sync {
    /// Fetch all variables of a process instance without deserializing values.
    ///
    /// Non-200 answers are returned as a [`VariableFetch`] with no variables,
    /// not as an error.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RequestFailed`] when the engine is unreachable
    /// and [`EngineError::ResponseParseFailed`] when a 200 body cannot be decoded.
    fn fetch_variables(&self, process_instance_id: &str) -> EngineFuture<'_, VariableFetch>;

    /// Create or overwrite variables of a process instance.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Api`] when the engine rejects the update and
    /// [`EngineError::RequestFailed`] when it is unreachable.
    fn update_variables(
        &self,
        process_instance_id: &str,
        modifications: VariableSet,
    ) -> EngineFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn typed_value_keeps_engine_shape() {
        let raw = serde_json::json!({
            "type": "Object",
            "value": "{\"amount\":10}",
            "valueInfo": {
                "objectTypeName": "java.util.HashMap",
                "serializationDataFormat": "application/json"
            }
        });

        let value: TypedValue = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(value.value_type.as_deref(), Some("Object"));
        assert_eq!(value.value, serde_json::json!("{\"amount\":10}"));
        assert_eq!(serde_json::to_value(&value).unwrap(), raw);
    }

    #[test]
    fn failure_reason_falls_back() {
        let without = VariableFetch::failed(500, None);
        let with = VariableFetch::failed(404, Some("instance not found".to_string()));

        assert!(!without.is_success());
        assert_eq!(without.failure_reason(), REQUEST_ERROR_MESSAGE);
        assert_eq!(with.failure_reason(), "instance not found");
    }

    #[test]
    fn api_error_display_uses_message() {
        let err = EngineError::Api {
            status: 404,
            message: Some("instance not found".to_string()),
        };
        assert_eq!(err.to_string(), "Engine error (status 404): instance not found");
    }
}
