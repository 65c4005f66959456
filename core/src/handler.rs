//! The injected business callback and its per-delivery context.
//!
//! Concrete connectors differ only in their [`DeliveryHandler`]. The consume
//! loop validates the delivery, builds a [`DeliveryContext`], calls
//! [`DeliveryHandler::process`], then replies (for correlated requests) and
//! acknowledges according to the returned [`Outcome`].
//!
//! Only transport failures may be returned as errors: they unwind the
//! session and trigger a reconnect. Everything else is reported through the
//! context's escalation path and expressed as [`Outcome::Failed`].

use crate::config::ConnectorConfig;
use crate::correlation::{Correlation, merge_into_updates};
use crate::delivery::{Delivery, Headers};
use crate::engine::{EngineError, ProcessEngine, VariableSet};
use crate::escalation::Escalator;
use crate::telemetry::Stage;
use crate::transport::TransportError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::sync::Arc;

/// Result of processing one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Work done; correlated callers receive a success reply
    Completed,
    /// Work failed; the message is escalated and correlated callers receive
    /// a failure reply carrying it
    Failed {
        /// Reason reported to the caller
        message: String,
    },
}

impl Outcome {
    /// Shorthand for [`Outcome::Failed`].
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Business logic of a concrete connector.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Process one validated delivery.
    ///
    /// # Errors
    ///
    /// Return a [`TransportError`] only when the transport itself failed;
    /// the supervisor then tears down the session and reconnects.
    async fn process(&self, ctx: &DeliveryContext) -> Result<Outcome, TransportError>;
}

/// Everything a handler needs for one delivery.
///
/// Allocated per delivery and dropped after acknowledgement; nothing here
/// survives into the next delivery.
pub struct DeliveryContext {
    delivery: Delivery,
    correlation: Option<Correlation>,
    process_instance_id: Option<String>,
    engine: Arc<dyn ProcessEngine>,
    escalator: Escalator,
    config: Arc<ConnectorConfig>,
}

impl DeliveryContext {
    /// Build the context for `delivery`, extracting correlation metadata and
    /// tagging escalations with the delivery's process instance id.
    #[must_use]
    pub fn new(
        delivery: Delivery,
        engine: Arc<dyn ProcessEngine>,
        escalator: &Escalator,
        config: Arc<ConnectorConfig>,
    ) -> Self {
        let correlation = Correlation::from_delivery(&delivery);
        let process_instance_id = delivery
            .header_text(&config.process_instance_header)
            .map(Cow::into_owned);
        let escalator = escalator.for_process_instance(process_instance_id.as_deref());

        Self {
            delivery,
            correlation,
            process_instance_id,
            engine,
            escalator,
            config,
        }
    }

    /// The delivery being processed.
    #[must_use]
    pub const fn delivery(&self) -> &Delivery {
        &self.delivery
    }

    /// Delivery headers.
    #[must_use]
    pub const fn headers(&self) -> Option<&Headers> {
        self.delivery.headers.as_ref()
    }

    /// Correlation metadata, `None` for fire-and-forget deliveries.
    #[must_use]
    pub const fn correlation(&self) -> Option<&Correlation> {
        self.correlation.as_ref()
    }

    /// The process instance id header, as text.
    #[must_use]
    pub fn process_instance_id(&self) -> Option<&str> {
        self.process_instance_id.as_deref()
    }

    /// Connector configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    /// Escalation path tagged with this delivery's process instance.
    #[must_use]
    pub const fn escalator(&self) -> &Escalator {
        &self.escalator
    }

    /// Deserialize the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error when the payload does not match `T`.
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        self.delivery.payload_json()
    }

    /// Escalate a failure raised by the handler.
    pub async fn escalate(&self, message: &str, stage: Stage) {
        self.escalator.error(message, stage).await;
    }

    /// Fetch this delivery's process variables from the engine.
    ///
    /// Always hits the engine. Returns `None` after escalating when the
    /// engine is unreachable or answers with anything but 200.
    pub async fn process_variables(&self) -> Option<VariableSet> {
        let Some(process_instance_id) = self.process_instance_id() else {
            self.escalator
                .error(
                    &format!(
                        "`{}` header not set, cannot fetch process variables",
                        self.config.process_instance_header
                    ),
                    Stage::InProgress,
                )
                .await;
            return None;
        };

        match self.engine.fetch_variables(process_instance_id).await {
            Ok(fetch) if fetch.is_success() => Some(fetch.variables.unwrap_or_default()),
            Ok(fetch) => {
                let message = format!(
                    "Process variables from process instance <{process_instance_id}> not received, because `{}`",
                    fetch.failure_reason()
                );
                self.escalator
                    .error_with_status(&message, Stage::InProgress, fetch.status)
                    .await;
                None
            }
            Err(e) => {
                let message = format!(
                    "Process variables from process instance <{process_instance_id}> not received, because `{e}`"
                );
                self.escalator.error(&message, Stage::InProgress).await;
                None
            }
        }
    }

    /// Write `updates` back to this delivery's process instance.
    ///
    /// Correlation variables are merged in first for synchronous requests.
    ///
    /// # Errors
    ///
    /// Returns the [`EngineError`] after escalating it.
    pub async fn update_variables(&self, mut updates: VariableSet) -> Result<(), EngineError> {
        merge_into_updates(self.correlation.as_ref(), &mut updates);

        let Some(process_instance_id) = self.process_instance_id() else {
            let error = EngineError::RequestFailed(format!(
                "`{}` header not set",
                self.config.process_instance_header
            ));
            self.escalator.error(&error.to_string(), Stage::InProgress).await;
            return Err(error);
        };

        if let Err(e) = self.engine.update_variables(process_instance_id, updates).await {
            let message = format!(
                "Process variables of process instance <{process_instance_id}> not updated, because `{e}`"
            );
            self.escalator.error(&message, Stage::InProgress).await;
            return Err(e);
        }

        Ok(())
    }
}
