//! Variables connector.
//!
//! Reads the variables of the process instance named in each delivery and
//! writes back a `connectorProcessedAt` timestamp. Deliveries whose
//! variables cannot be read fail, so synchronous callers receive an error
//! reply instead of a silent success.

use async_trait::async_trait;
use bpm_connector_core::engine::{TypedValue, VariableSet};
use bpm_connector_core::handler::{DeliveryContext, DeliveryHandler, Outcome};
use bpm_connector_core::transport::TransportError;
use chrono::{SecondsFormat, Utc};

/// Variable written to every processed instance.
pub const PROCESSED_AT_VARIABLE: &str = "connectorProcessedAt";

/// Reason reported when the instance's variables are unavailable.
pub const VARIABLES_UNAVAILABLE: &str = "Process variables not received";

/// Handler stamping process instances as processed.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariablesHandler;

#[async_trait]
impl DeliveryHandler for VariablesHandler {
    async fn process(&self, ctx: &DeliveryContext) -> Result<Outcome, TransportError> {
        let Some(variables) = ctx.process_variables().await else {
            return Ok(Outcome::failed(VARIABLES_UNAVAILABLE));
        };

        tracing::info!(
            process_instance_id = ctx.process_instance_id().unwrap_or_default(),
            variables = variables.len(),
            "Process variables received"
        );

        let mut updates = VariableSet::new();
        updates.insert(
            PROCESSED_AT_VARIABLE.to_string(),
            TypedValue::string(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        match ctx.update_variables(updates).await {
            Ok(()) => Ok(Outcome::Completed),
            Err(e) => Ok(Outcome::failed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use bpm_connector_core::engine::EngineError;
    use bpm_connector_core::{ConnectorConfig, Delivery, EngineConfig, Escalator};
    use bpm_connector_testing::MockProcessEngine;
    use std::sync::Arc;

    fn context(engine: &MockProcessEngine) -> DeliveryContext {
        let config = ConnectorConfig::new(
            "bpm.variables",
            EngineConfig::new("http://%s:%s@localhost/engine-rest", "demo", "demo"),
        );
        let delivery = Delivery::new(1, b"{}".to_vec())
            .with_header("camundaProcessInstanceId", "proc-1")
            .with_header("camundaBusinessKey", "order-7");

        DeliveryContext::new(
            delivery,
            Arc::new(engine.clone()),
            &Escalator::new("variables-connector", "bpm.variables"),
            Arc::new(config),
        )
    }

    #[tokio::test]
    async fn stamps_instance_when_variables_are_available() {
        let engine = MockProcessEngine::new().with_variables("proc-1", VariableSet::new());

        let outcome = VariablesHandler.process(&context(&engine)).await.unwrap();

        assert_eq!(outcome, Outcome::Completed);
        let (process_instance_id, updates) = engine.updates().remove(0);
        assert_eq!(process_instance_id, "proc-1");
        let stamp = &updates[PROCESSED_AT_VARIABLE];
        assert_eq!(stamp.value_type.as_deref(), Some("String"));
        assert!(stamp.value.as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn fails_when_variables_are_unavailable() {
        let engine = MockProcessEngine::new();

        let outcome = VariablesHandler.process(&context(&engine)).await.unwrap();

        assert_eq!(outcome, Outcome::failed(VARIABLES_UNAVAILABLE));
        assert!(engine.updates().is_empty());
    }

    #[tokio::test]
    async fn fails_when_update_is_rejected() {
        let engine = MockProcessEngine::new()
            .with_variables("proc-1", VariableSet::new())
            .fail_updates(EngineError::Api {
                status: 500,
                message: Some("engine down".to_string()),
            });

        let outcome = VariablesHandler.process(&context(&engine)).await.unwrap();

        assert_eq!(
            outcome,
            Outcome::failed("Engine error (status 500): engine down")
        );
    }
}
