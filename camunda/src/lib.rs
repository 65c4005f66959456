//! Camunda REST client for BPM connectors.
//!
//! [`CamundaClient`] implements [`ProcessEngine`] against the Camunda 7 REST
//! API:
//!
//! - `GET {base}/process-instance/{id}/variables?deserializeValues=false`
//! - `POST {base}/process-instance/{id}/variables` with `{"modifications": {...}}`
//!
//! Variables are fetched without deserialization, so object values come
//! back as the serialized string plus `valueInfo` and can be written back
//! unchanged.
//!
//! [`ProcessEngine`]: bpm_connector_core::engine::ProcessEngine

pub mod client;
pub mod types;

pub use client::CamundaClient;
pub use types::{EngineErrorBody, VariableModifications};
