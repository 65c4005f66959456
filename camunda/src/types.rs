//! Wire types of the Camunda REST API.

use bpm_connector_core::engine::VariableSet;
use serde::{Deserialize, Serialize};

/// Error body returned by the engine on non-2xx answers.
///
/// Only `message` is read; the exception class in `type` is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineErrorBody {
    /// Human-readable reason
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of a variable modification request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VariableModifications {
    /// Variables to create or overwrite
    pub modifications: VariableSet,
}
