//! Scripted process engine.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use bpm_connector_core::engine::{
    EngineError, EngineFuture, ProcessEngine, VariableFetch, VariableSet,
};
use std::collections::HashMap;
use std::future::ready;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct EngineState {
    fetches: HashMap<String, Result<VariableFetch, EngineError>>,
    fetch_calls: Vec<String>,
    updates: Vec<(String, VariableSet)>,
    update_failure: Option<EngineError>,
}

/// Process engine answering from scripted responses.
///
/// Unknown process instances answer 404, like a real engine does.
/// Updates are recorded and, unless [`MockProcessEngine::fail_updates`] was
/// called, merged into the instance's variables.
///
/// # Example
///
/// ```
/// use bpm_connector_core::engine::{TypedValue, VariableSet};
/// use bpm_connector_testing::MockProcessEngine;
///
/// let mut variables = VariableSet::new();
/// variables.insert("amount".to_string(), TypedValue::new(10, "Integer"));
///
/// let engine = MockProcessEngine::new().with_variables("proc-1", variables);
/// assert!(engine.fetch_calls().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MockProcessEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MockProcessEngine {
    /// Create an engine that knows no process instances.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer fetches for `process_instance_id` with `variables`.
    #[must_use]
    pub fn with_variables(self, process_instance_id: &str, variables: VariableSet) -> Self {
        self.state.lock().unwrap().fetches.insert(
            process_instance_id.to_string(),
            Ok(VariableFetch::ok(variables)),
        );
        self
    }

    /// Answer fetches for `process_instance_id` with a non-200 status.
    #[must_use]
    pub fn with_fetch_failure(
        self,
        process_instance_id: &str,
        status: u16,
        message: Option<&str>,
    ) -> Self {
        self.state.lock().unwrap().fetches.insert(
            process_instance_id.to_string(),
            Ok(VariableFetch::failed(status, message.map(str::to_string))),
        );
        self
    }

    /// Make fetches for `process_instance_id` fail before any answer.
    #[must_use]
    pub fn with_unreachable(self, process_instance_id: &str) -> Self {
        self.state.lock().unwrap().fetches.insert(
            process_instance_id.to_string(),
            Err(EngineError::RequestFailed("connection refused".to_string())),
        );
        self
    }

    /// Make every update fail with `error`.
    #[must_use]
    pub fn fail_updates(self, error: EngineError) -> Self {
        self.state.lock().unwrap().update_failure = Some(error);
        self
    }

    /// Process instance ids passed to `fetch_variables`, in call order.
    #[must_use]
    pub fn fetch_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().fetch_calls.clone()
    }

    /// Updates received, in call order, including rejected ones.
    #[must_use]
    pub fn updates(&self) -> Vec<(String, VariableSet)> {
        self.state.lock().unwrap().updates.clone()
    }
}

impl ProcessEngine for MockProcessEngine {
    fn fetch_variables(&self, process_instance_id: &str) -> EngineFuture<'_, VariableFetch> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls.push(process_instance_id.to_string());

        let result = state.fetches.get(process_instance_id).cloned().unwrap_or_else(|| {
            Ok(VariableFetch::failed(
                404,
                Some(format!(
                    "Process instance with id {process_instance_id} does not exist"
                )),
            ))
        });
        Box::pin(ready(result))
    }

    fn update_variables(
        &self,
        process_instance_id: &str,
        modifications: VariableSet,
    ) -> EngineFuture<'_, ()> {
        let mut state = self.state.lock().unwrap();
        state
            .updates
            .push((process_instance_id.to_string(), modifications.clone()));

        if let Some(error) = state.update_failure.clone() {
            return Box::pin(ready(Err(error)));
        }

        if let Some(Ok(fetch)) = state.fetches.get_mut(process_instance_id) {
            if let Some(variables) = fetch.variables.as_mut() {
                variables.extend(modifications);
            }
        }
        Box::pin(ready(Ok(())))
    }
}
