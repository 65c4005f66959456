//! Header validation for inbound deliveries.
//!
//! A delivery is only processed when it carries a header mapping and every
//! required key is present with a non-null value. Values are not inspected
//! beyond that.
//!
//! A failed validation is fatal for the running connector: the supervisor
//! escalates every failure, rejects the delivery and stops with
//! `SupervisorError::Fatal`, leaving the process exit to the binary.

use crate::delivery::Headers;
use thiserror::Error;

/// A single reason a delivery failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The delivery had no headers at all
    #[error("`headers` not set in incoming message")]
    MissingHeaders,

    /// A required header key is absent or null
    #[error("`{0}` param not set in incoming message")]
    MissingHeader(String),
}

/// Every reason a delivery failed validation, in check order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("incoming message rejected: {}", .errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
pub struct ValidationFailure {
    /// Individual failures, never empty
    pub errors: Vec<ValidationError>,
}

impl ValidationFailure {
    /// Keys reported as missing.
    pub fn missing_keys(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().filter_map(|error| match error {
            ValidationError::MissingHeader(key) => Some(key.as_str()),
            ValidationError::MissingHeaders => None,
        })
    }
}

/// Check that `headers` exist and contain every key in `required_keys`.
///
/// An absent or empty header mapping yields a single
/// [`ValidationError::MissingHeaders`]; otherwise one
/// [`ValidationError::MissingHeader`] is reported per missing key.
///
/// # Errors
///
/// Returns a [`ValidationFailure`] listing every problem found.
///
/// # Example
///
/// ```
/// use bpm_connector_core::delivery::Headers;
/// use bpm_connector_core::validation::{validate, ValidationError};
///
/// let mut headers = Headers::new();
/// headers.insert("camundaProcessInstanceId".to_string(), "proc-1".into());
///
/// let failure = validate(Some(&headers), ["camundaProcessInstanceId", "camundaBusinessKey"])
///     .unwrap_err();
/// assert_eq!(
///     failure.errors,
///     vec![ValidationError::MissingHeader("camundaBusinessKey".to_string())]
/// );
/// ```
pub fn validate<'a, I>(headers: Option<&Headers>, required_keys: I) -> Result<(), ValidationFailure>
where
    I: IntoIterator<Item = &'a str>,
{
    let Some(headers) = headers.filter(|headers| !headers.is_empty()) else {
        return Err(ValidationFailure {
            errors: vec![ValidationError::MissingHeaders],
        });
    };

    let errors: Vec<ValidationError> = required_keys
        .into_iter()
        .filter(|key| headers.get(*key).is_none_or(serde_json::Value::is_null))
        .map(|key| ValidationError::MissingHeader(key.to_string()))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure { errors })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use proptest::prelude::*;

    fn headers(pairs: &[(&str, serde_json::Value)]) -> Headers {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn accepts_complete_headers() {
        let headers = headers(&[
            ("camundaProcessInstanceId", "proc-1".into()),
            ("camundaBusinessKey", "order-9".into()),
        ]);

        assert!(validate(Some(&headers), ["camundaProcessInstanceId", "camundaBusinessKey"]).is_ok());
    }

    #[test]
    fn rejects_absent_headers() {
        let failure = validate(None, ["camundaBusinessKey"]).unwrap_err();
        assert_eq!(failure.errors, vec![ValidationError::MissingHeaders]);
    }

    #[test]
    fn rejects_empty_headers() {
        let failure = validate(Some(&Headers::new()), ["camundaBusinessKey"]).unwrap_err();
        assert_eq!(failure.errors, vec![ValidationError::MissingHeaders]);
    }

    #[test]
    fn reports_missing_business_key_by_name() {
        let headers = headers(&[("camundaProcessInstanceId", "proc-1".into())]);

        let failure = validate(Some(&headers), ["camundaProcessInstanceId", "camundaBusinessKey"])
            .unwrap_err();

        assert_eq!(failure.missing_keys().collect::<Vec<_>>(), vec!["camundaBusinessKey"]);
        assert!(failure.errors[0].to_string().contains("camundaBusinessKey"));
    }

    #[test]
    fn null_value_counts_as_missing() {
        let headers = headers(&[
            ("camundaProcessInstanceId", "proc-1".into()),
            ("camundaBusinessKey", serde_json::Value::Null),
        ]);

        let failure = validate(Some(&headers), ["camundaBusinessKey"]).unwrap_err();
        assert_eq!(
            failure.errors,
            vec![ValidationError::MissingHeader("camundaBusinessKey".to_string())]
        );
    }

    #[test]
    fn value_content_is_not_checked() {
        let headers = headers(&[("camundaBusinessKey", "".into())]);
        assert!(validate(Some(&headers), ["camundaBusinessKey"]).is_ok());
    }

    proptest! {
        #[test]
        fn any_missing_required_key_is_rejected(
            present in proptest::collection::btree_set("[a-z]{1,8}", 1..6),
            missing in "[A-Z]{1,8}",
        ) {
            let headers: Headers = present
                .iter()
                .map(|key| (key.clone(), serde_json::Value::from("x")))
                .collect();
            let mut required: Vec<&str> = present.iter().map(String::as_str).collect();
            required.push(&missing);

            let failure = validate(Some(&headers), required).unwrap_err();
            prop_assert_eq!(failure.missing_keys().collect::<Vec<_>>(), vec![missing.as_str()]);
        }
    }
}
