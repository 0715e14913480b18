//! # Framework Errors
//!
//! This module defines the programmer-error taxonomy of the sync framework.
//! Network outcomes never show up here: a failed request is a
//! [`StoreEvent`](crate::store::StoreEvent), not an `Err`. Everything in
//! [`SyncError`] is raised synchronously at the call that caused it and is
//! never retried.

/// Errors raised synchronously by properties, models, collections and stores.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SyncError {
    #[error("Type mismatch for {target}: expected {expected}, got {actual}")]
    TypeMismatch {
        target: String,
        expected: String,
        actual: String,
    },
    #[error("Unknown property: {0}")]
    UnknownProperty(String),
    #[error("Property {0} is not nullable")]
    NotNullable(String),
    #[error("{0} has been disposed")]
    Disposed(String),
    #[error("Model not found in collection: {0}")]
    ModelNotFound(String),
    #[error("Index {index} out of bounds (len {len})")]
    IndexOutOfBounds { index: usize, len: usize },
    #[error("No store bound to {0}")]
    NoStore(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl SyncError {
    pub(crate) fn type_mismatch(
        target: impl Into<String>,
        expected: impl Into<String>,
        actual: &serde_json::Value,
    ) -> Self {
        SyncError::TypeMismatch {
            target: target.into(),
            expected: expected.into(),
            actual: describe_value(actual).to_string(),
        }
    }
}

/// Short JSON type name used in error messages.
pub(crate) fn describe_value(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "Boolean",
        Value::Number(_) => "Number",
        Value::String(_) => "String",
        Value::Array(_) => "List",
        Value::Object(_) => "Dictionary",
    }
}
