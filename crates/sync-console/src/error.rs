//! # Console Errors
//!
//! Resolution and configuration failures. Like [`SyncError`], these are
//! programmer or deployment mistakes reported at the call site; request
//! failures travel as settlements and service events instead.

use sync_framework::{ModelId, SyncError};

/// Errors resolving a dependency through the registry or a service.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown service type: {0}")]
    UnknownServiceType(String),
    #[error("Unknown provider: {0}")]
    UnknownProvider(ModelId),
    #[error("Unknown resource class: {0}")]
    UnknownClass(String),
    #[error("Resource class {class} is not a {expected}")]
    WrongKind { class: String, expected: &'static str },
    #[error("No {class} with id {id}")]
    ModelNotFound { class: String, id: ModelId },
    #[error("Provider record is incomplete: {0}")]
    IncompleteProvider(String),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// Errors loading the bootstrap payload or applying overrides.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid bootstrap payload: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {value:?}")]
    InvalidOverride { key: &'static str, value: String },
    #[error(transparent)]
    Sync(#[from] SyncError),
}
