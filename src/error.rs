//! Error types for the proxy-retry-pool crate.

use thiserror::Error;

use crate::classify::OutcomeKind;

/// Failure reported by an [`Operation`](crate::coordinator::Operation).
#[derive(Debug, Clone, Error)]
pub enum OperationError {
    /// Binding the operation to the selected route failed before the actual
    /// call was made (bad proxy URL, proxy handshake, client construction).
    #[error("route setup failed: {0}")]
    RouteSetup(String),
    /// The call itself failed. `kind` is set when the operation already knows
    /// the category; otherwise the message is matched against keywords.
    #[error("{message}")]
    Failed {
        kind: Option<OutcomeKind>,
        message: String,
    },
}

impl OperationError {
    /// A failure whose category is known.
    pub fn tagged(kind: OutcomeKind, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: Some(kind),
            message: message.into(),
        }
    }

    /// A failure described only by free text.
    pub fn message(message: impl Into<String>) -> Self {
        Self::Failed {
            kind: None,
            message: message.into(),
        }
    }

    /// A failure while binding to the route.
    pub fn route_setup(message: impl Into<String>) -> Self {
        Self::RouteSetup(message.into())
    }
}

/// Error raised while reading one remote catalog. Never leaves the source.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Error raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    InvalidValue { name: &'static str, value: String },
}
