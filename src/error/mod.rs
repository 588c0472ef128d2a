//! Error types for the CPA client.

pub mod code;

pub use code::{ErrorCategory, ErrorCode};

use thiserror::Error;

/// Primary error type for all CPA operations.
///
/// Provider error identifiers map onto the protocol variants through
/// [`CpaError::from_identifier`]; everything else is produced locally.
#[derive(Debug, Clone, Error)]
pub enum CpaError {
    #[error("The request is invalid: {0}")]
    InvalidRequest(String),

    #[error("The response is invalid: {0}")]
    InvalidResponse(String),

    #[error("The client is invalid: {0}")]
    InvalidClient(String),

    #[error("Requests are made too fast")]
    TooFast,

    #[error("Authorization has not yet been made")]
    PendingAuthorization,

    #[error("The user denied access to the application")]
    AuthorizationDenied,

    #[error("The authorization request has been cancelled")]
    AuthorizationCancelled,

    #[error("The authorization request expired")]
    AuthorizationRequestExpired,

    #[error("Client registration failed: {0}")]
    RegistrationFailed(#[source] Box<CpaError>),

    #[error("A token request for domain {domain} is already in progress")]
    RequestAlreadyInProgress { domain: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown provider error: {identifier}")]
    Unknown {
        identifier: String,
        description: Option<String>,
    },
}

impl CpaError {
    /// Build the error matching a provider error identifier.
    pub fn from_identifier(identifier: &str, description: Option<String>) -> Self {
        let detail = || description.clone().unwrap_or_else(|| identifier.to_string());
        match ErrorCode::from_identifier(identifier) {
            Some(ErrorCode::InvalidRequest) => Self::InvalidRequest(detail()),
            Some(ErrorCode::InvalidClient) => Self::InvalidClient(detail()),
            Some(ErrorCode::SlowDown) => Self::TooFast,
            Some(ErrorCode::AuthorizationPending) => Self::PendingAuthorization,
            Some(ErrorCode::AccessDenied) => Self::AuthorizationDenied,
            Some(ErrorCode::ExpiredToken) => Self::AuthorizationRequestExpired,
            None => Self::Unknown {
                identifier: identifier.to_string(),
                description,
            },
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidRequest(_) | Self::InvalidResponse(_) | Self::InvalidClient(_) => {
                ErrorCategory::Protocol
            }
            Self::TooFast | Self::PendingAuthorization => ErrorCategory::Backoff,
            Self::AuthorizationDenied
            | Self::AuthorizationCancelled
            | Self::AuthorizationRequestExpired => ErrorCategory::Authorization,
            Self::RegistrationFailed(inner) => inner.category(),
            Self::RequestAlreadyInProgress { .. } => ErrorCategory::Concurrency,
            Self::Storage(_) => ErrorCategory::Storage,
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Unknown { .. } => ErrorCategory::Unknown,
        }
    }

    /// Whether the negotiation that produced this error is over.
    ///
    /// Only the backoff signals keep a negotiation alive.
    pub fn is_terminal(&self) -> bool {
        self.category() != ErrorCategory::Backoff
    }

    /// Whether the caller may sensibly start the whole operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transport
                | ErrorCategory::Storage
                | ErrorCategory::Concurrency
                | ErrorCategory::Backoff
        ) || matches!(
            self,
            Self::AuthorizationCancelled | Self::AuthorizationRequestExpired
        )
    }
}

impl From<reqwest::Error> for CpaError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

impl From<std::io::Error> for CpaError {
    fn from(error: std::io::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for CpaError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidResponse(error.to_string())
    }
}

impl From<toml::de::Error> for CpaError {
    fn from(error: toml::de::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<toml::ser::Error> for CpaError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, CpaError>;
