//! Protocol error identifiers and their classification.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Machine-readable error identifier returned by an authorization provider.
///
/// ```
/// use cpa::error::ErrorCode;
///
/// let code: ErrorCode = "slow_down".parse().unwrap();
/// assert_eq!(code, ErrorCode::SlowDown);
/// assert_eq!(code.to_string(), "slow_down");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidClient,
    SlowDown,
    AuthorizationPending,
    AccessDenied,
    ExpiredToken,
}

impl ErrorCode {
    /// Resolve an identifier, `None` when the provider sent something unknown.
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        identifier.trim().parse().ok()
    }
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request or response violated the protocol.
    Protocol,
    /// Backoff signals the engine absorbs while polling.
    Backoff,
    /// The human-facing authorization step ended without a token.
    Authorization,
    /// Another negotiation for the same domain is running.
    Concurrency,
    Storage,
    Transport,
    Configuration,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_identifiers_round_trip_through_display() {
        for code in [
            ErrorCode::InvalidRequest,
            ErrorCode::InvalidClient,
            ErrorCode::SlowDown,
            ErrorCode::AuthorizationPending,
            ErrorCode::AccessDenied,
            ErrorCode::ExpiredToken,
        ] {
            assert_eq!(ErrorCode::from_identifier(&code.to_string()), Some(code));
        }
    }

    #[test]
    fn unknown_identifier_is_none() {
        assert_eq!(ErrorCode::from_identifier("server_on_fire"), None);
        assert_eq!(ErrorCode::from_identifier(""), None);
    }

    #[test]
    fn identifier_whitespace_is_ignored() {
        assert_eq!(
            ErrorCode::from_identifier(" access_denied\n"),
            Some(ErrorCode::AccessDenied)
        );
    }
}
