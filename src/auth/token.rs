use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{CpaError, Result};

/// How a token was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TokenType {
    /// Anonymous identity, no human involved.
    Client,
    /// Paired with a user account through the verification page.
    User,
}

/// Access token for a service domain.
///
/// Tokens are immutable: a refresh produces a new value that replaces the
/// stored one.
///
/// # Example
/// ```
/// use chrono::{Duration, Utc};
/// use cpa::auth::{Token, TokenType};
///
/// let token = Token {
///     value: "d1f2a3".to_string(),
///     domain: "playlist.example.org".to_string(),
///     domain_name: Some("Playlist".to_string()),
///     user_name: None,
///     token_type: TokenType::Client,
///     expiration_date: Utc::now() + Duration::hours(1),
/// };
/// assert!(!token.is_expired());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub value: String,
    pub domain: String,
    pub domain_name: Option<String>,
    /// Only present for user tokens.
    pub user_name: Option<String>,
    pub token_type: TokenType,
    pub expiration_date: DateTime<Utc>,
}

impl Token {
    /// Build a token from a successful token-endpoint response.
    ///
    /// Rejects lifetimes that would produce an already expired token.
    pub fn issue(
        domain: &str,
        token_type: TokenType,
        grant: super::request::TokenGrant,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if domain.trim().is_empty() {
            return Err(CpaError::InvalidRequest("domain must not be empty".into()));
        }
        if grant.value.is_empty() {
            return Err(CpaError::InvalidResponse("access token is empty".into()));
        }
        if grant.expires_in_secs <= 0 {
            return Err(CpaError::InvalidResponse(format!(
                "token lifetime must be positive, got {}s",
                grant.expires_in_secs
            )));
        }
        let expiration_date = Duration::try_seconds(grant.expires_in_secs)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                CpaError::InvalidResponse(format!(
                    "token lifetime of {}s is out of range",
                    grant.expires_in_secs
                ))
            })?;
        let user_name = match token_type {
            TokenType::User => grant.user_name,
            TokenType::Client => None,
        };
        Ok(Self {
            value: grant.value,
            domain: domain.to_string(),
            domain_name: grant.domain_name,
            user_name,
            token_type,
            expiration_date,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::request::TokenGrant;

    fn grant(expires_in_secs: i64) -> TokenGrant {
        TokenGrant {
            value: "abc".to_string(),
            token_type: "bearer".to_string(),
            domain_name: Some("Example".to_string()),
            user_name: Some("jane".to_string()),
            expires_in_secs,
        }
    }

    #[test]
    fn issue_sets_expiration_from_lifetime() {
        let now = Utc::now();
        let token = Token::issue("example.org", TokenType::User, grant(3600), now).unwrap();
        assert_eq!(token.expiration_date, now + Duration::seconds(3600));
        assert_eq!(token.user_name.as_deref(), Some("jane"));
        assert_eq!(token.domain, "example.org");
    }

    #[test]
    fn client_tokens_never_carry_a_user_name() {
        let token =
            Token::issue("example.org", TokenType::Client, grant(60), Utc::now()).unwrap();
        assert!(token.user_name.is_none());
    }

    #[test]
    fn non_positive_lifetime_is_rejected() {
        let result = Token::issue("example.org", TokenType::Client, grant(0), Utc::now());
        assert!(matches!(result, Err(CpaError::InvalidResponse(_))));
    }

    #[test]
    fn out_of_range_lifetime_is_rejected() {
        let result = Token::issue("example.org", TokenType::Client, grant(i64::MAX), Utc::now());
        assert!(matches!(result, Err(CpaError::InvalidResponse(msg)) if msg.contains("out of range")));
    }

    #[test]
    fn empty_domain_is_rejected() {
        let result = Token::issue("  ", TokenType::Client, grant(60), Utc::now());
        assert!(matches!(result, Err(CpaError::InvalidRequest(_))));
    }

    #[test]
    fn expiry_is_inclusive() {
        let now = Utc::now();
        let token = Token::issue("example.org", TokenType::Client, grant(10), now).unwrap();
        assert!(!token.is_expired_at(now));
        assert!(token.is_expired_at(now + Duration::seconds(10)));
    }

    #[test]
    fn token_type_parses_lowercase() {
        assert_eq!("user".parse::<TokenType>().unwrap(), TokenType::User);
        assert_eq!(TokenType::Client.to_string(), "client");
    }
}
