//! Stateless requests against the authorization provider's endpoints.
//!
//! Each function performs exactly one request/response exchange and maps the
//! provider's error identifiers onto [`CpaError`]. Nothing here retries.

use reqwest::{Method, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CpaError, Result};
use crate::transport::{Transport, TransportRequest, TransportResponse};

pub const CLIENT_CREDENTIALS_GRANT: &str = "http://tech.ebu.ch/cpa/1.0/client_credentials";
pub const DEVICE_CODE_GRANT: &str = "http://tech.ebu.ch/cpa/1.0/device_code";
pub const REFRESH_TOKEN_GRANT: &str = "http://tech.ebu.ch/cpa/1.0/refresh_token";

const REGISTER_PATH: &str = "register";
const ASSOCIATE_PATH: &str = "associate";
const TOKEN_PATH: &str = "token";
const DEFAULT_INTERVAL_SECS: u64 = 5;
const STATUS_ACCEPTED: u16 = 202;

/// Credentials returned by `/register`.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field("client_secret", &"..")
            .finish()
    }
}

/// Association details returned by `/associate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: Url,
    pub interval_secs: u64,
    pub expires_in_secs: i64,
}

/// A successful `/token` answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub value: String,
    /// Wire token type, usually `bearer`.
    pub token_type: String,
    pub domain_name: Option<String>,
    pub user_name: Option<String>,
    pub expires_in_secs: i64,
}

/// Register a new client identity.
pub async fn register_client(
    transport: &dyn Transport,
    provider_url: &Url,
    client_name: &str,
    software_id: &str,
    software_version: &str,
) -> Result<ClientRegistration> {
    let body = RegisterRequest {
        client_name,
        software_id,
        software_version,
    };
    let registration: ClientRegistration =
        exchange(transport, endpoint(provider_url, REGISTER_PATH)?, &body).await?;
    if registration.client_id.is_empty() || registration.client_secret.is_empty() {
        return Err(CpaError::InvalidResponse(
            "registration response is missing client credentials".into(),
        ));
    }
    Ok(registration)
}

/// Ask for a user code to pair `client_id` with a user account for `domain`.
pub async fn request_user_code(
    transport: &dyn Transport,
    provider_url: &Url,
    client_id: &str,
    client_secret: &str,
    domain: &str,
) -> Result<UserCode> {
    let body = AssociateRequest {
        client_id,
        client_secret,
        domain,
    };
    let payload: AssociateResponse =
        exchange(transport, endpoint(provider_url, ASSOCIATE_PATH)?, &body).await?;
    let verification_url = Url::parse(&payload.verification_uri).map_err(|err| {
        CpaError::InvalidResponse(format!(
            "invalid verification URL {:?}: {err}",
            payload.verification_uri
        ))
    })?;
    Ok(UserCode {
        device_code: payload.device_code,
        user_code: payload.user_code,
        verification_url,
        interval_secs: if payload.interval == 0 {
            DEFAULT_INTERVAL_SECS
        } else {
            payload.interval
        },
        expires_in_secs: payload.expires_in,
    })
}

/// Request an access token.
///
/// With a device code this is one user-mode poll; without one the provider
/// issues a client-mode token directly.
pub async fn request_token(
    transport: &dyn Transport,
    provider_url: &Url,
    client_id: &str,
    client_secret: &str,
    domain: &str,
    device_code: Option<&str>,
) -> Result<TokenGrant> {
    let grant_type = if device_code.is_some() {
        DEVICE_CODE_GRANT
    } else {
        CLIENT_CREDENTIALS_GRANT
    };
    let body = TokenRequest {
        grant_type,
        client_id,
        client_secret,
        domain,
        device_code,
    };
    token_exchange(transport, provider_url, &body).await
}

/// Replace an expired token for `domain` with a new one.
pub async fn refresh_token(
    transport: &dyn Transport,
    provider_url: &Url,
    client_id: &str,
    client_secret: &str,
    domain: &str,
) -> Result<TokenGrant> {
    let body = TokenRequest {
        grant_type: REFRESH_TOKEN_GRANT,
        client_id,
        client_secret,
        domain,
        device_code: None,
    };
    token_exchange(transport, provider_url, &body).await
}

async fn token_exchange(
    transport: &dyn Transport,
    provider_url: &Url,
    body: &TokenRequest<'_>,
) -> Result<TokenGrant> {
    let payload: TokenResponse =
        exchange(transport, endpoint(provider_url, TOKEN_PATH)?, body).await?;
    let value = payload.access_token.ok_or_else(|| {
        CpaError::InvalidResponse("token response missing access_token".into())
    })?;
    let expires_in_secs = payload
        .expires_in
        .ok_or_else(|| CpaError::InvalidResponse("token response missing expires_in".into()))?;
    Ok(TokenGrant {
        value,
        token_type: payload.token_type.unwrap_or_else(|| "bearer".to_string()),
        domain_name: payload.domain_name,
        user_name: payload.user_name,
        expires_in_secs,
    })
}

/// Resolve an endpoint relative to the provider URL, which may or may not end
/// with a slash.
pub fn endpoint(provider_url: &Url, path: &str) -> Result<Url> {
    let mut base = provider_url.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path).map_err(|err| {
        CpaError::Configuration(format!("cannot build {path} endpoint from {provider_url}: {err}"))
    })
}

async fn exchange<B, R>(transport: &dyn Transport, url: Url, body: &B) -> Result<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    let request = TransportRequest {
        method: Method::POST,
        url: url.clone(),
        headers: vec![
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ],
        body: serde_json::to_vec(body)
            .map_err(|err| CpaError::InvalidRequest(err.to_string()))?,
    };
    let response = transport.send(request).await?;
    tracing::debug!(endpoint = %url.path(), status = response.status, "CPA request completed");
    decode_response(response)
}

fn decode_response<R: DeserializeOwned>(response: TransportResponse) -> Result<R> {
    let value: Option<serde_json::Value> = if response.body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice(&response.body) {
            Ok(value) => Some(value),
            Err(_) if !response.is_success() => None,
            Err(err) => return Err(err.into()),
        }
    };

    if let Some(error) = value.as_ref().and_then(ProviderError::from_value) {
        return Err(CpaError::from_identifier(&error.error, error.error_description));
    }

    if !response.is_success() {
        return Err(match response.status {
            400 => CpaError::InvalidRequest(format!("request rejected with status {}", response.status)),
            401 | 403 => CpaError::InvalidClient(format!("client rejected with status {}", response.status)),
            status => CpaError::InvalidResponse(format!("request failed with status {status}")),
        });
    }

    if response.status == STATUS_ACCEPTED {
        let reason = value
            .as_ref()
            .and_then(|value| value.get("reason"))
            .and_then(serde_json::Value::as_str);
        return Err(match reason {
            Some(reason) => CpaError::from_identifier(reason, None),
            None => CpaError::PendingAuthorization,
        });
    }

    let value = value.ok_or_else(|| CpaError::InvalidResponse("empty response body".into()))?;
    Ok(serde_json::from_value(value)?)
}

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    client_name: &'a str,
    software_id: &'a str,
    software_version: &'a str,
}

#[derive(Debug, Serialize)]
struct AssociateRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    domain: &'a str,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    domain: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    device_code: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct AssociateResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    interval: u64,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    token_type: Option<String>,
    #[serde(alias = "domain_display_name")]
    domain_name: Option<String>,
    user_name: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: String,
    error_description: Option<String>,
}

impl ProviderError {
    fn from_value(value: &serde_json::Value) -> Option<Self> {
        value.get("error")?.as_str()?;
        serde_json::from_value(value.clone()).ok()
    }
}
