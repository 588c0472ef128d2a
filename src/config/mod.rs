//! Configuration (layered: code > env > defaults).

use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::{CpaError, Result};

pub const DEFAULT_CLIENT_NAME: &str = "cpa-client";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do when refreshing an expired token fails.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum RefreshPolicy {
    /// Start a full negotiation with the stored identity.
    #[default]
    FallBackToNegotiation,
    /// Return the refresh error and let the caller decide.
    Surface,
}

/// Settings for a [`crate::auth::CpaProvider`].
///
/// # Example
/// ```
/// use cpa::config::{CpaConfig, RefreshPolicy};
///
/// let config = CpaConfig::builder()
///     .authorization_provider_url("https://cpa.example/ap/".parse().unwrap())
///     .refresh_policy(RefreshPolicy::Surface)
///     .build();
/// assert_eq!(config.client_name, "cpa-client");
/// ```
#[derive(Debug, Clone, Builder)]
pub struct CpaConfig {
    pub authorization_provider_url: Url,
    /// Shared storage group; identities and tokens in the same group are
    /// visible to every provider using it.
    #[builder(into)]
    pub access_group: Option<String>,
    #[builder(into, default = default_storage_dir())]
    pub storage_dir: PathBuf,
    #[builder(into, default = DEFAULT_CLIENT_NAME.to_string())]
    pub client_name: String,
    #[builder(into, default = env!("CARGO_PKG_NAME").to_string())]
    pub software_id: String,
    #[builder(into, default = env!("CARGO_PKG_VERSION").to_string())]
    pub software_version: String,
    #[builder(default)]
    pub refresh_policy: RefreshPolicy,
    #[builder(default = DEFAULT_HTTP_TIMEOUT)]
    pub http_timeout: Duration,
}

impl CpaConfig {
    /// Load from environment variables (and `.env` if present).
    ///
    /// `CPA_PROVIDER_URL` is required; `CPA_ACCESS_GROUP`, `CPA_STORAGE_DIR`,
    /// `CPA_CLIENT_NAME`, `CPA_REFRESH_POLICY` and `CPA_HTTP_TIMEOUT_SECS` are
    /// optional.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, using the same keys as [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let raw_url = lookup("CPA_PROVIDER_URL")
            .ok_or_else(|| CpaError::Configuration("CPA_PROVIDER_URL is not set".into()))?;
        let url = Url::parse(raw_url.trim()).map_err(|err| {
            CpaError::Configuration(format!("CPA_PROVIDER_URL {raw_url:?} is invalid: {err}"))
        })?;

        let mut config = Self::builder().authorization_provider_url(url).build();

        if let Some(group) = lookup("CPA_ACCESS_GROUP").filter(|v| !v.trim().is_empty()) {
            config.access_group = Some(group);
        }
        if let Some(dir) = lookup("CPA_STORAGE_DIR").filter(|v| !v.trim().is_empty()) {
            config.storage_dir = PathBuf::from(dir);
        }
        if let Some(name) = lookup("CPA_CLIENT_NAME").filter(|v| !v.trim().is_empty()) {
            config.client_name = name;
        }
        if let Some(policy) = lookup("CPA_REFRESH_POLICY") {
            config.refresh_policy = policy.trim().parse().map_err(|_| {
                CpaError::Configuration(format!(
                    "CPA_REFRESH_POLICY {policy:?} is invalid (expected fall-back-to-negotiation or surface)"
                ))
            })?;
        }
        if let Some(secs) = lookup("CPA_HTTP_TIMEOUT_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                CpaError::Configuration(format!("CPA_HTTP_TIMEOUT_SECS {secs:?} is not a number"))
            })?;
            config.http_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

/// `~/.cpa`, or `.cpa` when no home directory is known.
pub fn default_storage_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".cpa"))
        .unwrap_or_else(|| PathBuf::from(".cpa"))
}
