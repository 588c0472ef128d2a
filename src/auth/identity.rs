use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{CpaError, Result};
use crate::storage::{SecureStorage, StorageScope};

const IDENTITY_FILE_VERSION: u32 = 1;

type RegistrationLocks = StdMutex<HashMap<(String, StorageScope), Arc<Mutex<()>>>>;

/// One registration lock per (provider URL, scope) for the whole process.
static REGISTRATION_LOCKS: OnceLock<RegistrationLocks> = OnceLock::new();

fn registration_lock(provider_url: &str, scope: &StorageScope) -> Arc<Mutex<()>> {
    let mut locks = REGISTRATION_LOCKS
        .get_or_init(Default::default)
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    locks
        .entry((provider_url.to_string(), scope.clone()))
        .or_default()
        .clone()
}

/// Client credentials issued by the authorization provider's registration
/// endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub identifier: String,
    pub secret: String,
}

impl Identity {
    pub fn new(identifier: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("identifier", &self.identifier)
            .field("secret", &"..")
            .finish()
    }
}

/// Persists the single identity of one authorization provider within a
/// storage scope.
#[derive(Clone)]
pub struct IdentityStore {
    storage: Arc<dyn SecureStorage>,
    scope: StorageScope,
    provider_url: String,
    registering: Arc<Mutex<()>>,
}

impl fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityStore")
            .field("scope", &self.scope)
            .field("provider_url", &self.provider_url)
            .finish()
    }
}

impl IdentityStore {
    pub fn new(
        storage: Arc<dyn SecureStorage>,
        provider_url: impl Into<String>,
        group: Option<&str>,
    ) -> Self {
        let provider_url = provider_url.into();
        let scope = StorageScope::identity(group);
        Self {
            registering: registration_lock(&provider_url, &scope),
            storage,
            scope,
            provider_url,
        }
    }

    /// Held while registering. Every store for the same provider URL and
    /// scope in this process shares it, so only one of them registers.
    pub async fn lock_registration(&self) -> MutexGuard<'_, ()> {
        self.registering.lock().await
    }

    pub fn get(&self) -> Result<Option<Identity>> {
        let Some(bytes) = self.storage.get(&self.scope, &self.provider_url)? else {
            return Ok(None);
        };
        let raw = std::str::from_utf8(&bytes)
            .map_err(|err| CpaError::Storage(format!("identity record is not UTF-8: {err}")))?;
        let file: IdentityFile = toml::from_str(raw)?;
        if file.version != IDENTITY_FILE_VERSION {
            return Err(CpaError::Storage(format!(
                "unsupported identity record version {}",
                file.version
            )));
        }
        Ok(Some(file.identity))
    }

    pub fn put(&self, identity: &Identity) -> Result<()> {
        let file = IdentityFile {
            version: IDENTITY_FILE_VERSION,
            provider_url: self.provider_url.clone(),
            identity: identity.clone(),
            registered_at: Utc::now(),
        };
        let serialized = toml::to_string(&file)?;
        self.storage
            .put(&self.scope, &self.provider_url, serialized.as_bytes())
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.delete(&self.scope, &self.provider_url)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    version: u32,
    provider_url: String,
    identity: Identity,
    registered_at: DateTime<Utc>,
}
