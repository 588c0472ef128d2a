use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::token::Token;
use crate::error::{CpaError, Result};
use crate::storage::{SecureStorage, StorageScope};

const TOKEN_FILE_VERSION: u32 = 1;

/// Domain-keyed token persistence.
///
/// Writes for one domain are serialized by a per-domain lock so the last
/// completed write wins. Reads never take that lock; the backing storage
/// replaces records atomically, so readers see the old token or the new one.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
/// use cpa::auth::TokenStore;
/// use cpa::storage::FileSecureStorage;
///
/// let store = TokenStore::new(Arc::new(FileSecureStorage::new("/tmp/cpa")), None);
/// let token = store.get("playlist.example.org")?;
/// # Ok::<(), cpa::error::CpaError>(())
/// ```
#[derive(Clone)]
pub struct TokenStore {
    storage: Arc<dyn SecureStorage>,
    scope: StorageScope,
    write_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenStore {
    pub fn new(storage: Arc<dyn SecureStorage>, group: Option<&str>) -> Self {
        Self {
            storage,
            scope: StorageScope::token(group),
            write_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn get(&self, domain: &str) -> Result<Option<Token>> {
        let Some(bytes) = self.storage.get(&self.scope, domain)? else {
            return Ok(None);
        };
        let raw = std::str::from_utf8(&bytes)
            .map_err(|err| CpaError::Storage(format!("token record is not UTF-8: {err}")))?;
        let file: TokenFile = toml::from_str(raw)?;
        if file.version != TOKEN_FILE_VERSION {
            return Err(CpaError::Storage(format!(
                "unsupported token record version {}",
                file.version
            )));
        }
        if file.token.domain != domain {
            return Err(CpaError::Storage(format!(
                "token record for {domain} holds a token for {}",
                file.token.domain
            )));
        }
        Ok(Some(file.token))
    }

    /// Persist `token` under its own domain, replacing any previous entry.
    pub fn put(&self, token: &Token) -> Result<()> {
        if token.domain.trim().is_empty() {
            return Err(CpaError::InvalidRequest(
                "refusing to store a token without a domain".into(),
            ));
        }
        let file = TokenFile {
            version: TOKEN_FILE_VERSION,
            token: token.clone(),
            saved_at: Utc::now(),
        };
        let serialized = toml::to_string(&file)?;

        self.with_domain_lock(&token.domain, || {
            self.storage
                .put(&self.scope, &token.domain, serialized.as_bytes())
        })?;
        tracing::debug!(domain = %token.domain, token_type = %token.token_type, "token stored");
        Ok(())
    }

    pub fn delete(&self, domain: &str) -> Result<()> {
        self.with_domain_lock(domain, || self.storage.delete(&self.scope, domain))
    }

    /// Domains that currently have a stored token.
    pub fn domains(&self) -> Result<Vec<String>> {
        self.storage.keys(&self.scope)
    }

    pub fn clear(&self) -> Result<()> {
        self.storage.delete_all(&self.scope)
    }

    /// Run `write` while holding the lock for `domain`. The lock is dropped
    /// from the map once no other writer holds or waits on it.
    fn with_domain_lock<T>(&self, domain: &str, write: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = {
            let mut locks = self.locks()?;
            locks.entry(domain.to_string()).or_default().clone()
        };
        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            write()
        };
        drop(lock);

        let mut locks = self.locks()?;
        if locks
            .get(domain)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(domain);
        }
        result
    }

    fn locks(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>>> {
        self.write_locks
            .lock()
            .map_err(|_| CpaError::Storage("token store lock poisoned".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenFile {
    version: u32,
    token: Token,
    saved_at: DateTime<Utc>,
}
