use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{SecureStorage, StorageScope};
use crate::error::{CpaError, Result};

type Records = HashMap<StorageScope, HashMap<String, Vec<u8>>>;

/// Process-local storage. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemorySecureStorage {
    records: RwLock<Records>,
}

impl MemorySecureStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> CpaError {
    CpaError::Storage("memory storage lock poisoned".to_string())
}

impl SecureStorage for MemorySecureStorage {
    fn put(&self, scope: &StorageScope, key: &str, bytes: &[u8]) -> Result<()> {
        self.records
            .write()
            .map_err(poisoned)?
            .entry(scope.clone())
            .or_default()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, scope: &StorageScope, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .records
            .read()
            .map_err(poisoned)?
            .get(scope)
            .and_then(|records| records.get(key))
            .cloned())
    }

    fn delete(&self, scope: &StorageScope, key: &str) -> Result<()> {
        if let Some(records) = self.records.write().map_err(poisoned)?.get_mut(scope) {
            records.remove(key);
        }
        Ok(())
    }

    fn delete_all(&self, scope: &StorageScope) -> Result<()> {
        self.records.write().map_err(poisoned)?.remove(scope);
        Ok(())
    }

    fn keys(&self, scope: &StorageScope) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .records
            .read()
            .map_err(poisoned)?
            .get(scope)
            .map(|records| records.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_absent() {
        let storage = MemorySecureStorage::new();
        assert!(storage
            .get(&StorageScope::token(None), "nothing")
            .unwrap()
            .is_none());
    }

    #[test]
    fn groups_are_distinct_scopes() {
        let storage = MemorySecureStorage::new();
        storage
            .put(&StorageScope::token(Some("group-a")), "k", b"a")
            .unwrap();
        storage
            .put(&StorageScope::token(Some("group-b")), "k", b"b")
            .unwrap();
        assert_eq!(
            storage
                .get(&StorageScope::token(Some("group-a")), "k")
                .unwrap()
                .unwrap(),
            b"a"
        );
        assert_eq!(
            storage
                .get(&StorageScope::token(Some("group-b")), "k")
                .unwrap()
                .unwrap(),
            b"b"
        );
    }
}
