//! Secure storage collaborator.
//!
//! Identities and tokens are persisted through [`SecureStorage`], a small
//! key/value capability scoped by namespace and optional sharing group.
//! [`FileSecureStorage`] keeps owner-only files on disk;
//! [`MemorySecureStorage`] lives for the process only.

pub mod file;
pub mod memory;

pub use file::FileSecureStorage;
pub use memory::MemorySecureStorage;

use std::fmt;

use crate::error::Result;

/// What kind of record a scope holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Identity,
    Token,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Token => "token",
        }
    }
}

/// Storage scope: a namespace, optionally shared across processes through a
/// named access group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageScope {
    pub namespace: Namespace,
    pub group: Option<String>,
}

impl StorageScope {
    pub fn new(namespace: Namespace, group: Option<String>) -> Self {
        Self { namespace, group }
    }

    pub fn identity(group: Option<&str>) -> Self {
        Self::new(Namespace::Identity, group.map(str::to_string))
    }

    pub fn token(group: Option<&str>) -> Self {
        Self::new(Namespace::Token, group.map(str::to_string))
    }
}

impl fmt::Display for StorageScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.group {
            Some(group) => write!(f, "{}@{group}", self.namespace.as_str()),
            None => f.write_str(self.namespace.as_str()),
        }
    }
}

/// Put/get/delete bytes by key.
///
/// A `put` must replace the previous value atomically: a concurrent `get`
/// sees either the old bytes or the new ones.
pub trait SecureStorage: Send + Sync {
    fn put(&self, scope: &StorageScope, key: &str, bytes: &[u8]) -> Result<()>;
    fn get(&self, scope: &StorageScope, key: &str) -> Result<Option<Vec<u8>>>;
    /// Deleting a missing key is not an error.
    fn delete(&self, scope: &StorageScope, key: &str) -> Result<()>;
    fn delete_all(&self, scope: &StorageScope) -> Result<()>;
    fn keys(&self, scope: &StorageScope) -> Result<Vec<String>>;
}
