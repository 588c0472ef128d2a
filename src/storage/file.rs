use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use super::{SecureStorage, StorageScope};
use crate::error::{CpaError, Result};

const DEFAULT_GROUP_DIR: &str = "~default";
const RECORD_EXTENSION: &str = "toml";

/// File-backed secure storage.
///
/// Layout: `<base>/<group>/<namespace>/<base64url(key)>.toml`, files are
/// created `0600` and replaced through a rename so readers never see a
/// partial record.
///
/// # Example
/// ```no_run
/// use cpa::storage::{FileSecureStorage, SecureStorage, StorageScope};
///
/// let storage = FileSecureStorage::new("/tmp/cpa");
/// storage.put(&StorageScope::token(None), "example.org", b"value")?;
/// # Ok::<(), cpa::error::CpaError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileSecureStorage {
    base_dir: PathBuf,
}

impl FileSecureStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn scope_dir(&self, scope: &StorageScope) -> PathBuf {
        let group = scope
            .group
            .as_deref()
            .map(encode_component)
            .unwrap_or_else(|| DEFAULT_GROUP_DIR.to_string());
        self.base_dir.join(group).join(scope.namespace.as_str())
    }

    fn record_path(&self, scope: &StorageScope, key: &str) -> PathBuf {
        self.scope_dir(scope)
            .join(format!("{}.{RECORD_EXTENSION}", encode_component(key)))
    }
}

impl SecureStorage for FileSecureStorage {
    fn put(&self, scope: &StorageScope, key: &str, bytes: &[u8]) -> Result<()> {
        atomic_write(&self.record_path(scope, key), bytes)
    }

    fn get(&self, scope: &StorageScope, key: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.record_path(scope, key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, scope: &StorageScope, key: &str) -> Result<()> {
        match fs::remove_file(self.record_path(scope, key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_all(&self, scope: &StorageScope) -> Result<()> {
        match fs::remove_dir_all(self.scope_dir(scope)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn keys(&self, scope: &StorageScope) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.scope_dir(scope)) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(stem) = name
                .to_str()
                .and_then(|name| name.strip_suffix(&format!(".{RECORD_EXTENSION}")))
            else {
                continue;
            };
            if let Some(key) = decode_component(stem) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

fn encode_component(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(value.as_bytes())
}

fn decode_component(value: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(value).ok()?;
    String::from_utf8(bytes).ok()
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path.file_name().ok_or_else(|| {
        CpaError::Storage(format!("Record path {} has no file name", path.display()))
    })?;
    let temp_name = format!(
        ".{}.tmp-{}",
        file_name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_storage() -> (TempDir, FileSecureStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FileSecureStorage::new(dir.path());
        (dir, storage)
    }

    #[test]
    fn put_then_get_returns_bytes() {
        let (_dir, storage) = temp_storage();
        let scope = StorageScope::token(None);
        storage.put(&scope, "example.org", b"hello").unwrap();
        assert_eq!(
            storage.get(&scope, "example.org").unwrap().as_deref(),
            Some(&b"hello"[..])
        );
    }

    #[test]
    fn keys_that_normalize_alike_do_not_collide() {
        let (_dir, storage) = temp_storage();
        let scope = StorageScope::token(None);
        storage.put(&scope, "a.b", b"dot").unwrap();
        storage.put(&scope, "a-b", b"dash").unwrap();
        assert_eq!(storage.get(&scope, "a.b").unwrap().unwrap(), b"dot");
        assert_eq!(storage.get(&scope, "a-b").unwrap().unwrap(), b"dash");
    }

    #[test]
    fn scopes_are_isolated() {
        let (_dir, storage) = temp_storage();
        storage
            .put(&StorageScope::token(None), "key", b"token")
            .unwrap();
        assert!(storage
            .get(&StorageScope::identity(None), "key")
            .unwrap()
            .is_none());
        assert!(storage
            .get(&StorageScope::token(Some("shared")), "key")
            .unwrap()
            .is_none());
    }

    #[test]
    fn overwrite_replaces_previous_value() {
        let (_dir, storage) = temp_storage();
        let scope = StorageScope::token(None);
        storage.put(&scope, "k", b"first").unwrap();
        storage.put(&scope, "k", b"second").unwrap();
        assert_eq!(storage.get(&scope, "k").unwrap().unwrap(), b"second");
        assert_eq!(storage.keys(&scope).unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn delete_missing_key_is_ok() {
        let (_dir, storage) = temp_storage();
        storage
            .delete(&StorageScope::token(None), "never-written")
            .unwrap();
    }

    #[test]
    fn delete_all_clears_only_that_scope() {
        let (_dir, storage) = temp_storage();
        let tokens = StorageScope::token(None);
        let identities = StorageScope::identity(None);
        storage.put(&tokens, "a", b"1").unwrap();
        storage.put(&tokens, "b", b"2").unwrap();
        storage.put(&identities, "a", b"3").unwrap();

        storage.delete_all(&tokens).unwrap();

        assert!(storage.keys(&tokens).unwrap().is_empty());
        assert_eq!(storage.keys(&identities).unwrap(), vec!["a".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn records_are_owner_only() {
        let (_dir, storage) = temp_storage();
        let scope = StorageScope::identity(None);
        storage.put(&scope, "https://cpa.example/", b"x").unwrap();
        let mode = fs::metadata(storage.record_path(&scope, "https://cpa.example/"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
