//! Payload blob backends
//!
//! Blobs are content-addressed: the key is the hash of the uncompressed
//! payload, so writing the same key twice is a no-op.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::RwLock;

use uuid::Uuid;

use crate::error::{VaultError, VaultResult};

/// Backend trait for payload blobs
pub trait BlobBackend: Send + Sync + std::fmt::Debug {
    /// Returns false if the key already existed
    fn write(&self, key: &str, data: &[u8]) -> VaultResult<bool>;

    fn read(&self, key: &str) -> VaultResult<Option<Vec<u8>>>;

    /// Returns whether the key existed
    fn delete(&self, key: &str) -> VaultResult<bool>;

    fn exists(&self, key: &str) -> VaultResult<bool>;
}

fn check_key(key: &str) -> VaultResult<()> {
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(VaultError::validation(format!("Invalid blob key: {:?}", key)));
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryBlobs {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl BlobBackend for MemoryBlobs {
    fn write(&self, key: &str, data: &[u8]) -> VaultResult<bool> {
        check_key(key)?;
        let mut blobs = self.blobs.write().map_err(|_| VaultError::poisoned())?;
        if blobs.contains_key(key) {
            return Ok(false);
        }
        blobs.insert(key.to_string(), data.to_vec());
        Ok(true)
    }

    fn read(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        let blobs = self.blobs.read().map_err(|_| VaultError::poisoned())?;
        Ok(blobs.get(key).cloned())
    }

    fn delete(&self, key: &str) -> VaultResult<bool> {
        let mut blobs = self.blobs.write().map_err(|_| VaultError::poisoned())?;
        Ok(blobs.remove(key).is_some())
    }

    fn exists(&self, key: &str) -> VaultResult<bool> {
        let blobs = self.blobs.read().map_err(|_| VaultError::poisoned())?;
        Ok(blobs.contains_key(key))
    }
}

/// One file per blob under a root directory
#[derive(Debug)]
pub struct DirBlobs {
    root: PathBuf,
}

impl DirBlobs {
    pub fn open(root: PathBuf) -> VaultResult<Self> {
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl BlobBackend for DirBlobs {
    fn write(&self, key: &str, data: &[u8]) -> VaultResult<bool> {
        check_key(key)?;
        let path = self.path(key);
        if path.exists() {
            return Ok(false);
        }

        // Write to a private temp file and rename so a crash never leaves a
        // partial blob; concurrent writers of one key each get their own
        let tmp = self.root.join(format!(".{}.{}.tmp", key, Uuid::new_v4().simple()));
        let written = File::create(&tmp).and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(true)
    }

    fn read(&self, key: &str) -> VaultResult<Option<Vec<u8>>> {
        check_key(key)?;
        match fs::read(self.path(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> VaultResult<bool> {
        check_key(key)?;
        match fs::remove_file(self.path(key)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> VaultResult<bool> {
        check_key(key)?;
        Ok(self.path(key).exists())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn exercise(backend: &dyn BlobBackend) {
        assert!(backend.write("abc123", b"payload").unwrap());
        assert!(!backend.write("abc123", b"other").unwrap());
        assert_eq!(backend.read("abc123").unwrap().unwrap(), b"payload");
        assert!(backend.exists("abc123").unwrap());
        assert!(backend.delete("abc123").unwrap());
        assert!(!backend.delete("abc123").unwrap());
        assert!(backend.read("abc123").unwrap().is_none());
    }

    #[test]
    fn test_memory_blobs() {
        exercise(&MemoryBlobs::default());
    }

    #[test]
    fn test_dir_blobs() {
        let dir = TempDir::new().unwrap();
        exercise(&DirBlobs::open(dir.path().join("blobs")).unwrap());
    }

    #[test]
    fn test_rejects_path_like_keys() {
        let backend = MemoryBlobs::default();
        assert!(backend.write("../etc", b"x").is_err());
        assert!(backend.write("", b"x").is_err());
    }

    #[test]
    fn test_concurrent_writers_of_one_key() {
        let dir = TempDir::new().unwrap();
        let backend = Arc::new(DirBlobs::open(dir.path().join("blobs")).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let backend = Arc::clone(&backend);
                std::thread::spawn(move || backend.write("shared", b"same bytes"))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }

        assert_eq!(backend.read("shared").unwrap().unwrap(), b"same bytes");
        let leftovers = fs::read_dir(dir.path().join("blobs")).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
