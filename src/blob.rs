//! Binary blob storage for media and narrated audio.
//!
//! Blobs are content-addressed by their blake3 digest, so saving the same
//! bytes twice yields the same handle and a single stored copy. Each `save`
//! takes one reference and each `delete` releases one; the bytes go away with
//! the last reference.

use crate::error::StorageError;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobHandle {
    /// Lowercase hex blake3 digest of the bytes.
    pub key: String,
    pub content_type: String,
    pub size: u64,
}

impl BlobHandle {
    pub fn for_bytes(bytes: &[u8], content_type: &str) -> Self {
        Self {
            key: hex::encode(blake3::hash(bytes).as_bytes()),
            content_type: content_type.to_string(),
            size: bytes.len() as u64,
        }
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` and take a reference on them.
    async fn save(&self, bytes: &[u8], content_type: &str) -> Result<BlobHandle, StorageError>;

    async fn load(&self, handle: &BlobHandle) -> Result<Option<Vec<u8>>, StorageError>;

    /// Release one reference. Returns false when nothing was stored under the
    /// handle.
    async fn delete(&self, handle: &BlobHandle) -> Result<bool, StorageError>;
}

/// Filesystem blob store laid out as `{root}/blobs/{hex[0..2]}/{hex[2..4]}/{hex}.blob`,
/// with the reference count in a `{hex}.refs` file beside each blob.
pub struct FsBlobStore {
    root: PathBuf,
    refs_lock: Mutex<()>,
}

impl FsBlobStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        let blobs_dir = root.join("blobs");
        fs::create_dir_all(&blobs_dir).map_err(|e| {
            StorageError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to create blobs directory at {:?}: {}", blobs_dir, e),
            ))
        })?;
        Ok(Self {
            root,
            refs_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.len() < 4 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Invalid blob key: {}", key),
            )));
        }
        Ok(self
            .root
            .join("blobs")
            .join(&key[0..2])
            .join(&key[2..4])
            .join(format!("{}.blob", key)))
    }

    /// A blob without a refs file counts as one reference.
    fn read_refs(path: &Path) -> Result<u64, StorageError> {
        match fs::read_to_string(path) {
            Ok(raw) => raw.trim().parse().map_err(|e| {
                StorageError::Serialization(format!("bad ref count in {:?}: {}", path, e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(1),
            Err(e) => Err(StorageError::IoError(e)),
        }
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let mut temp_path = path.as_os_str().to_owned();
        temp_path.push(".tmp");
        let temp_path = PathBuf::from(temp_path);
        fs::write(&temp_path, bytes)?;
        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            StorageError::IoError(e)
        })
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn save(&self, bytes: &[u8], content_type: &str) -> Result<BlobHandle, StorageError> {
        let handle = BlobHandle::for_bytes(bytes, content_type);
        let path = self.blob_path(&handle.key)?;
        let refs_path = path.with_extension("refs");

        let _guard = self.refs_lock.lock();
        if path.exists() {
            let refs = Self::read_refs(&refs_path)? + 1;
            Self::write_atomic(&refs_path, refs.to_string().as_bytes())?;
            return Ok(handle);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Readers never see a partial blob.
        Self::write_atomic(&path, bytes)?;
        Self::write_atomic(&refs_path, b"1")?;
        Ok(handle)
    }

    async fn load(&self, handle: &BlobHandle) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.blob_path(&handle.key)?;
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(&path)?))
    }

    async fn delete(&self, handle: &BlobHandle) -> Result<bool, StorageError> {
        let path = self.blob_path(&handle.key)?;
        let refs_path = path.with_extension("refs");

        let _guard = self.refs_lock.lock();
        if !path.exists() {
            return Ok(false);
        }
        let refs = Self::read_refs(&refs_path)?;
        if refs > 1 {
            Self::write_atomic(&refs_path, (refs - 1).to_string().as_bytes())?;
            return Ok(true);
        }
        fs::remove_file(&path)?;
        match fs::remove_file(&refs_path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(StorageError::IoError(e)),
        }
    }
}

struct StoredBlob {
    bytes: Vec<u8>,
    refs: usize,
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held.
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }

    pub fn ref_count(&self, handle: &BlobHandle) -> usize {
        self.blobs.read().get(&handle.key).map_or(0, |b| b.refs)
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn save(&self, bytes: &[u8], content_type: &str) -> Result<BlobHandle, StorageError> {
        let handle = BlobHandle::for_bytes(bytes, content_type);
        self.blobs
            .write()
            .entry(handle.key.clone())
            .or_insert_with(|| StoredBlob {
                bytes: bytes.to_vec(),
                refs: 0,
            })
            .refs += 1;
        Ok(handle)
    }

    async fn load(&self, handle: &BlobHandle) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.read().get(&handle.key).map(|b| b.bytes.clone()))
    }

    async fn delete(&self, handle: &BlobHandle) -> Result<bool, StorageError> {
        let mut blobs = self.blobs.write();
        let Some(blob) = blobs.get_mut(&handle.key) else {
            return Ok(false);
        };
        blob.refs -= 1;
        if blob.refs == 0 {
            blobs.remove(&handle.key);
        }
        Ok(true)
    }
}
