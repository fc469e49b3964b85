//! Shared file-content cache with at-most-one load per file.
//!
//! Dynamic files are registered once and uploaded by many worker threads;
//! re-reading them from disk for every sample would dominate I/O. The
//! cache resolves paths against a base directory, reads each distinct
//! file exactly once and hands out cheap `Arc<[u8]>` clones afterwards.
//!
//! There is deliberately no global instance: construct one and share it
//! by `Arc` wherever a single cache is wanted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur when loading file content.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to read file '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Content of one cached file. The hash is computed lazily on first use.
struct CachedFile {
    bytes: Arc<[u8]>,
    sha256: OnceLock<String>,
}

impl CachedFile {
    fn sha256(&self) -> &str {
        self.sha256.get_or_init(|| {
            let mut hasher = Sha256::new();
            hasher.update(&self.bytes);
            format!("{:x}", hasher.finalize())
        })
    }
}

/// One slot per resolved path. Loading locks only this slot, so two
/// threads asking for the same file serialize on it while loads of
/// different files proceed in parallel.
type Slot = Arc<Mutex<Option<Arc<CachedFile>>>>;

/// Keyed load-once cache of file contents.
pub struct FileContentCache {
    base_dir: PathBuf,
    slots: Mutex<HashMap<PathBuf, Slot>>,
}

impl FileContentCache {
    /// Create a cache resolving relative paths against `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve a configured path: absolute paths pass through, relative
    /// paths are looked up under the base directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.base_dir.join(p)
        }
    }

    /// Raw bytes of the file at `path`, loaded at most once.
    pub fn content(&self, path: &str) -> Result<Arc<[u8]>, CacheError> {
        Ok(self.load(path)?.bytes.clone())
    }

    /// Lowercase hex SHA-256 of the file content at `path`.
    pub fn sha256(&self, path: &str) -> Result<String, CacheError> {
        Ok(self.load(path)?.sha256().to_string())
    }

    /// Number of distinct files currently cached.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops all cached content. Subsequent reads reload from disk.
    pub fn clear(&self) {
        self.slots.lock().unwrap().clear();
    }

    fn load(&self, path: &str) -> Result<Arc<CachedFile>, CacheError> {
        let resolved = self.resolve(path);

        // Short critical section on the map; the slot mutex covers the
        // actual disk read.
        let slot = {
            let mut slots = self.slots.lock().unwrap();
            slots.entry(resolved.clone()).or_default().clone()
        };

        let mut guard = slot.lock().unwrap();
        if let Some(cached) = guard.as_ref() {
            return Ok(cached.clone());
        }

        debug!(path = %resolved.display(), "loading file into content cache");
        let bytes = std::fs::read(&resolved).map_err(|source| CacheError::Read {
            path: resolved.clone(),
            source,
        })?;

        let cached = Arc::new(CachedFile {
            bytes: bytes.into(),
            sha256: OnceLock::new(),
        });
        *guard = Some(cached.clone());
        Ok(cached)
    }
}
