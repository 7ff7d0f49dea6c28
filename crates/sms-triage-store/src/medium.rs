//! Persistence media: opaque key → bytes stores.
//!
//! The record store and the allow-list each persist one serialized blob under
//! their own key. A medium only has to load, replace, and remove whole blobs.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use sms_triage_core::error::{Error, Result};
use sms_triage_core::lock_order::{LockLevel, OrderedMutex};

/// Rewrites the value under one key: gets the current bytes (`None` when
/// absent) and returns the replacement, or `None` to leave the value alone.
pub type Rewrite<'a> = dyn FnMut(Option<&[u8]>) -> Result<Option<Vec<u8>>> + 'a;

/// Key-value persistence collaborator.
///
/// `load` returns `Ok(None)` when nothing has been stored under `key`.
/// `store` replaces the value as one unit: readers see either the old or the
/// new bytes, never a mix. `update` runs a read-modify-write with no other
/// writer (in this process or another one sharing the medium) in between.
pub trait Medium: Send + Sync {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn store(&self, key: &str, bytes: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn update(&self, key: &str, rewrite: &mut Rewrite<'_>) -> Result<()>;
}

// =============================================================================
// MemoryMedium
// =============================================================================

/// Process-local medium, for tests and ephemeral runs.
#[derive(Debug)]
pub struct MemoryMedium {
    entries: OrderedMutex<HashMap<String, Vec<u8>>>,
}

impl Default for MemoryMedium {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMedium {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: OrderedMutex::new(LockLevel::MediumMemory, HashMap::new()),
        }
    }

    /// Seed raw bytes, bypassing serialization (used to simulate corruption).
    pub fn put_raw(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.entries.lock().insert(key.to_string(), bytes.into());
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }
}

impl Medium for MemoryMedium {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.entries.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn update(&self, key: &str, rewrite: &mut Rewrite<'_>) -> Result<()> {
        let mut entries = self.entries.lock();
        if let Some(bytes) = rewrite(entries.get(key).map(Vec::as_slice))? {
            entries.insert(key.to_string(), bytes);
        }
        Ok(())
    }
}

// =============================================================================
// FileMedium
// =============================================================================

const LOCK_FILE_NAME: &str = ".medium.lock";

/// Directory-backed medium: one `<key>.json` file per key.
///
/// Writes go to a temp file in the same directory and are renamed into place.
/// An advisory `fs2` lock on `.medium.lock` keeps separate processes (CLI and
/// relay server) from interleaving a read with a rename; `update` holds it
/// exclusively across the whole read, rewrite and rename.
#[derive(Debug, Clone)]
pub struct FileMedium {
    root: PathBuf,
}

impl FileMedium {
    /// Open (and create if needed) a medium rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.json")))
    }

    fn lock(&self, exclusive: bool) -> Result<MediumLock> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.root.join(LOCK_FILE_NAME))?;
        if exclusive {
            FileExt::lock_exclusive(&file)?;
        } else {
            FileExt::lock_shared(&file)?;
        }
        Ok(MediumLock { file })
    }

    /// Caller holds the medium lock.
    fn read_locked(path: &Path) -> Result<Option<Vec<u8>>> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(Some(bytes))
    }

    /// Caller holds the medium lock exclusively.
    fn write_locked(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }
}

struct MediumLock {
    file: File,
}

impl Drop for MediumLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::debug!("[medium] failed to release lock: {e}");
        }
    }
}

impl Medium for FileMedium {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        let _lock = self.lock(false)?;
        Self::read_locked(&path)
    }

    fn store(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let _lock = self.lock(true)?;
        self.write_locked(&path, bytes)?;
        tracing::trace!(key, bytes = bytes.len(), "[medium] stored");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let _lock = self.lock(true)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn update(&self, key: &str, rewrite: &mut Rewrite<'_>) -> Result<()> {
        let path = self.path_for(key)?;
        let _lock = self.lock(true)?;
        let current = Self::read_locked(&path)?;
        if let Some(bytes) = rewrite(current.as_deref())? {
            self.write_locked(&path, &bytes)?;
            tracing::trace!(key, bytes = bytes.len(), "[medium] rewrote");
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "medium key must be [A-Za-z0-9_-]+, got {key:?}"
        )))
    }
}
