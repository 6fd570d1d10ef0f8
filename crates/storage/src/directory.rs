//! Directory abstraction: named byte blobs plus advisory locks
//!
//! Every index (a main-store partition or a transaction overlay) lives in one
//! directory. Two backends are provided:
//!
//! - [`RamDirectory`]: blobs in a map, locks in a shared set
//! - [`FsDirectory`]: one file per blob, written via temp + fsync + rename,
//!   locks via `fs2` exclusive file locks
//!
//! Locks are RAII: dropping a [`DirectoryLock`] releases it.

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use vellum_core::{Error, Result};

/// Lock held by a writer for its whole lifetime.
pub const WRITE_LOCK: &str = "write.lock";

/// Lock held while a commit point is published or read.
pub const COMMIT_LOCK: &str = "commit.lock";

/// Storage for one index.
pub trait Directory: Send + Sync + Debug {
    /// Human-readable location (`ram://name` or a path).
    fn location(&self) -> String;

    /// Names of all blobs.
    fn list(&self) -> Result<Vec<String>>;

    /// Whether a blob exists.
    fn exists(&self, name: &str) -> Result<bool>;

    /// Read a whole blob.
    fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// Create or atomically replace a blob.
    fn write(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Delete a blob; deleting a missing blob is not an error.
    fn delete(&self, name: &str) -> Result<()>;

    /// Try to take an advisory lock without waiting.
    fn try_lock(&self, name: &str) -> Result<Option<DirectoryLock>>;

    /// Remove every blob and the directory itself.
    fn destroy(&self) -> Result<()>;
}

/// Take a lock, polling until `timeout` elapses.
pub fn obtain_lock(
    dir: &dyn Directory,
    name: &str,
    timeout: Duration,
    poll: Duration,
) -> Result<DirectoryLock> {
    let start = Instant::now();
    loop {
        if let Some(lock) = dir.try_lock(name)? {
            return Ok(lock);
        }
        if start.elapsed() >= timeout {
            return Err(Error::LockTimeout {
                lock: format!("{}/{}", dir.location(), name),
                timeout,
            });
        }
        std::thread::sleep(poll);
    }
}

enum LockInner {
    Ram {
        held: Arc<Mutex<HashSet<String>>>,
        name: String,
    },
    File(File),
}

/// A held advisory lock; released on drop.
pub struct DirectoryLock {
    inner: LockInner,
}

impl Debug for DirectoryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            LockInner::Ram { name, .. } => write!(f, "DirectoryLock(ram:{})", name),
            LockInner::File(_) => write!(f, "DirectoryLock(file)"),
        }
    }
}

impl Drop for DirectoryLock {
    fn drop(&mut self) {
        match &self.inner {
            LockInner::Ram { held, name } => {
                held.lock().remove(name);
            }
            LockInner::File(file) => {
                if let Err(e) = FileExt::unlock(file) {
                    tracing::warn!(target: "vellum::storage", error = %e, "Failed to release file lock");
                }
            }
        }
    }
}

// ============================================================================
// RamDirectory
// ============================================================================

/// In-memory directory.
#[derive(Debug)]
pub struct RamDirectory {
    name: String,
    files: RwLock<HashMap<String, Arc<Vec<u8>>>>,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl RamDirectory {
    /// Create an empty directory.
    pub fn new(name: impl Into<String>) -> Self {
        RamDirectory {
            name: name.into(),
            files: RwLock::new(HashMap::new()),
            locks: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn not_found(&self, name: &str) -> Error {
        Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{}/{} does not exist", self.location(), name),
        ))
    }
}

impl Directory for RamDirectory {
    fn location(&self) -> String {
        format!("ram://{}", self.name)
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.files.read().contains_key(name))
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .get(name)
            .map(|data| data.as_ref().clone())
            .ok_or_else(|| self.not_found(name))
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        self.files
            .write()
            .insert(name.to_string(), Arc::new(data.to_vec()));
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.files.write().remove(name);
        Ok(())
    }

    fn try_lock(&self, name: &str) -> Result<Option<DirectoryLock>> {
        let mut held = self.locks.lock();
        if !held.insert(name.to_string()) {
            return Ok(None);
        }
        Ok(Some(DirectoryLock {
            inner: LockInner::Ram {
                held: Arc::clone(&self.locks),
                name: name.to_string(),
            },
        }))
    }

    fn destroy(&self) -> Result<()> {
        self.files.write().clear();
        Ok(())
    }
}

// ============================================================================
// FsDirectory
// ============================================================================

/// File-system directory.
#[derive(Debug)]
pub struct FsDirectory {
    root: PathBuf,
}

impl FsDirectory {
    /// Open (creating if needed) a directory at `root`.
    ///
    /// # Errors
    ///
    /// `StorageOpen` if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::storage_open(root.display().to_string(), e))?;
        Ok(FsDirectory { root })
    }

    /// Root path.
    pub fn path(&self) -> &Path {
        &self.root
    }
}

impl Directory for FsDirectory {
    fn location(&self) -> String {
        self.root.display().to_string()
    }

    fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    if !name.ends_with(".tmp") {
                        names.push(name.to_string());
                    }
                }
            }
        }
        Ok(names)
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.root.join(name).exists())
    }

    fn read(&self, name: &str) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.root.join(name))?)
    }

    fn write(&self, name: &str, data: &[u8]) -> Result<()> {
        let path = self.root.join(name);
        let tmp_path = self.root.join(format!("{}.tmp", name));
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        match std::fs::remove_file(self.root.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn try_lock(&self, name: &str) -> Result<Option<DirectoryLock>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(self.root.join(name))?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(DirectoryLock {
                inner: LockInner::File(file),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn destroy(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
