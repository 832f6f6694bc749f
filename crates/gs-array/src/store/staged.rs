//! Write-mode backing for file containers.
//!
//! While a file container is open its nodes live in a zarr directory store
//! next to the target (`<path>-staging`), and a `<path>-lock` artifact marks
//! the target as in use. The target itself holds only the header, so
//! loading it before close reports an unfinalized store.
//!
//! [`StagedFile::close`] is the finalize-time compaction: the directory is
//! packed into the target file, then the directory and the lock are removed.

use super::packed::{write_packed, CompactionReport, HEADER_MAGIC};
use super::{storage_err, Store};
use gs_common::{Error, Result};
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zarrs::filesystem::FilesystemStore;

/// Suffix of the write-lock artifact next to an open store file.
pub const LOCK_SUFFIX: &str = "-lock";

/// Suffix of the staging directory next to an open store file.
pub const STAGING_SUFFIX: &str = "-staging";

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// An open file container: staged nodes plus the write lock.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    staging_path: PathBuf,
    lock_path: PathBuf,
    store: Store,
    closed: AtomicBool,
}

impl StagedFile {
    /// Take the write lock for `path` and start an empty staging store.
    ///
    /// Fails if another writer holds the lock artifact.
    pub fn create(path: &Path) -> Result<Self> {
        let lock_path = sibling(path, LOCK_SUFFIX);
        let mut lock = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(lock) => lock,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::Storage(format!(
                    "store {} is locked by another writer ({})",
                    path.display(),
                    lock_path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(lock, "{}", std::process::id())?;

        let staging_path = sibling(path, STAGING_SUFFIX);
        let store = Self::init_staging(path, &staging_path).inspect_err(|_| {
            let _ = fs::remove_file(&lock_path);
        })?;
        debug!(path = %path.display(), staging = %staging_path.display(), "created staged store");
        Ok(Self {
            path: path.to_path_buf(),
            staging_path,
            lock_path,
            store,
            closed: AtomicBool::new(false),
        })
    }

    fn init_staging(path: &Path, staging_path: &Path) -> Result<Store> {
        if staging_path.exists() {
            // Holding the lock means nobody else owns this directory.
            warn!(staging = %staging_path.display(), "removing stale staging directory");
            fs::remove_dir_all(staging_path)?;
        }
        fs::create_dir_all(staging_path)?;
        fs::write(path, HEADER_MAGIC)?;
        let fs_store = FilesystemStore::new(staging_path)
            .map_err(|e| storage_err(&staging_path.display().to_string(), e))?;
        Ok(Store::new(Arc::new(fs_store)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn staging_path(&self) -> &Path {
        &self.staging_path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Seal the staged store, pack it into the target file, then remove the
    /// staging directory and the lock artifact.
    pub fn close(&self) -> Result<CompactionReport> {
        if self.is_closed() {
            return Err(Error::Schema(format!(
                "store {} is already closed",
                self.path.display()
            )));
        }
        self.store.seal();
        let report = write_packed(&self.store, &self.path)?;
        fs::remove_dir_all(&self.staging_path)?;
        self.closed.store(true, Ordering::SeqCst);
        if self.lock_path.exists() {
            fs::remove_file(&self.lock_path)?;
        }
        info!(
            path = %self.path.display(),
            blobs = report.blobs,
            bytes = report.final_bytes,
            "store compacted"
        );
        Ok(report)
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.is_closed() {
            warn!(path = %self.path.display(), "store dropped without being closed; staged contents discarded");
            let _ = fs::remove_dir_all(&self.staging_path);
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::read_packed;
    use tempfile::tempdir;

    #[test]
    fn test_second_writer_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.gs");
        let first = StagedFile::create(&path).unwrap();
        assert!(first.lock_path().exists());
        assert!(matches!(
            StagedFile::create(&path),
            Err(Error::Storage(ref m)) if m.contains("locked")
        ));
        drop(first);
        assert!(StagedFile::create(&path).is_ok());
    }

    #[test]
    fn test_close_packs_and_cleans_up() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.gs");
        let staged = StagedFile::create(&path).unwrap();
        staged.store().put_unsealed("a/c/0", vec![1; 32]).unwrap();
        let report = staged.close().unwrap();

        assert_eq!(report.blobs, 1);
        assert_eq!(report.final_bytes, fs::metadata(&path).unwrap().len());
        assert!(!staged.staging_path().exists());
        assert!(!staged.lock_path().exists());
        assert!(staged.store().is_sealed());
        assert!(matches!(staged.close(), Err(Error::Schema(_))));
        assert_eq!(read_packed(&path).unwrap().get("a/c/0").unwrap(), Some(vec![1; 32]));
    }

    #[test]
    fn test_drop_without_close_leaves_unfinalized_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.gs");
        let staged = StagedFile::create(&path).unwrap();
        let staging = staged.staging_path().to_path_buf();
        drop(staged);

        assert!(!staging.exists());
        assert!(!sibling(&path, LOCK_SUFFIX).exists());
        assert!(matches!(read_packed(&path), Err(Error::Storage(_))));
    }
}
