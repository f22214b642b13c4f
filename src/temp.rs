//! Scratch files for stages that need random access.
//!
//! Naming and deletion are delegated to `tempfile`. A [`TempFile`] is deleted
//! exactly once: explicitly through [`TempFile::release`], or when dropped.

use crate::error::{Result, StreamError};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempPath};

pub const DEFAULT_PREFIX: &str = "streamstack";

/// Where scratch files go and how they are named
#[derive(Debug, Clone)]
pub struct TempFiles {
    dir: PathBuf,
    prefix: String,
}

impl Default for TempFiles {
    fn default() -> Self {
        Self::new(std::env::temp_dir(), DEFAULT_PREFIX)
    }
}

impl TempFiles {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A fresh, empty file with a unique name; deleted if dropped
    pub fn create(&self, tag: &str) -> Result<NamedTempFile> {
        let prefix = format!("{}_{}_", self.prefix, tag);
        Ok(tempfile::Builder::new()
            .prefix(&prefix)
            .tempfile_in(&self.dir)?)
    }

    /// Reserve a unique scratch path (the file exists, empty)
    pub fn reserve(&self, tag: &str) -> Result<TempFile> {
        Ok(TempFile::from(self.create(tag)?))
    }

    /// Run `f` against a scratch path, deleting it afterwards whatever happens.
    /// A failure from `f` wins over a failure to delete.
    pub fn scoped<T, F>(&self, tag: &str, f: F) -> Result<T>
    where
        F: FnOnce(&Path) -> Result<T>,
    {
        let mut temp = self.reserve(tag)?;
        let outcome = f(temp.path());
        let released = temp.release();
        let value = outcome?;
        released?;
        Ok(value)
    }
}

/// Handle to one scratch file
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    owned: Option<TempPath>,
}

impl TempFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the file has been deleted (or handed over)
    pub fn is_released(&self) -> bool {
        self.owned.is_none()
    }

    /// Delete the file now. Later calls do nothing.
    pub fn release(&mut self) -> Result<()> {
        match self.owned.take() {
            Some(owned) => {
                tracing::trace!(path = %self.path.display(), "deleting temp file");
                owned
                    .close()
                    .map_err(|e| StreamError::Io(e).into_cleanup())
            }
            None => Ok(()),
        }
    }
}

impl From<NamedTempFile> for TempFile {
    fn from(file: NamedTempFile) -> Self {
        let owned = file.into_temp_path();
        Self {
            path: owned.to_path_buf(),
            owned: Some(owned),
        }
    }
}

/// Release every handle, reporting the first failure
pub fn release_all(temps: &mut [TempFile]) -> Result<()> {
    let mut first = Ok(());
    for temp in temps.iter_mut() {
        let released = temp.release();
        if first.is_ok() {
            first = released;
        }
    }
    first
}
