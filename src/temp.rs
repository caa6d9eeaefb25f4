//! Scoped temporary-file management for in-flight recognition sessions.
//!
//! Every byte handed between pipeline stages lives in a uniquely named temp
//! file owned by exactly one session. Handles release their file on every
//! exit path: callers may `release()` explicitly, and `Drop` covers early
//! returns, errors, and teardown, so no temp file outlives its session.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::{Builder, NamedTempFile, TempDir};
use tracing::debug;

use crate::error::Result;

/// Fallback suffix used when the caller has no usable extension hint.
///
/// The external transcoder sniffs the container from content, so an opaque
/// suffix only has to be harmless, not accurate.
pub const GENERIC_SUFFIX: &str = ".bin";

/// Factory for session-scoped temp files and process-private staging
/// directories.
///
/// By default files land in the OS temp directory; tests (and operators who
/// want staging on a particular volume) can root it elsewhere.
#[derive(Debug, Clone)]
pub struct TempStore {
    root: PathBuf,
}

impl Default for TempStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TempStore {
    /// Create a store rooted at the OS temp directory.
    pub fn new() -> Self {
        Self {
            root: std::env::temp_dir(),
        }
    }

    /// Create a store rooted at a specific directory.
    ///
    /// The directory must already exist; we do not create or own it.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create an empty, uniquely named temp file with the given suffix.
    ///
    /// Suffixes that don't start with `.` get one prepended, so both `"wav"`
    /// and `".wav"` hints are accepted.
    pub fn create(&self, suffix: &str) -> Result<StagedFile> {
        let suffix = normalize_suffix(suffix);
        let inner = Builder::new()
            .prefix("parlance-audio-")
            .suffix(&suffix)
            .tempfile_in(&self.root)?;
        let path = inner.path().to_path_buf();
        debug!(path = %path.display(), "created temp file");
        Ok(StagedFile {
            path,
            inner: Some(inner),
        })
    }

    /// Create a temp file and copy a byte stream into it verbatim.
    pub fn stage(&self, suffix: &str, reader: &mut dyn Read) -> Result<StagedFile> {
        let mut staged = self.create(suffix)?;
        let file = staged
            .inner
            .as_mut()
            .expect("freshly created staged file has a backing file");
        io::copy(reader, file.as_file_mut())?;
        file.as_file_mut().flush()?;
        Ok(staged)
    }

    /// Create a process-private staging directory (e.g. for remotely fetched
    /// model artifacts). The directory and its contents are removed when the
    /// returned handle drops.
    pub fn staging_dir(&self, label: &str) -> Result<TempDir> {
        let dir = Builder::new()
            .prefix(&format!("parlance-{label}-"))
            .tempdir_in(&self.root)?;
        debug!(path = %dir.path().display(), "created staging directory");
        Ok(dir)
    }
}

/// An exclusively owned temp file holding in-flight session data.
///
/// The file is deleted when `release` is called or when the handle drops,
/// whichever comes first. `release` is idempotent.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    inner: Option<NamedTempFile>,
}

impl StagedFile {
    /// Absolute path of the staged file, e.g. for handing to an external
    /// process. Remains readable for diagnostics after release, but the file
    /// itself is gone by then.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the backing file now. Safe to call more than once.
    pub fn release(&mut self) -> Result<()> {
        if let Some(file) = self.inner.take() {
            debug!(path = %self.path.display(), "releasing temp file");
            file.close()?;
        }
        Ok(())
    }
}

fn normalize_suffix(suffix: &str) -> String {
    let trimmed = suffix.trim();
    if trimmed.is_empty() {
        return GENERIC_SUFFIX.to_owned();
    }
    if trimmed.starts_with('.') {
        trimmed.to_owned()
    } else {
        format!(".{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn stage_copies_bytes_verbatim() -> anyhow::Result<()> {
        let store = TempStore::new();
        let payload = b"RIFFxxxxWAVE".to_vec();
        let staged = store.stage("wav", &mut payload.as_slice())?;
        assert_eq!(fs::read(staged.path())?, payload);
        assert!(staged.path().extension().is_some_and(|e| e == "wav"));
        Ok(())
    }

    #[test]
    fn release_is_idempotent_and_deletes() -> anyhow::Result<()> {
        let store = TempStore::new();
        let mut staged = store.stage(".dat", &mut &b"abc"[..])?;
        let path = staged.path().to_path_buf();
        assert!(path.exists());

        staged.release()?;
        assert!(!path.exists());
        staged.release()?;
        Ok(())
    }

    #[test]
    fn drop_deletes_backing_file() -> anyhow::Result<()> {
        let store = TempStore::new();
        let staged = store.stage(GENERIC_SUFFIX, &mut &b"abc"[..])?;
        let path = staged.path().to_path_buf();
        drop(staged);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn empty_suffix_falls_back_to_generic() -> anyhow::Result<()> {
        let store = TempStore::new();
        let staged = store.create("  ")?;
        assert!(staged.path().extension().is_some_and(|e| e == "bin"));
        Ok(())
    }

    #[test]
    fn rooted_store_places_files_under_root() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let store = TempStore::rooted_at(root.path());
        let staged = store.create(".wav")?;
        assert!(staged.path().starts_with(root.path()));
        Ok(())
    }
}
