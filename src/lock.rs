//! Single-instance build lock.
//!
//! Two concurrent runs against the same release base would trample each
//! other's destination and release directories, so the whole run holds an
//! exclusive advisory lock on a file under the release base.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use fs2::FileExt;

const LOCK_FILENAME: &str = ".obsd-builder.lock";

/// Held for the lifetime of the run; released when dropped.
#[derive(Debug)]
pub struct BuildLock {
    _file: File,
    path: PathBuf,
}

impl BuildLock {
    pub fn acquire(release_base: &Path) -> Result<Self> {
        fs::create_dir_all(release_base).with_context(|| {
            format!("creating release base '{}'", release_base.display())
        })?;

        let path = release_base.join(LOCK_FILENAME);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("opening build lock '{}'", path.display()))?;

        if file.try_lock_exclusive().is_err() {
            bail!(
                "another build is already running (lock held on '{}')",
                path.display()
            );
        }
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
