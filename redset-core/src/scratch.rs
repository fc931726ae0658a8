use std::fs::File;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::config::RunConfig;
use crate::error::{Error, Result};

const LOCK_FILE: &str = ".redset.lock";

/// Owns the staging directory for the duration of one run: verifies free
/// space before anything is produced, holds an exclusive lock so a second
/// concurrent run is rejected at startup instead of raced, and keeps a
/// ledger of bytes currently staged.
#[derive(Debug)]
pub struct ScratchSpace {
    dir: PathBuf,
    staged_bytes: u64,
    dry_run: bool,
    _lock: Option<File>,
}

impl ScratchSpace {
    /// Create (or refuse) the staging directory and take the run lock.
    /// A pre-existing non-empty directory is fatal: residue from an aborted
    /// run would corrupt set boundaries.
    pub fn prepare(cfg: &RunConfig) -> Result<Self> {
        let dir = cfg.staging_dir.clone();
        if cfg.dry_run {
            return Ok(Self { dir, staged_bytes: 0, dry_run: true, _lock: None });
        }
        match std::fs::metadata(&dir) {
            Ok(md) => {
                if !md.is_dir() {
                    return Err(Error::StagingConflict { dir });
                }
                if std::fs::read_dir(&dir)?.next().is_some() {
                    return Err(Error::StagingConflict { dir });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                std::fs::create_dir_all(&dir)?;
            }
            Err(e) => return Err(Error::Io(e)),
        }
        let lock = File::create(dir.join(LOCK_FILE))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(Error::StagingConflict { dir });
        }
        Ok(Self { dir, staged_bytes: 0, dry_run: false, _lock: Some(lock) })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Free-space gate. Must pass before any slice is requested from the
    /// encoder, and again before each new set opens: space is consumed
    /// incrementally and only reclaimed once a bundle is confirmed burned.
    pub fn ensure_capacity(&self, required: u64) -> Result<()> {
        let have = available_space(&self.dir)?;
        if have < required {
            return Err(Error::InsufficientSpace {
                dir: self.dir.clone(),
                have,
                need: required,
            });
        }
        Ok(())
    }

    pub fn note_staged(&mut self, bytes: u64) {
        self.staged_bytes += bytes;
    }

    /// Bundle confirmed burned: its bytes are no longer on our account.
    pub fn note_reclaimed(&mut self, bytes: u64) {
        self.staged_bytes = self.staged_bytes.saturating_sub(bytes);
    }

    pub fn staged_bytes(&self) -> u64 {
        self.staged_bytes
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }
}

impl Drop for ScratchSpace {
    fn drop(&mut self) {
        if !self.dry_run {
            let _ = std::fs::remove_file(self.dir.join(LOCK_FILE));
        }
    }
}

/// Filesystem free space for `dir`, probing the nearest existing ancestor
/// so a dry run can gate without creating the directory.
fn available_space(dir: &Path) -> Result<u64> {
    let mut probe = dir;
    loop {
        let candidate = if probe.as_os_str().is_empty() { Path::new(".") } else { probe };
        if candidate.exists() {
            return fs2::available_space(candidate).map_err(Error::Io);
        }
        match probe.parent() {
            Some(p) if p != probe => probe = p,
            _ => {
                return Err(Error::config(format!(
                    "staging directory {} has no existing ancestor to measure",
                    dir.display()
                )))
            }
        }
    }
}
