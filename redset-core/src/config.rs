use std::path::PathBuf;

use crate::error::{Error, Result};

/// Immutable configuration for one run. Built once at startup and passed by
/// reference into every component; never mutated while sets are in flight.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// Archive basename; slice and shard filenames derive from it.
    pub basename: String,
    /// Slice file extension as produced by the archive encoder (e.g. "dar").
    pub extension: String,
    /// Staging directory; exclusively owned by this run.
    pub staging_dir: PathBuf,
    /// Capacity of one physical disc, bytes.
    pub disc_size: u64,
    /// Fixed slice size, bytes. The final slice of the stream may be shorter.
    pub slice_size: u64,
    /// Data slices per redundancy set.
    pub set_size: usize,
    /// Parity shards per redundancy set, independent of how many data slices
    /// the final partial set holds.
    pub parity: usize,
    /// Digit width for slice/set numbering; filenames must sort lexically.
    pub digits: usize,
    /// Bytes withheld from packing on each disc for filesystem overhead and
    /// the per-disc documentation files.
    pub reserve: u64,
    pub verbose: bool,
    pub dry_run: bool,
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.basename.is_empty() {
            return Err(Error::config("basename must not be empty"));
        }
        if self.basename.contains(['/', '\\']) || self.basename.contains("..") {
            return Err(Error::config(format!(
                "basename {:?} must be a plain name, not a path",
                self.basename
            )));
        }
        if self.extension.is_empty() || !self.extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::config(format!("bad slice extension {:?}", self.extension)));
        }
        if self.set_size == 0 {
            return Err(Error::config("set-size must be at least 1"));
        }
        if self.parity == 0 {
            return Err(Error::config("parity must be at least 1"));
        }
        // GF(2^8) Reed-Solomon limit on total shards per set.
        if self.set_size + self.parity > 256 {
            return Err(Error::config(format!(
                "set-size {} + parity {} exceeds the 256-shard erasure-coding limit",
                self.set_size, self.parity
            )));
        }
        if !(1..=9).contains(&self.digits) {
            return Err(Error::config(format!("digits must be 1..=9, got {}", self.digits)));
        }
        if self.slice_size == 0 {
            return Err(Error::config("slice-size must be nonzero"));
        }
        if self.slice_size.saturating_add(self.reserve) > self.disc_size {
            return Err(Error::config(format!(
                "slice-size {} + reserve {} does not fit disc-size {}",
                self.slice_size, self.reserve, self.disc_size
            )));
        }
        Ok(())
    }

    /// Free scratch bytes required before a run may begin: worst case one
    /// full set of data slices plus its parity shards, each disc-sized.
    pub fn scratch_free_needed(&self) -> u64 {
        (self.set_size + self.parity) as u64 * self.disc_size
    }

    /// Bytes usable for slice/shard payload on one disc.
    pub fn packing_capacity(&self) -> u64 {
        self.disc_size - self.reserve
    }

    /// Render a 1-based ordinal with the configured digit width.
    pub fn number(&self, n: u64) -> String {
        format!("{:0width$}", n, width = self.digits)
    }
}
