use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::error::{Error, Result};
use crate::manifest::{
    hash_file, manifest_file_name, member_root, shard_file_name, MemberEntry, SetManifest,
    MANIFEST_FORMAT,
};
use crate::parity::{ParityGenerator, ParityRequest};
use crate::slice::Slice;

/// `Open → Closing → ParityPending → Closed`. A set leaves `ParityPending`
/// only on parity success; a failed parity step keeps it retryable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetState {
    Open,
    Closing,
    ParityPending,
    Closed,
}

#[derive(Debug)]
pub struct RedundancySet {
    pub index: u64,
    pub members: Vec<Slice>,
    pub state: SetState,
}

impl RedundancySet {
    pub fn first_seq(&self) -> u64 {
        self.members.first().map(|s| s.seq).unwrap_or(0)
    }

    pub fn last_seq(&self) -> u64 {
        self.members.last().map(|s| s.seq).unwrap_or(0)
    }

    /// True when this set ends the stream (possibly short of `set_size`).
    pub fn is_final(&self) -> bool {
        self.members.last().map(|s| s.last).unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct ShardFile {
    pub name: String,
    pub path: PathBuf,
    pub payload_hash_hex: String,
}

/// A set that has passed parity generation (or, in dry-run, planning) and is
/// ready for the disc sequencer.
#[derive(Debug)]
pub struct ClosedSet {
    pub index: u64,
    pub members: Vec<Slice>,
    pub shards: Vec<ShardFile>,
    pub manifest: SetManifest,
    pub manifest_name: String,
    /// None in dry-run: nothing was written.
    pub manifest_path: Option<PathBuf>,
}

/// Groups consecutive slices into fixed-size sets and drives each set
/// through its closure protocol. Sets close in strictly increasing index
/// order; the final partial set still receives the full parity count.
pub struct SetBuilder<'a> {
    cfg: &'a RunConfig,
    current: Option<RedundancySet>,
    next_index: u64,
}

impl<'a> SetBuilder<'a> {
    pub fn new(cfg: &'a RunConfig) -> Self {
        Self { cfg, current: None, next_index: 0 }
    }

    /// Slices admitted to the currently open set; 0 means the next admit
    /// opens a new set (the scratch gate checks before that happens).
    pub fn open_members(&self) -> usize {
        self.current.as_ref().map(|s| s.members.len()).unwrap_or(0)
    }

    /// Valid only while the current set is open. Returns the set, moved to
    /// `Closing`, once it holds `set_size` slices or the stream ended.
    pub fn admit(&mut self, slice: Slice) -> Result<Option<RedundancySet>> {
        let set = self.current.get_or_insert_with(|| RedundancySet {
            index: self.next_index,
            members: Vec::new(),
            state: SetState::Open,
        });
        if slice.set_index != set.index {
            return Err(Error::protocol(format!(
                "slice {} carries set index {}, current open set is {}",
                slice.seq, slice.set_index, set.index
            )));
        }
        if slice.slice_index as usize != set.members.len() {
            return Err(Error::protocol(format!(
                "slice {} fills slot {}, expected slot {}",
                slice.seq,
                slice.slice_index,
                set.members.len()
            )));
        }
        let closes = slice.last;
        set.members.push(slice);
        if set.members.len() == self.cfg.set_size || closes {
            let mut done = self.current.take().expect("open set");
            done.state = SetState::Closing;
            self.next_index += 1;
            return Ok(Some(done));
        }
        Ok(None)
    }

    /// Run the closure protocol: hash members, invoke the parity generator,
    /// write the set manifest. Re-invoking after a parity failure is
    /// idempotent: stale shards for this set are removed first and data
    /// members are never touched.
    pub fn close_set(
        &self,
        set: &mut RedundancySet,
        generator: &dyn ParityGenerator,
        staging: &Path,
        created_utc: &str,
    ) -> Result<ClosedSet> {
        debug_assert!(matches!(set.state, SetState::Closing | SetState::ParityPending));
        let (first, last) = (set.first_seq(), set.last_seq());
        let shard_names: Vec<String> =
            (0..self.cfg.parity).map(|i| shard_file_name(self.cfg, first, last, i)).collect();
        let manifest_name = manifest_file_name(self.cfg, first, last);

        let mut data_entries = Vec::with_capacity(set.members.len());
        let mut digests = Vec::with_capacity(set.members.len());
        for slice in &set.members {
            let hash = hash_file(&slice.path)?;
            digests.push(*hash.as_bytes());
            data_entries.push(MemberEntry {
                name: slice.file_name(),
                bytes: slice.bytes,
                blake3_hex: hash.to_hex().to_string(),
            });
        }
        let mut mf = self.manifest_skeleton(set, created_utc, data_entries, &shard_names);
        mf.member_root_hex = hex32(&member_root(&digests));

        set.state = SetState::ParityPending;

        // Idempotent retry: clear any stale outputs from a failed attempt.
        for name in shard_names.iter().chain(std::iter::once(&manifest_name)) {
            let p = staging.join(name);
            if p.exists() {
                std::fs::remove_file(&p)?;
            }
        }

        let member_paths: Vec<PathBuf> = set.members.iter().map(|s| s.path.clone()).collect();
        let manifest_json = mf.to_json()?;
        let outcomes = generator.generate(&ParityRequest {
            set_index: set.index,
            members: &member_paths,
            shard_names: &shard_names,
            out_dir: staging,
            slice_size: self.cfg.slice_size,
            manifest_json: &manifest_json,
        })?;

        let mut shards = Vec::with_capacity(outcomes.len());
        for (entry, outcome) in mf.parity_shards.iter_mut().zip(&outcomes) {
            entry.blake3_hex = outcome.payload_hash_hex.clone();
            shards.push(ShardFile {
                name: outcome.name.clone(),
                path: outcome.path.clone(),
                payload_hash_hex: outcome.payload_hash_hex.clone(),
            });
        }
        let manifest_path = staging.join(&manifest_name);
        std::fs::write(&manifest_path, mf.to_json()?)?;

        set.state = SetState::Closed;
        Ok(ClosedSet {
            index: set.index,
            members: std::mem::take(&mut set.members),
            shards,
            manifest: mf,
            manifest_name,
            manifest_path: Some(manifest_path),
        })
    }

    /// Dry-run closure: the same names, sizes, and boundaries as a real
    /// closure, with no hashing, no parity invocation, no writes.
    pub fn plan_set(
        &self,
        set: &mut RedundancySet,
        staging: &Path,
        created_utc: &str,
    ) -> ClosedSet {
        debug_assert!(matches!(set.state, SetState::Closing));
        let (first, last) = (set.first_seq(), set.last_seq());
        let shard_names: Vec<String> =
            (0..self.cfg.parity).map(|i| shard_file_name(self.cfg, first, last, i)).collect();
        let manifest_name = manifest_file_name(self.cfg, first, last);
        let data_entries = set
            .members
            .iter()
            .map(|s| MemberEntry { name: s.file_name(), bytes: s.bytes, blake3_hex: String::new() })
            .collect();
        let mf = self.manifest_skeleton(set, created_utc, data_entries, &shard_names);
        let shards = shard_names
            .iter()
            .map(|name| ShardFile {
                name: name.clone(),
                path: staging.join(name),
                payload_hash_hex: String::new(),
            })
            .collect();
        set.state = SetState::Closed;
        ClosedSet {
            index: set.index,
            members: std::mem::take(&mut set.members),
            shards,
            manifest: mf,
            manifest_name,
            manifest_path: None,
        }
    }

    fn manifest_skeleton(
        &self,
        set: &RedundancySet,
        created_utc: &str,
        data: Vec<MemberEntry>,
        shard_names: &[String],
    ) -> SetManifest {
        SetManifest {
            format: MANIFEST_FORMAT,
            created_utc: created_utc.to_string(),
            basename: self.cfg.basename.clone(),
            set_index: set.index,
            set_size: self.cfg.set_size,
            parity: self.cfg.parity,
            slice_size: self.cfg.slice_size,
            first_seq: set.first_seq(),
            last_seq: set.last_seq(),
            data,
            parity_shards: shard_names
                .iter()
                .map(|name| MemberEntry {
                    name: name.clone(),
                    bytes: self.cfg.slice_size,
                    blake3_hex: String::new(),
                })
                .collect(),
            member_root_hex: String::new(),
        }
    }
}

fn hex32(bytes: &[u8; 32]) -> String {
    blake3::Hash::from(*bytes).to_hex().to_string()
}
