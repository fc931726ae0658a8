use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::{Error, Result};

pub const MANIFEST_FORMAT: u32 = 1;

/// One data slice or parity shard as recorded for restore.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct MemberEntry {
    pub name: String,
    pub bytes: u64,
    /// BLAKE3 of the file content for data members; of the shard payload for
    /// parity members. Empty when unknown (dry-run planning, embedded backup
    /// written before shards exist).
    pub blake3_hex: String,
}

/// Per-set integrity record. Written beside the shards at set closure, copied
/// onto every disc of the set's span, and embedded zstd-compressed in each
/// parity shard so restore can recover it from any surviving member.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SetManifest {
    pub format: u32,
    pub created_utc: String,
    pub basename: String,
    /// 0-based set index.
    pub set_index: u64,
    /// Configured data slots per set; the final set may hold fewer.
    pub set_size: usize,
    /// Parity shard count, fixed regardless of how many data slices the set
    /// actually holds.
    pub parity: usize,
    pub slice_size: u64,
    /// 1-based stream sequence range covered by this set.
    pub first_seq: u64,
    pub last_seq: u64,
    pub data: Vec<MemberEntry>,
    pub parity_shards: Vec<MemberEntry>,
    /// Merkle-style fold over the data members' BLAKE3 digests.
    pub member_root_hex: String,
}

impl SetManifest {
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Integrity {
            path: std::path::PathBuf::from("set manifest"),
            detail: format!("manifest encode: {e}"),
        })
    }

    pub fn from_json(bytes: &[u8]) -> Result<SetManifest> {
        let mf: SetManifest = serde_json::from_slice(bytes).map_err(|e| Error::Integrity {
            path: std::path::PathBuf::from("set manifest"),
            detail: format!("manifest decode: {e}"),
        })?;
        if mf.format != MANIFEST_FORMAT {
            return Err(Error::Integrity {
                path: std::path::PathBuf::from("set manifest"),
                detail: format!("unsupported manifest format {}", mf.format),
            });
        }
        Ok(mf)
    }
}

/// Filename stem shared by a set's manifest and shard files:
/// `{basename}.{first}-{last}` with the configured digit width.
pub fn set_stem(cfg: &RunConfig, first_seq: u64, last_seq: u64) -> String {
    format!("{}.{}-{}", cfg.basename, cfg.number(first_seq), cfg.number(last_seq))
}

pub fn manifest_file_name(cfg: &RunConfig, first_seq: u64, last_seq: u64) -> String {
    format!("{}.set.json", set_stem(cfg, first_seq, last_seq))
}

pub fn shard_file_name(cfg: &RunConfig, first_seq: u64, last_seq: u64, shard_index: usize) -> String {
    format!("{}.p{:02}.rsp", set_stem(cfg, first_seq, last_seq), shard_index)
}

/// Fold member digests pairwise into one root, duplicating the tail of an
/// odd layer.
pub fn member_root(hashes: &[[u8; 32]]) -> [u8; 32] {
    if hashes.is_empty() {
        return *blake3::hash(&[]).as_bytes();
    }
    let mut layer: Vec<[u8; 32]> = hashes.to_vec();
    while layer.len() > 1 {
        let mut next = Vec::with_capacity(layer.len().div_ceil(2));
        let mut i = 0;
        while i < layer.len() {
            let a = layer[i];
            let b = if i + 1 < layer.len() { layer[i + 1] } else { layer[i] };
            let mut cat = [0u8; 64];
            cat[..32].copy_from_slice(&a);
            cat[32..].copy_from_slice(&b);
            next.push(*blake3::hash(&cat).as_bytes());
            i += 2;
        }
        layer = next;
    }
    layer[0]
}

/// BLAKE3 of a file's content, memory-mapped for large slices.
pub fn hash_file(path: &Path) -> Result<blake3::Hash> {
    let f = File::open(path)?;
    let len = f.metadata()?.len();
    if len == 0 {
        return Ok(blake3::hash(&[]));
    }
    let map = unsafe { Mmap::map(&f)? };
    Ok(blake3::hash(&map))
}

/// Member names come off recovered media; refuse anything that is not a
/// plain filename before writing through it.
pub fn validate_member_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains(['/', '\\'])
        || name == "."
        || name == ".."
        || name.contains('\0')
    {
        return Err(Error::Integrity {
            path: std::path::PathBuf::from(name),
            detail: "unsafe member name in set manifest".into(),
        });
    }
    Ok(())
}
