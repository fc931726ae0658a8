use std::collections::HashMap;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use rayon::prelude::*;
use reed_solomon_erasure::galois_8::ReedSolomon;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::manifest::{hash_file, member_root, validate_member_name, SetManifest};
use crate::parity::{read_embedded_manifest, read_shard_payload};

/// Restore-time health of one redundancy set.
#[derive(Debug)]
pub struct SetReport {
    pub set_index: u64,
    pub data_ok: usize,
    pub data_missing: Vec<String>,
    pub data_corrupt: Vec<String>,
    pub shards_ok: usize,
    pub shards_bad: Vec<String>,
    pub parity: usize,
    pub recoverable: bool,
}

impl SetReport {
    pub fn damaged(&self) -> usize {
        self.data_missing.len() + self.data_corrupt.len() + self.shards_bad.len()
    }
}

#[derive(Debug)]
pub struct ReconstructOutcome {
    pub set_index: u64,
    /// Data members rebuilt from parity, in stream order.
    pub rebuilt: Vec<String>,
    pub intact: usize,
}

/// Locate a set's files under `dir` by filename pattern alone; the discs
/// may have been copied into subdirectories, so the whole tree is scanned.
fn locate_files(dir: &Path) -> Result<HashMap<String, PathBuf>> {
    let mut files: HashMap<String, PathBuf> = HashMap::new();
    for ent in WalkDir::new(dir).min_depth(1) {
        let ent = ent.map_err(|e| Error::Integrity {
            path: dir.to_path_buf(),
            detail: format!("scan failed: {e}"),
        })?;
        if !ent.file_type().is_file() {
            continue;
        }
        let name = ent.file_name().to_string_lossy().into_owned();
        files.entry(name).or_insert_with(|| ent.path().to_path_buf());
    }
    Ok(files)
}

fn globset_of(pattern: &str) -> GlobSet {
    let mut b = GlobSetBuilder::new();
    b.add(Glob::new(pattern).expect("static glob"));
    b.build().expect("static glob set")
}

/// Find the set manifest: the JSON file if one survives, otherwise the
/// backup embedded in any readable parity shard.
fn load_manifest(files: &HashMap<String, PathBuf>) -> Result<SetManifest> {
    let manifest_glob = globset_of("*.set.json");
    for (name, path) in files {
        if !manifest_glob.is_match(name) {
            continue;
        }
        if let Ok(bytes) = std::fs::read(path) {
            if let Ok(mf) = SetManifest::from_json(&bytes) {
                return Ok(mf);
            }
        }
    }
    let shard_glob = globset_of("*.p[0-9][0-9].rsp");
    for (name, path) in files {
        if !shard_glob.is_match(name) {
            continue;
        }
        if let Ok(mf) = read_embedded_manifest(path) {
            return Ok(mf);
        }
    }
    Err(Error::Integrity {
        path: PathBuf::new(),
        detail: "no set manifest found, and none recoverable from shards".into(),
    })
}

fn sanity(mf: &SetManifest) -> Result<()> {
    let k = mf.data.len();
    let m = mf.parity;
    if k == 0 || m == 0 || k + m > 256 {
        return Err(Error::Integrity {
            path: PathBuf::new(),
            detail: format!("implausible set geometry: {k} data + {m} parity"),
        });
    }
    if mf.slice_size == 0 || mf.slice_size > (1 << 34) {
        return Err(Error::Integrity {
            path: PathBuf::new(),
            detail: format!("implausible slice size {}", mf.slice_size),
        });
    }
    for entry in mf.data.iter().chain(mf.parity_shards.iter()) {
        validate_member_name(&entry.name)?;
        if entry.bytes > mf.slice_size {
            return Err(Error::Integrity {
                path: PathBuf::from(&entry.name),
                detail: format!("recorded size {} exceeds slice size", entry.bytes),
            });
        }
    }
    // The member root ties the recorded digests together; a manifest whose
    // member list was damaged in place must not steer reconstruction.
    if !mf.member_root_hex.is_empty() {
        let digests: Vec<[u8; 32]> = mf
            .data
            .iter()
            .filter_map(|e| blake3::Hash::from_hex(&e.blake3_hex).ok())
            .map(|h| *h.as_bytes())
            .collect();
        if digests.len() == mf.data.len() {
            let root = blake3::Hash::from(member_root(&digests)).to_hex().to_string();
            if root != mf.member_root_hex {
                return Err(Error::Integrity {
                    path: PathBuf::new(),
                    detail: "member digests do not match the recorded member root".into(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum DataState {
    Ok,
    Missing,
    Corrupt,
}

/// Presence is not enough: a member truncated by an interrupted copy or
/// decayed in place must count as missing for reconstruction purposes.
fn classify_data(mf: &SetManifest, files: &HashMap<String, PathBuf>) -> Result<Vec<DataState>> {
    mf.data
        .par_iter()
        .map(|entry| {
            let Some(path) = files.get(&entry.name) else {
                return Ok(DataState::Missing);
            };
            let md = match std::fs::metadata(path) {
                Ok(md) => md,
                Err(_) => return Ok(DataState::Missing),
            };
            if md.len() != entry.bytes {
                return Ok(DataState::Corrupt);
            }
            let hash = hash_file(path)?;
            if hash.to_hex().to_string() != entry.blake3_hex {
                return Ok(DataState::Corrupt);
            }
            Ok(DataState::Ok)
        })
        .collect()
}

/// Shard payloads self-verify against their header hash; a shard that fails
/// any check is unusable and counts against the parity budget.
fn usable_shard(mf: &SetManifest, path: &Path, expect_index: usize) -> Option<Vec<u8>> {
    let (header, payload) = read_shard_payload(path).ok()?;
    if header.set_index != mf.set_index
        || header.shard_index as usize != expect_index
        || header.data_members as usize != mf.data.len()
        || header.slice_size != mf.slice_size
    {
        return None;
    }
    Some(payload)
}

/// Check a set directory and report which members are missing or corrupt
/// and whether reconstruction can succeed.
pub fn inspect(set_dir: &Path) -> Result<(SetManifest, SetReport)> {
    let files = locate_files(set_dir)?;
    let mf = load_manifest(&files)?;
    sanity(&mf)?;

    let states = classify_data(&mf, &files)?;
    let mut report = SetReport {
        set_index: mf.set_index,
        data_ok: 0,
        data_missing: Vec::new(),
        data_corrupt: Vec::new(),
        shards_ok: 0,
        shards_bad: Vec::new(),
        parity: mf.parity,
        recoverable: false,
    };
    for (entry, state) in mf.data.iter().zip(&states) {
        match state {
            DataState::Ok => report.data_ok += 1,
            DataState::Missing => report.data_missing.push(entry.name.clone()),
            DataState::Corrupt => report.data_corrupt.push(entry.name.clone()),
        }
    }
    for (i, entry) in mf.parity_shards.iter().enumerate() {
        let ok = files
            .get(&entry.name)
            .and_then(|path| usable_shard(&mf, path, i))
            .is_some();
        if ok {
            report.shards_ok += 1;
        } else {
            report.shards_bad.push(entry.name.clone());
        }
    }
    // Any k of the k+m members reconstructs the set.
    report.recoverable = report.data_ok + report.shards_ok >= mf.data.len();
    Ok((mf, report))
}

/// Rebuild a complete data-slice sequence from whatever survives in
/// `set_dir`, writing it under `output`. Succeeds iff missing-or-corrupt
/// members are within the parity budget; never emits a slice that fails
/// its integrity check.
pub fn reconstruct(set_dir: &Path, output: &Path) -> Result<ReconstructOutcome> {
    let files = locate_files(set_dir)?;
    let mf = load_manifest(&files)?;
    sanity(&mf)?;

    let k = mf.data.len();
    let m = mf.parity;
    let states = classify_data(&mf, &files)?;

    let mut shards: Vec<Option<Vec<u8>>> = vec![None; k + m];
    for (i, (entry, state)) in mf.data.iter().zip(&states).enumerate() {
        if *state != DataState::Ok {
            continue;
        }
        let path = &files[&entry.name];
        let mut buf = std::fs::read(path)?;
        buf.resize(mf.slice_size as usize, 0);
        shards[i] = Some(buf);
    }
    for (i, entry) in mf.parity_shards.iter().enumerate() {
        if let Some(path) = files.get(&entry.name) {
            shards[k + i] = usable_shard(&mf, path, i);
        }
    }

    let available = shards.iter().flatten().count();
    if available < k {
        return Err(Error::Unrecoverable {
            set_index: mf.set_index,
            missing: k + m - available,
            parity: m,
        });
    }

    let rebuilt_names: Vec<String> = mf
        .data
        .iter()
        .zip(&states)
        .filter(|(_, s)| **s != DataState::Ok)
        .map(|(e, _)| e.name.clone())
        .collect();

    if !rebuilt_names.is_empty() {
        let rs = ReedSolomon::new(k, m).map_err(|e| Error::Integrity {
            path: set_dir.to_path_buf(),
            detail: format!("codec init: {e:?}"),
        })?;
        rs.reconstruct_data(&mut shards).map_err(|e| Error::Integrity {
            path: set_dir.to_path_buf(),
            detail: format!("reconstruction failed: {e:?}"),
        })?;
    }

    std::fs::create_dir_all(output)?;
    let mut intact = 0usize;
    for (i, (entry, state)) in mf.data.iter().zip(&states).enumerate() {
        validate_member_name(&entry.name)?;
        let dest = output.join(&entry.name);
        if *state == DataState::Ok {
            std::fs::copy(&files[&entry.name], &dest)?;
            intact += 1;
            continue;
        }
        let buf = shards[i].as_ref().expect("reconstructed shard");
        let content = &buf[..entry.bytes as usize];
        // Verify before anything is written: a reconstruction that does not
        // match the manifest digest must never masquerade as a valid slice.
        if blake3::hash(content).to_hex().to_string() != entry.blake3_hex {
            return Err(Error::Integrity {
                path: dest,
                detail: "reconstructed member does not match manifest digest".into(),
            });
        }
        std::fs::write(&dest, content)?;
    }

    Ok(ReconstructOutcome { set_index: mf.set_index, rebuilt: rebuilt_names, intact })
}
