use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use reed_solomon_erasure::galois_8::ReedSolomon;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::SetManifest;

/// Shard file layout:
/// `RSETSHD1` | header_len u32 | bincode header | payload (slice_size bytes)
/// | zstd(set manifest JSON) | mb_len u32 | mb_crc u32 | `RSETEND\0`.
/// The embedded manifest lets restore recover the set's integrity record
/// from any surviving shard.
const SHARD_MAGIC: &[u8] = b"RSETSHD1"; // 8 bytes
const END_MAGIC: &[u8] = b"RSETEND\0"; // 8 bytes
const FOOTER_LEN: u64 = 4 + 4 + 8; // mb_len + mb_crc + end magic

/// Streamed encode block; bounds memory at (k + m) * ENCODE_BLOCK.
const ENCODE_BLOCK: usize = 1 << 20;

/// Cap on the embedded manifest backup when reading untrusted media.
const MAX_MANIFEST_BACKUP: usize = 32 * 1024 * 1024;

#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct ShardHeader {
    pub set_index: u64,
    pub shard_index: u16,
    pub data_members: u16,
    pub parity_count: u16,
    /// Payload length; data members are zero-padded to this size for coding.
    pub slice_size: u64,
    pub payload_hash: [u8; 32],
}

/// One parity-generation request for a single closed set.
pub struct ParityRequest<'a> {
    pub set_index: u64,
    pub members: &'a [PathBuf],
    pub shard_names: &'a [String],
    pub out_dir: &'a Path,
    pub slice_size: u64,
    pub manifest_json: &'a [u8],
}

#[derive(Clone, Debug)]
pub struct ShardOutcome {
    pub name: String,
    pub path: PathBuf,
    pub payload_hash_hex: String,
}

/// The parity step behind a seam: the run only sees a typed result, so a
/// failed generator surfaces as `ExternalTool` with the exact invocation
/// and the set index needed for a targeted retry.
pub trait ParityGenerator {
    fn name(&self) -> &str;
    fn generate(&self, req: &ParityRequest<'_>) -> Result<Vec<ShardOutcome>>;
}

/// Built-in Reed-Solomon generator. Shards are written to temporary names
/// and renamed only once the whole shard set is complete; a failure never
/// leaves a partial shard set on disk without an explicit error.
pub struct RsParityGenerator;

impl ParityGenerator for RsParityGenerator {
    fn name(&self) -> &str {
        "reed-solomon"
    }

    fn generate(&self, req: &ParityRequest<'_>) -> Result<Vec<ShardOutcome>> {
        let command = render_command(req);
        let tmp_paths: Vec<PathBuf> = req
            .shard_names
            .iter()
            .map(|n| req.out_dir.join(format!("{n}.tmp")))
            .collect();
        let result = encode_set(req, &tmp_paths);
        if result.is_err() {
            for p in &tmp_paths {
                let _ = std::fs::remove_file(p);
            }
        }
        result.map_err(|e| match e {
            Error::ExternalTool { .. } => e,
            other => Error::ExternalTool {
                tool: "parity generator".into(),
                command: command.clone(),
                set_index: Some(req.set_index),
                detail: other.to_string(),
            },
        })
    }
}

fn render_command(req: &ParityRequest<'_>) -> String {
    let members: Vec<String> =
        req.members.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    format!(
        "rs-parity --set {} --shards {} --slice-size {} --out {} {}",
        req.set_index,
        req.shard_names.len(),
        req.slice_size,
        req.out_dir.display(),
        members.join(" ")
    )
}

fn encode_set(req: &ParityRequest<'_>, tmp_paths: &[PathBuf]) -> Result<Vec<ShardOutcome>> {
    let k = req.members.len();
    let m = req.shard_names.len();
    if k == 0 {
        return Err(Error::protocol("no data members to generate parity over"));
    }

    // All inputs must be accessible before any shard is started.
    let mut maps: Vec<(u64, Option<Mmap>)> = Vec::with_capacity(k);
    for path in req.members {
        let f = File::open(path).map_err(|e| Error::ExternalTool {
            tool: "parity generator".into(),
            command: render_command(req),
            set_index: Some(req.set_index),
            detail: format!("input {} inaccessible: {e}", path.display()),
        })?;
        let len = f.metadata()?.len();
        if len > req.slice_size {
            return Err(Error::ExternalTool {
                tool: "parity generator".into(),
                command: render_command(req),
                set_index: Some(req.set_index),
                detail: format!(
                    "input {} is {} bytes, larger than slice size {}",
                    path.display(),
                    len,
                    req.slice_size
                ),
            });
        }
        let map = if len == 0 { None } else { Some(unsafe { Mmap::map(&f)? }) };
        maps.push((len, map));
    }

    let rs = ReedSolomon::new(k, m).map_err(|e| Error::ExternalTool {
        tool: "parity generator".into(),
        command: render_command(req),
        set_index: Some(req.set_index),
        detail: format!("codec init: {e:?}"),
    })?;

    // Placeholder headers first; payload hashes are patched in afterwards.
    let mut files: Vec<File> = Vec::with_capacity(m);
    let mut header_lens: Vec<usize> = Vec::with_capacity(m);
    for (i, tmp) in tmp_paths.iter().enumerate() {
        let header = ShardHeader {
            set_index: req.set_index,
            shard_index: i as u16,
            data_members: k as u16,
            parity_count: m as u16,
            slice_size: req.slice_size,
            payload_hash: [0u8; 32],
        };
        let hdr = bincode::serialize(&header).map_err(|e| Error::Integrity {
            path: tmp.clone(),
            detail: format!("shard header encode: {e}"),
        })?;
        let mut f = OpenOptions::new().create(true).write(true).truncate(true).open(tmp)?;
        f.write_all(SHARD_MAGIC)?;
        f.write_all(&(hdr.len() as u32).to_le_bytes())?;
        f.write_all(&hdr)?;
        header_lens.push(hdr.len());
        files.push(f);
    }

    // Stream the stripe in blocks so memory stays bounded for large slices.
    let mut hashers: Vec<blake3::Hasher> = (0..m).map(|_| blake3::Hasher::new()).collect();
    let blocks = req.slice_size.div_ceil(ENCODE_BLOCK as u64);
    for b in 0..blocks {
        let off = b * ENCODE_BLOCK as u64;
        let blk = std::cmp::min(ENCODE_BLOCK as u64, req.slice_size - off) as usize;
        let mut data_bufs: Vec<Vec<u8>> = Vec::with_capacity(k);
        for (len, map) in &maps {
            let mut buf = vec![0u8; blk];
            if let Some(map) = map {
                if off < *len {
                    let end = std::cmp::min(*len, off + blk as u64) as usize;
                    buf[..end - off as usize].copy_from_slice(&map[off as usize..end]);
                }
            }
            data_bufs.push(buf);
        }
        let mut parity_bufs: Vec<Vec<u8>> = (0..m).map(|_| vec![0u8; blk]).collect();
        {
            let mut shards: Vec<&mut [u8]> = Vec::with_capacity(k + m);
            for buf in &mut data_bufs {
                shards.push(buf.as_mut_slice());
            }
            for buf in &mut parity_bufs {
                shards.push(buf.as_mut_slice());
            }
            rs.encode(&mut shards[..]).map_err(|e| Error::ExternalTool {
                tool: "parity generator".into(),
                command: render_command(req),
                set_index: Some(req.set_index),
                detail: format!("encode block {b}: {e:?}"),
            })?;
        }
        for (i, buf) in parity_bufs.iter().enumerate() {
            files[i].write_all(buf)?;
            hashers[i].update(buf);
        }
    }

    // Patch headers with real payload hashes, then append the manifest
    // backup and footer.
    let compressed = zstd::encode_all(std::io::Cursor::new(req.manifest_json), 3)?;
    let mut crc = Crc32::new();
    crc.update(&compressed);
    let mb_crc = crc.finalize();
    let mut outcomes = Vec::with_capacity(m);
    for (i, f) in files.iter_mut().enumerate() {
        let hash = hashers[i].finalize();
        let header = ShardHeader {
            set_index: req.set_index,
            shard_index: i as u16,
            data_members: k as u16,
            parity_count: m as u16,
            slice_size: req.slice_size,
            payload_hash: *hash.as_bytes(),
        };
        let hdr = bincode::serialize(&header).map_err(|e| Error::Integrity {
            path: tmp_paths[i].clone(),
            detail: format!("shard header encode: {e}"),
        })?;
        if hdr.len() != header_lens[i] {
            return Err(Error::Integrity {
                path: tmp_paths[i].clone(),
                detail: "shard header size changed between passes".into(),
            });
        }
        f.seek(SeekFrom::Start((SHARD_MAGIC.len() + 4) as u64))?;
        f.write_all(&hdr)?;
        f.seek(SeekFrom::End(0))?;
        f.write_all(&compressed)?;
        f.write_all(&(compressed.len() as u32).to_le_bytes())?;
        f.write_all(&mb_crc.to_le_bytes())?;
        f.write_all(END_MAGIC)?;
        f.sync_all()?;
        outcomes.push(ShardOutcome {
            name: req.shard_names[i].clone(),
            path: req.out_dir.join(&req.shard_names[i]),
            payload_hash_hex: hash.to_hex().to_string(),
        });
    }
    drop(files);

    // Rename only after every shard is complete, so a crash mid-generation
    // leaves no final-named partial shards behind.
    for (tmp, outcome) in tmp_paths.iter().zip(&outcomes) {
        std::fs::rename(tmp, &outcome.path)?;
    }
    Ok(outcomes)
}

/// Upper bound accepted from shard headers on untrusted media.
const MAX_SLICE_SIZE: u64 = 1 << 34;

/// Read magic + header, leaving the cursor at the first payload byte.
fn read_header_from(f: &mut File, path: &Path) -> Result<ShardHeader> {
    let mut magic = [0u8; 8];
    f.read_exact(&mut magic).map_err(|e| bad_shard(path, format!("short magic: {e}")))?;
    if magic != SHARD_MAGIC {
        return Err(bad_shard(path, "bad shard magic".into()));
    }
    let mut len4 = [0u8; 4];
    f.read_exact(&mut len4).map_err(|e| bad_shard(path, format!("short header length: {e}")))?;
    let hdr_len = u32::from_le_bytes(len4) as usize;
    if hdr_len == 0 || hdr_len > 4096 {
        return Err(bad_shard(path, format!("implausible header length {hdr_len}")));
    }
    let mut hdr = vec![0u8; hdr_len];
    f.read_exact(&mut hdr).map_err(|e| bad_shard(path, format!("short header: {e}")))?;
    let header: ShardHeader =
        bincode::deserialize(&hdr).map_err(|e| bad_shard(path, format!("header decode: {e}")))?;
    // Guard allocations against a corrupt size field before any payload read.
    if header.slice_size == 0 || header.slice_size > MAX_SLICE_SIZE {
        return Err(bad_shard(path, format!("implausible slice size {}", header.slice_size)));
    }
    Ok(header)
}

pub fn read_shard_header(path: &Path) -> Result<ShardHeader> {
    let mut f = File::open(path)?;
    read_header_from(&mut f, path)
}

/// Read and hash-verify a shard payload. A mismatch means the shard is
/// corrupt and must count as a missing member for reconstruction.
pub fn read_shard_payload(path: &Path) -> Result<(ShardHeader, Vec<u8>)> {
    let mut f = File::open(path)?;
    let header = read_header_from(&mut f, path)?;
    let mut payload = vec![0u8; header.slice_size as usize];
    f.read_exact(&mut payload).map_err(|e| bad_shard(path, format!("short payload: {e}")))?;
    let hash = blake3::hash(&payload);
    if *hash.as_bytes() != header.payload_hash {
        return Err(bad_shard(path, "payload hash mismatch".into()));
    }
    Ok((header, payload))
}

/// Recover the set manifest embedded in a shard's footer.
pub fn read_embedded_manifest(path: &Path) -> Result<SetManifest> {
    let mut f = File::open(path)?;
    let flen = f.metadata()?.len();
    if flen < FOOTER_LEN {
        return Err(bad_shard(path, "too short for footer".into()));
    }
    f.seek(SeekFrom::Start(flen - FOOTER_LEN))?;
    let mut footer = [0u8; FOOTER_LEN as usize];
    f.read_exact(&mut footer)?;
    if &footer[8..16] != END_MAGIC {
        return Err(bad_shard(path, "bad end magic".into()));
    }
    let mb_len = u32::from_le_bytes(footer[0..4].try_into().unwrap()) as u64;
    let mb_crc = u32::from_le_bytes(footer[4..8].try_into().unwrap());
    if mb_len == 0 || mb_len + FOOTER_LEN > flen {
        return Err(bad_shard(path, format!("implausible manifest backup length {mb_len}")));
    }
    f.seek(SeekFrom::Start(flen - FOOTER_LEN - mb_len))?;
    let mut compressed = vec![0u8; mb_len as usize];
    f.read_exact(&mut compressed)?;
    let mut crc = Crc32::new();
    crc.update(&compressed);
    if crc.finalize() != mb_crc {
        return Err(bad_shard(path, "manifest backup CRC mismatch".into()));
    }
    let json = zstd::decode_all(std::io::Cursor::new(compressed))
        .map_err(|e| bad_shard(path, format!("manifest backup decompress: {e}")))?;
    if json.len() > MAX_MANIFEST_BACKUP {
        return Err(bad_shard(path, "manifest backup too large".into()));
    }
    SetManifest::from_json(&json)
}

fn bad_shard(path: &Path, detail: String) -> Error {
    Error::Integrity { path: path.to_path_buf(), detail }
}
