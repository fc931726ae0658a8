use crate::config::RunConfig;
use crate::docs::README_NAME;
use crate::error::{Error, Result};
use crate::set::ClosedSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Data,
    Parity,
    Doc,
}

#[derive(Clone, Debug)]
pub struct BundleFile {
    pub name: String,
    /// Nominal accounting (slice size) for data and parity; 0 for the
    /// documentation files, which live inside the per-disc reserve.
    pub bytes: u64,
    pub kind: FileKind,
}

/// The file assignment for one physical disc.
#[derive(Clone, Debug)]
pub struct DiscBundle {
    /// 0-based, monotonic across the whole run.
    pub disc_index: u64,
    pub set_index: u64,
    /// 0-based position within the set's contiguous run of discs.
    pub position_in_set: u32,
    pub files: Vec<BundleFile>,
    /// Sum of nominal data + parity bytes. Invariant: ≤ packing capacity.
    pub payload_bytes: u64,
    pub parity_only: bool,
}

impl DiscBundle {
    /// ISO 9660 volume id, max 32 chars: `{basename}-{set}-{disc}`, both
    /// ordinals 1-based. Mirrors the numbering burned into filenames.
    pub fn label(&self, cfg: &RunConfig) -> String {
        let keep = 32usize.saturating_sub(cfg.digits + 3 + 2);
        let base: String = cfg.basename.chars().take(keep).collect();
        format!(
            "{}-{:0w$}-{:03}",
            base,
            self.set_index + 1,
            self.position_in_set + 1,
            w = cfg.digits
        )
    }

    /// Staging subdirectory this bundle is assembled in before burning.
    pub fn dir_name(&self) -> String {
        format!("__disc{:04}", self.disc_index + 1)
    }
}

/// Packs each closed set's members into disc bundles. Discs are never
/// shared between sets; a set occupies a contiguous ascending run of disc
/// indices, and a slice is never split across bundles.
pub struct Sequencer<'a> {
    cfg: &'a RunConfig,
    next_disc: u64,
}

impl<'a> Sequencer<'a> {
    pub fn new(cfg: &'a RunConfig) -> Self {
        Self { cfg, next_disc: 0 }
    }

    pub fn sequence(&mut self, set: &ClosedSet) -> Result<Vec<DiscBundle>> {
        if set.members.is_empty() {
            return Err(Error::protocol(format!("set {} has no data members", set.index)));
        }
        let capacity = self.cfg.packing_capacity();
        let nominal = self.cfg.slice_size;

        let mut bundles: Vec<DiscBundle> = Vec::new();
        let mut open: Vec<BundleFile> = Vec::new();
        let mut open_bytes = 0u64;
        let mut position = 0u32;

        for slice in &set.members {
            if open_bytes + nominal > capacity && !open.is_empty() {
                self.flush(&mut bundles, set, &mut open, &mut open_bytes, &mut position, false);
            }
            open.push(BundleFile { name: slice.file_name(), bytes: nominal, kind: FileKind::Data });
            open_bytes += nominal;
        }

        // Parity placement: alongside the set's data when the whole shard
        // group fits in the tail disc, otherwise on dedicated parity discs.
        let parity_bytes = nominal * set.shards.len() as u64;
        if open_bytes + parity_bytes <= capacity {
            for shard in &set.shards {
                open.push(BundleFile {
                    name: shard.name.clone(),
                    bytes: nominal,
                    kind: FileKind::Parity,
                });
                open_bytes += nominal;
            }
            self.flush(&mut bundles, set, &mut open, &mut open_bytes, &mut position, false);
        } else {
            self.flush(&mut bundles, set, &mut open, &mut open_bytes, &mut position, false);
            for shard in &set.shards {
                if open_bytes + nominal > capacity && !open.is_empty() {
                    self.flush(&mut bundles, set, &mut open, &mut open_bytes, &mut position, true);
                }
                open.push(BundleFile {
                    name: shard.name.clone(),
                    bytes: nominal,
                    kind: FileKind::Parity,
                });
                open_bytes += nominal;
            }
            self.flush(&mut bundles, set, &mut open, &mut open_bytes, &mut position, true);
        }

        Ok(bundles)
    }

    fn flush(
        &mut self,
        bundles: &mut Vec<DiscBundle>,
        set: &ClosedSet,
        open: &mut Vec<BundleFile>,
        open_bytes: &mut u64,
        position: &mut u32,
        parity_only: bool,
    ) {
        if open.is_empty() {
            return;
        }
        let mut files = std::mem::take(open);
        // Self-documentation rides on every disc of the set's span.
        files.push(BundleFile { name: README_NAME.into(), bytes: 0, kind: FileKind::Doc });
        files.push(BundleFile { name: set.manifest_name.clone(), bytes: 0, kind: FileKind::Doc });
        bundles.push(DiscBundle {
            disc_index: self.next_disc,
            set_index: set.index,
            position_in_set: *position,
            files,
            payload_bytes: *open_bytes,
            parity_only,
        });
        self.next_disc += 1;
        *position += 1;
        *open_bytes = 0;
    }
}
