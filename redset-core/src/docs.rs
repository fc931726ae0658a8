use crate::config::RunConfig;

pub const README_NAME: &str = "README.txt";

/// The self-documentation carried on every disc: the exact configuration and
/// invocation of the run, in plain text, so the restore procedure can be
/// reconstructed decades later with no other context.
#[derive(Clone, Debug)]
pub struct RunDoc {
    pub created_utc: String,
    pub invocation: String,
}

impl RunDoc {
    pub fn new(invocation: impl Into<String>) -> Self {
        Self { created_utc: now_utc(), invocation: invocation.into() }
    }

    /// Timestamp injected by the caller; what makes documentation output
    /// reproducible across a dry run and the real run it previews.
    pub fn with_created(created_utc: impl Into<String>, invocation: impl Into<String>) -> Self {
        Self { created_utc: created_utc.into(), invocation: invocation.into() }
    }

    pub fn render(&self, cfg: &RunConfig) -> String {
        format!(
            "\
This disc is part of a backup produced by redset, a tool that groups
fixed-size archive slices into redundancy sets and adds erasure-coded
parity shards, so the backup survives the loss or decay of whole discs.

Created (UTC): {created}
Invocation:
    {invocation}

Run configuration:
    archive basename:        {basename}
    slice extension:         {ext}
    slice size (bytes):      {slice}
    data slices per set:     {set_size}
    parity shards per set:   {parity}
    disc capacity (bytes):   {disc}
    reserved per disc:       {reserve}
    numbering digit width:   {digits}

File naming (lexical order is stream order):
    data slice:   {basename}.NNNN.{ext}           (NNNN = 1-based stream number)
    parity shard: {basename}.FFFF-LLLL.pII.rsp    (FFFF-LLLL = slice range of the set)
    set manifest: {basename}.FFFF-LLLL.set.json

Every set of up to {set_size} data slices carries {parity} parity shards;
any {parity} missing or corrupt members of a set can be rebuilt from the
rest. The final set may hold fewer data slices but still carries {parity}
shards. Each parity shard also embeds a compressed copy of the set
manifest, so the manifest survives as long as any one shard does.

To restore a set:
 1. Copy everything for one slice range (all discs that carry files named
    with that range) into a single directory.
 2. Run: redset restore <that directory> --output <slice directory>
    This verifies every member against the manifest, rebuilds missing or
    corrupt slices from parity, and writes the complete slice sequence.
 3. Feed the slices, in filename order, to the archive decoder named in
    the invocation above.
",
            created = self.created_utc,
            invocation = self.invocation,
            basename = cfg.basename,
            ext = cfg.extension,
            slice = cfg.slice_size,
            set_size = cfg.set_size,
            parity = cfg.parity,
            disc = cfg.disc_size,
            reserve = cfg.reserve,
            digits = cfg.digits,
        )
    }
}

pub fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}
