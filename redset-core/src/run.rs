use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::burn::{BurnRequest, Burner};
use crate::config::RunConfig;
use crate::docs::{RunDoc, README_NAME};
use crate::error::Result;
use crate::parity::ParityGenerator;
use crate::progress::Progress;
use crate::scratch::ScratchSpace;
use crate::sequencer::{DiscBundle, FileKind, Sequencer};
use crate::set::{ClosedSet, SetBuilder};
use crate::slice::{SliceIntake, SliceSource};

/// What a run decided and did. `decisions` is deterministic for a given
/// slice stream and configuration: a dry run and the real run it previews
/// produce identical decisions and documentation, byte for byte.
#[derive(Debug)]
pub struct RunOutcome {
    pub slices: u64,
    pub sets_closed: u64,
    pub discs_burned: u64,
    pub decisions: Vec<String>,
    pub doc: String,
}

/// Drive one backup run: intake → set builder → parity → sequencer → burner.
/// Sequential by design; the encoder is only pulled for a new set's first
/// slice once the scratch gate has passed for that set's worst case.
pub fn execute(
    cfg: &RunConfig,
    doc: &RunDoc,
    source: impl SliceSource,
    generator: &dyn ParityGenerator,
    burner: &mut dyn Burner,
) -> Result<RunOutcome> {
    cfg.validate()?;
    let mut scratch = ScratchSpace::prepare(cfg)?;
    // Gate before the first slice is ever requested from the encoder.
    scratch.ensure_capacity(cfg.scratch_free_needed())?;

    let rendered = doc.render(cfg);
    let progress = Progress::new(cfg.verbose);
    progress.set_stage("slicing");
    progress.start();

    let mut intake = SliceIntake::new(cfg, source);
    let mut builder = SetBuilder::new(cfg);
    let mut sequencer = Sequencer::new(cfg);
    let mut outcome = RunOutcome {
        slices: 0,
        sets_closed: 0,
        discs_burned: 0,
        decisions: Vec::new(),
        doc: rendered.clone(),
    };

    let result = (|| -> Result<()> {
        loop {
            if builder.open_members() == 0 && outcome.slices > 0 {
                // Blocking admission control: no new set while scratch
                // cannot hold a full set plus parity.
                scratch.ensure_capacity(cfg.scratch_free_needed())?;
            }
            let Some(slice) = intake.next_slice()? else { break };
            outcome.slices += 1;
            progress.inc_slices();
            scratch.note_staged(slice.bytes);

            let Some(mut set) = builder.admit(slice)? else { continue };

            progress.set_stage("parity");
            let closed = if cfg.dry_run {
                builder.plan_set(&mut set, scratch.dir(), &doc.created_utc)
            } else {
                builder.close_set(&mut set, generator, scratch.dir(), &doc.created_utc)?
            };
            outcome.sets_closed += 1;
            progress.inc_sets();
            if !cfg.dry_run {
                scratch.note_staged(cfg.slice_size * closed.shards.len() as u64);
            }
            outcome.decisions.push(format!(
                "set {}: slices {}-{} ({} data + {} parity)",
                cfg.number(closed.index + 1),
                cfg.number(closed.manifest.first_seq),
                cfg.number(closed.manifest.last_seq),
                closed.members.len(),
                closed.shards.len(),
            ));

            let bundles = sequencer.sequence(&closed)?;
            progress.set_stage("burning");
            for bundle in &bundles {
                let label = bundle.label(cfg);
                let names: Vec<&str> = bundle.files.iter().map(|f| f.name.as_str()).collect();
                outcome.decisions.push(format!(
                    "disc {:04}{}: label {} [{}] ({} payload bytes)",
                    bundle.disc_index + 1,
                    if bundle.parity_only { " parity-only" } else { "" },
                    label,
                    names.join(" "),
                    bundle.payload_bytes,
                ));
                if !cfg.dry_run {
                    burn_bundle(&mut scratch, &closed, bundle, &label, &rendered, burner)?;
                    outcome.discs_burned += 1;
                    progress.inc_discs();
                }
            }
            if let Some(manifest_path) = &closed.manifest_path {
                // Every disc of the set carries a copy; the staged original
                // is done once the whole set is burned.
                std::fs::remove_file(manifest_path)?;
            }
            progress.set_stage("slicing");
        }
        Ok(())
    })();
    progress.stop();
    result?;

    Ok(outcome)
}

/// Assemble the bundle directory in staging, hand it to the burner, and
/// reclaim the staged bytes once the burn is confirmed.
fn burn_bundle(
    scratch: &mut ScratchSpace,
    closed: &ClosedSet,
    bundle: &DiscBundle,
    label: &str,
    rendered_doc: &str,
    burner: &mut dyn Burner,
) -> Result<()> {
    let mut sources: HashMap<&str, &Path> = HashMap::new();
    for slice in &closed.members {
        sources.insert(
            slice.path.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
            slice.path.as_path(),
        );
    }
    for shard in &closed.shards {
        sources.insert(shard.name.as_str(), shard.path.as_path());
    }

    let dir = scratch.dir().join(bundle.dir_name());
    std::fs::create_dir(&dir)?;
    let mut reclaimable = 0u64;
    for file in &bundle.files {
        let dest = dir.join(&file.name);
        match file.kind {
            FileKind::Doc => {
                if file.name == README_NAME {
                    std::fs::write(&dest, rendered_doc)?;
                } else if let Some(manifest_path) = &closed.manifest_path {
                    std::fs::copy(manifest_path, &dest)?;
                }
            }
            FileKind::Data | FileKind::Parity => {
                let src = sources.get(file.name.as_str()).copied().ok_or_else(|| {
                    crate::Error::Integrity {
                        path: PathBuf::from(&file.name),
                        detail: format!("bundle member not found in set {}", closed.index),
                    }
                })?;
                reclaimable += std::fs::metadata(src)?.len();
                move_file(src, &dest)?;
            }
        }
    }

    let req = BurnRequest { bundle, dir: &dir, label: label.to_string() };
    burner.burn(&req)?;

    // Burn confirmed: the staged copies can go.
    std::fs::remove_dir_all(&dir)?;
    scratch.note_reclaimed(reclaimable);
    Ok(())
}

fn move_file(from: &Path, to: &Path) -> Result<()> {
    if std::fs::rename(from, to).is_ok() {
        return Ok(());
    }
    // Cross-device move: copy then remove.
    std::fs::copy(from, to)?;
    std::fs::remove_file(from)?;
    Ok(())
}
