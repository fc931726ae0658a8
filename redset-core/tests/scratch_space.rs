use std::path::PathBuf;

use redset_core::config::RunConfig;
use redset_core::error::Error;
use redset_core::scratch::ScratchSpace;
use redset_core::slice::{SliceEvent, SliceSource};

fn cfg_at(staging: PathBuf) -> RunConfig {
    RunConfig {
        basename: "thing".into(),
        extension: "dar".into(),
        staging_dir: staging,
        disc_size: 650 << 10,
        slice_size: 64 << 10,
        set_size: 4,
        parity: 1,
        digits: 4,
        reserve: 10 << 10,
        verbose: false,
        dry_run: false,
    }
}

#[test]
fn creates_missing_staging_directory() {
    let td = tempfile::tempdir().unwrap();
    let staging = td.path().join("scratch");
    let cfg = cfg_at(staging.clone());
    let scratch = ScratchSpace::prepare(&cfg).unwrap();
    assert!(staging.is_dir());
    assert_eq!(scratch.staged_bytes(), 0);
}

#[test]
fn nonempty_staging_is_a_conflict() {
    let td = tempfile::tempdir().unwrap();
    let staging = td.path().join("scratch");
    std::fs::create_dir(&staging).unwrap();
    std::fs::write(staging.join("leftover.dar"), b"stale").unwrap();
    let cfg = cfg_at(staging);
    let err = ScratchSpace::prepare(&cfg).unwrap_err();
    assert!(matches!(err, Error::StagingConflict { .. }), "{err}");
}

#[test]
fn second_concurrent_run_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let staging = td.path().join("scratch");
    let cfg = cfg_at(staging);
    let _first = ScratchSpace::prepare(&cfg).unwrap();
    // The staging directory now belongs to the first run.
    let err = ScratchSpace::prepare(&cfg).unwrap_err();
    assert!(matches!(err, Error::StagingConflict { .. }), "{err}");
}

#[test]
fn capacity_gate_reports_have_and_need() {
    let td = tempfile::tempdir().unwrap();
    let cfg = cfg_at(td.path().join("scratch"));
    let scratch = ScratchSpace::prepare(&cfg).unwrap();
    scratch.ensure_capacity(1).unwrap();
    let err = scratch.ensure_capacity(u64::MAX / 2).unwrap_err();
    match err {
        Error::InsufficientSpace { have, need, .. } => {
            assert_eq!(need, u64::MAX / 2);
            assert!(have < need);
        }
        other => panic!("expected InsufficientSpace, got {other}"),
    }
}

/// A source that must never be pulled: the free-space gate fails first.
struct UntouchableSource;

impl SliceSource for UntouchableSource {
    fn next_event(&mut self) -> redset_core::Result<Option<SliceEvent>> {
        panic!("encoder was asked for a slice although the scratch gate failed");
    }
}

struct UnusedBurner;

impl redset_core::burn::Burner for UnusedBurner {
    fn name(&self) -> &str {
        "unused"
    }
    fn burn(&mut self, _req: &redset_core::burn::BurnRequest<'_>) -> redset_core::Result<()> {
        panic!("burner invoked");
    }
}

#[test]
fn run_fails_before_any_slice_when_space_is_short() {
    let td = tempfile::tempdir().unwrap();
    let mut cfg = cfg_at(td.path().join("scratch"));
    // (set_size + parity) * disc_size is far beyond any real filesystem.
    cfg.disc_size = 1 << 60;
    cfg.slice_size = 64 << 10;
    let doc = redset_core::docs::RunDoc::with_created("t0", "redset backup");
    let err = redset_core::run::execute(
        &cfg,
        &doc,
        UntouchableSource,
        &redset_core::parity::RsParityGenerator,
        &mut UnusedBurner,
    )
    .unwrap_err();
    assert!(matches!(err, Error::InsufficientSpace { .. }), "{err}");
    assert_eq!(err.exit_code(), 2);
}
