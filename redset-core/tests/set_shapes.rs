use proptest::prelude::*;
use std::path::{Path, PathBuf};

use redset_core::config::RunConfig;
use redset_core::set::{ClosedSet, SetBuilder, SetState};
use redset_core::slice::Slice;

fn test_cfg(set_size: usize, parity: usize) -> RunConfig {
    RunConfig {
        basename: "thing".into(),
        extension: "dar".into(),
        staging_dir: PathBuf::from("scratch"),
        disc_size: 650 << 10,
        slice_size: 64 << 10,
        set_size,
        parity,
        digits: 4,
        reserve: 10 << 10,
        verbose: false,
        dry_run: true,
    }
}

fn make_slice(cfg: &RunConfig, seq: u64, total: u64) -> Slice {
    Slice {
        path: PathBuf::from(format!("thing.{:04}.dar", seq)),
        seq,
        set_index: (seq - 1) / cfg.set_size as u64,
        slice_index: ((seq - 1) % cfg.set_size as u64) as u32,
        bytes: cfg.slice_size,
        last: seq == total,
    }
}

fn plan_stream(cfg: &RunConfig, total: u64) -> Vec<ClosedSet> {
    let mut builder = SetBuilder::new(cfg);
    let mut closed = Vec::new();
    for seq in 1..=total {
        if let Some(mut set) = builder.admit(make_slice(cfg, seq, total)).unwrap() {
            assert_eq!(set.state, SetState::Closing);
            closed.push(builder.plan_set(&mut set, Path::new("scratch"), "t0"));
        }
    }
    assert_eq!(builder.open_members(), 0, "stream end must close the final set");
    closed
}

proptest! {
    #[test]
    fn set_count_and_shapes(total in 1u64..200, set_size in 1usize..8, parity in 1usize..4) {
        let cfg = test_cfg(set_size, parity);
        let closed = plan_stream(&cfg, total);

        let expected_sets = (total as usize).div_ceil(set_size);
        prop_assert_eq!(closed.len(), expected_sets);

        for (i, set) in closed.iter().enumerate() {
            prop_assert_eq!(set.index, i as u64);
            // Every set, including a partial final one, carries the full
            // configured parity count.
            prop_assert_eq!(set.shards.len(), parity);
            if i + 1 < closed.len() {
                prop_assert_eq!(set.members.len(), set_size);
            } else {
                prop_assert!(set.members.len() <= set_size);
                prop_assert!(!set.members.is_empty());
            }
        }

        let spanned: usize = closed.iter().map(|s| s.members.len()).sum();
        prop_assert_eq!(spanned as u64, total);
    }
}

#[test]
fn partial_final_set_keeps_full_parity() {
    let cfg = test_cfg(4, 2);
    let closed = plan_stream(&cfg, 10);
    assert_eq!(closed.len(), 3);
    let last = closed.last().unwrap();
    assert_eq!(last.members.len(), 2);
    assert_eq!(last.shards.len(), 2);
    assert_eq!(last.manifest.first_seq, 9);
    assert_eq!(last.manifest.last_seq, 10);
}

#[test]
fn shard_and_manifest_names_sort_lexically_after_their_slices() {
    let cfg = test_cfg(4, 1);
    let closed = plan_stream(&cfg, 8);
    let first = &closed[0];
    assert_eq!(first.shards[0].name, "thing.0001-0004.p00.rsp");
    assert_eq!(first.manifest_name, "thing.0001-0004.set.json");
    let second = &closed[1];
    assert_eq!(second.shards[0].name, "thing.0005-0008.p00.rsp");
    // Plain lexical order groups each set's files behind its slices.
    assert!(first.shards[0].name < second.shards[0].name);
}

#[test]
fn admit_rejects_misnumbered_slice() {
    let cfg = test_cfg(4, 1);
    let mut builder = SetBuilder::new(&cfg);
    builder.admit(make_slice(&cfg, 1, 100)).unwrap();
    // A slice claiming the wrong set is a protocol violation, not a skip.
    let mut rogue = make_slice(&cfg, 2, 100);
    rogue.set_index = 7;
    let err = builder.admit(rogue).unwrap_err();
    assert!(matches!(err, redset_core::Error::Protocol { .. }), "{err}");
}
