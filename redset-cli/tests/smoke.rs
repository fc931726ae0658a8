use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::process::Command;

fn write_slices(dir: &std::path::Path, count: u64, slice_bytes: usize) {
    std::fs::create_dir_all(dir).unwrap();
    for seq in 1..=count {
        let len = if seq == count { slice_bytes / 3 } else { slice_bytes };
        let mut rng = StdRng::seed_from_u64(seq);
        let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        std::fs::write(dir.join(format!("demo.{:04}.dar", seq)), data).unwrap();
    }
}

fn backup_args(td: &assert_fs::TempDir, staging: &str, extra: &[&str]) -> Vec<String> {
    let mut args: Vec<String> = [
        "backup",
        "--staging",
        td.path().join(staging).to_str().unwrap(),
        "--basename",
        "demo",
        "--slices-from",
        td.path().join("slices").to_str().unwrap(),
        "--set-size",
        "4",
        "--parity",
        "1",
        "--disc-size",
        "80K",
        "--slice-size",
        "8K",
        "--reserve",
        "8K",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    args.extend(extra.iter().map(|s| s.to_string()));
    args
}

#[test]
fn backup_then_verify_then_restore() {
    let td = assert_fs::TempDir::new().unwrap();
    write_slices(&td.path().join("slices"), 10, 8 << 10);
    let discs = td.path().join("discs");

    Command::cargo_bin("redset")
        .unwrap()
        .args(backup_args(&td, "staging", &["--stage-to", discs.to_str().unwrap()]))
        .assert()
        .success()
        .stdout(predicate::str::contains("set 0001: slices 0001-0004 (4 data + 1 parity)"))
        .stdout(predicate::str::contains("set 0003: slices 0009-0010 (2 data + 1 parity)"))
        .stdout(predicate::str::contains("label demo-0003-001"));

    let disc3 = discs.join("demo-0003-001");
    assert!(disc3.join("README.txt").is_file());
    assert!(disc3.join("demo.0009-0010.set.json").is_file());
    assert!(disc3.join("demo.0009-0010.p00.rsp").is_file());

    // Healthy disc verifies clean.
    Command::cargo_bin("redset")
        .unwrap()
        .args(["verify", disc3.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));

    // Lose a member, restore it from parity.
    std::fs::remove_file(disc3.join("demo.0009.dar")).unwrap();
    Command::cargo_bin("redset")
        .unwrap()
        .args(["verify", disc3.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Recoverable: YES"));

    let restored = td.path().join("restored");
    Command::cargo_bin("redset")
        .unwrap()
        .args(["restore", disc3.to_str().unwrap(), "--output", restored.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("rebuilt: demo.0009.dar"));
    assert!(restored.join("demo.0009.dar").is_file());
    assert!(restored.join("demo.0010.dar").is_file());
}

#[test]
fn dry_run_plans_without_touching_anything() {
    let td = assert_fs::TempDir::new().unwrap();
    write_slices(&td.path().join("slices"), 10, 8 << 10);

    // Plan first.
    let dry = Command::cargo_bin("redset")
        .unwrap()
        .args(backup_args(&td, "staging_dry", &["--dry-run"]))
        .assert()
        .success()
        .stdout(predicate::str::contains("---"))
        .get_output()
        .stdout
        .clone();
    assert!(
        !td.path().join("staging_dry").exists(),
        "dry run must not create the staging directory"
    );
    // The slices are untouched and still ingestible.
    let dry_text = String::from_utf8(dry).unwrap();
    let dry_decisions: Vec<&str> = dry_text.lines().take_while(|l| *l != "---").collect();

    // Then the real run makes the same decisions.
    let discs = td.path().join("discs");
    let real = Command::cargo_bin("redset")
        .unwrap()
        .args(backup_args(&td, "staging", &["--stage-to", discs.to_str().unwrap()]))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let real_text = String::from_utf8(real).unwrap();
    let real_decisions: Vec<&str> = real_text.lines().collect();
    assert_eq!(dry_decisions, real_decisions);
}

#[test]
fn nonempty_staging_exits_with_configuration_code() {
    let td = assert_fs::TempDir::new().unwrap();
    write_slices(&td.path().join("slices"), 4, 8 << 10);
    let staging = td.child("staging");
    staging.create_dir_all().unwrap();
    staging.child("residue.dar").write_str("stale").unwrap();

    Command::cargo_bin("redset")
        .unwrap()
        .args(backup_args(&td, "staging", &["--stage-to", td.path().join("d").to_str().unwrap()]))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not empty"));
}

#[test]
fn zero_parity_is_a_configuration_error() {
    let td = assert_fs::TempDir::new().unwrap();
    write_slices(&td.path().join("slices"), 4, 8 << 10);
    let mut args = backup_args(&td, "staging", &["--stage-to", td.path().join("d").to_str().unwrap()]);
    let idx = args.iter().position(|a| a == "--parity").unwrap();
    args[idx + 1] = "0".into();

    Command::cargo_bin("redset")
        .unwrap()
        .args(args)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("parity"));
}

#[test]
fn unrecoverable_set_exits_with_integrity_code() {
    let td = assert_fs::TempDir::new().unwrap();
    write_slices(&td.path().join("slices"), 4, 8 << 10);
    let discs = td.path().join("discs");
    Command::cargo_bin("redset")
        .unwrap()
        .args(backup_args(&td, "staging", &["--stage-to", discs.to_str().unwrap()]))
        .assert()
        .success();

    let disc1 = discs.join("demo-0001-001");
    std::fs::remove_file(disc1.join("demo.0001.dar")).unwrap();
    std::fs::remove_file(disc1.join("demo.0002.dar")).unwrap();

    Command::cargo_bin("redset")
        .unwrap()
        .args(["verify", disc1.to_str().unwrap()])
        .assert()
        .code(4)
        .stdout(predicate::str::contains("Recoverable: NO"));

    Command::cargo_bin("redset")
        .unwrap()
        .args([
            "restore",
            disc1.to_str().unwrap(),
            "--output",
            td.path().join("restored").to_str().unwrap(),
        ])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("unrecoverable"));
}
