use std::path::{Path, PathBuf};

use redset_core::config::RunConfig;
use redset_core::slice::{
    CommandSliceSource, DirSliceSource, SliceEvent, SliceIntake, SliceSource,
};
use redset_core::Error;

fn test_cfg(staging: &Path) -> RunConfig {
    RunConfig {
        basename: "thing".into(),
        extension: "dar".into(),
        staging_dir: staging.to_path_buf(),
        disc_size: 650 << 10,
        slice_size: 8 << 10,
        set_size: 4,
        parity: 1,
        digits: 4,
        reserve: 10 << 10,
        verbose: false,
        dry_run: false,
    }
}

#[test]
fn notification_line_round_trips() {
    let ev = SliceEvent::parse_line("/tmp/x/thing.0005.dar thing 1 0 dar more").unwrap();
    assert_eq!(ev.path, PathBuf::from("/tmp/x/thing.0005.dar"));
    assert_eq!(ev.set_index, 1);
    assert_eq!(ev.slice_index, 0);
    assert!(!ev.last);
    let last = SliceEvent::parse_line("/tmp/x/thing.0006.dar thing 1 1 dar last").unwrap();
    assert!(last.last);
}

#[test]
fn malformed_notifications_are_fatal() {
    for line in [
        "",
        "only three fields here",
        "/p thing notanumber 0 dar more",
        "/p thing 1 0 dar perhaps",
        "/p thing 1 0 dar more extra",
    ] {
        let err = SliceEvent::parse_line(line).unwrap_err();
        assert!(matches!(err, Error::Protocol { .. }), "line {line:?} gave {err}");
    }
}

#[test]
fn numbering_gap_in_slice_directory_is_rejected() {
    let td = tempfile::tempdir().unwrap();
    let cfg = test_cfg(td.path());
    std::fs::write(td.path().join("thing.0001.dar"), b"x").unwrap();
    std::fs::write(td.path().join("thing.0003.dar"), b"x").unwrap();
    let err = DirSliceSource::scan(td.path(), &cfg).unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }), "{err}");
}

#[test]
fn intake_rejects_wrong_set_numbering() {
    let td = tempfile::tempdir().unwrap();
    let cfg = test_cfg(td.path());
    let path = td.path().join("thing.0001.dar");
    std::fs::write(&path, vec![0u8; 100]).unwrap();

    struct One(Option<SliceEvent>);
    impl SliceSource for One {
        fn next_event(&mut self) -> redset_core::Result<Option<SliceEvent>> {
            Ok(self.0.take())
        }
    }

    // Slice 1 must sit in set 0, slot 0.
    let ev = SliceEvent {
        path,
        basename: "thing".into(),
        set_index: 3,
        slice_index: 0,
        extension: "dar".into(),
        last: true,
    };
    let mut intake = SliceIntake::new(&cfg, One(Some(ev)));
    let err = intake.next_slice().unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }), "{err}");
}

#[test]
fn stream_without_final_marker_is_a_violation() {
    let td = tempfile::tempdir().unwrap();
    let cfg = test_cfg(td.path());
    let path = td.path().join("thing.0001.dar");
    std::fs::write(&path, vec![0u8; 100]).unwrap();

    struct Truncated(Vec<SliceEvent>);
    impl SliceSource for Truncated {
        fn next_event(&mut self) -> redset_core::Result<Option<SliceEvent>> {
            Ok(self.0.pop())
        }
    }

    let ev = SliceEvent {
        path,
        basename: "thing".into(),
        set_index: 0,
        slice_index: 0,
        extension: "dar".into(),
        last: false,
    };
    let mut intake = SliceIntake::new(&cfg, Truncated(vec![ev]));
    intake.next_slice().unwrap().unwrap();
    let err = intake.next_slice().unwrap_err();
    assert!(matches!(err, Error::Protocol { .. }), "{err}");
}

#[test]
fn encoder_command_events_are_consumed_in_order() {
    let td = tempfile::tempdir().unwrap();
    let cfg = test_cfg(td.path());
    for seq in 1..=2u64 {
        std::fs::write(td.path().join(format!("thing.{:04}.dar", seq)), vec![7u8; 64]).unwrap();
    }
    let script = format!(
        "echo '{dir}/thing.0001.dar thing 0 0 dar more'; \
         echo '{dir}/thing.0002.dar thing 0 1 dar last'",
        dir = td.path().display()
    );
    let argv = vec!["sh".to_string(), "-c".to_string(), script];
    let source = CommandSliceSource::spawn(&argv).unwrap();
    let mut intake = SliceIntake::new(&cfg, source);
    let s1 = intake.next_slice().unwrap().unwrap();
    assert_eq!(s1.seq, 1);
    let s2 = intake.next_slice().unwrap().unwrap();
    assert!(s2.last);
    assert!(intake.next_slice().unwrap().is_none());
}

#[test]
fn failed_encoder_surfaces_its_command() {
    let argv = vec!["sh".to_string(), "-c".to_string(), "exit 9".to_string()];
    let mut source = CommandSliceSource::spawn(&argv).unwrap();
    let err = source.next_event().unwrap_err();
    match err {
        Error::ExternalTool { ref tool, ref command, .. } => {
            assert_eq!(tool, "encoder");
            assert!(command.contains("exit 9"), "{command}");
        }
        other => panic!("expected ExternalTool, got {other}"),
    }
    assert_eq!(err.exit_code(), 3);
}
