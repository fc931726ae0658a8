use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::config::RunConfig;
use crate::error::{Error, Result};

/// One completed slice of the archive stream, as admitted by intake.
/// Immutable once created; owned by the set builder until assigned.
#[derive(Clone, Debug)]
pub struct Slice {
    pub path: PathBuf,
    /// 1-based position in the whole stream.
    pub seq: u64,
    /// 0-based redundancy-set index.
    pub set_index: u64,
    /// 0-based position within the set.
    pub slice_index: u32,
    pub bytes: u64,
    /// Final slice of the whole stream.
    pub last: bool,
}

impl Slice {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.to_string_lossy().into_owned())
    }
}

/// Standard slice filename: `{basename}.{seq}.{ext}`, seq 1-based and
/// zero-padded so plain lexical order is stream order.
pub fn slice_file_name(cfg: &RunConfig, seq: u64) -> String {
    format!("{}.{}.{}", cfg.basename, cfg.number(seq), cfg.extension)
}

/// A per-slice completion notification from the archive encoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SliceEvent {
    pub path: PathBuf,
    pub basename: String,
    pub set_index: u64,
    pub slice_index: u32,
    pub extension: String,
    pub last: bool,
}

impl SliceEvent {
    /// Parse one encoder notification line:
    /// `<path> <basename> <set-index> <slice-index> <extension> more|last`.
    /// Anything malformed is a fatal protocol violation, never skipped.
    pub fn parse_line(line: &str) -> Result<SliceEvent> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(Error::protocol(format!(
                "expected 6 fields in slice notification, got {}: {:?}",
                fields.len(),
                line
            )));
        }
        let set_index: u64 = fields[2]
            .parse()
            .map_err(|_| Error::protocol(format!("bad set index {:?}", fields[2])))?;
        let slice_index: u32 = fields[3]
            .parse()
            .map_err(|_| Error::protocol(format!("bad slice index {:?}", fields[3])))?;
        let last = match fields[5] {
            "more" => false,
            "last" => true,
            other => {
                return Err(Error::protocol(format!("bad stream marker {:?}", other)));
            }
        };
        Ok(SliceEvent {
            path: PathBuf::from(fields[0]),
            basename: fields[1].to_string(),
            set_index,
            slice_index,
            extension: fields[4].to_string(),
            last,
        })
    }
}

/// The archive encoder modeled as a producer of a lazy, finite sequence of
/// slice-completion events.
pub trait SliceSource {
    fn next_event(&mut self) -> Result<Option<SliceEvent>>;
}

impl<S: SliceSource + ?Sized> SliceSource for Box<S> {
    fn next_event(&mut self) -> Result<Option<SliceEvent>> {
        (**self).next_event()
    }
}

/// Ingests a directory of already-produced slice files in lexical order.
/// Also the dry-run source: listing and stat are the only filesystem traffic.
#[derive(Debug)]
pub struct DirSliceSource {
    events: std::vec::IntoIter<SliceEvent>,
}

impl DirSliceSource {
    pub fn scan(dir: &Path, cfg: &RunConfig) -> Result<Self> {
        let prefix = format!("{}.", cfg.basename);
        let suffix = format!(".{}", cfg.extension);
        let mut found: Vec<(u64, PathBuf)> = Vec::new();
        for ent in std::fs::read_dir(dir)? {
            let ent = ent?;
            if !ent.file_type()?.is_file() {
                continue;
            }
            let name = ent.file_name().to_string_lossy().into_owned();
            let Some(mid) = name.strip_prefix(&prefix).and_then(|s| s.strip_suffix(&suffix))
            else {
                continue;
            };
            if mid.len() != cfg.digits || !mid.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }
            let seq: u64 = mid
                .parse()
                .map_err(|_| Error::protocol(format!("bad slice number in {name:?}")))?;
            found.push((seq, ent.path()));
        }
        if found.is_empty() {
            return Err(Error::protocol(format!(
                "no {}N{} slice files under {}",
                prefix,
                suffix,
                dir.display()
            )));
        }
        found.sort_by_key(|(seq, _)| *seq);
        for (i, (seq, path)) in found.iter().enumerate() {
            if *seq != i as u64 + 1 {
                return Err(Error::protocol(format!(
                    "slice numbering gap: expected {}, found {} ({})",
                    i + 1,
                    seq,
                    path.display()
                )));
            }
        }
        let total = found.len() as u64;
        let events: Vec<SliceEvent> = found
            .into_iter()
            .map(|(seq, path)| SliceEvent {
                path,
                basename: cfg.basename.clone(),
                set_index: (seq - 1) / cfg.set_size as u64,
                slice_index: ((seq - 1) % cfg.set_size as u64) as u32,
                extension: cfg.extension.clone(),
                last: seq == total,
            })
            .collect();
        Ok(Self { events: events.into_iter() })
    }
}

impl SliceSource for DirSliceSource {
    fn next_event(&mut self) -> Result<Option<SliceEvent>> {
        Ok(self.events.next())
    }
}

/// Spawns the archive encoder and reads one notification line per slice from
/// its stdout. The pipe applies natural backpressure while a set is closed
/// and parity is generated.
pub struct CommandSliceSource {
    command: String,
    child: Child,
    lines: std::io::Lines<BufReader<std::process::ChildStdout>>,
    eof: bool,
}

impl CommandSliceSource {
    pub fn spawn(argv: &[String]) -> Result<Self> {
        let command = argv.join(" ");
        if argv.is_empty() {
            return Err(Error::config("empty encoder command"));
        }
        let mut child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdout(Stdio::piped())
            .spawn()
            .map_err(|e| Error::ExternalTool {
                tool: "encoder".into(),
                command: command.clone(),
                set_index: None,
                detail: format!("failed to start: {e}"),
            })?;
        let stdout = child.stdout.take().expect("piped stdout");
        Ok(Self { command, child, lines: BufReader::new(stdout).lines(), eof: false })
    }

    fn finish(&mut self) -> Result<()> {
        let status = self.child.wait().map_err(Error::Io)?;
        if !status.success() {
            return Err(Error::ExternalTool {
                tool: "encoder".into(),
                command: self.command.clone(),
                set_index: None,
                detail: format!("exited with {status}"),
            });
        }
        Ok(())
    }
}

impl SliceSource for CommandSliceSource {
    fn next_event(&mut self) -> Result<Option<SliceEvent>> {
        if self.eof {
            return Ok(None);
        }
        match self.lines.next() {
            Some(line) => {
                let line = line.map_err(Error::Io)?;
                if line.trim().is_empty() {
                    return Err(Error::protocol("empty slice notification line"));
                }
                Ok(Some(SliceEvent::parse_line(&line)?))
            }
            None => {
                self.eof = true;
                self.finish()?;
                Ok(None)
            }
        }
    }
}

/// Validating intake between a slice source and the set builder. Enforces
/// the encoder protocol: contiguous numbering, consistent naming, a final
/// marker exactly at end of stream, and a real file behind every event.
pub struct SliceIntake<'a, S: SliceSource> {
    cfg: &'a RunConfig,
    source: S,
    next_seq: u64,
    saw_last: bool,
}

impl<'a, S: SliceSource> SliceIntake<'a, S> {
    pub fn new(cfg: &'a RunConfig, source: S) -> Self {
        Self { cfg, source, next_seq: 1, saw_last: false }
    }

    pub fn next_slice(&mut self) -> Result<Option<Slice>> {
        if self.saw_last {
            // Drain: the stream must end exactly after the final marker, and
            // a command-backed encoder's exit status is checked on that pull.
            if self.source.next_event()?.is_some() {
                return Err(Error::protocol("slice event after the final-slice marker"));
            }
            return Ok(None);
        }
        let ev = match self.source.next_event()? {
            Some(ev) => ev,
            None => {
                if self.next_seq == 1 {
                    return Err(Error::protocol("encoder produced no slices"));
                }
                return Err(Error::protocol(
                    "encoder stream ended without a final-slice marker",
                ));
            }
        };
        if ev.basename != self.cfg.basename {
            return Err(Error::protocol(format!(
                "basename {:?} does not match configured {:?}",
                ev.basename, self.cfg.basename
            )));
        }
        if ev.extension != self.cfg.extension {
            return Err(Error::protocol(format!(
                "extension {:?} does not match configured {:?}",
                ev.extension, self.cfg.extension
            )));
        }
        let seq = self.next_seq;
        let want_set = (seq - 1) / self.cfg.set_size as u64;
        let want_idx = ((seq - 1) % self.cfg.set_size as u64) as u32;
        if ev.set_index != want_set || ev.slice_index != want_idx {
            return Err(Error::protocol(format!(
                "slice {} numbered set {} slot {}, expected set {} slot {}",
                seq, ev.set_index, ev.slice_index, want_set, want_idx
            )));
        }
        // Restore locates members by filename pattern alone, so the naming
        // contract is enforced on the way in.
        let expected_name = slice_file_name(self.cfg, seq);
        if ev.path.file_name().and_then(|n| n.to_str()) != Some(expected_name.as_str()) {
            return Err(Error::protocol(format!(
                "slice file {} should be named {}",
                ev.path.display(),
                expected_name
            )));
        }
        let md = std::fs::metadata(&ev.path).map_err(|e| {
            Error::protocol(format!("slice file {} unreadable: {e}", ev.path.display()))
        })?;
        let bytes = md.len();
        if bytes == 0 {
            return Err(Error::protocol(format!("slice file {} is empty", ev.path.display())));
        }
        if bytes > self.cfg.slice_size {
            return Err(Error::protocol(format!(
                "slice file {} is {} bytes, larger than configured slice size {}",
                ev.path.display(),
                bytes,
                self.cfg.slice_size
            )));
        }
        self.next_seq += 1;
        self.saw_last = ev.last;
        Ok(Some(Slice {
            path: ev.path,
            seq,
            set_index: ev.set_index,
            slice_index: ev.slice_index,
            bytes,
            last: ev.last,
        }))
    }
}
