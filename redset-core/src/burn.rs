use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::sequencer::DiscBundle;

/// One assembled disc directory, ready for the burn tool.
pub struct BurnRequest<'a> {
    pub bundle: &'a DiscBundle,
    pub dir: &'a Path,
    pub label: String,
}

/// The burn step behind a seam. A burn is not assumed idempotent: on
/// failure the run surfaces the exact command for a targeted retry instead
/// of blindly re-burning.
pub trait Burner {
    fn name(&self) -> &str;
    fn burn(&mut self, req: &BurnRequest<'_>) -> Result<()>;
}

/// Runs an external burn command (e.g. growisofs). `{label}` and `{dir}`
/// placeholders are substituted into the argument vector; when no `{dir}`
/// placeholder is present the bundle directory is appended.
pub struct CommandBurner {
    argv: Vec<String>,
    /// Prompt on stderr and wait for enter before each burn, for operators
    /// feeding discs by hand.
    pub pause_for_media: bool,
}

impl CommandBurner {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(Error::config("empty burn command"));
        }
        Ok(Self { argv, pause_for_media: false })
    }

    fn rendered(&self, req: &BurnRequest<'_>) -> Vec<String> {
        let dir = req.dir.to_string_lossy().into_owned();
        let mut out: Vec<String> = self
            .argv
            .iter()
            .map(|a| a.replace("{label}", &req.label).replace("{dir}", &dir))
            .collect();
        if !self.argv.iter().any(|a| a.contains("{dir}")) {
            out.push(dir);
        }
        out
    }
}

impl Burner for CommandBurner {
    fn name(&self) -> &str {
        "burn command"
    }

    fn burn(&mut self, req: &BurnRequest<'_>) -> Result<()> {
        if self.pause_for_media {
            eprint!("insert an empty disc for {} and press enter: ", req.label);
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
        }
        let argv = self.rendered(req);
        let command = argv.join(" ");
        let status = Command::new(&argv[0]).args(&argv[1..]).status().map_err(|e| {
            Error::ExternalTool {
                tool: "burner".into(),
                command: command.clone(),
                set_index: Some(req.bundle.set_index),
                detail: format!("failed to start: {e}"),
            }
        })?;
        if !status.success() {
            return Err(Error::ExternalTool {
                tool: "burner".into(),
                command,
                set_index: Some(req.bundle.set_index),
                detail: format!("exited with {status}"),
            });
        }
        Ok(())
    }
}

/// Moves the assembled bundle into `{dest}/{label}` instead of burning,
/// for runs without a burner attached or for staging discs to burn later.
pub struct StageBurner {
    dest: PathBuf,
}

impl StageBurner {
    pub fn new(dest: PathBuf) -> Self {
        Self { dest }
    }
}

impl Burner for StageBurner {
    fn name(&self) -> &str {
        "stage"
    }

    fn burn(&mut self, req: &BurnRequest<'_>) -> Result<()> {
        let target = self.dest.join(&req.label);
        std::fs::create_dir_all(&target)?;
        for ent in std::fs::read_dir(req.dir)? {
            let ent = ent?;
            let to = target.join(ent.file_name());
            std::fs::rename(ent.path(), &to).or_else(|_| {
                // Cross-device staging: fall back to copy + remove.
                std::fs::copy(ent.path(), &to).map(|_| ())?;
                std::fs::remove_file(ent.path())
            })?;
        }
        Ok(())
    }
}
