use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use redset_core::burn::{Burner, CommandBurner, StageBurner};
use redset_core::config::RunConfig;
use redset_core::docs::RunDoc;
use redset_core::parity::RsParityGenerator;
use redset_core::run;
use redset_core::slice::{CommandSliceSource, DirSliceSource, SliceSource};
use redset_core::verify;

#[derive(Parser)]
#[command(name = "redset", version, about = "redundant optical-disc archival backups")]
struct Cli {
    /// Show progress and echo run decisions.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Group archive slices into redundancy sets, generate parity, burn discs
    Backup {
        /// Staging directory; must not pre-exist non-empty
        #[arg(long)]
        staging: PathBuf,
        /// Archive basename; slice files are {basename}.NNNN.{extension}
        #[arg(long)]
        basename: String,
        #[arg(long, default_value = "dar")]
        extension: String,
        /// Ingest already-produced slice files from this directory;
        /// staged files are moved onto discs and deleted after burning
        #[arg(long)]
        slices_from: Option<PathBuf>,
        /// Spawn this encoder command; one notification line per slice on stdout:
        /// "<path> <basename> <set> <slot> <ext> more|last"
        #[arg(long)]
        encoder: Option<String>,
        /// Burn command; {label} and {dir} placeholders are substituted,
        /// otherwise the bundle directory is appended
        #[arg(long)]
        burn: Option<String>,
        /// Without --burn: move finished disc directories here
        #[arg(long)]
        stage_to: Option<PathBuf>,
        /// Data slices per redundancy set
        #[arg(long, default_value_t = 4)]
        set_size: usize,
        /// Parity shards per redundancy set
        #[arg(long, default_value_t = 1)]
        parity: usize,
        #[arg(long, default_value = "650M")]
        disc_size: String,
        #[arg(long, default_value = "64M")]
        slice_size: String,
        /// Per-disc bytes reserved for filesystem overhead and documentation
        #[arg(long, default_value = "10M")]
        reserve: String,
        /// Digit width for slice numbering
        #[arg(long, default_value_t = 4)]
        digits: usize,
        /// Plan only: identical decisions, no writes, no external tools
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Wait for enter before each burn
        #[arg(long, default_value_t = false)]
        pause_for_media: bool,
    },
    /// Report the health of a recovered set directory
    Verify { set_dir: PathBuf },
    /// Rebuild the complete slice sequence of one set
    Restore {
        set_dir: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = dispatch(cli) {
        eprintln!("redset: {e:#}");
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<redset_core::Error>().map(|e| e.exit_code()).unwrap_or(1)
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.cmd {
        Cmd::Backup {
            staging,
            basename,
            extension,
            slices_from,
            encoder,
            burn,
            stage_to,
            set_size,
            parity,
            disc_size,
            slice_size,
            reserve,
            digits,
            dry_run,
            pause_for_media,
        } => {
            let cfg = RunConfig {
                basename,
                extension,
                staging_dir: staging,
                disc_size: parse_size(&disc_size)?,
                slice_size: parse_size(&slice_size)?,
                set_size,
                parity,
                digits,
                reserve: parse_size(&reserve)?,
                verbose: cli.verbose,
                dry_run,
            };
            backup(&cfg, slices_from, encoder, burn, stage_to, pause_for_media)
        }
        Cmd::Verify { set_dir } => verify_cmd(&set_dir),
        Cmd::Restore { set_dir, output } => restore(&set_dir, &output),
    }
}

fn backup(
    cfg: &RunConfig,
    slices_from: Option<PathBuf>,
    encoder: Option<String>,
    burn: Option<String>,
    stage_to: Option<PathBuf>,
    pause_for_media: bool,
) -> Result<()> {
    let invocation: Vec<String> = std::env::args().collect();
    let doc = RunDoc::new(invocation.join(" "));

    let source: Box<dyn SliceSource> = match (&slices_from, &encoder) {
        (Some(_), Some(_)) => {
            return Err(redset_core::Error::config(
                "--slices-from and --encoder are mutually exclusive",
            )
            .into());
        }
        (Some(dir), None) => Box::new(DirSliceSource::scan(dir, cfg)?),
        (None, Some(cmd)) => {
            if cfg.dry_run {
                return Err(redset_core::Error::config(
                    "--dry-run may not invoke the encoder; use --slices-from",
                )
                .into());
            }
            let argv: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
            Box::new(CommandSliceSource::spawn(&argv)?)
        }
        (None, None) => {
            return Err(redset_core::Error::config(
                "one of --slices-from or --encoder is required",
            )
            .into());
        }
    };

    let mut burner: Box<dyn Burner> = match &burn {
        Some(cmd) => {
            let argv: Vec<String> = cmd.split_whitespace().map(str::to_string).collect();
            let mut b = CommandBurner::new(argv)?;
            b.pause_for_media = pause_for_media;
            Box::new(b)
        }
        None => {
            let dest = match stage_to {
                Some(d) => d,
                None if cfg.dry_run => cfg.staging_dir.clone(), // never used
                None => {
                    return Err(redset_core::Error::config(
                        "either --burn or --stage-to is required",
                    )
                    .into());
                }
            };
            Box::new(StageBurner::new(dest))
        }
    };

    let outcome = run::execute(cfg, &doc, source, &RsParityGenerator, burner.as_mut())?;
    for line in &outcome.decisions {
        println!("{line}");
    }
    if cfg.dry_run {
        println!("---");
        print!("{}", outcome.doc);
    }
    eprintln!(
        "{} slice(s) in {} set(s) across {} disc(s){}",
        outcome.slices,
        outcome.sets_closed,
        outcome.discs_burned,
        if cfg.dry_run { " [dry run]" } else { "" },
    );
    Ok(())
}

fn verify_cmd(set_dir: &PathBuf) -> Result<()> {
    let (_mf, report) = verify::inspect(set_dir)?;
    println!(
        "set {}: {} data ok, {} missing, {} corrupt; parity usable {}/{}",
        report.set_index,
        report.data_ok,
        report.data_missing.len(),
        report.data_corrupt.len(),
        report.shards_ok,
        report.parity,
    );
    for name in &report.data_missing {
        println!("  missing: {name}");
    }
    for name in &report.data_corrupt {
        println!("  corrupt: {name}");
    }
    for name in &report.shards_bad {
        println!("  shard unusable: {name}");
    }
    if report.damaged() == 0 {
        println!("OK");
    } else if report.recoverable {
        println!("Recoverable: YES");
    } else {
        println!("Recoverable: NO");
        return Err(redset_core::Error::Unrecoverable {
            set_index: report.set_index,
            missing: report.damaged(),
            parity: report.parity,
        }
        .into());
    }
    Ok(())
}

fn restore(set_dir: &PathBuf, output: &PathBuf) -> Result<()> {
    let outcome = verify::reconstruct(set_dir, output)?;
    println!(
        "set {}: {} member(s) intact, {} rebuilt",
        outcome.set_index,
        outcome.intact,
        outcome.rebuilt.len(),
    );
    for name in &outcome.rebuilt {
        println!("  rebuilt: {name}");
    }
    println!("OK");
    Ok(())
}

fn parse_size(spec: &str) -> Result<u64> {
    let s = spec.trim().to_uppercase();
    let (num, mul) = if let Some(p) = s.strip_suffix('K') {
        (p, 1u64 << 10)
    } else if let Some(p) = s.strip_suffix('M') {
        (p, 1u64 << 20)
    } else if let Some(p) = s.strip_suffix('G') {
        (p, 1u64 << 30)
    } else {
        (s.as_str(), 1u64)
    };
    let v: u64 = num.parse().map_err(|_| anyhow!("bad size {:?}", spec))?;
    Ok(v * mul)
}
