//! PixPort CLI - export an Eagle-style image library to disk or a NAS share.
//!
//! Usage:
//!   pixport export -d ~/Pictures/my.library -o /mnt/backup
//!   pixport export -d ~/Pictures/my.library -o sftp://nas/volume1/photos \
//!       --user me --history-file ~/.pixport/history.jsonl

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use colored::Colorize;
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressStyle};
use pixport_core::{
    CancelToken, ExportOptions, History, Library, LocalTarget, SftpTarget, Target,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// PixPort - export your image library to disk or NAS
#[derive(Parser)]
#[command(name = "pixport")]
#[command(about = "Export your image library to disk or NAS", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Export the library into a destination tree
    Export {
        /// Path to the library directory
        #[arg(short = 'd', long)]
        library: PathBuf,

        /// Destination: a local directory or sftp://host[:port]/path
        #[arg(short = 'o', long)]
        dst: String,

        /// Group exported files by matching smart folder
        #[arg(short = 's', long, action = ArgAction::Set, default_value_t = true)]
        group_by_folder: bool,

        /// Copy even when timestamps say the destination is current
        #[arg(long)]
        overwrite: bool,

        /// Remove the destination tree before exporting
        #[arg(long)]
        force: bool,

        /// Remote user (sftp destinations)
        #[arg(long)]
        user: Option<String>,

        /// Remote password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,

        /// Copy-history file; omitted means no history cache
        #[arg(long)]
        history_file: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Export {
            library,
            dst,
            group_by_folder,
            overwrite,
            force,
            user,
            password,
            history_file,
        } => run_export(
            library,
            &dst,
            group_by_folder,
            overwrite,
            force,
            user.as_deref(),
            password.as_deref(),
            history_file,
        ),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

struct Destination {
    target: Arc<dyn Target>,
    output_dir: PathBuf,
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("target", &self.target.name())
            .field("output_dir", &self.output_dir)
            .finish()
    }
}

/// Resolves `--dst` into a write target and an output directory. Everything
/// here is validated before any export work starts.
fn parse_destination(
    dst: &str,
    user: Option<&str>,
    password: Option<&str>,
) -> Result<Destination> {
    if let Some(rest) = dst.strip_prefix("sftp://") {
        let (addr, path) = rest
            .split_once('/')
            .context("invalid destination, expected sftp://host[:port]/path")?;
        if addr.is_empty() || path.is_empty() {
            bail!("invalid destination, expected sftp://host[:port]/path");
        }
        let user = user.context("--user is required for sftp destinations")?;
        let password = match password {
            Some(p) => p.to_string(),
            None => rpassword::prompt_password(format!("password for {user}@{addr}: "))
                .context("read password")?,
        };
        let target = SftpTarget::connect(addr, user, &password)?;
        info!(addr, "connected to sftp destination");
        Ok(Destination {
            target: Arc::new(target),
            output_dir: PathBuf::from("/").join(path),
        })
    } else {
        Ok(Destination {
            target: Arc::new(LocalTarget),
            output_dir: PathBuf::from(dst),
        })
    }
}

fn open_history(path: Option<PathBuf>) -> Result<Option<History>> {
    let Some(path) = path else { return Ok(None) };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create history directory {}", parent.display()))?;
    }
    let history =
        History::open(&path).with_context(|| format!("open history {}", path.display()))?;
    history
        .load()
        .with_context(|| format!("load history {}", path.display()))?;
    Ok(Some(history))
}

fn progress_bars(progress: &MultiProgress) -> (ProgressBar, ProgressBar) {
    let item_bar = progress.add(ProgressBar::new(0));
    item_bar.set_style(
        ProgressStyle::with_template("{prefix:>8} [{bar:40}] {pos}/{len}")
            .expect("static template")
            .progress_chars("=> "),
    );
    item_bar.set_prefix("items");

    let byte_bar = progress.add(ProgressBar::new_spinner());
    byte_bar.set_style(
        ProgressStyle::with_template("{prefix:>8} {bytes} ({bytes_per_sec})")
            .expect("static template"),
    );
    byte_bar.set_prefix("copied");

    (item_bar, byte_bar)
}

#[allow(clippy::too_many_arguments)]
fn run_export(
    library_dir: PathBuf,
    dst: &str,
    group_by_folder: bool,
    overwrite: bool,
    force: bool,
    user: Option<&str>,
    password: Option<&str>,
    history_file: Option<PathBuf>,
) -> Result<()> {
    if !library_dir.is_dir() {
        bail!("library '{}' not found", library_dir.display());
    }
    let destination = parse_destination(dst, user, password)?;
    let history = open_history(history_file)?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("{}", "cancelling, draining started tasks...".yellow());
            cancel.cancel();
        })
        .context("install ctrl-c handler")?;
    }

    let progress = MultiProgress::new();
    let (item_bar, byte_bar) = progress_bars(&progress);

    let options = ExportOptions {
        overwrite,
        force_clean: force,
        group_by_folder,
        item_bar: Some(item_bar.clone()),
        byte_bar: Some(byte_bar.clone()),
        cancel,
    };

    let lib = Library::new(library_dir, destination.target, history);
    let result = lib.export(&destination.output_dir, &options);
    lib.close().context("close history")?;
    item_bar.finish();
    byte_bar.finish();

    let summary = result?;
    println!(
        "{} {} copied, {} skipped, {} deleted of {} items, {}",
        "done:".green().bold(),
        summary.copied,
        summary.skipped,
        summary.deleted,
        summary.items,
        HumanBytes(summary.bytes_copied)
    );
    Ok(())
}
