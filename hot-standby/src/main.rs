//! Hot Standby - Main entry point
//!
//! Synchronizes hot standby directories from the backup catalog.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use hot_standby::backup::{list_backups, Backup, DATA_DIR};
use hot_standby::manifest::{self, Manifest, MANIFEST_FILE};
use hot_standby::workflow::{HotStandbyStep, Workflow, WorkflowContext};
use hot_standby::utils::format::format_bytes;
use hot_standby::{utils, Config, HotStandby, SyncError};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Synchronize every hot standby directory of a server
    Sync {
        /// Server name from the configuration
        #[arg(short, long)]
        server: String,

        /// Backup label (defaults to the most recent backup)
        #[arg(long)]
        label: Option<String>,
    },

    /// Show the differences between two manifests
    Diff {
        old: PathBuf,
        new: PathBuf,
    },

    /// Write the manifest of a backup directory
    Manifest {
        backup_dir: PathBuf,

        #[arg(long)]
        label: Option<String>,
    },
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = args
        .config
        .as_deref()
        .map(Config::from_file)
        .transpose()?;

    // Initialize logging
    let log_level = args
        .log_level
        .as_deref()
        .or(config.as_ref().map(|c| c.log.level.as_str()))
        .unwrap_or("info");
    utils::logger::init(log_level)?;

    match args.command {
        Command::Sync { server, label } => {
            let config = config.ok_or_else(|| anyhow!("sync requires --config"))?;
            sync(&config, &server, label)
        }
        Command::Diff { old, new } => {
            diff(&old, &new)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Manifest { backup_dir, label } => {
            write_manifest(&backup_dir, label)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn sync(config: &Config, server_name: &str, label: Option<String>) -> Result<ExitCode> {
    let server = config.server(server_name)?;
    let backups_dir = config.server_backup_dir(server_name);

    let label = match label {
        Some(label) => label,
        None => list_backups(&backups_dir)?
            .pop()
            .map(|b| b.label)
            .ok_or_else(|| SyncError::NoBackups(server_name.to_string()))?,
    };
    let backup = Backup::load(backups_dir.join(&label))?;

    tracing::info!(
        "Starting hot-standby v{} ({}/{})",
        env!("CARGO_PKG_VERSION"),
        server_name,
        label
    );

    let standby = HotStandby::new(config, server)?;
    let mut workflow = Workflow::new().then(HotStandbyStep::new(standby));
    let mut ctx = WorkflowContext::new(server_name, &label, backup.is_incremental());

    match workflow.run(&mut ctx) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(SyncError::StandbyIncomplete { failed, .. }) => {
            Ok(ExitCode::from(u8::try_from(failed).unwrap_or(u8::MAX)))
        }
        Err(e) => Err(e.into()),
    }
}

fn diff(old: &Path, new: &Path) -> Result<()> {
    let diff = manifest::compare(old, new)?;

    for path in diff.deleted.keys() {
        println!("- {}", path);
    }
    for path in diff.changed.keys() {
        println!("~ {}", path);
    }
    for path in diff.added.keys() {
        println!("+ {}", path);
    }

    Ok(())
}

fn write_manifest(backup_dir: &Path, label: Option<String>) -> Result<()> {
    let label = label.or_else(|| {
        backup_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    });
    let manifest = Manifest::from_directory(&backup_dir.join(DATA_DIR), label)?;
    let path = backup_dir.join(MANIFEST_FILE);
    manifest
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;

    tracing::info!(
        "Wrote {} ({} files, {})",
        path.display(),
        manifest.len(),
        format_bytes(manifest.total_bytes())
    );
    Ok(())
}
