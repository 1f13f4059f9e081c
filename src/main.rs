use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;

mod engine;
mod error;
mod exec;
mod filesystem;
mod lvm;
mod mounts;
mod partition;

use engine::Outcome;
use exec::Executor;
use filesystem::FilesystemResizer;

/// Live-grow a mounted filesystem to fill its underlying block device.
///
/// Grows every layer between the mount point and the disk, bottom-up:
/// the final partition of the disk, an LVM physical and logical volume
/// when present, and the filesystem itself. Intended for VM guests whose
/// backing disk was enlarged by the hypervisor.
#[derive(Parser, Debug)]
#[command(name = "growdisk", version, about)]
struct Cli {
    /// Mount point to grow, e.g. /
    mount_point: String,

    /// Print planned changes without making any
    #[arg(long)]
    dry_run: bool,

    /// Verbose progress output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    let exec = Executor::new(cli.dry_run, cli.verbose);

    if !cli.dry_run && !nix::unistd::geteuid().is_root() {
        eprintln!(
            "{}",
            "Warning: growing block devices needs root; use --dry-run to preview.".yellow()
        );
    }

    let resizer = match prepare(&cli.mount_point, &exec) {
        Ok(resizer) => resizer,
        Err(e) => {
            eprintln!(
                "{}",
                format!("error preparing to grow {}: {:#}", cli.mount_point, e).red()
            );
            std::process::exit(1);
        }
    };

    let Outcome { changes, error } = engine::resize(&resizer, &exec);
    if !changes.is_empty() {
        println!("Changes made:");
        for change in &changes {
            println!("  * {}", change);
        }
    } else if error.is_none() {
        println!("No changes made.");
    }
    if let Some(e) = error {
        eprintln!(
            "{}",
            format!("error growing {}: {:#}", cli.mount_point, e).red()
        );
        std::process::exit(1);
    }
}

fn prepare(mount_point: &str, exec: &Executor) -> Result<FilesystemResizer> {
    let mount = mounts::resolve(mount_point, exec)
        .with_context(|| format!("resolving mount point {}", mount_point))?;
    Ok(FilesystemResizer::new(mount)?)
}
