//! Mount-point to block-device resolution.

use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::GrowError;
use crate::exec::{self, Executor};

/// A mounted filesystem and the block device backing it.
#[derive(Debug, Clone)]
pub struct MountedFilesystem {
    pub mount_point: String,
    pub device: String,
    pub fs_type: String,
    pub blocks: u64,
}

/// Resolve `mount_point` to its backing device and filesystem type.
pub fn resolve(mount_point: &str, exec: &Executor) -> Result<MountedFilesystem> {
    let blocks = statfs_blocks(mount_point)?;
    let mounts = exec::read_small_file("/proc/mounts")?;

    let entry = match find_mount_entry(&mounts, mount_point) {
        Some(entry) => Some(entry),
        None => findmnt_fallback(mount_point, exec)?,
    };
    let (device, fs_type) =
        entry.ok_or_else(|| GrowError::MountNotFound(mount_point.to_string()))?;

    let device = if device == "/dev/root" {
        resolve_dev_root().context("failed to map /dev/root to a real device")?
    } else {
        device
    };
    exec.vlog(&format!(
        "{} is a {} filesystem on {}",
        mount_point, fs_type, device
    ));

    Ok(MountedFilesystem {
        mount_point: mount_point.to_string(),
        device,
        fs_type,
        blocks,
    })
}

/// Total block count of the filesystem at `path`.
pub fn statfs_blocks(path: &str) -> Result<u64> {
    let stat = nix::sys::statfs::statfs(path).with_context(|| format!("statfs {}", path))?;
    Ok(stat.blocks() as u64)
}

/// First /proc/mounts line whose mount point matches, as (device, fstype).
///
/// Lines with fewer than three fields are skipped, as is the `rootfs`
/// pseudo filesystem that can shadow the real root mount.
fn find_mount_entry(mounts: &str, mount_point: &str) -> Option<(String, String)> {
    for line in mounts.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        if fields[0] == "rootfs" {
            continue;
        }
        if fields[1] == mount_point {
            return Some((fields[0].to_string(), fields[2].to_string()));
        }
    }
    None
}

#[derive(Debug, Deserialize)]
struct FindmntOutput {
    filesystems: Vec<FindmntFilesystem>,
}

#[derive(Debug, Deserialize)]
struct FindmntFilesystem {
    source: String,
    fstype: String,
}

/// Ask findmnt about a mount point /proc/mounts does not list.
///
/// A missing findmnt binary or an unknown mount point both yield None;
/// the caller reports the mount as not found.
fn findmnt_fallback(mount_point: &str, exec: &Executor) -> Result<Option<(String, String)>> {
    let json = match exec.capture("findmnt", &["-J", "-o", "SOURCE,FSTYPE", mount_point]) {
        Ok(json) => json,
        Err(_) => return Ok(None),
    };
    let output: FindmntOutput =
        serde_json::from_str(&json).context("parsing findmnt JSON output")?;
    Ok(output
        .filesystems
        .into_iter()
        .next()
        .map(|fs| (fs.source, fs.fstype)))
}

/// Map the pseudo-device /dev/root to the real block device that shares
/// its device number, by scanning the block nodes under /dev.
fn resolve_dev_root() -> Result<String> {
    let mut root_devnum = None;
    let mut candidates = Vec::new();
    for entry in fs::read_dir("/dev").context("reading /dev")? {
        let entry = entry?;
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };
        if !metadata.file_type().is_block_device() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == "root" {
            root_devnum = Some(metadata.rdev());
        } else {
            candidates.push((name, metadata.rdev()));
        }
    }
    let want = root_devnum.context("/dev/root not found in /dev")?;
    for (name, devnum) in candidates {
        if devnum == want {
            return Ok(format!("/dev/{}", name));
        }
    }
    anyhow::bail!("no block device in /dev shares a device number with /dev/root")
}
