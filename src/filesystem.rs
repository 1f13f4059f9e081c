//! On-line growing of a mounted filesystem.

use anyhow::{bail, Result};

use crate::engine::Resizer;
use crate::error::GrowError;
use crate::exec::Executor;
use crate::lvm::{device_ends_in_digit, LvResizer};
use crate::mounts::{self, MountedFilesystem};
use crate::partition::PartitionResizer;

/// Grows a mounted filesystem with the matching userspace tool.
#[derive(Debug)]
pub struct FilesystemResizer {
    mount: MountedFilesystem,
}

/// What kind of block device a filesystem sits on.
#[derive(Debug, PartialEq, Eq)]
enum BlockDeviceKind {
    Partition,
    LogicalVolume,
}

impl FilesystemResizer {
    /// Build a resizer for a resolved mount, rejecting filesystem types
    /// without an on-line grow command.
    pub fn new(mount: MountedFilesystem) -> Result<Self, GrowError> {
        match mount.fs_type.as_str() {
            "ext2" | "ext3" | "ext4" | "xfs" | "btrfs" => Ok(Self { mount }),
            other => Err(GrowError::UnsupportedFilesystem(other.to_string())),
        }
    }

    fn grow_command(&self) -> (&'static str, Vec<&str>) {
        match self.mount.fs_type.as_str() {
            "ext2" | "ext3" | "ext4" => ("resize2fs", vec![self.mount.device.as_str()]),
            "xfs" => ("xfs_growfs", vec!["-d", self.mount.mount_point.as_str()]),
            "btrfs" => (
                "btrfs",
                vec!["filesystem", "resize", "max", self.mount.mount_point.as_str()],
            ),
            other => unreachable!("constructor rejected filesystem type {other:?}"),
        }
    }
}

impl Resizer for FilesystemResizer {
    fn label(&self) -> String {
        format!("{} filesystem at {}", self.mount.fs_type, self.mount.mount_point)
    }

    fn state(&self, _exec: &Executor) -> Result<String> {
        let blocks = mounts::statfs_blocks(&self.mount.mount_point)?;
        Ok(format!("{} blocks", blocks))
    }

    fn resize(&self, exec: &Executor) -> Result<()> {
        let (program, args) = self.grow_command();
        exec.run_gated(program, &args, None)
    }

    fn dependency(&self, exec: &Executor) -> Result<Option<Box<dyn Resizer>>> {
        let device = &self.mount.device;
        if device == "/dev/root" {
            // The mount resolver replaces /dev/root before we get here.
            bail!("unexpected device /dev/root for {}", self.mount.mount_point);
        }
        match block_device_kind(device)? {
            BlockDeviceKind::Partition => {
                exec.vlog(&format!("{} sits on partition {}", self.label(), device));
                Ok(Some(Box::new(PartitionResizer::new(device.clone()))))
            }
            BlockDeviceKind::LogicalVolume => {
                exec.vlog(&format!("{} sits on LVM LV {}", self.label(), device));
                Ok(Some(Box::new(LvResizer::new(device.clone()))))
            }
        }
    }
}

/// Classify the device under a filesystem by its path shape.
fn block_device_kind(device: &str) -> Result<BlockDeviceKind, GrowError> {
    let is_disk_partition = ["/dev/sd", "/dev/vd", "/dev/mmcblk", "/dev/nvme"]
        .iter()
        .any(|prefix| device.starts_with(prefix));
    if is_disk_partition && device_ends_in_digit(device) {
        return Ok(BlockDeviceKind::Partition);
    }
    let base = device.rsplit('/').next().unwrap_or(device);
    if device.starts_with("/dev/mapper/") || base.starts_with("dm-") {
        return Ok(BlockDeviceKind::LogicalVolume);
    }
    Err(GrowError::UnrecognisedBlockDevice(device.to_string()))
}
