//! Growing the final partition of a disk into its free tail.

mod blkpg;
mod table;

use std::fs::File;

use anyhow::{anyhow, Context, Result};

use crate::engine::Resizer;
use crate::error::GrowError;
use crate::exec::{self, Executor};
use table::PartitionTable;

// GPT partition type GUIDs we are willing to grow.
const GPT_TYPE_LVM: &str = "E6D6D379-F507-44C2-A23C-238F2A3DF928";
const GPT_TYPE_ROOT_X86_64: &str = "4F68BCE3-E8CD-4DB1-96E7-FBCAF984B709";
const GPT_TYPE_LINUX_FS: &str = "0FC63DAF-8483-4772-8E79-3D69D8477DE4";

// TODO: read /sys/block/<disk>/queue/hw_sector_size instead of assuming.
const SECTOR_SIZE: u64 = 512;

/// Sectors left unused at the end of the disk: 1 MiB, which keeps room
/// for a GPT backup header and matches conventional alignment.
fn end_reserve_sectors(sector_size: u64) -> u64 {
    (1 << 20) / sector_size
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableKind {
    Mbr,
    Gpt,
}

/// Grows a partition by rewriting the disk's partition table and then
/// telling the running kernel about the moved boundary.
pub struct PartitionResizer {
    pub device: String,
}

impl PartitionResizer {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl Resizer for PartitionResizer {
    fn label(&self) -> String {
        format!("partition {}", self.device)
    }

    fn state(&self, _exec: &Executor) -> Result<String> {
        let sectors = exec::read_u64_file(&format!(
            "/sys/class/block/{}/size",
            basename(&self.device)
        ))?;
        Ok(format!("{} sectors", sectors))
    }

    fn dependency(&self, _exec: &Executor) -> Result<Option<Box<dyn Resizer>>> {
        Ok(None)
    }

    fn resize(&self, exec: &Executor) -> Result<()> {
        let disk = disk_device(&self.device)?;
        exec.vlog(&format!("Reading partition table of {} ...", disk));
        let dump = exec
            .capture("sfdisk", &["-d", &disk])
            .with_context(|| format!("dumping partition table of {}", disk))?;
        let mut pt = PartitionTable::parse(&dump)
            .with_context(|| format!("parsing partition table of {}", disk))?;
        let kind = table_kind(&pt, &disk, exec)?;

        let index = pt
            .last_data_partition_index()
            .ok_or_else(|| anyhow!("no non-empty partition found on {}", disk))?;
        let part = &pt.parts()[index];
        let part_device = part.device.clone();
        let number = part.number;
        check_partition_type(kind, part.partition_type().unwrap_or(""), &part_device)?;

        if exec.verbose {
            println!("Current partition table:\n{}", pt.render());
        }

        let disk_sectors = exec::read_u64_file(&format!("/sys/block/{}/size", basename(&disk)))?;
        let start = part.start()?;
        let size = part.size()?;
        let reserve = end_reserve_sectors(SECTOR_SIZE);
        exec.vlog(&format!(
            "Disk size: {} sectors, partition end: {}, free tail: {}",
            disk_sectors,
            start + size,
            disk_sectors.saturating_sub(start + size)
        ));
        let new_size = match grown_size(start, size, disk_sectors, reserve) {
            Some(new_size) => new_size,
            None => {
                exec.vlog("Final partition already fills the disk.");
                return Ok(());
            }
        };

        pt.part_mut(index).set_size(new_size);
        pt.remove_meta("last-lba"); // sfdisk rejects a last-lba inside the grown layout

        let new_table = pt.render();
        exec.vlog(&format!(
            "Growing {} by {} sectors.\nNew partition table:\n{}",
            part_device,
            new_size - size,
            new_table
        ));
        exec.run_gated(
            "sfdisk",
            &["-f", "--no-reread", "--no-tell-kernel", &disk],
            Some(&new_table),
        )
        .with_context(|| format!("writing new partition table to {}", disk))?;
        if exec.dry_run {
            return Ok(());
        }

        let handle = File::open(&disk).map_err(|source| GrowError::IoFailed {
            path: disk.clone(),
            source,
        })?;
        blkpg::resize_partition(&handle, start * SECTOR_SIZE, new_size * SECTOR_SIZE, number)
            .map_err(|errno| GrowError::KernelUpdateFailed {
                device: part_device,
                errno,
            })?;
        Ok(())
    }
}

/// Map a partition device to its parent disk, e.g. /dev/sda3 -> /dev/sda.
pub fn disk_device(part_device: &str) -> Result<String, GrowError> {
    let strip_digits = |s: &str| s.trim_end_matches(|c: char| c.is_ascii_digit()).to_string();

    if part_device.starts_with("/dev/sd") || part_device.starts_with("/dev/vd") {
        return Ok(strip_digits(part_device));
    }
    if part_device.starts_with("/dev/mmcblk") {
        let trimmed = strip_digits(part_device);
        return Ok(trimmed.strip_suffix('p').unwrap_or(&trimmed).to_string());
    }
    if part_device.starts_with("/dev/nvme") {
        let trimmed = strip_digits(part_device);
        if trimmed.len() < part_device.len() {
            if let Some(disk) = trimmed.strip_suffix('p') {
                return Ok(disk.to_string());
            }
        }
        return Err(GrowError::UnsupportedDevicePath(part_device.to_string()));
    }
    Err(GrowError::UnsupportedDevicePath(part_device.to_string()))
}

/// Decide whether the table is MBR or GPT.
///
/// Old sfdisk omits the `label` metadata line; ask blkid then, and only
/// trust `dos` — an sfdisk too old to print the label is also too old to
/// be allowed near a GPT table.
fn table_kind(pt: &PartitionTable, disk: &str, exec: &Executor) -> Result<TableKind> {
    match pt.meta("label") {
        Some("dos") => Ok(TableKind::Mbr),
        Some("gpt") => Ok(TableKind::Gpt),
        Some(label) => Err(GrowError::UnsupportedPartitionTable {
            disk: disk.to_string(),
            label: label.to_string(),
        }
        .into()),
        None => {
            let out = exec
                .capture("blkid", &["-o", "export", disk])
                .with_context(|| format!("probing partition table type of {}", disk))?;
            match blkid_pttype(&out) {
                Some("dos") => Ok(TableKind::Mbr),
                Some(other) => Err(GrowError::UnsupportedPartitionTable {
                    disk: disk.to_string(),
                    label: other.to_string(),
                }
                .into()),
                None => Err(anyhow!("blkid -o export {} lacked a PTTYPE line", disk)),
            }
        }
    }
}

/// PTTYPE value from `blkid -o export` output.
fn blkid_pttype(output: &str) -> Option<&str> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("PTTYPE="))
        .map(str::trim)
}

/// Only grow partition types known to hold Linux data or an LVM PV.
fn check_partition_type(kind: TableKind, part_type: &str, device: &str) -> Result<(), GrowError> {
    let known = match kind {
        TableKind::Gpt => matches!(
            part_type,
            GPT_TYPE_LVM | GPT_TYPE_ROOT_X86_64 | GPT_TYPE_LINUX_FS
        ),
        TableKind::Mbr => part_type == "83",
    };
    if known {
        Ok(())
    } else {
        Err(GrowError::UnknownPartitionType {
            table: match kind {
                TableKind::Gpt => "GPT",
                TableKind::Mbr => "MBR",
            },
            part_type: part_type.to_string(),
            device: device.to_string(),
        })
    }
}

/// New size for the final partition, or None when the free tail does
/// not exceed the end reserve. The grown partition ends exactly
/// `reserve` sectors before the end of the disk.
fn grown_size(start: u64, size: u64, disk_sectors: u64, reserve: u64) -> Option<u64> {
    let end = start + size;
    let remain = disk_sectors.saturating_sub(end);
    if remain <= reserve {
        return None;
    }
    Some(size + (remain - reserve))
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
