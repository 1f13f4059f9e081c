//! LVM logical- and physical-volume growers.

use anyhow::{Context, Result};

use crate::engine::Resizer;
use crate::error::GrowError;
use crate::exec::{self, Executor};
use crate::partition::PartitionResizer;

/// Grows a logical volume into the free extents of its volume group.
pub struct LvResizer {
    pub device: String,
}

#[derive(Debug)]
struct LvState {
    volume_group: String,
    sectors: u64,
}

impl LvResizer {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }

    fn read_state(&self, exec: &Executor) -> Result<LvState> {
        let out = exec
            .capture("lvdisplay", &["-c", &self.device])
            .with_context(|| format!("querying LV {}", self.device))?;
        Ok(parse_lvdisplay(&out)?)
    }
}

impl Resizer for LvResizer {
    fn label(&self) -> String {
        format!("LVM LV {}", self.device)
    }

    fn state(&self, exec: &Executor) -> Result<String> {
        let state = self.read_state(exec)?;
        Ok(format!("sectors={}", state.sectors))
    }

    fn resize(&self, exec: &Executor) -> Result<()> {
        let output = exec.output("lvextend", &["-l", "+100%FREE", &self.device])?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("matches existing size") {
            // The LV already spans the whole VG; lvextend treats that as
            // an error, we treat it as nothing to do.
            return Ok(());
        }
        Err(exec::tool_failure("lvextend", &["-l", "+100%FREE", &self.device], &output).into())
    }

    fn dependency(&self, exec: &Executor) -> Result<Option<Box<dyn Resizer>>> {
        let state = self.read_state(exec)?;
        let out = exec
            .capture("pvdisplay", &["-c"])
            .context("listing LVM physical volumes")?;
        // A VG can span several PVs; growing only the first is a known
        // limitation, matching the single-disk VM layouts this tool is for.
        match find_pv_for_group(&out, &state.volume_group) {
            Some(device) => Ok(Some(Box::new(PvResizer::new(device)))),
            None => Ok(None),
        }
    }
}

/// Grows a physical volume to fill its backing block device.
pub struct PvResizer {
    pub device: String,
}

impl PvResizer {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl Resizer for PvResizer {
    fn label(&self) -> String {
        format!("LVM PV {}", self.device)
    }

    fn state(&self, exec: &Executor) -> Result<String> {
        let out = exec
            .capture("pvdisplay", &["-c", &self.device])
            .with_context(|| format!("querying PV {}", self.device))?;
        let sectors = parse_pv_sectors(&out)?;
        Ok(format!("sectors={}", sectors))
    }

    fn resize(&self, exec: &Executor) -> Result<()> {
        let output = exec.output("pvresize", &[&self.device])?;
        if !output.status.success() {
            return Err(exec::tool_failure("pvresize", &[&self.device], &output).into());
        }
        Ok(())
    }

    fn dependency(&self, _exec: &Executor) -> Result<Option<Box<dyn Resizer>>> {
        if device_ends_in_digit(&self.device) {
            Ok(Some(Box::new(PartitionResizer::new(self.device.clone()))))
        } else {
            // A whole-disk PV has no partition table below it.
            Ok(None)
        }
    }
}

pub fn device_ends_in_digit(device: &str) -> bool {
    device.chars().last().is_some_and(|c| c.is_ascii_digit())
}

/// Parse one line of `lvdisplay -c` output, e.g.
/// `  /dev/debvg/root:debvg:3:1:-1:1:8434778112:1029636:-1:0:-1:254:0`.
fn parse_lvdisplay(output: &str) -> Result<LvState, GrowError> {
    let line = output.trim();
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 13 {
        return Err(GrowError::ParseFailed {
            what: "lvdisplay -c output",
            input: line.to_string(),
        });
    }
    let sectors = fields[6].parse().map_err(|_| GrowError::ParseFailed {
        what: "LV sector count",
        input: fields[6].to_string(),
    })?;
    Ok(LvState {
        volume_group: fields[1].to_string(),
        sectors,
    })
}

/// Sector count (third `:` field) of a `pvdisplay -c <dev>` line,
/// reported verbatim.
fn parse_pv_sectors(output: &str) -> Result<&str, GrowError> {
    let line = output.trim();
    let mut fields = line.split(':');
    match (fields.next(), fields.next(), fields.next()) {
        (Some(_), Some(_), Some(sectors)) => Ok(sectors),
        _ => Err(GrowError::ParseFailed {
            what: "pvdisplay -c output",
            input: line.to_string(),
        }),
    }
}

/// Device of the first `pvdisplay -c` row belonging to `volume_group`.
fn find_pv_for_group(output: &str, volume_group: &str) -> Option<String> {
    for line in output.lines() {
        let fields: Vec<&str> = line.trim().split(':').collect();
        if fields.len() >= 2 && fields[1] == volume_group {
            return Some(fields[0].to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const LVDISPLAY: &str =
        "  /dev/debvg/root:debvg:3:1:-1:1:8434778112:1029636:-1:0:-1:254:0\n";

    const PVDISPLAY: &str = "\
  /dev/sda3:debvg:41932800:10239:10239:0:allocatable:-1:-1:4096:5119:ICpiqu-QbFk-8kFm-D0Nr-1rrK-9SQb-Bi2cL7
  /dev/sdb1:othervg:20966400:5119:5119:0:allocatable:-1:-1:4096:2559:M2qgmG-AaBb-CcDd-EeFf-GgHh-IiJj-KkLlMm
";

    #[test]
    fn test_parse_lvdisplay() {
        let state = parse_lvdisplay(LVDISPLAY).unwrap();
        assert_eq!(state.volume_group, "debvg");
        assert_eq!(state.sectors, 8434778112);
    }

    #[test]
    fn test_parse_lvdisplay_too_few_fields() {
        let err = parse_lvdisplay("/dev/debvg/root:debvg:3\n").unwrap_err();
        assert!(matches!(err, GrowError::ParseFailed { .. }));
    }

    #[test]
    fn test_parse_pv_sectors() {
        assert_eq!(parse_pv_sectors("  /dev/sda3:debvg:41932800:10239\n").unwrap(), "41932800");
        assert!(parse_pv_sectors("/dev/sda3:debvg\n").is_err());
    }

    #[test]
    fn test_find_pv_for_group() {
        assert_eq!(
            find_pv_for_group(PVDISPLAY, "debvg"),
            Some("/dev/sda3".to_string())
        );
        assert_eq!(
            find_pv_for_group(PVDISPLAY, "othervg"),
            Some("/dev/sdb1".to_string())
        );
        assert_eq!(find_pv_for_group(PVDISPLAY, "missing"), None);
    }

    #[test]
    fn test_device_ends_in_digit() {
        assert!(device_ends_in_digit("/dev/sda3"));
        assert!(device_ends_in_digit("/dev/nvme0n1p2"));
        assert!(!device_ends_in_digit("/dev/sdb"));
        assert!(!device_ends_in_digit(""));
    }
}
