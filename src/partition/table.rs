//! In-memory model of an `sfdisk -d` partition table dump.

use crate::error::GrowError;

/// One partition row of a dump, e.g.
/// `/dev/sda1 : start=2048, size=497664, type=83, bootable`.
///
/// Attributes keep their textual `key=value` (or bare flag) form so a
/// rewritten table preserves everything sfdisk printed. `number` is the
/// 1-based position of the row in the dump, which is what the kernel's
/// partition-change ioctl expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionEntry {
    pub device: String,
    pub number: u32,
    attrs: Vec<String>,
}

impl PartitionEntry {
    /// Attribute value for `key`, or the key itself for bare flags
    /// (`attr("bootable") == Some("bootable")`).
    pub fn attr(&self, key: &str) -> Option<&str> {
        for attr in &self.attrs {
            if attr == key {
                return Some(attr);
            }
            if let Some(value) = attr.strip_prefix(key) {
                if let Some(value) = value.strip_prefix('=') {
                    return Some(value);
                }
            }
        }
        None
    }

    pub fn attr_u64(&self, key: &'static str) -> Result<u64, GrowError> {
        let value = self.attr(key).ok_or(GrowError::ParseFailed {
            what: key,
            input: self.render(),
        })?;
        value.parse().map_err(|_| GrowError::ParseFailed {
            what: key,
            input: value.to_string(),
        })
    }

    /// Partition type: newer sfdisk prints `type=...`, util-linux 2.23
    /// era sfdisk prints `Id=...`.
    pub fn partition_type(&self) -> Option<&str> {
        self.attr("type").or_else(|| self.attr("Id"))
    }

    pub fn start(&self) -> Result<u64, GrowError> {
        self.attr_u64("start")
    }

    pub fn size(&self) -> Result<u64, GrowError> {
        self.attr_u64("size")
    }

    /// Replace the `size=` attribute in place.
    pub fn set_size(&mut self, size: u64) {
        for attr in &mut self.attrs {
            if attr.starts_with("size=") {
                *attr = format!("size={}", size);
                return;
            }
        }
        self.attrs.push(format!("size={}", size));
    }

    /// A row is empty when type, start and size are all zero. Some
    /// sfdisk versions emit such placeholder rows for unused MBR slots.
    fn is_empty(&self) -> bool {
        self.partition_type().unwrap_or("") == "0"
            && self.attr("start").unwrap_or("") == "0"
            && self.attr("size").unwrap_or("") == "0"
    }

    fn render(&self) -> String {
        format!("{} : {}", self.device, self.attrs.join(", "))
    }
}

/// Parsed `sfdisk -d` output: metadata lines, then partition rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTable {
    meta: Vec<String>,
    parts: Vec<PartitionEntry>,
}

impl PartitionTable {
    /// Parse a dump. Lines before the first blank line are metadata;
    /// every later non-blank line is a partition row. Fails when the
    /// dump contains no partition rows at all.
    pub fn parse(dump: &str) -> Result<Self, GrowError> {
        let mut meta = Vec::new();
        let mut parts: Option<Vec<PartitionEntry>> = None;
        for line in dump.lines() {
            let line = line.trim();
            if line.is_empty() {
                parts.get_or_insert_with(Vec::new);
                continue;
            }
            match &mut parts {
                None => meta.push(line.to_string()),
                Some(parts) => {
                    let (device, rest) =
                        line.split_once(':').ok_or_else(|| GrowError::ParseFailed {
                            what: "sfdisk partition row",
                            input: line.to_string(),
                        })?;
                    let attrs = rest
                        .split(',')
                        .map(|attr| normalize_attr(attr.trim()))
                        .collect();
                    parts.push(PartitionEntry {
                        device: device.trim().to_string(),
                        number: parts.len() as u32 + 1,
                        attrs,
                    });
                }
            }
        }
        let parts = parts.unwrap_or_default();
        if parts.is_empty() {
            return Err(GrowError::ParseFailed {
                what: "sfdisk dump with no partition rows",
                input: dump.trim().to_string(),
            });
        }
        Ok(Self { meta, parts })
    }

    /// Metadata value for `key`, e.g. `meta("label") == Some("gpt")`.
    pub fn meta(&self, key: &str) -> Option<&str> {
        for row in &self.meta {
            if let Some(value) = row.strip_prefix(key) {
                if let Some(value) = value.strip_prefix(':') {
                    return Some(value.trim());
                }
            }
        }
        None
    }

    /// Drop a metadata row. Used for `last-lba`, which sfdisk refuses
    /// when the partition layout extends past the old disk end.
    pub fn remove_meta(&mut self, key: &str) {
        self.meta
            .retain(|row| !(row.starts_with(key) && row[key.len()..].starts_with(':')));
    }

    pub fn parts(&self) -> &[PartitionEntry] {
        &self.parts
    }

    pub fn part_mut(&mut self, index: usize) -> &mut PartitionEntry {
        &mut self.parts[index]
    }

    /// Index of the highest row that is not an empty placeholder.
    pub fn last_data_partition_index(&self) -> Option<usize> {
        self.parts.iter().rposition(|part| !part.is_empty())
    }

    /// Serialise back into the format `sfdisk` accepts on stdin.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for row in &self.meta {
            out.push_str(row);
            out.push('\n');
        }
        out.push('\n');
        for part in &self.parts {
            out.push_str(&part.render());
            out.push('\n');
        }
        out
    }
}

/// Collapse the whitespace sfdisk pads around `=` in columns like
/// `start=        2048`.
fn normalize_attr(attr: &str) -> String {
    match attr.split_once('=') {
        Some((key, value)) => format!("{}={}", key.trim_end(), value.trim_start()),
        None => attr.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPT_DUMP: &str = "\
label: gpt
label-id: 841DBE6B-6A8D-43E1-93E1-D765373DDE3B
device: /dev/sda
unit: sectors
first-lba: 34
last-lba: 10485726

/dev/sda1 : start=        2048, size=      192512, type=21686148-6449-6E6F-744E-656564454649, uuid=D7F261B7-9D9A-4864-AB85-A68ED9CD7CF0
/dev/sda2 : start=      194560, size=      391168, type=0FC63DAF-8483-4772-8E79-3D69D8477DE4, uuid=B3EB025F-F682-4FE4-8F97-96974ADFD3BF
/dev/sda3 : start=      585728, size=     9897984, type=E6D6D379-F507-44C2-A23C-238F2A3DF928, uuid=654CE2C8-5871-4DBE-A829-F3C4D953BBB9
";

    const MBR_DUMP: &str = "\
label: dos
label-id: 0xeba7536a
device: /dev/sda
unit: sectors

/dev/sda1 : start=        2048, size=      497664, type=83, bootable
/dev/sda2 : start=      501758, size=   209211394, type=5
/dev/sda5 : start=      501760, size=   209211392, type=83
";

    #[test]
    fn test_parse_gpt_dump() {
        let table = PartitionTable::parse(GPT_DUMP).unwrap();
        assert_eq!(table.meta("label"), Some("gpt"));
        assert_eq!(table.meta("last-lba"), Some("10485726"));
        assert_eq!(table.parts().len(), 3);

        let last = &table.parts()[2];
        assert_eq!(last.device, "/dev/sda3");
        assert_eq!(last.number, 3);
        assert_eq!(last.start().unwrap(), 585728);
        assert_eq!(last.size().unwrap(), 9897984);
        assert_eq!(
            last.partition_type(),
            Some("E6D6D379-F507-44C2-A23C-238F2A3DF928")
        );
    }

    #[test]
    fn test_parse_mbr_dump() {
        let table = PartitionTable::parse(MBR_DUMP).unwrap();
        assert_eq!(table.meta("label"), Some("dos"));
        assert_eq!(table.parts()[0].attr("bootable"), Some("bootable"));
        // Logical partition /dev/sda5 is the third row of the dump.
        assert_eq!(table.parts()[2].number, 3);
        assert_eq!(table.parts()[2].partition_type(), Some("83"));
    }

    #[test]
    fn test_round_trip() {
        for dump in [GPT_DUMP, MBR_DUMP] {
            let table = PartitionTable::parse(dump).unwrap();
            let again = PartitionTable::parse(&table.render()).unwrap();
            assert_eq!(table, again);
        }
    }

    #[test]
    fn test_id_attribute_fallback() {
        // util-linux 2.23 sfdisk uses Id= instead of type=.
        let dump = "\
unit: sectors

/dev/sda1 : start=     2048, size=  10481664, Id=83
";
        let table = PartitionTable::parse(dump).unwrap();
        assert_eq!(table.parts()[0].partition_type(), Some("83"));
    }

    #[test]
    fn test_last_data_partition_skips_zero_rows() {
        let dump = "\
unit: sectors

/dev/sda1 : start=     2048, size=  10481664, Id=83
/dev/sda2 : start=        0, size=         0, Id= 0
/dev/sda3 : start=        0, size=         0, Id= 0
/dev/sda4 : start=        0, size=         0, Id= 0
";
        let table = PartitionTable::parse(dump).unwrap();
        assert_eq!(table.last_data_partition_index(), Some(0));
    }

    #[test]
    fn test_set_size_and_remove_meta() {
        let mut table = PartitionTable::parse(GPT_DUMP).unwrap();
        let index = table.last_data_partition_index().unwrap();
        table.part_mut(index).set_size(12345678);
        table.remove_meta("last-lba");

        let rendered = table.render();
        assert!(rendered.contains("size=12345678"));
        assert!(!rendered.contains("last-lba"));
        // Unrelated rows survive untouched.
        assert!(rendered.contains("label-id: 841DBE6B-6A8D-43E1-93E1-D765373DDE3B"));
        assert!(rendered.contains("uuid=D7F261B7-9D9A-4864-AB85-A68ED9CD7CF0"));
    }

    #[test]
    fn test_empty_dump_is_rejected() {
        assert!(PartitionTable::parse("label: dos\n\n").is_err());
        assert!(PartitionTable::parse("").is_err());
    }
}
