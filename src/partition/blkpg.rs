//! Kernel partition-table updates via the BLKPG ioctl.
//!
//! The grown partition stays mounted while its table entry changes, so
//! asking the kernel to re-read the whole table would fail with EBUSY.
//! `BLKPG_RESIZE_PARTITION` instead updates the one entry in place,
//! which is legal while the partition is in use.

use std::ffi::c_void;
use std::fs::File;
use std::os::fd::AsRawFd;

use nix::libc::{c_char, c_int, c_longlong};

const BLKPG_DEVNAMELTH: usize = 64;
const BLKPG_VOLNAMELTH: usize = 64;

const BLKPG_RESIZE_PARTITION: c_int = 3;

#[repr(C)]
struct BlkpgPartition {
    start: c_longlong,
    length: c_longlong,
    pno: c_int,
    devname: [c_char; BLKPG_DEVNAMELTH],
    volname: [c_char; BLKPG_VOLNAMELTH],
}

#[repr(C)]
struct BlkpgIoctlArg {
    op: c_int,
    flags: c_int,
    datalen: c_int,
    data: *const c_void,
}

// Both layouts are fixed by the kernel ABI.
const _: () = assert!(std::mem::size_of::<BlkpgPartition>() == 152);
#[cfg(target_pointer_width = "64")]
const _: () = assert!(std::mem::size_of::<BlkpgIoctlArg>() == 24);

nix::ioctl_write_ptr_bad!(
    blkpg_ioctl,
    nix::request_code_none!(0x12, 105),
    BlkpgIoctlArg
);

/// Tell the running kernel that a partition's end moved.
///
/// `start_bytes` and `length_bytes` are byte offsets on the whole disk,
/// `number` the 1-based partition number from the table dump. The open
/// `disk` handle is the parent block device, not the partition.
pub fn resize_partition(
    disk: &File,
    start_bytes: u64,
    length_bytes: u64,
    number: u32,
) -> nix::Result<()> {
    let partition = BlkpgPartition {
        start: start_bytes as c_longlong,
        length: length_bytes as c_longlong,
        pno: number as c_int,
        devname: [0; BLKPG_DEVNAMELTH],
        volname: [0; BLKPG_VOLNAMELTH],
    };
    let arg = BlkpgIoctlArg {
        op: BLKPG_RESIZE_PARTITION,
        flags: 0,
        datalen: std::mem::size_of::<BlkpgPartition>() as c_int,
        data: &partition as *const _ as *const c_void,
    };
    unsafe { blkpg_ioctl(disk.as_raw_fd(), &arg)? };
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_blkpg_request_code() {
        assert_eq!(nix::request_code_none!(0x12, 105), 0x1269);
    }
}
