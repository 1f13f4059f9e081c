use thiserror::Error;

/// Errors produced while discovering and growing storage layers.
#[derive(Debug, Error)]
pub enum GrowError {
    #[error("mount point {0} not found")]
    MountNotFound(String),

    #[error("unsupported filesystem type {0:?}")]
    UnsupportedFilesystem(String),

    #[error("unsupported partition table type {label:?} on {disk}")]
    UnsupportedPartitionTable { disk: String, label: String },

    #[error("unsupported partition device path {0:?}")]
    UnsupportedDevicePath(String),

    #[error("don't know how to grow block device {0:?}")]
    UnrecognisedBlockDevice(String),

    #[error("unknown {table} partition type {part_type:?} for {device}")]
    UnknownPartitionType {
        table: &'static str,
        part_type: String,
        device: String,
    },

    #[error("{program} {args:?} exited with code {code}: {stderr}")]
    ExternalToolFailed {
        program: String,
        args: Vec<String>,
        code: i32,
        stderr: String,
    },

    #[error("reading {path}: {source}")]
    IoFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing {what} from {input:?}")]
    ParseFailed { what: &'static str, input: String },

    #[error("updating kernel partition table on {device}: {errno}")]
    KernelUpdateFailed {
        device: String,
        errno: nix::errno::Errno,
    },
}
