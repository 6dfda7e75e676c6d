use core::fmt;

/// Driver-level failure classes.
///
/// Device errors (`BufferSize`, `OutOfRange`) and format errors
/// (`BadSignature`, `CorruptVolume`, `NoFreeClusters`) are fatal for the
/// operation that hit them; nothing in the driver retries. The name and
/// directory errors are validation failures the caller can recover from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// Buffer length does not equal `count * block_size`.
    BufferSize { expected: usize, got: usize },
    /// Block range falls outside the device or partition.
    OutOfRange,
    /// Sector is missing the 0xAA55 boot signature.
    BadSignature,
    /// On-disk structure describes an impossible volume or a broken chain.
    CorruptVolume,
    /// The allocation table has no free entry left.
    NoFreeClusters,
    /// Name is empty, reserved, or contains characters that cannot be stored.
    InvalidName,
    /// Name exceeds the 255 UTF-16-unit long-name limit.
    NameTooLong,
    /// An entry with this name already exists in the directory.
    AlreadyExists,
    /// The fixed-size root region has no free record run left.
    DirectoryFull,
    /// The entry is not an openable file (a directory, or the root).
    NotAFile,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::BufferSize { expected, got } => {
                write!(f, "buffer size {got} does not match transfer size {expected}")
            }
            FsError::OutOfRange => write!(f, "block range outside device bounds"),
            FsError::BadSignature => write!(f, "missing 0xAA55 boot signature"),
            FsError::CorruptVolume => write!(f, "corrupt volume structure"),
            FsError::NoFreeClusters => write!(f, "no free clusters left"),
            FsError::InvalidName => write!(f, "invalid file name"),
            FsError::NameTooLong => write!(f, "file name too long"),
            FsError::AlreadyExists => write!(f, "entry already exists"),
            FsError::DirectoryFull => write!(f, "directory has no free entry slots"),
            FsError::NotAFile => write!(f, "entry is not a file"),
        }
    }
}
