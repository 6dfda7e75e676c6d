use core::fmt;

use fatdrv::FsError;

/// Routing-level failures. Driver errors that have a direct routing
/// meaning are lifted into their own variants; the rest pass through as
/// [`VfsError::Fs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    /// No mounted volume matches the path's `N:` prefix, or no factory
    /// recognizes the partition.
    UnknownVolume,
    /// A path component does not exist.
    NotFound,
    /// A non-final path component resolved to a file.
    NotADirectory,
    /// The operation needs a file but the path names a directory.
    NotAFile,
    /// Non-recursive delete of a directory that still has entries.
    DirectoryNotEmpty,
    AlreadyExists,
    /// Missing volume prefix, or a `.`/`..` component.
    InvalidPath,
    Fs(FsError),
}

impl From<FsError> for VfsError {
    fn from(err: FsError) -> Self {
        match err {
            FsError::AlreadyExists => VfsError::AlreadyExists,
            FsError::NotAFile => VfsError::NotAFile,
            other => VfsError::Fs(other),
        }
    }
}

impl fmt::Display for VfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VfsError::UnknownVolume => write!(f, "unknown volume"),
            VfsError::NotFound => write!(f, "no such file or directory"),
            VfsError::NotADirectory => write!(f, "path component is not a directory"),
            VfsError::NotAFile => write!(f, "not a file"),
            VfsError::DirectoryNotEmpty => write!(f, "directory not empty"),
            VfsError::AlreadyExists => write!(f, "already exists"),
            VfsError::InvalidPath => write!(f, "invalid path"),
            VfsError::Fs(err) => write!(f, "filesystem error: {err}"),
        }
    }
}
