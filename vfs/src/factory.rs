//! Filesystem detection. Each factory knows how to recognize and mount
//! one filesystem type; the router tries them in registration order.

use fatdrv::{FatFileSystem, FsError, Partition};

/// A concrete mounted filesystem. Closed on purpose: routing dispatches
/// over this enum, not over trait objects, so adding a filesystem type is
/// an explicit change here.
pub enum Filesystem {
    Fat(FatFileSystem),
}

pub trait FilesystemFactory {
    fn name(&self) -> &'static str;
    /// Cheap signature sniff; must not mutate the partition.
    fn probe(&self, partition: &Partition) -> bool;
    fn create(&self, partition: Partition) -> Result<Filesystem, FsError>;
}

pub struct FatFactory;

impl FilesystemFactory for FatFactory {
    fn name(&self) -> &'static str {
        "fat"
    }

    fn probe(&self, partition: &Partition) -> bool {
        FatFileSystem::probe(partition)
    }

    fn create(&self, partition: Partition) -> Result<Filesystem, FsError> {
        Ok(Filesystem::Fat(FatFileSystem::mount(partition)?))
    }
}
