//! FAT12/16/32 block-device filesystem driver.
//!
//! All disk I/O goes through the [`block::BlockDevice`] trait, so the driver
//! runs against real disks, partitions of them, or the in-memory
//! [`block::MemDisk`] used by the tests. The crate is `no_std` + `alloc`
//! outside of tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block;
pub mod dir;
pub mod fat;
pub mod format;
pub mod fs;
pub mod mbr;
pub mod stream;

mod error;

#[cfg(test)]
pub(crate) mod testutil;

pub use block::{BlockDevice, MemDisk, Partition};
pub use dir::{DirEntry, EntryKind, FileAttributes};
pub use error::FsError;
pub use fat::Fat;
pub use format::{FormatOptions, format_volume};
pub use fs::{DirStorage, FatFileSystem, FatGeometry, FatType};
pub use stream::{FatStream, SeekFrom};
