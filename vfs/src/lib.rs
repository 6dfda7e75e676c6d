//! Volume routing over the FAT driver.
//!
//! A [`Vfs`] owns a set of mounted volumes and resolves `N:\dir\file`
//! paths against them. Disks are probed through pluggable
//! [`FilesystemFactory`] implementations; the set of concrete filesystem
//! types behind a mount is the closed [`Filesystem`] enum.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod error;
mod factory;
mod path;
mod router;

pub use error::VfsError;
pub use factory::{FatFactory, Filesystem, FilesystemFactory};
pub use router::{Vfs, VolumeInfo};
