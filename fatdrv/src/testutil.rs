//! Shared test helpers: image construction and the `fatfs` oracle.
//!
//! `fatfs` acts as an independent reference implementation: images it
//! formats must mount here, and volumes this driver writes must read back
//! identically through it.

use std::io::{Cursor, Read, Write};
use std::string::String;
use std::vec::Vec;

use alloc::rc::Rc;

use crate::block::{MemDisk, Partition};
use crate::fs::FatFileSystem;

/// Format an in-memory image with `fatfs` and wrap it as a `MemDisk`.
pub(crate) fn fatfs_disk(size: usize, fat_type: fatfs::FatType) -> MemDisk {
    let mut cursor = Cursor::new(vec![0u8; size]);
    fatfs::format_volume(
        &mut cursor,
        fatfs::FormatVolumeOptions::new().fat_type(fat_type),
    )
    .expect("format_volume failed");
    MemDisk::from_vec(512, cursor.into_inner())
}

/// Mount a whole-device partition over the disk.
pub(crate) fn mounted(disk: Rc<MemDisk>) -> FatFileSystem {
    FatFileSystem::mount(Partition::whole_device(disk)).expect("mount failed")
}

pub(crate) fn oracle_write_file(disk: &MemDisk, path: &str, content: &[u8]) {
    disk.with_bytes_mut(|image| {
        let fs = fatfs::FileSystem::new(Cursor::new(image), fatfs::FsOptions::new()).unwrap();
        let mut f = fs.root_dir().create_file(path).unwrap();
        f.truncate().unwrap();
        f.write_all(content).unwrap();
    });
}

pub(crate) fn oracle_create_dir(disk: &MemDisk, path: &str) {
    disk.with_bytes_mut(|image| {
        let fs = fatfs::FileSystem::new(Cursor::new(image), fatfs::FsOptions::new()).unwrap();
        fs.root_dir().create_dir(path).unwrap();
    });
}

pub(crate) fn oracle_read_file(disk: &MemDisk, path: &str) -> Vec<u8> {
    disk.with_bytes_mut(|image| {
        let fs = fatfs::FileSystem::new(Cursor::new(image), fatfs::FsOptions::new()).unwrap();
        let mut f = fs.root_dir().open_file(path).unwrap();
        let mut out = Vec::new();
        f.read_to_end(&mut out).unwrap();
        out
    })
}

/// `(name, is_dir)` for every entry the oracle sees in a directory.
/// `path` empty means the root.
pub(crate) fn oracle_list(disk: &MemDisk, path: &str) -> Vec<(String, bool)> {
    disk.with_bytes_mut(|image| {
        let fs = fatfs::FileSystem::new(Cursor::new(image), fatfs::FsOptions::new()).unwrap();
        let root = fs.root_dir();
        let dir = if path.is_empty() { root } else { root.open_dir(path).unwrap() };
        dir.iter()
            .map(|e| {
                let e = e.unwrap();
                (e.file_name(), e.is_dir())
            })
            .filter(|(name, _)| name != "." && name != "..")
            .collect()
    })
}
