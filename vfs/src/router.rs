//! The mount table and path-based operations.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;

use fatdrv::dir::short_name_text;
use fatdrv::mbr::{self, MbrSlot};
use fatdrv::{
    BlockDevice, DirEntry, EntryKind, FatFileSystem, FatStream, FileAttributes, FormatOptions,
    Partition,
};

use crate::factory::{FatFactory, Filesystem, FilesystemFactory};
use crate::path;
use crate::VfsError;

struct MountPoint {
    fs: Filesystem,
    partition: Partition,
}

/// Aggregate numbers for one mounted volume. Used space is computed by
/// walking the directory tree at call time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeInfo {
    pub index: usize,
    pub filesystem: &'static str,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

/// One routing instance. Mount state lives here and nowhere else; two
/// `Vfs` values are fully independent.
pub struct Vfs {
    factories: Vec<Box<dyn FilesystemFactory>>,
    mounts: Vec<MountPoint>,
}

impl Default for Vfs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vfs {
    /// A router with the FAT factory registered.
    pub fn new() -> Self {
        Self { factories: vec![Box::new(FatFactory)], mounts: Vec::new() }
    }

    pub fn register_factory(&mut self, factory: Box<dyn FilesystemFactory>) {
        self.factories.push(factory);
    }

    pub fn volume_count(&self) -> usize {
        self.mounts.len()
    }

    // ─── Mounting ──────────────────────────────────────────────────────────────

    /// Mount one partition. Volume indices are assigned in mount order
    /// and never reused within a `Vfs`.
    pub fn mount_partition(&mut self, partition: Partition) -> Result<usize, VfsError> {
        let fs = self.probe_factories(&partition)?;
        let index = self.mounts.len();
        self.mounts.push(MountPoint { fs, partition });
        log::info!("mounted volume {index}");
        Ok(index)
    }

    /// Mount everything on a disk: each primary slot of its partition
    /// table, or the whole device when the disk is unpartitioned.
    ///
    /// Extended-partition slots point at an EBR chain and are skipped.
    /// A slot that fails to mount is logged and skipped, it does not
    /// fail the others.
    pub fn mount_disk(&mut self, disk: Rc<dyn BlockDevice>) -> Result<Vec<usize>, VfsError> {
        let mut sector0 = vec![0u8; disk.block_size()];
        disk.read_blocks(0, 1, &mut sector0)?;

        let mut mounted = Vec::new();
        if let Ok(slots) = mbr::parse_partition_table(&sector0) {
            for slot in slots {
                match slot {
                    MbrSlot::Primary(entry) => {
                        let result = Partition::new(
                            disk.clone(),
                            entry.start_sector as u64,
                            entry.sector_count as u64,
                        )
                        .map_err(VfsError::from)
                        .and_then(|p| self.mount_partition(p));
                        match result {
                            Ok(index) => mounted.push(index),
                            Err(err) => log::warn!(
                                "skipping partition id {:#04x}: {err}",
                                entry.system_id
                            ),
                        }
                    }
                    MbrSlot::ExtendedPointer { ebr_sector, .. } => {
                        log::debug!("extended partition chain at sector {ebr_sector} skipped");
                    }
                }
            }
        }
        // a FAT boot sector carries the same 0xAA55 signature with an
        // empty slot area, so an unpartitioned volume lands here
        if mounted.is_empty() {
            mounted.push(self.mount_partition(Partition::whole_device(disk))?);
        }
        Ok(mounted)
    }

    /// Reformat a mounted volume in place and remount it. Its index is
    /// kept; everything on it is lost.
    pub fn format_volume(&mut self, volume: usize, options: &FormatOptions) -> Result<(), VfsError> {
        let partition = self
            .mounts
            .get(volume)
            .ok_or(VfsError::UnknownVolume)?
            .partition
            .clone();
        fatdrv::format_volume(&partition, options)?;
        self.mounts[volume].fs = self.probe_factories(&partition)?;
        Ok(())
    }

    fn probe_factories(&self, partition: &Partition) -> Result<Filesystem, VfsError> {
        for factory in &self.factories {
            if factory.probe(partition) {
                log::debug!("partition matches {}", factory.name());
                return Ok(factory.create(partition.clone())?);
            }
        }
        Err(VfsError::UnknownVolume)
    }

    fn fat_mut(&mut self, volume: usize) -> Result<&mut FatFileSystem, VfsError> {
        let mount = self.mounts.get_mut(volume).ok_or(VfsError::UnknownVolume)?;
        let Filesystem::Fat(fs) = &mut mount.fs;
        Ok(fs)
    }

    // ─── Resolution ────────────────────────────────────────────────────────────

    fn lookup(&mut self, path: &str) -> Result<(usize, DirEntry), VfsError> {
        let parsed = path::parse(path)?;
        let fs = self.fat_mut(parsed.volume)?;
        let mut entry = fs.root_entry();
        for component in &parsed.components {
            if !entry.is_dir() {
                return Err(VfsError::NotADirectory);
            }
            entry = find_child(fs, &entry, component)?.ok_or(VfsError::NotFound)?;
        }
        Ok((parsed.volume, entry))
    }

    /// Resolve the parent directory of a path, creating missing
    /// intermediate directories along the way, and return it with the
    /// leaf name.
    fn ensure_parent<'p>(
        &mut self,
        path: &'p str,
    ) -> Result<(usize, DirEntry, &'p str), VfsError> {
        let parsed = path::parse(path)?;
        let (leaf, dirs) = parsed.components.split_last().ok_or(VfsError::InvalidPath)?;
        let fs = self.fat_mut(parsed.volume)?;
        let mut dir = fs.root_entry();
        for component in dirs {
            dir = match find_child(fs, &dir, component)? {
                Some(entry) if entry.is_dir() => entry,
                Some(_) => return Err(VfsError::NotADirectory),
                None => fs.create_entry(&dir, component, EntryKind::Directory)?,
            };
        }
        Ok((parsed.volume, dir, *leaf))
    }

    // ─── Operations ────────────────────────────────────────────────────────────

    pub fn create_file(&mut self, path: &str) -> Result<(), VfsError> {
        let (volume, parent, leaf) = self.ensure_parent(path)?;
        let fs = self.fat_mut(volume)?;
        fs.create_entry(&parent, leaf, EntryKind::File)?;
        Ok(())
    }

    pub fn create_directory(&mut self, path: &str) -> Result<(), VfsError> {
        let (volume, parent, leaf) = self.ensure_parent(path)?;
        let fs = self.fat_mut(volume)?;
        fs.create_entry(&parent, leaf, EntryKind::Directory)?;
        Ok(())
    }

    pub fn read_directory(&mut self, path: &str) -> Result<Vec<DirEntry>, VfsError> {
        let (volume, entry) = self.lookup(path)?;
        if !entry.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        Ok(self.fat_mut(volume)?.list_directory(&entry)?)
    }

    /// Delete a file: mark its records deleted, then release every
    /// cluster of its chain.
    pub fn delete_file(&mut self, path: &str) -> Result<(), VfsError> {
        let (volume, entry) = self.lookup(path)?;
        if entry.kind != EntryKind::File {
            return Err(VfsError::NotAFile);
        }
        let fs = self.fat_mut(volume)?;
        fs.remove_entry(&entry)?;
        release_chain(fs, entry.first_cluster)
    }

    /// Delete a directory. Without `recursive` the directory must be
    /// empty; with it the whole subtree goes, depth first.
    pub fn delete_directory(&mut self, path: &str, recursive: bool) -> Result<(), VfsError> {
        let (volume, entry) = self.lookup(path)?;
        if !entry.is_dir() {
            return Err(VfsError::NotADirectory);
        }
        if entry.is_root() {
            return Err(VfsError::InvalidPath);
        }
        let fs = self.fat_mut(volume)?;
        if !recursive && !fs.list_directory(&entry)?.is_empty() {
            return Err(VfsError::DirectoryNotEmpty);
        }
        remove_tree(fs, &entry)
    }

    /// Rename an entry within its directory.
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<(), VfsError> {
        let (volume, entry) = self.lookup(path)?;
        if entry.is_root() {
            return Err(VfsError::InvalidPath);
        }
        self.fat_mut(volume)?.rename_entry(&entry, new_name)?;
        Ok(())
    }

    pub fn file_attributes(&mut self, path: &str) -> Result<FileAttributes, VfsError> {
        let (_, entry) = self.lookup(path)?;
        Ok(entry.attributes)
    }

    pub fn set_file_attributes(
        &mut self,
        path: &str,
        attributes: FileAttributes,
    ) -> Result<(), VfsError> {
        let (volume, mut entry) = self.lookup(path)?;
        if entry.is_root() {
            return Err(VfsError::InvalidPath);
        }
        self.fat_mut(volume)?.set_attributes(&mut entry, attributes)?;
        Ok(())
    }

    /// Open an existing file for streaming I/O. The stream borrows the
    /// router for its lifetime.
    pub fn open(&mut self, path: &str) -> Result<FatStream<'_>, VfsError> {
        let (volume, entry) = self.lookup(path)?;
        Ok(self.fat_mut(volume)?.open(&entry)?)
    }

    pub fn read_file(&mut self, path: &str) -> Result<Vec<u8>, VfsError> {
        let mut stream = self.open(path)?;
        let mut out = Vec::with_capacity(stream.size() as usize);
        stream.read_to_end(&mut out)?;
        Ok(out)
    }

    /// Write a whole file, creating it (and missing parent directories)
    /// when needed. An existing file is resized to exactly `data`, and
    /// clusters cut off by the resize are released.
    pub fn write_file(&mut self, path: &str, data: &[u8]) -> Result<(), VfsError> {
        let len = u32::try_from(data.len()).map_err(|_| VfsError::Fs(fatdrv::FsError::OutOfRange))?;
        let (volume, parent, leaf) = self.ensure_parent(path)?;
        let fs = self.fat_mut(volume)?;
        let entry = match find_child(fs, &parent, leaf)? {
            Some(entry) if entry.kind == EntryKind::File => entry,
            Some(_) => return Err(VfsError::NotAFile),
            None => fs.create_entry(&parent, leaf, EntryKind::File)?,
        };

        let freed = {
            let mut stream = fs.open(&entry)?;
            let freed = stream.set_len(len)?;
            stream.write_all(data)?;
            freed
        };
        for cluster in freed {
            fs.fat_mut().clear_entry(cluster)?;
        }
        Ok(())
    }

    pub fn volumes(&mut self) -> Result<Vec<VolumeInfo>, VfsError> {
        let mut out = Vec::new();
        for index in 0..self.mounts.len() {
            let fs = self.fat_mut(index)?;
            let geometry = *fs.geometry();
            let root = fs.root_entry();
            let used_bytes = fs.used_space(&root)?;
            out.push(VolumeInfo {
                index,
                filesystem: geometry.fat_type.name(),
                total_bytes: geometry.cluster_count as u64 * geometry.bytes_per_cluster() as u64,
                used_bytes,
            });
        }
        Ok(out)
    }
}

/// Case-insensitive component match against both the display name and
/// the stored 8.3 name.
fn find_child(
    fs: &mut FatFileSystem,
    dir: &DirEntry,
    name: &str,
) -> Result<Option<DirEntry>, VfsError> {
    for entry in fs.list_directory(dir)? {
        if entry.name.eq_ignore_ascii_case(name)
            || short_name_text(&entry.short_name).eq_ignore_ascii_case(name)
        {
            return Ok(Some(entry));
        }
    }
    Ok(None)
}

fn release_chain(fs: &mut FatFileSystem, first: u32) -> Result<(), VfsError> {
    let chain = fs.fat_mut().chain(first, 0)?;
    for cluster in chain {
        fs.fat_mut().clear_entry(cluster)?;
    }
    Ok(())
}

fn remove_tree(fs: &mut FatFileSystem, entry: &DirEntry) -> Result<(), VfsError> {
    if entry.is_dir() {
        for child in fs.list_directory(entry)? {
            remove_tree(fs, &child)?;
        }
    }
    fs.remove_entry(entry)?;
    release_chain(fs, entry.first_cluster)
}

// ─── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use fatdrv::{MemDisk, SeekFrom};

    /// 16 MiB FAT16 volume: 512-byte sectors, 4 per cluster.
    fn fat16_vfs() -> Vfs {
        let disk = Rc::new(MemDisk::new(512, 32 * 1024));
        fatdrv::format_volume(&Partition::whole_device(disk.clone()), &FormatOptions::default())
            .unwrap();
        let mut vfs = Vfs::new();
        assert_eq!(vfs.mount_disk(disk).unwrap(), vec![0]);
        vfs
    }

    #[test]
    fn write_grows_open_shrinks_release_is_explicit() {
        let mut vfs = fat16_vfs();
        let bpc = vfs.fat_mut(0).unwrap().geometry().bytes_per_cluster();
        assert_eq!(bpc, 2048);

        let content: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        vfs.write_file("0:\\notes.txt", &content).unwrap();
        assert_eq!(vfs.read_file("0:\\notes.txt").unwrap(), content);

        // 5000 bytes at 2048 per cluster occupy 3 clusters
        let entry = vfs.lookup("0:\\notes.txt").unwrap().1;
        let fs = vfs.fat_mut(0).unwrap();
        let chain = fs.fat_mut().chain(entry.first_cluster, 0).unwrap();
        assert_eq!(chain.len(), 3);

        let freed = {
            let mut stream = vfs.open("0:\\notes.txt").unwrap();
            stream.set_len(100).unwrap()
        };
        assert_eq!(freed.len(), 2);

        let fs = vfs.fat_mut(0).unwrap();
        assert_eq!(fs.fat_mut().chain(entry.first_cluster, 0).unwrap().len(), 1);
        for &cluster in &freed {
            assert!(!fs.fat().is_free(fs.fat().entry(cluster).unwrap()));
            fs.fat_mut().clear_entry(cluster).unwrap();
            assert!(fs.fat().is_free(fs.fat().entry(cluster).unwrap()));
        }

        assert_eq!(vfs.read_file("0:\\notes.txt").unwrap(), content[..100]);
    }

    #[test]
    fn intermediate_directories_are_created() {
        let mut vfs = fat16_vfs();
        vfs.write_file("0:\\a\\b\\c.txt", b"deep").unwrap();

        let a = vfs.read_directory("0:\\").unwrap();
        assert_eq!(a.len(), 1);
        assert!(a[0].is_dir());

        // short-compatible names are stored, and listed, in 8.3 uppercase
        let b = vfs.read_directory("0:\\a").unwrap();
        assert_eq!(b[0].name, "B");
        assert_eq!(vfs.read_file("0:/a/b/c.txt").unwrap(), b"deep");
    }

    #[test]
    fn resolution_is_case_insensitive_and_matches_short_names() {
        let mut vfs = fat16_vfs();
        vfs.write_file("0:\\Mixed Case Document.txt", b"x").unwrap();

        assert_eq!(vfs.read_file("0:\\mixed case document.TXT").unwrap(), b"x");
        // the stored 8.3 alias resolves too
        assert_eq!(vfs.read_file("0:\\MIXEDC~1.TXT").unwrap(), b"x");
    }

    #[test]
    fn missing_paths_and_bad_components() {
        let mut vfs = fat16_vfs();
        vfs.write_file("0:\\f.txt", b"x").unwrap();

        assert_eq!(vfs.read_file("0:\\nope.txt").unwrap_err(), VfsError::NotFound);
        assert_eq!(vfs.read_file("1:\\f.txt").unwrap_err(), VfsError::UnknownVolume);
        assert_eq!(vfs.read_file("f.txt").unwrap_err(), VfsError::InvalidPath);
        // a file used as a directory component
        assert_eq!(
            vfs.read_file("0:\\f.txt\\inner").unwrap_err(),
            VfsError::NotADirectory
        );
        // opening a directory
        vfs.create_directory("0:\\d").unwrap();
        assert_eq!(vfs.read_file("0:\\d").unwrap_err(), VfsError::NotAFile);
    }

    #[test]
    fn create_twice_is_already_exists() {
        let mut vfs = fat16_vfs();
        vfs.create_file("0:\\once.txt").unwrap();
        assert_eq!(
            vfs.create_file("0:\\ONCE.TXT").unwrap_err(),
            VfsError::AlreadyExists
        );
    }

    #[test]
    fn delete_file_releases_every_cluster() {
        let mut vfs = fat16_vfs();
        vfs.write_file("0:\\big.bin", &[7u8; 10_000]).unwrap();
        let entry = vfs.lookup("0:\\big.bin").unwrap().1;
        let fs = vfs.fat_mut(0).unwrap();
        let chain = fs.fat_mut().chain(entry.first_cluster, 0).unwrap();
        assert_eq!(chain.len(), 5);

        vfs.delete_file("0:\\big.bin").unwrap();
        assert_eq!(vfs.read_file("0:\\big.bin").unwrap_err(), VfsError::NotFound);

        let fs = vfs.fat_mut(0).unwrap();
        for cluster in chain {
            assert!(fs.fat().is_free(fs.fat().entry(cluster).unwrap()));
        }
    }

    #[test]
    fn directory_deletion_honours_recursive_flag() {
        let mut vfs = fat16_vfs();
        vfs.write_file("0:\\d\\sub\\x.txt", b"x").unwrap();

        assert_eq!(
            vfs.delete_directory("0:\\d", false).unwrap_err(),
            VfsError::DirectoryNotEmpty
        );
        vfs.delete_directory("0:\\d", true).unwrap();
        assert!(vfs.read_directory("0:\\").unwrap().is_empty());
        assert_eq!(vfs.delete_directory("0:\\", false).unwrap_err(), VfsError::InvalidPath);
    }

    #[test]
    fn rename_keeps_content() {
        let mut vfs = fat16_vfs();
        vfs.write_file("0:\\old.txt", b"payload").unwrap();
        vfs.rename("0:\\old.txt", "A Much Better Name.txt").unwrap();

        assert_eq!(vfs.read_file("0:\\old.txt").unwrap_err(), VfsError::NotFound);
        assert_eq!(vfs.read_file("0:\\A Much Better Name.txt").unwrap(), b"payload");
    }

    #[test]
    fn attributes_roundtrip_through_paths() {
        let mut vfs = fat16_vfs();
        vfs.create_file("0:\\ro.txt").unwrap();
        vfs.set_file_attributes("0:\\ro.txt", FileAttributes::READ_ONLY)
            .unwrap();
        assert!(vfs
            .file_attributes("0:\\ro.txt")
            .unwrap()
            .contains(FileAttributes::READ_ONLY));
    }

    #[test]
    fn rewrite_shrinks_and_releases() {
        let mut vfs = fat16_vfs();
        vfs.write_file("0:\\f.bin", &[1u8; 9000]).unwrap();
        vfs.write_file("0:\\f.bin", &[2u8; 10]).unwrap();
        assert_eq!(vfs.read_file("0:\\f.bin").unwrap(), [2u8; 10]);

        // all but one cluster went back to the pool
        let info = vfs.volumes().unwrap();
        assert_eq!(info[0].used_bytes, 10);
    }

    #[test]
    fn volume_info_reports_totals() {
        let mut vfs = fat16_vfs();
        vfs.write_file("0:\\a.bin", &[0u8; 1000]).unwrap();
        vfs.write_file("0:\\d\\b.bin", &[0u8; 500]).unwrap();

        let info = vfs.volumes().unwrap();
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].filesystem, "FAT16");
        assert_eq!(info[0].used_bytes, 1500);
        assert!(info[0].total_bytes > 15 * 1024 * 1024);
    }

    #[test]
    fn format_wipes_and_remounts_in_place() {
        let mut vfs = fat16_vfs();
        vfs.write_file("0:\\gone.txt", b"bye").unwrap();
        vfs.format_volume(0, &FormatOptions::default()).unwrap();
        assert!(vfs.read_directory("0:\\").unwrap().is_empty());
        vfs.write_file("0:\\fresh.txt", b"hi").unwrap();
        assert_eq!(vfs.read_file("0:\\fresh.txt").unwrap(), b"hi");
    }

    #[test]
    fn stream_seek_through_router() {
        let mut vfs = fat16_vfs();
        vfs.write_file("0:\\s.bin", &(0..100u8).collect::<Vec<_>>()).unwrap();
        let mut stream = vfs.open("0:\\s.bin").unwrap();
        stream.seek(SeekFrom::Start(40)).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).unwrap(), 4);
        assert_eq!(buf, [40, 41, 42, 43]);
    }

    // ── Disk-level mounting ──────────────────────────────────────────────────

    fn mbr_disk() -> Rc<MemDisk> {
        let disk = Rc::new(MemDisk::new(512, 72 * 1024));
        // one primary FAT16 slot and one extended pointer
        let mut mbr_sector = vec![0u8; 512];
        mbr_sector[510] = 0x55;
        mbr_sector[511] = 0xAA;
        mbr_sector[446 + 4] = 0x06;
        mbr_sector[446 + 8..446 + 12].copy_from_slice(&2048u32.to_le_bytes());
        mbr_sector[446 + 12..446 + 16].copy_from_slice(&(32 * 1024u32).to_le_bytes());
        mbr_sector[462 + 4] = 0x05;
        mbr_sector[462 + 8..462 + 12].copy_from_slice(&40_000u32.to_le_bytes());
        disk.write_blocks(0, 1, &mbr_sector).unwrap();

        let partition = Partition::new(disk.clone(), 2048, 32 * 1024).unwrap();
        fatdrv::format_volume(&partition, &FormatOptions::default()).unwrap();
        disk
    }

    #[test]
    fn partitioned_disk_mounts_primary_slots() {
        let mut vfs = Vfs::new();
        let mounted = vfs.mount_disk(mbr_disk()).unwrap();
        assert_eq!(mounted, vec![0]);

        vfs.write_file("0:\\on-part.txt", b"routed").unwrap();
        assert_eq!(vfs.read_file("0:\\on-part.txt").unwrap(), b"routed");
    }

    #[test]
    fn partition_data_stays_inside_its_range() {
        let disk = mbr_disk();
        let mut vfs = Vfs::new();
        vfs.mount_disk(disk.clone()).unwrap();
        vfs.write_file("0:\\x.bin", &[0xAAu8; 4096]).unwrap();

        // the MBR sector is untouched
        let mut sector0 = vec![0u8; 512];
        disk.read_blocks(0, 1, &mut sector0).unwrap();
        assert!(mbr::parse_partition_table(&sector0).is_ok());
    }

    #[test]
    fn blank_disk_does_not_mount() {
        let mut vfs = Vfs::new();
        let disk: Rc<dyn BlockDevice> = Rc::new(MemDisk::new(512, 2048));
        assert_eq!(vfs.mount_disk(disk).unwrap_err(), VfsError::UnknownVolume);
        assert_eq!(vfs.volume_count(), 0);
    }

    #[test]
    fn two_disks_get_distinct_volume_indices() {
        let mut vfs = fat16_vfs();
        let second = Rc::new(MemDisk::new(512, 4096));
        fatdrv::format_volume(&Partition::whole_device(second.clone()), &FormatOptions::default())
            .unwrap();
        assert_eq!(vfs.mount_disk(second).unwrap(), vec![1]);

        vfs.write_file("1:\\only-here.txt", b"second").unwrap();
        assert_eq!(vfs.read_file("1:\\only-here.txt").unwrap(), b"second");
        assert_eq!(vfs.read_file("0:\\only-here.txt").unwrap_err(), VfsError::NotFound);
        assert_eq!(vfs.volume_count(), 2);
    }
}
