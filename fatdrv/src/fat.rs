//! The allocation table: bit-packed cluster-chain entries stored in the
//! FAT region, entry classification, and chain walking/growth.

use alloc::vec;
use alloc::vec::Vec;

use crate::block::{BlockDevice, Partition};
use crate::fs::{FatGeometry, FatType};
use crate::FsError;

/// Allocation table of one mounted volume.
///
/// Entry `n` holds the successor of cluster `n`, or a free/EOF/bad
/// sentinel. Reads come from the first FAT copy; writes are mirrored to
/// every copy.
pub struct Fat {
    partition: Partition,
    fat_type: FatType,
    fat_start_sector: u64,
    sectors_per_fat: u32,
    fat_count: u32,
    bytes_per_sector: u32,
    bytes_per_cluster: u32,
    cluster_count: u32,
}

impl Fat {
    pub fn new(partition: Partition, geometry: &FatGeometry) -> Self {
        Self {
            partition,
            fat_type: geometry.fat_type,
            fat_start_sector: geometry.reserved_sectors as u64,
            sectors_per_fat: geometry.sectors_per_fat,
            fat_count: geometry.fat_count,
            bytes_per_sector: geometry.bytes_per_sector,
            bytes_per_cluster: geometry.bytes_per_sector * geometry.sectors_per_cluster,
            cluster_count: geometry.cluster_count,
        }
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    /// Highest valid cluster number (clusters are numbered 2..=max).
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    // ─── Sector access ─────────────────────────────────────────────────────────

    fn load_sector(&self, idx: u64) -> Result<Vec<u8>, FsError> {
        if idx >= self.sectors_per_fat as u64 {
            return Err(FsError::OutOfRange);
        }
        let mut buf = vec![0u8; self.bytes_per_sector as usize];
        self.partition.read_blocks(self.fat_start_sector + idx, 1, &mut buf)?;
        Ok(buf)
    }

    /// Write one table sector, mirrored to every FAT copy.
    fn store_sector(&mut self, idx: u64, buf: &[u8]) -> Result<(), FsError> {
        for copy in 0..self.fat_count as u64 {
            let sector = self.fat_start_sector + copy * self.sectors_per_fat as u64 + idx;
            self.partition.write_blocks(sector, 1, buf)?;
        }
        Ok(())
    }

    /// Byte offset of entry `n` within the table.
    fn entry_offset(&self, n: u32) -> u64 {
        match self.fat_type {
            FatType::Fat12 => n as u64 + n as u64 / 2,
            FatType::Fat16 => n as u64 * 2,
            FatType::Fat32 => n as u64 * 4,
        }
    }

    fn check_index(&self, n: u32) -> Result<(), FsError> {
        if n >= self.cluster_count + 2 {
            return Err(FsError::OutOfRange);
        }
        Ok(())
    }

    // FAT12 entries straddle sector boundaries, so the 16-bit word holding
    // entry `n` may need two sector reads.
    fn load_word(&self, byte: u64) -> Result<u16, FsError> {
        let bps = self.bytes_per_sector as u64;
        let sector = self.load_sector(byte / bps)?;
        let off = (byte % bps) as usize;
        let hi = if off + 1 < sector.len() {
            sector[off + 1]
        } else {
            self.load_sector(byte / bps + 1)?[0]
        };
        Ok(u16::from_le_bytes([sector[off], hi]))
    }

    fn store_word(&mut self, byte: u64, word: u16) -> Result<(), FsError> {
        let bps = self.bytes_per_sector as u64;
        let [lo, hi] = word.to_le_bytes();
        let mut sector = self.load_sector(byte / bps)?;
        let off = (byte % bps) as usize;
        sector[off] = lo;
        if off + 1 < sector.len() {
            sector[off + 1] = hi;
            self.store_sector(byte / bps, &sector)?;
        } else {
            self.store_sector(byte / bps, &sector)?;
            let mut next = self.load_sector(byte / bps + 1)?;
            next[0] = hi;
            self.store_sector(byte / bps + 1, &next)?;
        }
        Ok(())
    }

    // ─── Entry get/set ─────────────────────────────────────────────────────────

    /// Read entry `n`, masked to the width's valid bit range.
    pub fn entry(&self, n: u32) -> Result<u32, FsError> {
        self.check_index(n)?;
        let byte = self.entry_offset(n);
        match self.fat_type {
            FatType::Fat12 => {
                let word = self.load_word(byte)?;
                Ok(if n & 1 == 1 { (word >> 4) as u32 } else { (word & 0x0FFF) as u32 })
            }
            FatType::Fat16 => Ok(self.load_word(byte)? as u32),
            FatType::Fat32 => {
                let sector = self.load_sector(byte / self.bytes_per_sector as u64)?;
                let off = (byte % self.bytes_per_sector as u64) as usize;
                let raw = u32::from_le_bytes([
                    sector[off],
                    sector[off + 1],
                    sector[off + 2],
                    sector[off + 3],
                ]);
                // top 4 bits are reserved
                Ok(raw & 0x0FFF_FFFF)
            }
        }
    }

    /// Read-modify-write entry `n`.
    pub fn set_entry(&mut self, n: u32, value: u32) -> Result<(), FsError> {
        self.check_index(n)?;
        let byte = self.entry_offset(n);
        match self.fat_type {
            FatType::Fat12 => {
                let old = self.load_word(byte)?;
                let new = if n & 1 == 1 {
                    (old & 0x000F) | ((value as u16 & 0x0FFF) << 4)
                } else {
                    (old & 0xF000) | (value as u16 & 0x0FFF)
                };
                self.store_word(byte, new)
            }
            FatType::Fat16 => self.store_word(byte, value as u16),
            FatType::Fat32 => {
                let bps = self.bytes_per_sector as u64;
                let mut sector = self.load_sector(byte / bps)?;
                let off = (byte % bps) as usize;
                let old = u32::from_le_bytes([
                    sector[off],
                    sector[off + 1],
                    sector[off + 2],
                    sector[off + 3],
                ]);
                let new = (old & 0xF000_0000) | (value & 0x0FFF_FFFF);
                sector[off..off + 4].copy_from_slice(&new.to_le_bytes());
                self.store_sector(byte / bps, &sector)
            }
        }
    }

    // ─── Entry classification ──────────────────────────────────────────────────

    pub fn is_free(&self, value: u32) -> bool {
        value == 0
    }

    pub fn is_eof(&self, value: u32) -> bool {
        match self.fat_type {
            FatType::Fat12 => value >= 0xFF8,
            FatType::Fat16 => value >= 0xFFF8,
            FatType::Fat32 => value & 0x0FFF_FFFF >= 0x0FFF_FFF8,
        }
    }

    pub fn is_bad(&self, value: u32) -> bool {
        match self.fat_type {
            FatType::Fat12 => value == 0xFF7,
            FatType::Fat16 => value == 0xFFF7,
            FatType::Fat32 => value & 0x0FFF_FFFF == 0x0FFF_FFF7,
        }
    }

    /// The end-of-chain sentinel written when terminating a chain.
    pub fn eof_value(&self) -> u32 {
        match self.fat_type {
            FatType::Fat12 => 0xFFF,
            FatType::Fat16 => 0xFFFF,
            FatType::Fat32 => 0x0FFF_FFFF,
        }
    }

    // ─── Allocation ────────────────────────────────────────────────────────────

    /// First free entry, by linear scan from cluster 2. O(table size);
    /// there is no free list or bitmap.
    pub fn next_unallocated_entry(&self) -> Result<u32, FsError> {
        for n in 2..self.cluster_count + 2 {
            if self.is_free(self.entry(n)?) {
                log::trace!("allocating cluster {n}");
                return Ok(n);
            }
        }
        Err(FsError::NoFreeClusters)
    }

    /// Allocate one cluster and terminate it, for use as a fresh chain head.
    pub fn allocate_first(&mut self) -> Result<u32, FsError> {
        let n = self.next_unallocated_entry()?;
        self.set_entry(n, self.eof_value())?;
        Ok(n)
    }

    /// Walk the chain starting at `first`, growing it when `data_size`
    /// needs more clusters than are allocated.
    ///
    /// Growth mutates the table, so callers doing a pure read pass
    /// `data_size = 0`. Each new cluster comes from
    /// [`Fat::next_unallocated_entry`], is terminated, and is then linked
    /// behind the previous tail.
    pub fn chain(&mut self, first: u32, data_size: u64) -> Result<Vec<u32>, FsError> {
        if first < 2 {
            return Err(FsError::CorruptVolume);
        }
        let mut chain = Vec::new();
        let mut current = first;
        loop {
            chain.push(current);
            if chain.len() > self.cluster_count as usize {
                return Err(FsError::CorruptVolume);
            }
            let next = self.entry(current)?;
            if self.is_eof(next) {
                break;
            }
            if self.is_free(next) || self.is_bad(next) || next < 2 {
                return Err(FsError::CorruptVolume);
            }
            current = next;
        }

        let needed = data_size.div_ceil(self.bytes_per_cluster as u64) as usize;
        while chain.len() < needed {
            let new = self.allocate_first()?;
            let tail = chain[chain.len() - 1];
            self.set_entry(tail, new)?;
            chain.push(new);
        }
        Ok(chain)
    }

    /// Mark entry `n` free. Does not check that it was allocated.
    pub fn clear_entry(&mut self, n: u32) -> Result<(), FsError> {
        self.set_entry(n, 0)
    }

    /// Zero the whole table, then rewrite the reserved entries: entry 0
    /// holds the media sentinel, entry 1 the EOF sentinel, and on FAT32
    /// entry 2 (the root directory) is terminated.
    pub fn clear_all(&mut self) -> Result<(), FsError> {
        let zero = vec![0u8; self.bytes_per_sector as usize];
        for idx in 0..self.sectors_per_fat as u64 {
            self.store_sector(idx, &zero)?;
        }
        let media = match self.fat_type {
            FatType::Fat12 => 0xFF8,
            FatType::Fat16 => 0xFFF8,
            FatType::Fat32 => 0x0FFF_FFF8,
        };
        self.set_entry(0, media)?;
        self.set_entry(1, self.eof_value())?;
        if self.fat_type == FatType::Fat32 {
            self.set_entry(2, self.eof_value())?;
        }
        Ok(())
    }
}

// ─── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemDisk;
    use alloc::rc::Rc;

    // A bare table over a small in-memory partition; no BPB involved.
    fn bare_fat(fat_type: FatType, cluster_count: u32) -> Fat {
        let geometry = FatGeometry {
            fat_type,
            bytes_per_sector: 512,
            sectors_per_cluster: 1,
            reserved_sectors: 1,
            fat_count: 2,
            root_entry_count: 0,
            total_sectors: 4096,
            sectors_per_fat: 64,
            root_dir_sectors: 0,
            cluster_count,
            root_cluster: None,
        };
        let disk = Rc::new(MemDisk::new(512, 4096));
        let partition = Partition::whole_device(disk);
        Fat::new(partition, &geometry)
    }

    #[test]
    fn roundtrip_all_widths() {
        for (fat_type, value, mask) in [
            (FatType::Fat12, 0x0ABCu32, 0x0FFFu32),
            (FatType::Fat16, 0xBEEF, 0xFFFF),
            (FatType::Fat32, 0x0ABC_DEF0, 0x0FFF_FFFF),
        ] {
            let mut fat = bare_fat(fat_type, 1000);
            for n in [2u32, 3, 7, 999] {
                fat.set_entry(n, value).unwrap();
                assert_eq!(fat.entry(n).unwrap(), value & mask, "{fat_type:?} entry {n}");
            }
        }
    }

    #[test]
    fn fat12_neighbours_do_not_clobber() {
        let mut fat = bare_fat(FatType::Fat12, 1000);
        fat.set_entry(4, 0x123).unwrap();
        fat.set_entry(5, 0xABC).unwrap();
        fat.set_entry(6, 0x456).unwrap();
        assert_eq!(fat.entry(4).unwrap(), 0x123);
        assert_eq!(fat.entry(5).unwrap(), 0xABC);
        assert_eq!(fat.entry(6).unwrap(), 0x456);
    }

    #[test]
    fn fat12_entry_straddling_a_sector_boundary() {
        // entry n sits at byte n + n/2; n = 341 puts the word at 511/512
        let mut fat = bare_fat(FatType::Fat12, 2000);
        fat.set_entry(341, 0x789).unwrap();
        assert_eq!(fat.entry(341).unwrap(), 0x789);
        fat.set_entry(340, 0x321).unwrap();
        assert_eq!(fat.entry(341).unwrap(), 0x789);
        assert_eq!(fat.entry(340).unwrap(), 0x321);
    }

    #[test]
    fn classification_per_width() {
        let fat12 = bare_fat(FatType::Fat12, 100);
        assert!(fat12.is_free(0));
        assert!(fat12.is_eof(0xFFF));
        assert!(fat12.is_eof(0xFF8));
        assert!(fat12.is_bad(0xFF7));
        assert!(!fat12.is_eof(0xFF6));

        let fat16 = bare_fat(FatType::Fat16, 100);
        assert!(fat16.is_eof(0xFFF8));
        assert!(fat16.is_bad(0xFFF7));

        let fat32 = bare_fat(FatType::Fat32, 100);
        assert!(fat32.is_eof(0x0FFF_FFFF));
        assert!(fat32.is_eof(0x0FFF_FFF8));
        assert!(fat32.is_bad(0x0FFF_FFF7));
        assert!(!fat32.is_eof(0x0FFF_FFF0));
    }

    #[test]
    fn chain_growth_is_monotonic_and_prefix_stable() {
        let mut fat = bare_fat(FatType::Fat16, 1000);
        let first = fat.allocate_first().unwrap();

        let grown = fat.chain(first, 5 * 512).unwrap();
        assert_eq!(grown.len(), 5);
        assert_eq!(grown[0], first);

        // same or smaller size returns a prefix of the same chain
        let again = fat.chain(first, 5 * 512).unwrap();
        assert_eq!(again, grown);
        let read_only = fat.chain(first, 0).unwrap();
        assert_eq!(read_only, grown);

        // tail is terminated
        assert!(fat.is_eof(fat.entry(grown[4]).unwrap()));
    }

    #[test]
    fn chain_links_forward() {
        let mut fat = bare_fat(FatType::Fat32, 1000);
        let first = fat.allocate_first().unwrap();
        let chain = fat.chain(first, 3 * 512).unwrap();
        for pair in chain.windows(2) {
            assert_eq!(fat.entry(pair[0]).unwrap(), pair[1]);
        }
    }

    #[test]
    fn broken_chain_is_corrupt() {
        let mut fat = bare_fat(FatType::Fat16, 1000);
        let first = fat.allocate_first().unwrap();
        let chain = fat.chain(first, 2 * 512).unwrap();
        // successor marked free mid-chain
        fat.clear_entry(chain[1]).unwrap();
        assert_eq!(fat.chain(first, 0), Err(FsError::CorruptVolume));
    }

    #[test]
    fn allocator_skips_used_entries_and_exhausts() {
        let mut fat = bare_fat(FatType::Fat16, 4);
        // clusters 2..=5 exist
        for _ in 0..4 {
            let n = fat.allocate_first().unwrap();
            assert!((2..6).contains(&n));
        }
        assert_eq!(fat.next_unallocated_entry(), Err(FsError::NoFreeClusters));
    }

    #[test]
    fn clear_entry_frees_for_reuse() {
        let mut fat = bare_fat(FatType::Fat16, 4);
        let a = fat.allocate_first().unwrap();
        fat.clear_entry(a).unwrap();
        assert_eq!(fat.allocate_first().unwrap(), a);
    }

    #[test]
    fn clear_all_resets_reserved_entries() {
        let mut fat = bare_fat(FatType::Fat32, 100);
        fat.set_entry(10, 11).unwrap();
        fat.clear_all().unwrap();
        assert!(fat.is_free(fat.entry(10).unwrap()));
        assert!(fat.is_eof(fat.entry(1).unwrap()));
        assert!(fat.is_eof(fat.entry(2).unwrap()));
        assert!(!fat.is_free(fat.entry(0).unwrap()));
    }

    #[test]
    fn clear_all_leaves_cluster_two_free_on_fat16() {
        // only FAT32 anchors its root at cluster 2; elsewhere it is an
        // ordinary data cluster and a reset must leave it allocatable
        let mut fat = bare_fat(FatType::Fat16, 100);
        fat.set_entry(2, 3).unwrap();
        fat.clear_all().unwrap();
        assert!(fat.is_free(fat.entry(2).unwrap()));
        assert!(fat.is_eof(fat.entry(1).unwrap()));
        assert_eq!(fat.allocate_first().unwrap(), 2);
    }
}
