//! Boot-sector parsing and the mounted filesystem: BPB geometry, FAT
//! width selection, and cluster-addressed I/O over the partition.

use alloc::vec;
use alloc::vec::Vec;

use crate::block::{BlockDevice, Partition};
use crate::fat::Fat;
use crate::mbr;
use crate::FsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat12,
    Fat16,
    Fat32,
}

impl FatType {
    pub fn name(&self) -> &'static str {
        match self {
            FatType::Fat12 => "FAT12",
            FatType::Fat16 => "FAT16",
            FatType::Fat32 => "FAT32",
        }
    }

    /// Width is selected purely from the cluster count.
    pub fn from_cluster_count(count: u32) -> Self {
        if count < 4_085 {
            FatType::Fat12
        } else if count < 65_525 {
            FatType::Fat16
        } else {
            FatType::Fat32
        }
    }
}

/// Where a directory's records live: the fixed FAT12/16 root region, or a
/// cluster chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirStorage {
    RootRegion,
    Chain(u32),
}

/// Volume geometry, derived once from the BIOS parameter block at mount.
#[derive(Debug, Clone, Copy)]
pub struct FatGeometry {
    pub fat_type: FatType,
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub reserved_sectors: u32,
    pub fat_count: u32,
    /// FAT12/16 only; zero on FAT32.
    pub root_entry_count: u32,
    pub total_sectors: u32,
    pub sectors_per_fat: u32,
    pub root_dir_sectors: u32,
    pub cluster_count: u32,
    /// FAT32 only.
    pub root_cluster: Option<u32>,
}

fn bpb_u16(sector: &[u8], off: usize) -> u32 {
    u16::from_le_bytes([sector[off], sector[off + 1]]) as u32
}

fn bpb_u32(sector: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([sector[off], sector[off + 1], sector[off + 2], sector[off + 3]])
}

impl FatGeometry {
    /// Parse and validate the boot sector.
    pub fn parse(sector: &[u8]) -> Result<Self, FsError> {
        if !mbr::has_boot_signature(sector) {
            return Err(FsError::BadSignature);
        }

        let bytes_per_sector = bpb_u16(sector, 11);
        match bytes_per_sector {
            512 | 1024 | 2048 | 4096 => {}
            _ => return Err(FsError::CorruptVolume),
        }
        let sectors_per_cluster = sector[13] as u32;
        match sectors_per_cluster {
            1 | 2 | 4 | 8 | 16 | 32 | 64 | 128 => {}
            _ => return Err(FsError::CorruptVolume),
        }
        let reserved_sectors = bpb_u16(sector, 14);
        let fat_count = sector[16] as u32;
        if reserved_sectors == 0 || fat_count == 0 {
            return Err(FsError::CorruptVolume);
        }
        let root_entry_count = bpb_u16(sector, 17);
        let total_sectors = match bpb_u16(sector, 19) {
            0 => bpb_u32(sector, 32),
            v => v,
        };
        let sectors_per_fat = match bpb_u16(sector, 22) {
            0 => bpb_u32(sector, 36),
            v => v,
        };
        if total_sectors == 0 || sectors_per_fat == 0 {
            return Err(FsError::CorruptVolume);
        }

        let root_dir_sectors = (root_entry_count * 32).div_ceil(bytes_per_sector);
        let system_sectors = reserved_sectors
            .checked_add(fat_count * sectors_per_fat)
            .and_then(|v| v.checked_add(root_dir_sectors))
            .ok_or(FsError::CorruptVolume)?;
        let data_sectors = total_sectors
            .checked_sub(system_sectors)
            .ok_or(FsError::CorruptVolume)?;
        let cluster_count = data_sectors / sectors_per_cluster;
        if cluster_count == 0 {
            return Err(FsError::CorruptVolume);
        }

        let fat_type = FatType::from_cluster_count(cluster_count);
        let root_cluster = match fat_type {
            FatType::Fat32 => Some(bpb_u32(sector, 44)),
            _ => None,
        };

        Ok(Self {
            fat_type,
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            root_entry_count,
            total_sectors,
            sectors_per_fat,
            root_dir_sectors,
            cluster_count,
            root_cluster,
        })
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bytes_per_sector * self.sectors_per_cluster
    }

    /// First sector of the FAT12/16 root region (right after the FATs).
    pub fn root_region_start(&self) -> u64 {
        self.reserved_sectors as u64 + (self.fat_count * self.sectors_per_fat) as u64
    }

    /// First sector of the cluster data area.
    pub fn first_data_sector(&self) -> u64 {
        self.root_region_start() + self.root_dir_sectors as u64
    }

    /// Absolute (partition-relative) sector of cluster `n`.
    pub fn cluster_to_sector(&self, cluster: u32) -> Result<u64, FsError> {
        if cluster < 2 || cluster > self.cluster_count + 1 {
            return Err(FsError::CorruptVolume);
        }
        Ok(self.first_data_sector() + (cluster as u64 - 2) * self.sectors_per_cluster as u64)
    }
}

// ─── Mounted filesystem ────────────────────────────────────────────────────────

/// One mounted FAT volume. Owns its partition handle and allocation table.
pub struct FatFileSystem {
    partition: Partition,
    geometry: FatGeometry,
    fat: Fat,
}

impl core::fmt::Debug for FatFileSystem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FatFileSystem")
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}

impl FatFileSystem {
    /// Parse the boot sector and mount.
    pub fn mount(partition: Partition) -> Result<Self, FsError> {
        let mut sector0 = vec![0u8; partition.block_size()];
        partition.read_blocks(0, 1, &mut sector0)?;
        let geometry = FatGeometry::parse(&sector0)?;
        if geometry.bytes_per_sector as usize != partition.block_size() {
            return Err(FsError::CorruptVolume);
        }
        if geometry.total_sectors as u64 > partition.block_count() {
            return Err(FsError::CorruptVolume);
        }
        let fat = Fat::new(partition.clone(), &geometry);
        log::debug!(
            "mounted {} volume: {} clusters of {} bytes",
            geometry.fat_type.name(),
            geometry.cluster_count,
            geometry.bytes_per_cluster(),
        );
        Ok(Self { partition, geometry, fat })
    }

    /// Signature sniff used by mount probing: does this partition look
    /// like a FAT volume?
    pub fn probe(partition: &Partition) -> bool {
        let mut sector0 = vec![0u8; partition.block_size()];
        if partition.read_blocks(0, 1, &mut sector0).is_err() {
            return false;
        }
        FatGeometry::parse(&sector0).is_ok()
    }

    pub fn geometry(&self) -> &FatGeometry {
        &self.geometry
    }

    /// The allocation table. Public so callers can release chains
    /// explicitly; the driver never reclaims clusters on its own.
    pub fn fat_mut(&mut self) -> &mut Fat {
        &mut self.fat
    }

    pub fn fat(&self) -> &Fat {
        &self.fat
    }

    pub(crate) fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Where the root directory's records live.
    pub fn root_storage(&self) -> DirStorage {
        match self.geometry.root_cluster {
            Some(cluster) => DirStorage::Chain(cluster),
            None => DirStorage::RootRegion,
        }
    }

    // ─── Cluster I/O ───────────────────────────────────────────────────────────

    pub fn read_cluster(&self, cluster: u32) -> Result<Vec<u8>, FsError> {
        let sector = self.geometry.cluster_to_sector(cluster)?;
        let mut buf = vec![0u8; self.geometry.bytes_per_cluster() as usize];
        self.partition
            .read_blocks(sector, self.geometry.sectors_per_cluster as u64, &mut buf)?;
        Ok(buf)
    }

    pub fn write_cluster(&mut self, cluster: u32, buf: &[u8]) -> Result<(), FsError> {
        let sector = self.geometry.cluster_to_sector(cluster)?;
        self.partition
            .write_blocks(sector, self.geometry.sectors_per_cluster as u64, buf)
    }

    pub(crate) fn zero_cluster(&mut self, cluster: u32) -> Result<(), FsError> {
        let zero = vec![0u8; self.geometry.bytes_per_cluster() as usize];
        self.write_cluster(cluster, &zero)
    }

    // ─── Directory data addressing ─────────────────────────────────────────────

    /// Read a directory's entire record area into one buffer.
    pub(crate) fn read_dir_data(&mut self, storage: DirStorage) -> Result<Vec<u8>, FsError> {
        match storage {
            DirStorage::RootRegion => {
                let start = self.geometry.root_region_start();
                let sectors = self.geometry.root_dir_sectors as u64;
                let mut buf = vec![0u8; (sectors * self.geometry.bytes_per_sector as u64) as usize];
                self.partition.read_blocks(start, sectors, &mut buf)?;
                Ok(buf)
            }
            DirStorage::Chain(first) => {
                let chain = self.fat.chain(first, 0)?;
                let bpc = self.geometry.bytes_per_cluster() as usize;
                let mut buf = Vec::with_capacity(chain.len() * bpc);
                for cluster in chain {
                    buf.extend_from_slice(&self.read_cluster(cluster)?);
                }
                Ok(buf)
            }
        }
    }

    /// Write `data` at `offset` into a directory's record area, sector by
    /// sector (read-modify-write; nothing is cached).
    pub(crate) fn write_dir_bytes(
        &mut self,
        storage: DirStorage,
        offset: usize,
        data: &[u8],
    ) -> Result<(), FsError> {
        let bps = self.geometry.bytes_per_sector as usize;
        let mut written = 0usize;
        while written < data.len() {
            let pos = offset + written;
            let sector = self.dir_sector_of(storage, pos)?;
            let intra = pos % bps;
            let n = (bps - intra).min(data.len() - written);

            let mut buf = vec![0u8; bps];
            self.partition.read_blocks(sector, 1, &mut buf)?;
            buf[intra..intra + n].copy_from_slice(&data[written..written + n]);
            self.partition.write_blocks(sector, 1, &buf)?;
            written += n;
        }
        Ok(())
    }

    /// Partition sector holding byte `offset` of the directory's data.
    fn dir_sector_of(&mut self, storage: DirStorage, offset: usize) -> Result<u64, FsError> {
        let bps = self.geometry.bytes_per_sector as usize;
        match storage {
            DirStorage::RootRegion => {
                let sector = self.geometry.root_region_start() + (offset / bps) as u64;
                if (offset / bps) as u32 >= self.geometry.root_dir_sectors {
                    return Err(FsError::OutOfRange);
                }
                Ok(sector)
            }
            DirStorage::Chain(first) => {
                let bpc = self.geometry.bytes_per_cluster() as usize;
                let chain = self.fat.chain(first, 0)?;
                let cluster = *chain.get(offset / bpc).ok_or(FsError::OutOfRange)?;
                let base = self.geometry.cluster_to_sector(cluster)?;
                Ok(base + ((offset % bpc) / bps) as u64)
            }
        }
    }

    /// Grow a directory by one zeroed cluster. The fixed root region
    /// cannot grow.
    pub(crate) fn extend_directory(&mut self, storage: DirStorage) -> Result<(), FsError> {
        match storage {
            DirStorage::RootRegion => Err(FsError::DirectoryFull),
            DirStorage::Chain(first) => {
                let bpc = self.geometry.bytes_per_cluster() as u64;
                let current = self.fat.chain(first, 0)?;
                let grown = self.fat.chain(first, (current.len() as u64 + 1) * bpc)?;
                let new = grown[grown.len() - 1];
                self.zero_cluster(new)
            }
        }
    }
}

// ─── Unit tests ────────────────────────────────────────────────────────────────
