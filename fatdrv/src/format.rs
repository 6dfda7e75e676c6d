//! Volume formatting: lay down a boot sector (and FSInfo/backup copies on
//! FAT32), reset the allocation tables, and clear the root directory.
//!
//! The FAT width is not chosen directly; it falls out of the cluster count
//! the chosen layout produces, which itself depends on the FAT size. The
//! sizing below iterates until layout and width agree.

use alloc::vec;

use crate::block::{BlockDevice, Partition};
use crate::fat::Fat;
use crate::fs::{FatGeometry, FatType};
use crate::mbr::BOOT_SIGNATURE;
use crate::FsError;

const FAT32_RESERVED_SECTORS: u32 = 32;
const FAT32_FSINFO_SECTOR: u64 = 1;
const FAT32_BACKUP_BOOT_SECTOR: u64 = 6;
const ROOT_ENTRY_COUNT: u32 = 512;

#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub bytes_per_sector: u32,
    /// Power of two up to 128; 0 selects automatically from the volume size.
    pub sectors_per_cluster: u32,
    pub volume_label: [u8; 11],
    pub fat_count: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            bytes_per_sector: 512,
            sectors_per_cluster: 0,
            volume_label: *b"NO NAME    ",
            fat_count: 2,
        }
    }
}

fn auto_sectors_per_cluster(total_sectors: u32) -> u32 {
    match total_sectors {
        0..=32_767 => 1,
        32_768..=262_143 => 4,
        262_144..=524_287 => 8,
        524_288..=16_777_215 => 16,
        _ => 32,
    }
}

struct Layout {
    fat_type: FatType,
    reserved_sectors: u32,
    root_entry_count: u32,
    sectors_per_fat: u32,
}

/// Solve the layout fixed point: reserved/root sizes depend on the width,
/// the width depends on the cluster count, and the cluster count depends
/// on the FAT size.
fn solve_layout(total_sectors: u32, options: &FormatOptions, spc: u32) -> Result<Layout, FsError> {
    let bps = options.bytes_per_sector;
    let mut fat_type = FatType::Fat16;
    for _ in 0..4 {
        let reserved = match fat_type {
            FatType::Fat32 => FAT32_RESERVED_SECTORS,
            _ => 1,
        };
        let root_entries = match fat_type {
            FatType::Fat32 => 0,
            _ => ROOT_ENTRY_COUNT,
        };
        let root_dir_sectors = (root_entries * 32).div_ceil(bps);

        let mut sectors_per_fat = 1u32;
        for _ in 0..8 {
            let system = reserved + options.fat_count * sectors_per_fat + root_dir_sectors;
            let clusters = total_sectors.checked_sub(system).ok_or(FsError::OutOfRange)? / spc;
            let fat_bytes = match fat_type {
                FatType::Fat12 => ((clusters as u64 + 2) * 3).div_ceil(2),
                FatType::Fat16 => (clusters as u64 + 2) * 2,
                FatType::Fat32 => (clusters as u64 + 2) * 4,
            };
            let needed = fat_bytes.div_ceil(bps as u64) as u32;
            if needed == sectors_per_fat {
                break;
            }
            sectors_per_fat = needed;
        }

        let system = reserved + options.fat_count * sectors_per_fat + root_dir_sectors;
        let clusters = total_sectors.checked_sub(system).ok_or(FsError::OutOfRange)? / spc;
        if clusters == 0 {
            return Err(FsError::OutOfRange);
        }
        let derived = FatType::from_cluster_count(clusters);
        if derived == fat_type {
            return Ok(Layout {
                fat_type,
                reserved_sectors: reserved,
                root_entry_count: root_entries,
                sectors_per_fat,
            });
        }
        fat_type = derived;
    }
    // layout oscillates right at a width threshold
    Err(FsError::OutOfRange)
}

fn put_u16(sector: &mut [u8], off: usize, value: u16) {
    sector[off..off + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(sector: &mut [u8], off: usize, value: u32) {
    sector[off..off + 4].copy_from_slice(&value.to_le_bytes());
}

fn build_boot_sector(
    partition: &Partition,
    options: &FormatOptions,
    spc: u32,
    total_sectors: u32,
    layout: &Layout,
) -> alloc::vec::Vec<u8> {
    let bps = options.bytes_per_sector;
    let mut sector = vec![0u8; bps as usize];

    sector[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
    sector[3..11].copy_from_slice(b"MSDOS5.0");
    put_u16(&mut sector, 11, bps as u16);
    sector[13] = spc as u8;
    put_u16(&mut sector, 14, layout.reserved_sectors as u16);
    sector[16] = options.fat_count as u8;
    put_u16(&mut sector, 17, layout.root_entry_count as u16);
    let small_total = layout.fat_type != FatType::Fat32 && total_sectors < 0x1_0000;
    if small_total {
        put_u16(&mut sector, 19, total_sectors as u16);
    } else {
        put_u32(&mut sector, 32, total_sectors);
    }
    sector[21] = 0xF8; // fixed media
    if layout.fat_type != FatType::Fat32 {
        put_u16(&mut sector, 22, layout.sectors_per_fat as u16);
    }
    put_u16(&mut sector, 24, 63); // sectors per track
    put_u16(&mut sector, 26, 255); // heads
    put_u32(&mut sector, 28, partition.start_sector() as u32);

    let volume_id = 0x7A6B_1E05 ^ total_sectors;
    match layout.fat_type {
        FatType::Fat32 => {
            put_u32(&mut sector, 36, layout.sectors_per_fat);
            put_u32(&mut sector, 44, 2); // root directory cluster
            put_u16(&mut sector, 48, FAT32_FSINFO_SECTOR as u16);
            put_u16(&mut sector, 50, FAT32_BACKUP_BOOT_SECTOR as u16);
            sector[64] = 0x80;
            sector[66] = 0x29;
            put_u32(&mut sector, 67, volume_id);
            sector[71..82].copy_from_slice(&options.volume_label);
            sector[82..90].copy_from_slice(b"FAT32   ");
        }
        _ => {
            sector[36] = 0x80;
            sector[38] = 0x29;
            put_u32(&mut sector, 39, volume_id);
            sector[43..54].copy_from_slice(&options.volume_label);
            let fstype: &[u8; 8] = match layout.fat_type {
                FatType::Fat12 => b"FAT12   ",
                _ => b"FAT16   ",
            };
            sector[54..62].copy_from_slice(fstype);
        }
    }
    put_u16(&mut sector, 510, BOOT_SIGNATURE);
    sector
}

fn build_fsinfo_sector(bps: u32) -> alloc::vec::Vec<u8> {
    let mut sector = vec![0u8; bps as usize];
    put_u32(&mut sector, 0, 0x4161_5252);
    put_u32(&mut sector, 484, 0x6141_7272);
    put_u32(&mut sector, 488, 0xFFFF_FFFF); // free count unknown
    put_u32(&mut sector, 492, 0xFFFF_FFFF); // next-free hint unknown
    put_u32(&mut sector, 508, 0xAA55_0000);
    sector
}

/// Format the partition as a fresh FAT volume. Everything on it is lost.
pub fn format_volume(partition: &Partition, options: &FormatOptions) -> Result<(), FsError> {
    if options.bytes_per_sector as usize != partition.block_size() {
        return Err(FsError::BufferSize {
            expected: partition.block_size(),
            got: options.bytes_per_sector as usize,
        });
    }
    if options.fat_count == 0 || options.fat_count > 2 {
        return Err(FsError::OutOfRange);
    }
    let total_sectors = u32::try_from(partition.block_count()).map_err(|_| FsError::OutOfRange)?;
    let spc = match options.sectors_per_cluster {
        0 => auto_sectors_per_cluster(total_sectors),
        v if v.is_power_of_two() && v <= 128 => v,
        _ => return Err(FsError::OutOfRange),
    };

    let layout = solve_layout(total_sectors, options, spc)?;
    let boot = build_boot_sector(partition, options, spc, total_sectors, &layout);
    partition.write_blocks(0, 1, &boot)?;
    if layout.fat_type == FatType::Fat32 {
        let fsinfo = build_fsinfo_sector(options.bytes_per_sector);
        partition.write_blocks(FAT32_FSINFO_SECTOR, 1, &fsinfo)?;
        partition.write_blocks(FAT32_BACKUP_BOOT_SECTOR, 1, &boot)?;
        partition.write_blocks(FAT32_BACKUP_BOOT_SECTOR + 1, 1, &fsinfo)?;
    }

    // re-read through the parser so the tables and root match exactly what
    // a subsequent mount will see
    let geometry = FatGeometry::parse(&boot)?;
    let mut fat = Fat::new(partition.clone(), &geometry);
    fat.clear_all()?;

    let zero_sector = vec![0u8; options.bytes_per_sector as usize];
    match layout.fat_type {
        FatType::Fat32 => {
            let first = geometry.cluster_to_sector(2)?;
            for i in 0..geometry.sectors_per_cluster as u64 {
                partition.write_blocks(first + i, 1, &zero_sector)?;
            }
        }
        _ => {
            let start = geometry.root_region_start();
            for i in 0..geometry.root_dir_sectors as u64 {
                partition.write_blocks(start + i, 1, &zero_sector)?;
            }
        }
    }

    log::debug!(
        "formatted {}: {} sectors, {} per cluster, {} FAT sectors",
        layout.fat_type.name(),
        total_sectors,
        spc,
        layout.sectors_per_fat,
    );
    Ok(())
}

// ─── Unit tests ────────────────────────────────────────────────────────────────
