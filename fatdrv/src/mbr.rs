//! MBR/EBR partition-table parsing.
//!
//! Decodes the four 16-byte slots of a boot record. Extended-partition
//! slots (system ids 0x05, 0x0F, 0x85) point at an EBR rather than a
//! mountable partition; they are reported as pointers and the caller
//! chains further reads from there. This module never recurses itself.

use alloc::vec::Vec;

use crate::FsError;

pub const BOOT_SIGNATURE: u16 = 0xAA55;

const SLOT_OFFSETS: [usize; 4] = [446, 462, 478, 494];
const EXTENDED_IDS: [u8; 3] = [0x05, 0x0F, 0x85];

/// A usable partition decoded from a table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTableEntry {
    pub system_id: u8,
    pub start_sector: u32,
    pub sector_count: u32,
}

/// One occupied slot of a partition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbrSlot {
    Primary(PartitionTableEntry),
    /// The slot records where the next EBR lives, not a partition.
    ExtendedPointer { system_id: u8, ebr_sector: u32 },
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// True if `sector` carries the 0xAA55 signature at offset 510.
pub fn has_boot_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && u16::from_le_bytes([sector[510], sector[511]]) == BOOT_SIGNATURE
}

/// Decode the partition table of a boot record (MBR or EBR).
///
/// Empty slots (`system_id == 0`) are skipped; extended slots are
/// reported as [`MbrSlot::ExtendedPointer`].
pub fn parse_partition_table(sector: &[u8]) -> Result<Vec<MbrSlot>, FsError> {
    if !has_boot_signature(sector) {
        return Err(FsError::BadSignature);
    }

    let mut slots = Vec::new();
    for off in SLOT_OFFSETS {
        let system_id = sector[off + 4];
        if system_id == 0 {
            continue;
        }
        let start_sector = read_u32(sector, off + 8);
        let sector_count = read_u32(sector, off + 12);
        if EXTENDED_IDS.contains(&system_id) {
            slots.push(MbrSlot::ExtendedPointer { system_id, ebr_sector: start_sector });
        } else {
            slots.push(MbrSlot::Primary(PartitionTableEntry {
                system_id,
                start_sector,
                sector_count,
            }));
        }
    }
    Ok(slots)
}

// ─── Unit tests ────────────────────────────────────────────────────────────────
