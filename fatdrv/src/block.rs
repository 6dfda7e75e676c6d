//! Block-device abstraction: the raw device contract, a RAM-backed device
//! for virtual media, and the sector-range `Partition` view.

use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::FsError;

/// Raw fixed-size-block storage.
///
/// Transfers are whole blocks only: `buf.len()` must equal
/// `count * block_size()`, anything else is a usage error, not a
/// recoverable I/O failure. Methods take `&self` so several [`Partition`]
/// views can share one device within a single thread; implementations use
/// interior mutability where needed.
pub trait BlockDevice {
    fn block_size(&self) -> usize;
    fn block_count(&self) -> u64;
    fn read_blocks(&self, start: u64, count: u64, buf: &mut [u8]) -> Result<(), FsError>;
    fn write_blocks(&self, start: u64, count: u64, buf: &[u8]) -> Result<(), FsError>;
}

fn check_access(
    block_size: usize,
    block_count: u64,
    start: u64,
    count: u64,
    buf_len: usize,
) -> Result<(), FsError> {
    let expected = count as usize * block_size;
    if buf_len != expected {
        return Err(FsError::BufferSize { expected, got: buf_len });
    }
    match start.checked_add(count) {
        Some(end) if end <= block_count => Ok(()),
        _ => Err(FsError::OutOfRange),
    }
}

// ─── RAM-backed device ─────────────────────────────────────────────────────────

/// Block device backed by a `Vec<u8>`, for virtual media and tests.
pub struct MemDisk {
    block_size: usize,
    data: RefCell<Vec<u8>>,
}

impl MemDisk {
    pub fn new(block_size: usize, block_count: u64) -> Self {
        Self {
            block_size,
            data: RefCell::new(vec![0u8; block_size * block_count as usize]),
        }
    }

    /// Wrap an existing image. `data.len()` must be a multiple of `block_size`.
    pub fn from_vec(block_size: usize, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len() % block_size, 0);
        Self { block_size, data: RefCell::new(data) }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner()
    }

    /// Borrow the raw image, e.g. to hand it to another filesystem
    /// implementation. Must not be called while a transfer is in flight.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> R {
        f(&mut self.data.borrow_mut())
    }
}

impl BlockDevice for MemDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        (self.data.borrow().len() / self.block_size) as u64
    }

    fn read_blocks(&self, start: u64, count: u64, buf: &mut [u8]) -> Result<(), FsError> {
        check_access(self.block_size, self.block_count(), start, count, buf.len())?;
        let off = start as usize * self.block_size;
        buf.copy_from_slice(&self.data.borrow()[off..off + buf.len()]);
        Ok(())
    }

    fn write_blocks(&self, start: u64, count: u64, buf: &[u8]) -> Result<(), FsError> {
        check_access(self.block_size, self.block_count(), start, count, buf.len())?;
        let off = start as usize * self.block_size;
        self.data.borrow_mut()[off..off + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

// ─── Partition view ────────────────────────────────────────────────────────────

/// Sector-range view of a host device.
///
/// Block `n` of the partition maps to host block `start_sector + n`.
/// Accesses past `sector_count` are rejected, never silently forwarded
/// into a neighbouring partition.
#[derive(Clone)]
pub struct Partition {
    host: Rc<dyn BlockDevice>,
    start_sector: u64,
    sector_count: u64,
}

impl Partition {
    pub fn new(host: Rc<dyn BlockDevice>, start_sector: u64, sector_count: u64) -> Result<Self, FsError> {
        match start_sector.checked_add(sector_count) {
            Some(end) if end <= host.block_count() => Ok(Self { host, start_sector, sector_count }),
            _ => Err(FsError::OutOfRange),
        }
    }

    /// View covering the entire host device, for unpartitioned media.
    pub fn whole_device(host: Rc<dyn BlockDevice>) -> Self {
        let sector_count = host.block_count();
        Self { host, start_sector: 0, sector_count }
    }

    pub fn start_sector(&self) -> u64 {
        self.start_sector
    }
}

impl BlockDevice for Partition {
    fn block_size(&self) -> usize {
        self.host.block_size()
    }

    fn block_count(&self) -> u64 {
        self.sector_count
    }

    fn read_blocks(&self, start: u64, count: u64, buf: &mut [u8]) -> Result<(), FsError> {
        check_access(self.block_size(), self.sector_count, start, count, buf.len())?;
        self.host.read_blocks(self.start_sector + start, count, buf)
    }

    fn write_blocks(&self, start: u64, count: u64, buf: &[u8]) -> Result<(), FsError> {
        check_access(self.block_size(), self.sector_count, start, count, buf.len())?;
        self.host.write_blocks(self.start_sector + start, count, buf)
    }
}

// ─── Unit tests ────────────────────────────────────────────────────────────────
