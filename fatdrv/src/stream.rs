//! Byte-addressed file access over a cluster chain.
//!
//! A [`FatStream`] borrows the filesystem mutably for its lifetime, so the
//! chain snapshot it keeps cannot go stale underneath it. Reads and writes
//! are clipped at cluster boundaries; callers loop, or use the `_all`
//! helpers.

use alloc::vec::Vec;

use crate::dir::{DirEntry, EntryKind};
use crate::fs::FatFileSystem;
use crate::FsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

pub struct FatStream<'a> {
    fs: &'a mut FatFileSystem,
    entry: DirEntry,
    position: u64,
    chain: Vec<u32>,
}

impl core::fmt::Debug for FatStream<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FatStream")
            .field("entry", &self.entry)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl FatFileSystem {
    /// Open a file entry for byte-level I/O. Directories are not
    /// streamable.
    pub fn open(&mut self, entry: &DirEntry) -> Result<FatStream<'_>, FsError> {
        if entry.kind != EntryKind::File || entry.record.is_none() {
            return Err(FsError::NotAFile);
        }
        let chain = self.fat_mut().chain(entry.first_cluster, 0)?;
        Ok(FatStream { fs: self, entry: entry.clone(), position: 0, chain })
    }
}

impl FatStream<'_> {
    pub fn size(&self) -> u32 {
        self.entry.size
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn entry(&self) -> &DirEntry {
        &self.entry
    }

    pub fn seek(&mut self, from: SeekFrom) -> Result<u64, FsError> {
        let target = match from {
            SeekFrom::Start(off) => Some(off),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
            SeekFrom::End(delta) => (self.entry.size as u64).checked_add_signed(delta),
        };
        self.position = target.ok_or(FsError::OutOfRange)?;
        Ok(self.position)
    }

    /// Read at the current position. Returns the number of bytes read,
    /// at most up to the next cluster boundary; 0 at end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        let size = self.entry.size as u64;
        if buf.is_empty() || self.position >= size {
            return Ok(0);
        }
        let bpc = self.fs.geometry().bytes_per_cluster() as u64;
        let idx = (self.position / bpc) as usize;
        let intra = (self.position % bpc) as usize;
        let n = (buf.len() as u64)
            .min(bpc - intra as u64)
            .min(size - self.position) as usize;

        let cluster = *self.chain.get(idx).ok_or(FsError::CorruptVolume)?;
        let data = self.fs.read_cluster(cluster)?;
        buf[..n].copy_from_slice(&data[intra..intra + n]);
        self.position += n as u64;
        Ok(n)
    }

    /// Read from the current position to end of file.
    pub fn read_to_end(&mut self, out: &mut Vec<u8>) -> Result<usize, FsError> {
        let mut chunk = [0u8; 512];
        let mut total = 0usize;
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                return Ok(total);
            }
            out.extend_from_slice(&chunk[..n]);
            total += n;
        }
    }

    /// Write at the current position, growing the file first when the
    /// write extends past its end. Returns the number of bytes written,
    /// at most up to the next cluster boundary.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, FsError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let end = self
            .position
            .checked_add(buf.len() as u64)
            .ok_or(FsError::OutOfRange)?;
        if end > u32::MAX as u64 {
            return Err(FsError::OutOfRange);
        }
        if end > self.entry.size as u64 {
            self.set_len(end as u32)?;
        }

        let bpc = self.fs.geometry().bytes_per_cluster() as u64;
        let idx = (self.position / bpc) as usize;
        let intra = (self.position % bpc) as usize;
        let n = (buf.len() as u64).min(bpc - intra as u64) as usize;

        let cluster = *self.chain.get(idx).ok_or(FsError::CorruptVolume)?;
        if n == bpc as usize {
            self.fs.write_cluster(cluster, &buf[..n])?;
        } else {
            let mut data = self.fs.read_cluster(cluster)?;
            data[intra..intra + n].copy_from_slice(&buf[..n]);
            self.fs.write_cluster(cluster, &data)?;
        }
        self.position += n as u64;
        Ok(n)
    }

    pub fn write_all(&mut self, mut buf: &[u8]) -> Result<(), FsError> {
        while !buf.is_empty() {
            let n = self.write(buf)?;
            buf = &buf[n..];
        }
        Ok(())
    }

    /// Resize the file.
    ///
    /// Shrinking terminates the chain at the new tail and returns the
    /// clusters cut off; they are still marked allocated, and it is the
    /// caller's job to release each one through
    /// [`crate::Fat::clear_entry`]. Growing appends zeroed clusters. The
    /// directory record's size field is patched either way; a file always
    /// keeps at least its first cluster.
    pub fn set_len(&mut self, len: u32) -> Result<Vec<u32>, FsError> {
        let bpc = self.fs.geometry().bytes_per_cluster() as u64;
        let keep = ((len as u64).div_ceil(bpc) as usize).max(1);

        let freed = if keep < self.chain.len() {
            let eof = self.fs.fat().eof_value();
            self.fs.fat_mut().set_entry(self.chain[keep - 1], eof)?;
            self.chain.split_off(keep)
        } else {
            let old = self.chain.len();
            self.chain = self.fs.fat_mut().chain(self.entry.first_cluster, len as u64)?;
            for &cluster in &self.chain[old..] {
                self.fs.zero_cluster(cluster)?;
            }
            Vec::new()
        };
        self.fs.update_record_size(&mut self.entry, len)?;
        Ok(freed)
    }
}

// ─── Unit tests ────────────────────────────────────────────────────────────────
