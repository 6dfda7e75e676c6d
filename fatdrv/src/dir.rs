//! Directory-entry management: the 32-byte record codec, listing with
//! VFAT long-name reconstruction, entry creation (8.3 and `~N` aliases
//! with long-name runs), deletion, rename, resize, and used-space
//! accounting.
//!
//! Records are decoded and encoded through explicit byte offsets over a
//! fixed 32-byte stride; every mutation goes through a sector
//! read-modify-write in `fs`, never through a cached reference.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use bitflags::bitflags;

use crate::fs::{DirStorage, FatFileSystem};
use crate::FsError;

pub(crate) const DIR_ENTRY_SIZE: usize = 32;
pub(crate) const DELETED_MARKER: u8 = 0xE5;

const ATTR_LONG_NAME: u8 = 0x0F;
const LAST_LFN_FLAG: u8 = 0x40;
const LFN_UNITS_PER_RECORD: usize = 13;
// UTF-16 unit positions inside a long-name record
const LFN_UNIT_OFFSETS: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
const MAX_LFN_UNITS: usize = 255;
const MAX_LFN_RECORDS: usize = 20;

bitflags! {
    /// The attribute byte of a short directory record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Unknown,
}

/// Where an entry's own records live inside its parent's data.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RecordLocation {
    pub dir: DirStorage,
    /// Byte offset of the short record.
    pub offset: usize,
    /// Byte offset of the first long-name record; equals `offset` when
    /// the entry has no long name.
    pub lfn_start: usize,
}

/// One file or directory node, built on demand while walking a listing.
/// Nothing is cached: every lookup re-reads the parent's data from the
/// device.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub short_name: [u8; 11],
    pub kind: EntryKind,
    pub attributes: FileAttributes,
    pub size: u32,
    pub first_cluster: u32,
    pub(crate) record: Option<RecordLocation>,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// True for the synthetic root entry, which has no on-disk record.
    pub fn is_root(&self) -> bool {
        self.record.is_none()
    }
}

// ─── Record codec ──────────────────────────────────────────────────────────────

fn record_first_cluster(rec: &[u8]) -> u32 {
    let hi = u16::from_le_bytes([rec[20], rec[21]]) as u32;
    let lo = u16::from_le_bytes([rec[26], rec[27]]) as u32;
    (hi << 16) | lo
}

fn record_size(rec: &[u8]) -> u32 {
    u32::from_le_bytes([rec[28], rec[29], rec[30], rec[31]])
}

fn encode_short_record(short: &[u8; 11], attr: u8, first_cluster: u32, size: u32) -> [u8; DIR_ENTRY_SIZE] {
    let mut rec = [0u8; DIR_ENTRY_SIZE];
    rec[..11].copy_from_slice(short);
    rec[11] = attr;
    rec[20..22].copy_from_slice(&((first_cluster >> 16) as u16).to_le_bytes());
    rec[26..28].copy_from_slice(&(first_cluster as u16).to_le_bytes());
    rec[28..32].copy_from_slice(&size.to_le_bytes());
    rec
}

/// Encode one long-name record carrying `units[start..start + 13]` of the
/// full name, with the 0x0000 terminator and 0xFFFF padding where the
/// name ends inside this record.
fn encode_lfn_record(seq: u8, last: bool, checksum: u8, units: &[u16], start: usize) -> [u8; DIR_ENTRY_SIZE] {
    let mut rec = [0xFFu8; DIR_ENTRY_SIZE];
    rec[0] = seq | if last { LAST_LFN_FLAG } else { 0 };
    rec[11] = ATTR_LONG_NAME;
    rec[12] = 0;
    rec[13] = checksum;
    rec[26] = 0;
    rec[27] = 0;
    for (part, off) in LFN_UNIT_OFFSETS.iter().enumerate() {
        let idx = start + part;
        let value = if idx < units.len() {
            units[idx]
        } else if idx == units.len() {
            0x0000
        } else {
            0xFFFF
        };
        rec[*off..*off + 2].copy_from_slice(&value.to_le_bytes());
    }
    rec
}

/// Checksum of an 8.3 name, embedded in every long-name record of a run.
pub(crate) fn short_name_checksum(short: &[u8; 11]) -> u8 {
    let mut sum = 0u8;
    for &byte in short {
        sum = ((sum & 1) << 7).wrapping_add(sum >> 1).wrapping_add(byte);
    }
    sum
}

/// `"NOTES   TXT"` → `"NOTES.TXT"`.
pub fn short_name_text(short: &[u8; 11]) -> String {
    let mut out = String::new();
    for &b in &short[..8] {
        if b == b' ' {
            break;
        }
        out.push(b as char);
    }
    if short[8..].iter().any(|&b| b != b' ') {
        out.push('.');
        for &b in &short[8..] {
            if b == b' ' {
                break;
            }
            out.push(b as char);
        }
    }
    out
}

// ─── Name encoding ─────────────────────────────────────────────────────────────

fn normalize_short_char(byte: u8) -> Result<u8, FsError> {
    let up = byte.to_ascii_uppercase();
    if up.is_ascii_alphanumeric() || matches!(up, b'_' | b'-' | b'$' | b'~') {
        Ok(up)
    } else {
        Err(FsError::InvalidName)
    }
}

/// Strict 8.3 encoding: ≤8 name characters, ≤3 extension characters, at
/// most a single dot, legal charset only.
fn encode_short_name(name: &str) -> Result<[u8; 11], FsError> {
    let bytes = name.as_bytes();
    let (base, ext) = match bytes.iter().position(|&b| b == b'.') {
        Some(dot) => {
            let after = &bytes[dot + 1..];
            if after.contains(&b'.') {
                return Err(FsError::InvalidName);
            }
            (&bytes[..dot], after)
        }
        None => (bytes, &[][..]),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return Err(FsError::InvalidName);
    }
    let mut out = [b' '; 11];
    for (i, &b) in base.iter().enumerate() {
        out[i] = normalize_short_char(b)?;
    }
    for (i, &b) in ext.iter().enumerate() {
        out[8 + i] = normalize_short_char(b)?;
    }
    Ok(out)
}

/// Synthesize the `attempt`-th short alias for a long name: up to six
/// base characters, `~N`, and the (truncated) extension.
fn make_short_alias(name: &str, attempt: u32) -> [u8; 11] {
    let bytes = name.as_bytes();
    let (base, ext) = match bytes.iter().rposition(|&b| b == b'.') {
        Some(dot) => (&bytes[..dot], &bytes[dot + 1..]),
        None => (bytes, &[][..]),
    };

    let mut out = [b' '; 11];
    for (i, &b) in ext.iter().take(3).enumerate() {
        out[8 + i] = normalize_short_char(b).unwrap_or(b'_');
    }

    let mut digits = [0u8; 10];
    let mut digit_count = 0usize;
    let mut n = attempt.max(1);
    while n > 0 {
        digits[digit_count] = b'0' + (n % 10) as u8;
        digit_count += 1;
        n /= 10;
    }

    let max_base = 6.min(8 - 1 - digit_count);
    let mut len = 0usize;
    for &b in base {
        if len >= max_base {
            break;
        }
        if b == b' ' {
            continue;
        }
        out[len] = normalize_short_char(b).unwrap_or(b'_');
        len += 1;
    }
    if len == 0 {
        out[..4.min(max_base)].copy_from_slice(&b"FILE"[..4.min(max_base)]);
        len = 4.min(max_base);
    }
    out[len] = b'~';
    len += 1;
    for i in 0..digit_count {
        out[len] = digits[digit_count - 1 - i];
        len += 1;
    }
    out
}

fn validate_long_name(name: &str) -> Result<(), FsError> {
    if name.is_empty() || name == "." || name == ".." {
        return Err(FsError::InvalidName);
    }
    let illegal = |b: u8| b < 0x20 || matches!(b, b'/' | b'\\' | b':' | b'*' | b'?' | b'"' | b'<' | b'>' | b'|');
    if name.bytes().any(illegal) {
        return Err(FsError::InvalidName);
    }
    Ok(())
}

fn utf16_units(name: &str) -> Result<Vec<u16>, FsError> {
    let units: Vec<u16> = name.encode_utf16().collect();
    if units.len() > MAX_LFN_UNITS {
        return Err(FsError::NameTooLong);
    }
    Ok(units)
}

// ─── Long-name accumulation ────────────────────────────────────────────────────

/// Collects long-name fragments while scanning a directory. Fragments are
/// stored last-fragment-first on disk, each carrying its sequence number;
/// the run must be contiguous and end at sequence 1 to count.
struct LfnState {
    units: Vec<u16>,
    seen_mask: u32,
    expected: u8,
    checksum: u8,
    start_offset: usize,
}

impl LfnState {
    fn new() -> Self {
        Self { units: Vec::new(), seen_mask: 0, expected: 0, checksum: 0, start_offset: 0 }
    }

    fn reset(&mut self) {
        self.units.clear();
        self.seen_mask = 0;
        self.expected = 0;
    }

    fn consume(&mut self, offset: usize, rec: &[u8]) {
        let order = rec[0];
        let seq = order & 0x1F;
        if seq == 0 || seq as usize > MAX_LFN_RECORDS {
            self.reset();
            return;
        }
        if order & LAST_LFN_FLAG != 0 {
            self.reset();
            self.expected = seq;
            self.checksum = rec[13];
            self.units = vec![0xFFFF; seq as usize * LFN_UNITS_PER_RECORD];
            self.start_offset = offset;
        }
        if self.expected == 0 || seq > self.expected || rec[13] != self.checksum {
            self.reset();
            return;
        }
        let base = (seq - 1) as usize * LFN_UNITS_PER_RECORD;
        for (i, off) in LFN_UNIT_OFFSETS.iter().enumerate() {
            self.units[base + i] = u16::from_le_bytes([rec[*off], rec[*off + 1]]);
        }
        self.seen_mask |= 1 << (seq - 1);
    }

    /// Flush the pending long name against the short record that follows
    /// it. The embedded checksum is trusted, not validated; a mismatch is
    /// only logged.
    fn take(&mut self, short: &[u8; 11]) -> Option<(String, usize)> {
        let complete_mask = if self.expected >= 32 { u32::MAX } else { (1u32 << self.expected) - 1 };
        if self.expected == 0 || self.seen_mask != complete_mask {
            self.reset();
            return None;
        }
        if self.checksum != short_name_checksum(short) {
            log::warn!("long name checksum mismatch on {}", short_name_text(short));
        }
        let units = self.units.iter().copied().take_while(|&u| u != 0x0000 && u != 0xFFFF);
        let name: String = char::decode_utf16(units)
            .map(|r| r.unwrap_or('\u{FFFD}'))
            .collect();
        let start = self.start_offset;
        self.reset();
        if name.is_empty() { None } else { Some((name, start)) }
    }
}

// ─── Directory operations ──────────────────────────────────────────────────────

impl FatFileSystem {
    /// Synthetic entry for the volume root, which has no record of its own.
    pub fn root_entry(&self) -> DirEntry {
        DirEntry {
            name: String::new(),
            short_name: [b' '; 11],
            kind: EntryKind::Directory,
            attributes: FileAttributes::DIRECTORY,
            size: 0,
            first_cluster: match self.root_storage() {
                DirStorage::Chain(cluster) => cluster,
                DirStorage::RootRegion => 0,
            },
            record: None,
        }
    }

    pub(crate) fn dir_storage(&self, dir: &DirEntry) -> DirStorage {
        if dir.record.is_none() {
            self.root_storage()
        } else {
            DirStorage::Chain(dir.first_cluster)
        }
    }

    /// List a directory: deleted records, dot entries, volume labels and
    /// long-name continuations are filtered out.
    pub fn list_directory(&mut self, dir: &DirEntry) -> Result<Vec<DirEntry>, FsError> {
        let storage = self.dir_storage(dir);
        self.list_storage(storage)
    }

    pub(crate) fn list_storage(&mut self, storage: DirStorage) -> Result<Vec<DirEntry>, FsError> {
        let data = self.read_dir_data(storage)?;
        let mut entries = Vec::new();
        let mut lfn = LfnState::new();

        for (idx, rec) in data.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
            let offset = idx * DIR_ENTRY_SIZE;
            if rec[0] == 0x00 {
                break;
            }
            if rec[0] == DELETED_MARKER {
                lfn.reset();
                continue;
            }
            if rec[11] == ATTR_LONG_NAME {
                lfn.consume(offset, rec);
                continue;
            }

            let mut short = [0u8; 11];
            short.copy_from_slice(&rec[..11]);
            let attributes = FileAttributes::from_bits_truncate(rec[11]);
            if short[0] == b'.' || attributes.contains(FileAttributes::VOLUME_ID) {
                lfn.reset();
                continue;
            }

            let (name, lfn_start) = match lfn.take(&short) {
                Some((name, start)) => (name, start),
                None => (short_name_text(&short), offset),
            };
            let kind = if attributes.contains(FileAttributes::DIRECTORY) {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            entries.push(DirEntry {
                name,
                short_name: short,
                kind,
                attributes,
                size: record_size(rec),
                first_cluster: record_first_cluster(rec),
                record: Some(RecordLocation { dir: storage, offset, lfn_start }),
            });
        }
        Ok(entries)
    }

    /// Create a file or directory entry under `parent`.
    ///
    /// Short-friendly names are stored as a bare 8.3 record; anything else
    /// gets a `~N` alias plus a long-name run. A fresh, terminated first
    /// cluster is always allocated; new directories get `.`/`..` records.
    pub fn create_entry(
        &mut self,
        parent: &DirEntry,
        name: &str,
        kind: EntryKind,
    ) -> Result<DirEntry, FsError> {
        if kind == EntryKind::Unknown {
            return Err(FsError::InvalidName);
        }
        validate_long_name(name)?;
        let storage = self.dir_storage(parent);
        let existing = self.list_storage(storage)?;
        if existing.iter().any(|e| e.name.eq_ignore_ascii_case(name)) {
            return Err(FsError::AlreadyExists);
        }

        let (short, lfn) = choose_short_name(&existing, name)?;
        let slots = lfn.as_ref().map_or(0, |u| u.len().div_ceil(LFN_UNITS_PER_RECORD)) + 1;
        let offset = self.find_slot_run(storage, slots)?;

        let first_cluster = self.fat_mut().allocate_first()?;
        let attr = match kind {
            EntryKind::Directory => FileAttributes::DIRECTORY,
            _ => FileAttributes::ARCHIVE,
        };
        if kind == EntryKind::Directory {
            self.init_directory_cluster(first_cluster, parent)?;
        } else {
            self.zero_cluster(first_cluster)?;
        }

        self.write_records(storage, offset, name, &short, lfn.as_deref(), attr, first_cluster, 0)
    }

    /// Mark an entry's short record and its long-name run deleted.
    ///
    /// The FAT chain is NOT reclaimed here; the caller releases each
    /// cluster explicitly through [`crate::Fat::clear_entry`].
    pub fn remove_entry(&mut self, entry: &DirEntry) -> Result<(), FsError> {
        let loc = entry.record.ok_or(FsError::InvalidName)?;
        let mut offset = loc.lfn_start;
        while offset <= loc.offset {
            self.write_dir_bytes(loc.dir, offset, &[DELETED_MARKER])?;
            offset += DIR_ENTRY_SIZE;
        }
        Ok(())
    }

    /// Rename within the same directory. The record run is rewritten
    /// (its slot count can change with the name), keeping cluster chain,
    /// size and attributes.
    pub fn rename_entry(&mut self, entry: &DirEntry, new_name: &str) -> Result<DirEntry, FsError> {
        let loc = entry.record.ok_or(FsError::InvalidName)?;
        validate_long_name(new_name)?;
        let storage = loc.dir;
        let existing = self.list_storage(storage)?;
        let other = |e: &DirEntry| e.record.map(|l| l.offset) != Some(loc.offset);
        if existing.iter().any(|e| other(e) && e.name.eq_ignore_ascii_case(new_name)) {
            return Err(FsError::AlreadyExists);
        }

        let peers: Vec<DirEntry> = existing.into_iter().filter(|e| other(e)).collect();
        let (short, lfn) = choose_short_name(&peers, new_name)?;
        self.remove_entry(entry)?;
        let slots = lfn.as_ref().map_or(0, |u| u.len().div_ceil(LFN_UNITS_PER_RECORD)) + 1;
        let offset = self.find_slot_run(storage, slots)?;
        self.write_records(
            storage,
            offset,
            new_name,
            &short,
            lfn.as_deref(),
            entry.attributes,
            entry.first_cluster,
            entry.size,
        )
    }

    /// Patch the 4-byte size field of an entry's short record.
    pub(crate) fn update_record_size(&mut self, entry: &mut DirEntry, size: u32) -> Result<(), FsError> {
        let loc = entry.record.ok_or(FsError::NotAFile)?;
        self.write_dir_bytes(loc.dir, loc.offset + 28, &size.to_le_bytes())?;
        entry.size = size;
        Ok(())
    }

    /// Patch the attribute byte. The directory and volume-label bits are
    /// not caller-controlled.
    pub fn set_attributes(&mut self, entry: &mut DirEntry, attributes: FileAttributes) -> Result<(), FsError> {
        let loc = entry.record.ok_or(FsError::InvalidName)?;
        let mut merged = attributes;
        merged.remove(FileAttributes::VOLUME_ID);
        merged.set(FileAttributes::DIRECTORY, entry.kind == EntryKind::Directory);
        self.write_dir_bytes(loc.dir, loc.offset + 11, &[merged.bits()])?;
        entry.attributes = merged;
        Ok(())
    }

    /// Recursive sum of file sizes under `dir`, re-reading every
    /// directory's data. No aggregate is cached anywhere.
    pub fn used_space(&mut self, dir: &DirEntry) -> Result<u64, FsError> {
        let mut total = 0u64;
        for child in self.list_directory(dir)? {
            match child.kind {
                EntryKind::File => total += child.size as u64,
                EntryKind::Directory => total += self.used_space(&child)?,
                EntryKind::Unknown => {}
            }
        }
        Ok(total)
    }

    // ─── Internals ─────────────────────────────────────────────────────────────

    /// Byte offset of the first run of `slots` free records, growing the
    /// directory when none exists.
    fn find_slot_run(&mut self, storage: DirStorage, slots: usize) -> Result<usize, FsError> {
        loop {
            let data = self.read_dir_data(storage)?;
            let mut run = 0usize;
            for (idx, rec) in data.chunks_exact(DIR_ENTRY_SIZE).enumerate() {
                if rec[0] == 0x00 || rec[0] == DELETED_MARKER {
                    run += 1;
                    if run == slots {
                        return Ok((idx + 1 - slots) * DIR_ENTRY_SIZE);
                    }
                } else {
                    run = 0;
                }
            }
            self.extend_directory(storage)?;
        }
    }

    fn init_directory_cluster(&mut self, cluster: u32, parent: &DirEntry) -> Result<(), FsError> {
        let mut buf = vec![0u8; self.geometry().bytes_per_cluster() as usize];

        let mut dot = [b' '; 11];
        dot[0] = b'.';
        buf[..DIR_ENTRY_SIZE].copy_from_slice(&encode_short_record(
            &dot,
            FileAttributes::DIRECTORY.bits(),
            cluster,
            0,
        ));

        let mut dotdot = [b' '; 11];
        dotdot[0] = b'.';
        dotdot[1] = b'.';
        // `..` of a directory directly under the root points at cluster 0
        let parent_cluster = if parent.is_root() { 0 } else { parent.first_cluster };
        buf[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(&encode_short_record(
            &dotdot,
            FileAttributes::DIRECTORY.bits(),
            parent_cluster,
            0,
        ));

        self.write_cluster(cluster, &buf)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_records(
        &mut self,
        storage: DirStorage,
        offset: usize,
        name: &str,
        short: &[u8; 11],
        lfn_units: Option<&[u16]>,
        attributes: FileAttributes,
        first_cluster: u32,
        size: u32,
    ) -> Result<DirEntry, FsError> {
        let mut buf = Vec::new();
        if let Some(units) = lfn_units {
            let records = units.len().div_ceil(LFN_UNITS_PER_RECORD);
            let checksum = short_name_checksum(short);
            for idx in 0..records {
                let seq = (records - idx) as u8;
                let start = (seq as usize - 1) * LFN_UNITS_PER_RECORD;
                buf.extend_from_slice(&encode_lfn_record(seq, idx == 0, checksum, units, start));
            }
        }
        buf.extend_from_slice(&encode_short_record(short, attributes.bits(), first_cluster, size));
        self.write_dir_bytes(storage, offset, &buf)?;

        let short_offset = offset + buf.len() - DIR_ENTRY_SIZE;
        let kind = if attributes.contains(FileAttributes::DIRECTORY) {
            EntryKind::Directory
        } else {
            EntryKind::File
        };
        // without a long-name run the stored 8.3 text is the display name,
        // so a listing and this return value agree
        let name = if lfn_units.is_some() {
            String::from(name)
        } else {
            short_name_text(short)
        };
        Ok(DirEntry {
            name,
            short_name: *short,
            kind,
            attributes,
            size,
            first_cluster,
            record: Some(RecordLocation { dir: storage, offset: short_offset, lfn_start: offset }),
        })
    }
}

/// Pick the stored 8.3 name for `name`: the direct encoding when it fits
/// and is unused, otherwise a unique `~N` alias plus the UTF-16 units of
/// the long name.
fn choose_short_name(
    existing: &[DirEntry],
    name: &str,
) -> Result<([u8; 11], Option<Vec<u16>>), FsError> {
    let in_use = |short: &[u8; 11]| existing.iter().any(|e| &e.short_name == short);

    if let Ok(short) = encode_short_name(name) {
        if !in_use(&short) {
            return Ok((short, None));
        }
    }

    let units = utf16_units(name)?;
    for attempt in 1..10_000u32 {
        let alias = make_short_alias(name, attempt);
        if !in_use(&alias) {
            return Ok((alias, Some(units)));
        }
    }
    Err(FsError::DirectoryFull)
}

// ─── Unit tests ────────────────────────────────────────────────────────────────
