//! Page-organized disk storage: the [`Pager`] manages fixed-size pages and a
//! free-page list over a single file; [`SlottedPage`] lays out variable-length
//! records within one page. Everything above this crate talks in whole pages
//! and record ids; nothing here knows about rows, tables, or SQL types.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use common::{DbError, DbResult, PageId, SlotId};
use log::{debug, trace};

/// Page 0 is reserved for file metadata and is never handed out by `allocate_page`.
pub const META_PAGE_ID: PageId = 0;

const MAGIC: &[u8; 4] = b"MDBP";
const META_HEADER_LEN: usize = 4 + 2 + 2 + 4 + 4;

const PAGE_HEADER_LEN: usize = 4 + 2 + 2 + 2;
pub const SLOT_LEN: usize = 2 + 2 + 1 + 1;

/// On-disk file metadata, stored verbatim in page 0's first bytes.
///
/// Layout: `magic[4] | version:u16 | page_size:u16 | page_count:i32 | free_head:i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Meta {
    version: u16,
    page_size: u16,
    page_count: i32,
    free_head: i32,
}

impl Meta {
    fn encode(&self) -> [u8; META_HEADER_LEN] {
        let mut buf = [0u8; META_HEADER_LEN];
        buf[0..4].copy_from_slice(MAGIC);
        buf[4..6].copy_from_slice(&self.version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.page_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.page_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.free_head.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> DbResult<Self> {
        if &buf[0..4] != MAGIC {
            return Err(DbError::StorageIoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "bad page file magic",
            )));
        }
        Ok(Meta {
            version: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            page_size: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            page_count: i32::from_le_bytes(buf[8..12].try_into().unwrap()),
            free_head: i32::from_le_bytes(buf[12..16].try_into().unwrap()),
        })
    }
}

/// Manages a single backing file as a sequence of fixed-size pages, with an
/// intrusive free-list threaded through freed pages' first four bytes.
///
/// Grounded on the original's `storage/pager.py`: page 0 holds the meta
/// header, `allocate_page` pops the free list (LIFO) before growing the file,
/// and `free_page` pushes onto the list by writing the previous head into the
/// freed page's first four bytes.
pub struct Pager {
    file: File,
    page_size: usize,
    page_count: i32,
    free_head: i32,
}

impl Pager {
    /// Opens (creating if absent) a page file at `path` with the given page size.
    /// An existing file's meta header must match `page_size` exactly.
    pub fn open<P: AsRef<Path>>(path: P, page_size: u32) -> DbResult<Self> {
        let path = path.as_ref();
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let page_size = page_size as usize;
        if is_new {
            let mut pager = Pager {
                file,
                page_size,
                page_count: 1,
                free_head: -1,
            };
            pager.write_meta()?;
            let zero = vec![0u8; page_size - META_HEADER_LEN];
            pager.file.write_all(&zero)?;
            pager.file.sync_all()?;
            debug!("created new page file at {} (page_size={page_size})", path.display());
            return Ok(pager);
        }

        let mut header = vec![0u8; META_HEADER_LEN];
        file.read_exact(&mut header)?;
        let meta = Meta::decode(&header)?;
        if meta.page_size as usize != page_size {
            return Err(DbError::StorageIoError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "page file {} was created with page_size={} but opened with {page_size}",
                    path.display(),
                    meta.page_size
                ),
            )));
        }
        debug!(
            "opened page file at {} (page_count={}, free_head={})",
            path.display(),
            meta.page_count,
            meta.free_head
        );
        Ok(Pager {
            file,
            page_size,
            page_count: meta.page_count,
            free_head: meta.free_head,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn page_count(&self) -> i32 {
        self.page_count
    }

    fn write_meta(&mut self) -> DbResult<()> {
        let meta = Meta {
            version: 1,
            page_size: self.page_size as u16,
            page_count: self.page_count,
            free_head: self.free_head,
        };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&meta.encode())?;
        Ok(())
    }

    fn offset_of(&self, page_id: PageId) -> u64 {
        page_id as u64 * self.page_size as u64
    }

    fn check_in_range(&self, page_id: PageId) -> DbResult<()> {
        if page_id >= self.page_count as u32 {
            return Err(DbError::PageOutOfRange {
                page_id,
                page_count: self.page_count as u32,
            });
        }
        Ok(())
    }

    /// Reads a full page's raw bytes.
    pub fn read_page(&mut self, page_id: PageId) -> DbResult<Vec<u8>> {
        self.check_in_range(page_id)?;
        let mut buf = vec![0u8; self.page_size];
        self.file.seek(SeekFrom::Start(self.offset_of(page_id)))?;
        self.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Overwrites a full page's raw bytes. `data` must be exactly `page_size` bytes.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> DbResult<()> {
        self.check_in_range(page_id)?;
        debug_assert_eq!(data.len(), self.page_size);
        self.file.seek(SeekFrom::Start(self.offset_of(page_id)))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Allocates a page, preferring a reused freed page (popped off the free
    /// list) over growing the file. The returned page is zero-filled.
    pub fn allocate_page(&mut self) -> DbResult<PageId> {
        if self.free_head >= 0 {
            let page_id = self.free_head as PageId;
            let page = self.read_page(page_id)?;
            let next = i32::from_le_bytes(page[0..4].try_into().unwrap());
            self.free_head = next;
            self.write_page(page_id, &vec![0u8; self.page_size])?;
            self.write_meta()?;
            trace!("allocate_page reused freed page {page_id}");
            return Ok(page_id);
        }
        let page_id = self.page_count as PageId;
        self.page_count += 1;
        self.write_meta()?;
        self.write_page(page_id, &vec![0u8; self.page_size])?;
        trace!("allocate_page grew file to page {page_id}");
        Ok(page_id)
    }

    /// Pushes `page_id` onto the free list. The page's contents are
    /// overwritten with the previous free-list head encoded in its first four
    /// bytes; callers must not read it as live data afterward.
    pub fn free_page(&mut self, page_id: PageId) -> DbResult<()> {
        self.check_in_range(page_id)?;
        let mut buf = vec![0u8; self.page_size];
        buf[0..4].copy_from_slice(&self.free_head.to_le_bytes());
        self.write_page(page_id, &buf)?;
        self.free_head = page_id as i32;
        self.write_meta()?;
        trace!("free_page {page_id} pushed onto free list");
        Ok(())
    }

    pub fn sync(&mut self) -> DbResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// One slot directory entry: `offset:u16 | length:u16 | tombstone:u8 | pad:u8`.
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u16,
    length: u16,
    tombstone: bool,
}

impl Slot {
    fn encode(&self) -> [u8; SLOT_LEN] {
        let mut buf = [0u8; SLOT_LEN];
        buf[0..2].copy_from_slice(&self.offset.to_le_bytes());
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        buf[4] = self.tombstone as u8;
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        Slot {
            offset: u16::from_le_bytes(buf[0..2].try_into().unwrap()),
            length: u16::from_le_bytes(buf[2..4].try_into().unwrap()),
            tombstone: buf[4] != 0,
        }
    }
}

/// A slotted page: a mutable view over one page's worth of bytes, laying out
/// variable-length records that grow upward from a 10-byte header while their
/// slot directory grows downward from the end of the page.
///
/// Grounded on the original's `storage/data_page.py`. Deletion is
/// tombstone-only; no record is ever moved once inserted, so a `RecordId`
/// stays valid until the page itself is freed.
pub struct SlottedPage<'a> {
    buf: &'a mut [u8],
}

impl<'a> SlottedPage<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        SlottedPage { buf }
    }

    fn page_id(&self) -> PageId {
        u32::from_le_bytes(self.buf[0..4].try_into().unwrap())
    }

    fn free_off(&self) -> u16 {
        u16::from_le_bytes(self.buf[4..6].try_into().unwrap())
    }

    fn set_free_off(&mut self, v: u16) {
        self.buf[4..6].copy_from_slice(&v.to_le_bytes());
    }

    pub fn slot_count(&self) -> u16 {
        u16::from_le_bytes(self.buf[6..8].try_into().unwrap())
    }

    fn set_slot_count(&mut self, v: u16) {
        self.buf[6..8].copy_from_slice(&v.to_le_bytes());
    }

    /// Initializes an empty page in place, stamping `page_id` into the header.
    pub fn format_empty(buf: &'a mut [u8], page_id: PageId) {
        buf.fill(0);
        buf[0..4].copy_from_slice(&page_id.to_le_bytes());
        buf[4..6].copy_from_slice(&(PAGE_HEADER_LEN as u16).to_le_bytes());
        // slot_count and flags already zeroed.
    }

    fn slot_dir_offset(&self, slot_id: SlotId) -> usize {
        self.buf.len() - (slot_id as usize + 1) * SLOT_LEN
    }

    fn read_slot(&self, slot_id: SlotId) -> Slot {
        let off = self.slot_dir_offset(slot_id);
        Slot::decode(&self.buf[off..off + SLOT_LEN])
    }

    fn write_slot(&mut self, slot_id: SlotId, slot: Slot) {
        let off = self.slot_dir_offset(slot_id);
        self.buf[off..off + SLOT_LEN].copy_from_slice(&slot.encode());
    }

    /// Bytes available for a new record, accounting for its slot entry too.
    pub fn free_space(&self) -> usize {
        let used_by_dir = (self.slot_count() as usize + 1) * SLOT_LEN;
        (self.buf.len() as isize - self.free_off() as isize - used_by_dir as isize).max(0) as usize
    }

    pub fn can_fit(&self, payload_len: usize) -> bool {
        self.free_space() >= payload_len
    }

    /// Appends `payload` as a new record, returning its slot id.
    pub fn insert_record(&mut self, payload: &[u8]) -> DbResult<SlotId> {
        if payload.len() > u16::MAX as usize || !self.can_fit(payload.len()) {
            return Err(DbError::OutOfPageSpace {
                page_id: self.page_id(),
                needed: payload.len(),
            });
        }
        let off = self.free_off();
        self.buf[off as usize..off as usize + payload.len()].copy_from_slice(payload);
        let slot_id = self.slot_count();
        self.write_slot(
            slot_id,
            Slot {
                offset: off,
                length: payload.len() as u16,
                tombstone: false,
            },
        );
        self.set_free_off(off + payload.len() as u16);
        self.set_slot_count(slot_id + 1);
        Ok(slot_id)
    }

    /// Reads a live record's bytes. Returns `RecordDeleted` for a tombstoned slot.
    pub fn read_record(&self, slot_id: SlotId) -> DbResult<Vec<u8>> {
        if slot_id >= self.slot_count() {
            return Err(DbError::RecordDeleted {
                page_id: self.page_id(),
                slot_id,
            });
        }
        let slot = self.read_slot(slot_id);
        if slot.tombstone {
            return Err(DbError::RecordDeleted {
                page_id: self.page_id(),
                slot_id,
            });
        }
        let start = slot.offset as usize;
        let end = start + slot.length as usize;
        Ok(self.buf[start..end].to_vec())
    }

    /// Marks a slot's record as deleted without reclaiming its bytes. Idempotent.
    pub fn delete_record(&mut self, slot_id: SlotId) -> DbResult<()> {
        if slot_id >= self.slot_count() {
            return Err(DbError::RecordDeleted {
                page_id: self.page_id(),
                slot_id,
            });
        }
        let mut slot = self.read_slot(slot_id);
        slot.tombstone = true;
        self.write_slot(slot_id, slot);
        Ok(())
    }

    /// Overwrites a live record in place. The new payload must fit in the
    /// slot's original length — callers that need more room must delete and
    /// reinsert elsewhere.
    pub fn overwrite_record(&mut self, slot_id: SlotId, payload: &[u8]) -> DbResult<()> {
        if slot_id >= self.slot_count() {
            return Err(DbError::RecordDeleted {
                page_id: self.page_id(),
                slot_id,
            });
        }
        let slot = self.read_slot(slot_id);
        if slot.tombstone {
            return Err(DbError::RecordDeleted {
                page_id: self.page_id(),
                slot_id,
            });
        }
        if payload.len() != slot.length as usize {
            return Err(DbError::OutOfPageSpace {
                page_id: self.page_id(),
                needed: payload.len(),
            });
        }
        let start = slot.offset as usize;
        self.buf[start..start + payload.len()].copy_from_slice(payload);
        Ok(())
    }

    pub fn is_tombstoned(&self, slot_id: SlotId) -> bool {
        slot_id < self.slot_count() && self.read_slot(slot_id).tombstone
    }

    /// Iterates live (non-tombstoned) slot ids in insertion order.
    pub fn iter_live_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        (0..self.slot_count()).filter(|&s| !self.read_slot(s).tombstone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_pager() -> (tempfile::TempDir, Pager) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        let pager = Pager::open(&path, 4096).unwrap();
        (dir, pager)
    }

    #[test]
    fn allocate_grows_file_then_reuses_freed_pages() {
        let (_dir, mut pager) = open_pager();
        let a = pager.allocate_page().unwrap();
        let b = pager.allocate_page().unwrap();
        assert_ne!(a, b);
        pager.free_page(b).unwrap();
        pager.free_page(a).unwrap();
        // LIFO: last freed is first reused.
        let reused1 = pager.allocate_page().unwrap();
        let reused2 = pager.allocate_page().unwrap();
        assert_eq!(reused1, a);
        assert_eq!(reused2, b);
    }

    #[test]
    fn reused_page_is_zero_filled() {
        let (_dir, mut pager) = open_pager();
        let p = pager.allocate_page().unwrap();
        let mut data = pager.read_page(p).unwrap();
        data[10] = 0xAB;
        pager.write_page(p, &data).unwrap();
        pager.free_page(p).unwrap();
        let reused = pager.allocate_page().unwrap();
        assert_eq!(reused, p);
        let fresh = pager.read_page(reused).unwrap();
        assert_eq!(fresh[10], 0);
    }

    #[test]
    fn reopen_reads_back_persisted_meta() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        {
            let mut pager = Pager::open(&path, 4096).unwrap();
            pager.allocate_page().unwrap();
            pager.allocate_page().unwrap();
            pager.sync().unwrap();
        }
        let pager = Pager::open(&path, 4096).unwrap();
        assert_eq!(pager.page_count(), 3); // meta page + 2 allocated
    }

    #[test]
    fn page_size_mismatch_on_reopen_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.db");
        Pager::open(&path, 4096).unwrap();
        let err = Pager::open(&path, 8192);
        assert!(err.is_err());
    }

    #[test]
    fn insert_read_delete_record_roundtrip() {
        let mut buf = vec![0u8; 4096];
        SlottedPage::format_empty(&mut buf, 1);
        let mut page = SlottedPage::new(&mut buf);
        let slot = page.insert_record(b"hello").unwrap();
        assert_eq!(page.read_record(slot).unwrap(), b"hello");
        page.delete_record(slot).unwrap();
        assert!(matches!(page.read_record(slot), Err(DbError::RecordDeleted { .. })));
        // deleting again is idempotent
        page.delete_record(slot).unwrap();
    }

    #[test]
    fn overwrite_requires_equal_length() {
        let mut buf = vec![0u8; 4096];
        SlottedPage::format_empty(&mut buf, 1);
        let mut page = SlottedPage::new(&mut buf);
        let slot = page.insert_record(b"abcde").unwrap();
        assert!(page.overwrite_record(slot, b"xyz").is_err());
        page.overwrite_record(slot, b"fghij").unwrap();
        assert_eq!(page.read_record(slot).unwrap(), b"fghij");
    }

    #[test]
    fn free_space_shrinks_with_each_insert() {
        let mut buf = vec![0u8; 4096];
        SlottedPage::format_empty(&mut buf, 1);
        let mut page = SlottedPage::new(&mut buf);
        let before = page.free_space();
        page.insert_record(b"0123456789").unwrap();
        let after = page.free_space();
        assert_eq!(before - after, 10 + SLOT_LEN);
    }

    #[test]
    fn insert_fails_once_page_is_full() {
        let mut buf = vec![0u8; 64];
        SlottedPage::format_empty(&mut buf, 1);
        let mut page = SlottedPage::new(&mut buf);
        loop {
            if page.insert_record(b"0123456789").is_err() {
                break;
            }
        }
        assert!(page.insert_record(b"x").is_err());
    }

    #[test]
    fn iter_live_slots_skips_tombstones() {
        let mut buf = vec![0u8; 4096];
        SlottedPage::format_empty(&mut buf, 1);
        let mut page = SlottedPage::new(&mut buf);
        let a = page.insert_record(b"a").unwrap();
        let b = page.insert_record(b"b").unwrap();
        let c = page.insert_record(b"c").unwrap();
        page.delete_record(b).unwrap();
        let live: Vec<_> = page.iter_live_slots().collect();
        assert_eq!(live, vec![a, c]);
    }
}
