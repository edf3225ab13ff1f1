//! A table heap: a logical table as a set of data pages, with a free space map
//! (FSM) steering first-fit insert placement. Grounded on
//! `original_source/storage/table_heap.py`.

use std::collections::HashMap;

use buffer::BufferPool;
use common::{DbResult, PageId, RecordId};
use log::trace;
use storage::SlottedPage;

/// Tracks which data pages belong to a table and a rough free-byte estimate per page.
#[derive(Debug, Clone, Default)]
pub struct TableMeta {
    pub data_pids: Vec<PageId>,
    pub fsm: HashMap<PageId, usize>,
}

/// A logical table's storage: insert/scan/delete/update over a set of data pages
/// owned by one [`BufferPool`].
pub struct TableHeap<'a> {
    bp: &'a mut BufferPool,
    meta: TableMeta,
}

impl<'a> TableHeap<'a> {
    pub fn new(bp: &'a mut BufferPool, meta: TableMeta) -> Self {
        TableHeap { bp, meta }
    }

    pub fn meta(&self) -> &TableMeta {
        &self.meta
    }

    pub fn into_meta(self) -> TableMeta {
        self.meta
    }

    /// Full-table scan in page/slot order, skipping tombstoned records.
    pub fn scan(&mut self) -> DbResult<Vec<(RecordId, Vec<u8>)>> {
        let mut out = Vec::new();
        for &pid in &self.meta.data_pids {
            let data = self.bp.get_page(pid)?;
            let page = SlottedPage::new(data);
            for slot_id in page.iter_live_slots() {
                out.push((RecordId::new(pid, slot_id), page.read_record(slot_id)?));
            }
            self.bp.unpin(pid, false)?;
        }
        Ok(out)
    }

    /// Inserts `payload`, placing it in the first FSM-eligible page or a fresh one.
    pub fn insert(&mut self, payload: &[u8]) -> DbResult<RecordId> {
        let overhead = storage::SLOT_LEN;
        let required = payload.len() + overhead;

        let mut pid = self.choose_page_for_insert(required);
        if pid.is_none() {
            pid = Some(self.allocate_data_page()?);
        }
        let mut pid = pid.unwrap();

        {
            let data = self.bp.get_page(pid)?;
            let page = SlottedPage::new(data);
            if !page.can_fit(payload.len()) {
                self.bp.unpin(pid, false)?;
                pid = self.allocate_data_page()?;
            } else {
                self.bp.unpin(pid, false)?;
            }
        }

        let data = self.bp.get_page(pid)?;
        let mut page = SlottedPage::new(data);
        let slot_id = page.insert_record(payload)?;
        self.meta.fsm.insert(pid, page.free_space());
        self.bp.unpin(pid, true)?;
        Ok(RecordId::new(pid, slot_id))
    }

    /// Tombstones a record. Idempotent on an already-deleted slot.
    pub fn delete(&mut self, rid: RecordId) -> DbResult<()> {
        let data = self.bp.get_page(rid.page_id)?;
        let mut page = SlottedPage::new(data);
        page.delete_record(rid.slot_id)?;
        self.meta.fsm.insert(rid.page_id, page.free_space());
        self.bp.unpin(rid.page_id, true)?;
        Ok(())
    }

    /// Updates a record: overwrites in place if the new payload's length matches the
    /// old one, otherwise deletes and reinserts (which may land on a different page).
    pub fn update(&mut self, rid: RecordId, new_payload: &[u8]) -> DbResult<RecordId> {
        {
            let data = self.bp.get_page(rid.page_id)?;
            let mut page = SlottedPage::new(data);
            if page.overwrite_record(rid.slot_id, new_payload).is_ok() {
                self.meta.fsm.insert(rid.page_id, page.free_space());
                self.bp.unpin(rid.page_id, true)?;
                return Ok(rid);
            }
        }
        trace!("update record {rid:?} changed length, deleting and reinserting");
        let data = self.bp.get_page(rid.page_id)?;
        let mut page = SlottedPage::new(data);
        page.delete_record(rid.slot_id)?;
        self.meta.fsm.insert(rid.page_id, page.free_space());
        self.bp.unpin(rid.page_id, true)?;
        self.insert(new_payload)
    }

    fn choose_page_for_insert(&self, required: usize) -> Option<PageId> {
        self.meta
            .data_pids
            .iter()
            .copied()
            .find(|pid| self.meta.fsm.get(pid).copied().unwrap_or(0) >= required)
    }

    fn allocate_data_page(&mut self) -> DbResult<PageId> {
        let pid = self.bp.pager_mut().allocate_page()?;
        trace!("heap grew by one data page ({pid}), {} total", self.meta.data_pids.len() + 1);
        self.meta.data_pids.push(pid);
        let data = self.bp.get_page(pid)?;
        SlottedPage::format_empty(data, pid);
        let free = SlottedPage::new(data).free_space();
        self.meta.fsm.insert(pid, free);
        self.bp.unpin(pid, true)?;
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::BufferPoolPolicy;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, BufferPool) {
        let dir = tempdir().unwrap();
        let pager = storage::Pager::open(dir.path().join("data.db"), 4096).unwrap();
        (dir, BufferPool::new(pager, 8, BufferPoolPolicy::Lru))
    }

    #[test]
    fn insert_and_scan_roundtrip() {
        let (_dir, mut bp) = setup();
        let mut heap = TableHeap::new(&mut bp, TableMeta::default());
        let a = heap.insert(b"alice").unwrap();
        let b = heap.insert(b"bob").unwrap();
        let rows = heap.scan().unwrap();
        assert_eq!(rows, vec![(a, b"alice".to_vec()), (b, b"bob".to_vec())]);
    }

    #[test]
    fn delete_removes_from_scan() {
        let (_dir, mut bp) = setup();
        let mut heap = TableHeap::new(&mut bp, TableMeta::default());
        let a = heap.insert(b"alice").unwrap();
        let b = heap.insert(b"bob").unwrap();
        heap.delete(a).unwrap();
        let rows = heap.scan().unwrap();
        assert_eq!(rows, vec![(b, b"bob".to_vec())]);
    }

    #[test]
    fn update_equal_length_overwrites_in_place() {
        let (_dir, mut bp) = setup();
        let mut heap = TableHeap::new(&mut bp, TableMeta::default());
        let rid = heap.insert(b"alice").unwrap();
        let new_rid = heap.update(rid, b"ALICE").unwrap();
        assert_eq!(new_rid, rid);
        let rows = heap.scan().unwrap();
        assert_eq!(rows, vec![(rid, b"ALICE".to_vec())]);
    }

    #[test]
    fn update_different_length_reinserts() {
        let (_dir, mut bp) = setup();
        let mut heap = TableHeap::new(&mut bp, TableMeta::default());
        let rid = heap.insert(b"al").unwrap();
        let new_rid = heap.update(rid, b"alice-longer").unwrap();
        assert_ne!(new_rid, rid);
        let rows = heap.scan().unwrap();
        assert_eq!(rows, vec![(new_rid, b"alice-longer".to_vec())]);
    }

    #[test]
    fn insert_spills_to_new_page_when_full() {
        let (_dir, mut bp) = setup();
        let mut heap = TableHeap::new(&mut bp, TableMeta::default());
        let payload = vec![b'x'; 500];
        for _ in 0..20 {
            heap.insert(&payload).unwrap();
        }
        assert!(heap.meta().data_pids.len() > 1);
    }
}
