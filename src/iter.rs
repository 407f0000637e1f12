//! Sequential cross-page iteration.
//!
//! The iterator holds at most one page lock at a time: entering a page
//! it locks and walks that page's slot table; on exhaustion it unlocks
//! and advances to the next page. It gives no stability guarantee
//! across mutation — a record changed between a yield and the next
//! call may be missed or, if moved by expunge, not revisited.

use crate::error::Result;
use crate::layout::RecordHeader;
use crate::lock::{PageLock, DEFAULT_TIMEOUT_SECS};
use crate::page::{self, PageView};
use crate::region::Region;

/// One record handed back by [`CacheIter`].
#[derive(Debug, Clone)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub last_access: u32,
    pub expire_time: u32,
    pub flags: u32,
}

/// Walks every live record across every page, one page lock at a time.
pub struct CacheIter<'a> {
    region: &'a Region,
    start_slots: u32,
    page: u32,
    slot: u32,
    lock: Option<PageLock>,
}

impl<'a> CacheIter<'a> {
    pub(crate) fn new(region: &'a Region, start_slots: u32) -> Self {
        CacheIter {
            region,
            start_slots,
            page: 0,
            slot: 0,
            lock: None,
        }
    }

    /// Release whatever page lock is currently held, if any. Safe to
    /// call more than once.
    pub fn close(&mut self) -> Result<()> {
        if let Some(lock) = self.lock.take() {
            lock.release()?;
        }
        Ok(())
    }

    fn ensure_locked(&mut self) -> Result<bool> {
        if self.lock.is_some() {
            return Ok(true);
        }
        if self.page >= self.region.num_pages() {
            return Ok(false);
        }
        let lock = PageLock::acquire(self.region.raw_fd(), self.page, self.region.page_size(), DEFAULT_TIMEOUT_SECS)?;

        // Validate the header before trusting it, same as every other
        // lock acquisition (spec §4.5) — an iterator must not walk a
        // slot table sized by a corrupted `num_slots`.
        let header = PageView::new(
            unsafe { self.region.page_mut(self.page) },
            self.region.page_size(),
        )
        .header();
        if let Err(e) = page::check_header(&header, self.region.page_size(), self.page, self.start_slots) {
            let _ = lock.release();
            return Err(e);
        }

        self.lock = Some(lock);
        self.slot = 0;
        Ok(true)
    }

    /// Fetch the next live record, or `None` once every page has been
    /// exhausted.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        loop {
            if !self.ensure_locked()? {
                return Ok(None);
            }

            let bytes = unsafe { self.region.page_mut(self.page) };
            let view = PageView::new(bytes, self.region.page_size());
            let header = view.header();

            if self.slot >= header.num_slots {
                self.close()?;
                self.page += 1;
                continue;
            }

            let idx = self.slot;
            self.slot += 1;

            let data_offset = view.slot(idx);
            if data_offset <= 1 {
                continue;
            }

            let rh: RecordHeader = view.record_header_at(data_offset);
            let key = view.key_at(data_offset, &rh).to_vec();
            let value = view.value_at(data_offset, &rh).to_vec();

            return Ok(Some(Record {
                key,
                value,
                last_access: rh.last_access,
                expire_time: rh.expire_time,
                flags: rh.flags,
            }));
        }
    }
}

impl Drop for CacheIter<'_> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
