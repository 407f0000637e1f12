//! A typed, bounds-checked view over one page's raw bytes.
//!
//! Everything here assumes the caller already holds that page's lock.
//! Offsets are always validated against `page_size` before any slice is
//! handed out, replacing the raw pointer arithmetic of the engine this
//! crate is modeled on with accessors that can't read or write outside
//! the page.

use crate::error::{Error, Result};
use crate::hash::hash_key;
use crate::layout::{self, PageHeader, RecordHeader, HEADER_SIZE, SLOT_ENTRY_SIZE};

/// Byte offset of the start of the slot table.
#[inline]
pub fn slot_table_offset() -> u32 {
    HEADER_SIZE
}

/// Lowest valid offset a used slot's `data_offset` may point to, given
/// `num_slots`.
#[inline]
pub fn min_record_offset(num_slots: u32) -> u32 {
    HEADER_SIZE + num_slots * SLOT_ENTRY_SIZE
}

/// A page's raw bytes, borrowed for the duration of one locked
/// operation.
pub struct PageView<'a> {
    bytes: &'a mut [u8],
    page_size: u32,
}

impl<'a> PageView<'a> {
    /// `bytes` must be exactly one page's worth of backing-file memory.
    pub fn new(bytes: &'a mut [u8], page_size: u32) -> Self {
        debug_assert_eq!(bytes.len(), page_size as usize);
        PageView { bytes, page_size }
    }

    pub fn header(&self) -> PageHeader {
        PageHeader::read_from(self.bytes)
    }

    pub fn write_header_counters(&mut self, header: &PageHeader) {
        header.write_counters(self.bytes);
    }

    /// Read the data offset stored in slot `index`.
    pub fn slot(&self, index: u32) -> u32 {
        let off = (slot_table_offset() + index * SLOT_ENTRY_SIZE) as usize;
        u32::from_ne_bytes(self.bytes[off..off + 4].try_into().unwrap())
    }

    /// Overwrite the data offset stored in slot `index`.
    pub fn set_slot(&mut self, index: u32, value: u32) {
        let off = (slot_table_offset() + index * SLOT_ENTRY_SIZE) as usize;
        self.bytes[off..off + 4].copy_from_slice(&value.to_ne_bytes());
    }

    pub fn record_header_at(&self, offset: u32) -> RecordHeader {
        let off = offset as usize;
        RecordHeader::read_from(&self.bytes[off..off + layout::RECORD_HEADER_SIZE as usize])
    }

    pub fn write_record_header_at(&mut self, offset: u32, header: &RecordHeader) {
        let off = offset as usize;
        header.write_to(&mut self.bytes[off..off + layout::RECORD_HEADER_SIZE as usize]);
    }

    /// Borrow the key bytes of the record at `offset`, given its parsed
    /// header.
    pub fn key_at(&self, offset: u32, header: &RecordHeader) -> &[u8] {
        let start = offset as usize + layout::RECORD_HEADER_SIZE as usize;
        &self.bytes[start..start + header.key_len as usize]
    }

    /// Borrow the value bytes of the record at `offset`, given its
    /// parsed header.
    pub fn value_at(&self, offset: u32, header: &RecordHeader) -> &[u8] {
        let start =
            offset as usize + layout::RECORD_HEADER_SIZE as usize + header.key_len as usize;
        &self.bytes[start..start + header.val_len as usize]
    }

    /// Write a full record (header + key + value) at `offset`.
    pub fn write_record(&mut self, offset: u32, header: &RecordHeader, key: &[u8], value: &[u8]) {
        self.write_record_header_at(offset, header);
        let key_start = offset as usize + layout::RECORD_HEADER_SIZE as usize;
        self.bytes[key_start..key_start + key.len()].copy_from_slice(key);
        let val_start = key_start + key.len();
        self.bytes[val_start..val_start + value.len()].copy_from_slice(value);
    }

    /// Zero the whole page.
    pub fn zero(&mut self) {
        self.bytes.fill(0);
    }

    pub fn raw(&self) -> &[u8] {
        self.bytes
    }

    pub fn raw_mut(&mut self) -> &mut [u8] {
        self.bytes
    }
}

/// Validate only the header-level invariants of §3: magic, the
/// `start_slots` floor, counter ordering, and `free_data`/`free_bytes`
/// consistency with `page_size`. This is the cheap check run on every
/// page-lock acquisition (spec §4.5) — it never walks the slot table
/// or heap, unlike the full [`self_check`].
pub fn check_header(header: &PageHeader, page_size: u32, page_num: u32, start_slots: u32) -> Result<()> {
    let fail = |reason: String| -> Result<()> {
        Err(Error::Corruption {
            page: page_num,
            reason,
        })
    };

    if header.magic != layout::MAGIC {
        return fail(format!("bad magic {:#x}", header.magic));
    }
    if header.num_slots < start_slots {
        return fail(format!(
            "num_slots {} below start_slots {start_slots}",
            header.num_slots
        ));
    }
    if !(header.old_slots <= header.free_slots && header.free_slots <= header.num_slots) {
        return fail(format!(
            "slot counters out of order: old={} free={} num={}",
            header.old_slots, header.free_slots, header.num_slots
        ));
    }
    if header.free_data.saturating_add(header.free_bytes) != page_size {
        return fail(format!(
            "free_data({}) + free_bytes({}) != page_size({page_size})",
            header.free_data, header.free_bytes
        ));
    }
    let min_offset = min_record_offset(header.num_slots);
    if header.free_data < min_offset {
        return fail(format!(
            "free_data {} below slot-table end {min_offset}",
            header.free_data
        ));
    }

    Ok(())
}

/// Run every per-page invariant from the data model against the
/// current contents of `view`, given the cache-wide `num_pages` (needed
/// to re-derive each record's page/slot hash) and `start_slots`
/// (the floor `num_slots` must never shrink below).
///
/// Returns `Ok(())` if every invariant holds, otherwise a `Corruption`
/// error describing the first violation found.
pub fn self_check(view: &PageView, page_num: u32, num_pages: u32, start_slots: u32) -> Result<()> {
    let fail = |reason: String| -> Result<()> {
        Err(Error::Corruption {
            page: page_num,
            reason,
        })
    };

    let header = view.header();
    let page_size = view.page_size;

    check_header(&header, page_size, page_num, start_slots)?;
    let min_offset = min_record_offset(header.num_slots);

    let mut count_free = 0u32;
    let mut count_old = 0u32;
    let mut records: Vec<(u32, u32)> = Vec::new(); // (offset, len)

    for idx in 0..header.num_slots {
        let data_offset = view.slot(idx);

        if data_offset == layout::SLOT_TOMBSTONE {
            count_old += 1;
        }
        if data_offset <= layout::SLOT_TOMBSTONE {
            count_free += 1;
            continue;
        }

        if data_offset < min_offset || data_offset >= page_size || data_offset % 4 != 0 {
            return fail(format!("slot {idx} has out-of-range data_offset {data_offset}"));
        }

        let rh = view.record_header_at(data_offset);
        let len = rh.slot_len();
        if data_offset + len > page_size {
            return fail(format!("record at {data_offset} (len {len}) runs past page end"));
        }
        if data_offset + len > header.free_data {
            return fail(format!(
                "record at {data_offset} (len {len}) ends past free_data {}",
                header.free_data
            ));
        }

        let (_page, slot_hash) = hash_key(view.key_at(data_offset, &rh), num_pages);
        if slot_hash != rh.slot_hash {
            return fail(format!(
                "slot {idx}: stored slot_hash {} does not match rehash {slot_hash}",
                rh.slot_hash
            ));
        }
        let probe_slot = crate::slots::probe_for_check(view, rh.slot_hash, view.key_at(data_offset, &rh));
        if probe_slot != Some(idx) {
            return fail(format!(
                "slot {idx}: probing from slot_hash {} does not return this slot (got {:?})",
                rh.slot_hash, probe_slot
            ));
        }

        records.push((data_offset, len));
    }

    if count_free != header.free_slots {
        return fail(format!(
            "counted {count_free} free slots, header says {}",
            header.free_slots
        ));
    }
    if count_old != header.old_slots {
        return fail(format!(
            "counted {count_old} tombstones, header says {}",
            header.old_slots
        ));
    }

    records.sort_by_key(|(off, _)| *off);
    for pair in records.windows(2) {
        let (off_a, len_a) = pair[0];
        let (off_b, _) = pair[1];
        if off_a + len_a > off_b {
            return fail(format!(
                "records at {off_a} (len {len_a}) and {off_b} overlap"
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::MAGIC;

    fn fresh_page(page_size: u32, start_slots: u32) -> Vec<u8> {
        let mut buf = vec![0u8; page_size as usize];
        let free_data = HEADER_SIZE + start_slots * SLOT_ENTRY_SIZE;
        let header = PageHeader {
            magic: MAGIC,
            num_slots: start_slots,
            free_slots: start_slots,
            old_slots: 0,
            free_data,
            free_bytes: page_size - free_data,
            _reserved: [0, 0],
        };
        buf[0..4].copy_from_slice(&MAGIC.to_ne_bytes());
        header.write_counters(&mut buf);
        buf
    }

    #[test]
    fn fresh_page_passes_self_check() {
        let mut buf = fresh_page(1024, 16);
        let view = PageView::new(&mut buf, 1024);
        self_check(&view, 0, 2, 16).unwrap();
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut buf = fresh_page(1024, 16);
        buf[0] = 0;
        let view = PageView::new(&mut buf, 1024);
        assert!(self_check(&view, 0, 2, 16).is_err());
    }

    #[test]
    fn inconsistent_free_data_is_rejected() {
        let mut buf = fresh_page(1024, 16);
        let mut header = PageHeader::read_from(&buf);
        header.free_bytes += 1;
        header.write_counters(&mut buf);
        let view = PageView::new(&mut buf, 1024);
        assert!(self_check(&view, 0, 2, 16).is_err());
    }

    #[test]
    fn check_header_accepts_fresh_page() {
        let buf = fresh_page(1024, 16);
        let header = PageHeader::read_from(&buf);
        check_header(&header, 1024, 0, 16).unwrap();
    }

    #[test]
    fn check_header_rejects_bad_magic_without_scanning_slots() {
        let mut header = PageHeader::read_from(&fresh_page(1024, 16));
        header.magic = 0;
        assert!(check_header(&header, 1024, 0, 16).is_err());
    }

    #[test]
    fn check_header_rejects_num_slots_below_floor() {
        let mut header = PageHeader::read_from(&fresh_page(1024, 16));
        header.num_slots = 4;
        assert!(check_header(&header, 1024, 0, 16).is_err());
    }
}
