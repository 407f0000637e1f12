//! The slot engine: open-addressing lookup with linear probing and
//! tombstones, plus the read/write/delete operations built on it.
//!
//! Every function here assumes the caller holds the target page's lock
//! and passes in the page's already-parsed header counters; callers are
//! responsible for writing mutated counters back through
//! [`crate::page::PageView::write_header_counters`] before unlocking.

use crate::layout::{self, PageHeader, RecordHeader};
use crate::page::PageView;

/// The three probe modes `_mmc_find_slot` supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    /// Stop at the first never-used slot; skip tombstones.
    Read,
    /// Stop at the first never-used slot *or* the first tombstone,
    /// whichever comes first — the returned tombstone may be reused.
    Write,
    /// Same probe behavior as `Read`.
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    /// The key was found at this slot index.
    Found(u32),
    /// The key was not found; this slot index is free to hold it (only
    /// meaningful for `Write`).
    Hole(u32),
    /// Every slot was used/tombstoned and no match was found.
    Full,
}

/// Probe the slot table starting at `slot_hash % num_slots`, looking
/// for `key`. See [`FindMode`] for how each mode treats holes.
pub fn find_slot(view: &PageView, num_slots: u32, slot_hash: u32, key: &[u8], mode: FindMode) -> FindResult {
    let start = slot_hash % num_slots;
    let mut idx = start;

    for _ in 0..num_slots {
        let data_offset = view.slot(idx);

        if data_offset == layout::SLOT_EMPTY {
            return FindResult::Hole(idx);
        }
        if data_offset == layout::SLOT_TOMBSTONE {
            if mode == FindMode::Write {
                return FindResult::Hole(idx);
            }
        } else {
            let rh = view.record_header_at(data_offset);
            if rh.key_len as usize == key.len() && view.key_at(data_offset, &rh) == key {
                return FindResult::Found(idx);
            }
        }

        idx = (idx + 1) % num_slots;
    }

    FindResult::Full
}

/// Used by the integrity self-check: probe in `Read` mode and report
/// which slot (if any) the probe lands a match on.
pub fn probe_for_check(view: &PageView, slot_hash: u32, key: &[u8]) -> Option<u32> {
    let num_slots = view.header().num_slots;
    match find_slot(view, num_slots, slot_hash, key, FindMode::Read) {
        FindResult::Found(idx) => Some(idx),
        _ => None,
    }
}

/// Outcome of [`read`].
pub enum ReadOutcome {
    Hit { value: Vec<u8>, flags: u32 },
    Miss,
}

/// Look up `key` (already hashed to `slot_hash`) on the current page.
/// `now` is the current unix time, used to test expiry. Tombstones a
/// slot in place (and reports it as a miss) if its record has expired.
pub fn read(view: &mut PageView, header: &mut PageHeader, slot_hash: u32, key: &[u8], now: u32) -> ReadOutcome {
    match find_slot(view, header.num_slots, slot_hash, key, FindMode::Read) {
        FindResult::Found(idx) => {
            let data_offset = view.slot(idx);
            let mut rh = view.record_header_at(data_offset);

            if rh.expire_time != 0 && now > rh.expire_time {
                tombstone_slot(view, header, idx);
                return ReadOutcome::Miss;
            }

            rh.last_access = now;
            view.write_record_header_at(data_offset, &rh);

            let value = view.value_at(data_offset, &rh).to_vec();
            ReadOutcome::Hit { value, flags: rh.flags }
        }
        FindResult::Hole(_) | FindResult::Full => ReadOutcome::Miss,
    }
}

/// Write `key` -> `value` on the current page. Returns `true` if
/// stored, `false` ("not stored") if the slot table is full or the
/// heap lacks room — the caller should expunge and retry.
#[allow(clippy::too_many_arguments)]
pub fn write(
    view: &mut PageView,
    header: &mut PageHeader,
    slot_hash: u32,
    key: &[u8],
    value: &[u8],
    flags: u32,
    now: u32,
    expire_seconds: u32,
) -> bool {
    let need = layout::record_len(key.len() as u32, value.len() as u32);

    let found = find_slot(view, header.num_slots, slot_hash, key, FindMode::Write);
    let idx = match found {
        FindResult::Full => return false,
        FindResult::Found(idx) => idx,
        FindResult::Hole(idx) => idx,
    };

    let was_tombstone = view.slot(idx) == layout::SLOT_TOMBSTONE;
    let was_used = matches!(found, FindResult::Found(_));
    if was_used {
        tombstone_slot(view, header, idx);
    }

    if header.free_bytes < need {
        return false;
    }

    let expire_time = if expire_seconds != 0 { now + expire_seconds } else { 0 };
    let rh = RecordHeader {
        last_access: now,
        expire_time,
        slot_hash,
        flags,
        key_len: key.len() as u32,
        val_len: value.len() as u32,
    };

    let offset = header.free_data;
    view.write_record(offset, &rh, key, value);
    view.set_slot(idx, offset);

    header.free_slots -= 1;
    // The reused slot was a tombstone either already (a pre-existing
    // hole reused by the probe) or as of a few lines up (the existing
    // key's slot, just tombstoned above to make way for this write).
    // Either way it is no longer a tombstone once this record lands.
    if was_tombstone || was_used {
        header.old_slots -= 1;
    }
    header.free_data += need;
    header.free_bytes -= need;

    true
}

/// Delete `key` from the current page. Returns the deleted record's
/// flags if it was present, `None` otherwise.
pub fn delete(view: &mut PageView, header: &mut PageHeader, slot_hash: u32, key: &[u8]) -> Option<u32> {
    match find_slot(view, header.num_slots, slot_hash, key, FindMode::Delete) {
        FindResult::Found(idx) => {
            let data_offset = view.slot(idx);
            let rh = view.record_header_at(data_offset);
            let flags = rh.flags;
            tombstone_slot(view, header, idx);
            Some(flags)
        }
        FindResult::Hole(_) | FindResult::Full => None,
    }
}

/// Mark `idx` as a tombstone, bumping the free/old slot counters.
fn tombstone_slot(view: &mut PageView, header: &mut PageHeader, idx: u32) {
    view.set_slot(idx, layout::SLOT_TOMBSTONE);
    header.free_slots += 1;
    header.old_slots += 1;
}
