//! The expunge engine: a compacting rehash that reclaims heap space and
//! optionally grows a page's slot table.
//!
//! [`plan`] inspects a locked page and decides what survives without
//! touching it; [`apply`] then rewrites the page's slot table and heap
//! from that decision. Splitting the two lets a caller log or inspect
//! a pending expunge before committing it, mirroring the original
//! `mmc_calc_expunge`/`mmc_do_expunge` split.

use crate::layout::{self, PageHeader, HEADER_SIZE, SLOT_ENTRY_SIZE};
use crate::page::{min_record_offset, PageView};

/// Why an expunge is being run.
#[derive(Debug, Clone, Copy)]
pub enum ExpungeMode {
    /// Drop only expired records.
    ExpireOnly,
    /// Drop every record on the page.
    DropAll,
    /// Make room for a pending write of `needed` key+value bytes,
    /// evicting least-recently-used records if necessary.
    MakeRoom { needed: u32 },
}

struct Candidate {
    slot_hash: u32,
    last_access: u32,
    bytes: Vec<u8>,
}

/// What [`apply`] will do to a page: its new slot-table size and the
/// records that survive, in write order.
pub struct ExpungePlan {
    new_num_slots: u32,
    keep: Vec<Candidate>,
}

impl ExpungePlan {
    /// Number of records this plan keeps.
    pub fn surviving(&self) -> usize {
        self.keep.len()
    }

    /// Number of slots the page will have after this plan is applied.
    pub fn new_num_slots(&self) -> u32 {
        self.new_num_slots
    }
}

/// Decide what an expunge of `mode` would do to the page behind `view`,
/// without mutating it. Returns `None` only for `MakeRoom` when the
/// page already has enough free slots and free bytes to skip expunging
/// entirely.
pub fn plan(view: &PageView, header: &PageHeader, mode: ExpungeMode, page_size: u32, now: u32) -> Option<ExpungePlan> {
    if let ExpungeMode::MakeRoom { needed } = mode {
        let kvlen = layout::round_up_4(layout::RECORD_HEADER_SIZE + needed);
        let free_slots_pct = (header.free_slots - header.old_slots) as f64 / header.num_slots as f64;
        if free_slots_pct > 0.3 && header.free_bytes >= kvlen {
            return None;
        }
    }

    let num_slots = header.num_slots;
    let page_data_size = page_size - num_slots * SLOT_ENTRY_SIZE - HEADER_SIZE;

    let mut candidates: Vec<Candidate> = Vec::new();
    let mut used_data: u32 = 0;

    for idx in 0..num_slots {
        let data_offset = view.slot(idx);
        if data_offset <= layout::SLOT_TOMBSTONE {
            continue;
        }

        let rh = view.record_header_at(data_offset);

        let definitely_out = match mode {
            ExpungeMode::DropAll => true,
            ExpungeMode::ExpireOnly | ExpungeMode::MakeRoom { .. } => {
                rh.expire_time != 0 && now >= rh.expire_time
            }
        };
        if definitely_out {
            continue;
        }

        let len = rh.slot_len();
        used_data += len;
        let bytes = view.raw()[data_offset as usize..(data_offset + len) as usize].to_vec();
        candidates.push(Candidate {
            slot_hash: rh.slot_hash,
            last_access: rh.last_access,
            bytes,
        });
    }

    let slots_pct = candidates.len() as f64 / num_slots as f64;
    let room_for_growth = page_data_size.saturating_sub(used_data) > (num_slots + 1) * SLOT_ENTRY_SIZE;
    let grow = slots_pct > 0.3 && (room_for_growth || matches!(mode, ExpungeMode::MakeRoom { .. }));
    let new_num_slots = if grow { 2 * num_slots + 1 } else { num_slots };

    let keep = match mode {
        ExpungeMode::ExpireOnly | ExpungeMode::DropAll => candidates,
        ExpungeMode::MakeRoom { .. } => {
            candidates.sort_by_key(|c| c.last_access);

            let new_page_data_size = page_size - new_num_slots * SLOT_ENTRY_SIZE - HEADER_SIZE;
            let threshold = (0.6 * new_page_data_size as f64) as u32;

            let mut used = used_data;
            let mut start = 0usize;
            while start < candidates.len() && used >= threshold {
                used -= candidates[start].bytes.len() as u32;
                start += 1;
            }
            candidates.split_off(start)
        }
    };

    log::debug!(
        "expunge plan: {} survivors, num_slots {} -> {new_num_slots}",
        keep.len(),
        num_slots
    );

    Some(ExpungePlan { new_num_slots, keep })
}

/// Rewrite the page's slot table and heap per `plan`. Zeroes and
/// rebuilds everything from the slot table onward; the 32-byte header
/// (magic plus counters) is left alone here and updated by the caller
/// via the returned, mutated `header`.
pub fn apply(view: &mut PageView, header: &mut PageHeader, plan: ExpungePlan, page_size: u32) {
    let new_num_slots = plan.new_num_slots;

    for b in &mut view.raw_mut()[HEADER_SIZE as usize..] {
        *b = 0;
    }

    let min_offset = min_record_offset(new_num_slots);
    let mut local_slots = vec![0u32; new_num_slots as usize];
    let mut heap_cursor = min_offset;

    for candidate in &plan.keep {
        let mut slot = candidate.slot_hash % new_num_slots;
        while local_slots[slot as usize] != 0 {
            slot = (slot + 1) % new_num_slots;
        }
        local_slots[slot as usize] = heap_cursor;

        let start = heap_cursor as usize;
        let end = start + candidate.bytes.len();
        view.raw_mut()[start..end].copy_from_slice(&candidate.bytes);
        heap_cursor += candidate.bytes.len() as u32;
    }

    for (idx, value) in local_slots.into_iter().enumerate() {
        view.set_slot(idx as u32, value);
    }

    header.num_slots = new_num_slots;
    header.free_slots = new_num_slots - plan.keep.len() as u32;
    header.old_slots = 0;
    header.free_data = heap_cursor;
    header.free_bytes = page_size - heap_cursor;
    view.write_header_counters(header);

    log::debug!(
        "expunge applied: {} survivors, free_bytes={}",
        plan.keep.len(),
        header.free_bytes
    );
}
