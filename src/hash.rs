//! Key hashing and page/slot partitioning.

/// Seed matching the page-header magic, used as the hash's initial state.
const HASH_SEED: u32 = 0x92f7e3b1;

/// Hash `key` and split it into a page index and an in-page slot hash.
///
/// `h` accumulates `rotate_left(h, 4).wrapping_add(byte)` over the key
/// bytes. The page index is `h % num_pages`; the slot hash is `h /
/// num_pages` — the high-entropy remainder of the division, stored with
/// each record and re-used directly to seed that page's linear probe.
pub fn hash_key(key: &[u8], num_pages: u32) -> (u32, u32) {
    let mut h: u32 = HASH_SEED;
    for &b in key {
        h = h.rotate_left(4).wrapping_add(b as u32);
    }
    (h % num_pages, h / num_pages)
}
