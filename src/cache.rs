//! The `Cache` handle: bring-up, the hash-then-lock-then-dispatch-then-
//! unlock wrapper around the slot engine, and expunge-on-demand.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::CacheConfig;
use crate::error::{LastError, Result};
use crate::expunge::{self, ExpungeMode};
use crate::hash::hash_key;
use crate::iter::CacheIter;
use crate::lock::{PageLock, DEFAULT_TIMEOUT_SECS};
use crate::page::{self, PageView};
use crate::region::Region;
use crate::slots::{self, ReadOutcome};

/// A handle onto a shared, memory-mapped key/value cache.
///
/// Not `Sync`/reentrant by design: thread-safety within one process is
/// left to the caller (serialize at the handle, or open one handle per
/// thread against the same backing file — cross-process exclusion is
/// still enforced either way).
pub struct Cache {
    region: Region,
    config: CacheConfig,
    last_error: LastError,
}

impl Cache {
    /// Open (creating and formatting if needed) the backing file named
    /// by `config.share_file`. When `config.test_file` is set, walks
    /// every page afterward, re-initializing any that fail lock or the
    /// integrity self-check.
    pub fn open(config: CacheConfig) -> Result<Self> {
        let region = Region::open(&config)?;
        let mut cache = Cache {
            region,
            config,
            last_error: LastError::default(),
        };
        if cache.config.test_file {
            cache.run_test_file()?;
        }
        Ok(cache)
    }

    /// Release the backing file mapping and descriptor. Equivalent to
    /// dropping the handle; provided so callers can observe bring-up
    /// parity with the surface this crate is modeled on.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// The most recent error recorded on this handle, if any.
    pub fn last_error(&self) -> &str {
        self.last_error.get()
    }

    /// Hash `key` into `(page_index, slot_hash)` without touching the
    /// backing file.
    pub fn hash(&self, key: &[u8]) -> (u32, u32) {
        hash_key(key, self.region.num_pages())
    }

    /// Look up `key`. Returns `None` on miss (including a lazily
    /// expired entry, which is tombstoned as a side effect).
    pub fn get(&mut self, key: &[u8]) -> Result<Option<(Vec<u8>, u32)>> {
        let (page_index, slot_hash) = self.hash(key);
        let now = now_unix();

        let outcome = self.with_page(page_index, |view, header| {
            slots::read(view, header, slot_hash, key, now)
        })?;

        Ok(match outcome {
            ReadOutcome::Hit { value, flags } => Some((value, flags)),
            ReadOutcome::Miss => None,
        })
    }

    /// Store `key` -> `value` with the given opaque `flags`. If the
    /// page lacks room, runs a make-room expunge (mode 2) once and
    /// retries before giving up.
    pub fn set(&mut self, key: &[u8], value: &[u8], flags: u32) -> Result<bool> {
        let (page_index, slot_hash) = self.hash(key);
        let now = now_unix();
        let expire_seconds = self.config.expire_time;
        let page_size = self.region.page_size();

        let stored = self.with_page(page_index, |view, header| {
            slots::write(view, header, slot_hash, key, value, flags, now, expire_seconds)
        })?;
        if stored {
            return Ok(true);
        }

        let needed = (key.len() + value.len()) as u32;
        self.with_page(page_index, |view, header| {
            if let Some(p) = expunge::plan(view, header, ExpungeMode::MakeRoom { needed }, page_size, now) {
                expunge::apply(view, header, p, page_size);
            }
            slots::write(view, header, slot_hash, key, value, flags, now, expire_seconds)
        })
    }

    /// Remove `key`, returning its flags if it was present.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<u32>> {
        let (page_index, slot_hash) = self.hash(key);
        self.with_page(page_index, |view, header| slots::delete(view, header, slot_hash, key))
    }

    /// Run an expunge of `mode` against `page_index` directly, bypassing
    /// the write-failure retry path. Useful for periodic sweeps.
    pub fn expunge_page(&mut self, page_index: u32, mode: ExpungeMode) -> Result<usize> {
        let now = now_unix();
        let page_size = self.region.page_size();
        self.with_page(page_index, |view, header| {
            match expunge::plan(view, header, mode, page_size, now) {
                Some(p) => {
                    let surviving = p.surviving();
                    expunge::apply(view, header, p, page_size);
                    surviving
                }
                None => (header.free_slots - header.old_slots) as usize,
            }
        })
    }

    /// Start a sequential iterator over every record on every page.
    pub fn iter(&self) -> CacheIter<'_> {
        CacheIter::new(&self.region, self.config.start_slots)
    }

    /// Run the integrity self-check against `page_index` under lock.
    pub fn check_page(&mut self, page_index: u32) -> Result<()> {
        let num_pages = self.region.num_pages();
        let start_slots = self.config.start_slots;
        self.with_page_result(page_index, |view, _header| {
            page::self_check(view, page_index, num_pages, start_slots)
        })
    }

    fn run_test_file(&mut self) -> Result<()> {
        let num_pages = self.region.num_pages();
        let start_slots = self.config.start_slots;
        for page_index in 0..num_pages {
            if self.check_page(page_index).is_ok() {
                continue;
            }
            log::debug!("page {page_index} failed integrity check, re-initializing");
            self.region.init_page(page_index, start_slots);
            // Re-test the freshly-initialized page to catch init bugs.
            self.check_page(page_index)?;
        }
        Ok(())
    }

    /// Acquire `page_index`'s lock, hand the caller a page view and
    /// parsed header, write the (possibly mutated) header counters back,
    /// then release the lock. Used by every read/write/delete/expunge
    /// operation; the header is always written back, whether or not it
    /// changed, mirroring the original's unconditional unlock write.
    fn with_page<T>(&mut self, page_index: u32, f: impl FnOnce(&mut PageView, &mut crate::layout::PageHeader) -> T) -> Result<T> {
        self.with_page_result(page_index, |view, header| Ok(f(view, header)))
    }

    fn with_page_result<T>(
        &mut self,
        page_index: u32,
        f: impl FnOnce(&mut PageView, &mut crate::layout::PageHeader) -> Result<T>,
    ) -> Result<T> {
        let page_size = self.region.page_size();
        let start_slots = self.config.start_slots;
        let lock = match PageLock::acquire(self.region.raw_fd(), page_index, page_size, DEFAULT_TIMEOUT_SECS) {
            Ok(lock) => lock,
            Err(e) => {
                self.last_error.set(&e);
                return Err(e);
            }
        };

        let bytes = unsafe { self.region.page_mut(page_index) };
        let mut view = PageView::new(bytes, page_size);
        let header_candidate = view.header();

        // Validate the header against §3's invariants on every lock
        // acquisition, before trusting any of its counters — a page
        // corrupted by another process must never be used with garbage
        // `num_slots`/offsets (spec §4.5, §7).
        if let Err(e) = page::check_header(&header_candidate, page_size, page_index, start_slots) {
            let _ = lock.release();
            self.last_error.set(&e);
            return Err(e);
        }
        let mut header = header_candidate;

        let result = f(&mut view, &mut header);
        view.write_header_counters(&header);

        if let Err(e) = lock.release() {
            self.last_error.set(&e);
            return Err(e);
        }

        if let Err(e) = &result {
            self.last_error.set(e);
        }
        result
    }
}

fn now_unix() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_cache(num_pages: u32, page_size: u32, start_slots: u32) -> (tempfile::TempDir, Cache) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.dat");
        let cfg = CacheConfig::new()
            .share_file(&path)
            .num_pages(num_pages)
            .unwrap()
            .page_size(page_size)
            .unwrap()
            .start_slots(start_slots)
            .unwrap();
        let cache = Cache::open(cfg).unwrap();
        (dir, cache)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, mut cache) = temp_cache(2, 1024, 16);
        assert!(cache.set(b"abc", b"hello", 7).unwrap());
        let (value, flags) = cache.get(b"abc").unwrap().unwrap();
        assert_eq!(value, b"hello");
        assert_eq!(flags, 7);
    }

    #[test]
    fn miss_on_unknown_key() {
        let (_dir, mut cache) = temp_cache(1, 1024, 16);
        assert!(cache.get(b"nope").unwrap().is_none());
    }

    #[test]
    fn delete_removes_entry() {
        let (_dir, mut cache) = temp_cache(1, 1024, 16);
        cache.set(b"k", b"v", 0).unwrap();
        assert_eq!(cache.delete(b"k").unwrap(), Some(0));
        assert!(cache.get(b"k").unwrap().is_none());
        assert!(cache.delete(b"k").unwrap().is_none());
    }

    #[test]
    fn iteration_sees_every_written_record() {
        let (_dir, mut cache) = temp_cache(3, 1024, 16);
        for i in 0..5u8 {
            cache.set(&[b'k', i], &[b'v', i], 0).unwrap();
        }
        let mut iter = cache.iter();
        let mut count = 0;
        while iter.next_record().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 5);
    }

    #[test]
    fn write_failure_triggers_expunge_and_retries() {
        let (_dir, mut cache) = temp_cache(1, 512, 8);
        for i in 0..40u32 {
            let key = i.to_ne_bytes();
            let val = vec![1u8; 20];
            let _ = cache.set(&key, &val, 0);
        }
        // The page should still accept new writes after expunging.
        assert!(cache.set(b"fresh", b"v", 0).unwrap());
    }

    #[test]
    fn test_file_repairs_corrupt_page_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.dat");
        let cfg = CacheConfig::new()
            .share_file(&path)
            .num_pages(2)
            .unwrap()
            .page_size(1024)
            .unwrap()
            .start_slots(16)
            .unwrap();

        {
            let mut cache = Cache::open(cfg.clone()).unwrap();
            cache.set(b"a", b"1", 0).unwrap();
        }

        // Corrupt page 1's magic.
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start(1024)).unwrap();
            f.write_all(&[0, 0, 0, 0]).unwrap();
        }

        let repaired = cfg.clone().test_file(true);
        let mut cache = Cache::open(repaired).unwrap();
        assert_eq!(cache.get(b"a").unwrap(), Some((b"1".to_vec(), 0)));
    }

    #[test]
    fn corrupt_page_surfaces_as_corruption_error_without_test_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.dat");
        let num_pages = 2;
        let page_size = 1024u32;
        let cfg = CacheConfig::new()
            .share_file(&path)
            .num_pages(num_pages)
            .unwrap()
            .page_size(page_size)
            .unwrap()
            .start_slots(16)
            .unwrap();
        Cache::open(cfg.clone()).unwrap();

        let key = b"some-key";
        let (target_page, _) = hash_key(key, num_pages);

        // Write garbage over the target page's whole header: bad magic
        // and an out-of-range num_slots that would index out of bounds
        // if ever trusted directly.
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start((target_page * page_size) as u64)).unwrap();
            f.write_all(&0xffff_ffffu32.to_ne_bytes()).unwrap();
            f.write_all(&0xffff_ffffu32.to_ne_bytes()).unwrap();
        }

        let mut cache = Cache::open(cfg).unwrap();
        let err = cache.get(key).unwrap_err();
        assert!(matches!(err, crate::error::Error::Corruption { .. }));
        assert!(cache.last_error().contains("page"));
    }
}
