//! Black-box coverage of the end-to-end scenarios this crate commits to.

use std::io::{Seek, SeekFrom, Write};
use std::thread::sleep;
use std::time::Duration;

use mmap_cache::{Cache, CacheConfig, ExpungeMode};

fn config(dir: &tempfile::TempDir, num_pages: u32, page_size: u32, start_slots: u32) -> CacheConfig {
    CacheConfig::new()
        .share_file(dir.path().join("cache.dat"))
        .num_pages(num_pages)
        .unwrap()
        .page_size(page_size)
        .unwrap()
        .start_slots(start_slots)
        .unwrap()
}

#[test]
fn fresh_open_starts_empty() {
    let _ = env_logger::try_init();
    let dir = tempfile::tempdir().unwrap();
    let cache = Cache::open(config(&dir, 2, 1024, 16)).unwrap();

    let mut iter = cache.iter();
    assert!(iter.next_record().unwrap().is_none());
}

#[test]
fn write_then_read_reports_flags_and_value() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = Cache::open(config(&dir, 2, 1024, 16)).unwrap();

    assert!(cache.set(b"abc", b"hello", 7).unwrap());
    let (value, flags) = cache.get(b"abc").unwrap().unwrap();
    assert_eq!(value, b"hello");
    assert_eq!(flags, 7);
}

#[test]
fn overwrite_replaces_value_and_ages_old_slot() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = Cache::open(config(&dir, 1, 1024, 16)).unwrap();

    assert!(cache.set(b"abc", b"X", 0).unwrap());
    assert!(cache.set(b"abc", b"YY", 0).unwrap());

    let (value, _) = cache.get(b"abc").unwrap().unwrap();
    assert_eq!(value, b"YY");
}

#[test]
fn expiry_is_a_miss_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, 1, 1024, 16).expire_time(1);
    let mut cache = Cache::open(cfg).unwrap();

    cache.set(b"k", b"v", 0).unwrap();
    sleep(Duration::from_secs(2));

    assert_eq!(cache.get(b"k").unwrap(), None);
}

#[test]
fn delete_then_read_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = Cache::open(config(&dir, 1, 1024, 16)).unwrap();

    cache.set(b"k", b"v", 0).unwrap();
    assert_eq!(cache.delete(b"k").unwrap(), Some(0));
    assert_eq!(cache.get(b"k").unwrap(), None);
    assert_eq!(cache.delete(b"k").unwrap(), None);
}

#[test]
fn expunge_drop_all_empties_a_page() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = Cache::open(config(&dir, 1, 4096, 16)).unwrap();

    for i in 0..5u8 {
        cache.set(&[b'k', i], &[b'v', i], 0).unwrap();
    }
    cache.expunge_page(0, ExpungeMode::DropAll).unwrap();

    let mut iter = cache.iter();
    assert!(iter.next_record().unwrap().is_none());
}

#[test]
fn make_room_expunge_lets_a_failed_write_succeed() {
    let _ = env_logger::try_init();
    let dir = tempfile::tempdir().unwrap();
    let mut cache = Cache::open(config(&dir, 1, 2048, 16)).unwrap();

    // Pack the page with small records so later writes must expunge.
    for i in 0..60u32 {
        let key = i.to_ne_bytes();
        let _ = cache.set(&key, &[1u8; 16], 0);
    }

    assert!(cache.set(b"guaranteed", b"stored", 0).unwrap());
    let (value, _) = cache.get(b"guaranteed").unwrap().unwrap();
    assert_eq!(value, b"stored");
}

#[test]
fn corruption_is_repaired_by_test_file_on_open() {
    let _ = env_logger::try_init();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, 2, 1024, 16);

    {
        let mut cache = Cache::open(cfg.clone()).unwrap();
        cache.set(b"page0-key", b"intact", 0).unwrap();
    }

    {
        let path = dir.path().join("cache.dat");
        let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        f.seek(SeekFrom::Start(1024)).unwrap();
        f.write_all(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
    }

    let mut cache = Cache::open(cfg.test_file(true)).unwrap();
    assert_eq!(cache.get(b"page0-key").unwrap(), Some((b"intact".to_vec(), 0)));

    let mut seen = 0;
    let mut iter = cache.iter();
    while iter.next_record().unwrap().is_some() {
        seen += 1;
    }
    assert_eq!(seen, 1);
}

#[test]
fn iteration_counts_every_record_across_pages() {
    let dir = tempfile::tempdir().unwrap();
    let mut cache = Cache::open(config(&dir, 4, 1024, 16)).unwrap();

    for i in 0..20u8 {
        cache.set(&[b'k', i], &[b'v', i], 0).unwrap();
    }

    let mut count = 0;
    let mut iter = cache.iter();
    while iter.next_record().unwrap().is_some() {
        count += 1;
    }
    assert_eq!(count, 20);
}
