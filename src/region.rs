//! Backing-file bring-up: create-or-open the share file and mmap it
//! `MAP_SHARED` across every page. Also owns the page-initialization
//! protocol (zero the page, write a fresh header).

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::layout::{self, PageHeader, MAGIC};

/// Owns the memory-mapped backing file. All pages live contiguously in
/// `mmap`, `page_size` bytes apart.
pub struct Region {
    mmap: MmapMut,
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
    page_size: u32,
    num_pages: u32,
}

impl Region {
    /// Open the backing file named by `config.share_file`, creating and
    /// formatting it if it doesn't exist, is the wrong size, or
    /// `config.init_file` was requested. Fail-open: any I/O error during
    /// bring-up is fatal.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        let path = &config.share_file;
        let wanted_size = config.region_size();

        let existing_size = fs::metadata(path).ok().map(|m| m.len());
        let needs_recreate =
            config.init_file || existing_size.is_none() || existing_size != Some(wanted_size);

        if needs_recreate {
            Self::create_fresh(path, wanted_size, config.page_size, config.num_pages)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| Error::bring_up(path, e))?;

        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| Error::bring_up(path, e))?;

        let mut region = Region {
            mmap,
            file,
            path: path.clone(),
            page_size: config.page_size,
            num_pages: config.num_pages,
        };

        if needs_recreate {
            region.init_all_pages(config.start_slots);
            region.remap()?;
        }

        Ok(region)
    }

    /// Create and zero-fill a fresh backing file of the required size.
    fn create_fresh(path: &Path, size: u64, page_size: u32, num_pages: u32) -> Result<()> {
        if path.exists() {
            fs::remove_file(path).map_err(|e| Error::bring_up(path, e))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| Error::bring_up(path, e))?;

        let zero_page = vec![0u8; page_size as usize];
        for _ in 0..num_pages {
            use std::io::Write;
            let mut f = &file;
            f.write_all(&zero_page).map_err(|e| Error::bring_up(path, e))?;
        }

        debug_assert_eq!(file.metadata().map(|m| m.len()).unwrap_or(0), size);
        log::debug!("created fresh backing file {} ({size} bytes)", path.display());
        Ok(())
    }

    /// Drop and re-establish the mapping. Purely a memory-accounting
    /// concern: lets tools report resident size accurately after the
    /// bulk zero-fill/init pass touched every page.
    fn remap(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| Error::bring_up(&self.path, e))?;
        let mmap = unsafe { MmapMut::map_mut(&file) }.map_err(|e| Error::bring_up(&self.path, e))?;
        self.mmap = mmap;
        self.file = file;
        Ok(())
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    #[cfg(unix)]
    pub fn raw_fd(&self) -> std::os::unix::io::RawFd {
        use std::os::unix::io::AsRawFd;
        self.file.as_raw_fd()
    }

    /// Byte offset of the start of page `page`.
    fn page_offset(&self, page: u32) -> usize {
        debug_assert!(page < self.num_pages);
        page as usize * self.page_size as usize
    }

    /// Borrow one page's bytes immutably.
    ///
    /// Safe to call without holding the page lock — useful for the
    /// `test_file` bring-up scan before the first lock attempt — but
    /// the contents are only meaningful once the page lock is held.
    pub fn page(&self, page: u32) -> &[u8] {
        let off = self.page_offset(page);
        &self.mmap[off..off + self.page_size as usize]
    }

    /// Borrow one page's bytes mutably.
    ///
    /// # Safety
    /// The caller must hold that page's lock for the duration any
    /// other process could also be touching it; this crate upholds
    /// that by only calling this from code paths guarded by
    /// [`crate::lock::PageLock`].
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn page_mut(&self, page: u32) -> &mut [u8] {
        let off = self.page_offset(page);
        let base = self.mmap.as_ptr() as *mut u8;
        std::slice::from_raw_parts_mut(base.add(off), self.page_size as usize)
    }

    /// Zero a page and write a freshly-initialized header onto it, per
    /// the page-initialization protocol: `num_slots = free_slots =
    /// start_slots`, `old_slots = 0`, `free_data = header + num_slots *
    /// 4`, `free_bytes = page_size - free_data`.
    pub fn init_page(&self, page: u32, start_slots: u32) {
        let bytes = unsafe { self.page_mut(page) };
        bytes.fill(0);

        let free_data = layout::HEADER_SIZE + start_slots * layout::SLOT_ENTRY_SIZE;
        let header = PageHeader {
            magic: MAGIC,
            num_slots: start_slots,
            free_slots: start_slots,
            old_slots: 0,
            free_data,
            free_bytes: self.page_size - free_data,
            _reserved: [0, 0],
        };
        bytes[0..4].copy_from_slice(&header.magic.to_ne_bytes());
        header.write_counters(bytes);
    }

    /// Initialize every page in the region.
    pub fn init_all_pages(&self, start_slots: u32) {
        for page in 0..self.num_pages {
            self.init_page(page, start_slots);
        }
        log::debug!("initialized {} pages with start_slots={start_slots}", self.num_pages);
    }
}
