//! Cross-process page exclusion via advisory `fcntl` byte-range locks.
//!
//! Each page is locked by requesting an exclusive write lock on the
//! byte range `[page * page_size, (page + 1) * page_size)` of the
//! backing file's descriptor. The lock request can block indefinitely
//! behind a dead holder, so a safety alarm (`SIGALRM`) is armed around
//! it: a foreign signal transparently retries the lock, but the alarm
//! firing converts into a lock-failed error.

use std::io;
use std::os::unix::io::RawFd;
use std::sync::Once;

use crate::error::{Error, Result};

/// Default safety-alarm timeout, matching the original implementation.
pub const DEFAULT_TIMEOUT_SECS: u32 = 10;

static INSTALL_HANDLER: Once = Once::new();

/// `SIGALRM`'s default disposition terminates the process. We only want
/// it to interrupt the blocking `fcntl` call, so install a handler that
/// does nothing once per process.
fn ensure_alarm_handler_installed() {
    INSTALL_HANDLER.call_once(|| unsafe {
        extern "C" fn noop(_: libc::c_int) {}
        libc::signal(libc::SIGALRM, noop as libc::sighandler_t);
    });
}

/// An acquired exclusive lock on one page's byte range.
///
/// Dropping the guard without calling [`PageLock::release`] still
/// unlocks (best effort) so a panic mid-operation can't wedge the file,
/// but callers on the happy path should call `release` to observe I/O
/// errors from the unlock itself.
pub struct PageLock {
    fd: RawFd,
    page: u32,
    page_size: u32,
    held: bool,
}

impl PageLock {
    /// Acquire the lock for `page`, blocking until it is available or
    /// `timeout_secs` elapses.
    pub fn acquire(fd: RawFd, page: u32, page_size: u32, timeout_secs: u32) -> Result<Self> {
        ensure_alarm_handler_installed();

        let offset = page as libc::off_t * page_size as libc::off_t;
        let mut lock = make_flock(libc::F_WRLCK, offset, page_size);

        let old_alarm = unsafe { libc::alarm(timeout_secs) };

        loop {
            let res = unsafe { libc::fcntl(fd, libc::F_SETLKW, &mut lock) };
            if res == 0 {
                unsafe { libc::alarm(old_alarm) };
                break;
            }

            let err = io::Error::last_os_error();
            let alarm_left = unsafe { libc::alarm(0) };

            if err.kind() == io::ErrorKind::Interrupted && alarm_left > 0 {
                // A foreign signal interrupted us; the alarm hasn't
                // fired yet (it still has `alarm_left` seconds to run).
                // Re-arm and retry the lock.
                unsafe { libc::alarm(alarm_left) };
                continue;
            }

            unsafe { libc::alarm(old_alarm) };
            return Err(Error::Lock {
                page,
                reason: err.to_string(),
            });
        }

        log::trace!("locked page {page}");
        Ok(PageLock {
            fd,
            page,
            page_size,
            held: true,
        })
    }

    /// Release the lock, observing any error from the unlock syscall.
    pub fn release(mut self) -> Result<()> {
        self.unlock()
    }

    fn unlock(&mut self) -> Result<()> {
        if !self.held {
            return Ok(());
        }
        let offset = self.page as libc::off_t * self.page_size as libc::off_t;
        let mut lock = make_flock(libc::F_UNLCK, offset, self.page_size);
        let res = unsafe { libc::fcntl(self.fd, libc::F_SETLK, &mut lock) };
        self.held = false;
        if res != 0 {
            let err = io::Error::last_os_error();
            return Err(Error::Lock {
                page: self.page,
                reason: err.to_string(),
            });
        }
        log::trace!("unlocked page {}", self.page);
        Ok(())
    }
}

impl Drop for PageLock {
    fn drop(&mut self) {
        if self.held {
            let _ = self.unlock();
        }
    }
}

fn make_flock(kind: libc::c_short, start: libc::off_t, len: u32) -> libc::flock {
    let mut lock: libc::flock = unsafe { std::mem::zeroed() };
    lock.l_type = kind;
    lock.l_whence = libc::SEEK_SET as libc::c_short;
    lock.l_start = start;
    lock.l_len = len as libc::off_t;
    lock
}
