//! Crate error type.
//!
//! Mirrors the error-kind taxonomy of the engine this crate reimplements:
//! configuration, file bring-up, lock, and corruption errors all abort
//! the operation that raised them and (for configuration/bring-up) the
//! handle itself. Capacity ("not stored") and expiry are not errors —
//! they are reported as ordinary return values by the slot engine.

use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An unknown configuration parameter name, or a value outside its
    /// documented range.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Failure creating, opening, sizing, or mapping the backing file.
    #[error("backing file {path}: {source}")]
    BringUp {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A byte-range lock request failed, including timing out against
    /// the safety alarm.
    #[error("lock failed on page {page}: {reason}")]
    Lock { page: u32, reason: String },

    /// A page failed structural validation while being locked.
    #[error("page {page} failed integrity check: {reason}")]
    Corruption { page: u32, reason: String },
}

impl Error {
    pub(crate) fn bring_up(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::BringUp {
            path: path.into(),
            source,
        }
    }
}

/// A human-readable rendering of the most recent error on a handle,
/// mirroring `mmc_error()` from the original implementation but scoped
/// per-handle instead of a process-wide global.
#[derive(Debug, Default)]
pub struct LastError(Option<String>);

impl LastError {
    pub fn set(&mut self, err: &Error) {
        self.0 = Some(err.to_string());
    }

    pub fn get(&self) -> &str {
        self.0.as_deref().unwrap_or("Unknown error")
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.get())
    }
}
