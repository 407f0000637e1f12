//! A shared, persistent, process-safe key/value cache backed by a
//! single memory-mapped file.
//!
//! The file is divided into fixed-size pages, each an independent
//! open-addressing hash table with its own heap of variable-length
//! records. Cross-process exclusion is per-page, via advisory
//! `fcntl` byte-range locks, so unrelated keys hashing to different
//! pages never contend. See [`Cache`] for the entry point.
//!
//! ```no_run
//! use mmap_cache::{Cache, CacheConfig};
//!
//! # fn main() -> mmap_cache::Result<()> {
//! let config = CacheConfig::new()
//!     .share_file("/tmp/my-cache.dat")
//!     .num_pages(11)?
//!     .page_size(1 << 20)?;
//! let mut cache = Cache::open(config)?;
//!
//! cache.set(b"key", b"value", 0)?;
//! assert_eq!(cache.get(b"key")?, Some((b"value".to_vec(), 0)));
//! # Ok(())
//! # }
//! ```

#[cfg(unix)]
mod cache;
#[cfg(unix)]
mod config;
mod error;
#[cfg(unix)]
mod expunge;
mod hash;
#[cfg(unix)]
mod iter;
mod layout;
#[cfg(unix)]
mod lock;
#[cfg(unix)]
mod page;
#[cfg(unix)]
mod region;
#[cfg(unix)]
mod slots;

#[cfg(unix)]
pub use cache::Cache;
#[cfg(unix)]
pub use config::CacheConfig;
pub use error::{Error, Result};
#[cfg(unix)]
pub use expunge::ExpungeMode;
pub use hash::hash_key;
#[cfg(unix)]
pub use iter::{CacheIter, Record};
