//! Cache configuration.
//!
//! A builder over the same named parameters as the original
//! `mmc_set_param`/`mmc_get_param` surface: `init_file`, `test_file`,
//! `page_size`, `num_pages`, `expire_time`, `share_file`, `start_slots`.
//! This is in-memory configuration construction, not a file/CLI parser
//! — parsing configuration from an external format is out of scope.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const PAGE_SIZE_RANGE: std::ops::RangeInclusive<u32> = 1024..=1024 * 1024;
const NUM_PAGES_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;
const START_SLOTS_RANGE: std::ops::RangeInclusive<u32> = 10..=500;

/// Configuration for a [`crate::Cache`] handle.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub(crate) share_file: PathBuf,
    pub(crate) page_size: u32,
    pub(crate) num_pages: u32,
    pub(crate) start_slots: u32,
    pub(crate) expire_time: u32,
    pub(crate) init_file: bool,
    pub(crate) test_file: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            share_file: PathBuf::from("/tmp/sharefile"),
            page_size: 65536,
            num_pages: 89,
            start_slots: 89,
            expire_time: 0,
            init_file: false,
            test_file: false,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn share_file(mut self, path: impl AsRef<Path>) -> Self {
        self.share_file = path.as_ref().to_path_buf();
        self
    }

    pub fn page_size(mut self, v: u32) -> Result<Self> {
        validate_range("page_size", v, PAGE_SIZE_RANGE)?;
        self.page_size = v;
        Ok(self)
    }

    pub fn num_pages(mut self, v: u32) -> Result<Self> {
        validate_range("num_pages", v, NUM_PAGES_RANGE)?;
        self.num_pages = v;
        Ok(self)
    }

    pub fn start_slots(mut self, v: u32) -> Result<Self> {
        validate_range("start_slots", v, START_SLOTS_RANGE)?;
        self.start_slots = v;
        Ok(self)
    }

    /// Seconds until a written entry expires; `0` disables expiry.
    pub fn expire_time(mut self, secs: u32) -> Self {
        self.expire_time = secs;
        self
    }

    /// Force re-initialization of the backing file even if it already
    /// exists at the right size.
    pub fn init_file(mut self, v: bool) -> Self {
        self.init_file = v;
        self
    }

    /// Walk every page at open time, re-initializing any that fail
    /// lock or the integrity self-check.
    pub fn test_file(mut self, v: bool) -> Self {
        self.test_file = v;
        self
    }

    /// Set a parameter by name, as `mmc_set_param` did. Useful for
    /// callers building configuration from a generic key/value source.
    pub fn set_param(self, param: &str, value: &str) -> Result<Self> {
        match param {
            "init_file" => Ok(self.init_file(parse_bool(value))),
            "test_file" => Ok(self.test_file(parse_bool(value))),
            "page_size" => self.page_size(parse_u32(param, value)?),
            "num_pages" => self.num_pages(parse_u32(param, value)?),
            "expire_time" => Ok(self.expire_time(parse_u32(param, value)?)),
            "share_file" => Ok(self.share_file(value)),
            "start_slots" => self.start_slots(parse_u32(param, value)?),
            other => Err(Error::Configuration(format!(
                "bad set_param parameter: {other}"
            ))),
        }
    }

    /// Read a parameter back by name, as `mmc_get_param` did.
    pub fn get_param(&self, param: &str) -> Result<String> {
        Ok(match param {
            "init_file" => (self.init_file as i64).to_string(),
            "test_file" => (self.test_file as i64).to_string(),
            "page_size" => self.page_size.to_string(),
            "num_pages" => self.num_pages.to_string(),
            "expire_time" => self.expire_time.to_string(),
            "share_file" => self.share_file.display().to_string(),
            "start_slots" => self.start_slots.to_string(),
            other => {
                return Err(Error::Configuration(format!(
                    "bad get_param parameter: {other}"
                )))
            }
        })
    }

    pub(crate) fn region_size(&self) -> u64 {
        self.num_pages as u64 * self.page_size as u64
    }
}

fn parse_bool(value: &str) -> bool {
    value.parse::<i64>().map(|v| v != 0).unwrap_or(false)
}

fn parse_u32(param: &str, value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| Error::Configuration(format!("bad value for {param}: {value}")))
}

fn validate_range(name: &str, v: u32, range: std::ops::RangeInclusive<u32>) -> Result<()> {
    if range.contains(&v) {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "{name} must be in [{}, {}], got {v}",
            range.start(),
            range.end()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.num_pages, 89);
        assert_eq!(cfg.page_size, 65536);
        assert_eq!(cfg.start_slots, 89);
        assert_eq!(cfg.expire_time, 0);
    }

    #[test]
    fn rejects_out_of_range_page_size() {
        let err = CacheConfig::new().page_size(100).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn rejects_out_of_range_num_pages() {
        assert!(CacheConfig::new().num_pages(0).is_err());
        assert!(CacheConfig::new().num_pages(1001).is_err());
    }

    #[test]
    fn set_param_rejects_unknown_name() {
        let err = CacheConfig::new().set_param("bogus", "1").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn get_param_round_trips_set_param() {
        let cfg = CacheConfig::new().set_param("num_pages", "4").unwrap();
        assert_eq!(cfg.get_param("num_pages").unwrap(), "4");
        assert!(cfg.get_param("bogus").is_err());
    }

    #[test]
    fn set_param_accepts_known_names() {
        let cfg = CacheConfig::new()
            .set_param("page_size", "2048")
            .unwrap()
            .set_param("num_pages", "4")
            .unwrap()
            .set_param("start_slots", "16")
            .unwrap()
            .set_param("expire_time", "30")
            .unwrap();
        assert_eq!(cfg.page_size, 2048);
        assert_eq!(cfg.num_pages, 4);
        assert_eq!(cfg.start_slots, 16);
        assert_eq!(cfg.expire_time, 30);
    }
}
