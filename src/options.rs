use crate::arena::{ArenaPool, SharedArenaPool};
use anyhow::{bail, Result};
use std::sync::Arc;

/// Default size a block aims for before compression.
pub const DEFAULT_BLOCK_SIZE: usize = 4 * 1024; // 4 KB.

/// Default size a table aims for. The builder reports it is full at 95% of it,
/// the rest is headroom for the index and the footer.
pub const DEFAULT_TABLE_SIZE: u64 = 64 * 1024 * 1024; // 64 MB.

pub const DEFAULT_BLOOM_FALSE_POSITIVE: f64 = 0.01;

pub const DEFAULT_ZSTD_LEVEL: i32 = 1;

/// Block compression used for a whole table.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::Display)]
pub enum Compression {
    #[default]
    #[strum(to_string = "none")]
    None,
    /// Fast mode.
    #[strum(to_string = "snappy", serialize = "fast")]
    Snappy,
    /// High-ratio mode, uses `Options::zstd_level`.
    #[strum(to_string = "zstd", serialize = "high-ratio")]
    Zstd,
}

#[derive(Debug, Clone)]
pub struct Options {
    pub block_size: usize,
    pub table_size: u64,
    pub compression: Compression,
    pub zstd_level: i32,
    /// Zero or negative disables the table filter.
    pub bloom_false_positive: f64,
    /// Number of compression workers. `None` sizes the pool from available parallelism.
    pub compression_workers: Option<usize>,
    pub alloc_pool: Arc<dyn ArenaPool>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            table_size: DEFAULT_TABLE_SIZE,
            compression: Compression::default(),
            zstd_level: DEFAULT_ZSTD_LEVEL,
            bloom_false_positive: DEFAULT_BLOOM_FALSE_POSITIVE,
            compression_workers: None,
            alloc_pool: Arc::new(SharedArenaPool::new()),
        }
    }
}

impl Options {
    /// Size at which `Builder::reached_capacity` starts reporting true.
    pub fn table_capacity(&self) -> u64 {
        self.table_size / 100 * 95 + self.table_size % 100 * 95 / 100
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            bail!("block size is zero");
        }

        if self.block_size > u32::MAX as usize {
            bail!("block size {} does not fit in 32 bits", self.block_size);
        }

        if self.table_size == 0 {
            bail!("table size is zero");
        }

        if self.bloom_false_positive >= 1.0 || self.bloom_false_positive.is_nan() {
            bail!(
                "bloom false positive rate {} is out of range",
                self.bloom_false_positive
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_compression_from_str() {
        assert_eq!(Compression::from_str("none").unwrap(), Compression::None);
        assert_eq!(Compression::from_str("snappy").unwrap(), Compression::Snappy);
        assert_eq!(Compression::from_str("fast").unwrap(), Compression::Snappy);
        assert_eq!(Compression::from_str("zstd").unwrap(), Compression::Zstd);
        assert_eq!(Compression::from_str("high-ratio").unwrap(), Compression::Zstd);
        assert!(Compression::from_str("lz4").is_err());
    }

    #[test]
    fn test_compression_display() {
        assert_eq!(Compression::Snappy.to_string(), "snappy");
        assert_eq!(Compression::Zstd.to_string(), "zstd");
    }

    #[test]
    fn test_table_capacity() {
        let mut opts = Options::default();
        opts.table_size = 100;
        assert_eq!(opts.table_capacity(), 95);
        opts.table_size = 1000;
        assert_eq!(opts.table_capacity(), 950);
        opts.table_size = DEFAULT_TABLE_SIZE;
        assert_eq!(opts.table_capacity(), DEFAULT_TABLE_SIZE * 95 / 100);
    }

    #[test]
    fn test_validate() {
        assert!(Options::default().validate().is_ok());

        let opts = Options {
            block_size: 0,
            ..Default::default()
        };
        assert_eq!(opts.validate().unwrap_err().to_string(), "block size is zero");

        let opts = Options {
            table_size: 0,
            ..Default::default()
        };
        assert_eq!(opts.validate().unwrap_err().to_string(), "table size is zero");

        let opts = Options {
            bloom_false_positive: 1.5,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = Options {
            bloom_false_positive: -1.0,
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }
}
