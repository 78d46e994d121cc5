//! ATIMEFILE - Table Configuration
//! Defines tunable parameters for the access-time table and its stores.

use std::path::PathBuf;

use crate::error::Result;
use crate::table::layout::{BlockLayout, EntryFormat};

/// Size of one block in bytes. Matches the common filesystem page size.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Header bytes at the start of each block: the live-count plus reserved space.
pub const DEFAULT_HEADER_SIZE: usize = 16;

/// Bytes per slot: seconds (8), nanoseconds (4), tag (4).
pub const DEFAULT_ENTRY_SIZE: usize = 16;

/// Configuration for an atime table.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for block files (used by the file store).
    pub data_dir: PathBuf,

    /// Size of every block in bytes.
    pub block_size: usize,

    /// Size of the per-block header in bytes.
    pub header_size: usize,

    /// Size of one slot in bytes.
    pub entry_size: usize,

    /// How an unset slot is told apart from a set one.
    pub entry_format: EntryFormat,

    /// Write dirty blocks back as soon as they are released.
    pub write_through: bool,

    /// Whether to fsync block and metadata writes.
    pub sync_writes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            block_size: DEFAULT_BLOCK_SIZE,
            header_size: DEFAULT_HEADER_SIZE,
            entry_size: DEFAULT_ENTRY_SIZE,
            entry_format: EntryFormat::Tagged,
            write_through: false,
            sync_writes: true,
        }
    }
}

impl Config {
    /// Create a new Config with a custom data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Set the block size in bytes.
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the slot format used when a new table is created.
    pub fn with_entry_format(mut self, format: EntryFormat) -> Self {
        self.entry_format = format;
        self
    }

    pub fn with_write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    /// Build and validate the block layout described by this config.
    pub fn layout(&self) -> Result<BlockLayout> {
        BlockLayout::new(
            self.block_size,
            self.entry_size,
            self.header_size,
            self.entry_format,
        )
    }

    /// Ensure the data directory exists.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let layout = Config::default().layout().unwrap();
        assert_eq!(layout.entries_per_block(), 255);
    }

    #[test]
    fn test_builder() {
        let config = Config::new("/tmp/x")
            .with_block_size(512)
            .with_entry_format(EntryFormat::Sentinel)
            .with_write_through(true);
        assert_eq!(config.block_size, 512);
        assert!(config.write_through);
        assert_eq!(config.layout().unwrap().entries_per_block(), 31);
    }
}
