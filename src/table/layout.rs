//! ATIMEFILE - Block Layout & Index
//! Maps a key to its owning block and slot.
//!
//! The mapping is stateless: a key's block is `key / N` and its slot
//! is `key % N`, where N is the number of slots that fit in one block.
//! N is fixed when the table is created and never changes, so a key
//! always lives in the same place.

use serde::{Deserialize, Serialize};

use crate::error::{AtimeError, Result};
use crate::types::{BlockId, Key};

/// Bytes used by the live-count at the start of the header.
pub const COUNT_SIZE: usize = 8;

/// Minimum bytes one slot needs: seconds (8), nanoseconds (4), tag (4).
pub const MIN_ENTRY_SIZE: usize = 16;

/// How a slot encodes "no value recorded".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryFormat {
    /// Set slots carry an explicit VALID tag; every timestamp is storable.
    Tagged,
    /// An all-zero timestamp means unset; the tag word is padding.
    Sentinel,
}

/// Fixed geometry of every block in a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockLayout {
    block_size: usize,
    entry_size: usize,
    header_size: usize,
    format: EntryFormat,
    entries_per_block: u64,
}

impl BlockLayout {
    /// Validate the geometry and fix the number of slots per block.
    pub fn new(
        block_size: usize,
        entry_size: usize,
        header_size: usize,
        format: EntryFormat,
    ) -> Result<Self> {
        if header_size < COUNT_SIZE {
            return Err(AtimeError::Config(format!(
                "header size {} cannot hold the live-count",
                header_size
            )));
        }
        if entry_size < MIN_ENTRY_SIZE {
            return Err(AtimeError::Config(format!(
                "entry size {} is below the minimum of {}",
                entry_size, MIN_ENTRY_SIZE
            )));
        }
        let entries = block_size.saturating_sub(header_size) / entry_size;
        if entries == 0 {
            return Err(AtimeError::Config(format!(
                "block size {} holds no entries",
                block_size
            )));
        }

        Ok(Self {
            block_size,
            entry_size,
            header_size,
            format,
            entries_per_block: entries as u64,
        })
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn header_size(&self) -> usize {
        self.header_size
    }

    pub fn format(&self) -> EntryFormat {
        self.format
    }

    /// N: the number of slots in one block.
    pub fn entries_per_block(&self) -> u64 {
        self.entries_per_block
    }

    /// Block holding `key`.
    pub fn block_id(&self, key: Key) -> BlockId {
        key / self.entries_per_block
    }

    /// Slot of `key` inside its block.
    pub fn offset(&self, key: Key) -> usize {
        (key % self.entries_per_block) as usize
    }

    /// Both halves of the mapping at once.
    pub fn locate(&self, key: Key) -> (BlockId, usize) {
        (self.block_id(key), self.offset(key))
    }

    /// First key stored in `block`. Saturates for blocks past the key space.
    pub fn first_key(&self, block: BlockId) -> Key {
        block.saturating_mul(self.entries_per_block)
    }

    /// Byte position of slot `offset` within a block.
    pub fn slot_position(&self, offset: usize) -> usize {
        self.header_size + offset * self.entry_size
    }

    /// Bytes actually covered by the header and slots.
    pub fn used_bytes(&self) -> usize {
        self.slot_position(self.entries_per_block as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_with(entries: usize) -> BlockLayout {
        BlockLayout::new(16 + entries * 16, 16, 16, EntryFormat::Tagged).unwrap()
    }

    #[test]
    fn test_capacity_calculation() {
        let layout = BlockLayout::new(4096, 16, 16, EntryFormat::Tagged).unwrap();
        assert_eq!(layout.entries_per_block(), 255);

        // Leftover bytes that cannot hold a full slot are ignored.
        let layout = BlockLayout::new(100, 16, 8, EntryFormat::Tagged).unwrap();
        assert_eq!(layout.entries_per_block(), 5);
        assert_eq!(layout.used_bytes(), 88);
    }

    #[test]
    fn test_boundary_keys() {
        let layout = layout_with(3);
        let n = layout.entries_per_block();

        assert_eq!(layout.locate(n - 1), (0, 2));
        assert_eq!(layout.locate(n), (1, 0));
        assert_eq!(layout.locate(0), (0, 0));
    }

    #[test]
    fn test_large_keys() {
        let layout = layout_with(255);
        assert_eq!(layout.locate(u64::MAX), (u64::MAX / 255, (u64::MAX % 255) as usize));
        assert_eq!(layout.first_key(layout.block_id(1000)), 1000 - 1000 % 255);
    }

    #[test]
    fn test_slot_positions() {
        let layout = layout_with(3);
        assert_eq!(layout.slot_position(0), 16);
        assert_eq!(layout.slot_position(2), 48);
        assert_eq!(layout.used_bytes(), 64);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        assert!(BlockLayout::new(4096, 16, 4, EntryFormat::Tagged).is_err());
        assert!(BlockLayout::new(4096, 8, 16, EntryFormat::Tagged).is_err());
        assert!(BlockLayout::new(24, 16, 16, EntryFormat::Tagged).is_err());
        assert!(BlockLayout::new(8, 16, 16, EntryFormat::Tagged).is_err());
    }
}
