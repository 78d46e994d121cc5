//! ATIMEFILE - Block Codec
//! Fixed binary layout of one block.
//!
//! ## Binary Format (little endian)
//! ```text
//! [count: 8 bytes][reserved: header_size - 8 bytes, zero]
//! [slot 0][slot 1] ... [slot N-1][zero padding up to block_size]
//!
//! slot = [secs: 8 bytes (i64)][nanos: 4 bytes (u32)][tag: 4 bytes (u32)][zero padding]
//! ```
//!
//! In the tagged format bit 0 of `tag` marks a set slot and an unset slot is
//! all zero. In the sentinel format `tag` is padding and a zero timestamp
//! marks an unset slot.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{AtimeError, Result};
use crate::types::Timestamp;

use super::layout::{BlockLayout, EntryFormat, COUNT_SIZE, MIN_ENTRY_SIZE};

/// Tag bit carried by every set slot in the tagged format.
pub const TAG_VALID: u32 = 0x1;

/// A fully decoded block: its header count and every slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockImage {
    pub count: u64,
    pub slots: Vec<Option<Timestamp>>,
}

impl BlockImage {
    /// A fresh block: count 0, all slots unset.
    pub fn empty(layout: &BlockLayout) -> Self {
        Self {
            count: 0,
            slots: vec![None; layout.entries_per_block() as usize],
        }
    }

    /// Decode raw block bytes. Reserved and padding bytes must be zero.
    pub fn decode(block: &[u8], layout: &BlockLayout) -> Result<Self> {
        check_len(block, layout)?;
        check_zero(&block[COUNT_SIZE..layout.header_size()], "reserved header")?;
        check_zero(&block[layout.used_bytes()..], "block tail")?;

        let slots = (0..layout.entries_per_block() as usize)
            .map(|offset| read_slot(block, layout, offset))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            count: read_count(block),
            slots,
        })
    }

    /// Encode into a new zero-initialized block buffer.
    pub fn encode(&self, layout: &BlockLayout) -> Result<BytesMut> {
        if self.slots.len() as u64 != layout.entries_per_block() {
            return Err(AtimeError::Config(format!(
                "image has {} slots, layout expects {}",
                self.slots.len(),
                layout.entries_per_block()
            )));
        }

        let mut block = BytesMut::zeroed(layout.block_size());
        write_count(&mut block, self.count);
        for (offset, slot) in self.slots.iter().enumerate() {
            if let Some(ts) = slot {
                write_slot(&mut block, layout, offset, *ts)?;
            }
        }
        Ok(block)
    }

    /// Number of set slots.
    pub fn live_entries(&self) -> u64 {
        self.slots.iter().filter(|s| s.is_some()).count() as u64
    }

    /// True when the header count matches the set slots.
    pub fn is_consistent(&self) -> bool {
        self.count == self.live_entries()
    }
}

/// Zero a buffer into a fresh block.
pub fn init_block(block: &mut [u8]) {
    block.fill(0);
}

/// Read the live-count from the block header.
pub fn read_count(block: &[u8]) -> u64 {
    (&block[..COUNT_SIZE]).get_u64_le()
}

/// Overwrite the live-count in the block header.
pub fn write_count(block: &mut [u8], count: u64) {
    (&mut block[..COUNT_SIZE]).put_u64_le(count);
}

/// Decode one slot in place.
pub fn read_slot(block: &[u8], layout: &BlockLayout, offset: usize) -> Result<Option<Timestamp>> {
    let raw = slot_bytes(block, layout, offset)?;
    let mut buf = &raw[..MIN_ENTRY_SIZE];
    let secs = buf.get_i64_le();
    let nanos = buf.get_u32_le();
    let tag = buf.get_u32_le();
    check_zero(&raw[MIN_ENTRY_SIZE..], "slot padding")?;

    let set = match layout.format() {
        EntryFormat::Tagged => {
            if tag & !TAG_VALID != 0 {
                return Err(AtimeError::Corruption(format!(
                    "slot {} has unknown tag bits {:#x}",
                    offset, tag
                )));
            }
            if tag == 0 {
                if secs != 0 || nanos != 0 {
                    return Err(AtimeError::Corruption(format!(
                        "unset slot {} carries data",
                        offset
                    )));
                }
                false
            } else {
                true
            }
        }
        EntryFormat::Sentinel => {
            if tag != 0 {
                return Err(AtimeError::Corruption(format!(
                    "slot {} has non-zero padding",
                    offset
                )));
            }
            secs != 0 || nanos != 0
        }
    };

    if !set {
        return Ok(None);
    }
    Timestamp::new(secs, nanos)
        .map(Some)
        .map_err(|e| AtimeError::Corruption(format!("slot {}: {}", offset, e)))
}

/// Encode `ts` into one slot in place.
///
/// Fails without touching the block if the slot format cannot represent `ts`.
pub fn write_slot(
    block: &mut [u8],
    layout: &BlockLayout,
    offset: usize,
    ts: Timestamp,
) -> Result<()> {
    let tag = match layout.format() {
        EntryFormat::Tagged => TAG_VALID,
        EntryFormat::Sentinel if ts.is_zero() => {
            return Err(AtimeError::InvalidTimestamp(
                "zero timestamp is the unset sentinel".to_string(),
            ))
        }
        EntryFormat::Sentinel => 0,
    };

    let raw = slot_bytes_mut(block, layout, offset)?;
    let (head, padding) = raw.split_at_mut(MIN_ENTRY_SIZE);
    let mut out = head;
    out.put_i64_le(ts.secs());
    out.put_u32_le(ts.nanos());
    out.put_u32_le(tag);
    padding.fill(0);
    Ok(())
}

/// Reset one slot to unset.
pub fn clear_slot(block: &mut [u8], layout: &BlockLayout, offset: usize) -> Result<()> {
    slot_bytes_mut(block, layout, offset)?.fill(0);
    Ok(())
}

fn slot_range(layout: &BlockLayout, offset: usize) -> Result<std::ops::Range<usize>> {
    if offset as u64 >= layout.entries_per_block() {
        return Err(AtimeError::InvariantViolation(format!(
            "slot {} beyond block capacity {}",
            offset,
            layout.entries_per_block()
        )));
    }
    let start = layout.slot_position(offset);
    Ok(start..start + layout.entry_size())
}

fn slot_bytes<'a>(block: &'a [u8], layout: &BlockLayout, offset: usize) -> Result<&'a [u8]> {
    check_len(block, layout)?;
    Ok(&block[slot_range(layout, offset)?])
}

fn slot_bytes_mut<'a>(
    block: &'a mut [u8],
    layout: &BlockLayout,
    offset: usize,
) -> Result<&'a mut [u8]> {
    check_len(block, layout)?;
    let range = slot_range(layout, offset)?;
    Ok(&mut block[range])
}

fn check_len(block: &[u8], layout: &BlockLayout) -> Result<()> {
    if block.len() != layout.block_size() {
        return Err(AtimeError::Corruption(format!(
            "block is {} bytes, expected {}",
            block.len(),
            layout.block_size()
        )));
    }
    Ok(())
}

fn check_zero(bytes: &[u8], what: &str) -> Result<()> {
    if bytes.iter().any(|&b| b != 0) {
        return Err(AtimeError::Corruption(format!("{} is not zeroed", what)));
    }
    Ok(())
}
