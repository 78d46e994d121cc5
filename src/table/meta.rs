//! ATIMEFILE - Table Metadata
//! The table's own record: its block layout and live counters.
//!
//! ## Binary Format
//! ```text
//! [magic: "ATIM"][len: 4 bytes (LE)][payload: bincode TableMeta][crc: 4 bytes (LE)]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::{AtimeError, Result};

use super::layout::BlockLayout;

const MAGIC: &[u8; 4] = b"ATIM";
const META_VERSION: u32 = 1;

/// Persistent description of one atime table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub version: u32,
    pub layout: BlockLayout,
    /// Blocks currently allocated.
    pub live_blocks: u64,
    /// Keys with a recorded timestamp.
    pub live_entries: u64,
}

impl TableMeta {
    /// Metadata for a brand-new, empty table.
    pub fn new(layout: BlockLayout) -> Self {
        Self {
            version: META_VERSION,
            layout,
            live_blocks: 0,
            live_entries: 0,
        }
    }

    /// Serialize and frame with a checksum.
    pub fn encode(&self) -> Result<Bytes> {
        let payload = bincode::serialize(self)?;
        let mut buf = BytesMut::with_capacity(payload.len() + 12);
        buf.put_slice(MAGIC);
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&payload);
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);
        Ok(buf.freeze())
    }

    /// Verify framing and checksum, then deserialize.
    pub fn decode(raw: &[u8]) -> Result<Self> {
        if raw.len() < 12 || &raw[..4] != MAGIC {
            return Err(AtimeError::Corruption("bad table metadata header".to_string()));
        }
        let len = (&raw[4..8]).get_u32_le() as usize;
        if raw.len() != 12 + len {
            return Err(AtimeError::Corruption(format!(
                "table metadata is {} bytes, header says {}",
                raw.len(),
                12 + len
            )));
        }

        let body = &raw[..8 + len];
        let stored = (&raw[8 + len..]).get_u32_le();
        if crc32fast::hash(body) != stored {
            return Err(AtimeError::Corruption("table metadata CRC mismatch".to_string()));
        }

        let meta: TableMeta = bincode::deserialize(&body[8..])?;
        if meta.version != META_VERSION {
            return Err(AtimeError::Corruption(format!(
                "unsupported table metadata version {}",
                meta.version
            )));
        }
        Ok(meta)
    }
}
