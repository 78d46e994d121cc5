//! ATIMEFILE - Block Store Interface
//! The storage contract the atime table is layered on, plus the scoped
//! guard the table uses to borrow a block for one operation.
//!
//! ## Contract
//! - A block handed out by `lookup_block` or `get_or_create_block` stays
//!   pinned until `release_block` is called with its handle.
//! - `get_or_create_block` never creates a block that already exists and
//!   marks new blocks dirty.
//! - `delete_block` is idempotent.
//! - Persistence, caching and crash behaviour belong to the store.

use bytes::Bytes;

use crate::error::{AtimeError, Result};
use crate::types::{BlockId, TableId};

use super::codec;

/// Proof that a block is pinned in a store.
///
/// Deliberately not `Clone`: a handle is consumed by `release_block`.
#[derive(Debug, PartialEq, Eq)]
pub struct BlockHandle {
    table: TableId,
    block: BlockId,
    created: bool,
}

impl BlockHandle {
    /// Stores build handles when they pin a block.
    pub fn new(table: TableId, block: BlockId, created: bool) -> Self {
        Self {
            table,
            block,
            created,
        }
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    /// True if this lookup created the block.
    pub fn created(&self) -> bool {
        self.created
    }
}

/// Block-oriented storage consumed by the atime table.
pub trait BlockStore {
    /// Size of every block in bytes.
    fn block_size(&self) -> usize;

    /// Pin an existing block. Never creates.
    fn lookup_block(&mut self, table: TableId, block: BlockId) -> Result<Option<BlockHandle>>;

    /// Pin a block, creating it with `init` if it does not exist.
    fn get_or_create_block(
        &mut self,
        table: TableId,
        block: BlockId,
        init: &dyn Fn(&mut [u8]),
    ) -> Result<BlockHandle>;

    /// Contents of a pinned block.
    fn block_data(&self, handle: &BlockHandle) -> Result<&[u8]>;

    /// Mutable contents of a pinned block.
    fn block_data_mut(&mut self, handle: &BlockHandle) -> Result<&mut [u8]>;

    /// Record that a pinned block was modified.
    fn mark_block_dirty(&mut self, handle: &BlockHandle);

    /// Unpin a block.
    fn release_block(&mut self, handle: BlockHandle);

    /// Remove a block's backing storage. Returns whether it existed.
    fn delete_block(&mut self, table: TableId, block: BlockId) -> Result<bool>;

    /// Every block currently stored for `table`, ascending.
    fn block_ids(&mut self, table: TableId) -> Result<Vec<BlockId>>;

    /// The table's serialized metadata, if it was ever written.
    fn load_table_meta(&mut self, table: TableId) -> Result<Option<Bytes>>;

    /// Stage new serialized metadata for `table`.
    fn mark_table_dirty(&mut self, table: TableId, meta: Bytes);

    /// Persist dirty blocks and metadata.
    fn sync(&mut self) -> Result<()>;
}

/// Allocate a `size`-byte block buffer and run `init` over it.
///
/// Allocation failure surfaces as `OutOfMemory` instead of aborting.
pub fn alloc_block(size: usize, init: &dyn Fn(&mut [u8])) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(size)
        .map_err(|e| AtimeError::OutOfMemory(format!("{}-byte block: {}", size, e)))?;
    data.resize(size, 0);
    init(&mut data);
    Ok(data)
}

/// A block borrowed from a store for the span of one operation.
///
/// The block is released when the guard drops, so an early `?` return
/// cannot leak a pin.
pub struct BlockGuard<'a, S: BlockStore + ?Sized> {
    store: &'a mut S,
    handle: Option<BlockHandle>,
}

impl<'a, S: BlockStore + ?Sized> BlockGuard<'a, S> {
    /// Pin an existing block, or return `None` if it is absent.
    pub fn lookup(store: &'a mut S, table: TableId, block: BlockId) -> Result<Option<Self>> {
        match store.lookup_block(table, block)? {
            Some(handle) => Ok(Some(Self::wrap(store, handle))),
            None => Ok(None),
        }
    }

    /// Pin a block, creating a zeroed one if it is absent.
    pub fn get_or_create(store: &'a mut S, table: TableId, block: BlockId) -> Result<Self> {
        let handle = store.get_or_create_block(table, block, &codec::init_block)?;
        Ok(Self::wrap(store, handle))
    }

    fn wrap(store: &'a mut S, handle: BlockHandle) -> Self {
        Self {
            store,
            handle: Some(handle),
        }
    }

    fn handle(&self) -> Result<&BlockHandle> {
        self.handle
            .as_ref()
            .ok_or_else(|| AtimeError::InvariantViolation("block already released".to_string()))
    }

    pub fn created(&self) -> bool {
        self.handle.as_ref().is_some_and(BlockHandle::created)
    }

    pub fn data(&self) -> Result<&[u8]> {
        self.store.block_data(self.handle()?)
    }

    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| AtimeError::InvariantViolation("block already released".to_string()))?;
        self.store.block_data_mut(handle)
    }

    pub fn mark_dirty(&mut self) {
        if let Some(handle) = self.handle.as_ref() {
            self.store.mark_block_dirty(handle);
        }
    }

    /// Release the block, then delete it from the store.
    pub fn delete(mut self) -> Result<bool> {
        let handle = self
            .handle
            .take()
            .ok_or_else(|| AtimeError::InvariantViolation("block already released".to_string()))?;
        let (table, block) = (handle.table(), handle.block());
        self.store.release_block(handle);
        self.store.delete_block(table, block)
    }
}

impl<S: BlockStore + ?Sized> Drop for BlockGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.store.release_block(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_block_runs_init() {
        let data = alloc_block(32, &|b: &mut [u8]| b[0] = 7).unwrap();
        assert_eq!(data.len(), 32);
        assert_eq!(data[0], 7);
        assert!(data[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_alloc_block_reports_oom() {
        let err = alloc_block(usize::MAX, &|_: &mut [u8]| {}).unwrap_err();
        assert!(matches!(err, AtimeError::OutOfMemory(_)));
    }
}
