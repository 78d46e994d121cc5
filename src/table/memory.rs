//! ATIMEFILE - In-Memory Block Store
//! A `BlockStore` kept entirely in a `HashMap`. Used for embedding,
//! tests and benchmarks.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{AtimeError, Result};
use crate::types::{BlockId, TableId};

use super::store::{alloc_block, BlockHandle, BlockStore};

struct MemBlock {
    data: Vec<u8>,
    pins: u32,
    dirty: bool,
}

/// Block store backed by process memory.
pub struct MemoryStore {
    block_size: usize,
    blocks: HashMap<(TableId, BlockId), MemBlock>,
    metas: HashMap<TableId, Bytes>,
}

impl MemoryStore {
    /// Create an empty store with the given block size.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            blocks: HashMap::new(),
            metas: HashMap::new(),
        }
    }

    /// Returns true if the block exists.
    pub fn contains_block(&self, table: TableId, block: BlockId) -> bool {
        self.blocks.contains_key(&(table, block))
    }

    /// Number of blocks held for `table`.
    pub fn block_count(&self, table: TableId) -> usize {
        self.blocks.keys().filter(|(t, _)| *t == table).count()
    }

    /// Number of blocks currently pinned. Zero between table operations.
    pub fn pinned_blocks(&self) -> usize {
        self.blocks.values().filter(|b| b.pins > 0).count()
    }

    /// Number of blocks modified since the last `sync`.
    pub fn dirty_blocks(&self) -> usize {
        self.blocks.values().filter(|b| b.dirty).count()
    }

    /// Raw bytes of a block, for inspection.
    pub fn raw_block(&self, table: TableId, block: BlockId) -> Option<&[u8]> {
        self.blocks.get(&(table, block)).map(|b| &b.data[..])
    }

    /// Replace a block's bytes, creating it if needed.
    pub fn put_raw_block(&mut self, table: TableId, block: BlockId, data: &[u8]) -> Result<()> {
        if data.len() != self.block_size {
            return Err(AtimeError::Corruption(format!(
                "block is {} bytes, expected {}",
                data.len(),
                self.block_size
            )));
        }
        let entry = self.blocks.entry((table, block)).or_insert_with(|| MemBlock {
            data: Vec::new(),
            pins: 0,
            dirty: false,
        });
        entry.data = data.to_vec();
        entry.dirty = true;
        Ok(())
    }

    fn pinned(&self, handle: &BlockHandle) -> Result<&MemBlock> {
        self.blocks
            .get(&(handle.table(), handle.block()))
            .ok_or_else(|| missing(handle))
    }
}

fn missing(handle: &BlockHandle) -> AtimeError {
    AtimeError::InvariantViolation(format!(
        "block {} of table {} is not pinned",
        handle.block(),
        handle.table()
    ))
}

impl BlockStore for MemoryStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn lookup_block(&mut self, table: TableId, block: BlockId) -> Result<Option<BlockHandle>> {
        Ok(self.blocks.get_mut(&(table, block)).map(|b| {
            b.pins += 1;
            BlockHandle::new(table, block, false)
        }))
    }

    fn get_or_create_block(
        &mut self,
        table: TableId,
        block: BlockId,
        init: &dyn Fn(&mut [u8]),
    ) -> Result<BlockHandle> {
        if let Some(handle) = self.lookup_block(table, block)? {
            return Ok(handle);
        }

        let data = alloc_block(self.block_size, init)?;
        self.blocks.insert(
            (table, block),
            MemBlock {
                data,
                pins: 1,
                dirty: true,
            },
        );
        log::trace!("memory store created block {} of table {}", block, table);
        Ok(BlockHandle::new(table, block, true))
    }

    fn block_data(&self, handle: &BlockHandle) -> Result<&[u8]> {
        Ok(&self.pinned(handle)?.data[..])
    }

    fn block_data_mut(&mut self, handle: &BlockHandle) -> Result<&mut [u8]> {
        self.blocks
            .get_mut(&(handle.table(), handle.block()))
            .map(|b| &mut b.data[..])
            .ok_or_else(|| missing(handle))
    }

    fn mark_block_dirty(&mut self, handle: &BlockHandle) {
        if let Some(b) = self.blocks.get_mut(&(handle.table(), handle.block())) {
            b.dirty = true;
        }
    }

    fn release_block(&mut self, handle: BlockHandle) {
        if let Some(b) = self.blocks.get_mut(&(handle.table(), handle.block())) {
            b.pins = b.pins.saturating_sub(1);
        }
    }

    fn delete_block(&mut self, table: TableId, block: BlockId) -> Result<bool> {
        Ok(self.blocks.remove(&(table, block)).is_some())
    }

    fn block_ids(&mut self, table: TableId) -> Result<Vec<BlockId>> {
        let mut ids: Vec<BlockId> = self
            .blocks
            .keys()
            .filter(|(t, _)| *t == table)
            .map(|(_, b)| *b)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn load_table_meta(&mut self, table: TableId) -> Result<Option<Bytes>> {
        Ok(self.metas.get(&table).cloned())
    }

    fn mark_table_dirty(&mut self, table: TableId, meta: Bytes) {
        self.metas.insert(table, meta);
    }

    fn sync(&mut self) -> Result<()> {
        for b in self.blocks.values_mut() {
            b.dirty = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::store::BlockGuard;

    #[test]
    fn test_create_marks_dirty_and_pins() {
        let mut store = MemoryStore::new(64);
        let handle = store.get_or_create_block(1, 7, &|b: &mut [u8]| b.fill(0xAA)).unwrap();
        assert!(handle.created());
        assert_eq!(store.block_data(&handle).unwrap(), &[0xAA; 64][..]);
        assert_eq!(store.pinned_blocks(), 1);
        assert_eq!(store.dirty_blocks(), 1);

        store.release_block(handle);
        assert_eq!(store.pinned_blocks(), 0);

        let again = store.get_or_create_block(1, 7, &|b: &mut [u8]| b.fill(0)).unwrap();
        assert!(!again.created());
        assert_eq!(store.block_data(&again).unwrap()[0], 0xAA);
        store.release_block(again);
    }

    #[test]
    fn test_lookup_never_creates() {
        let mut store = MemoryStore::new(64);
        assert!(store.lookup_block(1, 0).unwrap().is_none());
        assert!(!store.contains_block(1, 0));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut store = MemoryStore::new(64);
        let handle = store.get_or_create_block(1, 0, &|_| {}).unwrap();
        store.release_block(handle);

        assert!(store.delete_block(1, 0).unwrap());
        assert!(!store.delete_block(1, 0).unwrap());
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let mut store = MemoryStore::new(64);
        {
            let mut guard = BlockGuard::get_or_create(&mut store, 3, 2).unwrap();
            guard.data_mut().unwrap()[0] = 1;
            guard.mark_dirty();
        }
        assert_eq!(store.pinned_blocks(), 0);
        assert_eq!(store.raw_block(3, 2).unwrap()[0], 1);

        let guard = BlockGuard::lookup(&mut store, 3, 2).unwrap().unwrap();
        assert!(guard.delete().unwrap());
        assert!(!store.contains_block(3, 2));
    }

    #[test]
    fn test_block_ids_per_table() {
        let mut store = MemoryStore::new(64);
        for (table, block) in [(1, 5), (1, 2), (2, 9)] {
            let handle = store.get_or_create_block(table, block, &|_| {}).unwrap();
            store.release_block(handle);
        }
        assert_eq!(store.block_ids(1).unwrap(), vec![2, 5]);
        assert_eq!(store.block_count(2), 1);

        store.sync().unwrap();
        assert_eq!(store.dirty_blocks(), 0);
    }
}
