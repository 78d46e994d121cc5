//! ATIMEFILE - Access-Time Table
//! Top-level module for the block-structured access-time table.
//!
//! A key's timestamp lives in slot `key % N` of block `key / N`. Each block
//! header counts its set slots; a block is created on the first fill that
//! lands in it and deleted from the store as soon as its count drops back
//! to zero.

pub mod codec;
pub mod concurrent;
pub mod file;
pub mod layout;
pub mod memory;
pub mod meta;
pub mod metrics;
pub mod store;

use bytes::Bytes;

use crate::config::Config;
use crate::error::{AtimeError, Result};
use crate::types::{BlockId, Key, TableId, Timestamp};

use self::codec::BlockImage;
use self::layout::{BlockLayout, EntryFormat};
use self::meta::TableMeta;
use self::metrics::TableMetrics;
use self::store::{BlockGuard, BlockStore};

/// What a `delete` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The key had no recorded timestamp; nothing changed.
    NotPresent,
    /// The slot was cleared; its block still holds other entries.
    Cleared,
    /// The slot was the block's last entry and the block was deleted.
    BlockReclaimed,
}

/// Findings of a consistency walk over every stored block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    pub blocks_checked: u64,
    /// Set slots found across all decodable blocks.
    pub live_entries: u64,
    /// Blocks whose header count disagrees with their set slots.
    pub count_mismatches: Vec<BlockId>,
    /// Blocks with no set slots that should have been reclaimed.
    pub empty_blocks: Vec<BlockId>,
    /// Blocks that failed to decode.
    pub corrupt_blocks: Vec<BlockId>,
    /// Table metadata counters disagree with the blocks.
    pub meta_mismatch: bool,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.count_mismatches.is_empty()
            && self.empty_blocks.is_empty()
            && self.corrupt_blocks.is_empty()
            && !self.meta_mismatch
    }
}

/// Per-key access-time table layered on a block store.
///
/// Every operation takes `&mut self` and runs obtain → mutate → release
/// as one unit; wrap the table in [`concurrent::SharedAtimeTable`] to share
/// it between threads.
pub struct AtimeTable<S: BlockStore> {
    store: S,
    table_id: TableId,
    meta: TableMeta,
    metrics: TableMetrics,
}

impl<S: BlockStore> AtimeTable<S> {
    /// Attach to table `table_id` in `store`, creating it with the layout
    /// from `config` if the store has no metadata for it.
    pub fn open(mut store: S, table_id: TableId, config: &Config) -> Result<Self> {
        let meta = match store.load_table_meta(table_id)? {
            Some(raw) => TableMeta::decode(&raw)?,
            None => {
                let meta = TableMeta::new(config.layout()?);
                store.mark_table_dirty(table_id, meta.encode()?);
                log::info!("created atime table {}", table_id);
                meta
            }
        };

        if meta.layout.block_size() != store.block_size() {
            return Err(AtimeError::Config(format!(
                "table {} uses {}-byte blocks but the store holds {}-byte blocks",
                table_id,
                meta.layout.block_size(),
                store.block_size()
            )));
        }

        log::info!(
            "atime table {} opened ({} entries per block, {} blocks, {} entries)",
            table_id,
            meta.layout.entries_per_block(),
            meta.live_blocks,
            meta.live_entries
        );

        Ok(Self {
            store,
            table_id,
            meta,
            metrics: TableMetrics::new(),
        })
    }

    /// Return the timestamp recorded for `key`, recording `fallback` first
    /// if there is none.
    ///
    /// A sentinel-format table cannot store the zero timestamp: with a zero
    /// `fallback` the key stays unset, no block is created and `fallback`
    /// is returned on this and every later call.
    pub fn get_or_init(&mut self, key: Key, fallback: Timestamp) -> Result<Timestamp> {
        let layout = self.meta.layout;
        if !storable(&layout, fallback) {
            return Ok(self.lookup(key)?.unwrap_or(fallback));
        }

        let mut filled = self.meta.clone();
        filled.live_entries += 1;
        let filled_raw = filled.encode()?;
        let mut allocated = filled.clone();
        allocated.live_blocks += 1;
        let allocated_raw = allocated.encode()?;

        let (block, offset) = layout.locate(key);
        let mut guard = BlockGuard::get_or_create(&mut self.store, self.table_id, block)?;
        if let Some(existing) = codec::read_slot(guard.data()?, &layout, offset)? {
            self.metrics.record_hit();
            return Ok(existing);
        }

        let created = guard.created();
        if let Err(e) = fill_slot(&mut guard, &layout, block, offset, fallback) {
            if created {
                // A block with no entries must not outlive the failed fill.
                if let Err(undo) = guard.delete() {
                    log::warn!("table {}: dropping block {} failed: {}", self.table_id, block, undo);
                }
            }
            return Err(e);
        }
        drop(guard);

        self.metrics.record_fill(created);
        if created {
            log::debug!("table {}: allocated block {}", self.table_id, block);
            self.commit(allocated, allocated_raw);
        } else {
            self.commit(filled, filled_raw);
        }
        Ok(fallback)
    }

    /// Overwrite the timestamp of a key that already has one.
    ///
    /// The live-count is untouched. A key with no recorded timestamp is
    /// `NotFound` and nothing is created.
    pub fn set(&mut self, key: Key, value: Timestamp) -> Result<()> {
        let layout = self.meta.layout;
        if !storable(&layout, value) {
            return Err(AtimeError::InvalidTimestamp(
                "zero timestamp is the unset sentinel".to_string(),
            ));
        }

        let (block, offset) = layout.locate(key);
        let Some(mut guard) = BlockGuard::lookup(&mut self.store, self.table_id, block)? else {
            return Err(AtimeError::NotFound { key });
        };
        if codec::read_slot(guard.data()?, &layout, offset)?.is_none() {
            return Err(AtimeError::NotFound { key });
        }

        codec::write_slot(guard.data_mut()?, &layout, offset, value)?;
        guard.mark_dirty();
        self.metrics.record_set();
        Ok(())
    }

    /// Forget the timestamp of `key`, deleting its block once empty.
    ///
    /// Deleting a key with no recorded timestamp is a no-op.
    pub fn delete(&mut self, key: Key) -> Result<DeleteOutcome> {
        let layout = self.meta.layout;
        let (block, offset) = layout.locate(key);
        let Some(mut guard) = BlockGuard::lookup(&mut self.store, self.table_id, block)? else {
            self.metrics.record_noop_delete();
            return Ok(DeleteOutcome::NotPresent);
        };
        if codec::read_slot(guard.data()?, &layout, offset)?.is_none() {
            drop(guard);
            self.metrics.record_noop_delete();
            return Ok(DeleteOutcome::NotPresent);
        }

        let data = guard.data_mut()?;
        let count = codec::read_count(data);
        if count == 0 {
            return Err(AtimeError::InvariantViolation(format!(
                "block {} counts no entries but slot {} is set",
                block, offset
            )));
        }

        let mut cleared = self.meta.clone();
        cleared.live_entries = cleared.live_entries.saturating_sub(1);
        let cleared_raw = cleared.encode()?;
        let mut reclaimed = cleared.clone();
        reclaimed.live_blocks = reclaimed.live_blocks.saturating_sub(1);
        let reclaimed_raw = reclaimed.encode()?;

        codec::clear_slot(data, &layout, offset)?;
        codec::write_count(data, count - 1);
        guard.mark_dirty();

        if count > 1 {
            drop(guard);
            self.metrics.record_delete(false);
            self.commit(cleared, cleared_raw);
            return Ok(DeleteOutcome::Cleared);
        }

        match guard.delete() {
            Ok(existed) => {
                if !existed {
                    log::warn!("table {}: block {} vanished before reclaim", self.table_id, block);
                }
                log::debug!("table {}: reclaimed block {}", self.table_id, block);
                self.metrics.record_delete(true);
                self.commit(reclaimed, reclaimed_raw);
                Ok(DeleteOutcome::BlockReclaimed)
            }
            Err(e) => {
                // The slot is cleared; the empty block lingers until repair.
                self.metrics.record_delete(false);
                self.commit(cleared, cleared_raw);
                Err(e)
            }
        }
    }

    /// The recorded timestamp of `key`, without creating anything.
    pub fn lookup(&mut self, key: Key) -> Result<Option<Timestamp>> {
        let layout = self.meta.layout;
        let (block, offset) = layout.locate(key);
        match BlockGuard::lookup(&mut self.store, self.table_id, block)? {
            Some(guard) => codec::read_slot(guard.data()?, &layout, offset),
            None => Ok(None),
        }
    }

    /// Live-count stored in `block`'s header, or `None` if it is absent.
    pub fn block_count(&mut self, block: BlockId) -> Result<Option<u64>> {
        match BlockGuard::lookup(&mut self.store, self.table_id, block)? {
            Some(guard) => Ok(Some(codec::read_count(guard.data()?))),
            None => Ok(None),
        }
    }

    /// Walk every block and report inconsistencies without changing anything.
    pub fn check(&mut self) -> Result<CheckReport> {
        self.walk(false)
    }

    /// Walk every block, fix header counts, delete empty blocks and
    /// rebuild the metadata counters. Returns what was found.
    pub fn repair(&mut self) -> Result<CheckReport> {
        self.walk(true)
    }

    /// Persist dirty blocks and table metadata.
    pub fn sync(&mut self) -> Result<()> {
        self.store.sync()?;
        log::info!(
            "atime table {} synced ({} blocks, {} entries)",
            self.table_id,
            self.meta.live_blocks,
            self.meta.live_entries
        );
        Ok(())
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.meta.layout
    }

    /// Blocks currently allocated, per the table metadata.
    pub fn live_blocks(&self) -> u64 {
        self.meta.live_blocks
    }

    /// Keys with a recorded timestamp, per the table metadata.
    pub fn live_entries(&self) -> u64 {
        self.meta.live_entries
    }

    pub fn metrics(&self) -> &TableMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Give the store back, e.g. to reopen the table later.
    pub fn into_store(self) -> S {
        self.store
    }

    fn commit(&mut self, meta: TableMeta, raw: Bytes) {
        self.meta = meta;
        self.store.mark_table_dirty(self.table_id, raw);
    }

    fn walk(&mut self, repair: bool) -> Result<CheckReport> {
        let layout = self.meta.layout;
        let mut report = CheckReport::default();
        let mut live_blocks = 0u64;

        for id in self.store.block_ids(self.table_id)? {
            let Some(mut guard) = BlockGuard::lookup(&mut self.store, self.table_id, id)? else {
                continue;
            };
            report.blocks_checked += 1;

            let image = match BlockImage::decode(guard.data()?, &layout) {
                Ok(image) => image,
                Err(AtimeError::Corruption(msg)) => {
                    log::warn!("table {}: block {} is corrupt: {}", self.table_id, id, msg);
                    report.corrupt_blocks.push(id);
                    live_blocks += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let live = image.live_entries();
            if live == 0 {
                log::warn!("table {}: block {} is empty", self.table_id, id);
                report.empty_blocks.push(id);
                if repair {
                    guard.delete()?;
                } else {
                    live_blocks += 1;
                }
                continue;
            }

            live_blocks += 1;
            report.live_entries += live;
            if !image.is_consistent() {
                log::warn!(
                    "table {}: block {} counts {} entries, holds {}",
                    self.table_id,
                    id,
                    image.count,
                    live
                );
                report.count_mismatches.push(id);
                if repair {
                    codec::write_count(guard.data_mut()?, live);
                    guard.mark_dirty();
                }
            }
        }

        report.meta_mismatch =
            self.meta.live_blocks != live_blocks || self.meta.live_entries != report.live_entries;
        if repair && report.meta_mismatch {
            let mut next = self.meta.clone();
            next.live_blocks = live_blocks;
            next.live_entries = report.live_entries;
            let raw = next.encode()?;
            self.commit(next, raw);
        }
        Ok(report)
    }
}

fn fill_slot<S: BlockStore + ?Sized>(
    guard: &mut BlockGuard<'_, S>,
    layout: &BlockLayout,
    block: BlockId,
    offset: usize,
    value: Timestamp,
) -> Result<()> {
    let data = guard.data_mut()?;
    let count = codec::read_count(data);
    if count >= layout.entries_per_block() {
        return Err(AtimeError::InvariantViolation(format!(
            "block {} already counts {} entries with slot {} unset",
            block, count, offset
        )));
    }
    codec::write_slot(data, layout, offset, value)?;
    codec::write_count(data, count + 1);
    guard.mark_dirty();
    Ok(())
}

fn storable(layout: &BlockLayout, ts: Timestamp) -> bool {
    layout.format() == EntryFormat::Tagged || !ts.is_zero()
}
