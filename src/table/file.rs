//! ATIMEFILE - File-Backed Block Store
//! Persists each block as its own file so that deleting a block
//! releases its disk space immediately.
//!
//! ## Directory Layout
//! ```text
//! <data_dir>/table-<id>.meta             serialized table metadata
//! <data_dir>/table-<id>/<block>.blk      one file per block, block_size bytes
//! ```
//!
//! Pinned and dirty blocks are held in a buffer cache. Dirty blocks reach
//! disk on `sync()`, or when released if `write_through` is set.

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::config::Config;
use crate::error::{AtimeError, Result};
use crate::types::{BlockId, TableId};

use super::store::{alloc_block, BlockHandle, BlockStore};

struct CachedBlock {
    data: Vec<u8>,
    pins: u32,
    dirty: bool,
}

/// Block store persisting blocks as files under a data directory.
pub struct FileStore {
    root: PathBuf,
    block_size: usize,
    write_through: bool,
    sync_writes: bool,
    cache: HashMap<(TableId, BlockId), CachedBlock>,
    dirty_meta: HashMap<TableId, Bytes>,
}

impl FileStore {
    /// Open or create a store rooted at the configured data directory.
    pub fn open(config: &Config) -> Result<Self> {
        config.ensure_dirs()?;
        log::info!("file store opened at {:?}", config.data_dir);

        Ok(Self {
            root: config.data_dir.clone(),
            block_size: config.block_size,
            write_through: config.write_through,
            sync_writes: config.sync_writes,
            cache: HashMap::new(),
            dirty_meta: HashMap::new(),
        })
    }

    /// Returns the data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `block`.
    pub fn block_path(&self, table: TableId, block: BlockId) -> PathBuf {
        self.table_dir(table).join(format!("{:016x}.blk", block))
    }

    /// Number of blocks currently held in the buffer cache.
    pub fn cached_blocks(&self) -> usize {
        self.cache.len()
    }

    fn table_dir(&self, table: TableId) -> PathBuf {
        self.root.join(format!("table-{:016x}", table))
    }

    fn meta_path(&self, table: TableId) -> PathBuf {
        self.root.join(format!("table-{:016x}.meta", table))
    }

    fn read_block_file(&self, table: TableId, block: BlockId) -> Result<Option<Vec<u8>>> {
        let bytes = match fs::read(self.block_path(table, block)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if bytes.len() != self.block_size {
            return Err(AtimeError::Corruption(format!(
                "block file {} of table {} is {} bytes, expected {}",
                block,
                table,
                bytes.len(),
                self.block_size
            )));
        }
        Ok(Some(bytes))
    }

    fn write_file(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        file.write_all(data)?;
        if self.sync_writes {
            file.sync_all()?;
        }
        Ok(())
    }

    fn write_back(&mut self, table: TableId, block: BlockId) -> Result<()> {
        let path = self.block_path(table, block);
        if let Some(cached) = self.cache.get(&(table, block)) {
            if cached.dirty {
                self.write_file(&path, &cached.data)?;
            }
        }
        if let Some(cached) = self.cache.get_mut(&(table, block)) {
            cached.dirty = false;
        }
        Ok(())
    }

    fn cached_mut(&mut self, handle: &BlockHandle) -> Result<&mut CachedBlock> {
        self.cache
            .get_mut(&(handle.table(), handle.block()))
            .ok_or_else(|| not_pinned(handle))
    }
}

fn not_pinned(handle: &BlockHandle) -> AtimeError {
    AtimeError::InvariantViolation(format!(
        "block {} of table {} is not pinned",
        handle.block(),
        handle.table()
    ))
}

impl BlockStore for FileStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn lookup_block(&mut self, table: TableId, block: BlockId) -> Result<Option<BlockHandle>> {
        if let Some(cached) = self.cache.get_mut(&(table, block)) {
            cached.pins += 1;
            return Ok(Some(BlockHandle::new(table, block, false)));
        }

        let Some(data) = self.read_block_file(table, block)? else {
            return Ok(None);
        };
        self.cache.insert(
            (table, block),
            CachedBlock {
                data,
                pins: 1,
                dirty: false,
            },
        );
        Ok(Some(BlockHandle::new(table, block, false)))
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
        self.cache.insert(
            (table, block),
            CachedBlock {
                data,
                pins: 1,
                dirty: true,
            },
        );
        Ok(BlockHandle::new(table, block, true))
    }

    fn block_data(&self, handle: &BlockHandle) -> Result<&[u8]> {
        self.cache
            .get(&(handle.table(), handle.block()))
            .map(|c| &c.data[..])
            .ok_or_else(|| not_pinned(handle))
    }

    fn block_data_mut(&mut self, handle: &BlockHandle) -> Result<&mut [u8]> {
        Ok(&mut self.cached_mut(handle)?.data[..])
    }

    fn mark_block_dirty(&mut self, handle: &BlockHandle) {
        if let Ok(cached) = self.cached_mut(handle) {
            cached.dirty = true;
        }
    }

    fn release_block(&mut self, handle: BlockHandle) {
        let key = (handle.table(), handle.block());
        let Some(cached) = self.cache.get_mut(&key) else {
            return;
        };
        cached.pins = cached.pins.saturating_sub(1);
        if cached.pins > 0 {
            return;
        }

        if cached.dirty && self.write_through {
            if let Err(e) = self.write_back(key.0, key.1) {
                // Stays dirty in the cache; the next sync retries.
                log::warn!("write-through of block {} failed: {}", key.1, e);
                return;
            }
        }
        if self.cache.get(&key).is_some_and(|c| !c.dirty) {
            self.cache.remove(&key);
        }
    }

    fn delete_block(&mut self, table: TableId, block: BlockId) -> Result<bool> {
        // The cached image may hold unsynced clears, so it goes only once
        // the file is gone.
        let on_disk = match fs::remove_file(self.block_path(table, block)) {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => {
                if let Some(cached) = self.cache.get_mut(&(table, block)) {
                    cached.dirty = true;
                }
                return Err(e.into());
            }
        };
        let cached = self.cache.remove(&(table, block)).is_some();
        Ok(cached || on_disk)
    }

    fn block_ids(&mut self, table: TableId) -> Result<Vec<BlockId>> {
        let mut ids: BTreeSet<BlockId> = self
            .cache
            .keys()
            .filter(|(t, _)| *t == table)
            .map(|(_, b)| *b)
            .collect();

        let dir = self.table_dir(table);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids.into_iter().collect()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let name = entry?.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".blk")) else {
                continue;
            };
            match BlockId::from_str_radix(stem, 16) {
                Ok(id) => {
                    ids.insert(id);
                }
                Err(_) => log::warn!("ignoring stray file {:?} in {:?}", name, dir),
            }
        }
        Ok(ids.into_iter().collect())
    }

    fn load_table_meta(&mut self, table: TableId) -> Result<Option<Bytes>> {
        if let Some(meta) = self.dirty_meta.get(&table) {
            return Ok(Some(meta.clone()));
        }
        match fs::read(self.meta_path(table)) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn mark_table_dirty(&mut self, table: TableId, meta: Bytes) {
        self.dirty_meta.insert(table, meta);
    }

    fn sync(&mut self) -> Result<()> {
        let dirty: Vec<(TableId, BlockId)> = self
            .cache
            .iter()
            .filter(|(_, c)| c.dirty)
            .map(|(k, _)| *k)
            .collect();
        for (table, block) in &dirty {
            self.write_back(*table, *block)?;
        }
        self.cache.retain(|_, c| c.pins > 0);

        let metas: Vec<(TableId, Bytes)> = self.dirty_meta.drain().collect();
        for (table, meta) in metas {
            let path = self.meta_path(table);
            if let Err(e) = self.write_file(&path, &meta) {
                self.dirty_meta.insert(table, meta);
                return Err(e);
            }
        }

        log::debug!("file store synced {} blocks", dirty.len());
        Ok(())
    }
}

impl Drop for FileStore {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            log::error!("file store at {:?} failed to sync on close: {}", self.root, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config(dir: &Path) -> Config {
        Config::new(dir).with_block_size(64)
    }

    #[test]
    fn test_block_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileStore::open(&temp_config(dir.path())).unwrap();
            let handle = store.get_or_create_block(1, 4, &|b: &mut [u8]| b.fill(7)).unwrap();
            store.release_block(handle);
            store.sync().unwrap();
            assert!(store.block_path(1, 4).exists());
        }

        let mut store = FileStore::open(&temp_config(dir.path())).unwrap();
        let handle = store.lookup_block(1, 4).unwrap().unwrap();
        assert!(!handle.created());
        assert_eq!(store.block_data(&handle).unwrap(), &[7u8; 64][..]);
        store.release_block(handle);
        assert_eq!(store.block_ids(1).unwrap(), vec![4]);
    }

    #[test]
    fn test_dirty_block_cached_until_sync() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(&temp_config(dir.path())).unwrap();

        let handle = store.get_or_create_block(1, 0, &|_| {}).unwrap();
        store.release_block(handle);
        assert!(!store.block_path(1, 0).exists());
        assert_eq!(store.cached_blocks(), 1);
        assert_eq!(store.block_ids(1).unwrap(), vec![0]);

        store.sync().unwrap();
        assert!(store.block_path(1, 0).exists());
        assert_eq!(store.cached_blocks(), 0);
    }

    #[test]
    fn test_write_through_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(dir.path()).with_write_through(true);
        let mut store = FileStore::open(&config).unwrap();

        let handle = store.get_or_create_block(2, 9, &|_| {}).unwrap();
        store.release_block(handle);
        assert!(store.block_path(2, 9).exists());
        assert_eq!(store.cached_blocks(), 0);
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(&temp_config(dir.path())).unwrap();

        let handle = store.get_or_create_block(1, 3, &|_| {}).unwrap();
        store.release_block(handle);
        store.sync().unwrap();

        assert!(store.delete_block(1, 3).unwrap());
        assert!(!store.block_path(1, 3).exists());
        assert!(!store.delete_block(1, 3).unwrap());
        assert!(store.lookup_block(1, 3).unwrap().is_none());
    }

    #[test]
    fn test_failed_delete_keeps_cached_block() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(&temp_config(dir.path())).unwrap();

        let handle = store.get_or_create_block(1, 0, &|b: &mut [u8]| b.fill(7)).unwrap();
        store.release_block(handle);
        store.sync().unwrap();

        let handle = store.lookup_block(1, 0).unwrap().unwrap();
        store.block_data_mut(&handle).unwrap()[0] = 9;
        store.mark_block_dirty(&handle);
        store.release_block(handle);

        // A non-empty directory in place of the block file cannot be unlinked.
        let path = store.block_path(1, 0);
        fs::remove_file(&path).unwrap();
        fs::create_dir(&path).unwrap();
        fs::write(path.join("pin"), b"x").unwrap();

        assert!(matches!(store.delete_block(1, 0), Err(AtimeError::Io(_))));
        assert_eq!(store.cached_blocks(), 1);
        let handle = store.lookup_block(1, 0).unwrap().unwrap();
        assert_eq!(store.block_data(&handle).unwrap()[0], 9);
        store.release_block(handle);

        fs::remove_dir_all(&path).unwrap();
        store.sync().unwrap();
        assert_eq!(fs::read(&path).unwrap()[0], 9);
    }

    #[test]
    fn test_truncated_block_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::open(&temp_config(dir.path())).unwrap();
        let path = store.block_path(1, 0);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, [0u8; 10]).unwrap();

        assert!(matches!(
            store.lookup_block(1, 0),
            Err(AtimeError::Corruption(_))
        ));
    }

    #[test]
    fn test_meta_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = FileStore::open(&temp_config(dir.path())).unwrap();
            assert!(store.load_table_meta(5).unwrap().is_none());
            store.mark_table_dirty(5, Bytes::from_static(b"meta"));
            assert_eq!(store.load_table_meta(5).unwrap().unwrap(), &b"meta"[..]);
            store.sync().unwrap();
        }
        let mut store = FileStore::open(&temp_config(dir.path())).unwrap();
        assert_eq!(store.load_table_meta(5).unwrap().unwrap(), &b"meta"[..]);
    }
}
