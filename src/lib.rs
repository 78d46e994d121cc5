//! ATIMEFILE - Block-Structured Access-Time Table
//!
//! Records a "last accessed" timestamp per numeric key without rewriting
//! each object's own metadata on every access.
//!
//! ## Features
//! - **Stateless indexing**: key `k` lives in slot `k % N` of block `k / N`
//! - **Live-count lifecycle**: blocks are created on first fill and deleted
//!   when their last entry is removed
//! - **Tagged slots**: a zero timestamp is a real value, not "unset"
//! - **Pluggable storage**: any `BlockStore`; in-memory and file-backed
//!   stores included
//! - **Consistency walk**: `check` / `repair` over every stored block
//! - **Concurrency**: thread-safe Arc + Mutex wrapper
//!
//! ## Example
//! ```no_run
//! use atimefile::config::Config;
//! use atimefile::table::{file::FileStore, AtimeTable};
//! use atimefile::types::Timestamp;
//!
//! let config = Config::default();
//! let store = FileStore::open(&config).unwrap();
//! let mut table = AtimeTable::open(store, 1, &config).unwrap();
//!
//! let atime = table.get_or_init(42, Timestamp::now()).unwrap();
//! table.set(42, Timestamp::now()).unwrap();
//! table.sync().unwrap();
//! # let _ = atime;
//! ```

pub mod config;
pub mod error;
pub mod table;
pub mod types;
