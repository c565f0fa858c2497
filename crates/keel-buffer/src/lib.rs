//! Buffer pool management for KeelDB.
//!
//! This crate provides in-memory page caching with:
//! - Fixed-size buffer pool with configurable frame count
//! - Extendible-hash page table for page id to frame lookups
//! - LRU eviction policy for cache management
//! - Pin counting for concurrent access
//! - Dirty page tracking for write-back

mod frame;
mod hash_table;
mod pool;
mod replacer;

pub use frame::{BufferFrame, FrameId};
pub use hash_table::{ExtendibleHashTable, HashKey};
pub use pool::{BufferPool, BufferPoolStats, DiskDriver};
pub use replacer::{LruReplacer, Replacer};
