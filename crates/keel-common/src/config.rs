//! Configuration structures for KeelDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the disk manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the data file.
    pub data_path: PathBuf,
    /// Enable fsync after writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("./keel.db"),
            fsync_enabled: true,
        }
    }
}

/// Configuration for the buffer pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
    /// Items per bucket in the extendible-hash page table before a split.
    pub page_table_bucket_size: usize,
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self {
            num_frames: 1024,
            page_table_bucket_size: 32,
        }
    }
}
