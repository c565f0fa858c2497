//! Record identifiers.

use crate::page::PageId;
use serde::{Deserialize, Serialize};

/// Record identifier: the page holding a tuple plus its slot within the page.
///
/// Rids are the value type stored in B+ tree leaves and the granularity at
/// which the lock manager arbitrates access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rid {
    /// Page containing the record.
    pub page_id: PageId,
    /// Slot number within the page.
    pub slot: u32,
}

impl Rid {
    /// Fixed on-page encoding size in bytes.
    pub const ENCODED_LEN: usize = 8;

    /// Creates a new record identifier.
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }

    /// Builds a rid from a packed i64: upper 32 bits page, lower 32 bits slot.
    pub fn from_i64(value: i64) -> Self {
        Self {
            page_id: PageId((value >> 32) as u32),
            slot: value as u32,
        }
    }

    /// Encodes the rid into the first `ENCODED_LEN` bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) {
        buf[..4].copy_from_slice(&self.page_id.0.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
    }

    /// Decodes a rid from the first `ENCODED_LEN` bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            page_id: PageId(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])),
            slot: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rid:{}:{}", self.page_id.0, self.slot)
    }
}
