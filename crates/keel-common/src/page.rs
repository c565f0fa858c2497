//! Page constants and identifiers for KeelDB storage.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Page id of the header page, which maps index names to root page ids.
pub const HEADER_PAGE_ID: PageId = PageId(0);

/// Unique identifier for a page within the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u32);

impl PageId {
    /// Sentinel id denoting "no page".
    pub const INVALID: PageId = PageId(u32::MAX);

    /// Returns true if this is a valid page id.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }

    /// Byte offset of this page within the data file.
    pub fn file_offset(&self) -> u64 {
        (self.0 as u64) * (PAGE_SIZE as u64)
    }
}

impl std::fmt::Display for PageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_valid() {
            write!(f, "page:{}", self.0)
        } else {
            write!(f, "page:invalid")
        }
    }
}

/// Page types in KeelDB storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Unallocated page.
    Invalid = 0,
    /// Header page mapping index names to root page ids.
    Header = 1,
    /// B+ tree leaf page.
    Leaf = 2,
    /// B+ tree internal page.
    Internal = 3,
}

impl PageType {
    /// Decodes a page type from its on-disk tag, defaulting to Invalid.
    pub fn from_u8(tag: u8) -> Self {
        match tag {
            1 => PageType::Header,
            2 => PageType::Leaf,
            3 => PageType::Internal,
            _ => PageType::Invalid,
        }
    }
}

/// Header structure at the beginning of every B+ tree page.
///
/// Layout (24 bytes, little-endian):
/// - page_type: 4 bytes
/// - lsn: 4 bytes
/// - size: 4 bytes (entry count)
/// - max_size: 4 bytes
/// - parent_page_id: 4 bytes
/// - page_id: 4 bytes
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[repr(C)]
pub struct BTreePageHeader {
    /// Type of this page.
    pub page_type: PageType,
    /// Log sequence number of the last modification.
    pub lsn: u32,
    /// Number of entries on this page.
    pub size: u32,
    /// Maximum number of entries this page can hold.
    pub max_size: u32,
    /// Parent page id, INVALID for the root.
    pub parent_page_id: PageId,
    /// This page's own id.
    pub page_id: PageId,
}

impl BTreePageHeader {
    /// Size of the page header in bytes.
    pub const SIZE: usize = 24;

    /// Field offsets within a page buffer.
    pub const OFF_PAGE_TYPE: usize = 0;
    pub const OFF_LSN: usize = 4;
    pub const OFF_SIZE: usize = 8;
    pub const OFF_MAX_SIZE: usize = 12;
    pub const OFF_PARENT_PAGE_ID: usize = 16;
    pub const OFF_PAGE_ID: usize = 20;

    /// Creates a new page header.
    pub fn new(page_type: PageType, page_id: PageId, max_size: u32) -> Self {
        Self {
            page_type,
            lsn: 0,
            size: 0,
            max_size,
            parent_page_id: PageId::INVALID,
            page_id,
        }
    }

    /// Serializes the header to bytes.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[Self::OFF_PAGE_TYPE..Self::OFF_PAGE_TYPE + 4]
            .copy_from_slice(&(self.page_type as u32).to_le_bytes());
        buf[Self::OFF_LSN..Self::OFF_LSN + 4].copy_from_slice(&self.lsn.to_le_bytes());
        buf[Self::OFF_SIZE..Self::OFF_SIZE + 4].copy_from_slice(&self.size.to_le_bytes());
        buf[Self::OFF_MAX_SIZE..Self::OFF_MAX_SIZE + 4]
            .copy_from_slice(&self.max_size.to_le_bytes());
        buf[Self::OFF_PARENT_PAGE_ID..Self::OFF_PARENT_PAGE_ID + 4]
            .copy_from_slice(&self.parent_page_id.0.to_le_bytes());
        buf[Self::OFF_PAGE_ID..Self::OFF_PAGE_ID + 4]
            .copy_from_slice(&self.page_id.0.to_le_bytes());
        buf
    }

    /// Deserializes the header from the front of a page buffer.
    pub fn from_bytes(buf: &[u8]) -> Self {
        let read_u32 =
            |off: usize| u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
        Self {
            page_type: PageType::from_u8(read_u32(Self::OFF_PAGE_TYPE) as u8),
            lsn: read_u32(Self::OFF_LSN),
            size: read_u32(Self::OFF_SIZE),
            max_size: read_u32(Self::OFF_MAX_SIZE),
            parent_page_id: PageId(read_u32(Self::OFF_PARENT_PAGE_ID)),
            page_id: PageId(read_u32(Self::OFF_PAGE_ID)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_constant() {
        assert_eq!(PAGE_SIZE, 4096);
    }

    #[test]
    fn test_page_id_validity() {
        assert!(PageId(0).is_valid());
        assert!(PageId(12345).is_valid());
        assert!(!PageId::INVALID.is_valid());
    }

    #[test]
    fn test_page_id_file_offset() {
        assert_eq!(PageId(0).file_offset(), 0);
        assert_eq!(PageId(3).file_offset(), 3 * 4096);
    }

    #[test]
    fn test_page_id_display() {
        assert_eq!(PageId(7).to_string(), "page:7");
        assert_eq!(PageId::INVALID.to_string(), "page:invalid");
    }

    #[test]
    fn test_header_page_id_reserved() {
        assert_eq!(HEADER_PAGE_ID, PageId(0));
        assert!(HEADER_PAGE_ID.is_valid());
    }

    #[test]
    fn test_page_type_from_u8() {
        assert_eq!(PageType::from_u8(0), PageType::Invalid);
        assert_eq!(PageType::from_u8(1), PageType::Header);
        assert_eq!(PageType::from_u8(2), PageType::Leaf);
        assert_eq!(PageType::from_u8(3), PageType::Internal);
        assert_eq!(PageType::from_u8(99), PageType::Invalid);
    }

    #[test]
    fn test_btree_header_size() {
        assert_eq!(BTreePageHeader::SIZE, 24);
    }

    #[test]
    fn test_btree_header_roundtrip() {
        let mut header = BTreePageHeader::new(PageType::Leaf, PageId(42), 128);
        header.lsn = 77;
        header.size = 5;
        header.parent_page_id = PageId(3);

        let bytes = header.to_bytes();
        let decoded = BTreePageHeader::from_bytes(&bytes);

        assert_eq!(decoded.page_type, PageType::Leaf);
        assert_eq!(decoded.lsn, 77);
        assert_eq!(decoded.size, 5);
        assert_eq!(decoded.max_size, 128);
        assert_eq!(decoded.parent_page_id, PageId(3));
        assert_eq!(decoded.page_id, PageId(42));
    }

    #[test]
    fn test_btree_header_new_defaults() {
        let header = BTreePageHeader::new(PageType::Internal, PageId(1), 64);
        assert_eq!(header.size, 0);
        assert_eq!(header.lsn, 0);
        assert_eq!(header.parent_page_id, PageId::INVALID);
    }

    #[test]
    fn test_btree_header_invalid_parent_roundtrip() {
        let header = BTreePageHeader::new(PageType::Leaf, PageId(9), 10);
        let decoded = BTreePageHeader::from_bytes(&header.to_bytes());
        assert_eq!(decoded.parent_page_id, PageId::INVALID);
    }

    #[test]
    fn test_page_id_serde_roundtrip() {
        let original = PageId(500);
        let serialized = serde_json::to_string(&original).unwrap();
        let deserialized: PageId = serde_json::from_str(&serialized).unwrap();
        assert_eq!(original, deserialized);
    }
}
