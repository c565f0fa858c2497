//! Header page: the persistent directory of index roots.
//!
//! Page 0 holds a record count followed by fixed-width records of
//! `(index name, root page id)`. The B+ tree updates its record whenever
//! the root identity changes, so an index can be reopened by name.

use bytes::{Buf, BufMut};
use keel_common::page::{PageId, PAGE_SIZE};
use keel_common::{KeelError, Result};

/// Width of the fixed, zero-padded name field.
const NAME_LEN: usize = 32;

/// Record layout: name (32) + root page id (4).
const RECORD_SIZE: usize = NAME_LEN + 4;

/// Offset of the first record, after the u32 record count.
const RECORDS_OFFSET: usize = 4;

/// Maximum number of records the header page can hold.
pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Mutable view over the header page buffer.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    /// Attaches a view to a page buffer.
    pub fn attach(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    /// Returns the number of records.
    pub fn record_count(&self) -> usize {
        (&self.data[..4]).get_u32_le() as usize
    }

    fn set_record_count(&mut self, count: usize) {
        (&mut self.data[..4]).put_u32_le(count as u32);
    }

    fn record_name(&self, index: usize) -> &[u8] {
        let off = RECORDS_OFFSET + index * RECORD_SIZE;
        &self.data[off..off + NAME_LEN]
    }

    fn record_root(&self, index: usize) -> PageId {
        let off = RECORDS_OFFSET + index * RECORD_SIZE + NAME_LEN;
        PageId((&self.data[off..off + 4]).get_u32_le())
    }

    fn set_record_root(&mut self, index: usize, root: PageId) {
        let off = RECORDS_OFFSET + index * RECORD_SIZE + NAME_LEN;
        (&mut self.data[off..off + 4]).put_u32_le(root.0);
    }

    fn find_record(&self, name: &[u8; NAME_LEN]) -> Option<usize> {
        (0..self.record_count()).find(|&i| self.record_name(i) == name)
    }

    fn encode_name(name: &str) -> Result<[u8; NAME_LEN]> {
        if name.len() > NAME_LEN {
            return Err(KeelError::Internal(format!(
                "index name too long: {name}"
            )));
        }
        let mut buf = [0u8; NAME_LEN];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        Ok(buf)
    }

    /// Appends a new `(name, root)` record.
    pub fn insert_record(&mut self, name: &str, root: PageId) -> Result<()> {
        let encoded = Self::encode_name(name)?;
        if self.find_record(&encoded).is_some() {
            return Err(KeelError::RecordExists(name.to_string()));
        }
        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return Err(KeelError::HeaderFull);
        }
        let off = RECORDS_OFFSET + count * RECORD_SIZE;
        let mut slot = &mut self.data[off..off + RECORD_SIZE];
        slot.put_slice(&encoded);
        slot.put_u32_le(root.0);
        self.set_record_count(count + 1);
        Ok(())
    }

    /// Updates the root page id of an existing record.
    pub fn update_record(&mut self, name: &str, root: PageId) -> Result<()> {
        let encoded = Self::encode_name(name)?;
        match self.find_record(&encoded) {
            Some(index) => {
                self.set_record_root(index, root);
                Ok(())
            }
            None => Err(KeelError::RecordNotFound(name.to_string())),
        }
    }

    /// Removes a record, compacting the tail over it.
    pub fn delete_record(&mut self, name: &str) -> Result<()> {
        let encoded = Self::encode_name(name)?;
        let index = self
            .find_record(&encoded)
            .ok_or_else(|| KeelError::RecordNotFound(name.to_string()))?;
        let count = self.record_count();
        let start = RECORDS_OFFSET + (index + 1) * RECORD_SIZE;
        let end = RECORDS_OFFSET + count * RECORD_SIZE;
        self.data
            .copy_within(start..end, RECORDS_OFFSET + index * RECORD_SIZE);
        self.set_record_count(count - 1);
        Ok(())
    }

    /// Returns the root page id recorded under `name`, if any.
    pub fn get_root_id(&self, name: &str) -> Option<PageId> {
        let encoded = Self::encode_name(name).ok()?;
        self.find_record(&encoded).map(|i| self.record_root(i))
    }
}
