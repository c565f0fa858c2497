//! B+ tree internal page layout.
//!
//! An internal page stores a sorted array of `(key, child_page_id)` entries
//! directly after the shared page header. The first entry's key is a
//! left-spine sentinel and never consulted: child 0 covers every key below
//! `key_at(1)`, and child i covers `[key_at(i), key_at(i + 1))`.
//!
//! The entry-moving operations reparent transferred children through the
//! buffer pool, so child pages always name their current parent.

use super::key::IndexKey;
use super::node;
use keel_buffer::BufferPool;
use keel_common::page::{BTreePageHeader, PageId, PageType, PAGE_SIZE};
use keel_common::Result;
use std::marker::PhantomData;

/// Offset of the first entry.
const ENTRIES_OFFSET: usize = BTreePageHeader::SIZE;

/// Finds the child whose subtree would contain `key`.
pub(crate) fn lookup_in<K: IndexKey>(data: &[u8], key: &K) -> PageId {
    let size = node::size(data);
    debug_assert!(size >= 1, "internal lookup on empty page");

    // First index in [1, size) whose key exceeds the probe; the child just
    // before it covers the probe's range.
    let mut low = 1u32;
    let mut high = size;
    while low < high {
        let mid = low + (high - low) / 2;
        if key_in::<K>(data, mid) <= *key {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    value_in::<K>(data, low - 1)
}

/// Reads the key at `index` from an internal buffer.
pub(crate) fn key_in<K: IndexKey>(data: &[u8], index: u32) -> K {
    K::decode(&data[entry_offset::<K>(index)..])
}

/// Reads the child page id at `index` from an internal buffer.
pub(crate) fn value_in<K: IndexKey>(data: &[u8], index: u32) -> PageId {
    let off = entry_offset::<K>(index) + K::ENCODED_LEN;
    PageId(u32::from_le_bytes([
        data[off],
        data[off + 1],
        data[off + 2],
        data[off + 3],
    ]))
}

fn entry_offset<K: IndexKey>(index: u32) -> usize {
    ENTRIES_OFFSET + index as usize * (K::ENCODED_LEN + 4)
}

/// Mutable view over an internal page buffer.
pub struct InternalPage<'a, K: IndexKey> {
    data: &'a mut [u8],
    _key: PhantomData<K>,
}

impl<'a, K: IndexKey> InternalPage<'a, K> {
    /// Bytes per entry: key plus child page id.
    pub const ENTRY_SIZE: usize = K::ENCODED_LEN + 4;

    /// Maximum entries per page, rounded down to an even count so both
    /// halves of a split stay at or above the minimum occupancy.
    pub fn max_entries() -> u32 {
        (((PAGE_SIZE - ENTRIES_OFFSET) / Self::ENTRY_SIZE) & !1) as u32
    }

    /// Attaches a view to a page buffer.
    pub fn attach(data: &'a mut [u8]) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            data,
            _key: PhantomData,
        }
    }

    /// Initializes a zeroed buffer as an empty internal page.
    pub fn init(&mut self, page_id: PageId, parent: PageId) {
        node::set_page_type(self.data, PageType::Internal);
        node::set_size(self.data, 0);
        node::set_max_size(self.data, Self::max_entries());
        node::set_parent_page_id(self.data, parent);
        node::set_page_id(self.data, page_id);
    }

    /// Returns the number of entries (children).
    pub fn size(&self) -> u32 {
        node::size(self.data)
    }

    /// Returns the maximum number of entries.
    pub fn max_size(&self) -> u32 {
        node::max_size(self.data)
    }

    /// Returns the minimum occupancy for a non-root internal page.
    pub fn min_size(&self) -> u32 {
        node::min_size(self.data)
    }

    /// Returns this page's id.
    pub fn page_id(&self) -> PageId {
        node::page_id(self.data)
    }

    /// Returns the parent page id.
    pub fn parent_page_id(&self) -> PageId {
        node::parent_page_id(self.data)
    }

    /// Returns the key at `index`. Index 0 is the sentinel.
    pub fn key_at(&self, index: u32) -> K {
        key_in::<K>(self.data, index)
    }

    /// Overwrites the key at `index`.
    pub fn set_key_at(&mut self, index: u32, key: &K) {
        let off = entry_offset::<K>(index);
        key.encode(&mut self.data[off..]);
    }

    /// Returns the child page id at `index`.
    pub fn value_at(&self, index: u32) -> PageId {
        value_in::<K>(self.data, index)
    }

    /// Returns the index holding `child`, if present.
    pub fn value_index(&self, child: PageId) -> Option<u32> {
        (0..self.size()).find(|&i| self.value_at(i) == child)
    }

    /// Finds the child whose subtree would contain `key`.
    pub fn lookup(&self, key: &K) -> PageId {
        lookup_in::<K>(self.data, key)
    }

    /// Seeds a fresh root with two children separated by `key`.
    pub fn populate_new_root(&mut self, left: PageId, key: &K, right: PageId) {
        debug_assert_eq!(self.size(), 0, "new root must be empty");
        self.write_entry(0, &K::from_i64(0), left);
        self.write_entry(1, key, right);
        node::set_size(self.data, 2);
    }

    /// Inserts `(key, new_child)` directly after the entry holding
    /// `old_child`. Returns the new size.
    pub fn insert_node_after(&mut self, old_child: PageId, key: &K, new_child: PageId) -> u32 {
        let size = self.size();
        debug_assert!(size < self.max_size(), "internal insert into full page");
        let index = self
            .value_index(old_child)
            .expect("old child must be present")
            + 1;

        let start = entry_offset::<K>(index);
        let end = entry_offset::<K>(size);
        self.data.copy_within(start..end, start + Self::ENTRY_SIZE);
        self.write_entry(index, key, new_child);
        node::set_size(self.data, size + 1);
        size + 1
    }

    /// Removes the entry at `index`.
    pub fn remove(&mut self, index: u32) {
        let size = self.size();
        debug_assert!(index < size);
        let start = entry_offset::<K>(index + 1);
        let end = entry_offset::<K>(size);
        self.data.copy_within(start..end, entry_offset::<K>(index));
        node::set_size(self.data, size - 1);
    }

    /// Moves the upper half of the entries to an empty right sibling,
    /// reparenting the transferred children.
    ///
    /// The first moved entry's key stays in the sibling's sentinel slot,
    /// where the caller reads it as the separator to push up.
    pub fn move_half_to(
        &mut self,
        sibling: &mut InternalPage<'_, K>,
        pool: &BufferPool,
    ) -> Result<()> {
        debug_assert_eq!(sibling.size(), 0, "split target must be empty");
        let size = self.size();
        let keep = size / 2;
        let moved = size - keep;

        sibling.data[entry_offset::<K>(0)..entry_offset::<K>(moved)]
            .copy_from_slice(&self.data[entry_offset::<K>(keep)..entry_offset::<K>(size)]);
        node::set_size(self.data, keep);
        node::set_size(sibling.data, moved);

        let sibling_id = sibling.page_id();
        for i in 0..moved {
            reparent(pool, sibling.value_at(i), sibling_id)?;
        }
        Ok(())
    }

    /// Appends every entry to `dest` (the left sibling), pulling the parent
    /// separator down into the sentinel slot and reparenting the children.
    pub fn move_all_to(
        &mut self,
        dest: &mut InternalPage<'_, K>,
        separator: &K,
        pool: &BufferPool,
    ) -> Result<()> {
        self.set_key_at(0, separator);

        let moved = self.size();
        let dest_size = dest.size();
        dest.data[entry_offset::<K>(dest_size)..entry_offset::<K>(dest_size + moved)]
            .copy_from_slice(&self.data[entry_offset::<K>(0)..entry_offset::<K>(moved)]);
        node::set_size(dest.data, dest_size + moved);
        node::set_size(self.data, 0);

        let dest_id = dest.page_id();
        for i in dest_size..dest_size + moved {
            reparent(pool, dest.value_at(i), dest_id)?;
        }
        Ok(())
    }

    /// Moves the first entry to the end of `dest` (the left sibling).
    ///
    /// The parent separator comes down as the moved entry's key; the new
    /// sentinel key left behind at index 0 is what the caller promotes.
    pub fn move_first_to_end_of(
        &mut self,
        dest: &mut InternalPage<'_, K>,
        separator: &K,
        pool: &BufferPool,
    ) -> Result<()> {
        let child = self.value_at(0);
        let dest_size = dest.size();
        dest.write_entry(dest_size, separator, child);
        node::set_size(dest.data, dest_size + 1);
        reparent(pool, child, dest.page_id())?;

        let size = self.size();
        self.data.copy_within(
            entry_offset::<K>(1)..entry_offset::<K>(size),
            entry_offset::<K>(0),
        );
        node::set_size(self.data, size - 1);
        Ok(())
    }

    /// Moves the last entry to the front of `dest` (the right sibling).
    ///
    /// The parent separator comes down onto `dest`'s displaced sentinel;
    /// the moved entry's key is what the caller promotes.
    pub fn move_last_to_front_of(
        &mut self,
        dest: &mut InternalPage<'_, K>,
        separator: &K,
        pool: &BufferPool,
    ) -> Result<()> {
        let size = self.size();
        let moved_key = self.key_at(size - 1);
        let child = self.value_at(size - 1);

        let dest_size = dest.size();
        dest.data.copy_within(
            entry_offset::<K>(0)..entry_offset::<K>(dest_size),
            entry_offset::<K>(1),
        );
        dest.write_entry(0, &moved_key, child);
        dest.set_key_at(1, separator);
        node::set_size(dest.data, dest_size + 1);
        reparent(pool, child, dest.page_id())?;

        node::set_size(self.data, size - 1);
        Ok(())
    }

    fn write_entry(&mut self, index: u32, key: &K, child: PageId) {
        let off = entry_offset::<K>(index);
        key.encode(&mut self.data[off..]);
        self.data[off + K::ENCODED_LEN..off + K::ENCODED_LEN + 4]
            .copy_from_slice(&child.0.to_le_bytes());
    }
}

/// Rewrites a child page's parent pointer through the buffer pool.
fn reparent(pool: &BufferPool, child: PageId, parent: PageId) -> Result<()> {
    let frame = pool.fetch_page(child)?;
    {
        let mut data = frame.write_data();
        node::set_parent_page_id(&mut data[..], parent);
    }
    pool.unpin_page(child, true);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use keel_common::{BufferPoolConfig, StorageConfig};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn new_internal(buf: &mut Vec<u8>, page_id: u32) -> InternalPage<'_, u64> {
        let mut page = InternalPage::attach(buf);
        page.init(PageId(page_id), PageId::INVALID);
        page
    }

    #[test]
    fn test_internal_capacity_is_even() {
        assert_eq!(InternalPage::<u64>::max_entries() % 2, 0);
        assert!(InternalPage::<u64>::max_entries() > 4);
    }

    #[test]
    fn test_internal_populate_new_root() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = new_internal(&mut buf, 1);

        page.populate_new_root(PageId(10), &50u64, PageId(20));

        assert_eq!(page.size(), 2);
        assert_eq!(page.value_at(0), PageId(10));
        assert_eq!(page.key_at(1), 50);
        assert_eq!(page.value_at(1), PageId(20));
    }

    #[test]
    fn test_internal_lookup_routes_by_key() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = new_internal(&mut buf, 1);

        // Children: p10 | 50 | p20 | 100 | p30
        page.populate_new_root(PageId(10), &50u64, PageId(20));
        page.insert_node_after(PageId(20), &100u64, PageId(30));

        assert_eq!(page.lookup(&0), PageId(10));
        assert_eq!(page.lookup(&49), PageId(10));
        assert_eq!(page.lookup(&50), PageId(20));
        assert_eq!(page.lookup(&99), PageId(20));
        assert_eq!(page.lookup(&100), PageId(30));
        assert_eq!(page.lookup(&10_000), PageId(30));
    }

    #[test]
    fn test_internal_insert_node_after_middle() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = new_internal(&mut buf, 1);

        page.populate_new_root(PageId(10), &50u64, PageId(20));
        page.insert_node_after(PageId(10), &25u64, PageId(15));

        assert_eq!(page.size(), 3);
        assert_eq!(page.value_at(0), PageId(10));
        assert_eq!(page.key_at(1), 25);
        assert_eq!(page.value_at(1), PageId(15));
        assert_eq!(page.key_at(2), 50);
        assert_eq!(page.value_at(2), PageId(20));
    }

    #[test]
    fn test_internal_value_index_and_remove() {
        let mut buf = vec![0u8; PAGE_SIZE];
        let mut page = new_internal(&mut buf, 1);

        page.populate_new_root(PageId(10), &50u64, PageId(20));
        page.insert_node_after(PageId(20), &100u64, PageId(30));

        assert_eq!(page.value_index(PageId(20)), Some(1));
        assert_eq!(page.value_index(PageId(99)), None);

        page.remove(1);
        assert_eq!(page.size(), 2);
        assert_eq!(page.value_at(0), PageId(10));
        assert_eq!(page.key_at(1), 100);
        assert_eq!(page.value_at(1), PageId(30));
    }

    fn pool_with_pages(count: usize) -> (Arc<BufferPool>, Vec<PageId>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(StorageConfig {
                data_path: dir.path().join("internal_test.db"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = Arc::new(BufferPool::new(
            BufferPoolConfig {
                num_frames: 64,
                page_table_bucket_size: 4,
            },
            disk,
        ));

        let mut pages = Vec::new();
        for _ in 0..count {
            let (pid, _) = pool.new_page().unwrap();
            pool.unpin_page(pid, true);
            pages.push(pid);
        }
        (pool, pages, dir)
    }

    fn parent_of(pool: &BufferPool, child: PageId) -> PageId {
        let frame = pool.fetch_page(child).unwrap();
        let parent = node::parent_page_id(&frame.read_data()[..]);
        pool.unpin_page(child, false);
        parent
    }

    #[test]
    fn test_internal_move_half_to_reparents() {
        let (pool, children, _dir) = pool_with_pages(4);

        let mut left_buf = vec![0u8; PAGE_SIZE];
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let mut left = new_internal(&mut left_buf, 100);
        let mut right = InternalPage::<u64>::attach(&mut right_buf);
        right.init(PageId(101), PageId::INVALID);

        left.populate_new_root(children[0], &10u64, children[1]);
        left.insert_node_after(children[1], &20u64, children[2]);
        left.insert_node_after(children[2], &30u64, children[3]);

        left.move_half_to(&mut right, &pool).unwrap();

        assert_eq!(left.size(), 2);
        assert_eq!(right.size(), 2);
        // The separator to push up sits in the sibling's sentinel slot.
        assert_eq!(right.key_at(0), 20);
        assert_eq!(right.value_at(0), children[2]);
        assert_eq!(right.value_at(1), children[3]);

        assert_eq!(parent_of(&pool, children[2]), PageId(101));
        assert_eq!(parent_of(&pool, children[3]), PageId(101));
    }

    #[test]
    fn test_internal_move_all_to_pulls_separator_down() {
        let (pool, children, _dir) = pool_with_pages(4);

        let mut left_buf = vec![0u8; PAGE_SIZE];
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let mut left = new_internal(&mut left_buf, 100);
        let mut right = InternalPage::<u64>::attach(&mut right_buf);
        right.init(PageId(101), PageId::INVALID);

        left.populate_new_root(children[0], &10u64, children[1]);
        right.populate_new_root(children[2], &40u64, children[3]);

        right.move_all_to(&mut left, &30u64, &pool).unwrap();

        assert_eq!(right.size(), 0);
        assert_eq!(left.size(), 4);
        assert_eq!(left.key_at(2), 30);
        assert_eq!(left.value_at(2), children[2]);
        assert_eq!(left.key_at(3), 40);
        assert_eq!(left.value_at(3), children[3]);

        assert_eq!(parent_of(&pool, children[2]), PageId(100));
        assert_eq!(parent_of(&pool, children[3]), PageId(100));
    }

    #[test]
    fn test_internal_move_first_to_end_of() {
        let (pool, children, _dir) = pool_with_pages(4);

        let mut left_buf = vec![0u8; PAGE_SIZE];
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let mut left = new_internal(&mut left_buf, 100);
        let mut right = InternalPage::<u64>::attach(&mut right_buf);
        right.init(PageId(101), PageId::INVALID);

        left.populate_new_root(children[0], &10u64, children[1]);
        right.populate_new_root(children[2], &40u64, children[3]);

        // Parent separator between left and right is 30.
        right.move_first_to_end_of(&mut left, &30u64, &pool).unwrap();

        assert_eq!(left.size(), 3);
        assert_eq!(left.key_at(2), 30);
        assert_eq!(left.value_at(2), children[2]);
        assert_eq!(right.size(), 1);
        // The new separator for the parent is the promoted sentinel key.
        assert_eq!(right.key_at(0), 40);
        assert_eq!(right.value_at(0), children[3]);

        assert_eq!(parent_of(&pool, children[2]), PageId(100));
    }

    #[test]
    fn test_internal_move_last_to_front_of() {
        let (pool, children, _dir) = pool_with_pages(4);

        let mut left_buf = vec![0u8; PAGE_SIZE];
        let mut right_buf = vec![0u8; PAGE_SIZE];
        let mut left = new_internal(&mut left_buf, 100);
        let mut right = InternalPage::<u64>::attach(&mut right_buf);
        right.init(PageId(101), PageId::INVALID);

        left.populate_new_root(children[0], &10u64, children[1]);
        right.populate_new_root(children[2], &40u64, children[3]);

        // Parent separator between left and right is 30.
        left.move_last_to_front_of(&mut right, &30u64, &pool).unwrap();

        assert_eq!(left.size(), 1);
        assert_eq!(right.size(), 3);
        assert_eq!(right.value_at(0), children[1]);
        assert_eq!(right.key_at(1), 30);
        assert_eq!(right.value_at(1), children[2]);
        assert_eq!(right.key_at(2), 40);

        assert_eq!(parent_of(&pool, children[1]), PageId(101));
    }
}
