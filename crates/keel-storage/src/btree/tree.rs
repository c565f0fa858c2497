//! Page-based B+ tree index built on the buffer pool.
//!
//! The tree coordinates the page-level primitives with correct pin and
//! dirty bookkeeping: every fetched or newly allocated page is unpinned on
//! every exit path, and pages emptied by merges are deleted through the
//! buffer pool. The root identity is persisted in the header page under
//! the index name, so an index can be reopened after a restart.

use super::internal::{self, InternalPage};
use super::iterator::TreeIterator;
use super::key::IndexKey;
use super::leaf::{self, LeafPage};
use super::node;
use crate::header::HeaderPage;
use keel_buffer::{BufferFrame, BufferPool};
use keel_common::page::{PageId, PageType, HEADER_PAGE_ID};
use keel_common::{KeelError, Result, Rid};
use log::debug;
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

/// B+ tree index over fixed-width keys with rid values.
pub struct BPlusTree<K: IndexKey> {
    /// Index name, the key of this tree's header-page record.
    name: String,
    /// Buffer pool backing every page access.
    pool: Arc<BufferPool>,
    /// Cached root page id; the lock also serializes structural changes.
    root: RwLock<PageId>,
    _key: PhantomData<K>,
}

enum DescentStep {
    AtLeaf,
    Descend(PageId),
    Corrupt,
}

enum InsertOutcome {
    Inserted,
    Duplicate,
    NeedsSplit,
}

impl<K: IndexKey> BPlusTree<K> {
    /// Opens the index named `name`, recovering its root from the header
    /// page if the name is already recorded.
    pub fn new(name: impl Into<String>, pool: Arc<BufferPool>) -> Result<Self> {
        let name = name.into();
        let frame = pool.fetch_page(HEADER_PAGE_ID)?;
        let root = {
            let mut data = frame.write_data();
            HeaderPage::attach(&mut data[..]).get_root_id(&name)
        };
        pool.unpin_page(HEADER_PAGE_ID, false);

        Ok(Self {
            name,
            pool,
            root: RwLock::new(root.unwrap_or(PageId::INVALID)),
            _key: PhantomData,
        })
    }

    /// Returns the index name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if the tree holds no keys.
    pub fn is_empty(&self) -> bool {
        !self.root.read().is_valid()
    }

    /// Returns the current root page id.
    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    /// Point lookup. Returns the rid stored under `key`, if any.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>> {
        let root = self.root.read();
        if !root.is_valid() {
            return Ok(None);
        }
        let frame = self.find_leaf(*root, Some(key))?;
        let leaf_pid = self.frame_pid(frame)?;
        let result = leaf::lookup_in::<K>(&frame.read_data()[..], key);
        self.pool.unpin_page(leaf_pid, false);
        Ok(result)
    }

    /// Inserts `(key, rid)`.
    ///
    /// Fails with `DuplicateKey` (leaving the tree untouched) if the key is
    /// already present; splits the target leaf and grows the tree upward
    /// when it is full.
    pub fn insert(&self, key: K, rid: Rid) -> Result<()> {
        let mut root = self.root.write();

        if !root.is_valid() {
            return self.start_new_tree(&mut root, key, rid);
        }

        let frame = self.find_leaf(*root, Some(&key))?;
        let leaf_pid = self.frame_pid(frame)?;

        let outcome = {
            let mut data = frame.write_data();
            let mut leaf_page = LeafPage::<K>::attach(&mut data[..]);
            if leaf_page.lookup(&key).is_some() {
                InsertOutcome::Duplicate
            } else if leaf_page.size() < leaf_page.max_size() {
                leaf_page.insert(key, rid);
                InsertOutcome::Inserted
            } else {
                InsertOutcome::NeedsSplit
            }
        };

        match outcome {
            InsertOutcome::Duplicate => {
                self.pool.unpin_page(leaf_pid, false);
                Err(KeelError::DuplicateKey)
            }
            InsertOutcome::Inserted => {
                self.pool.unpin_page(leaf_pid, true);
                Ok(())
            }
            InsertOutcome::NeedsSplit => {
                self.split_leaf_and_insert(&mut root, frame, leaf_pid, key, rid)
            }
        }
    }

    /// Removes `key` if present, rebalancing the tree as needed.
    ///
    /// Removing an absent key is a no-op.
    pub fn remove(&self, key: &K) -> Result<()> {
        let mut root = self.root.write();
        if !root.is_valid() {
            return Ok(());
        }

        let frame = self.find_leaf(*root, Some(key))?;
        let leaf_pid = self.frame_pid(frame)?;

        let removed = {
            let mut data = frame.write_data();
            LeafPage::<K>::attach(&mut data[..]).remove_and_delete_record(key)
        };
        if !removed {
            self.pool.unpin_page(leaf_pid, false);
            return Ok(());
        }

        let delete_node = self.coalesce_or_redistribute(&mut root, leaf_pid)?;
        if delete_node {
            self.pool.unpin_page(leaf_pid, false);
            self.pool.delete_page(leaf_pid)?;
        } else {
            self.pool.unpin_page(leaf_pid, true);
        }
        Ok(())
    }

    /// Returns an iterator over the whole tree in key order.
    pub fn iter(&self) -> Result<TreeIterator<'_, K>> {
        let root = self.root.read();
        if !root.is_valid() {
            return Ok(TreeIterator::empty(&self.pool));
        }
        let frame = self.find_leaf(*root, None)?;
        Ok(TreeIterator::new(&self.pool, frame, 0))
    }

    /// Returns an iterator starting at the first key >= `key`.
    pub fn iter_from(&self, key: &K) -> Result<TreeIterator<'_, K>> {
        let root = self.root.read();
        if !root.is_valid() {
            return Ok(TreeIterator::empty(&self.pool));
        }
        let frame = self.find_leaf(*root, Some(key))?;
        let (index, _) = leaf::search_in::<K>(&frame.read_data()[..], key);
        Ok(TreeIterator::new(&self.pool, frame, index))
    }

    /// Inserts one key per whitespace-separated integer in `path`.
    ///
    /// Keys already present are skipped. Returns the number of keys
    /// inserted.
    pub fn insert_from_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let mut inserted = 0;
        for token in content.split_whitespace() {
            let Ok(value) = token.parse::<i64>() else {
                continue;
            };
            match self.insert(K::from_i64(value), Rid::from_i64(value)) {
                Ok(()) => inserted += 1,
                Err(KeelError::DuplicateKey) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(inserted)
    }

    /// Removes one key per whitespace-separated integer in `path`.
    pub fn remove_from_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        for token in content.split_whitespace() {
            let Ok(value) = token.parse::<i64>() else {
                continue;
            };
            self.remove(&K::from_i64(value))?;
        }
        Ok(())
    }

    // =========================================================================
    // Descent
    // =========================================================================

    /// Walks from `root` down to a leaf, unpinning each internal level
    /// (clean) before descending. `key` of None follows the left spine.
    ///
    /// The returned leaf frame is pinned; the caller must unpin it.
    fn find_leaf(&self, root: PageId, key: Option<&K>) -> Result<&BufferFrame> {
        let mut current = root;
        loop {
            let frame = self.pool.fetch_page(current)?;
            let step = {
                let data = frame.read_data();
                match node::page_type(&data[..]) {
                    PageType::Leaf => DescentStep::AtLeaf,
                    PageType::Internal => {
                        let child = match key {
                            Some(k) => internal::lookup_in::<K>(&data[..], k),
                            None => internal::value_in::<K>(&data[..], 0),
                        };
                        DescentStep::Descend(child)
                    }
                    _ => DescentStep::Corrupt,
                }
            };
            match step {
                DescentStep::AtLeaf => return Ok(frame),
                DescentStep::Descend(child) => {
                    self.pool.unpin_page(current, false);
                    current = child;
                }
                DescentStep::Corrupt => {
                    self.pool.unpin_page(current, false);
                    return Err(KeelError::TreeCorrupted(format!(
                        "{current} is not a tree page"
                    )));
                }
            }
        }
    }

    fn frame_pid(&self, frame: &BufferFrame) -> Result<PageId> {
        frame
            .page_id()
            .ok_or_else(|| KeelError::TreeCorrupted("pinned frame lost its page".to_string()))
    }

    // =========================================================================
    // Insertion
    // =========================================================================

    /// Bootstraps an empty tree: a fresh leaf becomes the root and its id
    /// is recorded in the header page.
    fn start_new_tree(&self, root: &mut PageId, key: K, rid: Rid) -> Result<()> {
        let (page_id, frame) = self.pool.new_page()?;
        {
            let mut data = frame.write_data();
            let mut leaf_page = LeafPage::<K>::attach(&mut data[..]);
            leaf_page.init(page_id, PageId::INVALID);
            leaf_page.insert(key, rid);
        }
        self.pool.unpin_page(page_id, true);
        *root = page_id;
        self.persist_root(page_id)?;
        debug!("index {} started new tree at {page_id}", self.name);
        Ok(())
    }

    /// Splits a full leaf, places the pending entry in the correct half,
    /// and pushes the new separator into the parent.
    fn split_leaf_and_insert(
        &self,
        root: &mut PageId,
        leaf_frame: &BufferFrame,
        leaf_pid: PageId,
        key: K,
        rid: Rid,
    ) -> Result<()> {
        let (new_pid, new_frame) = match self.pool.new_page() {
            Ok(page) => page,
            Err(e) => {
                self.pool.unpin_page(leaf_pid, false);
                return Err(e);
            }
        };

        let separator = {
            let mut left_data = leaf_frame.write_data();
            let mut right_data = new_frame.write_data();
            let mut left = LeafPage::<K>::attach(&mut left_data[..]);
            let mut right = LeafPage::<K>::attach(&mut right_data[..]);
            right.init(new_pid, left.parent_page_id());
            left.move_half_to(&mut right);

            let separator = right.key_at(0);
            if key < separator {
                left.insert(key, rid);
            } else {
                right.insert(key, rid);
            }
            separator
        };
        debug!("split leaf {leaf_pid}, new sibling {new_pid}");

        let result = self.insert_into_parent(root, leaf_pid, separator, new_pid);
        self.pool.unpin_page(leaf_pid, true);
        self.pool.unpin_page(new_pid, true);
        result
    }

    /// Links `right_pid` (split off from `left_pid`) into the parent level,
    /// splitting parents recursively and growing a new root as needed.
    fn insert_into_parent(
        &self,
        root: &mut PageId,
        left_pid: PageId,
        key: K,
        right_pid: PageId,
    ) -> Result<()> {
        let left_frame = self.pool.fetch_page(left_pid)?;
        let parent_pid = node::parent_page_id(&left_frame.read_data()[..]);

        if !parent_pid.is_valid() {
            // The split node was the root: grow a new root above the pair.
            let (new_root_pid, root_frame) = self.pool.new_page()?;
            {
                let mut data = root_frame.write_data();
                let mut new_root = InternalPage::<K>::attach(&mut data[..]);
                new_root.init(new_root_pid, PageId::INVALID);
                new_root.populate_new_root(left_pid, &key, right_pid);
            }
            {
                let mut data = left_frame.write_data();
                node::set_parent_page_id(&mut data[..], new_root_pid);
            }
            self.pool.unpin_page(left_pid, true);

            let right_frame = self.pool.fetch_page(right_pid)?;
            {
                let mut data = right_frame.write_data();
                node::set_parent_page_id(&mut data[..], new_root_pid);
            }
            self.pool.unpin_page(right_pid, true);
            self.pool.unpin_page(new_root_pid, true);

            *root = new_root_pid;
            self.persist_root(new_root_pid)?;
            debug!("index {} grew new root {new_root_pid}", self.name);
            return Ok(());
        }
        self.pool.unpin_page(left_pid, false);

        let parent_frame = self.pool.fetch_page(parent_pid)?;
        let has_room = {
            let data = parent_frame.read_data();
            node::size(&data[..]) < node::max_size(&data[..])
        };

        if has_room {
            {
                let mut data = parent_frame.write_data();
                let mut parent = InternalPage::<K>::attach(&mut data[..]);
                parent.insert_node_after(left_pid, &key, right_pid);
            }
            self.set_parent_of(right_pid, parent_pid)?;
            self.pool.unpin_page(parent_pid, true);
            return Ok(());
        }

        // Parent is full: split it and push its separator one level up.
        let (new_parent_pid, new_parent_frame) = match self.pool.new_page() {
            Ok(page) => page,
            Err(e) => {
                self.pool.unpin_page(parent_pid, false);
                return Err(e);
            }
        };

        let (push_key, right_target) = {
            let mut parent_data = parent_frame.write_data();
            let mut new_data = new_parent_frame.write_data();
            let mut parent = InternalPage::<K>::attach(&mut parent_data[..]);
            let mut right_parent = InternalPage::<K>::attach(&mut new_data[..]);
            right_parent.init(new_parent_pid, parent.parent_page_id());
            parent.move_half_to(&mut right_parent, &self.pool)?;

            let push_key = right_parent.key_at(0);
            if key < push_key {
                parent.insert_node_after(left_pid, &key, right_pid);
                (push_key, parent_pid)
            } else {
                right_parent.insert_node_after(left_pid, &key, right_pid);
                (push_key, new_parent_pid)
            }
        };
        self.set_parent_of(right_pid, right_target)?;
        debug!("split internal {parent_pid}, new sibling {new_parent_pid}");

        let result = self.insert_into_parent(root, parent_pid, push_key, new_parent_pid);
        self.pool.unpin_page(parent_pid, true);
        self.pool.unpin_page(new_parent_pid, true);
        result
    }

    /// Points a page's parent pointer at `parent`.
    fn set_parent_of(&self, page_id: PageId, parent: PageId) -> Result<()> {
        let frame = self.pool.fetch_page(page_id)?;
        {
            let mut data = frame.write_data();
            node::set_parent_page_id(&mut data[..], parent);
        }
        self.pool.unpin_page(page_id, true);
        Ok(())
    }

    /// Records the root page id in the header page under the index name.
    fn persist_root(&self, root: PageId) -> Result<()> {
        let frame = self.pool.fetch_page(HEADER_PAGE_ID)?;
        let result = {
            let mut data = frame.write_data();
            let mut header = HeaderPage::attach(&mut data[..]);
            match header.update_record(&self.name, root) {
                Err(KeelError::RecordNotFound(_)) => header.insert_record(&self.name, root),
                other => other,
            }
        };
        self.pool.unpin_page(HEADER_PAGE_ID, true);
        result
    }

    // =========================================================================
    // Removal
    // =========================================================================

    /// Restores the occupancy invariant of an underfull page by stealing
    /// from or merging with a sibling.
    ///
    /// Returns true when the page itself must be deleted by the caller,
    /// which holds its own pin on it.
    fn coalesce_or_redistribute(&self, root: &mut PageId, page_pid: PageId) -> Result<bool> {
        let frame = self.pool.fetch_page(page_pid)?;
        let (size, min_size, max_size, parent_pid, is_leaf) = {
            let data = frame.read_data();
            (
                node::size(&data[..]),
                node::min_size(&data[..]),
                node::max_size(&data[..]),
                node::parent_page_id(&data[..]),
                node::is_leaf(&data[..]),
            )
        };

        if !parent_pid.is_valid() {
            let delete_root = self.adjust_root(root, frame)?;
            self.pool.unpin_page(page_pid, false);
            return Ok(delete_root);
        }

        if size >= min_size {
            self.pool.unpin_page(page_pid, false);
            return Ok(false);
        }

        let parent_frame = self.pool.fetch_page(parent_pid)?;
        let (node_index, sibling_pid) = {
            let data = parent_frame.read_data();
            let parent_size = node::size(&data[..]);
            let index = (0..parent_size)
                .find(|&i| internal::value_in::<K>(&data[..], i) == page_pid)
                .ok_or_else(|| {
                    KeelError::TreeCorrupted(format!("{page_pid} missing from its parent"))
                })?;
            // Prefer the previous sibling; the leftmost child uses the next.
            let sibling = if index == 0 {
                internal::value_in::<K>(&data[..], 1)
            } else {
                internal::value_in::<K>(&data[..], index - 1)
            };
            (index, sibling)
        };

        let sibling_frame = self.pool.fetch_page(sibling_pid)?;
        let sibling_size = node::size(&sibling_frame.read_data()[..]);

        if sibling_size + size > max_size {
            if node_index == 0 {
                self.redistribute_from_successor(frame, sibling_frame, parent_frame, is_leaf)?;
            } else {
                self.redistribute_from_predecessor(
                    frame,
                    sibling_frame,
                    parent_frame,
                    node_index,
                    is_leaf,
                )?;
            }
            self.pool.unpin_page(sibling_pid, true);
            self.pool.unpin_page(parent_pid, true);
            self.pool.unpin_page(page_pid, true);
            return Ok(false);
        }

        // Merge: the left-hand page of the pair survives.
        let delete_self = if node_index == 0 {
            // The successor sibling is absorbed into this page.
            let separator = {
                let data = parent_frame.read_data();
                internal::key_in::<K>(&data[..], 1)
            };
            self.merge_into(sibling_frame, frame, &separator, is_leaf)?;
            {
                let mut data = parent_frame.write_data();
                InternalPage::<K>::attach(&mut data[..]).remove(1);
            }
            debug!("merged {sibling_pid} into {page_pid}");
            self.pool.unpin_page(sibling_pid, false);
            self.pool.delete_page(sibling_pid)?;
            false
        } else {
            // This page is absorbed into its predecessor sibling.
            let separator = {
                let data = parent_frame.read_data();
                internal::key_in::<K>(&data[..], node_index)
            };
            self.merge_into(frame, sibling_frame, &separator, is_leaf)?;
            {
                let mut data = parent_frame.write_data();
                InternalPage::<K>::attach(&mut data[..]).remove(node_index);
            }
            debug!("merged {page_pid} into {sibling_pid}");
            self.pool.unpin_page(sibling_pid, true);
            true
        };

        // The parent lost a separator and may itself be underfull now.
        let parent_deleted = self.coalesce_or_redistribute(root, parent_pid)?;
        if parent_deleted {
            self.pool.unpin_page(parent_pid, false);
            self.pool.delete_page(parent_pid)?;
        } else {
            self.pool.unpin_page(parent_pid, true);
        }

        self.pool.unpin_page(page_pid, !delete_self);
        Ok(delete_self)
    }

    /// Moves all of `src` into `dst`, where `dst` is the left-hand page.
    fn merge_into(
        &self,
        src_frame: &BufferFrame,
        dst_frame: &BufferFrame,
        separator: &K,
        is_leaf: bool,
    ) -> Result<()> {
        if is_leaf {
            let mut src_data = src_frame.write_data();
            let mut dst_data = dst_frame.write_data();
            let mut src = LeafPage::<K>::attach(&mut src_data[..]);
            let mut dst = LeafPage::<K>::attach(&mut dst_data[..]);
            src.move_all_to(&mut dst);
            Ok(())
        } else {
            let mut src_data = src_frame.write_data();
            let mut dst_data = dst_frame.write_data();
            let mut src = InternalPage::<K>::attach(&mut src_data[..]);
            let mut dst = InternalPage::<K>::attach(&mut dst_data[..]);
            src.move_all_to(&mut dst, separator, &self.pool)
        }
    }

    /// Steals the first entry of the successor sibling into this page.
    ///
    /// The parent separator for the sibling (index 1) is refreshed.
    fn redistribute_from_successor(
        &self,
        frame: &BufferFrame,
        sibling_frame: &BufferFrame,
        parent_frame: &BufferFrame,
        is_leaf: bool,
    ) -> Result<()> {
        let new_separator = if is_leaf {
            let mut node_data = frame.write_data();
            let mut sibling_data = sibling_frame.write_data();
            let mut node_page = LeafPage::<K>::attach(&mut node_data[..]);
            let mut sibling = LeafPage::<K>::attach(&mut sibling_data[..]);
            sibling.move_first_to_end_of(&mut node_page);
            sibling.key_at(0)
        } else {
            let separator = {
                let data = parent_frame.read_data();
                internal::key_in::<K>(&data[..], 1)
            };
            let mut node_data = frame.write_data();
            let mut sibling_data = sibling_frame.write_data();
            let mut node_page = InternalPage::<K>::attach(&mut node_data[..]);
            let mut sibling = InternalPage::<K>::attach(&mut sibling_data[..]);
            sibling.move_first_to_end_of(&mut node_page, &separator, &self.pool)?;
            sibling.key_at(0)
        };

        let mut data = parent_frame.write_data();
        InternalPage::<K>::attach(&mut data[..]).set_key_at(1, &new_separator);
        Ok(())
    }

    /// Steals the last entry of the predecessor sibling into this page.
    ///
    /// The parent separator for this page (`node_index`) is refreshed.
    fn redistribute_from_predecessor(
        &self,
        frame: &BufferFrame,
        sibling_frame: &BufferFrame,
        parent_frame: &BufferFrame,
        node_index: u32,
        is_leaf: bool,
    ) -> Result<()> {
        let new_separator = if is_leaf {
            let mut node_data = frame.write_data();
            let mut sibling_data = sibling_frame.write_data();
            let mut node_page = LeafPage::<K>::attach(&mut node_data[..]);
            let mut sibling = LeafPage::<K>::attach(&mut sibling_data[..]);
            sibling.move_last_to_front_of(&mut node_page);
            node_page.key_at(0)
        } else {
            let separator = {
                let data = parent_frame.read_data();
                internal::key_in::<K>(&data[..], node_index)
            };
            let promoted = {
                let data = sibling_frame.read_data();
                let sibling_size = node::size(&data[..]);
                internal::key_in::<K>(&data[..], sibling_size - 1)
            };
            let mut node_data = frame.write_data();
            let mut sibling_data = sibling_frame.write_data();
            let mut node_page = InternalPage::<K>::attach(&mut node_data[..]);
            let mut sibling = InternalPage::<K>::attach(&mut sibling_data[..]);
            sibling.move_last_to_front_of(&mut node_page, &separator, &self.pool)?;
            promoted
        };

        let mut data = parent_frame.write_data();
        InternalPage::<K>::attach(&mut data[..]).set_key_at(node_index, &new_separator);
        Ok(())
    }

    /// Handles underflow at the root.
    ///
    /// An internal root left with a single child promotes that child; an
    /// empty leaf root clears the tree. Returns true when the old root
    /// page must be deleted.
    fn adjust_root(&self, root: &mut PageId, frame: &BufferFrame) -> Result<bool> {
        let (is_leaf, size, only_child) = {
            let data = frame.read_data();
            let is_leaf = node::is_leaf(&data[..]);
            let size = node::size(&data[..]);
            let child = if !is_leaf && size == 1 {
                internal::value_in::<K>(&data[..], 0)
            } else {
                PageId::INVALID
            };
            (is_leaf, size, child)
        };

        if is_leaf {
            if size == 0 {
                *root = PageId::INVALID;
                self.persist_root(PageId::INVALID)?;
                debug!("index {} is now empty", self.name);
                return Ok(true);
            }
            return Ok(false);
        }

        if size == 1 {
            self.set_parent_of(only_child, PageId::INVALID)?;
            *root = only_child;
            self.persist_root(only_child)?;
            debug!("index {} promoted {only_child} to root", self.name);
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use keel_common::{BufferPoolConfig, StorageConfig};
    use tempfile::tempdir;

    fn rid_for(key: u64) -> Rid {
        Rid::from_i64(key as i64)
    }

    fn test_tree(frames: usize) -> (BPlusTree<u64>, Arc<BufferPool>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(
            DiskManager::new(StorageConfig {
                data_path: dir.path().join("tree.db"),
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = Arc::new(BufferPool::new(
            BufferPoolConfig {
                num_frames: frames,
                page_table_bucket_size: 8,
            },
            disk,
        ));
        let tree = BPlusTree::new("test_index", pool.clone()).unwrap();
        (tree, pool, dir)
    }

    #[test]
    fn test_tree_starts_empty() {
        let (tree, _pool, _dir) = test_tree(16);
        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&1).unwrap(), None);
        assert_eq!(tree.root_page_id(), PageId::INVALID);
    }

    #[test]
    fn test_tree_first_insert_creates_root() {
        let (tree, _pool, _dir) = test_tree(16);

        tree.insert(42, rid_for(42)).unwrap();

        assert!(!tree.is_empty());
        assert!(tree.root_page_id().is_valid());
        assert_eq!(tree.get_value(&42).unwrap(), Some(rid_for(42)));
        assert_eq!(tree.get_value(&41).unwrap(), None);
    }

    #[test]
    fn test_tree_duplicate_insert_rejected() {
        let (tree, _pool, _dir) = test_tree(16);

        tree.insert(7, rid_for(7)).unwrap();
        let result = tree.insert(7, Rid::from_i64(99));
        assert!(matches!(result, Err(KeelError::DuplicateKey)));

        // The original mapping is untouched.
        assert_eq!(tree.get_value(&7).unwrap(), Some(rid_for(7)));
        let items: Vec<_> = tree.iter().unwrap().collect();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_tree_insert_within_single_leaf() {
        let (tree, _pool, _dir) = test_tree(16);

        for key in [5u64, 3, 8, 1, 9] {
            tree.insert(key, rid_for(key)).unwrap();
        }
        for key in [1u64, 3, 5, 8, 9] {
            assert_eq!(tree.get_value(&key).unwrap(), Some(rid_for(key)));
        }

        let keys: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1, 3, 5, 8, 9]);
    }

    #[test]
    fn test_tree_split_on_leaf_overflow() {
        let (tree, _pool, _dir) = test_tree(64);

        let count = LeafPage::<u64>::max_entries() as u64 + 1;
        for key in 0..count {
            tree.insert(key, rid_for(key)).unwrap();
        }

        for key in 0..count {
            assert_eq!(tree.get_value(&key).unwrap(), Some(rid_for(key)), "key {key}");
        }
        let keys: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn test_tree_many_inserts_multiple_levels() {
        let (tree, _pool, _dir) = test_tree(256);

        let count = LeafPage::<u64>::max_entries() as u64 * 6;
        for key in 0..count {
            tree.insert(key, rid_for(key)).unwrap();
        }

        for key in (0..count).step_by(97) {
            assert_eq!(tree.get_value(&key).unwrap(), Some(rid_for(key)));
        }
        let keys: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys.len(), count as usize);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_tree_reverse_insert_order() {
        let (tree, _pool, _dir) = test_tree(256);

        let count = LeafPage::<u64>::max_entries() as u64 * 3;
        for key in (0..count).rev() {
            tree.insert(key, rid_for(key)).unwrap();
        }

        let keys: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn test_tree_remove_from_single_leaf() {
        let (tree, _pool, _dir) = test_tree(16);

        for key in [1u64, 2, 3] {
            tree.insert(key, rid_for(key)).unwrap();
        }
        tree.remove(&2).unwrap();

        assert_eq!(tree.get_value(&2).unwrap(), None);
        assert_eq!(tree.get_value(&1).unwrap(), Some(rid_for(1)));
        assert_eq!(tree.get_value(&3).unwrap(), Some(rid_for(3)));
    }

    #[test]
    fn test_tree_remove_absent_key_is_noop() {
        let (tree, _pool, _dir) = test_tree(16);
        tree.insert(1, rid_for(1)).unwrap();
        tree.remove(&99).unwrap();
        assert_eq!(tree.get_value(&1).unwrap(), Some(rid_for(1)));
    }

    #[test]
    fn test_tree_remove_last_key_empties_tree() {
        let (tree, _pool, _dir) = test_tree(16);

        tree.insert(1, rid_for(1)).unwrap();
        tree.remove(&1).unwrap();

        assert!(tree.is_empty());
        assert_eq!(tree.get_value(&1).unwrap(), None);
        assert_eq!(tree.iter().unwrap().count(), 0);

        // The tree is usable again after being emptied.
        tree.insert(2, rid_for(2)).unwrap();
        assert_eq!(tree.get_value(&2).unwrap(), Some(rid_for(2)));
    }

    #[test]
    fn test_tree_remove_collapses_levels() {
        let (tree, _pool, _dir) = test_tree(256);

        let count = LeafPage::<u64>::max_entries() as u64 * 4;
        for key in 0..count {
            tree.insert(key, rid_for(key)).unwrap();
        }
        for key in 0..count {
            tree.remove(&key).unwrap();
        }

        assert!(tree.is_empty());
        assert_eq!(tree.iter().unwrap().count(), 0);
    }

    #[test]
    fn test_tree_iter_from_midpoint() {
        let (tree, _pool, _dir) = test_tree(64);

        for key in (0..100u64).map(|k| k * 2) {
            tree.insert(key, rid_for(key)).unwrap();
        }

        // 51 falls between keys 50 and 52.
        let keys: Vec<u64> = tree.iter_from(&51).unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys[0], 52);
        assert_eq!(keys.len(), 74);

        let keys: Vec<u64> = tree.iter_from(&52).unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys[0], 52);
    }

    #[test]
    fn test_tree_reopen_by_name() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reopen.db");

        {
            let disk = Arc::new(
                DiskManager::new(StorageConfig {
                    data_path: path.clone(),
                    fsync_enabled: false,
                })
                .unwrap(),
            );
            let pool = Arc::new(BufferPool::new(
                BufferPoolConfig {
                    num_frames: 64,
                    page_table_bucket_size: 8,
                },
                disk,
            ));
            let tree: BPlusTree<u64> = BPlusTree::new("orders_pk", pool.clone()).unwrap();
            for key in 0..500u64 {
                tree.insert(key, rid_for(key)).unwrap();
            }
            pool.flush_all().unwrap();
        }

        let disk = Arc::new(
            DiskManager::new(StorageConfig {
                data_path: path,
                fsync_enabled: false,
            })
            .unwrap(),
        );
        let pool = Arc::new(BufferPool::new(
            BufferPoolConfig {
                num_frames: 64,
                page_table_bucket_size: 8,
            },
            disk,
        ));
        let tree: BPlusTree<u64> = BPlusTree::new("orders_pk", pool).unwrap();

        assert!(!tree.is_empty());
        for key in (0..500u64).step_by(41) {
            assert_eq!(tree.get_value(&key).unwrap(), Some(rid_for(key)));
        }
        assert_eq!(tree.iter().unwrap().count(), 500);
    }

    #[test]
    fn test_tree_insert_from_file() {
        let (tree, _pool, dir) = test_tree(64);

        let path = dir.path().join("keys.txt");
        std::fs::write(&path, "5 3 9\n1 7 3\n").unwrap();

        // 3 appears twice; the duplicate is skipped.
        let inserted = tree.insert_from_file(&path).unwrap();
        assert_eq!(inserted, 5);

        let keys: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }

    #[test]
    fn test_tree_remove_from_file() {
        let (tree, _pool, dir) = test_tree(64);

        for key in 1..=9u64 {
            tree.insert(key, rid_for(key)).unwrap();
        }
        let path = dir.path().join("victims.txt");
        std::fs::write(&path, "2 4 6 8\n").unwrap();
        tree.remove_from_file(&path).unwrap();

        let keys: Vec<u64> = tree.iter().unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![1, 3, 5, 7, 9]);
    }
}
