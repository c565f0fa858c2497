//! Page-oriented B+ tree index.
//!
//! Pages are fixed 4 KiB buffers managed by the buffer pool. A leaf page
//! holds sorted `(key, rid)` entries and a sibling pointer; an internal
//! page holds sorted `(key, child)` entries whose first key is a left-spine
//! sentinel. The tree layer in `tree.rs` coordinates the page primitives
//! with the buffer pool's pin and dirty protocol and persists the root
//! identity in the header page.

pub mod internal;
pub mod iterator;
pub mod key;
pub mod leaf;
mod node;
pub mod tree;

pub use internal::InternalPage;
pub use iterator::TreeIterator;
pub use key::{GenericKey, IndexKey};
pub use leaf::LeafPage;
pub use tree::BPlusTree;
