//! Extendible hash table used as the buffer pool's page table.
//!
//! Directory-based extendible hashing: a directory of `2^global_depth` slots
//! indexes buckets by the low bits of the key hash. A bucket that exceeds
//! its capacity splits into a companion bucket one bit deeper, doubling the
//! directory when the bucket's local depth outgrows the global depth. Keys
//! whose hashes collide across all 64 bits land in overflow buckets chained
//! behind the saturated bucket. Shrinking and bucket merging are not
//! supported.

use keel_common::PageId;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::frame::FrameId;

/// Deepest local depth a bucket may reach before overflow chaining.
const MAX_LOCAL_DEPTH: u32 = u64::BITS;

/// Hash function supplier for extendible-hash keys.
///
/// Integer keys hash to themselves so that directory placement follows the
/// key's own low bits.
pub trait HashKey {
    /// Returns the 64-bit hash of this key.
    fn hash_key(&self) -> u64;
}

impl HashKey for u32 {
    fn hash_key(&self) -> u64 {
        *self as u64
    }
}

impl HashKey for u64 {
    fn hash_key(&self) -> u64 {
        *self
    }
}

impl HashKey for usize {
    fn hash_key(&self) -> u64 {
        *self as u64
    }
}

impl HashKey for i32 {
    fn hash_key(&self) -> u64 {
        *self as u32 as u64
    }
}

impl HashKey for i64 {
    fn hash_key(&self) -> u64 {
        *self as u64
    }
}

impl HashKey for PageId {
    fn hash_key(&self) -> u64 {
        self.0 as u64
    }
}

impl HashKey for FrameId {
    fn hash_key(&self) -> u64 {
        self.0 as u64
    }
}

/// A single bucket: an ordered map of resident items plus split metadata.
struct Bucket<K, V> {
    /// Number of low hash bits that distinguish this bucket.
    local_depth: u32,
    /// Low `local_depth` bits shared by every key in this bucket.
    id: usize,
    /// Resident items.
    items: BTreeMap<K, V>,
    /// Next bucket in the overflow chain, if any.
    overflow_next: Option<usize>,
}

impl<K, V> Bucket<K, V> {
    fn new(local_depth: u32, id: usize) -> Self {
        Self {
            local_depth,
            id,
            items: BTreeMap::new(),
            overflow_next: None,
        }
    }
}

/// Mutable table state guarded by the table mutex.
struct TableState<K, V> {
    /// Global directory depth.
    global_depth: u32,
    /// Directory of `2^global_depth` slots; cleared slots refill lazily.
    directory: Vec<Option<usize>>,
    /// Bucket arena; indices are stable for the table's lifetime.
    buckets: Vec<Bucket<K, V>>,
    /// Number of distinct buckets (not directory slots).
    bucket_count: usize,
    /// Total number of stored items.
    len: usize,
}

impl<K, V> TableState<K, V> {
    fn slot_of(&self, hash: u64) -> usize {
        (hash & ((1u64 << self.global_depth) - 1)) as usize
    }
}

/// Extendible hash table with a single internal mutex.
///
/// Generic over keys that supply their own hash and values that can be
/// cloned out; the buffer pool instantiates it as `PageId -> FrameId`.
pub struct ExtendibleHashTable<K, V> {
    /// Items per bucket before a split is attempted.
    bucket_size: usize,
    state: Mutex<TableState<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: HashKey + Ord + Clone,
    V: Clone,
{
    /// Creates a table with the given bucket capacity.
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            bucket_size,
            state: Mutex::new(TableState {
                global_depth: 0,
                directory: vec![Some(0)],
                buckets: vec![Bucket::new(0, 0)],
                bucket_count: 1,
                len: 0,
            }),
        }
    }

    /// Returns the value associated with `key`, if present.
    pub fn find(&self, key: &K) -> Option<V> {
        let state = self.state.lock();
        let slot = state.slot_of(key.hash_key());
        let mut cursor = state.directory[slot];
        while let Some(idx) = cursor {
            let bucket = &state.buckets[idx];
            if let Some(value) = bucket.items.get(key) {
                return Some(value.clone());
            }
            cursor = bucket.overflow_next;
        }
        None
    }

    /// Removes `key` from the table. Returns true if it was present.
    pub fn remove(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        let slot = state.slot_of(key.hash_key());
        let mut cursor = state.directory[slot];
        while let Some(idx) = cursor {
            if state.buckets[idx].items.remove(key).is_some() {
                state.len -= 1;
                return true;
            }
            cursor = state.buckets[idx].overflow_next;
        }
        false
    }

    /// Inserts `key -> value`, overwriting any existing mapping.
    ///
    /// A bucket pushed past its capacity splits; repeated one-sided splits
    /// bottom out at the 64-bit depth cap, where the excess moves into an
    /// overflow bucket chained behind the saturated one.
    pub fn insert(&self, key: K, value: V) {
        let mut state = self.state.lock();
        let hash = key.hash_key();
        let slot = state.slot_of(hash);

        let head = match state.directory[slot] {
            Some(idx) => idx,
            None => {
                // Slot was cleared during an earlier split; refill it.
                let depth = state.global_depth;
                let idx = state.buckets.len();
                state.buckets.push(Bucket::new(depth, slot));
                state.directory[slot] = Some(idx);
                state.bucket_count += 1;
                idx
            }
        };

        // Overwrite wherever the key currently lives, chain included.
        let mut cursor = Some(head);
        while let Some(idx) = cursor {
            let bucket = &mut state.buckets[idx];
            if let Some(existing) = bucket.items.get_mut(&key) {
                *existing = value;
                return;
            }
            cursor = bucket.overflow_next;
        }

        state.buckets[head].items.insert(key, value);
        state.len += 1;

        if state.buckets[head].items.len() > self.bucket_size {
            self.split(&mut state, head);
        }
    }

    /// Returns the global directory depth.
    pub fn global_depth(&self) -> u32 {
        self.state.lock().global_depth
    }

    /// Returns the local depth of the bucket behind a directory slot.
    pub fn local_depth(&self, slot: usize) -> Option<u32> {
        let state = self.state.lock();
        state.directory.get(slot).copied().flatten().map(|idx| state.buckets[idx].local_depth)
    }

    /// Returns the number of distinct buckets in use.
    pub fn num_buckets(&self) -> usize {
        self.state.lock().bucket_count
    }

    /// Returns the number of stored items.
    pub fn len(&self) -> usize {
        self.state.lock().len
    }

    /// Returns true if the table holds no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits the over-full bucket at `bucket_idx`.
    fn split(&self, state: &mut TableState<K, V>, bucket_idx: usize) {
        if state.buckets[bucket_idx].local_depth >= MAX_LOCAL_DEPTH {
            self.spill_overflow(state, bucket_idx);
            return;
        }

        // Companion bucket at the current local depth; deepen both sides and
        // redistribute by the new high bit until the items separate.
        let mut sibling: Bucket<K, V> =
            Bucket::new(state.buckets[bucket_idx].local_depth, 0);
        loop {
            let bucket = &mut state.buckets[bucket_idx];
            bucket.local_depth += 1;
            sibling.local_depth += 1;
            let bit = 1u64 << (bucket.local_depth - 1);
            let mask = if bucket.local_depth >= 64 {
                u64::MAX
            } else {
                (1u64 << bucket.local_depth) - 1
            };

            let moved: Vec<K> = bucket
                .items
                .keys()
                .filter(|k| k.hash_key() & bit != 0)
                .cloned()
                .collect();
            for k in moved {
                let v = bucket.items.remove(&k).expect("key selected for move");
                sibling.id = (k.hash_key() & mask) as usize;
                sibling.items.insert(k, v);
            }

            if bucket.items.is_empty() {
                // Everything moved: the original keeps the populated side.
                std::mem::swap(&mut bucket.items, &mut sibling.items);
                bucket.id = sibling.id;
            }
            if !sibling.items.is_empty() {
                break;
            }
            if bucket.local_depth == MAX_LOCAL_DEPTH {
                break;
            }
        }

        if sibling.items.is_empty() {
            // Full-width hash collision: the items cannot be separated.
            self.spill_overflow(state, bucket_idx);
            return;
        }

        let depth = sibling.local_depth;
        let sibling_id = sibling.id;
        let sibling_idx = state.buckets.len();
        state.buckets.push(sibling);
        state.bucket_count += 1;

        if depth > state.global_depth {
            self.grow_directory(state, depth);
        }

        // Re-place the split pair: slots keep the original bucket only when
        // their low-depth bits still match it; slots matching the sibling's
        // pattern move over; anything else is cleared for lazy refill.
        let mask = if depth >= 64 { u64::MAX } else { (1u64 << depth) - 1 };
        let bucket_id = state.buckets[bucket_idx].id as u64;
        for slot in 0..state.directory.len() {
            if state.directory[slot] != Some(bucket_idx) {
                continue;
            }
            let pattern = slot as u64 & mask;
            if pattern == sibling_id as u64 {
                state.directory[slot] = Some(sibling_idx);
            } else if pattern != bucket_id {
                state.directory[slot] = None;
            }
        }
    }

    /// Doubles the directory until it addresses `depth` bits.
    fn grow_directory(&self, state: &mut TableState<K, V>, depth: u32) {
        let factor = 1usize << (depth - state.global_depth);
        let old_len = state.directory.len();
        state.directory.resize(old_len * factor, None);
        for slot in 0..old_len {
            let entry = state.directory[slot];
            let mut alias = slot + old_len;
            while alias < state.directory.len() {
                state.directory[alias] = entry;
                alias += old_len;
            }
        }
        state.global_depth = depth;
    }

    /// Moves the excess of a depth-saturated bucket into a fresh overflow
    /// bucket appended at the end of its chain.
    fn spill_overflow(&self, state: &mut TableState<K, V>, bucket_idx: usize) {
        let (excess, id) = {
            let bucket = &mut state.buckets[bucket_idx];
            let keep_until = bucket
                .items
                .keys()
                .nth(self.bucket_size)
                .cloned()
                .expect("bucket over capacity");
            (bucket.items.split_off(&keep_until), bucket.id)
        };

        let overflow_idx = state.buckets.len();
        let mut overflow = Bucket::new(MAX_LOCAL_DEPTH, id);
        overflow.items = excess;
        state.buckets.push(overflow);
        state.bucket_count += 1;

        let mut tail = bucket_idx;
        while let Some(next) = state.buckets[tail].overflow_next {
            tail = next;
        }
        state.buckets[tail].overflow_next = Some(overflow_idx);
    }
}
