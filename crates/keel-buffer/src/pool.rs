//! Buffer pool manager.

use crate::frame::{BufferFrame, FrameId};
use crate::hash_table::ExtendibleHashTable;
use crate::replacer::{LruReplacer, Replacer};
use keel_common::page::{PageId, PAGE_SIZE};
use keel_common::{BufferPoolConfig, KeelError, Result};
use log::debug;
use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::System;

/// Page-granular disk I/O consumed by the buffer pool.
///
/// The pool guarantees write-back of dirty pages before eviction; everything
/// else about I/O timing is the implementation's concern.
pub trait DiskDriver: Send + Sync {
    /// Allocates a fresh page and returns its id.
    fn allocate_page(&self) -> Result<PageId>;

    /// Releases a page for later reuse.
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// Reads a page into `buf`.
    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Writes `buf` to a page.
    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()>;
}

/// Bookkeeping guarded by the pool mutex.
struct PoolState {
    /// Resident page id to frame id mapping.
    page_table: ExtendibleHashTable<PageId, FrameId>,
    /// Frames that have never held a page or were released by delete_page.
    free_list: Vec<FrameId>,
    /// Eviction candidates: frames whose pin count dropped to zero.
    replacer: LruReplacer<FrameId>,
}

/// Buffer pool manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page id to frame id mapping (extendible hash page table)
/// - Free frame list for unoccupied frames
/// - LRU replacement for eviction
/// - Pin counting for concurrent access
///
/// A frame is always in exactly one of: the free list, the replacer, or
/// pinned (pin count > 0).
pub struct BufferPool {
    /// Configuration.
    config: BufferPoolConfig,
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// State guarded by the pool latch.
    state: Mutex<PoolState>,
    /// Backing storage.
    disk: Arc<dyn DiskDriver>,
}

impl BufferPool {
    /// Creates a new buffer pool over the given disk driver.
    pub fn new(config: BufferPoolConfig, disk: Arc<dyn DiskDriver>) -> Self {
        let num_frames = config.num_frames;

        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();

        // All frames start in the free list; pop from the back hands out
        // frame 0 first.
        let free_list: Vec<_> = (0..num_frames).rev().map(|i| FrameId(i as u32)).collect();

        Self {
            frames,
            state: Mutex::new(PoolState {
                page_table: ExtendibleHashTable::new(config.page_table_bucket_size),
                free_list,
                replacer: LruReplacer::new(),
            }),
            config,
            disk,
        }
    }

    /// Creates a buffer pool sized to 25% of available system RAM.
    ///
    /// Minimum 1,000 frames to ensure useful caching even on low-memory
    /// systems.
    pub fn auto_sized(disk: Arc<dyn DiskDriver>) -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(
            BufferPoolConfig {
                num_frames,
                ..BufferPoolConfig::default()
            },
            disk,
        )
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.config.num_frames
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Returns the number of pages currently resident in the pool.
    pub fn page_count(&self) -> usize {
        self.state.lock().page_table.len()
    }

    /// Checks if a page is resident in the buffer pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.state.lock().page_table.find(&page_id).is_some()
    }

    /// Fetches a page, reading it from disk if it is not resident.
    ///
    /// The returned frame is pinned; every successful fetch must be paired
    /// with an `unpin_page` call. Fails with `BufferPoolFull` when every
    /// frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> Result<&BufferFrame> {
        let mut state = self.state.lock();

        if let Some(frame_id) = state.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.pin() == 0 {
                state.replacer.erase(frame_id);
            }
            return Ok(frame);
        }

        let frame_id = Self::take_victim(&mut state)?;
        let frame = &self.frames[frame_id.0 as usize];
        self.evict_resident(&mut state, frame)?;

        let mut buf = [0u8; PAGE_SIZE];
        if let Err(e) = self.disk.read_page(page_id, &mut buf) {
            frame.reset();
            state.free_list.push(frame_id);
            return Err(e);
        }

        frame.reset();
        frame.copy_from(&buf);
        frame.set_page_id(Some(page_id));
        frame.pin();
        state.page_table.insert(page_id, frame_id);
        Ok(frame)
    }

    /// Unpins a page, optionally marking it dirty.
    ///
    /// Returns false if the page is not resident or was not pinned. A frame
    /// whose pin count reaches zero becomes an eviction candidate.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(frame_id) = state.page_table.find(&page_id) else {
            return false;
        };
        let frame = &self.frames[frame_id.0 as usize];
        if frame.pin_count() == 0 {
            return false;
        }
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            state.replacer.insert(frame_id);
        }
        true
    }

    /// Allocates a fresh page on disk and installs it in the pool.
    ///
    /// The returned frame holds zeroed contents, is pinned, and is marked
    /// dirty so the new page reaches disk even if never written again.
    pub fn new_page(&self) -> Result<(PageId, &BufferFrame)> {
        let mut state = self.state.lock();

        let frame_id = Self::take_victim(&mut state)?;
        let frame = &self.frames[frame_id.0 as usize];
        self.evict_resident(&mut state, frame)?;

        let page_id = match self.disk.allocate_page() {
            Ok(pid) => pid,
            Err(e) => {
                frame.reset();
                state.free_list.push(frame_id);
                return Err(e);
            }
        };

        frame.reset();
        frame.set_page_id(Some(page_id));
        frame.pin();
        frame.set_dirty(true);
        state.page_table.insert(page_id, frame_id);
        Ok((page_id, frame))
    }

    /// Deletes a page from the pool and deallocates it on disk.
    ///
    /// Fails with `PageStillPinned` if the page is resident and pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(frame_id) = state.page_table.find(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_pinned() {
                return Err(KeelError::PageStillPinned { page_id: page_id.0 });
            }
            state.page_table.remove(&page_id);
            state.replacer.erase(frame_id);
            frame.reset();
            state.free_list.push(frame_id);
        }
        self.disk.deallocate_page(page_id)
    }

    /// Writes a resident dirty page to disk and clears its dirty flag.
    ///
    /// Returns true if a write happened.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let state = self.state.lock();
        let Some(frame_id) = state.page_table.find(&page_id) else {
            return Ok(false);
        };
        let frame = &self.frames[frame_id.0 as usize];
        if !frame.is_dirty() {
            return Ok(false);
        }
        {
            let data = frame.read_data();
            self.disk.write_page(page_id, &data)?;
        }
        frame.set_dirty(false);
        Ok(true)
    }

    /// Writes every resident dirty page to disk.
    ///
    /// Returns the number of pages flushed.
    pub fn flush_all(&self) -> Result<usize> {
        let _state = self.state.lock();
        let mut flushed = 0;
        for frame in &self.frames {
            let Some(page_id) = frame.page_id() else {
                continue;
            };
            if !frame.is_dirty() {
                continue;
            }
            {
                let data = frame.read_data();
                self.disk.write_page(page_id, &data)?;
            }
            frame.set_dirty(false);
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Returns statistics about the buffer pool.
    pub fn stats(&self) -> BufferPoolStats {
        let state = self.state.lock();
        let mut pinned_frames = 0;
        let mut dirty_frames = 0;
        for frame in &self.frames {
            if frame.page_id().is_none() {
                continue;
            }
            if frame.is_pinned() {
                pinned_frames += 1;
            }
            if frame.is_dirty() {
                dirty_frames += 1;
            }
        }
        BufferPoolStats {
            total_frames: self.config.num_frames,
            free_frames: state.free_list.len(),
            used_frames: state.page_table.len(),
            pinned_frames,
            dirty_frames,
        }
    }

    /// Picks a frame for reuse: free list first, then LRU eviction.
    fn take_victim(state: &mut PoolState) -> Result<FrameId> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(frame_id);
        }
        state.replacer.victim().ok_or(KeelError::BufferPoolFull)
    }

    /// Writes back and unmaps whatever page currently occupies `frame`.
    fn evict_resident(&self, state: &mut PoolState, frame: &BufferFrame) -> Result<()> {
        let Some(old_page_id) = frame.page_id() else {
            return Ok(());
        };
        if frame.is_dirty() {
            let data = frame.read_data();
            if let Err(e) = self.disk.write_page(old_page_id, &data) {
                // Write-back failed: the page must not be dropped.
                drop(data);
                state.replacer.insert(frame.frame_id());
                return Err(e);
            }
            debug!("evicted dirty {old_page_id} from {}", frame.frame_id());
        }
        state.page_table.remove(&old_page_id);
        Ok(())
    }
}

/// Statistics about the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolStats {
    /// Total number of frames.
    pub total_frames: usize,
    /// Number of free frames.
    pub free_frames: usize,
    /// Number of frames with pages.
    pub used_frames: usize,
    /// Number of pinned frames.
    pub pinned_frames: usize,
    /// Number of dirty frames.
    pub dirty_frames: usize,
}
