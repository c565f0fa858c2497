//! Disk manager for page-level file I/O.

use keel_buffer::DiskDriver;
use keel_common::page::{PageId, HEADER_PAGE_ID, PAGE_SIZE};
use keel_common::{KeelError, Result, StorageConfig};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Manages reading and writing pages in a single data file.
///
/// Page 0 is the header page and always exists; `allocate_page` reuses
/// deallocated page ids before extending the file.
pub struct DiskManager {
    config: StorageConfig,
    inner: Mutex<DiskInner>,
}

struct DiskInner {
    /// The data file handle.
    file: File,
    /// Number of pages in the file.
    num_pages: u32,
    /// Deallocated page ids available for reuse.
    free_pages: Vec<PageId>,
}

impl DiskManager {
    /// Opens or creates the data file.
    ///
    /// A freshly created file is extended to hold the header page.
    pub fn new(config: StorageConfig) -> Result<Self> {
        if let Some(parent) = config.data_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&config.data_path)?;

        let file_size = file.metadata()?.len();
        let mut num_pages = (file_size / PAGE_SIZE as u64) as u32;

        if num_pages == 0 {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&[0u8; PAGE_SIZE])?;
            if config.fsync_enabled {
                file.sync_all()?;
            }
            num_pages = 1;
        }

        Ok(Self {
            config,
            inner: Mutex::new(DiskInner {
                file,
                num_pages,
                free_pages: Vec::new(),
            }),
        })
    }

    /// Returns the path of the data file.
    pub fn data_path(&self) -> &Path {
        &self.config.data_path
    }

    /// Allocates a new page, reusing a deallocated id when one is available.
    pub fn allocate_page(&self) -> Result<PageId> {
        let mut inner = self.inner.lock();

        if let Some(page_id) = inner.free_pages.pop() {
            return Ok(page_id);
        }

        let page_id = PageId(inner.num_pages);
        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.write_all(&[0u8; PAGE_SIZE])?;
        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }
        inner.num_pages += 1;

        Ok(page_id)
    }

    /// Releases a page for later reuse.
    pub fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        if page_id == HEADER_PAGE_ID || !page_id.is_valid() {
            return Err(KeelError::Internal(format!(
                "cannot deallocate {page_id}"
            )));
        }
        let mut inner = self.inner.lock();
        if page_id.0 >= inner.num_pages {
            return Err(KeelError::PageNotFound { page_id: page_id.0 });
        }
        inner.free_pages.push(page_id);
        Ok(())
    }

    /// Reads a page into `buf`.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        if page_id.0 >= inner.num_pages {
            return Err(KeelError::PageNotFound { page_id: page_id.0 });
        }
        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `buf` to a page.
    pub fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut inner = self.inner.lock();
        if page_id.0 >= inner.num_pages {
            return Err(KeelError::PageNotFound { page_id: page_id.0 });
        }
        inner.file.seek(SeekFrom::Start(page_id.file_offset()))?;
        inner.file.write_all(buf)?;
        if self.config.fsync_enabled {
            inner.file.sync_all()?;
        }
        Ok(())
    }

    /// Returns the number of pages in the data file.
    pub fn num_pages(&self) -> u32 {
        self.inner.lock().num_pages
    }

    /// Flushes pending writes to disk.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }
}

impl DiskDriver for DiskManager {
    fn allocate_page(&self) -> Result<PageId> {
        DiskManager::allocate_page(self)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        DiskManager::deallocate_page(self, page_id)
    }

    fn read_page(&self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        DiskManager::read_page(self, page_id, buf)
    }

    fn write_page(&self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        DiskManager::write_page(self, page_id, buf)
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
