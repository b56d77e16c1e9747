use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;

use crate::config::Config;
use crate::error::{Error, Result};

use super::disk::{new_disk, DiskManager};
use super::page::{FrameId, Page, PageId};
use super::replacer::Replacer;
use super::replacer::SyncClockReplacer;

/// The buffer pool is responsible for moving physical pages back and
/// forth between main memory and the secondary store. It allows the
/// layers above to work on databases larger than the memory available
/// to the system.
///
/// The pool's operations are transparent to the rest of the system:
/// callers ask for a page by its unique identifier (page_id) without
/// knowing whether it is already in memory or has to be pulled in
/// from the store.
struct BufferPool {
    pool_size: usize,
    /// page-addressable secondary store.
    disk: Box<dyn DiskManager>,
    /// array of page frames. the array index is the FrameId, i.e.,
    /// FrameId is in range [0, pool_size).
    pages: Vec<Arc<Page>>,
    /// page table mapping resident page ids to their frames.
    page_table: HashMap<PageId, FrameId>,
    /// frames that hold no page, used as a LIFO stack.
    free_list: Vec<FrameId>,
    /// replacer to find unpinned frames for replacement.
    replacer: Arc<dyn Replacer>,
}

impl BufferPool {
    fn new(disk: Box<dyn DiskManager>, pool_size: usize) -> Self {
        let mut pages = Vec::with_capacity(pool_size);
        let mut free_list = Vec::with_capacity(pool_size);
        let page_table = HashMap::new();
        let replacer: Arc<dyn Replacer> = Arc::new(SyncClockReplacer::new(pool_size));
        for i in 0..pool_size {
            pages.push(Arc::new(Page::new()));
            // initially, every frame is in the free list
            free_list.push(i);
        }
        BufferPool { pool_size, disk, pages, page_table, free_list, replacer }
    }

    /// Produce a frame to install a page into: the free list if it
    /// has one, otherwise by evicting a replacer victim. None means
    /// every frame is pinned.
    fn available_frame(&mut self) -> Result<Option<FrameId>> {
        if self.free_list.is_empty() && !self.victimize()? {
            return Ok(None);
        }
        Ok(self.free_list.pop())
    }

    /// Evict one unpinned frame: write its page back iff dirty, wipe
    /// the frame, drop the page-table entry and put the frame on the
    /// free list. Returns false if the replacer has no victim. A
    /// failed write-back propagates and leaves the pool untouched.
    fn victimize(&mut self) -> Result<bool> {
        let frame_id = match self.replacer.victim() {
            Some(frame_id) => frame_id,
            None => return Ok(false),
        };

        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;
        // the replacer must never hand out a pinned frame
        assert_eq!(0, guard.pin_count, "victim frame {} is pinned", frame_id);
        debug!("evicting page {} from frame {}", guard.id, frame_id);

        if guard.is_dirty {
            if let Err(err) = self.disk.write_page(guard.id, &guard.data) {
                // failed write-back: the page stays resident and the
                // frame evictable, the caller surfaces the error
                self.replacer.unpin(frame_id);
                return Err(err);
            }
        }
        self.page_table.remove(&guard.id);
        guard.clear();
        self.free_list.push(frame_id);
        Ok(true)
    }

    /// Create a new page in the buffer pool: take a frame from the
    /// free list or the replacer, allocate a fresh page id at the
    /// store and hand the zeroed page back pinned once. Fails with
    /// PoolNoAvailableFrame when every frame is pinned.
    fn new_page(&mut self) -> Result<Arc<Page>> {
        let frame_id = match self.available_frame()? {
            Some(frame_id) => frame_id,
            None => return Err(Error::PoolNoAvailableFrame),
        };
        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;

        let page_id = match self.disk.allocate_page() {
            Ok(page_id) => page_id,
            Err(err) => {
                // hand the frame back so it is not leaked
                self.free_list.push(frame_id);
                return Err(err);
            }
        };
        debug!("allocated page {} at frame {}", page_id, frame_id);

        // the frame came off the free list wiped: zeroed data, not
        // dirty, zero pins
        guard.id = page_id;
        guard.pin_count = 1;
        self.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        drop(guard);
        Ok(page)
    }

    /// Fetch the page with the given page id, reading it from the
    /// store if it is not resident. Fails with PoolNoAvailableFrame
    /// when the page has to be brought in but every frame is pinned.
    fn fetch_page(&mut self, page_id: PageId) -> Result<Arc<Page>> {
        if let Some(&frame_id) = self.page_table.get(&page_id) {
            // resident: bump the pin and keep the frame off the
            // replacer's menu
            let page = Arc::clone(&self.pages[frame_id]);
            let mut guard = page.write()?;
            guard.pin_count += 1;
            self.replacer.pin(frame_id);

            drop(guard);
            return Ok(page);
        }

        debug!("page {} not resident, pulling it from the store", page_id);
        let frame_id = match self.available_frame()? {
            Some(frame_id) => frame_id,
            None => return Err(Error::PoolNoAvailableFrame),
        };
        let page = Arc::clone(&self.pages[frame_id]);
        let mut guard = page.write()?;

        if let Err(err) = self.disk.read_page(page_id, &mut guard.data) {
            guard.clear();
            self.free_list.push(frame_id);
            return Err(err);
        }
        guard.id = page_id;
        guard.pin_count = 1;
        guard.is_dirty = false;
        self.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);

        drop(guard);
        Ok(page)
    }

    /// Unpin the page once. The dirty flag is sticky: it is OR-ed
    /// with is_dirty and only write-back clears it. Returns false if
    /// the page is not resident or its pin count is already zero;
    /// when the count reaches zero the frame becomes evictable.
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let frame_id = match self.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return false,
        };
        let page = &self.pages[frame_id];
        let mut guard = page.write().unwrap();
        guard.is_dirty = guard.is_dirty || is_dirty;
        if guard.pin_count == 0 {
            debug!("unpin of page {} which has no outstanding pins", page_id);
            return false;
        }
        guard.pin_count -= 1;
        if guard.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        true
    }

    /// Write the page out to the store, dirty or not, and clear the
    /// dirty flag. Returns false if the page is not resident.
    fn flush_page(&mut self, page_id: PageId) -> Result<bool> {
        let frame_id = match self.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(false),
        };
        let page = &self.pages[frame_id];
        let mut guard = page.write()?;

        self.disk.write_page(guard.id, &guard.data)?;
        guard.is_dirty = false;
        Ok(true)
    }

    /// Write every resident page out to the store and clear the
    /// dirty flags.
    fn flush_all_pages(&mut self) -> Result<()> {
        for (_, &frame_id) in self.page_table.iter() {
            let page = &self.pages[frame_id];
            let mut guard = page.write()?;

            self.disk.write_page(guard.id, &guard.data)?;
            guard.is_dirty = false;
        }
        Ok(())
    }

    /// Delete a page. A page that is not resident is deallocated at
    /// the store anyway and the call reports success. A pinned page
    /// cannot be deleted. Otherwise the frame is wiped without
    /// write-back (the dirty data is deliberately dropped), removed
    /// from the page table and the replacer, put back on the free
    /// list, and the page id is released at the store.
    fn delete_page(&mut self, page_id: PageId) -> Result<bool> {
        let frame_id = match self.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => {
                self.disk.deallocate_page(page_id)?;
                return Ok(true);
            }
        };
        let page = &self.pages[frame_id];
        let mut guard = page.write()?;
        if guard.pin_count > 0 {
            debug!("page {} is pinned, cannot delete", page_id);
            return Ok(false);
        }

        guard.clear();
        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        self.free_list.push(frame_id);
        self.disk.deallocate_page(page_id)?;
        Ok(true)
    }
}

/// Buffer pool manager wraps the buffer pool with a mutex latch for
/// concurrent access, basically all the heavy lifting happens in the
/// buffer pool.
pub struct BufferPoolManager {
    /// the actual buffer pool protected by a global mutex latch.
    /// per-frame latches are always taken after this one and released
    /// before it.
    inner: Arc<Mutex<BufferPool>>,
}

impl BufferPoolManager {
    pub fn new(disk: Box<dyn DiskManager>, pool_size: usize) -> Self {
        let inner = BufferPool::new(disk, pool_size);
        BufferPoolManager { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Build a manager from a configuration: the disk backend comes
    /// from disk_type, the frame count from pool_size.
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let disk = new_disk(cfg.disk_type)?;
        Ok(Self::new(disk, cfg.pool_size))
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.pool_size
    }

    /// Create a new page in the buffer pool, pinned once. The page id
    /// the store allocated is carried by the returned page.
    pub fn new_page(&self) -> Result<Arc<Page>> {
        let mut inner = self.inner.lock()?;
        inner.new_page()
    }

    /// Fetch the page with the given page id, pinned once more,
    /// reading it from the store if it is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<Arc<Page>> {
        let mut inner = self.inner.lock()?;
        inner.fetch_page(page_id)
    }

    /// Unpin the page once, OR-ing is_dirty into its dirty flag.
    /// Returns false if the page is not resident or has no
    /// outstanding pins.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.unpin_page(page_id, is_dirty)
    }

    /// Write the page to the store regardless of the dirty flag and
    /// clear the flag. Returns false if the page is not resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        inner.flush_page(page_id)
    }

    /// Write all resident pages to the store and clear their dirty
    /// flags.
    pub fn flush_all_pages(&self) -> Result<()> {
        let mut inner = self.inner.lock()?;
        inner.flush_all_pages()
    }

    /// Delete an unpinned page, dropping its frame without
    /// write-back, and release the page id at the store. Returns
    /// false if the page is resident and pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        inner.delete_page(page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::disk::DiskType;
    use crate::storage::page::{INVALID_PAGE_ID, PAGE_SIZE};

    fn new_bpm(pool_size: usize) -> Result<BufferPoolManager> {
        let disk = new_disk(DiskType::Memory)?;
        Ok(BufferPoolManager::new(disk, pool_size))
    }

    fn write_bytes(page: &Page, bytes: &[u8]) -> Result<()> {
        let mut guard = page.write()?;
        guard.data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn read_bytes(page: &Page, len: usize) -> Result<Vec<u8>> {
        let guard = page.read()?;
        Ok(guard.data[..len].to_vec())
    }

    #[test]
    fn test_buffer_pool_basic() -> Result<()> {
        let pool_size = 10;
        let bpm = new_bpm(pool_size)?;

        // Scenario: The buffer pool is empty, we should be able to
        // create a new page.
        let page0 = bpm.new_page()?;
        let page_id0 = page0.read()?.id;
        assert_eq!(0, page_id0);

        // Scenario: Once we have a page, we should be able to read
        // and write its content.
        write_bytes(&page0, b"Hello")?;
        assert_eq!(b"Hello".to_vec(), read_bytes(&page0, 5)?);

        // Scenario: We should be able to create pages until we fill
        // up the buffer pool.
        for _ in 1..pool_size {
            assert!(bpm.new_page().is_ok());
        }
        // Scenario: Once the buffer pool is full, we should not be
        // able to create any new page.
        for _ in pool_size..pool_size * 2 {
            assert_eq!(Err(Error::PoolNoAvailableFrame), bpm.new_page().map(|_| ()));
        }

        // Scenario: After unpinning pages {0..4} and pinning another
        // 4 new pages, there is still one frame left to read page 0
        // back into.
        for i in 0..5 {
            assert_eq!(true, bpm.unpin_page(i, true));
        }
        for _ in 0..4 {
            assert!(bpm.new_page().is_ok());
        }

        // Scenario: We should be able to fetch the data we wrote a
        // while ago.
        let page0 = bpm.fetch_page(0)?;
        assert_eq!(b"Hello".to_vec(), read_bytes(&page0, 5)?);

        // Scenario: If we unpin page 0 and make a new page, all the
        // buffer pages are pinned again and fetching page 0 fails.
        assert_eq!(true, bpm.unpin_page(0, true));
        assert!(bpm.new_page().is_ok());
        assert_eq!(Err(Error::PoolNoAvailableFrame), bpm.fetch_page(0).map(|_| ()));

        Ok(())
    }

    #[test]
    fn test_pin_prevents_eviction() -> Result<()> {
        let bpm = new_bpm(1)?;

        let page0 = bpm.new_page()?;
        let page_id0 = page0.read()?.id;
        write_bytes(&page0, b"Page0 data")?;
        assert_eq!(true, bpm.unpin_page(page_id0, true));

        let page1 = bpm.new_page()?;
        let page_id1 = page1.read()?.id;
        write_bytes(&page1, b"Page1 data")?;

        // Pin page 1 multiple times; it must not be replaced while
        // any pin is outstanding.
        assert_eq!(true, bpm.unpin_page(page_id1, true));
        assert_eq!(false, bpm.unpin_page(page_id1, false));
        bpm.fetch_page(page_id1)?;
        bpm.fetch_page(page_id1)?;
        assert_eq!(true, bpm.unpin_page(page_id1, false));

        assert_eq!(Err(Error::PoolNoAvailableFrame), bpm.fetch_page(page_id0).map(|_| ()));
        assert_eq!(true, bpm.unpin_page(page_id1, false));

        let page0 = bpm.fetch_page(page_id0)?;
        assert_eq!(b"Page0 data".to_vec(), read_bytes(&page0, 10)?);

        Ok(())
    }

    #[test]
    fn test_delete_refused_while_pinned() -> Result<()> {
        let bpm = new_bpm(1)?;

        let page0 = bpm.new_page()?;
        let page_id0 = page0.read()?.id;
        write_bytes(&page0, b"Hello")?;

        assert_eq!(false, bpm.delete_page(page_id0)?);

        // the second unpin is a caller error on a zero pin count, the
        // delete still goes through afterwards
        assert_eq!(true, bpm.unpin_page(page_id0, true));
        assert_eq!(false, bpm.unpin_page(page_id0, false));
        assert_eq!(true, bpm.delete_page(page_id0)?);

        Ok(())
    }

    #[test]
    fn test_delete_non_resident_page() -> Result<()> {
        let bpm = new_bpm(1)?;

        // never-resident ids deallocate at the store and succeed
        assert_eq!(true, bpm.delete_page(42)?);

        Ok(())
    }

    #[test]
    fn test_delete_returns_frame_to_pool() -> Result<()> {
        let bpm = new_bpm(1)?;

        let page0 = bpm.new_page()?;
        let page_id0 = page0.read()?.id;
        bpm.unpin_page(page_id0, true);
        assert_eq!(true, bpm.delete_page(page_id0)?);

        // the frame is free again
        let page1 = bpm.new_page()?;
        let guard = page1.read()?;
        assert_ne!(INVALID_PAGE_ID, guard.id);
        assert_eq!(1, guard.pin_count);

        Ok(())
    }

    #[test]
    fn test_dirty_takes_precedence() -> Result<()> {
        let bpm = new_bpm(1)?;

        let page0 = bpm.new_page()?;
        let page_id0 = page0.read()?.id;
        write_bytes(&page0, b"Hello")?;

        // mixed unpins with a single dirty one in the middle: the
        // dirty flag sticks
        bpm.fetch_page(page_id0)?;
        bpm.fetch_page(page_id0)?;
        bpm.fetch_page(page_id0)?;
        assert_eq!(true, bpm.unpin_page(page_id0, false));
        assert_eq!(true, bpm.unpin_page(page_id0, true));
        assert_eq!(true, bpm.unpin_page(page_id0, false));
        assert_eq!(true, bpm.unpin_page(page_id0, false));

        // replace the page
        let page1 = bpm.new_page()?;
        let page_id1 = page1.read()?.id;
        bpm.unpin_page(page_id1, false);

        let page0 = bpm.fetch_page(page_id0)?;
        assert_eq!(b"Hello".to_vec(), read_bytes(&page0, 5)?);

        Ok(())
    }

    #[test]
    fn test_non_dirty_pages_are_not_written_back() -> Result<()> {
        let bpm = new_bpm(1)?;

        let page0 = bpm.new_page()?;
        let page_id0 = page0.read()?.id;
        write_bytes(&page0, b"Hello")?;

        // deliberately unpin without marking dirty
        bpm.unpin_page(page_id0, false);

        // replace the page
        let page1 = bpm.new_page()?;
        let page_id1 = page1.read()?.id;
        bpm.unpin_page(page_id1, false);

        // the in-memory write was dropped on eviction
        let page0 = bpm.fetch_page(page_id0)?;
        assert_ne!(b"Hello".to_vec(), read_bytes(&page0, 5)?);

        Ok(())
    }

    #[test]
    fn test_flush_clears_dirty() -> Result<()> {
        let bpm = new_bpm(1)?;

        let page0 = bpm.new_page()?;
        let page_id0 = page0.read()?.id;
        write_bytes(&page0, b"Hello")?;

        bpm.fetch_page(page_id0)?;
        assert_eq!(true, bpm.unpin_page(page_id0, true));
        assert_eq!(true, bpm.flush_page(page_id0)?);

        // this write is deliberately never declared dirty, so the
        // flushed "Hello" is what survives eviction
        write_bytes(&page0, b"World")?;
        assert_eq!(true, bpm.unpin_page(page_id0, false));

        let page1 = bpm.new_page()?;
        let page_id1 = page1.read()?.id;
        bpm.unpin_page(page_id1, false);

        let page0 = bpm.fetch_page(page_id0)?;
        assert_eq!(b"Hello".to_vec(), read_bytes(&page0, 5)?);

        Ok(())
    }

    #[test]
    fn test_flush_all_clears_dirty() -> Result<()> {
        let pool_size = 10;
        let bpm = new_bpm(pool_size)?;

        let page0 = bpm.new_page()?;
        let page_id0 = page0.read()?.id;
        write_bytes(&page0, b"Hello")?;

        bpm.fetch_page(page_id0)?;
        assert_eq!(true, bpm.unpin_page(page_id0, true));
        bpm.flush_all_pages()?;

        write_bytes(&page0, b"World")?;
        assert_eq!(true, bpm.unpin_page(page_id0, false));

        // churn through enough pages to evict page 0
        for _ in 0..pool_size {
            let page = bpm.new_page()?;
            let page_id = page.read()?.id;
            bpm.unpin_page(page_id, false);
        }

        let page0 = bpm.fetch_page(page_id0)?;
        assert_eq!(b"Hello".to_vec(), read_bytes(&page0, 5)?);

        Ok(())
    }

    #[test]
    fn test_flush_non_resident_page() -> Result<()> {
        let bpm = new_bpm(1)?;
        assert_eq!(false, bpm.flush_page(42)?);
        Ok(())
    }

    #[test]
    fn test_unpin_non_resident_page() -> Result<()> {
        let bpm = new_bpm(0)?;
        assert_eq!(false, bpm.unpin_page(42, false));
        Ok(())
    }

    #[test]
    fn test_zero_sized_pool() -> Result<()> {
        let bpm = new_bpm(0)?;
        assert_eq!(Err(Error::PoolNoAvailableFrame), bpm.new_page().map(|_| ()));
        assert_eq!(Err(Error::PoolNoAvailableFrame), bpm.fetch_page(0).map(|_| ()));
        Ok(())
    }

    #[test]
    fn test_from_config() -> Result<()> {
        let cfg = Config::new("")?;
        let bpm = BufferPoolManager::from_config(&cfg)?;
        assert_eq!(cfg.pool_size, bpm.pool_size());

        let page = bpm.new_page()?;
        assert_eq!(0, page.read()?.id);

        Ok(())
    }

    #[test]
    fn test_page_data_round_trip_with_nul_bytes() -> Result<()> {
        use rand::{Rng, SeedableRng};

        let pool_size = 10;
        let bpm = new_bpm(pool_size)?;

        let page0 = bpm.new_page()?;
        let page_id0 = page0.read()?.id;

        // random binary data with NUL bytes in the middle and at the
        // end must survive eviction byte for byte
        let mut rng = rand::rngs::StdRng::seed_from_u64(15645);
        let mut data = vec![0u8; PAGE_SIZE];
        rng.fill(&mut data[..]);
        data[PAGE_SIZE / 2] = 0;
        data[PAGE_SIZE - 1] = 0;

        write_bytes(&page0, &data)?;
        assert_eq!(true, bpm.unpin_page(page_id0, true));

        // churn the pool so page 0 gets evicted and written back
        for _ in 0..pool_size {
            let page = bpm.new_page()?;
            let page_id = page.read()?.id;
            bpm.unpin_page(page_id, false);
        }

        let page0 = bpm.fetch_page(page_id0)?;
        assert_eq!(data, read_bytes(&page0, PAGE_SIZE)?);

        Ok(())
    }
}
