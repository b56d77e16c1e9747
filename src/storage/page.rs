use std::ops::Deref;
use std::sync::RwLock;

/// Logical identifier of a page on the secondary store.
pub type PageId = i64;

/// Index of a frame slot in the buffer pool, in range [0, pool_size).
pub type FrameId = usize;

/// Size of a data page in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Id held by a frame with no resident page.
pub const INVALID_PAGE_ID: PageId = -1;

/// The actual page frame content: in-memory metadata like the dirty
/// bit and pin count, plus the page bytes as they are on the store.
pub struct PageData {
    pub id: PageId,
    pub data: Vec<u8>,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl PageData {
    fn new() -> Self {
        Self {
            id: INVALID_PAGE_ID,
            data: vec![0; PAGE_SIZE],
            is_dirty: false,
            pin_count: 0,
        }
    }

    /// Reset the frame to the empty state: no page, no pins, not
    /// dirty, zeroed bytes. The buffer length stays PAGE_SIZE.
    pub fn clear(&mut self) {
        self.id = INVALID_PAGE_ID;
        self.is_dirty = false;
        self.pin_count = 0;
        self.data.fill(0);
    }
}

/// Page acts as the container of the actual frame content for
/// providing concurrent access protection. The inner RwLock is the
/// per-frame latch: clients holding a pinned page take it to read or
/// write the page bytes, the pool takes it to mutate metadata.
pub struct Page {
    inner: RwLock<PageData>,
}

impl Page {
    /// Allocate an empty frame with a PAGE_SIZE zeroed buffer.
    pub fn new() -> Self {
        Page { inner: RwLock::new(PageData::new()) }
    }
}

impl Deref for Page {
    type Target = RwLock<PageData>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
