use std::collections::BTreeMap;

use super::DiskManager;
use crate::error::Result;
use crate::storage::page::PageId;

/// An in-memory page store, mainly for testing and ephemeral use.
/// Page content lives in a BTreeMap keyed by page id; allocation is a
/// bare counter.
pub struct Memory {
    pages: BTreeMap<PageId, Vec<u8>>,
    next_page_id: PageId,
}

impl Memory {
    pub fn new() -> Memory {
        Memory { pages: BTreeMap::new(), next_page_id: 0 }
    }
}

impl DiskManager for Memory {
    fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        match self.pages.get(&page_id) {
            Some(data) => buf.copy_from_slice(data),
            None => buf.fill(0),
        }
        Ok(())
    }

    fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.pages.insert(page_id, data.to_vec());
        Ok(())
    }

    fn allocate_page(&mut self) -> Result<PageId> {
        let page_id = self.next_page_id;
        self.next_page_id += 1;
        Ok(page_id)
    }

    fn deallocate_page(&mut self, page_id: PageId) -> Result<()> {
        self.pages.remove(&page_id);
        Ok(())
    }
}
