use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use log::debug;

use super::page::FrameId;

/// Replacer tracks which frames are candidates for eviction when the
/// buffer pool is full.
///
/// Frame ids are opaque tags from the replacer's point of view; the
/// caller may hand in ids outside the construction capacity and the
/// replacer will track them all the same.
pub trait Replacer: Send + Sync {
    /// Mark the frame as in use and not evictable. Create a pinned
    /// entry if the frame is not tracked (e.g. it was victimized
    /// earlier); a no-op if the frame is already pinned.
    fn pin(&self, frame_id: FrameId);

    /// Mark the frame as evictable. A frame transitioning from pinned
    /// to unpinned gets its reference bit armed so the next sweep
    /// gives it a second chance. Unpinning an already unpinned frame
    /// is a no-op and does not re-arm the bit.
    fn unpin(&self, frame_id: FrameId);

    /// Select and remove one evictable frame according to the
    /// replacement policy, or None if every tracked frame is pinned.
    fn victim(&self) -> Option<FrameId>;

    /// Stop tracking an evictable frame without going through the
    /// policy, e.g. because its page is being deleted. Removing a
    /// pinned or untracked frame does nothing.
    fn remove(&self, frame_id: FrameId);

    /// Number of currently evictable frames.
    fn size(&self) -> usize;
}

struct ClockEntry {
    pinned: bool,
    referenced: bool,
}

/// ClockReplacer implements the clock (second-chance) replacement
/// policy, which approximates the Least Recently Used policy.
///
/// Tracked frames sit on a circular list swept by a clock hand. The
/// front of the queue is the position the hand inspects next, so
/// advancing the hand is a rotation and inserting "just before the
/// hand" is a push onto the back: a freshly unpinned frame is the
/// last thing the next sweep looks at. A sweep skips pinned entries,
/// downgrades referenced entries to clean, and removes and returns
/// the first clean entry it meets.
pub struct ClockReplacer {
    queue: VecDeque<FrameId>,
    entries: HashMap<FrameId, ClockEntry>,
    evictable: usize,
}

impl ClockReplacer {
    pub fn new(capacity: usize) -> Self {
        ClockReplacer {
            queue: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
            evictable: 0,
        }
    }

    fn pin(&mut self, frame_id: FrameId) {
        match self.entries.get_mut(&frame_id) {
            None => {
                // a frame we never saw, or one that has been
                // victimized before: track it pinned
                self.entries.insert(frame_id, ClockEntry { pinned: true, referenced: false });
                self.queue.push_back(frame_id);
            }
            Some(entry) if !entry.pinned => {
                entry.pinned = true;
                self.evictable -= 1;
            }
            Some(_) => {}
        }
    }

    fn unpin(&mut self, frame_id: FrameId) {
        match self.entries.get_mut(&frame_id) {
            None => {
                self.entries.insert(frame_id, ClockEntry { pinned: false, referenced: false });
                self.queue.push_back(frame_id);
                self.evictable += 1;
            }
            Some(entry) if entry.pinned => {
                entry.pinned = false;
                entry.referenced = true;
                self.evictable += 1;
            }
            // already unpinned: the reference bit keeps whatever
            // state the sweep left it in
            Some(_) => {}
        }
    }

    fn victim(&mut self) -> Option<FrameId> {
        // Each tracked entry is inspected at most twice: the first
        // full pass can only clear reference bits, the second must
        // hit a clean entry or the count would have been zero.
        while self.evictable > 0 {
            // the queue holds every tracked entry, so it cannot be
            // empty while evictable is positive
            let frame_id = self.queue.pop_front().unwrap();
            let entry = self.entries.get_mut(&frame_id).unwrap();
            if entry.pinned {
                self.queue.push_back(frame_id);
                continue;
            }
            if entry.referenced {
                debug!("frame {} is referenced, clearing and moving on", frame_id);
                entry.referenced = false;
                self.queue.push_back(frame_id);
                continue;
            }
            debug!("victimizing frame {}", frame_id);
            self.entries.remove(&frame_id);
            self.evictable -= 1;
            return Some(frame_id);
        }
        None
    }

    fn remove(&mut self, frame_id: FrameId) {
        match self.entries.get(&frame_id) {
            None => {}
            Some(entry) if entry.pinned => {}
            Some(_) => {
                self.entries.remove(&frame_id);
                self.queue.retain(|&id| id != frame_id);
                self.evictable -= 1;
            }
        }
    }

    fn size(&self) -> usize {
        self.evictable
    }
}

/// SyncClockReplacer is the thread-safe version of the clock policy,
/// basically all the heavy lifting happens in the ClockReplacer.
pub struct SyncClockReplacer {
    inner: Mutex<ClockReplacer>,
}

impl SyncClockReplacer {
    pub fn new(capacity: usize) -> Self {
        let inner = Mutex::new(ClockReplacer::new(capacity));
        SyncClockReplacer { inner }
    }
}

impl Replacer for SyncClockReplacer {
    fn pin(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock().unwrap();
        guard.pin(frame_id)
    }

    fn unpin(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock().unwrap();
        guard.unpin(frame_id)
    }

    fn victim(&self) -> Option<FrameId> {
        let mut guard = self.inner.lock().unwrap();
        guard.victim()
    }

    fn remove(&self, frame_id: FrameId) {
        let mut guard = self.inner.lock().unwrap();
        guard.remove(frame_id)
    }

    fn size(&self) -> usize {
        let guard = self.inner.lock().unwrap();
        guard.size()
    }
}
