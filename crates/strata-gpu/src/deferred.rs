//! Deferred resource deletion for multi-frame-in-flight rendering.
//!
//! A resource replaced during a frame (for example a buffer that grew) may
//! still be referenced by command buffers already submitted. This queue keeps
//! it alive until enough frames have passed, then releases it.

use std::collections::VecDeque;

use crate::memory::{GpuBuffer, GpuTexture};

/// A resource that can be explicitly released.
pub trait Release {
    fn release(self);
}

impl Release for GpuBuffer {
    fn release(self) {
        self.buffer().destroy();
    }
}

impl Release for GpuTexture {
    fn release(self) {
        self.texture().destroy();
    }
}

/// A resource pending deletion.
pub struct PendingDeletion<T> {
    /// The resource to be released.
    pub resource: T,
    /// Frame number when this resource was queued for deletion.
    pub frame_queued: u64,
}

/// Queue for deferred deletions.
///
/// Resources are queued with a frame number and only released once enough
/// frames have passed to guarantee they are no longer in use by any
/// in-flight frame.
pub struct DeferredDeletionQueue<T: Release> {
    pending: VecDeque<PendingDeletion<T>>,
    frames_in_flight: usize,
}

impl<T: Release> DeferredDeletionQueue<T> {
    /// Create a new deferred deletion queue.
    ///
    /// Resources are kept for `frames_in_flight` frames before release.
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            frames_in_flight,
        }
    }

    /// Queue a resource for deferred deletion.
    pub fn queue(&mut self, resource: T, frame_number: u64) {
        self.pending.push_back(PendingDeletion {
            resource,
            frame_queued: frame_number,
        });
    }

    /// Release resources that are safe to delete. Returns how many were released.
    ///
    /// Call this at the start of each frame.
    pub fn process(&mut self, current_frame_number: u64) -> usize {
        let cutoff = current_frame_number.saturating_sub(self.frames_in_flight as u64);

        // FIFO with non-decreasing frame numbers, so only the front can mature.
        let mut released = 0;
        while let Some(front) = self.pending.front() {
            if front.frame_queued >= cutoff {
                break;
            }
            if let Some(pending) = self.pending.pop_front() {
                pending.resource.release();
                released += 1;
            }
        }
        released
    }

    /// Release everything immediately.
    ///
    /// Only call after the device has gone idle.
    pub fn flush(&mut self) {
        while let Some(pending) = self.pending.pop_front() {
            pending.resource.release();
        }
    }

    /// Get the number of pending deletions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct Tracked {
        id: u32,
        log: Rc<RefCell<Vec<u32>>>,
    }

    impl Release for Tracked {
        fn release(self) {
            self.log.borrow_mut().push(self.id);
        }
    }

    #[test]
    fn releases_after_frames_in_flight() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeferredDeletionQueue::new(2);
        queue.queue(Tracked { id: 1, log: log.clone() }, 10);
        queue.queue(Tracked { id: 2, log: log.clone() }, 11);

        assert_eq!(queue.process(11), 0);
        assert_eq!(queue.process(12), 0);
        assert_eq!(queue.process(13), 1);
        assert_eq!(*log.borrow(), vec![1]);
        assert_eq!(queue.process(14), 1);
        assert_eq!(*log.borrow(), vec![1, 2]);
        assert_eq!(queue.pending_count(), 0);
    }

    #[test]
    fn flush_releases_everything() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = DeferredDeletionQueue::new(3);
        for id in 0..4 {
            queue.queue(Tracked { id, log: log.clone() }, 5);
        }
        queue.flush();
        assert_eq!(*log.borrow(), vec![0, 1, 2, 3]);
        assert_eq!(queue.pending_count(), 0);
    }
}
