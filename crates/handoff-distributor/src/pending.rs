//! Accepted connections waiting for a worker, oldest first.

use std::collections::VecDeque;

use crate::endpoint::TransferableHandle;

#[derive(Debug)]
pub struct PendingQueue<H> {
    handles: VecDeque<H>,
}

impl<H> PendingQueue<H> {
    pub fn new() -> Self {
        Self {
            handles: VecDeque::new(),
        }
    }

    pub fn push_back(&mut self, handle: H) {
        self.handles.push_back(handle);
    }

    /// Put a handle back at the head. Only used to undo a pop that could not
    /// be offered.
    pub fn push_front(&mut self, handle: H) {
        self.handles.push_front(handle);
    }

    pub fn pop_front(&mut self) -> Option<H> {
        self.handles.pop_front()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<H: TransferableHandle> PendingQueue<H> {
    /// Close every queued handle. Returns how many were closed.
    pub fn close_all(&mut self) -> usize {
        let count = self.handles.len();
        for handle in self.handles.drain(..) {
            handle.close();
        }
        count
    }
}

impl<H> Default for PendingQueue<H> {
    fn default() -> Self {
        Self::new()
    }
}
