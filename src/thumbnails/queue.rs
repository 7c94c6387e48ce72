//! Pending thumbnail requests.
//!
//! FIFO of (path, size) pairs, deduplicated against both what is waiting and
//! what the worker is currently rendering. Guarded by the generator's mutex;
//! every operation here is O(batch) at most.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;

/// A thumbnail of `path` fitting a `size × size` box.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThumbnailRequest {
    pub path: PathBuf,
    pub size: u32,
}

impl ThumbnailRequest {
    pub fn new(path: impl Into<PathBuf>, size: u32) -> Self {
        Self {
            path: path.into(),
            size,
        }
    }
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    order: VecDeque<ThumbnailRequest>,
    queued: HashSet<ThumbnailRequest>,
    in_flight: HashSet<ThumbnailRequest>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a request. Returns `false` if the same pair is already
    /// waiting or being rendered.
    pub fn push(&mut self, req: ThumbnailRequest) -> bool {
        if self.in_flight.contains(&req) || !self.queued.insert(req.clone()) {
            return false;
        }
        self.order.push_back(req);
        true
    }

    /// Moves up to `max` requests from the queue to the in-flight set.
    pub fn take_batch(&mut self, max: usize) -> Vec<ThumbnailRequest> {
        let n = max.min(self.order.len());
        let batch: Vec<_> = self.order.drain(..n).collect();
        for req in &batch {
            self.queued.remove(req);
            self.in_flight.insert(req.clone());
        }
        batch
    }

    /// Marks an in-flight request as done.
    pub fn complete(&mut self, req: &ThumbnailRequest) {
        self.in_flight.remove(req);
    }

    /// Drops every waiting request. In-flight work is unaffected.
    pub fn clear(&mut self) -> usize {
        let dropped = self.order.len();
        self.order.clear();
        self.queued.clear();
        dropped
    }

    /// Number of waiting requests.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Nothing waiting and nothing being rendered.
    pub fn is_idle(&self) -> bool {
        self.order.is_empty() && self.in_flight.is_empty()
    }
}
