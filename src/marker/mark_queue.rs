//! Mark stack shared by every thread draining a [`crate::marker::Marker`]
//! during a collection: a single global FIFO plus a per-thread local ring
//! buffer for callers that want to batch work without touching the lock
//! on every pop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Thread-safe FIFO of object addresses awaiting a reference scan. Multiple
/// producers (mutators publishing roots, workers re-enqueueing referents)
/// and multiple consumers (background worker threads) push and pop
/// concurrently.
pub struct MarkQueue {
    queue: Arc<Mutex<VecDeque<usize>>>,
    enqueued_count: AtomicUsize,
    processed_count: AtomicUsize,
    closed: AtomicBool,
}

impl MarkQueue {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            enqueued_count: AtomicUsize::new(0),
            processed_count: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Push an object address. A no-op once the queue has been closed.
    pub fn push(&self, object: usize) {
        if self.closed.load(Ordering::Relaxed) {
            return;
        }

        let mut queue = self.queue.lock().unwrap();
        queue.push_back(object);
        self.enqueued_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pop(&self) -> Option<usize> {
        let mut queue = self.queue.lock().unwrap();
        let object = queue.pop_front();

        if object.is_some() {
            self.processed_count.fetch_add(1, Ordering::Relaxed);
        }

        object
    }

    /// Pop from the back of the queue instead of the front, for a worker
    /// that has exhausted its own local queue and wants to take a batch
    /// from the tail rather than contend on the same end as producers.
    pub fn steal(&self) -> Option<usize> {
        let mut queue = self.queue.lock().unwrap();
        let object = queue.pop_back();

        if object.is_some() {
            self.processed_count.fetch_add(1, Ordering::Relaxed);
        }

        object
    }

    pub fn is_empty(&self) -> bool {
        let queue = self.queue.lock().unwrap();
        queue.is_empty()
    }

    pub fn len(&self) -> usize {
        let queue = self.queue.lock().unwrap();
        queue.len()
    }

    pub fn clear(&self) {
        let mut queue = self.queue.lock().unwrap();
        queue.clear();
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn enqueued_count(&self) -> usize {
        self.enqueued_count.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> usize {
        self.processed_count.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> MarkQueueStats {
        MarkQueueStats {
            enqueued: self.enqueued_count(),
            processed: self.processed_count(),
            pending: self.len(),
        }
    }
}

impl Default for MarkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default)]
pub struct MarkQueueStats {
    pub enqueued: usize,
    pub processed: usize,
    pub pending: usize,
}

/// Single-threaded local queue a worker drains before going back to the
/// shared [`MarkQueue`]; avoids taking the global lock for every object in
/// a tight scan loop.
pub struct LocalWorkQueue {
    data: Vec<usize>,
    head: usize,
    tail: usize,
}

impl LocalWorkQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            head: 0,
            tail: 0,
        }
    }

    pub fn push(&mut self, work: usize) {
        if self.tail >= self.data.len() {
            self.data.reserve(self.data.len().max(64));
        }
        self.data.push(work);
        self.tail += 1;
    }

    pub fn pop(&mut self) -> Option<usize> {
        if self.head < self.tail {
            let work = self.data[self.head];
            self.head += 1;
            Some(work)
        } else {
            None
        }
    }

    pub fn steal(&mut self) -> Option<usize> {
        if self.head < self.tail {
            self.tail -= 1;
            Some(self.data[self.tail])
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head >= self.tail
    }

    pub fn len(&self) -> usize {
        self.tail - self.head
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
        self.tail = 0;
    }
}
