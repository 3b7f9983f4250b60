//! Worker-thread pool draining a [`Marker`]'s mark stack during a
//! background collection's concurrent mark phase (spec.md §4.6). Each
//! worker repeatedly pops from the shared queue and scans; when the
//! queue empties, a worker parks briefly rather than busy-spinning, since
//! mutators are still running and CPU should be left for them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::marker::Marker;
use crate::object::refmap::TypeRegistry;

#[derive(Debug, Default, Clone, Copy)]
pub struct WorkerPoolStats {
    pub threads_used: usize,
    pub objects_processed: u64,
}

pub struct BgcWorkerPool {
    handles: Vec<std::thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
}

impl BgcWorkerPool {
    /// Spawn `num_threads` workers draining `marker`'s queue against
    /// `registry` until told to stop. Workers exit once `stop` is set and
    /// the queue is observed empty.
    pub fn spawn(marker: Arc<Marker>, registry: Arc<TypeRegistry>, num_threads: usize) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let processed = Arc::new(AtomicU64::new(0));
        let mut handles = Vec::with_capacity(num_threads);

        for _ in 0..num_threads.max(1) {
            let marker = marker.clone();
            let registry = registry.clone();
            let stop = stop.clone();
            let processed = processed.clone();
            handles.push(std::thread::spawn(move || {
                loop {
                    match marker.queue.pop() {
                        Some(object_addr) => {
                            let mut count = 0u64;
                            let _ = crate::marker::object_scanner::scan_object(object_addr, &registry, &mut |_slot, value| {
                                let header = unsafe { &*(value as *const crate::object::header::ObjectHeader) };
                                if header.try_mark() {
                                    marker.queue.push(value);
                                }
                                count += 1;
                            });
                            processed.fetch_add(1 + count, Ordering::Relaxed);
                        }
                        None => {
                            if stop.load(Ordering::Acquire) && marker.queue.is_empty() {
                                break;
                            }
                            std::thread::sleep(Duration::from_micros(100));
                        }
                    }
                }
            }));
        }

        Self { handles, stop, processed }
    }

    /// Signal every worker to exit once the queue drains, and join them.
    pub fn join(self) -> WorkerPoolStats {
        self.stop.store(true, Ordering::Release);
        let threads_used = self.handles.len();
        for handle in self.handles {
            let _ = handle.join();
        }
        WorkerPoolStats { threads_used, objects_processed: self.processed.load(Ordering::Relaxed) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::header::ObjectHeader;
    use crate::object::refmap::{RefMap, TypeDesc};

    #[test]
    fn pool_drains_queue() {
        let registry = Arc::new(TypeRegistry::new());
        let handle = registry.register(TypeDesc {
            instance_size: 32,
            fixed_refs: RefMap::default(),
            element: None,
            may_contain_refs: false,
            finalizable: false,
        });

        let mut buf = [0u8; 32];
        let addr = buf.as_mut_ptr() as usize;
        unsafe { (addr as *mut ObjectHeader).write(ObjectHeader::new(handle, 32)) };

        let marker = Arc::new(Marker::new());
        let header = unsafe { &*(addr as *const ObjectHeader) };
        header.try_mark();
        marker.queue.push(addr);

        let pool = BgcWorkerPool::spawn(marker.clone(), registry, 2);
        std::thread::sleep(Duration::from_millis(50));
        let stats = pool.join();
        assert!(stats.objects_processed >= 1);
        assert!(marker.queue.is_empty());
    }
}
