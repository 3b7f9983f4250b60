//! Bucketed free-list allocator for non-moving (swept) regions (spec.md
//! §4.3): O(1)-amortized threading, unlinking with undo-link repair for
//! the plan phase's tentative unlinks, and snapshot save/restore.

use crate::error::{GcError, Result};

/// A free block's first two words: next-link and undo-link. Safe given
/// the minimum-object-size invariant (spec.md §3.1) — every free block is
/// at least two words wide.
#[repr(C)]
struct FreeNode {
    next: usize,
    undo: usize,
}

const UNDO_EMPTY: usize = usize::MAX;

unsafe fn node_at(addr: usize) -> &'static mut FreeNode {
    &mut *(addr as *mut FreeNode)
}

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    head: usize,
    tail: usize,
}

impl Bucket {
    const EMPTY: usize = 0;

    fn is_empty(&self) -> bool {
        self.head == Self::EMPTY
    }
}

/// Snapshot of every bucket's head/tail, used by `copy_to`/`copy_from`.
#[derive(Debug, Clone)]
pub struct FreeListSnapshot {
    buckets: Vec<Bucket>,
}

/// A size-classed free list. Bucket `i` holds blocks of size in
/// `[first_bucket_size * 2^i, first_bucket_size * 2^(i+1))`; the last
/// bucket is unbounded.
pub struct FreeList {
    buckets: Vec<Bucket>,
    first_bucket_size: usize,
    /// True iff there is exactly one bucket: in that configuration, a
    /// no-fit during the plan phase simply discards the list rather than
    /// recording undo information (spec.md §4.3 "Policy bit").
    discard_if_no_fit: bool,
}

impl FreeList {
    pub fn new(num_buckets: usize, first_bucket_size: usize) -> Self {
        assert!(num_buckets >= 1);
        assert!(first_bucket_size.is_power_of_two());
        Self {
            buckets: vec![Bucket::default(); num_buckets],
            first_bucket_size,
            discard_if_no_fit: num_buckets == 1,
        }
    }

    pub fn discard_if_no_fit(&self) -> bool {
        self.discard_if_no_fit
    }

    /// Bucket index a block of `size` bytes belongs to.
    pub fn bucket_for(&self, size: usize) -> usize {
        if size < self.first_bucket_size {
            return 0;
        }
        let ratio = size / self.first_bucket_size;
        // ratio >= 1 here (the `size < first_bucket_size` case returned
        // above), so `ratio.leading_zeros() <= BITS - 1` and this can't
        // underflow. Bucket i holds sizes in [F*2^i, F*2^(i+1)), so the
        // index is floor(log2(ratio)), i.e. the position of its top bit.
        let idx = (usize::BITS - 1 - ratio.leading_zeros()) as usize;
        idx.min(self.buckets.len() - 1)
    }

    /// Append `item` (an address) of `size` bytes to its bucket's tail.
    pub fn thread(&mut self, item: usize, size: usize) {
        let idx = self.bucket_for(size);
        let bucket = &mut self.buckets[idx];
        unsafe {
            node_at(item).next = Bucket::EMPTY;
            node_at(item).undo = UNDO_EMPTY;
        }
        if bucket.is_empty() {
            bucket.head = item;
            bucket.tail = item;
        } else {
            unsafe {
                node_at(bucket.tail).next = item;
            }
            bucket.tail = item;
        }
    }

    /// Prepend `item` to its bucket's head.
    pub fn thread_front(&mut self, item: usize, size: usize) {
        let idx = self.bucket_for(size);
        let bucket = &mut self.buckets[idx];
        unsafe {
            node_at(item).next = bucket.head;
            node_at(item).undo = UNDO_EMPTY;
        }
        if bucket.is_empty() {
            bucket.tail = item;
        }
        bucket.head = item;
    }

    /// Remove `item` from `bucket`, given its predecessor (`0` if `item`
    /// is the head). When `use_undo` is set and this is the first unlink
    /// for `prev` this cycle, the old next-link is recorded in `prev`'s
    /// undo slot so `copy_from` can repair a tentative plan-phase unlink.
    pub fn unlink(&mut self, bucket_idx: usize, item: usize, prev: usize, use_undo: bool) -> Result<()> {
        let bucket = self
            .buckets
            .get_mut(bucket_idx)
            .ok_or_else(|| GcError::BoundsCheckFailed { index: bucket_idx, length: self.buckets.len() })?;
        let next = unsafe { node_at(item).next };

        if prev == Bucket::EMPTY {
            bucket.head = next;
        } else {
            if use_undo {
                unsafe {
                    let prev_node = node_at(prev);
                    if prev_node.undo == UNDO_EMPTY {
                        prev_node.undo = prev_node.next;
                    }
                }
            }
            unsafe {
                node_at(prev).next = next;
            }
        }
        if bucket.tail == item {
            bucket.tail = prev;
        }
        Ok(())
    }

    /// Reset every bucket to empty.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = Bucket::default();
        }
    }

    /// Walk each bucket and reset every entry's undo slot, committing the
    /// unlinks performed since the last snapshot.
    pub fn commit_changes(&mut self) {
        for bucket in &self.buckets {
            let mut cur = bucket.head;
            while cur != Bucket::EMPTY {
                unsafe {
                    node_at(cur).undo = UNDO_EMPTY;
                    cur = node_at(cur).next;
                }
            }
        }
    }

    pub fn copy_to(&self, snapshot: &mut FreeListSnapshot) {
        snapshot.buckets = self.buckets.clone();
    }

    /// Restore head/tail pairs from `snapshot`. When `discard_if_no_fit`
    /// is false, repair any unlink performed since the snapshot was taken
    /// using each node's undo slot (spec.md §4.3 `copy_from`).
    pub fn copy_from(&mut self, snapshot: &FreeListSnapshot) {
        if !self.discard_if_no_fit {
            for bucket in &self.buckets {
                let mut cur = bucket.head;
                while cur != Bucket::EMPTY {
                    unsafe {
                        let node = node_at(cur);
                        if node.undo != UNDO_EMPTY {
                            node.next = node.undo;
                            node.undo = UNDO_EMPTY;
                        }
                        cur = node.next;
                    }
                }
            }
        }
        self.buckets = snapshot.buckets.clone();
    }

    /// Pop the first block that fits `size` from its bucket, or `None`.
    pub fn allocate_fit(&mut self, size: usize) -> Option<usize> {
        let idx = self.bucket_for(size);
        for i in idx..self.buckets.len() {
            let head = self.buckets[i].head;
            if head != Bucket::EMPTY {
                let next = unsafe { node_at(head).next };
                self.buckets[i].head = next;
                if next == Bucket::EMPTY {
                    self.buckets[i].tail = Bucket::EMPTY;
                }
                return Some(head);
            }
        }
        None
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    #[cfg(test)]
    fn bucket_len(&self, idx: usize) -> usize {
        let mut count = 0;
        let mut cur = self.buckets[idx].head;
        while cur != Bucket::EMPTY {
            count += 1;
            cur = unsafe { node_at(cur).next };
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> Box<[u8; 64]> {
        Box::new([0u8; 64])
    }

    #[test]
    fn thread_and_allocate_fit() {
        let mut fl = FreeList::new(4, 16);
        let a = Box::leak(block()).as_mut_ptr() as usize;
        fl.thread(a, 64);
        assert_eq!(fl.bucket_len(fl.bucket_for(64)), 1);
        let got = fl.allocate_fit(32).unwrap();
        assert_eq!(got, a);
    }

    #[test]
    fn single_bucket_discards_on_no_fit() {
        let fl = FreeList::new(1, 16);
        assert!(fl.discard_if_no_fit());
    }

    #[test]
    fn bucket_for_matches_spec_range_i3() {
        // spec.md §3.6/§8.1 invariant I3: bucket i holds
        // [F*2^i, F*2^(i+1)), F = first_bucket_size.
        let fl = FreeList::new(6, 16);
        assert_eq!(fl.bucket_for(16), 0); // [16, 32)
        assert_eq!(fl.bucket_for(31), 0);
        assert_eq!(fl.bucket_for(32), 1); // [32, 64)
        assert_eq!(fl.bucket_for(63), 1);
        assert_eq!(fl.bucket_for(64), 2); // [64, 128)
        assert_eq!(fl.bucket_for(512), 5); // clamped into the last bucket
    }

    #[test]
    fn multi_bucket_does_not_discard() {
        let fl = FreeList::new(4, 16);
        assert!(!fl.discard_if_no_fit());
    }

    #[test]
    fn snapshot_round_trip() {
        let mut fl = FreeList::new(4, 16);
        let a = Box::leak(block()).as_mut_ptr() as usize;
        fl.thread(a, 64);
        let mut snap = FreeListSnapshot { buckets: vec![Bucket::default(); 4] };
        fl.copy_to(&mut snap);
        fl.clear();
        assert!(fl.allocate_fit(64).is_none());
        fl.copy_from(&snap);
        assert!(fl.allocate_fit(64).is_some());
    }
}
