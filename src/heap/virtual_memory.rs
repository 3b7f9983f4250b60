//! Reserve/commit/decommit/release of raw virtual address ranges.
//!
//! This is the segment lifecycle's backing store (spec.md §4.2.1): reserve
//! obtains address space with no physical backing, commit lazily backs
//! pages from the allocated end toward the reserved end, decommit returns
//! pages to the OS while keeping the reservation, release returns the
//! whole range.

use std::sync::atomic::{AtomicUsize, Ordering};

use memmap2::MmapMut;

use crate::error::{GcError, Result};

/// A single virtual-memory reservation backing one segment.
pub struct VirtualMemory {
    mapping: MmapMut,
    base: usize,
    reserved_size: usize,
    committed_end: AtomicUsize,
}

impl VirtualMemory {
    /// Reserve `size` bytes of address space, rounded up to the system
    /// page size. No physical memory is committed yet.
    pub fn reserve(size: usize) -> Result<Self> {
        let page = page_size::get();
        let aligned = align_up(size, page);
        let mapping = MmapMut::map_anon(aligned).map_err(|e| GcError::ReserveSegment {
            reason: e.to_string(),
        })?;
        #[cfg(unix)]
        {
            // PROT_NONE until committed: touching reserved-but-uncommitted
            // pages must fault, matching the reserve/commit split of §4.2.1.
            unsafe {
                let rc = libc::mprotect(mapping.as_ptr() as *mut libc::c_void, aligned, libc::PROT_NONE);
                if rc != 0 {
                    return Err(GcError::ReserveSegment {
                        reason: std::io::Error::last_os_error().to_string(),
                    });
                }
            }
        }
        let base = mapping.as_ptr() as usize;
        Ok(Self {
            mapping,
            base,
            reserved_size: aligned,
            committed_end: AtomicUsize::new(0),
        })
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn reserved_size(&self) -> usize {
        self.reserved_size
    }

    pub fn committed_size(&self) -> usize {
        self.committed_end.load(Ordering::Acquire)
    }

    /// Grow the committed prefix to at least `up_to` bytes from `base`.
    /// A no-op if already committed that far.
    pub fn commit(&self, up_to: usize) -> Result<()> {
        let page = page_size::get();
        let target = align_up(up_to.min(self.reserved_size), page);
        let current = self.committed_end.load(Ordering::Acquire);
        if target <= current {
            return Ok(());
        }
        #[cfg(unix)]
        {
            unsafe {
                let addr = self.base as *mut libc::c_void;
                let rc = libc::mprotect(addr, target, libc::PROT_READ | libc::PROT_WRITE);
                if rc != 0 {
                    return Err(GcError::CommitSegmentBegin {
                        reason: std::io::Error::last_os_error().to_string(),
                    });
                }
            }
        }
        // TODO(windows): commit via VirtualAlloc(MEM_COMMIT) over the mmap2
        // base instead of treating the whole reservation as committed.
        self.committed_end.fetch_max(target, Ordering::AcqRel);
        Ok(())
    }

    /// Shrink the committed prefix down to `down_to` bytes, returning
    /// pages between `down_to` and the old committed end to the OS.
    pub fn decommit(&self, down_to: usize) -> Result<()> {
        let page = page_size::get();
        let target = align_up(down_to, page).min(self.reserved_size);
        let current = self.committed_end.load(Ordering::Acquire);
        if target >= current {
            return Ok(());
        }
        #[cfg(unix)]
        {
            unsafe {
                let addr = (self.base + target) as *mut libc::c_void;
                let len = current - target;
                libc::madvise(addr, len, libc::MADV_DONTNEED);
                libc::mprotect(addr, len, libc::PROT_NONE);
            }
        }
        self.committed_end.store(target, Ordering::Release);
        Ok(())
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_commit_then_decommit() {
        let vm = VirtualMemory::reserve(4 * 1024 * 1024).unwrap();
        assert_eq!(vm.committed_size(), 0);
        vm.commit(1024 * 1024).unwrap();
        assert!(vm.committed_size() >= 1024 * 1024);
        vm.decommit(0).unwrap();
        assert_eq!(vm.committed_size(), 0);
    }

    #[test]
    fn commit_is_idempotent() {
        let vm = VirtualMemory::reserve(4 * 1024 * 1024).unwrap();
        vm.commit(4096).unwrap();
        let first = vm.committed_size();
        vm.commit(4096).unwrap();
        assert_eq!(vm.committed_size(), first);
    }
}
