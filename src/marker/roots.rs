//! Root scanning (spec.md §4.4.2 "mark phase", step 2): the set of
//! references the collector must treat as reachable without being found
//! through another object. Handle table roots come from the VM
//! (`GcCallbacks::enumerate_handles`); stack and register roots are
//! supplied per-thread by whatever hands the collector a stop-the-world
//! snapshot.

use std::sync::RwLock;

use crate::error::Result;

/// Where a root came from, for diagnostics and `RootStats` breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootType {
    Handle,
    Stack,
    Static,
    FinalizeQueue,
}

#[derive(Debug, Clone, Copy)]
pub struct RootDescriptor {
    pub address: usize,
    pub kind: RootType,
    pub is_pinned: bool,
}

/// Opaque handle for an explicitly registered root, returned by
/// [`RootScanner::register`] so it can later be unregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootHandle(u64);

#[derive(Debug, Default, Clone, Copy)]
pub struct RootStats {
    pub live_roots: usize,
    pub pinned_roots: usize,
}

struct Entry {
    handle: RootHandle,
    descriptor: RootDescriptor,
}

/// Registry of explicitly tracked roots (statics, VM-owned handle-table
/// slots not enumerated via callback, pinned locals). Thread-safe: roots
/// may be registered and unregistered by mutators running concurrently
/// with a background collection, outside of the stop-the-world window.
#[derive(Default)]
pub struct RootScanner {
    entries: RwLock<Vec<Entry>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl Clone for RootScanner {
    fn clone(&self) -> Self {
        let entries = self.entries.read().unwrap();
        RootScanner {
            entries: RwLock::new(
                entries
                    .iter()
                    .map(|e| Entry { handle: e.handle, descriptor: e.descriptor })
                    .collect(),
            ),
            next_id: std::sync::atomic::AtomicU64::new(self.next_id.load(std::sync::atomic::Ordering::Relaxed)),
        }
    }
}

impl RootScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: usize, kind: RootType, is_pinned: bool) -> RootHandle {
        let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let handle = RootHandle(id);
        self.entries
            .write()
            .unwrap()
            .push(Entry { handle, descriptor: RootDescriptor { address, kind, is_pinned } });
        handle
    }

    pub fn unregister(&self, handle: RootHandle) {
        self.entries.write().unwrap().retain(|e| e.handle != handle);
    }

    /// Invoke `visit` once per currently-registered root, reading the
    /// *value* stored at each root's address (a root is a slot, not a
    /// value — the collector must re-read it every cycle since the
    /// mutator may have since overwritten it).
    pub fn scan_roots(&self, mut visit: impl FnMut(usize)) {
        let entries = self.entries.read().unwrap();
        for entry in entries.iter() {
            let value = unsafe { *(entry.descriptor.address as *const usize) };
            if value != 0 {
                visit(value);
            }
        }
    }

    /// Relocate-phase counterpart to `scan_roots`: re-read each root's
    /// slot and, if `fixup` returns a different address, write it back.
    /// Used to repoint roots at objects the plan phase moved (spec.md
    /// §4.4.2 step 4 "update every reference ... using the forwarding
    /// information").
    pub fn fix_roots(&self, mut fixup: impl FnMut(usize) -> usize) {
        let entries = self.entries.read().unwrap();
        for entry in entries.iter() {
            let slot = entry.descriptor.address as *mut usize;
            let value = unsafe { *slot };
            if value == 0 {
                continue;
            }
            let fixed = fixup(value);
            if fixed != value {
                unsafe { *slot = fixed };
            }
        }
    }

    pub fn get_stats(&self) -> RootStats {
        let entries = self.entries.read().unwrap();
        RootStats {
            live_roots: entries.len(),
            pinned_roots: entries.iter().filter(|e| e.descriptor.is_pinned).count(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Root source backed by the VM's handle-table callback
/// (`GcCallbacks::enumerate_handles`, spec.md §6.2), scanned fresh each
/// cycle rather than mirrored into `RootScanner`.
pub fn scan_handle_table(
    enumerate: &dyn Fn(&mut dyn FnMut(usize)),
    mut visit: impl FnMut(usize),
) -> Result<()> {
    enumerate(&mut |addr| {
        if addr != 0 {
            visit(addr);
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_scan_then_unregister() {
        let scanner = RootScanner::new();
        let mut slot: usize = 0x1234;
        let handle = scanner.register(&mut slot as *mut usize as usize, RootType::Static, false);
        let mut seen = Vec::new();
        scanner.scan_roots(|v| seen.push(v));
        assert_eq!(seen, vec![0x1234]);
        scanner.unregister(handle);
        assert!(scanner.is_empty());
    }

    #[test]
    fn fix_roots_rewrites_moved_slot() {
        let scanner = RootScanner::new();
        let mut slot: usize = 0x1000;
        scanner.register(&mut slot as *mut usize as usize, RootType::Stack, false);
        scanner.fix_roots(|addr| if addr == 0x1000 { 0x2000 } else { addr });
        assert_eq!(slot, 0x2000);
    }

    #[test]
    fn handle_table_callback_filters_null() {
        let handles = [0x10usize, 0, 0x20];
        let enumerate = |visit: &mut dyn FnMut(usize)| {
            for &h in &handles {
                visit(h);
            }
        };
        let mut seen = Vec::new();
        scan_handle_table(&enumerate, |v| seen.push(v)).unwrap();
        assert_eq!(seen, vec![0x10, 0x20]);
    }
}
