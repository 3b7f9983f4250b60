//! Write barrier (spec.md §4.5): fires on every reference-field store,
//! dirtying the card under the written slot so the next ephemeral
//! collection's card scan finds it. Also supports the incremental-update
//! marking hook used while a background collection is concurrently
//! marking (the Dijkstra formulation chosen over SATB per SPEC_FULL.md
//! §4.5 — shade the new value, not the overwritten old one).

use std::sync::atomic::{AtomicBool, Ordering};

use crate::barrier::card_table::CardTable;

/// Whether the incremental-update hook is active; toggled by the
/// background collector around its concurrent mark phase.
pub struct WriteBarrier<'a> {
    cards: &'a CardTable,
    concurrent_marking: &'a AtomicBool,
}

impl<'a> WriteBarrier<'a> {
    pub fn new(cards: &'a CardTable, concurrent_marking: &'a AtomicBool) -> Self {
        Self { cards, concurrent_marking }
    }

    /// Record a store of `new_value` into the reference field at
    /// `slot_address`. Always dirties the card; additionally shades
    /// `new_value` grey when a background mark is in flight so a
    /// reference that becomes reachable only through a mutator write is
    /// not missed (incremental-update invariant: the marker must observe
    /// every pointer written into an already-scanned object).
    pub fn on_store(&self, slot_address: usize, new_value: usize, mark_hook: impl FnOnce(usize)) {
        self.cards.dirty(slot_address);
        if new_value != 0 && self.concurrent_marking.load(Ordering::Acquire) {
            mark_hook(new_value);
        }
    }

    /// Bulk variant for array/struct-copy stores spanning `[start, end)`:
    /// dirty every card the range touches instead of one store at a time.
    pub fn on_bulk_store(&self, start: usize, end: usize) {
        let mut addr = start;
        while addr < end {
            self.cards.dirty(addr);
            addr += self.cards.card_size();
        }
        self.cards.dirty(end.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_dirties_card_and_shades_during_concurrent_mark() {
        let cards = CardTable::new(0x1000, 0x10000, 512);
        let marking = AtomicBool::new(true);
        let barrier = WriteBarrier::new(&cards, &marking);
        let mut shaded = None;
        barrier.on_store(0x1200, 0x2000, |v| shaded = Some(v));
        assert!(cards.is_dirty(0x1200));
        assert_eq!(shaded, Some(0x2000));
    }

    #[test]
    fn no_shade_when_not_marking() {
        let cards = CardTable::new(0x1000, 0x10000, 512);
        let marking = AtomicBool::new(false);
        let barrier = WriteBarrier::new(&cards, &marking);
        let mut called = false;
        barrier.on_store(0x1200, 0x2000, |_| called = true);
        assert!(!called);
        assert!(cards.is_dirty(0x1200));
    }
}
