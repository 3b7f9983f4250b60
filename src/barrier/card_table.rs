//! Card table (spec.md §4.5): one byte per `card_size`-byte span of the
//! heap, marking "this span may contain a pointer into a younger
//! generation". Scanned instead of the whole mature generation and LOH
//! during an ephemeral collection.

use std::sync::atomic::{AtomicU8, Ordering};

pub const CARD_DIRTY: u8 = 1;
pub const CARD_CLEAN: u8 = 0;

/// Maps a heap address range onto a byte-per-card table. `base` is the
/// lowest address the table covers; the table grows by re-allocating when
/// `highest_address` moves past its current span, which happens as the
/// heap grows new segments.
pub struct CardTable {
    cards: Vec<AtomicU8>,
    base: usize,
    card_size: usize,
}

impl CardTable {
    pub fn new(base: usize, span: usize, card_size: usize) -> Self {
        assert!(card_size.is_power_of_two());
        let num_cards = span.div_ceil(card_size).max(1);
        let mut cards = Vec::with_capacity(num_cards);
        cards.resize_with(num_cards, || AtomicU8::new(CARD_CLEAN));
        Self { cards, base, card_size }
    }

    pub fn card_size(&self) -> usize {
        self.card_size
    }

    fn card_index(&self, address: usize) -> Option<usize> {
        if address < self.base {
            return None;
        }
        let idx = (address - self.base) / self.card_size;
        if idx < self.cards.len() {
            Some(idx)
        } else {
            None
        }
    }

    /// Mark the card covering `address` dirty. Called by the write
    /// barrier whenever a reference field is stored (spec.md §4.5).
    pub fn dirty(&self, address: usize) {
        if let Some(idx) = self.card_index(address) {
            self.cards[idx].store(CARD_DIRTY, Ordering::Release);
        }
    }

    pub fn is_dirty(&self, address: usize) -> bool {
        self.card_index(address)
            .map(|idx| self.cards[idx].load(Ordering::Acquire) == CARD_DIRTY)
            .unwrap_or(false)
    }

    /// Clear every card; called after the cards it covers have been
    /// scanned and their ranges visited this collection.
    pub fn clear_all(&self) {
        for card in &self.cards {
            card.store(CARD_CLEAN, Ordering::Relaxed);
        }
    }

    /// Address range covered by card `idx`.
    pub fn range_of(&self, idx: usize) -> (usize, usize) {
        let start = self.base + idx * self.card_size;
        (start, start + self.card_size)
    }

    /// Iterate the address range of every dirty card, clearing each as it
    /// is yielded so concurrently re-dirtied cards survive into the next
    /// pass (spec.md §4.5 "card scanning").
    pub fn drain_dirty(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cards.iter().enumerate().filter_map(move |(idx, card)| {
            if card.swap(CARD_CLEAN, Ordering::AcqRel) == CARD_DIRTY {
                Some(self.range_of(idx))
            } else {
                None
            }
        })
    }

    pub fn num_cards(&self) -> usize {
        self.cards.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dirty_then_drain_clears() {
        let table = CardTable::new(0x1000, 0x10000, 512);
        table.dirty(0x1200);
        assert!(table.is_dirty(0x1200));
        let drained: Vec<_> = table.drain_dirty().collect();
        assert_eq!(drained.len(), 1);
        assert!(!table.is_dirty(0x1200));
    }

    #[test]
    fn address_outside_span_is_never_dirty() {
        let table = CardTable::new(0x1000, 0x1000, 512);
        assert!(!table.is_dirty(0x10_0000));
        table.dirty(0x10_0000); // no-op, out of range
    }
}
