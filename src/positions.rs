// ===============================
// src/positions.rs (position & cost-basis aggregate)
// ===============================
//
// One writer (the executor stage), any number of readers.
//
// - `position` and `average_cost` live together in one immutable `Book`
//   behind an `ArcSwap`. A fill replaces the whole `Book` with a CAS loop
//   (`rcu`), so readers only ever see a pair that was committed together.
// - Cash and quantity accumulators are independent monotonic atomics; no
//   invariant ties them to the book.
//

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

use crate::domain::{DecisionEvent, Side};

/// The composite {position, average_cost} value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub position: i64,
    pub average_cost: f64,
}

impl Book {
    /// State after one fill. Pure: the CAS loop may call it more than once.
    pub fn after_fill(&self, side: Side, price: f64, quantity: u32) -> Book {
        let qty = quantity as i64;
        match side {
            Side::Buy => {
                let old_pos = self.position;
                let new_pos = old_pos + qty;
                let average_cost = if old_pos <= 0 {
                    price
                } else {
                    (self.average_cost * old_pos as f64 + price * quantity as f64) / new_pos as f64
                };
                Book { position: new_pos, average_cost }
            }
            Side::Sell => {
                let new_pos = self.position - qty;
                let average_cost = if new_pos <= 0 { 0.0 } else { self.average_cost };
                Book { position: new_pos, average_cost }
            }
        }
    }
}

/// f64 accumulator stored as bits.
#[derive(Debug, Default)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn add(&self, v: f64) {
        // closure never returns None, so fetch_update cannot fail
        let _ = self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
            Some((f64::from_bits(bits) + v).to_bits())
        });
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
}

/// Point-in-time view for reporting.
///
/// `position` and `average_cost` always come from one committed `Book`.
/// The accumulators are read right after and may include a fill the book
/// does not yet show if a writer is mid-update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub position: i64,
    pub average_cost: f64,
    pub total_spent: f64,
    pub total_earned: f64,
    pub total_bought_quantity: u64,
    pub total_sold_quantity: u64,
    pub fills_applied: u64,
}

impl PositionSnapshot {
    pub fn net_profit(&self) -> f64 {
        self.total_earned - self.total_spent
    }
}

#[derive(Debug)]
pub struct Positions {
    book: ArcSwap<Book>,
    total_spent: AtomicF64,
    total_earned: AtomicF64,
    total_bought_quantity: AtomicU64,
    total_sold_quantity: AtomicU64,
    fills_applied: AtomicU64,
}

impl Default for Positions {
    fn default() -> Self {
        Self::new()
    }
}

impl Positions {
    pub fn new() -> Self {
        Self {
            book: ArcSwap::from_pointee(Book::default()),
            total_spent: AtomicF64::default(),
            total_earned: AtomicF64::default(),
            total_bought_quantity: AtomicU64::new(0),
            total_sold_quantity: AtomicU64::new(0),
            fills_applied: AtomicU64::new(0),
        }
    }

    /// Apply one filled decision. Returns the book it committed.
    pub fn apply_fill(&self, side: Side, price: f64, quantity: u32) -> Book {
        let value = price * quantity as f64;
        match side {
            Side::Buy => {
                self.total_spent.add(value);
                self.total_bought_quantity.fetch_add(quantity as u64, Ordering::AcqRel);
            }
            Side::Sell => {
                self.total_earned.add(value);
                self.total_sold_quantity.fetch_add(quantity as u64, Ordering::AcqRel);
            }
        }

        let prev = self
            .book
            .rcu(|cur| Arc::new(cur.after_fill(side, price, quantity)));
        self.fills_applied.fetch_add(1, Ordering::AcqRel);
        prev.after_fill(side, price, quantity)
    }

    pub fn apply(&self, decision: &DecisionEvent) -> Book {
        self.apply_fill(decision.side(), decision.price(), decision.quantity())
    }

    /// Current {position, average_cost} pair.
    pub fn book(&self) -> Book {
        **self.book.load()
    }

    pub fn position(&self) -> i64 {
        self.book.load().position
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        let book = self.book();
        PositionSnapshot {
            position: book.position,
            average_cost: book.average_cost,
            total_spent: self.total_spent.load(),
            total_earned: self.total_earned.load(),
            total_bought_quantity: self.total_bought_quantity.load(Ordering::Acquire),
            total_sold_quantity: self.total_sold_quantity.load(Ordering::Acquire),
            fills_applied: self.fills_applied.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_cost_follows_buys_and_resets_when_flat() {
        let p = Positions::new();

        let b = p.apply_fill(Side::Buy, 100.0, 10);
        assert_eq!(b, Book { position: 10, average_cost: 100.0 });

        let b = p.apply_fill(Side::Buy, 110.0, 10);
        assert_eq!(b, Book { position: 20, average_cost: 105.0 });

        let b = p.apply_fill(Side::Sell, 150.0, 20);
        assert_eq!(b, Book { position: 0, average_cost: 0.0 });

        let s = p.snapshot();
        assert_eq!(s.total_earned, 3000.0);
        assert_eq!(s.total_spent, 2100.0);
        assert_eq!(s.total_bought_quantity, 20);
        assert_eq!(s.total_sold_quantity, 20);
        assert_eq!(s.fills_applied, 3);
        assert_eq!(s.net_profit(), 900.0);
    }

    #[test]
    fn selling_from_flat_goes_short_without_basis() {
        let p = Positions::new();
        let b = p.apply_fill(Side::Sell, 90.0, 5);
        assert_eq!(b, Book { position: -5, average_cost: 0.0 });
        assert_eq!(p.snapshot().total_earned, 450.0);
    }

    #[test]
    fn partial_sell_keeps_basis() {
        let p = Positions::new();
        p.apply_fill(Side::Buy, 100.0, 10);
        let b = p.apply_fill(Side::Sell, 120.0, 4);
        assert_eq!(b, Book { position: 6, average_cost: 100.0 });
    }

    #[test]
    fn buying_out_of_a_short_starts_a_fresh_basis() {
        let p = Positions::new();
        p.apply_fill(Side::Sell, 90.0, 5);
        let b = p.apply_fill(Side::Buy, 95.0, 10);
        assert_eq!(b, Book { position: 5, average_cost: 95.0 });
    }

    #[test]
    fn apply_reads_the_decision_fields() {
        let p = Positions::new();
        let d = DecisionEvent::new(1, 101.5, 2, Side::Buy).unwrap();
        p.apply(&d);
        assert_eq!(p.position(), 2);
        assert_eq!(p.book().average_cost, 101.5);
        assert_eq!(p.snapshot().total_spent, 203.0);
    }
}
