// ===============================
// src/executor.rs
// ===============================
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::domain::DecisionEvent;
use crate::metrics::{AVG_COST, FILLS, POSITION};
use crate::positions::Positions;
use crate::queue::Consumer;
use crate::stage::{self, CancelToken, Step};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutorStats {
    pub executed: u64,
}

/// Executor stage body: pop a decision, fill it in full at its price,
/// fold it into `positions`. Returns once `cancel` fires.
pub fn run(
    cancel: CancelToken,
    mut input: Consumer<DecisionEvent>,
    positions: Arc<Positions>,
    backoff: Duration,
) -> ExecutorStats {
    let mut stats = ExecutorStats::default();
    stage::run("executor", &cancel, backoff, || {
        let Some(d) = input.pop() else {
            return Step::Idle;
        };
        let book = positions.apply(&d);
        stats.executed += 1;
        FILLS.inc();
        POSITION.set(book.position);
        AVG_COST.set(book.average_cost);
        debug!(
            side = d.side().as_str(),
            px = d.price(),
            qty = d.quantity(),
            position = book.position,
            avg_cost = book.average_cost,
            "executed"
        );
        Step::Progress
    });
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Side;
    use crate::queue::Queue;
    use std::thread;

    #[test]
    fn drains_and_applies_every_decision() {
        let (mut tx, rx) = Queue::new(8).unwrap().split();
        tx.push(DecisionEvent::new(1, 100.0, 10, Side::Buy).unwrap()).unwrap();
        tx.push(DecisionEvent::new(2, 110.0, 10, Side::Buy).unwrap()).unwrap();
        tx.push(DecisionEvent::new(3, 150.0, 20, Side::Sell).unwrap()).unwrap();

        let positions = Arc::new(Positions::new());
        let cancel = CancelToken::new();
        let (c, p) = (cancel.clone(), positions.clone());
        let h = thread::spawn(move || run(c, rx, p, Duration::from_micros(10)));

        while positions.snapshot().fills_applied < 3 {
            thread::sleep(Duration::from_micros(50));
        }
        cancel.cancel();
        let stats = h.join().unwrap();

        assert_eq!(stats.executed, 3);
        let s = positions.snapshot();
        assert_eq!(s.position, 0);
        assert_eq!(s.average_cost, 0.0);
        assert_eq!(s.total_spent, 2100.0);
        assert_eq!(s.total_earned, 3000.0);
        assert!(tx.is_empty());
    }
}
