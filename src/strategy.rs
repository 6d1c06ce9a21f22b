// ===============================
// src/strategy.rs
// ===============================
//
// Transformer stage: MarketEvent -> DecisionEvent under a position cap.
//
// Two policies:
// 1) Threshold (default)  -> buy below `buy_below`, sell above `sell_above`
// 2) Moving average       -> mean reversion around an N-event SMA +/- edge
//
// Position handed to a policy is the stage's committed exposure: the net
// quantity of every decision already pushed downstream. The executor's
// applied position lags by whatever is still queued, so capping against it
// would let in-flight buys overshoot `max_position`.
//
// Backpressure: when the decision queue is full the decision is kept and
// retried before any more market events are popped. A decision still held
// when the stage is cancelled is never pushed; it shows up as
// `pending_at_stop`.
//

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::domain::{DecisionEvent, MarketEvent, Side};
use crate::metrics::{DECISIONS, DECISION_RETRIES};
use crate::queue::{Consumer, Producer};
use crate::stage::{self, CancelToken, Step};

/// Decision policy plugged into the strategy stage.
pub trait DecisionPolicy: Send {
    fn name(&self) -> &'static str;
    fn on_event(&mut self, md: &MarketEvent, position: i64) -> Option<DecisionEvent>;
}

fn buy_qty(wanted: u32, position: i64, max_position: i64) -> Option<u32> {
    let room = max_position - position;
    if room <= 0 {
        return None;
    }
    Some((wanted as i64).min(room) as u32)
}

fn sell_qty(wanted: u32, position: i64) -> Option<u32> {
    if position <= 0 {
        return None;
    }
    Some((wanted as i64).min(position) as u32)
}

fn decide(md: &MarketEvent, side: Side, qty: Option<u32>) -> Option<DecisionEvent> {
    let qty = qty.filter(|q| *q > 0)?;
    match DecisionEvent::from_market(md, side, qty) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!(?e, "dropping invalid decision");
            None
        }
    }
}

// -----------------------------------------------------------------------------
// 1) THRESHOLD
//    price < buy_below  and position < max -> Buy  min(event qty, room)
//    price > sell_above and position > 0   -> Sell min(event qty, position)
// -----------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct ThresholdPolicy {
    buy_below: f64,
    sell_above: f64,
    max_position: i64,
}

impl ThresholdPolicy {
    pub fn new(buy_below: f64, sell_above: f64, max_position: i64) -> Self {
        Self { buy_below, sell_above, max_position }
    }
}

impl DecisionPolicy for ThresholdPolicy {
    fn name(&self) -> &'static str { "threshold" }

    fn on_event(&mut self, md: &MarketEvent, position: i64) -> Option<DecisionEvent> {
        if md.price() < self.buy_below {
            return decide(md, Side::Buy, buy_qty(md.quantity(), position, self.max_position));
        }
        if md.price() > self.sell_above {
            return decide(md, Side::Sell, sell_qty(md.quantity(), position));
        }
        None
    }
}

// -----------------------------------------------------------------------------
// 2) MOVING AVERAGE (mean reversion)
//    fair = SMA of the last `w` prices (current included)
//    price < fair - edge -> Buy  order_qty (capped)
//    price > fair + edge -> Sell order_qty (capped by position)
//    Nothing until the window is full.
// -----------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct MovingAveragePolicy {
    window: VecDeque<f64>,
    sum: f64,
    w: usize,
    edge: f64,
    order_qty: u32,
    max_position: i64,
}

impl MovingAveragePolicy {
    pub fn new(w: usize, edge: f64, order_qty: u32, max_position: i64) -> Self {
        let w = w.max(1);
        Self { window: VecDeque::with_capacity(w), sum: 0.0, w, edge, order_qty, max_position }
    }

    fn fair(&self) -> Option<f64> {
        if self.window.len() >= self.w { Some(self.sum / self.w as f64) } else { None }
    }
}

impl DecisionPolicy for MovingAveragePolicy {
    fn name(&self) -> &'static str { "moving_average" }

    fn on_event(&mut self, md: &MarketEvent, position: i64) -> Option<DecisionEvent> {
        if self.window.len() == self.w {
            if let Some(x) = self.window.pop_front() { self.sum -= x; }
        }
        let px = md.price();
        self.window.push_back(px);
        self.sum += px;

        let fair = self.fair()?;
        if px < fair - self.edge {
            return decide(md, Side::Buy, buy_qty(self.order_qty, position, self.max_position));
        }
        if px > fair + self.edge {
            return decide(md, Side::Sell, sell_qty(self.order_qty, position));
        }
        None
    }
}

impl<P: DecisionPolicy + ?Sized> DecisionPolicy for Box<P> {
    fn name(&self) -> &'static str { (**self).name() }
    fn on_event(&mut self, md: &MarketEvent, position: i64) -> Option<DecisionEvent> {
        (**self).on_event(md, position)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StrategyStats {
    pub events_seen: u64,
    pub decisions: u64,
    pub push_retries: u64,
    /// Net signed quantity of all decisions pushed.
    pub committed_position: i64,
    /// Decision still waiting for queue space at cancel (0 or 1).
    pub pending_at_stop: u64,
}

/// Strategy stage body. Returns once `cancel` fires.
pub fn run<P: DecisionPolicy>(
    cancel: CancelToken,
    mut input: Consumer<MarketEvent>,
    mut output: Producer<DecisionEvent>,
    mut policy: P,
    backoff: Duration,
) -> StrategyStats {
    let mut stats = StrategyStats::default();
    let mut pending: Option<DecisionEvent> = None;
    let strategy = policy.name();

    let mut emit = |d: DecisionEvent, stats: &mut StrategyStats| -> Option<DecisionEvent> {
        match output.push(d) {
            Ok(()) => {
                stats.decisions += 1;
                stats.committed_position += d.side().sign() * d.quantity() as i64;
                DECISIONS.inc();
                debug!(strategy, side = d.side().as_str(), px = d.price(), qty = d.quantity(), "decision");
                None
            }
            Err(d) => {
                stats.push_retries += 1;
                DECISION_RETRIES.inc();
                Some(d)
            }
        }
    };

    stage::run("strategy", &cancel, backoff, || {
        if let Some(d) = pending.take() {
            pending = emit(d, &mut stats);
            return if pending.is_some() { Step::Idle } else { Step::Progress };
        }

        let Some(md) = input.pop() else {
            return Step::Idle;
        };
        stats.events_seen += 1;
        if let Some(d) = policy.on_event(&md, stats.committed_position) {
            pending = emit(d, &mut stats);
        }
        Step::Progress
    });
    if let Some(d) = pending {
        stats.pending_at_stop = 1;
        warn!(strategy, side = d.side().as_str(), qty = d.quantity(), "decision not delivered before stop");
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::Queue;
    use std::thread;

    fn md(price: f64, qty: u32) -> MarketEvent {
        MarketEvent::new(1, price, qty, Side::Buy).unwrap()
    }

    #[test]
    fn threshold_buys_low_sells_high_and_respects_limits() {
        let mut p = ThresholdPolicy::new(100.4, 100.7, 10);

        let d = p.on_event(&md(100.0, 7), 0).unwrap();
        assert_eq!((d.side(), d.quantity()), (Side::Buy, 7));

        // capped by remaining room
        let d = p.on_event(&md(100.0, 7), 7).unwrap();
        assert_eq!(d.quantity(), 3);
        assert!(p.on_event(&md(100.0, 7), 10).is_none());

        // inside the band: nothing
        assert!(p.on_event(&md(100.5, 7), 5).is_none());

        // capped by held position, never from flat
        let d = p.on_event(&md(100.9, 7), 4).unwrap();
        assert_eq!((d.side(), d.quantity()), (Side::Sell, 4));
        assert!(p.on_event(&md(100.9, 7), 0).is_none());
    }

    #[test]
    fn moving_average_waits_for_a_full_window() {
        let mut p = MovingAveragePolicy::new(4, 0.1, 5, 100);
        for _ in 0..3 {
            assert!(p.on_event(&md(100.0, 1), 0).is_none());
        }
        // window full: fair = (100*3 + 99)/4 = 99.75, 99 < 99.65
        let d = p.on_event(&md(99.0, 1), 0).unwrap();
        assert_eq!((d.side(), d.quantity()), (Side::Buy, 5));
        assert_eq!(d.price(), 99.0);
    }

    #[test]
    fn moving_average_sells_above_fair_only_when_long() {
        let mut p = MovingAveragePolicy::new(2, 0.1, 5, 100);
        assert!(p.on_event(&md(100.0, 1), 0).is_none());
        // fair = 100.5, 101 > 100.6 but flat
        assert!(p.on_event(&md(101.0, 1), 0).is_none());
        // fair = 101.5, 102 > 101.6 and long 3
        let d = p.on_event(&md(102.0, 1), 3).unwrap();
        assert_eq!((d.side(), d.quantity()), (Side::Sell, 3));
    }

    #[test]
    fn full_output_queue_retries_the_same_decision() {
        let (mut md_tx, md_rx) = Queue::new(16).unwrap().split();
        let (dec_tx, mut dec_rx) = Queue::new(1).unwrap().split();
        for qty in 1..=3 {
            md_tx.push(md(100.0, qty)).unwrap();
        }

        let cancel = CancelToken::new();
        let c = cancel.clone();
        let policy = ThresholdPolicy::new(100.4, 100.7, 1_000);
        let h = thread::spawn(move || run(c, md_rx, dec_tx, policy, Duration::from_micros(10)));

        let mut got = Vec::new();
        while got.len() < 3 {
            // let the stage hit a full queue before draining
            thread::sleep(Duration::from_millis(1));
            if let Some(d) = dec_rx.pop() {
                got.push(d.quantity());
            }
        }
        cancel.cancel();
        let stats = h.join().unwrap();

        assert_eq!(got, vec![1, 2, 3]);
        assert_eq!(stats.events_seen, 3);
        assert_eq!(stats.decisions, 3);
        assert_eq!(stats.committed_position, 6);
        assert!(stats.push_retries > 0);
        assert_eq!(stats.pending_at_stop, 0);
    }

    #[test]
    fn decision_held_at_cancel_is_reported() {
        let (mut md_tx, md_rx) = Queue::new(4).unwrap().split();
        let (dec_tx, mut dec_rx) = Queue::new(1).unwrap().split();
        md_tx.push(md(100.0, 2)).unwrap();
        md_tx.push(md(100.0, 5)).unwrap();

        let cancel = CancelToken::new();
        let c = cancel.clone();
        let policy = ThresholdPolicy::new(100.4, 100.7, 1_000);
        let h = thread::spawn(move || run(c, md_rx, dec_tx, policy, Duration::from_micros(10)));

        // nobody drains: the second decision stays pending
        while !md_tx.is_empty() {
            thread::sleep(Duration::from_micros(50));
        }
        thread::sleep(Duration::from_millis(2));
        cancel.cancel();
        let stats = h.join().unwrap();

        assert_eq!(stats.events_seen, 2);
        assert_eq!(stats.decisions, 1);
        assert_eq!(stats.committed_position, 2);
        assert_eq!(stats.pending_at_stop, 1);
        assert_eq!(dec_rx.pop().map(|d| d.quantity()), Some(2));
        assert_eq!(dec_rx.pop(), None);
    }
}
