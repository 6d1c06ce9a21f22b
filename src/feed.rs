// ===============================
// src/feed.rs
// ===============================
//
// Market data producer stage.
// - UniformSource    : i.i.d. price/qty draws (default)
// - RandomWalkSource : bounded random walk around a start price
// - run              : generate -> push to the strategy queue, paced by
//                      `interval`; a full queue drops the event (stale data
//                      is not worth queueing), counted as dropped, and the
//                      stage waits at least one backoff before the next try.
//

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{trace, warn};

use crate::clock::MonoClock;
use crate::domain::{MarketEvent, Side};
use crate::metrics::{MARKET_EVENTS, MARKET_EVENTS_DROPPED};
use crate::queue::Producer;
use crate::stage::{self, CancelToken, Step};

/// Event generation policy plugged into the feed stage.
pub trait MarketSource: Send {
    fn next_event(&mut self, timestamp: u64) -> Option<MarketEvent>;
}

impl<S: MarketSource + ?Sized> MarketSource for Box<S> {
    fn next_event(&mut self, timestamp: u64) -> Option<MarketEvent> {
        (**self).next_event(timestamp)
    }
}

fn rng_from(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Uniform price in `[price_min, price_max)`, quantity in `1..=qty_max`,
/// every event observed on the buy side.
pub struct UniformSource {
    rng: StdRng,
    price_min: f64,
    price_max: f64,
    qty_max: u32,
}

impl UniformSource {
    pub fn new(price_min: f64, price_max: f64, qty_max: u32, seed: Option<u64>) -> Self {
        Self { rng: rng_from(seed), price_min, price_max, qty_max: qty_max.max(1) }
    }
}

impl MarketSource for UniformSource {
    fn next_event(&mut self, timestamp: u64) -> Option<MarketEvent> {
        let price = self.rng.gen_range(self.price_min..self.price_max);
        let qty = self.rng.gen_range(1..=self.qty_max);
        match MarketEvent::new(timestamp, price, qty, Side::Buy) {
            Ok(ev) => Some(ev),
            Err(e) => {
                warn!(?e, "uniform source produced an invalid event");
                None
            }
        }
    }
}

/// Random walk in `tick` steps, clamped to `[floor, ceil]`. Side follows
/// the direction of the last step.
pub struct RandomWalkSource {
    rng: StdRng,
    price: f64,
    tick: f64,
    floor: f64,
    ceil: f64,
    qty_max: u32,
}

impl RandomWalkSource {
    pub fn new(start: f64, tick: f64, floor: f64, ceil: f64, qty_max: u32, seed: Option<u64>) -> Self {
        Self {
            rng: rng_from(seed),
            price: start.clamp(floor, ceil),
            tick,
            floor,
            ceil,
            qty_max: qty_max.max(1),
        }
    }
}

impl MarketSource for RandomWalkSource {
    fn next_event(&mut self, timestamp: u64) -> Option<MarketEvent> {
        let step: i32 = self.rng.gen_range(-3..=3);
        self.price = (self.price + step as f64 * self.tick).clamp(self.floor, self.ceil);
        let side = if step < 0 { Side::Sell } else { Side::Buy };
        let qty = self.rng.gen_range(1..=self.qty_max);
        MarketEvent::new(timestamp, self.price, qty, side).ok()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedStats {
    pub generated: u64,
    pub dropped: u64,
}

/// Feed stage body. Returns once `cancel` fires.
pub fn run<S: MarketSource>(
    cancel: CancelToken,
    mut out: Producer<MarketEvent>,
    mut source: S,
    clock: MonoClock,
    interval: Duration,
    backoff: Duration,
) -> FeedStats {
    let mut stats = FeedStats::default();
    stage::run("feed", &cancel, backoff, || {
        let Some(ev) = source.next_event(clock.now_ns()) else {
            return Step::Idle;
        };
        match out.push(ev) {
            Ok(()) => {
                stats.generated += 1;
                MARKET_EVENTS.inc();
                trace!(price = ev.price(), qty = ev.quantity(), "feed event");
                if interval.is_zero() { Step::Progress } else { Step::Pause(interval) }
            }
            Err(_) => {
                stats.dropped += 1;
                MARKET_EVENTS_DROPPED.inc();
                Step::Pause(interval.max(backoff))
            }
        }
    });
    stats
}
