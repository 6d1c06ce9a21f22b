// ===============================
// src/pipeline.rs (wiring, lifecycle, summary)
// ===============================
//
// feed ──▶ [market queue] ──▶ strategy ──▶ [decision queue] ──▶ executor ──▶ Positions
//
// Three named OS threads, one CancelToken. `join()` cancels, waits for all
// three, then reads the final aggregate.
//

use std::fmt::Write as _;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::clock::MonoClock;
use crate::config::{Args, ConfigError, FeedMode, StrategyMode};
use crate::domain::{DecisionEvent, MarketEvent};
use crate::executor::{self, ExecutorStats};
use crate::feed::{self, FeedStats, MarketSource, RandomWalkSource, UniformSource};
use crate::metrics::{QUEUE_DEPTH, TOTAL_EARNED, TOTAL_SPENT};
use crate::positions::{PositionSnapshot, Positions};
use crate::queue::{DepthProbe, Queue, QueueError};
use crate::stage::CancelToken;
use crate::strategy::{self, DecisionPolicy, MovingAveragePolicy, StrategyStats, ThresholdPolicy};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("queue setup failed: {0}")]
    Queue(#[from] QueueError),
    #[error("failed to spawn {stage} thread: {source}")]
    Spawn { stage: &'static str, source: io::Error },
    #[error("{0} stage panicked")]
    StagePanicked(&'static str),
}

/// Random walk tick when `FeedMode::RandomWalk` is selected.
const WALK_TICK: f64 = 0.01;

fn build_source(args: &Args) -> Box<dyn MarketSource> {
    match args.feed {
        FeedMode::Uniform => {
            Box::new(UniformSource::new(args.price_min, args.price_max, args.qty_max, args.seed))
        }
        FeedMode::RandomWalk => {
            let start = (args.price_min + args.price_max) / 2.0;
            Box::new(RandomWalkSource::new(
                start,
                WALK_TICK,
                args.price_min,
                args.price_max,
                args.qty_max,
                args.seed,
            ))
        }
    }
}

fn build_policy(args: &Args) -> Box<dyn DecisionPolicy> {
    match args.strategy {
        StrategyMode::Threshold => {
            Box::new(ThresholdPolicy::new(args.buy_threshold, args.sell_threshold, args.max_position))
        }
        StrategyMode::MovingAverage => Box::new(MovingAveragePolicy::new(
            args.ma_window,
            args.ma_edge,
            args.order_qty,
            args.max_position,
        )),
    }
}

fn spawn<T, F>(stage: &'static str, f: F) -> Result<JoinHandle<T>, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(stage.into())
        .spawn(f)
        .map_err(|source| PipelineError::Spawn { stage, source })
}

/// Point-in-time view for the heartbeat.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Heartbeat {
    pub positions: PositionSnapshot,
    pub market_queue_depth: usize,
    pub decision_queue_depth: usize,
}

/// A running pipeline. Dropping it without `join` cancels the stages and
/// detaches their threads.
pub struct Pipeline {
    cancel: CancelToken,
    positions: Arc<Positions>,
    market_depth: DepthProbe<MarketEvent>,
    decision_depth: DepthProbe<DecisionEvent>,
    feed: Option<JoinHandle<FeedStats>>,
    strategy: Option<JoinHandle<StrategyStats>>,
    executor: Option<JoinHandle<ExecutorStats>>,
    strategy_name: &'static str,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl Pipeline {
    /// Validate `args`, then build both queues and spawn the three stages.
    pub fn start(args: &Args) -> Result<Self, PipelineError> {
        args.validate()?;
        let market_q = Queue::<MarketEvent>::new(args.queue_capacity)?;
        let decision_q = Queue::<DecisionEvent>::new(args.queue_capacity)?;
        let market_depth = market_q.probe();
        let decision_depth = decision_q.probe();
        let (md_tx, md_rx) = market_q.split();
        let (dec_tx, dec_rx) = decision_q.split();

        let cancel = CancelToken::new();
        let positions = Arc::new(Positions::new());
        let clock = MonoClock::start();
        let backoff = args.backoff();
        let interval = args.feed_interval();
        let source = build_source(args);
        let policy = build_policy(args);
        let strategy_name = policy.name();

        info!(
            capacity = args.queue_capacity,
            feed = args.feed.as_str(),
            strategy = strategy_name,
            backoff_us = args.backoff_micros,
            feed_interval_us = args.feed_interval_micros,
            "starting pipeline"
        );

        // consumers first so nothing sits in a queue waiting for a thread
        let executor = {
            let (c, p) = (cancel.clone(), positions.clone());
            spawn("executor", move || executor::run(c, dec_rx, p, backoff))
        };
        let strategy = executor.and_then(|ex| {
            let c = cancel.clone();
            spawn("strategy", move || strategy::run(c, md_rx, dec_tx, policy, backoff)).map(|st| (ex, st))
        });
        let all = strategy.and_then(|(ex, st)| {
            let c = cancel.clone();
            spawn("feed", move || feed::run(c, md_tx, source, clock, interval, backoff))
                .map(|fd| (ex, st, fd))
        });
        let (executor, strategy, feed) = match all {
            Ok(handles) => handles,
            Err(e) => {
                // whatever did start sees the flag and exits on its own
                cancel.cancel();
                return Err(e);
            }
        };

        Ok(Self {
            cancel,
            positions,
            market_depth,
            decision_depth,
            feed: Some(feed),
            strategy: Some(strategy),
            executor: Some(executor),
            strategy_name,
            started_at: Utc::now(),
            started: Instant::now(),
        })
    }

    /// Ask every stage to stop; `join` still has to be called to collect them.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Shared aggregate; readers never block the executor.
    pub fn positions(&self) -> Arc<Positions> {
        self.positions.clone()
    }

    pub fn heartbeat(&self) -> Heartbeat {
        let hb = Heartbeat {
            positions: self.positions.snapshot(),
            market_queue_depth: self.market_depth.len(),
            decision_queue_depth: self.decision_depth.len(),
        };
        QUEUE_DEPTH.with_label_values(&["market"]).set(hb.market_queue_depth as i64);
        QUEUE_DEPTH.with_label_values(&["decision"]).set(hb.decision_queue_depth as i64);
        TOTAL_SPENT.set(hb.positions.total_spent);
        TOTAL_EARNED.set(hb.positions.total_earned);
        hb
    }

    /// Cancel, join all three stages, then read the final aggregate.
    pub fn join(mut self) -> Result<RunSummary, PipelineError> {
        self.cancel.cancel();

        let feed = join_stage("feed", self.feed.take());
        let strategy = join_stage("strategy", self.strategy.take());
        let executor = join_stage("executor", self.executor.take());

        let summary = RunSummary {
            started_at: self.started_at,
            finished_at: Utc::now(),
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            strategy_name: self.strategy_name,
            feed: feed?,
            strategy: strategy?,
            executor: executor?,
            positions: self.positions.snapshot(),
            undelivered_market_events: self.market_depth.len(),
            undelivered_decisions: self.decision_depth.len(),
        };
        info!(
            events = summary.feed.generated,
            decisions = summary.strategy.decisions,
            executed = summary.executor.executed,
            position = summary.positions.position,
            "pipeline stopped"
        );
        Ok(summary)
    }

    /// Start, run for `duration`, join.
    pub fn run_for(args: &Args, duration: Duration) -> Result<RunSummary, PipelineError> {
        let pipeline = Self::start(args)?;
        thread::sleep(duration);
        pipeline.join()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn join_stage<T>(stage: &'static str, handle: Option<JoinHandle<T>>) -> Result<T, PipelineError> {
    let handle = handle.ok_or(PipelineError::StagePanicked(stage))?;
    handle.join().map_err(|_| {
        error!(stage, "stage thread panicked");
        PipelineError::StagePanicked(stage)
    })
}

/// Final counters and aggregate, read after every stage has stopped.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub strategy_name: &'static str,
    pub feed: FeedStats,
    pub strategy: StrategyStats,
    pub executor: ExecutorStats,
    pub positions: PositionSnapshot,
    /// Left in the queues at shutdown; never popped.
    pub undelivered_market_events: usize,
    pub undelivered_decisions: usize,
}

impl RunSummary {
    pub fn net_profit(&self) -> f64 {
        self.positions.net_profit()
    }

    pub fn render_table(&self) -> String {
        let p = &self.positions;
        let mut out = String::new();
        let _ = writeln!(out, "=== Summary Start ===");
        let _ = writeln!(out, "Strategy:              {}", self.strategy_name);
        let _ = writeln!(out, "Elapsed:               {:.3}s", self.elapsed_secs);
        let _ = writeln!(out, "Market Events:         {}", self.feed.generated);
        let _ = writeln!(out, "Market Events Dropped: {}", self.feed.dropped);
        let _ = writeln!(out, "Orders Created:        {}", self.strategy.decisions);
        let _ = writeln!(out, "Orders Executed:       {}", self.executor.executed);
        let _ = writeln!(
            out,
            "Orders Undelivered:    {}",
            self.undelivered_decisions as u64 + self.strategy.pending_at_stop
        );
        let _ = writeln!(out, "Total Spent:           ${:.2}", p.total_spent);
        let _ = writeln!(out, "Total Earned:          ${:.2}", p.total_earned);
        let _ = writeln!(out, "Total Quantity Bought: {}", p.total_bought_quantity);
        let _ = writeln!(out, "Open Position:         {}", p.position);
        let _ = writeln!(out, "Avg Cost of Position:  ${:.4}", p.average_cost);
        let _ = writeln!(out, "Net Profit:            ${:.2}", self.net_profit());
        let _ = writeln!(out, "=== Summary End ===");
        out
    }
}
