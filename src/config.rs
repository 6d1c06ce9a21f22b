// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : ring_pipeline: three-stage lock-free market event pipeline
Module  : config.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Feed -> strategy -> executor over two bounded SPSC ring buffers,
          folding fills into a lock-free position/cost-basis aggregate,
          with Prometheus metrics and a run summary.
=============================================================================
*/
use std::time::Duration;

use clap::{Parser, ValueEnum};
use thiserror::Error;

/// Market data source
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FeedMode {
    Uniform,
    #[value(alias = "walk")]
    RandomWalk,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::Uniform => "uniform",
            FeedMode::RandomWalk => "random_walk",
        }
    }
}

// ===== Strategy =====
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrategyMode {
    Threshold,
    MovingAverage,
}

impl StrategyMode {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "threshold" | "th" => Some(StrategyMode::Threshold),
            "moving_average" | "movingaverage" | "ma" => Some(StrategyMode::MovingAverage),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyMode::Threshold => "threshold",
            StrategyMode::MovingAverage => "moving_average",
        }
    }
}

fn parse_strategy(s: &str) -> Result<StrategyMode, String> {
    StrategyMode::parse_one(s).ok_or_else(|| format!("unknown strategy '{s}' (threshold|moving_average)"))
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("queue capacity must be > 0")]
    QueueCapacity,
    #[error("price range must satisfy 0 < min < max, got [{0}, {1})")]
    PriceRange(f64, f64),
    #[error("qty max must be > 0")]
    QtyMax,
    #[error("buy threshold {buy} must be below sell threshold {sell}")]
    Thresholds { buy: f64, sell: f64 },
    #[error("max position must be > 0")]
    MaxPosition,
    #[error("moving average window must be > 0")]
    MaWindow,
    #[error("order qty must be > 0")]
    OrderQty,
}

#[derive(Clone, Debug, Parser)]
#[command(name = "ring_pipeline", version, about = "Feed -> strategy -> executor over SPSC ring buffers")]
pub struct Args {
    // run
    /// Seconds to run; 0 runs until Ctrl-C
    #[arg(long, env = "RUN_SECS", default_value_t = 3)]
    pub run_secs: u64,
    #[arg(long, env = "QUEUE_CAPACITY", default_value_t = 1024)]
    pub queue_capacity: usize,
    /// Idle sleep when a queue is empty/full (latency vs CPU)
    #[arg(long, env = "BACKOFF_MICROS", default_value_t = 10)]
    pub backoff_micros: u64,

    // feed
    #[arg(long, env = "FEED_MODE", value_enum, default_value_t = FeedMode::Uniform)]
    pub feed: FeedMode,
    /// Pause between generated events
    #[arg(long, env = "FEED_INTERVAL_MICROS", default_value_t = 100)]
    pub feed_interval_micros: u64,
    #[arg(long, env = "PRICE_MIN", default_value_t = 99.5)]
    pub price_min: f64,
    #[arg(long, env = "PRICE_MAX", default_value_t = 101.0)]
    pub price_max: f64,
    #[arg(long, env = "QTY_MAX", default_value_t = 10)]
    pub qty_max: u32,
    /// RNG seed for a reproducible feed
    #[arg(long, env = "SEED")]
    pub seed: Option<u64>,

    // strategy
    #[arg(long, env = "STRATEGY", value_parser = parse_strategy, default_value = "threshold")]
    pub strategy: StrategyMode,
    #[arg(long, env = "BUY_THRESHOLD", default_value_t = 100.4)]
    pub buy_threshold: f64,
    #[arg(long, env = "SELL_THRESHOLD", default_value_t = 100.7)]
    pub sell_threshold: f64,
    #[arg(long, env = "MAX_POSITION", default_value_t = 10_000)]
    pub max_position: i64,
    #[arg(long, env = "MA_WINDOW", default_value_t = 64)]
    pub ma_window: usize,
    #[arg(long, env = "MA_EDGE", default_value_t = 0.1)]
    pub ma_edge: f64,
    #[arg(long, env = "ORDER_QTY", default_value_t = 10)]
    pub order_qty: u32,

    // reporting
    /// Prometheus port; 0 disables the endpoint
    #[arg(long, env = "METRICS_PORT", default_value_t = 0)]
    pub metrics_port: u16,
    #[arg(long, env = "HEARTBEAT_MILLIS", default_value_t = 1000)]
    pub heartbeat_millis: u64,
    /// Print the final summary as JSON
    #[arg(long, env = "SUMMARY_JSON", default_value_t = false)]
    pub summary_json: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            run_secs: 3,
            queue_capacity: 1024,
            backoff_micros: 10,
            feed: FeedMode::Uniform,
            feed_interval_micros: 100,
            price_min: 99.5,
            price_max: 101.0,
            qty_max: 10,
            seed: None,
            strategy: StrategyMode::Threshold,
            buy_threshold: 100.4,
            sell_threshold: 100.7,
            max_position: 10_000,
            ma_window: 64,
            ma_edge: 0.1,
            order_qty: 10,
            metrics_port: 0,
            heartbeat_millis: 1000,
            summary_json: false,
        }
    }
}

impl Args {
    pub fn backoff(&self) -> Duration { Duration::from_micros(self.backoff_micros) }
    pub fn feed_interval(&self) -> Duration { Duration::from_micros(self.feed_interval_micros) }
    pub fn heartbeat(&self) -> Duration { Duration::from_millis(self.heartbeat_millis.max(1)) }

    /// None = run until Ctrl-C
    pub fn run_for(&self) -> Option<Duration> {
        (self.run_secs > 0).then(|| Duration::from_secs(self.run_secs))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::QueueCapacity);
        }
        if !(self.price_min > 0.0 && self.price_min < self.price_max && self.price_max.is_finite()) {
            return Err(ConfigError::PriceRange(self.price_min, self.price_max));
        }
        if self.qty_max == 0 {
            return Err(ConfigError::QtyMax);
        }
        if !(self.buy_threshold < self.sell_threshold) {
            return Err(ConfigError::Thresholds { buy: self.buy_threshold, sell: self.sell_threshold });
        }
        if self.max_position <= 0 {
            return Err(ConfigError::MaxPosition);
        }
        if self.ma_window == 0 {
            return Err(ConfigError::MaWindow);
        }
        if self.order_qty == 0 {
            return Err(ConfigError::OrderQty);
        }
        Ok(())
    }
}

/// `.env` first (if any), then CLI flags with env fallbacks.
pub fn load() -> Result<Args, ConfigError> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    args.validate()?;
    Ok(args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(Args::default().validate(), Ok(()));
        assert_eq!(Args::default().run_for(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn cli_flags_override_defaults() {
        let args = Args::try_parse_from([
            "ring_pipeline",
            "--queue-capacity",
            "16",
            "--strategy",
            "ma",
            "--feed",
            "walk",
            "--run-secs",
            "0",
        ])
        .unwrap();
        assert_eq!(args.queue_capacity, 16);
        assert_eq!(args.strategy, StrategyMode::MovingAverage);
        assert_eq!(args.feed, FeedMode::RandomWalk);
        assert_eq!(args.run_for(), None);
    }

    #[test]
    fn unknown_strategy_is_a_parse_error() {
        assert!(Args::try_parse_from(["ring_pipeline", "--strategy", "yolo"]).is_err());
    }

    #[test]
    fn validate_rejects_inconsistent_values() {
        let a = Args { queue_capacity: 0, ..Args::default() };
        assert_eq!(a.validate(), Err(ConfigError::QueueCapacity));

        let a = Args { buy_threshold: 101.0, sell_threshold: 100.0, ..Args::default() };
        assert!(matches!(a.validate(), Err(ConfigError::Thresholds { .. })));

        let a = Args { price_min: 101.0, price_max: 100.0, ..Args::default() };
        assert!(matches!(a.validate(), Err(ConfigError::PriceRange(..))));

        let a = Args { ma_window: 0, ..Args::default() };
        assert_eq!(a.validate(), Err(ConfigError::MaWindow));
    }
}
