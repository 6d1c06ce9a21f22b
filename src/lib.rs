// ===============================
// src/lib.rs
// ===============================
//! Three-stage market event pipeline over bounded lock-free SPSC queues.
//!
//! ```text
//! feed ──▶ Queue<MarketEvent> ──▶ strategy ──▶ Queue<DecisionEvent> ──▶ executor ──▶ Positions
//! ```
//!
//! Each stage runs on its own OS thread ([`stage::run`]), polls its queue
//! without blocking, sleeps a short backoff when there is nothing to do, and
//! stops at the next iteration after [`stage::CancelToken::cancel`].
//! [`positions::Positions`] keeps position and average cost in one composite
//! value so concurrent readers never see a torn pair.

pub mod clock;
pub mod config;
pub mod domain;
pub mod executor;
pub mod feed;
pub mod metrics;
pub mod pipeline;
pub mod positions;
pub mod queue;
pub mod stage;
pub mod strategy;

pub use domain::{DecisionEvent, MarketEvent, Side};
pub use pipeline::{Pipeline, PipelineError, RunSummary};
pub use positions::{Book, PositionSnapshot, Positions};
pub use queue::{Consumer, Producer, Queue, QueueError};
pub use stage::{CancelToken, Step};
