// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{Encoder, Gauge, IntCounter, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{info, warn};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Stage throughput --------
pub static MARKET_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("market_events_total", "market events pushed to the strategy queue").unwrap()
});

pub static MARKET_EVENTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("market_events_dropped_total", "market events dropped on a full queue").unwrap()
});

pub static DECISIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("decisions_total", "decisions pushed to the executor queue").unwrap()
});

pub static DECISION_RETRIES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("decision_push_retries_total", "decision pushes retried on a full queue").unwrap()
});

pub static FILLS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("fills_total", "decisions applied to positions").unwrap());

// -------- Queue depth --------
pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("queue_depth", "items waiting (label: queue)"), &["queue"]).unwrap()
});

// -------- Positions --------
pub static POSITION: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("position_qty", "net position").unwrap());

pub static AVG_COST: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("position_avg_cost", "average cost of the long position").unwrap());

pub static TOTAL_SPENT: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("cash_spent_total", "cash paid on buy fills").unwrap());

pub static TOTAL_EARNED: Lazy<Gauge> =
    Lazy::new(|| Gauge::new("cash_earned_total", "cash received on sell fills").unwrap());

// ---- Config visibility ----
pub static CONFIG_STRATEGY: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_strategy", "active strategy (label: strategy)"), &["strategy"])
        .unwrap()
});

pub static CONFIG_QUEUE_CAPACITY: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("config_queue_capacity", "capacity of each queue").unwrap());

pub fn init() {
    // Already-registered errors are ignored so init() can run more than once (tests).
    for m in [
        REGISTRY.register(Box::new(MARKET_EVENTS.clone())),
        REGISTRY.register(Box::new(MARKET_EVENTS_DROPPED.clone())),
        REGISTRY.register(Box::new(DECISIONS.clone())),
        REGISTRY.register(Box::new(DECISION_RETRIES.clone())),
        REGISTRY.register(Box::new(FILLS.clone())),
        REGISTRY.register(Box::new(QUEUE_DEPTH.clone())),
        REGISTRY.register(Box::new(POSITION.clone())),
        REGISTRY.register(Box::new(AVG_COST.clone())),
        REGISTRY.register(Box::new(TOTAL_SPENT.clone())),
        REGISTRY.register(Box::new(TOTAL_EARNED.clone())),
        REGISTRY.register(Box::new(CONFIG_STRATEGY.clone())),
        REGISTRY.register(Box::new(CONFIG_QUEUE_CAPACITY.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics), tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

/// Bind the exposition port and serve it from a dedicated OS thread.
///
/// The thread is detached; it lives until the process exits.
pub fn serve_metrics(port: u16) -> io::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr)?;
    info!(%addr, "metrics listening (GET / or /metrics)");

    thread::Builder::new().name("metrics".into()).spawn(move || {
        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => warn!(?e, "metrics accept error"),
            }
        }
    })?;
    Ok(())
}
