// ===============================
// src/main.rs
// ===============================
/*
 # default: threshold strategy, 3 s run
 cargo run --release

 # moving average, run until Ctrl-C, metrics on :9898
 STRATEGY=ma RUN_SECS=0 METRICS_PORT=9898 cargo run --release
 curl -s localhost:9898/metrics | egrep '^(position_qty|queue_depth|fills_total)'
*/
/*
=============================================================================
Project : ring_pipeline: three-stage lock-free market event pipeline
Module  : main.rs
Version : 0.1.0
License : MIT (see LICENSE)

Summary : Feed -> strategy -> executor over two bounded SPSC ring buffers,
          folding fills into a lock-free position/cost-basis aggregate,
          with Prometheus metrics and a run summary.
=============================================================================
*/
use std::process::ExitCode;

use tokio::{
    select,
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ring_pipeline::{config, metrics, Pipeline};

#[tokio::main]
async fn main() -> ExitCode {
    // ---- Logging ----
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ---- Load config ----
    let args = match config::load() {
        Ok(a) => a,
        Err(e) => {
            error!(%e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    // ---- Metrics ----
    metrics::init();
    metrics::CONFIG_STRATEGY.with_label_values(&[args.strategy.as_str()]).set(1);
    metrics::CONFIG_QUEUE_CAPACITY.set(args.queue_capacity as i64);
    if args.metrics_port != 0 {
        if let Err(e) = metrics::serve_metrics(args.metrics_port) {
            warn!(?e, port = args.metrics_port, "metrics endpoint disabled");
        }
    }

    info!(
        run_secs = args.run_secs,
        queue_capacity = args.queue_capacity,
        feed = args.feed.as_str(),
        strategy = args.strategy.as_str(),
        seed = ?args.seed,
        "startup config"
    );

    // ---- Pipeline ----
    let pipeline = match Pipeline::start(&args) {
        Ok(p) => p,
        Err(e) => {
            error!(%e, "pipeline failed to start");
            return ExitCode::FAILURE;
        }
    };

    // ---- Run until deadline / Ctrl-C, heartbeat meanwhile ----
    let run_for = args.run_for();
    let deadline = async move {
        match run_for {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    let mut heartbeat = interval(args.heartbeat());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            _ = &mut deadline => {
                info!("run time elapsed");
                break;
            },
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res { warn!(?e, "ctrl-c listener failed"); }
                info!("stop requested");
                break;
            },
            _ = heartbeat.tick() => {
                let hb = pipeline.heartbeat();
                info!(
                    position = hb.positions.position,
                    avg_cost = hb.positions.average_cost,
                    fills = hb.positions.fills_applied,
                    market_q = hb.market_queue_depth,
                    decision_q = hb.decision_queue_depth,
                    "heartbeat"
                );
            }
        }
    }

    // ---- Join (blocking) & summary ----
    let summary = match tokio::task::spawn_blocking(move || pipeline.join()).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            error!(%e, "pipeline shutdown failed");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            error!(?e, "join task failed");
            return ExitCode::FAILURE;
        }
    };

    if args.summary_json {
        match serde_json::to_string_pretty(&summary) {
            Ok(s) => println!("{s}"),
            Err(e) => error!(?e, "summary serialize failed"),
        }
    } else {
        print!("{}", summary.render_table());
    }
    ExitCode::SUCCESS
}
