//! box_detector - Placeholder motion detector for HomeEye.
//!
//! This daemon:
//! 1. Connects to the box server websocket (retrying every tick if down)
//! 2. Fetches the streamer snapshot to keep it warm (body discarded)
//! 3. Publishes zero or one simulated motion box per tick
//! 4. Stops cleanly on Ctrl-C / SIGTERM

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use homeeye_detector::{BoxGenerator, ConfigOverrides, Detector, DetectorConfig, WsLink};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Publish simulated motion boxes to the HomeEye box server"
)]
struct Args {
    /// Websocket URL of the box server.
    #[arg(long)]
    ws_url: Option<String>,

    /// Snapshot URL fetched each tick.
    #[arg(long)]
    snapshot_url: Option<String>,

    /// Skip the snapshot fetch.
    #[arg(long)]
    no_snapshot: bool,

    /// Delay between ticks in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Probability that a tick carries a box (0..=1).
    #[arg(long)]
    box_probability: Option<f64>,

    /// Seed for reproducible boxes.
    #[arg(long, env = "HOMEEYE_SEED")]
    seed: Option<u64>,

    /// Stop after this many ticks (0 runs until interrupted).
    #[arg(long, env = "HOMEEYE_MAX_TICKS", default_value_t = 0)]
    max_ticks: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = DetectorConfig::load()?;
    config.apply_overrides(&ConfigOverrides {
        ws_url: args.ws_url.clone(),
        snapshot_url: args.snapshot_url.clone(),
        disable_snapshot: args.no_snapshot,
        interval_ms: args.interval_ms,
        box_probability: args.box_probability,
    })?;

    let generator = match args.seed {
        Some(seed) => BoxGenerator::seeded(config.box_probability, seed)?,
        None => BoxGenerator::new(config.box_probability)?,
    };

    let mut link = WsLink::new(&config.ws);
    if let Err(e) = link.connect() {
        log::warn!("ws connect failed: {:#}", e);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    log::info!(
        "box_detector running: ws {} snapshot {} every {}ms (box probability {})",
        config.ws.url,
        if config.snapshot.enabled {
            config.snapshot.url.as_str()
        } else {
            "disabled"
        },
        config.interval.as_millis(),
        generator.probability()
    );

    let mut detector = Detector::new(&config, generator, link);
    let summary = detector.run(&shutdown, args.max_ticks);
    let stats = detector.publisher().stats();
    log::info!(
        "link totals: {} frames sent, {} connects, {} reconnects, {} send failures",
        stats.frames_sent,
        stats.connect_attempts,
        stats.reconnects,
        stats.send_failures
    );
    if let Some(fetcher) = detector.snapshot_fetcher() {
        let snap = fetcher.stats();
        log::info!(
            "snapshot totals: {}/{} fetches ok, {} bytes discarded",
            snap.successes,
            snap.attempts,
            snap.bytes_read
        );
    }
    log::debug!("run summary: {:?}", summary);
    Ok(())
}
