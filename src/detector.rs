//! The placeholder detection loop.
//!
//! Each tick: optional snapshot fetch, coin-flip box generation, envelope
//! serialization, best-effort publish. Network failures are logged and
//! swallowed; the loop only stops on shutdown.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::boxes::{BoxGenerator, DetectorMessage};
use crate::config::DetectorConfig;
use crate::link::BoxPublisher;
use crate::snapshot::SnapshotFetcher;

const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Outcome of a single tick.
#[derive(Clone, Debug)]
pub struct TickReport {
    pub message: DetectorMessage,
    /// Bytes discarded from the snapshot, if a fetch ran and succeeded.
    pub snapshot_bytes: Option<u64>,
    pub delivered: bool,
}

/// Totals for a finished run.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub ticks: u64,
    pub delivered: u64,
    pub boxes_generated: u64,
    pub loop_errors: u64,
}

pub struct Detector<P: BoxPublisher> {
    interval: Duration,
    generator: BoxGenerator,
    snapshot: Option<SnapshotFetcher>,
    publisher: P,
}

impl<P: BoxPublisher> Detector<P> {
    pub fn new(config: &DetectorConfig, generator: BoxGenerator, publisher: P) -> Self {
        let snapshot = config
            .snapshot
            .enabled
            .then(|| SnapshotFetcher::new(&config.snapshot));
        Self {
            interval: config.interval,
            generator,
            snapshot,
            publisher,
        }
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn snapshot_fetcher(&self) -> Option<&SnapshotFetcher> {
        self.snapshot.as_ref()
    }

    /// Run one iteration.
    pub fn tick(&mut self) -> Result<TickReport> {
        let snapshot_bytes = match self.snapshot.as_mut() {
            Some(fetcher) => match fetcher.fetch() {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    log::debug!("snapshot fetch skipped: {:#}", e);
                    None
                }
            },
            None => None,
        };

        let message = DetectorMessage::boxes(self.generator.generate());
        let json = message.to_json()?;

        let delivered = match self.publisher.publish(&json) {
            Ok(()) => {
                log::info!("sent {}", json);
                true
            }
            Err(e) => {
                log::warn!("{} publish failed: {:#}", self.publisher.name(), e);
                log::info!("no ws, would send: {}", json);
                false
            }
        };

        Ok(TickReport {
            message,
            snapshot_bytes,
            delivered,
        })
    }

    /// Tick until `shutdown` is set, or until `max_ticks` iterations when
    /// non-zero. The publisher is closed before returning.
    pub fn run(&mut self, shutdown: &AtomicBool, max_ticks: u64) -> RunSummary {
        let mut summary = RunSummary::default();
        while !shutdown.load(Ordering::SeqCst) {
            match self.tick() {
                Ok(report) => {
                    summary.boxes_generated += report.message.box_count() as u64;
                    if report.delivered {
                        summary.delivered += 1;
                    }
                }
                Err(e) => {
                    summary.loop_errors += 1;
                    log::warn!("detector loop error: {:#}", e);
                }
            }
            summary.ticks += 1;
            if max_ticks != 0 && summary.ticks >= max_ticks {
                break;
            }
            sleep_unless_shutdown(self.interval, shutdown);
        }

        self.publisher.close();
        log::info!(
            "detector stopped after {} ticks ({} delivered, {} boxes)",
            summary.ticks,
            summary.delivered,
            summary.boxes_generated
        );
        summary
    }
}

fn sleep_unless_shutdown(total: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + total;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
