//! Best-effort HTTP snapshot fetch.
//!
//! The body is read to completion and discarded. The detector never
//! decodes it; the fetch only keeps the camera streamer's snapshot path warm.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::Duration;

use crate::config::SnapshotSettings;

const MAX_SNAPSHOT_BYTES: u64 = 5 * 1024 * 1024;

/// Fetch statistics.
#[derive(Clone, Debug, Default)]
pub struct SnapshotStats {
    pub attempts: u64,
    pub successes: u64,
    pub bytes_read: u64,
}

pub struct SnapshotFetcher {
    url: String,
    agent: ureq::Agent,
    stats: SnapshotStats,
}

impl SnapshotFetcher {
    pub fn new(settings: &SnapshotSettings) -> Self {
        Self::with_timeout(&settings.url, settings.timeout)
    }

    pub fn with_timeout(url: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self {
            url: url.to_string(),
            agent,
            stats: SnapshotStats::default(),
        }
    }

    /// Fetch the snapshot and return how many body bytes were discarded.
    pub fn fetch(&mut self) -> Result<u64> {
        self.stats.attempts += 1;
        let response = self
            .agent
            .get(&self.url)
            .call()
            .with_context(|| format!("fetch snapshot from {}", self.url))?;
        let mut sink = std::io::sink();
        let read = std::io::copy(
            &mut response.into_reader().take(MAX_SNAPSHOT_BYTES + 1),
            &mut sink,
        )
        .context("read snapshot body")?;
        if read > MAX_SNAPSHOT_BYTES {
            return Err(anyhow!("snapshot exceeded {} bytes", MAX_SNAPSHOT_BYTES));
        }
        self.stats.successes += 1;
        self.stats.bytes_read += read;
        Ok(read)
    }

    pub fn stats(&self) -> SnapshotStats {
        self.stats.clone()
    }
}
