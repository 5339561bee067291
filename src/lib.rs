//! HomeEye placeholder detector
//!
//! Stands in for a real motion detector on the camera host: it emits
//! simulated motion boxes to the HomeEye box server over a websocket and
//! polls the MJPEG streamer's snapshot endpoint.
//!
//! # Module Structure
//!
//! - `boxes`: Box generation and the `boxes` message envelope
//! - `config`: Defaults, JSON config file, environment overrides
//! - `snapshot`: Best-effort HTTP snapshot fetch (body discarded)
//! - `link`: Websocket client link with reconnect-on-failure
//! - `detector`: The tick loop tying the above together

pub mod boxes;
pub mod config;
pub mod detector;
pub mod link;
pub mod snapshot;

pub use boxes::{BoxGenerator, DetectorMessage, MotionBox, MOTION_LABEL};
pub use config::{ConfigOverrides, DetectorConfig, SnapshotSettings, WsSettings};
pub use detector::{Detector, RunSummary, TickReport};
pub use link::{BoxPublisher, LinkStats, WsLink};
pub use snapshot::{SnapshotFetcher, SnapshotStats};
