//! Simulated motion boxes and the message envelope carrying them.
//!
//! Boxes are ephemeral: generated fresh every tick, serialized into a
//! `boxes` envelope and dropped. Nothing here looks at pixels.

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const MOTION_LABEL: &str = "motion";
pub const DEFAULT_BOX_PROBABILITY: f64 = 0.5;

/// Upper bound (exclusive) for the top-left corner on either axis.
pub const MAX_ORIGIN: f64 = 0.6;
/// Smallest width/height of a generated box.
pub const MIN_EXTENT: f64 = 0.2;
/// Random span added on top of `MIN_EXTENT`.
pub const EXTENT_SPAN: f64 = 0.3;

/// A rectangle in normalized frame coordinates (0..1).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub label: String,
}

impl MotionBox {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self {
            x: rng.gen::<f64>() * MAX_ORIGIN,
            y: rng.gen::<f64>() * MAX_ORIGIN,
            w: MIN_EXTENT + rng.gen::<f64>() * EXTENT_SPAN,
            h: MIN_EXTENT + rng.gen::<f64>() * EXTENT_SPAN,
            label: MOTION_LABEL.to_string(),
        }
    }
}

/// Messages exchanged with the box server.
///
/// Outbound frames are always `boxes`. The server greets new clients with
/// `hello`, which is decoded only so it can be logged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DetectorMessage {
    Boxes { boxes: Vec<MotionBox> },
    Hello { ts: u64 },
}

impl DetectorMessage {
    pub fn boxes(boxes: Vec<MotionBox>) -> Self {
        DetectorMessage::Boxes { boxes }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("serialize detector message")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("parse detector message")
    }

    pub fn box_count(&self) -> usize {
        match self {
            DetectorMessage::Boxes { boxes } => boxes.len(),
            DetectorMessage::Hello { .. } => 0,
        }
    }
}

/// Coin-flip box source.
pub struct BoxGenerator {
    rng: StdRng,
    probability: f64,
}

impl BoxGenerator {
    /// Generator seeded from OS entropy.
    pub fn new(probability: f64) -> Result<Self> {
        Self::with_rng(StdRng::from_entropy(), probability)
    }

    /// Deterministic generator, for reproducible runs and tests.
    pub fn seeded(probability: f64, seed: u64) -> Result<Self> {
        Self::with_rng(StdRng::seed_from_u64(seed), probability)
    }

    fn with_rng(rng: StdRng, probability: f64) -> Result<Self> {
        validate_probability(probability)?;
        Ok(Self { rng, probability })
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Returns zero boxes or one box.
    pub fn generate(&mut self) -> Vec<MotionBox> {
        let mut boxes = Vec::with_capacity(1);
        if self.rng.gen_bool(self.probability) {
            boxes.push(MotionBox::random(&mut self.rng));
        }
        boxes
    }
}

pub fn validate_probability(probability: f64) -> Result<()> {
    if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
        return Err(anyhow!(
            "box probability must be within [0, 1], got {}",
            probability
        ));
    }
    Ok(())
}
