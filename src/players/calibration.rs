//! Per-player calibration baselines

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::PlayerId;
use crate::device::protocol::RawSample;

/// Baseline used before a device has ever been calibrated; high enough that
/// ordinary readings never reach the classification thresholds.
pub const DEFAULT_BASELINE: f64 = 1000.0;

/// Baseline intensities a reading is normalized against
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Calibration {
    pub fn is_finite(&self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite()
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            r: DEFAULT_BASELINE,
            g: DEFAULT_BASELINE,
            b: DEFAULT_BASELINE,
        }
    }
}

impl From<RawSample> for Calibration {
    fn from(sample: RawSample) -> Self {
        Self {
            r: sample.r,
            g: sample.g,
            b: sample.b,
        }
    }
}

/// Calibration baselines keyed by player
#[derive(Debug, Clone, Default)]
pub struct CalibrationStore {
    baselines: HashMap<PlayerId, Calibration>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the baseline of `player` with `sample`
    pub fn record(&mut self, player: PlayerId, sample: RawSample) -> Calibration {
        let calibration = Calibration::from(sample);
        self.baselines.insert(player, calibration);
        calibration
    }

    /// Install a baseline loaded from settings
    pub fn set(&mut self, player: PlayerId, calibration: Calibration) {
        self.baselines.insert(player, calibration);
    }

    pub fn get(&self, player: PlayerId) -> Calibration {
        self.baselines.get(&player).copied().unwrap_or_default()
    }

    pub fn forget(&mut self, player: PlayerId) {
        self.baselines.remove(&player);
    }
}
