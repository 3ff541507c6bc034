//! Analyzer tunables, persisted as JSON.

use crate::note_estimator::{clamp_smoothing, DEFAULT_SMOOTHING};
use crate::peaking_filter::DEFAULT_PEAK_GAIN_DB;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Boost at each key's fundamental (dB).
    pub peak_gain_db: f64,
    /// EMA pole for the per-key power; 0 = no smoothing.
    pub smoothing: f64,
    /// Seconds of raw audio kept for waveform snapshots.
    pub ring_seconds: f64,
    /// Samples per block for file-fed sources.
    pub block_size: usize,
    /// Samples per waveform snapshot.
    pub waveform_len: usize,
    /// Snapshot channel depth, and max requests in flight.
    pub snapshot_capacity: usize,
    /// Monitor refresh rate (Hz).
    pub display_fps: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            peak_gain_db: DEFAULT_PEAK_GAIN_DB,
            smoothing: DEFAULT_SMOOTHING,
            ring_seconds: 1.0,
            block_size: 128,
            waveform_len: 128,
            snapshot_capacity: 16,
            display_fps: 60,
        }
    }
}

impl AnalyzerConfig {
    /// Load from a JSON file. Returns None if file is absent or malformed.
    pub fn load(path: &Path) -> Option<Self> {
        let data = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str::<Self>(&data) {
            Ok(c) => {
                info!("Loaded config from {:?}", path);
                Some(c.sanitized())
            }
            Err(e) => {
                warn!("Failed to parse config file {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)?;
        info!("Config saved to {:?}", path);
        Ok(())
    }

    /// Pull out-of-range values back to something usable.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if !(0.0..1.0).contains(&self.smoothing) {
            warn!("smoothing {} outside [0, 1), clamping", self.smoothing);
            self.smoothing = clamp_smoothing(self.smoothing);
        }
        if !self.peak_gain_db.is_finite() {
            warn!("peak_gain_db {} not finite, using default", self.peak_gain_db);
            self.peak_gain_db = defaults.peak_gain_db;
        }
        if !(self.ring_seconds > 0.0 && self.ring_seconds.is_finite()) {
            warn!("ring_seconds {} invalid, using default", self.ring_seconds);
            self.ring_seconds = defaults.ring_seconds;
        }
        if self.block_size == 0 {
            self.block_size = defaults.block_size;
        }
        if self.waveform_len == 0 {
            self.waveform_len = defaults.waveform_len;
        }
        if self.snapshot_capacity == 0 {
            self.snapshot_capacity = defaults.snapshot_capacity;
        }
        if self.display_fps == 0 {
            self.display_fps = defaults.display_fps;
        }
        self
    }

    /// Ring buffer slots at `sample_rate`.
    pub fn ring_capacity(&self, sample_rate: f64) -> usize {
        ((sample_rate * self.ring_seconds).round() as usize).max(1)
    }
}
