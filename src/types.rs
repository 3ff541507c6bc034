use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ─── Keyboard layout ────────────────────────────────────────────────────────

/// Number of keys on a standard piano, one analysis band per key.
pub const NOTE_COUNT: usize = 88;
/// MIDI note of the lowest key (A0).
pub const LOWEST_NOTE: u8 = 21;
/// MIDI note of the highest key (C8).
pub const HIGHEST_NOTE: u8 = 108;

const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Scientific pitch name for a MIDI note: 69 → "A4", 21 → "A0", 108 → "C8".
pub fn note_name(midi_note: u8) -> String {
    let octave = midi_note as i32 / 12 - 1;
    format!("{}{}", PITCH_CLASSES[midi_note as usize % 12], octave)
}

/// MIDI note for a bank index (0 → A0, 87 → C8).
pub fn note_for_index(index: usize) -> u8 {
    LOWEST_NOTE + index as u8
}

// ─── Audio data ─────────────────────────────────────────────────────────────

/// A block of mono audio delivered by a non-realtime source (WAV playback, tests).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Microseconds since session start (timestamp of first sample)
    pub timestamp_us: u64,
    /// Mono f32 samples, normalized -1.0 to 1.0
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

// ─── Snapshot messages ──────────────────────────────────────────────────────

/// What the realtime side should copy into a request buffer.
/// Serializes as "power-snapshot" / "waveform-snapshot".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SnapshotKind {
    /// 88 smoothed note powers, ascending note order.
    #[serde(rename = "power-snapshot")]
    Power,
    /// Most recent samples from the ring buffer, oldest first.
    #[serde(rename = "waveform-snapshot")]
    Waveform,
}

impl fmt::Display for SnapshotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotKind::Power => write!(f, "power-snapshot"),
            SnapshotKind::Waveform => write!(f, "waveform-snapshot"),
        }
    }
}

/// Control → realtime. The buffer is moved; the sender keeps no access to it.
#[derive(Debug)]
pub struct SnapshotRequest {
    pub request_id: u64,
    pub kind: SnapshotKind,
    pub buffer: Vec<f32>,
}

/// Whether the realtime side was able to fill the buffer it was handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillStatus {
    Filled,
    /// Buffer had the wrong shape for its kind; returned untouched.
    Malformed,
}

/// Realtime → control. Carries the same buffer back, now filled.
#[derive(Debug)]
pub struct SnapshotResponse {
    pub request_id: u64,
    pub kind: SnapshotKind,
    pub buffer: Vec<f32>,
    pub status: FillStatus,
}

// ─── Rendered frame ─────────────────────────────────────────────────────────

/// Most recent completed snapshots, as handed to renderers each display frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectrumFrame {
    /// Frame sequence number (monotonic per monitor)
    pub seq: u64,
    /// Microseconds since session start
    pub timestamp_us: u64,
    /// Smoothed power per key, index 0 = A0
    pub power: Vec<f32>,
    /// Latest waveform window, oldest sample first
    pub waveform: Vec<f32>,
}

impl SpectrumFrame {
    /// The key with the most power, if any key carries energy at all.
    pub fn loudest_note(&self) -> Option<(u8, f32)> {
        self.power
            .iter()
            .enumerate()
            .filter(|(_, p)| **p > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, &p)| (note_for_index(i), p))
    }

    /// Power per key in dB (floored, see `dsp::power_to_db`).
    pub fn power_db(&self) -> Vec<f32> {
        self.power.iter().map(|&p| crate::dsp::power_to_db(p)).collect()
    }
}

impl fmt::Display for SpectrumFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.loudest_note() {
            Some((note, p)) => write!(
                f,
                "#{:<6} t={:>10}µs  peak={:<4} {:>6.1} dB",
                self.seq,
                self.timestamp_us,
                note_name(note),
                crate::dsp::power_to_db(p)
            ),
            None => write!(f, "#{:<6} t={:>10}µs  peak=---", self.seq, self.timestamp_us),
        }
    }
}

// ─── Session clock ──────────────────────────────────────────────────────────

/// Monotonic clock for the analysis session.
#[derive(Clone)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_note_names() {
        assert_eq!(note_name(69), "A4");
        assert_eq!(note_name(LOWEST_NOTE), "A0");
        assert_eq!(note_name(HIGHEST_NOTE), "C8");
        assert_eq!(note_name(61), "C#4");
        assert_eq!(note_for_index(NOTE_COUNT - 1), HIGHEST_NOTE);
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&SnapshotKind::Power).unwrap();
        assert_eq!(json, "\"power-snapshot\"");
        let kind: SnapshotKind = serde_json::from_str("\"waveform-snapshot\"").unwrap();
        assert_eq!(kind, SnapshotKind::Waveform);
        assert_eq!(SnapshotKind::Waveform.to_string(), "waveform-snapshot");
    }

    #[test]
    fn test_loudest_note() {
        let mut power = vec![0.0f32; NOTE_COUNT];
        power[48] = 2.5;
        power[10] = 0.3;
        let frame = SpectrumFrame {
            seq: 1,
            timestamp_us: 0,
            power,
            waveform: Vec::new(),
        };
        assert_eq!(frame.loudest_note(), Some((69, 2.5)));

        let silent = SpectrumFrame {
            seq: 2,
            timestamp_us: 0,
            power: vec![0.0; NOTE_COUNT],
            waveform: Vec::new(),
        };
        assert_eq!(silent.loudest_note(), None);
    }
}
