use crate::dsp::power_to_db;
use crate::types::*;
use crossbeam_channel::Receiver;
use std::fmt::Write as _;
use std::io::{self, Write};

/// Rows in the keyboard spectrum chart.
const CHART_HEIGHT: usize = 8;
/// dB span shown on the chart, measured down from the loudest key.
const CHART_RANGE_DB: f32 = 48.0;
/// Width of the waveform sparkline.
const WAVE_WIDTH: usize = 88;
/// Entries in the "loudest keys" list.
const TOP_N: usize = 5;

const LEVELS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Renders a live ASCII spectrum: one column per key, A0 on the left.
pub struct ConsoleDisplay {
    rx: Receiver<SpectrumFrame>,
    update_hz: u32,
}

impl ConsoleDisplay {
    pub fn new(rx: Receiver<SpectrumFrame>, update_hz: u32) -> Self {
        Self { rx, update_hz }
    }

    /// Blocks until the frame source hangs up.
    pub fn run(&self) {
        let min_gap_us = if self.update_hz == 0 {
            50_000
        } else {
            1_000_000 / self.update_hz as u64
        };
        let mut last_us: Option<u64> = None;
        let mut stdout = io::stdout();

        for frame in self.rx.iter() {
            if let Some(t) = last_us {
                if frame.timestamp_us.saturating_sub(t) < min_gap_us {
                    continue;
                }
            }
            last_us = Some(frame.timestamp_us);

            // Clear screen and move cursor home
            print!("\x1b[2J\x1b[H");
            print!("{}", render(&frame));
            let _ = stdout.flush();
        }
    }
}

/// Full dashboard for one frame as a string.
pub fn render(frame: &SpectrumFrame) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "KEYBOARD SPECTRUM  {}", frame);
    let _ = writeln!(out);

    for row in spectrum_rows(&frame.power) {
        let _ = writeln!(out, "│{}│", row);
    }
    let _ = writeln!(out, "└{}┘", key_ruler());
    let _ = writeln!(out);

    let _ = writeln!(out, "Wave │{}│", sparkline(&frame.waveform, WAVE_WIDTH));
    let _ = writeln!(out);

    let _ = writeln!(out, "Loudest:");
    for (note, db) in loudest(&frame.power, TOP_N) {
        let _ = writeln!(out, "  {:<4} ({:>3})  {:>6.1} dB", note_name(note), note, db);
    }
    out
}

/// Chart rows, top row first. Each column is scaled against the loudest key.
fn spectrum_rows(power: &[f32]) -> Vec<String> {
    let db: Vec<f32> = power.iter().map(|&p| power_to_db(p)).collect();
    let top = db.iter().cloned().fold(f32::MIN, f32::max);
    // Height of each column in eighths of a row
    let heights: Vec<usize> = db
        .iter()
        .map(|&d| {
            let frac = ((d - (top - CHART_RANGE_DB)) / CHART_RANGE_DB).clamp(0.0, 1.0);
            if top <= crate::dsp::DB_FLOOR {
                0
            } else {
                (frac * (CHART_HEIGHT * 8) as f32).round() as usize
            }
        })
        .collect();

    (0..CHART_HEIGHT)
        .rev()
        .map(|row| {
            heights
                .iter()
                .map(|&h| LEVELS[h.saturating_sub(row * 8).min(8)])
                .collect()
        })
        .collect()
}

/// Marks every C under the chart.
fn key_ruler() -> String {
    (0..NOTE_COUNT)
        .map(|i| if note_for_index(i) % 12 == 0 { '┬' } else { '─' })
        .collect()
}

/// One-line waveform: each cell shows the peak magnitude of its slice.
fn sparkline(samples: &[f32], width: usize) -> String {
    if samples.is_empty() {
        return " ".repeat(width);
    }
    let width = width.min(samples.len()).max(1);
    let per_cell = samples.len() as f32 / width as f32;
    (0..width)
        .map(|c| {
            let start = (c as f32 * per_cell) as usize;
            let end = (((c + 1) as f32 * per_cell) as usize).clamp(start + 1, samples.len());
            let peak = samples[start..end]
                .iter()
                .fold(0.0f32, |m, s| m.max(s.abs()))
                .min(1.0);
            LEVELS[(peak * 8.0).round() as usize]
        })
        .collect()
}

/// The `n` keys with the most power, loudest first, skipping silent keys.
fn loudest(power: &[f32], n: usize) -> Vec<(u8, f32)> {
    let mut ranked: Vec<(u8, f32)> = power
        .iter()
        .enumerate()
        .filter(|(_, p)| **p > 0.0)
        .map(|(i, &p)| (note_for_index(i), power_to_db(p)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(n);
    ranked
}
