//! Shared DSP helpers: pitch math, RMS, dB conversion, and test signal generators.

/// Equal-tempered frequency of a MIDI note, A4 (69) = 440 Hz.
pub fn midi_to_hz(midi_note: f64) -> f64 {
    440.0 * 2.0f64.powf((midi_note - 69.0) / 12.0)
}

/// Root mean square of an audio buffer.
pub fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Floor for dB conversion; anything quieter reads as this.
pub const DB_FLOOR: f32 = -120.0;

/// Power (amplitude squared) to decibels, floored at `DB_FLOOR`.
pub fn power_to_db(power: f32) -> f32 {
    if power <= 0.0 {
        return DB_FLOOR;
    }
    (10.0 * power.log10()).max(DB_FLOOR)
}

/// Test signal generators for unit tests.
#[cfg(test)]
pub mod test_helpers {
    use std::f64::consts::PI;

    /// Generate a mono sine wave.
    pub fn sine_wave(freq_hz: f64, amp: f64, sr: u32, ms: u32) -> Vec<f32> {
        let n = (sr as u64 * ms as u64 / 1000) as usize;
        (0..n)
            .map(|i| (amp * (2.0 * PI * freq_hz * i as f64 / sr as f64).sin()) as f32)
            .collect()
    }

    /// Generate a mix of sine waves at equal amplitude per voice.
    pub fn multi_sine(freqs: &[f64], amp_per_voice: f64, sr: u32, ms: u32) -> Vec<f32> {
        let n = (sr as u64 * ms as u64 / 1000) as usize;
        (0..n)
            .map(|i| {
                let t = i as f64 / sr as f64;
                freqs
                    .iter()
                    .map(|&f| amp_per_voice * (2.0 * PI * f * t).sin())
                    .sum::<f64>() as f32
            })
            .collect()
    }
}
