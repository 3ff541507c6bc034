use crate::note_estimator::{clamp_smoothing, DualPhaseNoteEstimator};
use crate::peaking_filter::Degenerate;
use crate::ring_buffer::RingBuffer;
use crate::snapshot::SnapshotSource;
use crate::types::{note_for_index, NOTE_COUNT};
use log::{debug, warn};

/// One quadrature estimator per piano key plus the raw-audio ring buffer.
///
/// Everything is allocated in [`FilterBank::new`]. `process_block` and the
/// snapshot fills only touch preallocated state, so they are safe to call
/// from the audio callback.
pub struct FilterBank {
    /// Index 0 = A0 (MIDI 21), index 87 = C8 (MIDI 108).
    filters: Vec<DualPhaseNoteEstimator>,
    ring: RingBuffer,
    sample_rate: f64,
}

impl FilterBank {
    pub fn new(
        sample_rate: f64,
        peak_gain_db: f64,
        smoothing: f64,
        ring_capacity: usize,
    ) -> Self {
        let smoothing = {
            let clamped = clamp_smoothing(smoothing);
            if clamped != smoothing {
                warn!("Smoothing {} outside [0, 1), using {}", smoothing, clamped);
            }
            clamped
        };
        let filters: Vec<_> = (0..NOTE_COUNT)
            .map(|i| {
                DualPhaseNoteEstimator::with_smoothing(
                    note_for_index(i),
                    sample_rate,
                    peak_gain_db,
                    smoothing,
                )
            })
            .collect();
        debug!(
            "Filter bank: {} notes @ {} Hz, delays {}..{} samples, ring {} samples",
            filters.len(),
            sample_rate,
            filters.last().map_or(0, |f| f.delay_len()),
            filters.first().map_or(0, |f| f.delay_len()),
            ring_capacity
        );
        Self {
            filters,
            ring: RingBuffer::new(ring_capacity),
            sample_rate,
        }
    }

    /// Feed one mono block through the ring buffer and every key. Empty is a no-op.
    pub fn process_block(&mut self, block: &[f32]) {
        if block.is_empty() {
            return;
        }
        self.ring.write(block);
        // Keys are independent; note-major order keeps each filter's state hot.
        for est in &mut self.filters {
            for &s in block {
                est.process(s as f64);
            }
        }
    }

    /// Analyze the first of several planar channels. No channels is a no-op.
    pub fn process_channels(&mut self, channels: &[&[f32]]) {
        if let Some(first) = channels.first() {
            self.process_block(first);
        }
    }

    /// Copy the smoothed power of each key into `out`, ascending note order.
    /// Extra slots in `out` are left alone; missing ones are skipped.
    pub fn fill_power(&self, out: &mut [f32]) {
        for (slot, est) in out.iter_mut().zip(&self.filters) {
            *slot = est.instant_power() as f32;
        }
    }

    /// Most recent `out.len()` samples, oldest first.
    pub fn fill_waveform(&self, out: &mut [f32]) {
        self.ring.read(out);
    }

    pub fn estimators(&self) -> &[DualPhaseNoteEstimator] {
        &self.filters
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn ring_capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Keys whose filters fell back to pass-through, with the reason.
    pub fn diagnostics(&self) -> Vec<(u8, Degenerate)> {
        self.filters
            .iter()
            .filter_map(|e| e.filter().diagnostic().map(|d| (e.midi_note(), d)))
            .collect()
    }
}

impl SnapshotSource for FilterBank {
    fn fill_power(&self, out: &mut [f32]) {
        FilterBank::fill_power(self, out);
    }

    fn fill_waveform(&self, out: &mut [f32]) {
        FilterBank::fill_waveform(self, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::midi_to_hz;
    use crate::dsp::test_helpers::{multi_sine, sine_wave};
    use crate::peaking_filter::DEFAULT_PEAK_GAIN_DB;
    use crate::note_estimator::DEFAULT_SMOOTHING;
    use crate::types::{HIGHEST_NOTE, LOWEST_NOTE};

    fn bank(sr: u32) -> FilterBank {
        FilterBank::new(sr as f64, DEFAULT_PEAK_GAIN_DB, DEFAULT_SMOOTHING, sr as usize)
    }

    fn feed(bank: &mut FilterBank, samples: &[f32]) {
        for block in samples.chunks(128) {
            bank.process_block(block);
        }
    }

    fn argmax(v: &[f32]) -> usize {
        v.iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap()
    }

    #[test]
    fn test_layout() {
        let b = bank(44100);
        assert_eq!(b.estimators().len(), NOTE_COUNT);
        assert_eq!(b.estimators()[0].midi_note(), LOWEST_NOTE);
        assert_eq!(b.estimators()[NOTE_COUNT - 1].midi_note(), HIGHEST_NOTE);
        assert_eq!(b.ring_capacity(), 44100);
        assert!(b.diagnostics().is_empty());
    }

    #[test]
    fn test_empty_block_is_noop() {
        let mut b = bank(48000);
        b.process_block(&[]);
        b.process_channels(&[]);
        let mut power = [1.0f32; NOTE_COUNT];
        b.fill_power(&mut power);
        assert!(power.iter().all(|&p| p == 0.0));
    }

    #[test]
    fn test_a4_tone_peaks_at_a4() {
        let mut b = bank(44100);
        feed(&mut b, &sine_wave(440.0, 0.5, 44100, 500));
        let mut power = [0.0f32; NOTE_COUNT];
        b.fill_power(&mut power);
        assert_eq!(argmax(&power), (69 - LOWEST_NOTE) as usize);
        assert!(power.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn test_chord_lights_its_keys() {
        // C4 E4 G4
        let notes = [60u8, 64, 67];
        let freqs: Vec<f64> = notes.iter().map(|&n| midi_to_hz(n as f64)).collect();
        let mut b = bank(48000);
        let signal = multi_sine(&freqs, 0.2, 48000, 500);

        // Average snapshots over the second half; the tones beat against
        // each other on a single snapshot.
        let mut power = [0.0f32; NOTE_COUNT];
        let mut snap = [0.0f32; NOTE_COUNT];
        for (i, block) in signal.chunks(128).enumerate() {
            b.process_block(block);
            if i * 128 >= signal.len() / 2 {
                b.fill_power(&mut snap);
                for (acc, s) in power.iter_mut().zip(&snap) {
                    *acc += s;
                }
            }
        }

        let quiet = power[(62 - LOWEST_NOTE) as usize]; // D4, between C4 and E4
        for &n in &notes {
            let p = power[(n - LOWEST_NOTE) as usize];
            assert!(p > 2.0 * quiet, "note {n}: {p} vs D4 {quiet}");
        }
    }

    #[test]
    fn test_deterministic() {
        let tone = sine_wave(261.63, 0.3, 44100, 100);
        let mut a = bank(44100);
        let mut b = bank(44100);
        feed(&mut a, &tone);
        // Different block sizes must not change the result
        for block in tone.chunks(37) {
            b.process_block(block);
        }
        let mut pa = [0.0f32; NOTE_COUNT];
        let mut pb = [0.0f32; NOTE_COUNT];
        a.fill_power(&mut pa);
        b.fill_power(&mut pb);
        assert_eq!(pa, pb);
    }

    #[test]
    fn test_waveform_is_latest_input() {
        let mut b = bank(8000);
        let tone = sine_wave(100.0, 0.9, 8000, 100);
        feed(&mut b, &tone);
        let mut wave = vec![0.0f32; 128];
        b.fill_waveform(&mut wave);
        assert_eq!(&wave[..], &tone[tone.len() - 128..]);
    }

    #[test]
    fn test_low_rate_degenerates_top_keys() {
        // 4 kHz Nyquist at 8 kHz: keys above B7 (3951 Hz) fall back
        let b = bank(8000);
        let degenerate = b.diagnostics();
        assert!(!degenerate.is_empty());
        assert!(degenerate.iter().all(|&(n, _)| midi_to_hz(n as f64) >= 4000.0));
    }

    #[test]
    fn test_only_first_channel_analyzed() {
        let tone = sine_wave(440.0, 0.5, 44100, 50);
        let silence = vec![0.0f32; tone.len()];
        let mut b = bank(44100);
        b.process_channels(&[&silence, &tone]);
        let mut power = [0.0f32; NOTE_COUNT];
        b.fill_power(&mut power);
        assert!(power.iter().all(|&p| p == 0.0));
    }
}
