use crate::dsp::midi_to_hz;
use crate::peaking_filter::PeakingFilter;
use log::warn;

/// Default EMA pole for the smoothed power. At 44.1–48 kHz this averages
/// over roughly the last 20 samples.
pub const DEFAULT_SMOOTHING: f64 = 0.95;

/// Largest accepted pole. At 1.0 the mean never moves.
pub const MAX_SMOOTHING: f64 = 0.999;

/// Bring a smoothing pole into `[0, MAX_SMOOTHING]`. NaN becomes the default.
pub fn clamp_smoothing(smoothing: f64) -> f64 {
    if smoothing.is_nan() {
        DEFAULT_SMOOTHING
    } else {
        smoothing.clamp(0.0, MAX_SMOOTHING)
    }
}

/// Quarter of the note's period in samples, rounded, never less than one.
pub fn quarter_wave_delay(midi_note: u8, sample_rate: f64) -> usize {
    let period = sample_rate / midi_to_hz(midi_note as f64);
    let quarter = (period / 4.0).round();
    if quarter.is_finite() && quarter >= 1.0 {
        quarter as usize
    } else {
        1
    }
}

/// Quadrature power estimator for one key.
///
/// Two identically tuned peaking filters: one sees the live input, the other
/// sees the input delayed by a quarter period of the note. Their outputs are
/// roughly 90° apart, so the sum of squares tracks the envelope without
/// carrier-phase ripple.
#[derive(Debug, Clone)]
pub struct DualPhaseNoteEstimator {
    midi_note: u8,
    direct: PeakingFilter,
    delayed: PeakingFilter,
    /// Fixed-length delay line; `cursor` is both the read and write slot.
    delay_line: Vec<f64>,
    cursor: usize,
    smoothing: f64,
    power_mean: f64,
}

impl DualPhaseNoteEstimator {
    pub fn new(midi_note: u8, sample_rate: f64, peak_gain_db: f64) -> Self {
        Self::with_smoothing(midi_note, sample_rate, peak_gain_db, DEFAULT_SMOOTHING)
    }

    pub fn with_smoothing(
        midi_note: u8,
        sample_rate: f64,
        peak_gain_db: f64,
        smoothing: f64,
    ) -> Self {
        let delay = quarter_wave_delay(midi_note, sample_rate);
        let clamped = clamp_smoothing(smoothing);
        if clamped != smoothing {
            warn!(
                "Note {}: smoothing {} outside [0, 1), using {}",
                midi_note, smoothing, clamped
            );
        }
        Self {
            midi_note,
            direct: PeakingFilter::new(midi_note, sample_rate, peak_gain_db),
            delayed: PeakingFilter::new(midi_note, sample_rate, peak_gain_db),
            delay_line: vec![0.0; delay],
            cursor: 0,
            smoothing: clamped,
            power_mean: 0.0,
        }
    }

    /// Feed one sample; returns the (direct, delayed) filter outputs.
    #[inline]
    pub fn process(&mut self, input: f64) -> (f64, f64) {
        let out1 = self.direct.process(input);
        let out2 = self.delayed.process(self.delay_line[self.cursor]);
        self.delay_line[self.cursor] = input;
        self.cursor += 1;
        if self.cursor == self.delay_line.len() {
            self.cursor = 0;
        }

        let instant = out1 * out1 + out2 * out2;
        self.power_mean = self.smoothing * self.power_mean + (1.0 - self.smoothing) * instant;
        (out1, out2)
    }

    /// Current smoothed power. Never negative.
    #[inline]
    pub fn instant_power(&self) -> f64 {
        self.power_mean
    }

    pub fn midi_note(&self) -> u8 {
        self.midi_note
    }

    pub fn smoothing(&self) -> f64 {
        self.smoothing
    }

    pub fn delay_len(&self) -> usize {
        self.delay_line.len()
    }

    /// Direct-path filter (both paths share coefficients).
    pub fn filter(&self) -> &PeakingFilter {
        &self.direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::test_helpers::sine_wave;
    use crate::peaking_filter::DEFAULT_PEAK_GAIN_DB;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Mean of `instant_power()` over the last `tail` samples of `signal`.
    fn settled_power(est: &mut DualPhaseNoteEstimator, signal: &[f32], tail: usize) -> f64 {
        let mut acc = 0.0;
        let start = signal.len() - tail;
        for (i, &s) in signal.iter().enumerate() {
            est.process(s as f64);
            if i >= start {
                acc += est.instant_power();
            }
        }
        acc / tail as f64
    }

    #[test]
    fn test_delay_lengths() {
        // 44100 / 440 / 4 = 25.06
        assert_eq!(quarter_wave_delay(69, 44100.0), 25);
        // 44100 / 27.5 / 4 = 400.9
        assert_eq!(quarter_wave_delay(21, 44100.0), 401);
        // 44100 / 4186 / 4 = 2.63
        assert_eq!(quarter_wave_delay(108, 44100.0), 3);
        // note 127 at 8 kHz: 8000 / 12543 / 4 rounds to 0 → clamped
        assert_eq!(quarter_wave_delay(127, 8000.0), 1);
    }

    #[test]
    fn test_silence_stays_zero() {
        let mut est = DualPhaseNoteEstimator::new(60, 48000.0, DEFAULT_PEAK_GAIN_DB);
        for _ in 0..1000 {
            assert_eq!(est.process(0.0), (0.0, 0.0));
        }
        assert_eq!(est.instant_power(), 0.0);
    }

    #[test]
    fn test_resonates_on_own_note() {
        let sr = 44100;
        let tone = sine_wave(440.0, 0.5, sr, 1000);

        let mut on_note = DualPhaseNoteEstimator::new(69, sr as f64, DEFAULT_PEAK_GAIN_DB);
        let mut off_note = DualPhaseNoteEstimator::new(62, sr as f64, DEFAULT_PEAK_GAIN_DB);

        let p_on = settled_power(&mut on_note, &tone, 4410);
        let p_off = settled_power(&mut off_note, &tone, 4410);
        assert!(
            p_on > 4.0 * p_off,
            "440 Hz into A4 estimator: {p_on:.4}, into D4: {p_off:.4}"
        );
    }

    #[test]
    fn test_quadrature_removes_ripple() {
        // With the quarter-wave partner the smoothed power on a steady tone
        // barely moves from sample to sample.
        let sr = 44100;
        let tone = sine_wave(440.0, 0.5, sr, 1000);
        let mut est = DualPhaseNoteEstimator::new(69, sr as f64, DEFAULT_PEAK_GAIN_DB);
        let mut lo = f64::MAX;
        let mut hi = f64::MIN;
        for (i, &s) in tone.iter().enumerate() {
            est.process(s as f64);
            if i > tone.len() - 2000 {
                lo = lo.min(est.instant_power());
                hi = hi.max(est.instant_power());
            }
        }
        assert!(hi > 0.0);
        assert!((hi - lo) / hi < 0.1, "ripple lo={lo} hi={hi}");
    }

    #[test]
    fn test_power_bounded_for_bounded_noise() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for note in [21u8, 45, 69, 90, 108] {
            let mut est = DualPhaseNoteEstimator::new(note, 48000.0, DEFAULT_PEAK_GAIN_DB);
            for _ in 0..48000 {
                let x: f64 = rng.gen_range(-1.0..=1.0);
                est.process(x);
                let p = est.instant_power();
                assert!(p >= 0.0 && p.is_finite());
                assert!(p < 64.0, "note {note} power {p} blew up");
            }
        }
    }

    #[test]
    fn test_smoothing_is_configurable() {
        let sr = 44100;
        let tone = sine_wave(440.0, 0.5, sr, 50);
        let mut fast = DualPhaseNoteEstimator::with_smoothing(69, sr as f64, 6.0, 0.0);
        let mut slow = DualPhaseNoteEstimator::with_smoothing(69, sr as f64, 6.0, 0.999);
        for &s in &tone {
            let (a, b) = fast.process(s as f64);
            assert!((fast.instant_power() - (a * a + b * b)).abs() < 1e-12);
            slow.process(s as f64);
        }
        assert!(slow.instant_power() < fast.instant_power());
    }

    #[test]
    fn test_out_of_range_smoothing_is_clamped() {
        let sr = 44100;
        let tone = sine_wave(440.0, 0.5, sr, 1000);
        for bad in [1.0, 1.2, -0.5, f64::NAN, f64::INFINITY] {
            let mut est = DualPhaseNoteEstimator::with_smoothing(69, sr as f64, 6.0, bad);
            assert!((0.0..1.0).contains(&est.smoothing()), "{bad} kept as {}", est.smoothing());
            for &s in &tone {
                est.process(s as f64);
                let p = est.instant_power();
                assert!(p >= 0.0 && p.is_finite(), "smoothing {bad}: power {p}");
            }
            assert!(est.instant_power() > 0.01, "smoothing {bad} never rose");
        }
        assert_eq!(clamp_smoothing(f64::NAN), DEFAULT_SMOOTHING);
        assert_eq!(clamp_smoothing(0.5), 0.5);
    }
}
