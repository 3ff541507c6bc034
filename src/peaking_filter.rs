use crate::dsp::midi_to_hz;
use log::warn;
use std::f64::consts::PI;

/// Half-bandwidth of every note filter, in cents either side of the fundamental.
pub const HALF_BANDWIDTH_CENTS: f64 = 25.0;

/// Default boost at the note's fundamental.
pub const DEFAULT_PEAK_GAIN_DB: f64 = 6.0;

/// Quality factor for a band spanning ±`HALF_BANDWIDTH_CENTS` around the center.
pub fn note_band_q() -> f64 {
    let r = 2.0f64.powf(HALF_BANDWIDTH_CENTS / 1200.0);
    1.0 / (r - 1.0 / r)
}

/// Why a filter fell back to pass-through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Degenerate {
    /// Center frequency not inside (0, Nyquist).
    OutOfRange { center_hz: f64, nyquist_hz: f64 },
    /// Normalizing term `a0` came out zero or non-finite.
    ZeroDenominator,
}

/// Normalized biquad coefficients (a0 = 1).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coefficients {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Coefficients {
    pub const IDENTITY: Coefficients = Coefficients {
        b0: 1.0,
        b1: 0.0,
        b2: 0.0,
        a1: 0.0,
        a2: 0.0,
    };

    /// RBJ cookbook peaking EQ at `center_hz`.
    fn peaking(
        center_hz: f64,
        sample_rate: f64,
        peak_gain_db: f64,
    ) -> Result<Self, Degenerate> {
        let nyquist_hz = sample_rate / 2.0;
        // Written so NaN lands in the degenerate branch too.
        if !(center_hz > 0.0 && center_hz < nyquist_hz) {
            return Err(Degenerate::OutOfRange {
                center_hz,
                nyquist_hz,
            });
        }

        let a = 10.0f64.powf(peak_gain_db / 20.0);
        let w0 = 2.0 * PI * center_hz / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * note_band_q());

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha / a;

        if a0 == 0.0 || !a0.is_finite() {
            return Err(Degenerate::ZeroDenominator);
        }

        Ok(Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        })
    }

    /// True if both poles sit strictly inside the unit circle
    /// (stability triangle for a monic second-order denominator).
    pub fn is_stable(&self) -> bool {
        self.a2.abs() < 1.0 && self.a1.abs() < 1.0 + self.a2
    }
}

/// Second-order peaking filter tuned to one MIDI note, Direct Form I.
///
/// Coefficients are fixed at construction. If the note's fundamental is
/// outside (0, Nyquist) the filter is built as a pass-through and the
/// reason is kept in [`PeakingFilter::diagnostic`].
#[derive(Debug, Clone)]
pub struct PeakingFilter {
    coeffs: Coefficients,
    center_hz: f64,
    diagnostic: Option<Degenerate>,
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl PeakingFilter {
    pub fn new(midi_note: u8, sample_rate: f64, peak_gain_db: f64) -> Self {
        let center_hz = midi_to_hz(midi_note as f64);
        let (coeffs, diagnostic) =
            match Coefficients::peaking(center_hz, sample_rate, peak_gain_db) {
                Ok(c) => (c, None),
                Err(reason) => {
                    warn!(
                        "Note {} ({:.2} Hz) at {} Hz: {:?}; using pass-through",
                        midi_note, center_hz, sample_rate, reason
                    );
                    (Coefficients::IDENTITY, Some(reason))
                }
            };
        Self {
            coeffs,
            center_hz,
            diagnostic,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    #[inline]
    pub fn process(&mut self, x0: f64) -> f64 {
        let c = &self.coeffs;
        let y0 = c.b0 * x0 + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x0;
        self.y2 = self.y1;
        self.y1 = y0;
        y0
    }

    pub fn coefficients(&self) -> &Coefficients {
        &self.coeffs
    }

    pub fn center_hz(&self) -> f64 {
        self.center_hz
    }

    pub fn diagnostic(&self) -> Option<Degenerate> {
        self.diagnostic
    }

    pub fn is_identity(&self) -> bool {
        self.diagnostic.is_some()
    }
}
