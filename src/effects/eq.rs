//! Three-band equalizer: low shelf, peaking mid, high shelf

use std::f32::consts::PI;

use crate::config::EqSettings;
use crate::effects::{EffectStage, StageContext};
use crate::error::EffectError;

/// Largest boost or cut accepted per band
const MAX_GAIN_DB: f32 = 24.0;

/// Biquad filter coefficients (normalized, a0 = 1)
#[derive(Debug, Clone, Copy)]
struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    fn low_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / 2.0 * 2.0_f32.sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
            a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
            (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    fn high_shelf(freq: f32, gain_db: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / 2.0 * 2.0_f32.sqrt();
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;

        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
            a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
            (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
        )
    }

    fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos_w0,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos_w0,
            1.0 - alpha / a,
        )
    }
}

/// Direct form I history for one channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    #[inline]
    fn process(&mut self, input: f32, c: &BiquadCoeffs) -> f32 {
        let out = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = out;
        out
    }
}

/// Three-band equalizer
pub struct Equalizer {
    settings: EqSettings,
    bands: [BiquadCoeffs; 3],
    /// `states[channel][band]`
    states: Vec<[BiquadState; 3]>,
}

impl Equalizer {
    pub fn new(settings: EqSettings) -> Result<Self, EffectError> {
        for (param, gain) in [
            ("low_gain_db", settings.low_gain_db),
            ("mid_gain_db", settings.mid_gain_db),
            ("high_gain_db", settings.high_gain_db),
        ] {
            if !gain.is_finite() || gain.abs() > MAX_GAIN_DB {
                return Err(EffectError::InvalidParameter { param, value: gain });
            }
        }
        if !(settings.q > 0.0) {
            return Err(EffectError::InvalidParameter {
                param: "q",
                value: settings.q,
            });
        }

        let identity = BiquadCoeffs::normalized(1.0, 0.0, 0.0, 1.0, 0.0, 0.0);
        Ok(Self {
            settings,
            bands: [identity; 3],
            states: Vec::new(),
        })
    }
}

impl EffectStage for Equalizer {
    fn prepare(&mut self, ctx: &StageContext) -> Result<(), EffectError> {
        let sr = ctx.sample_rate as f32;
        let nyquist = sr / 2.0;
        let s = &self.settings;

        for (param, freq) in [
            ("low_freq_hz", s.low_freq_hz),
            ("mid_freq_hz", s.mid_freq_hz),
            ("high_freq_hz", s.high_freq_hz),
        ] {
            if !(freq > 0.0 && freq < nyquist) {
                return Err(EffectError::InvalidParameter { param, value: freq });
            }
        }

        self.bands = [
            BiquadCoeffs::low_shelf(s.low_freq_hz, s.low_gain_db, sr),
            BiquadCoeffs::peaking(s.mid_freq_hz, s.mid_gain_db, s.q, sr),
            BiquadCoeffs::high_shelf(s.high_freq_hz, s.high_gain_db, sr),
        ];
        self.states = vec![[BiquadState::default(); 3]; ctx.channels as usize];
        Ok(())
    }

    fn process(&mut self, block: &mut [f32], ctx: &StageContext) -> Result<(), EffectError> {
        ctx.check_shape(block)?;
        let channels = ctx.channels as usize;
        if self.states.len() != channels {
            return Err(EffectError::ShapeMismatch {
                len: block.len(),
                channels: ctx.channels,
            });
        }

        for frame in block.chunks_exact_mut(channels) {
            for (sample, state) in frame.iter_mut().zip(self.states.iter_mut()) {
                let mut x = *sample;
                for (band, coeffs) in state.iter_mut().zip(self.bands.iter()) {
                    x = band.process(x, coeffs);
                }
                *sample = x;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        for state in &mut self.states {
            *state = [BiquadState::default(); 3];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: StageContext = StageContext {
        sample_rate: 48000,
        channels: 2,
    };

    fn flat() -> EqSettings {
        EqSettings {
            low_gain_db: 0.0,
            mid_gain_db: 0.0,
            high_gain_db: 0.0,
            ..EqSettings::default()
        }
    }

    #[test]
    fn test_flat_eq_is_transparent() {
        let mut eq = Equalizer::new(flat()).unwrap();
        eq.prepare(&CTX).unwrap();

        let input: Vec<f32> = (0..512).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let mut block = input.clone();
        eq.process(&mut block, &CTX).unwrap();

        for (a, b) in input.iter().zip(block.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_low_shelf_boosts_dc() {
        let mut eq = Equalizer::new(EqSettings {
            low_gain_db: 6.0,
            ..flat()
        })
        .unwrap();
        eq.prepare(&CTX).unwrap();

        let mut block = vec![0.1f32; 8192];
        eq.process(&mut block, &CTX).unwrap();

        let expected = 0.1 * 10.0_f32.powf(6.0 / 20.0);
        let settled = block[block.len() - 1];
        assert!((settled - expected).abs() < 1e-3, "settled at {}", settled);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        assert!(Equalizer::new(EqSettings {
            low_gain_db: 40.0,
            ..flat()
        })
        .is_err());

        let mut eq = Equalizer::new(EqSettings {
            high_freq_hz: 30_000.0,
            ..flat()
        })
        .unwrap();
        assert!(eq.prepare(&CTX).is_err());
    }

    #[test]
    fn test_unprepared_process_fails() {
        let mut eq = Equalizer::new(flat()).unwrap();
        let mut block = [0.0f32; 8];
        assert!(eq.process(&mut block, &CTX).is_err());
    }
}
