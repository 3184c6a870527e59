//! Feed-forward peak compressor with linked channel detection

use crate::config::CompressorSettings;
use crate::effects::{EffectStage, StageContext};
use crate::error::EffectError;

#[inline]
fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

#[inline]
fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(1e-9).log10()
}

/// Smoothing coefficient for a one-pole follower with time constant `ms`
fn time_coeff(ms: f32, sample_rate: f32) -> f32 {
    if ms <= 0.0 {
        0.0
    } else {
        (-1.0 / (ms * 0.001 * sample_rate)).exp()
    }
}

pub struct Compressor {
    settings: CompressorSettings,
    attack_coeff: f32,
    release_coeff: f32,
    makeup: f32,
    envelope: f32,
    /// Gain reduction applied to the last frame, in dB (≤ 0)
    last_reduction_db: f32,
}

impl Compressor {
    pub fn new(settings: CompressorSettings) -> Result<Self, EffectError> {
        if !(settings.ratio >= 1.0) {
            return Err(EffectError::InvalidParameter {
                param: "ratio",
                value: settings.ratio,
            });
        }
        if !(settings.threshold_db <= 0.0) {
            return Err(EffectError::InvalidParameter {
                param: "threshold_db",
                value: settings.threshold_db,
            });
        }
        for (param, ms) in [
            ("attack_ms", settings.attack_ms),
            ("release_ms", settings.release_ms),
        ] {
            if !(ms >= 0.0) {
                return Err(EffectError::InvalidParameter { param, value: ms });
            }
        }

        Ok(Self {
            makeup: db_to_linear(settings.makeup_db),
            settings,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
            last_reduction_db: 0.0,
        })
    }

    /// Gain reduction applied to the most recent frame, in dB
    pub fn gain_reduction_db(&self) -> f32 {
        self.last_reduction_db
    }

    fn compute_gain_db(&self, envelope_db: f32) -> f32 {
        let over = envelope_db - self.settings.threshold_db;
        if over > 0.0 {
            -over * (1.0 - 1.0 / self.settings.ratio)
        } else {
            0.0
        }
    }
}

impl EffectStage for Compressor {
    fn prepare(&mut self, ctx: &StageContext) -> Result<(), EffectError> {
        let sr = ctx.sample_rate as f32;
        self.attack_coeff = time_coeff(self.settings.attack_ms, sr);
        self.release_coeff = time_coeff(self.settings.release_ms, sr);
        self.envelope = 0.0;
        Ok(())
    }

    fn process(&mut self, block: &mut [f32], ctx: &StageContext) -> Result<(), EffectError> {
        ctx.check_shape(block)?;

        for frame in block.chunks_exact_mut(ctx.channels as usize) {
            let peak = frame.iter().fold(0.0f32, |m, s| m.max(s.abs()));
            let coeff = if peak > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * peak;

            let reduction_db = self.compute_gain_db(linear_to_db(self.envelope));
            self.last_reduction_db = reduction_db;
            let gain = db_to_linear(reduction_db) * self.makeup;
            frame.iter_mut().for_each(|s| *s *= gain);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
        self.last_reduction_db = 0.0;
    }
}
