//! Phase rotation by a fixed angle at every frequency
//!
//! `y = cos θ · x − sin θ · H{x}`, with `H` a Hamming-windowed FIR Hilbert
//! transformer. The direct path is delayed by the filter's group delay so
//! both terms line up. Angles that are whole multiples of 180° need no
//! Hilbert term and pass through without delay (180° is a polarity flip).

use crate::config::PhaseSettings;
use crate::effects::{EffectStage, StageContext};
use crate::error::EffectError;

/// Taps on each side of the Hilbert kernel's center
const HALF_TAPS: usize = 31;
const TAPS: usize = 2 * HALF_TAPS + 1;

fn hilbert_kernel() -> [f32; TAPS] {
    let mut kernel = [0.0f32; TAPS];
    for (k, tap) in kernel.iter_mut().enumerate() {
        let m = k as isize - HALF_TAPS as isize;
        if m % 2 != 0 {
            let window = 0.54
                - 0.46 * (2.0 * std::f64::consts::PI * k as f64 / (TAPS - 1) as f64).cos();
            *tap = (2.0 / (std::f64::consts::PI * m as f64) * window) as f32;
        }
    }
    kernel
}

pub struct PhaseShift {
    degrees: f32,
    direct: f32,
    quadrature: f32,
    kernel: [f32; TAPS],
    /// One ring of `TAPS` samples per channel
    history: Vec<f32>,
    pos: usize,
    channels: usize,
}

impl PhaseShift {
    pub fn new(settings: PhaseSettings) -> Result<Self, EffectError> {
        if !settings.phase_deg.is_finite() {
            return Err(EffectError::InvalidParameter {
                param: "phase_deg",
                value: settings.phase_deg,
            });
        }

        let radians = (settings.phase_deg as f64).to_radians();
        let (mut direct, mut quadrature) = (radians.cos() as f32, radians.sin() as f32);
        if quadrature.abs() < 1e-6 {
            quadrature = 0.0;
            direct = direct.signum();
        }

        Ok(Self {
            degrees: settings.phase_deg,
            direct,
            quadrature,
            kernel: hilbert_kernel(),
            history: Vec::new(),
            pos: 0,
            channels: 0,
        })
    }

    pub fn degrees(&self) -> f32 {
        self.degrees
    }

    /// Delay in frames added by this stage
    pub fn latency(&self) -> usize {
        if self.quadrature == 0.0 {
            0
        } else {
            HALF_TAPS
        }
    }
}

impl EffectStage for PhaseShift {
    fn prepare(&mut self, ctx: &StageContext) -> Result<(), EffectError> {
        self.channels = ctx.channels as usize;
        self.history = vec![0.0; self.channels * TAPS];
        self.pos = 0;
        Ok(())
    }

    fn process(&mut self, block: &mut [f32], ctx: &StageContext) -> Result<(), EffectError> {
        ctx.check_shape(block)?;

        if self.quadrature == 0.0 {
            let gain = self.direct;
            block.iter_mut().for_each(|s| *s *= gain);
            return Ok(());
        }

        if self.channels != ctx.channels as usize {
            return Err(EffectError::StageFailed {
                stage: "phase".to_string(),
                reason: format!("prepared for {} channels", self.channels),
            });
        }

        for frame in block.chunks_exact_mut(self.channels) {
            for (ch, sample) in frame.iter_mut().enumerate() {
                let ring = &mut self.history[ch * TAPS..(ch + 1) * TAPS];
                ring[self.pos] = *sample;

                let mut hilbert = 0.0f32;
                for (k, &tap) in self.kernel.iter().enumerate() {
                    if tap != 0.0 {
                        hilbert += tap * ring[(self.pos + TAPS - k) % TAPS];
                    }
                }
                let delayed = ring[(self.pos + TAPS - HALF_TAPS) % TAPS];

                *sample = self.direct * delayed - self.quadrature * hilbert;
            }
            self.pos = (self.pos + 1) % TAPS;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.pos = 0;
    }
}
