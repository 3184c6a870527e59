//! Block peak limiter
//!
//! Instantaneous, block-granular gain reduction: if the block's peak is
//! above the threshold the whole block is scaled down so the peak lands on
//! the threshold. No lookahead, so only intra-block peaks are handled.

use crate::constants::DEFAULT_LIMITER_THRESHOLD;
use crate::error::EffectError;

/// Peak limiter
#[derive(Debug, Clone)]
pub struct Limiter {
    threshold: f32,
    /// Reduction factor applied to the last block (1.0 = none)
    reduction: f32,
}

impl Limiter {
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_LIMITER_THRESHOLD,
            reduction: 1.0,
        }
    }

    /// Create a limiter with a custom linear threshold in (0, 1]
    pub fn with_threshold(threshold: f32) -> Result<Self, EffectError> {
        let mut limiter = Self::new();
        limiter.set_threshold(threshold)?;
        Ok(limiter)
    }

    pub fn set_threshold(&mut self, threshold: f32) -> Result<(), EffectError> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(EffectError::InvalidParameter {
                param: "threshold",
                value: threshold,
            });
        }
        self.threshold = threshold;
        Ok(())
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Reduction factor applied to the most recent block
    pub fn reduction(&self) -> f32 {
        self.reduction
    }

    /// Limit a block in place.
    ///
    /// Non-finite samples are zeroed first; after that the output peak is at
    /// most the threshold for any input.
    pub fn limit(&mut self, block: &mut [f32]) {
        let mut peak = 0.0f32;
        for sample in block.iter_mut() {
            if !sample.is_finite() {
                *sample = 0.0;
            }
            peak = peak.max(sample.abs());
        }

        if peak > self.threshold {
            self.reduction = peak / self.threshold;
            let scale = self.threshold / peak;
            for sample in block.iter_mut() {
                // Rounding can leave a hair over the threshold
                *sample = (*sample * scale).clamp(-self.threshold, self.threshold);
            }
        } else {
            self.reduction = 1.0;
        }
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new()
    }
}
