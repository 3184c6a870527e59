//! Level metering
//!
//! Average-magnitude level mapped onto a 60 dB display window. Readings are
//! produced on the audio thread and published through [`AtomicLevel`] so the
//! control side can collect them without locking.

use serde::Serialize;
use std::sync::atomic::{AtomicU32, Ordering};

/// Bottom of the display window in dB
pub const DISPLAY_FLOOR_DB: f32 = -60.0;

/// One meter reading
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LevelReading {
    /// Mean absolute sample value
    pub average: f32,
    /// Display value in [0, 1]
    pub normalized: f32,
}

/// A reading tagged with the source name or `"mix"`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedLevel {
    pub name: String,
    #[serde(flatten)]
    pub reading: LevelReading,
}

/// Stateless level meter
pub struct LevelMeter;

impl LevelMeter {
    /// Measure a block
    pub fn measure(block: &[f32]) -> LevelReading {
        let average = Self::average_magnitude(block);
        LevelReading {
            average,
            normalized: Self::normalize(average),
        }
    }

    /// Mean of |sample|; zero for an empty block
    pub fn average_magnitude(block: &[f32]) -> f32 {
        if block.is_empty() {
            return 0.0;
        }
        let sum: f32 = block.iter().map(|s| s.abs()).sum();
        sum / block.len() as f32
    }

    /// Map a linear magnitude to the display window.
    /// Silence (and anything non-finite) maps to 0.
    pub fn normalize(average: f32) -> f32 {
        if average <= 0.0 || !average.is_finite() {
            return 0.0;
        }
        let db = 20.0 * average.log10();
        ((db - DISPLAY_FLOOR_DB) / -DISPLAY_FLOOR_DB).clamp(0.0, 1.0)
    }
}

/// Lock-free holder for the latest reading
#[derive(Debug, Default)]
pub struct AtomicLevel {
    average: AtomicU32,
    normalized: AtomicU32,
}

impl AtomicLevel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, reading: LevelReading) {
        self.average.store(reading.average.to_bits(), Ordering::Relaxed);
        self.normalized
            .store(reading.normalized.to_bits(), Ordering::Relaxed);
    }

    /// Latest reading. The two fields are written separately, so a reader
    /// racing a store may pair values from adjacent cycles.
    pub fn load(&self) -> LevelReading {
        LevelReading {
            average: f32::from_bits(self.average.load(Ordering::Relaxed)),
            normalized: f32::from_bits(self.normalized.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_reads_zero() {
        let reading = LevelMeter::measure(&[0.0; 256]);
        assert_eq!(reading.average, 0.0);
        assert_eq!(reading.normalized, 0.0);
    }

    #[test]
    fn test_full_scale_reads_one() {
        let reading = LevelMeter::measure(&[1.0; 256]);
        assert!((reading.normalized - 1.0).abs() < 1e-6);

        let reading = LevelMeter::measure(&[-1.0; 256]);
        assert!((reading.normalized - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_window_mapping() {
        // -20 dB sits two thirds up the 60 dB window
        let reading = LevelMeter::measure(&[0.1; 64]);
        assert!((reading.normalized - 2.0 / 3.0).abs() < 1e-4);

        // Below the floor clamps to zero
        let reading = LevelMeter::measure(&[0.0001; 64]);
        assert_eq!(reading.normalized, 0.0);
    }

    #[test]
    fn test_empty_block() {
        assert_eq!(LevelMeter::measure(&[]), LevelReading::default());
    }

    #[test]
    fn test_atomic_level_roundtrip() {
        let level = AtomicLevel::new();
        let reading = LevelMeter::measure(&[0.5; 8]);
        level.store(reading);
        assert_eq!(level.load(), reading);
    }
}
