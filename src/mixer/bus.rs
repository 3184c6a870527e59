//! Summing bus
//!
//! delay → gain/mute (per channel) → sum → master gain. The order is fixed;
//! master gain after the sum keeps it linear in the channel count.

/// Sums channel blocks into an accumulator
pub struct Mixer;

impl Mixer {
    /// Zero `acc`, add every block elementwise in iteration order, then
    /// apply `master_gain`. Each block must be at least `acc.len()` long.
    pub fn mix<'a, I>(blocks: I, acc: &mut [f32], master_gain: f32)
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        acc.fill(0.0);
        for block in blocks {
            debug_assert!(block.len() >= acc.len());
            for (a, s) in acc.iter_mut().zip(block.iter()) {
                *a += *s;
            }
        }
        Self::apply_gain(acc, master_gain);
    }

    /// Scale a block in place
    pub fn apply_gain(block: &mut [f32], gain: f32) {
        if gain != 1.0 {
            block.iter_mut().for_each(|s| *s *= gain);
        }
    }
}
