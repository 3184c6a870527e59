//! Property-based tests for the mixing primitives.
//!
//! Limiter bound, delay-line shift, silence of an all-muted mix, meter
//! range and identity of a disabled effect chain, over random inputs.

use proptest::prelude::*;

use net_audio_mixer::audio::AudioSourcePort;
use net_audio_mixer::config::{EffectsConfig, EngineConfig};
use net_audio_mixer::effects::{EffectChain, StageContext};
use net_audio_mixer::mixer::{DelayLine, LevelMeter, Limiter, MixerEngine};

struct ConstPort(f32);

impl AudioSourcePort for ConstPort {
    fn receive(&mut self, out: &mut [f32]) -> usize {
        out.fill(self.0);
        out.len()
    }
}

fn any_sample() -> impl Strategy<Value = f32> {
    prop_oneof![
        8 => -4.0f32..=4.0f32,
        1 => Just(f32::NAN),
        1 => Just(f32::INFINITY),
        1 => Just(f32::NEG_INFINITY),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Output peak never exceeds the threshold, whatever the input.
    #[test]
    fn limiter_bounds_peak(
        threshold in 0.05f32..=1.0f32,
        block in prop::collection::vec(any_sample(), 1..512),
    ) {
        let mut limiter = Limiter::with_threshold(threshold).unwrap();
        let mut block = block;
        limiter.limit(&mut block);
        for &s in &block {
            prop_assert!(s.is_finite());
            prop_assert!(s.abs() <= threshold + 1e-6, "{} above {}", s, threshold);
        }
    }

    /// Pushing a stream through a delay of D samples shifts it by exactly D,
    /// with zeros in front.
    #[test]
    fn delay_line_shifts_stream(
        delay in 0usize..200,
        block_len in 1usize..64,
        blocks in 1usize..12,
    ) {
        let mut line = DelayLine::new(256, 64);
        line.configure(delay);

        let total = block_len * blocks;
        let input: Vec<f32> = (1..=total).map(|i| i as f32).collect();
        let mut output = vec![0.0f32; total];
        for (inp, out) in input.chunks(block_len).zip(output.chunks_mut(block_len)) {
            line.push(inp, out);
        }

        for (i, &s) in output.iter().enumerate() {
            let expected = if i < delay { 0.0 } else { input[i - delay] };
            prop_assert_eq!(s, expected);
        }
    }

    /// Meter readings stay in [0, 1] and silence reads zero.
    #[test]
    fn meter_in_range(block in prop::collection::vec(-1.0f32..=1.0f32, 1..1024)) {
        let reading = LevelMeter::measure(&block);
        prop_assert!((0.0..=1.0).contains(&reading.normalized));
        prop_assert_eq!(LevelMeter::measure(&vec![0.0; block.len()]).normalized, 0.0);
    }

    /// A chain whose stages are all disabled returns its input bit for bit.
    #[test]
    fn disabled_chain_is_identity(block in prop::collection::vec(-1.0f32..=1.0f32, 1..256)) {
        let ctx = StageContext { sample_rate: 48000, channels: 1 };
        let mut chain = EffectChain::from_config(&EffectsConfig::default(), ctx, 256).unwrap();
        for (name, _) in chain.toggles().states() {
            chain.toggles().set_enabled(&name, false).unwrap();
        }

        let mut processed = block.clone();
        prop_assert_eq!(chain.apply(&mut processed, |_| {}), 0);
        prop_assert_eq!(
            processed.iter().map(|s| s.to_bits()).collect::<Vec<_>>(),
            block.iter().map(|s| s.to_bits()).collect::<Vec<_>>()
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// With every channel muted the mix is exact silence.
    #[test]
    fn all_muted_mix_is_silent(
        levels in prop::collection::vec(-1.0f32..=1.0f32, 1..8),
        master in 0.0f32..=1.0f32,
    ) {
        let config = EngineConfig { channels: 1, block_frames: 64, ..EngineConfig::default() };
        let (mixer, mut cycle) = MixerEngine::create(config, None).unwrap();
        mixer.set_master_gain(master).unwrap();
        for (i, level) in levels.iter().enumerate() {
            let name = format!("src{}", i);
            mixer.attach_port(&name, Box::new(ConstPort(*level))).unwrap();
            mixer.set_mute(&name, true).unwrap();
        }

        let mut out = vec![1.0f32; 64];
        cycle.process(&mut out);
        prop_assert!(out.iter().all(|&s| s == 0.0));
    }
}
