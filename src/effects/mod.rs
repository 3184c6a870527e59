//! Post-mix effect chain
//!
//! An ordered list of named stages, each switchable at runtime through a
//! shared flag. A stage that errors, or that leaves non-finite samples
//! behind, is bypassed for that block: the chain restores the pre-stage
//! samples and reports the failure.

pub mod compressor;
pub mod eq;
pub mod phase;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::EffectsConfig;
use crate::error::{ControlError, EffectError};

pub use compressor::Compressor;
pub use eq::Equalizer;
pub use phase::PhaseShift;

/// Shape of the blocks a stage will see
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageContext {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StageContext {
    /// Check that `block` holds whole interleaved frames
    pub fn check_shape(&self, block: &[f32]) -> Result<(), EffectError> {
        if self.channels == 0 || block.len() % self.channels as usize != 0 {
            return Err(EffectError::ShapeMismatch {
                len: block.len(),
                channels: self.channels,
            });
        }
        Ok(())
    }
}

/// A post-mix processing stage.
///
/// `process` runs on the audio thread: no allocation, no blocking. The block
/// is interleaved and must keep its length.
pub trait EffectStage: Send {
    /// Called once before the stage is first used and whenever the stream
    /// shape changes.
    fn prepare(&mut self, _ctx: &StageContext) -> Result<(), EffectError> {
        Ok(())
    }

    fn process(&mut self, block: &mut [f32], ctx: &StageContext) -> Result<(), EffectError>;

    /// Clear internal state (filter history, envelopes)
    fn reset(&mut self) {}
}

struct Slot {
    name: String,
    enabled: Arc<AtomicBool>,
    stage: Box<dyn EffectStage>,
}

/// Shared enable flags, handed to the control side
#[derive(Clone, Default)]
pub struct EffectToggles {
    stages: Vec<(String, Arc<AtomicBool>)>,
    shed: Arc<AtomicBool>,
}

impl EffectToggles {
    /// Enable or disable a stage by name
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), ControlError> {
        let (_, flag) = self
            .stages
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| ControlError::UnknownEffect(name.to_string()))?;
        flag.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.stages
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, flag)| flag.load(Ordering::Relaxed))
    }

    /// Stage names with their enabled state, in chain order
    pub fn states(&self) -> Vec<(String, bool)> {
        self.stages
            .iter()
            .map(|(n, flag)| (n.clone(), flag.load(Ordering::Relaxed)))
            .collect()
    }

    /// True while the chain is bypassed for load shedding
    pub fn is_shed(&self) -> bool {
        self.shed.load(Ordering::Acquire)
    }

    /// Leave load shedding
    pub fn restore(&self) {
        self.shed.store(false, Ordering::Release);
    }

    pub(crate) fn shed(&self) {
        self.shed.store(true, Ordering::Release);
    }
}

/// Ordered chain of effect stages
pub struct EffectChain {
    slots: Vec<Slot>,
    toggles: EffectToggles,
    backup: Vec<f32>,
    ctx: StageContext,
}

impl EffectChain {
    /// Create an empty chain for blocks of up to `max_block` samples
    pub fn new(ctx: StageContext, max_block: usize) -> Self {
        Self {
            slots: Vec::new(),
            toggles: EffectToggles::default(),
            backup: vec![0.0; max_block],
            ctx,
        }
    }

    /// Build the built-in stages from configuration, in the order
    /// eq → compressor → phase
    pub fn from_config(
        config: &EffectsConfig,
        ctx: StageContext,
        max_block: usize,
    ) -> Result<Self, EffectError> {
        let mut chain = Self::new(ctx, max_block);
        chain.add_stage(
            "eq",
            Box::new(Equalizer::new(config.eq.clone())?),
            config.eq.enabled,
        )?;
        chain.add_stage(
            "compressor",
            Box::new(Compressor::new(config.compressor.clone())?),
            config.compressor.enabled,
        )?;
        chain.add_stage(
            "phase",
            Box::new(PhaseShift::new(config.phase.clone())?),
            config.phase.enabled,
        )?;
        Ok(chain)
    }

    /// Append a stage. Not for use once the chain is running.
    pub fn add_stage(
        &mut self,
        name: &str,
        mut stage: Box<dyn EffectStage>,
        enabled: bool,
    ) -> Result<(), EffectError> {
        if self.slots.iter().any(|s| s.name == name) {
            return Err(EffectError::StageFailed {
                stage: name.to_string(),
                reason: "duplicate stage name".to_string(),
            });
        }
        stage.prepare(&self.ctx)?;

        let enabled = Arc::new(AtomicBool::new(enabled));
        self.toggles
            .stages
            .push((name.to_string(), enabled.clone()));
        self.slots.push(Slot {
            name: name.to_string(),
            enabled,
            stage,
        });
        Ok(())
    }

    /// Shared flags for the control side
    pub fn toggles(&self) -> EffectToggles {
        self.toggles.clone()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn context(&self) -> StageContext {
        self.ctx
    }

    /// Largest block `apply` can process, in samples
    pub fn capacity(&self) -> usize {
        self.backup.len()
    }

    /// Grow the scratch buffer to hold blocks of `max_block` samples.
    /// Not for use once the chain is running.
    pub fn reserve_block(&mut self, max_block: usize) {
        if max_block > self.backup.len() {
            self.backup.resize(max_block, 0.0);
        }
    }

    /// True while load shedding bypasses every stage
    pub fn is_shed(&self) -> bool {
        self.toggles.is_shed()
    }

    pub(crate) fn shed(&self) {
        self.toggles.shed();
    }

    /// Run every enabled stage over `block` in place.
    ///
    /// `on_failure` receives the name of each stage that was bypassed.
    /// Returns the number of failed stages. A block longer than
    /// [`capacity`](Self::capacity) cannot be restored on failure, so every
    /// enabled stage is bypassed and reported.
    pub fn apply<F>(&mut self, block: &mut [f32], mut on_failure: F) -> usize
    where
        F: FnMut(&str),
    {
        if self.toggles.is_shed() {
            return 0;
        }

        let len = block.len();
        let mut failures = 0;
        if len > self.backup.len() {
            for slot in &self.slots {
                if slot.enabled.load(Ordering::Relaxed) {
                    failures += 1;
                    on_failure(&slot.name);
                }
            }
            return failures;
        }

        for slot in &mut self.slots {
            if !slot.enabled.load(Ordering::Relaxed) {
                continue;
            }

            let backup = &mut self.backup[..len];
            backup.copy_from_slice(block);

            let ok = slot.stage.process(block, &self.ctx).is_ok()
                && block.iter().all(|s| s.is_finite());
            if !ok {
                block.copy_from_slice(backup);
                slot.stage.reset();
                failures += 1;
                on_failure(&slot.name);
            }
        }
        failures
    }

    /// Reset every stage. Not for use inside the audio callback.
    pub fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.stage.reset();
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

    struct Scale(f32);

    impl EffectStage for Scale {
        fn process(&mut self, block: &mut [f32], _ctx: &StageContext) -> Result<(), EffectError> {
            block.iter_mut().for_each(|s| *s *= self.0);
            Ok(())
        }
    }

    struct Failing;

    impl EffectStage for Failing {
        fn process(&mut self, block: &mut [f32], _ctx: &StageContext) -> Result<(), EffectError> {
            // Scribble first, then fail: the chain must undo this
            block.fill(0.123);
            Err(EffectError::InvalidParameter {
                param: "bands",
                value: 0.0,
            })
        }
    }

    struct NanMaker;

    impl EffectStage for NanMaker {
        fn process(&mut self, block: &mut [f32], _ctx: &StageContext) -> Result<(), EffectError> {
            block[0] = f32::NAN;
            Ok(())
        }
    }

    #[test]
    fn test_disabled_chain_is_identity() {
        let mut chain = EffectChain::new(CTX, 64);
        chain.add_stage("half", Box::new(Scale(0.5)), false).unwrap();
        chain.add_stage("double", Box::new(Scale(2.0)), false).unwrap();

        let input: Vec<f32> = (0..64).map(|i| (i as f32 * 0.37).sin()).collect();
        let mut block = input.clone();
        assert_eq!(chain.apply(&mut block, |_| {}), 0);
        assert_eq!(block, input);
    }

    #[test]
    fn test_stages_run_in_order() {
        let mut chain = EffectChain::new(CTX, 8);
        chain.add_stage("half", Box::new(Scale(0.5)), true).unwrap();
        chain.add_stage("double", Box::new(Scale(4.0)), true).unwrap();

        let mut block = [0.25f32; 8];
        chain.apply(&mut block, |_| {});
        assert_eq!(block, [0.5; 8]);
    }

    #[test]
    fn test_failed_stage_bypassed() {
        let mut chain = EffectChain::new(CTX, 8);
        chain.add_stage("half", Box::new(Scale(0.5)), true).unwrap();
        chain.add_stage("broken", Box::new(Failing), true).unwrap();
        chain.add_stage("nan", Box::new(NanMaker), true).unwrap();

        let mut failed = Vec::new();
        let mut block = [0.8f32; 8];
        let failures = chain.apply(&mut block, |name| failed.push(name.to_string()));

        assert_eq!(failures, 2);
        assert_eq!(failed, vec!["broken", "nan"]);
        assert_eq!(block, [0.4; 8]);
    }

    #[test]
    fn test_oversized_block_reported() {
        let mut chain = EffectChain::new(CTX, 8);
        chain.add_stage("half", Box::new(Scale(0.5)), true).unwrap();
        chain.add_stage("off", Box::new(Scale(0.5)), false).unwrap();

        let mut failed = Vec::new();
        let mut block = [1.0f32; 16];
        assert_eq!(chain.apply(&mut block, |name| failed.push(name.to_string())), 1);
        assert_eq!(failed, vec!["half"]);
        assert_eq!(block, [1.0; 16]);

        chain.reserve_block(16);
        assert_eq!(chain.capacity(), 16);
        assert_eq!(chain.apply(&mut block, |_| {}), 0);
        assert_eq!(block, [0.5; 16]);
    }

    #[test]
    fn test_toggle_by_name() {
        let mut chain = EffectChain::new(CTX, 8);
        chain.add_stage("half", Box::new(Scale(0.5)), false).unwrap();
        let toggles = chain.toggles();

        toggles.set_enabled("half", true).unwrap();
        assert_eq!(toggles.is_enabled("half"), Some(true));
        assert_eq!(
            toggles.set_enabled("reverb", true),
            Err(ControlError::UnknownEffect("reverb".to_string()))
        );

        let mut block = [1.0f32; 8];
        chain.apply(&mut block, |_| {});
        assert_eq!(block, [0.5; 8]);
    }

    #[test]
    fn test_shed_bypasses_everything() {
        let mut chain = EffectChain::new(CTX, 8);
        chain.add_stage("half", Box::new(Scale(0.5)), true).unwrap();
        chain.shed();

        let mut block = [1.0f32; 8];
        chain.apply(&mut block, |_| {});
        assert_eq!(block, [1.0; 8]);

        chain.toggles().restore();
        chain.apply(&mut block, |_| {});
        assert_eq!(block, [0.5; 8]);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut chain = EffectChain::new(CTX, 8);
        chain.add_stage("a", Box::new(Scale(1.0)), true).unwrap();
        assert!(chain.add_stage("a", Box::new(Scale(1.0)), true).is_err());
    }

    #[test]
    fn test_from_config_builds_builtin_stages() {
        let chain = EffectChain::from_config(&EffectsConfig::default(), CTX, 64).unwrap();
        let names: Vec<String> = chain.toggles().states().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["eq", "compressor", "phase"]);
    }

    #[test]
    fn test_check_shape() {
        assert!(CTX.check_shape(&[0.0; 4]).is_ok());
        assert!(CTX.check_shape(&[0.0; 3]).is_err());
    }
}
