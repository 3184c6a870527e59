//! Mixer engine: shared state and the control-side handle
//!
//! [`MixerEngine::create`] splits the mixer into a [`MixerHandle`] for
//! control threads and a [`MixCycle`] for the audio thread. They share one
//! `MixerEngine` holding the published channel snapshot, parameter atomics,
//! meters, counters and the event queue.
//!
//! Attach and detach build a new channel list and publish it with a single
//! swap. The replaced list is parked on the control side until the cycle no
//! longer references it, so channel storage is never freed on the audio
//! thread.

use arc_swap::{ArcSwap, Guard};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::port::AudioSourcePort;
use crate::config::{EngineConfig, LoadedMixerState, MixerState};
use crate::constants::{
    DEFAULT_OUTPUT_NAME, EVENT_QUEUE_CAPACITY, MAX_BLOCK_FRAMES, MAX_SOURCES, MIX_LEVEL_NAME,
};
use crate::discovery::SourceDirectory;
use crate::effects::{EffectChain, EffectToggles, StageContext};
use crate::error::{ConfigError, ControlError, EffectError, Result, SourceError};
use crate::mixer::channel::SourceChannel;
use crate::mixer::cycle::{CyclePhase, CycleStats, CycleStatsSnapshot, MixCycle};
use crate::mixer::events::{create_event_queue, EventQueue, MixEvent};
use crate::mixer::limiter::Limiter;
use crate::mixer::meter::{AtomicLevel, LevelReading, NamedLevel};

type ChannelList = Vec<Arc<SourceChannel>>;

/// State shared between the cycle and its handles
pub struct MixerEngine {
    config: EngineConfig,
    max_block: usize,
    channels: ArcSwap<ChannelList>,
    master_gain: AtomicU32,
    running: AtomicBool,
    phase: AtomicU8,
    mix_level: AtomicLevel,
    limiter_reduction: AtomicU32,
    events: EventQueue,
    stats: CycleStats,
    output_name: Arc<ArcSwap<String>>,
}

impl MixerEngine {
    /// Build the engine and split it into its control and real-time halves.
    ///
    /// `effects` defaults to an empty chain.
    pub fn create(
        config: EngineConfig,
        effects: Option<EffectChain>,
    ) -> Result<(MixerHandle, MixCycle)> {
        config.validate()?;
        let limiter = Limiter::with_threshold(config.limiter_threshold)?;
        let max_block = MAX_BLOCK_FRAMES.max(config.block_frames) * config.channels as usize;

        let mut effects = effects.unwrap_or_else(|| {
            EffectChain::new(
                StageContext {
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                },
                max_block,
            )
        });
        let ctx = effects.context();
        if ctx.channels != config.channels || ctx.sample_rate != config.sample_rate {
            return Err(EffectError::StageFailed {
                stage: "chain".to_string(),
                reason: format!(
                    "chain prepared for {} Hz / {} ch, engine runs {} Hz / {} ch",
                    ctx.sample_rate, ctx.channels, config.sample_rate, config.channels
                ),
            }
            .into());
        }
        if effects.capacity() < max_block {
            tracing::debug!(
                "Growing effect chain from {} to {} samples",
                effects.capacity(),
                max_block
            );
            effects.reserve_block(max_block);
        }

        let master_gain = if config.master_gain.is_finite() {
            config.master_gain.clamp(0.0, 1.0)
        } else {
            1.0
        };

        let engine = Arc::new(MixerEngine {
            max_block,
            channels: ArcSwap::from_pointee(Vec::with_capacity(MAX_SOURCES)),
            master_gain: AtomicU32::new(master_gain.to_bits()),
            running: AtomicBool::new(true),
            phase: AtomicU8::new(CyclePhase::Idle as u8),
            mix_level: AtomicLevel::new(),
            limiter_reduction: AtomicU32::new(1.0f32.to_bits()),
            events: create_event_queue(EVENT_QUEUE_CAPACITY),
            stats: CycleStats::default(),
            output_name: Arc::new(ArcSwap::from_pointee(DEFAULT_OUTPUT_NAME.to_string())),
            config,
        });

        let handle = MixerHandle {
            engine: engine.clone(),
            toggles: effects.toggles(),
            directory: None,
            control: Arc::new(Mutex::new(ControlState::default())),
        };
        let cycle = MixCycle::new(engine, limiter, effects);

        tracing::info!(
            "Mixer engine ready: {} Hz, {} ch, {} frames per block",
            handle.engine.config.sample_rate,
            handle.engine.config.channels,
            handle.engine.config.block_frames
        );

        Ok((handle, cycle))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Largest block the cycle mixes in one pass, in samples
    pub fn max_block(&self) -> usize {
        self.max_block
    }

    pub(crate) fn channel_snapshot(&self) -> Guard<Arc<ChannelList>> {
        self.channels.load()
    }

    pub(crate) fn events(&self) -> &EventQueue {
        &self.events
    }

    pub(crate) fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub(crate) fn master_gain(&self) -> f32 {
        f32::from_bits(self.master_gain.load(Ordering::Relaxed))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_phase(&self, phase: CyclePhase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    pub(crate) fn phase(&self) -> CyclePhase {
        CyclePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub(crate) fn store_mix_level(&self, reading: LevelReading) {
        self.mix_level.store(reading);
    }

    pub(crate) fn store_limiter_reduction(&self, reduction: f32) {
        self.limiter_reduction
            .store(reduction.to_bits(), Ordering::Relaxed);
    }

    /// Playback time of `samples` interleaved samples
    pub(crate) fn block_budget(&self, samples: usize) -> Duration {
        let frames = samples / self.config.channels.max(1) as usize;
        Duration::from_secs_f64(frames as f64 / self.config.sample_rate.max(1) as f64)
    }
}

/// Channel status as shown to the control surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub name: String,
    pub gain: f32,
    pub muted: bool,
    pub delay_ms: f32,
    pub level: LevelReading,
    pub stalls: u64,
}

/// Engine-wide status
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixerStatus {
    pub running: bool,
    pub phase: CyclePhase,
    pub output_name: String,
    pub master_gain: f32,
    pub limiter_reduction: f32,
    pub effects_shed: bool,
    pub channel_count: usize,
    pub stats: CycleStatsSnapshot,
    pub events_dropped: usize,
}

#[derive(Default)]
struct ControlState {
    /// Replaced channel lists waiting for the cycle to let go of them
    retired: Vec<Arc<ChannelList>>,
}

/// Control-side handle. Cheap to clone; every method is safe to call from
/// any non-real-time thread.
#[derive(Clone)]
pub struct MixerHandle {
    engine: Arc<MixerEngine>,
    toggles: EffectToggles,
    directory: Option<Arc<dyn SourceDirectory>>,
    control: Arc<Mutex<ControlState>>,
}

impl MixerHandle {
    /// Use `directory` to resolve names passed to [`attach`](Self::attach)
    pub fn with_directory(mut self, directory: Arc<dyn SourceDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.engine.config
    }

    pub fn max_block(&self) -> usize {
        self.engine.max_block
    }

    // ── roster ──────────────────────────────────────────────────────────

    /// Attach a source known to the directory
    pub fn attach(&self, name: &str) -> Result<()> {
        let directory = self.directory.as_ref().ok_or(ControlError::NoDirectory)?;
        let name = validate_name(name)?;

        let mut control = self.control.lock();
        self.check_can_attach(name)?;

        let handle = directory
            .snapshot()
            .remove(name)
            .ok_or_else(|| SourceError::Unavailable(name.to_string()))?;
        let port = directory.open(&handle)?;

        self.publish_with(&mut control, name, port);
        Ok(())
    }

    /// Attach a source through an already opened port
    pub fn attach_port(
        &self,
        name: &str,
        port: Box<dyn AudioSourcePort>,
    ) -> std::result::Result<(), ControlError> {
        let name = validate_name(name)?;
        let mut control = self.control.lock();
        self.check_can_attach(name)?;
        self.publish_with(&mut control, name, port);
        Ok(())
    }

    /// Detach a source. Its channel is released once the cycle is done
    /// with it.
    pub fn detach(&self, name: &str) -> std::result::Result<(), ControlError> {
        let mut control = self.control.lock();
        let current = self.engine.channels.load_full();
        if !current.iter().any(|c| c.name() == name) {
            return Err(ControlError::UnknownChannel(name.to_string()));
        }

        let next: ChannelList = current
            .iter()
            .filter(|c| c.name() != name)
            .cloned()
            .collect();
        drop(current);
        self.publish(&mut control, next);

        tracing::info!("Detached source '{}'", name);
        Ok(())
    }

    /// Whether `name` is attached
    pub fn is_attached(&self, name: &str) -> bool {
        self.engine.channels.load().iter().any(|c| c.name() == name)
    }

    /// Attached source names in mix order
    pub fn channel_names(&self) -> Vec<String> {
        self.engine
            .channels
            .load()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    fn check_can_attach(&self, name: &str) -> std::result::Result<(), ControlError> {
        let current = self.engine.channels.load();
        if current.iter().any(|c| c.name() == name) {
            return Err(ControlError::AlreadyAttached(name.to_string()));
        }
        if current.len() >= MAX_SOURCES {
            return Err(ControlError::TooManySources(MAX_SOURCES));
        }
        Ok(())
    }

    fn publish_with(&self, control: &mut ControlState, name: &str, port: Box<dyn AudioSourcePort>) {
        let channel = Arc::new(SourceChannel::new(
            name,
            port,
            self.engine.config.max_delay_samples(),
            self.engine.max_block,
        ));

        let current = self.engine.channels.load_full();
        let mut next = Vec::with_capacity(MAX_SOURCES.max(current.len() + 1));
        next.extend(current.iter().cloned());
        next.push(channel);
        drop(current);
        self.publish(control, next);

        tracing::info!("Attached source '{}'", name);
    }

    fn publish(&self, control: &mut ControlState, next: ChannelList) {
        let previous = self.engine.channels.swap(Arc::new(next));
        control.retired.push(previous);
        reclaim_retired(control);
    }

    /// Free replaced channel lists the cycle no longer uses. Returns how
    /// many are still pending.
    pub fn reclaim(&self) -> usize {
        let mut control = self.control.lock();
        reclaim_retired(&mut control);
        control.retired.len()
    }

    fn find(&self, name: &str) -> std::result::Result<Arc<SourceChannel>, ControlError> {
        self.engine
            .channels
            .load()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| ControlError::UnknownChannel(name.to_string()))
    }

    // ── per-channel parameters ──────────────────────────────────────────

    /// Set a channel's gain, 0.0 to 1.0
    pub fn set_gain(&self, name: &str, gain: f32) -> std::result::Result<(), ControlError> {
        let gain = check_unit("gain", gain)?;
        self.find(name)?.params().set_gain(gain);
        Ok(())
    }

    pub fn set_mute(&self, name: &str, muted: bool) -> std::result::Result<(), ControlError> {
        self.find(name)?.params().set_muted(muted);
        Ok(())
    }

    /// Set a channel's delay in milliseconds. Values above the configured
    /// maximum are clamped; the applied delay is returned.
    pub fn set_delay_ms(&self, name: &str, delay_ms: f32) -> std::result::Result<f32, ControlError> {
        if !delay_ms.is_finite() || delay_ms < 0.0 {
            return Err(ControlError::InvalidParameter {
                name: "delay_ms",
                value: delay_ms,
            });
        }
        let channel = self.find(name)?;
        let config = &self.engine.config;
        let samples = config
            .delay_samples(delay_ms)
            .min(config.max_delay_samples());
        channel.params().set_delay_samples(samples);
        Ok(self.samples_to_ms(samples))
    }

    fn samples_to_ms(&self, samples: usize) -> f32 {
        let config = &self.engine.config;
        let frames = samples / config.channels.max(1) as usize;
        frames as f32 * 1000.0 / config.sample_rate.max(1) as f32
    }

    // ── master / output ─────────────────────────────────────────────────

    pub fn set_master_gain(&self, gain: f32) -> std::result::Result<(), ControlError> {
        let gain = check_unit("master_gain", gain)?;
        self.engine
            .master_gain
            .store(gain.to_bits(), Ordering::Relaxed);
        Ok(())
    }

    pub fn master_gain(&self) -> f32 {
        self.engine.master_gain()
    }

    /// Rename the published output stream
    pub fn rename_output(&self, name: &str) -> std::result::Result<(), ControlError> {
        let name = validate_name(name)?;
        self.engine.output_name.store(Arc::new(name.to_string()));
        tracing::info!("Output stream renamed to '{}'", name);
        Ok(())
    }

    pub fn output_name(&self) -> String {
        self.engine.output_name.load().as_ref().clone()
    }

    /// Shared output name, read by sinks on every block
    pub fn output_name_source(&self) -> Arc<ArcSwap<String>> {
        self.engine.output_name.clone()
    }

    // ── effects ─────────────────────────────────────────────────────────

    pub fn set_effect_enabled(&self, stage: &str, enabled: bool) -> std::result::Result<(), ControlError> {
        self.toggles.set_enabled(stage, enabled)?;
        tracing::info!("Effect '{}' {}", stage, if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Stage names with their enabled flags, in chain order
    pub fn effect_states(&self) -> Vec<(String, bool)> {
        self.toggles.states()
    }

    pub fn effects_shed(&self) -> bool {
        self.toggles.is_shed()
    }

    /// Re-enable the effect chain after load shedding
    pub fn restore_effects(&self) {
        if self.toggles.is_shed() {
            self.toggles.restore();
            tracing::info!("Effect chain restored");
        }
    }

    // ── observation ─────────────────────────────────────────────────────

    /// Latest per-channel readings followed by the mix
    pub fn levels(&self) -> Vec<NamedLevel> {
        let channels = self.engine.channels.load();
        let mut levels: Vec<NamedLevel> = channels
            .iter()
            .map(|c| NamedLevel {
                name: c.name().to_string(),
                reading: c.level(),
            })
            .collect();
        levels.push(NamedLevel {
            name: MIX_LEVEL_NAME.to_string(),
            reading: self.engine.mix_level.load(),
        });
        levels
    }

    pub fn channels(&self) -> Vec<ChannelStatus> {
        self.engine
            .channels
            .load()
            .iter()
            .map(|c| ChannelStatus {
                name: c.name().to_string(),
                gain: c.params().gain(),
                muted: c.params().is_muted(),
                delay_ms: self.samples_to_ms(c.params().delay_samples()),
                level: c.level(),
                stalls: c.stall_count(),
            })
            .collect()
    }

    pub fn channel(&self, name: &str) -> std::result::Result<ChannelStatus, ControlError> {
        self.channels()
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ControlError::UnknownChannel(name.to_string()))
    }

    pub fn stats(&self) -> CycleStatsSnapshot {
        self.engine.stats.snapshot()
    }

    pub fn phase(&self) -> CyclePhase {
        self.engine.phase()
    }

    pub fn is_running(&self) -> bool {
        self.engine.is_running()
    }

    pub fn status(&self) -> MixerStatus {
        MixerStatus {
            running: self.is_running(),
            phase: self.phase(),
            output_name: self.output_name(),
            master_gain: self.master_gain(),
            limiter_reduction: f32::from_bits(
                self.engine.limiter_reduction.load(Ordering::Relaxed),
            ),
            effects_shed: self.effects_shed(),
            channel_count: self.engine.channels.load().len(),
            stats: self.stats(),
            events_dropped: self.engine.events.overflow_count(),
        }
    }

    /// Take every pending cycle event, log it, and reclaim retired channel
    /// lists
    pub fn drain_events(&self) -> Vec<MixEvent> {
        let mut drained = Vec::new();
        while let Some(event) = self.engine.events.try_pop() {
            event.log();
            drained.push(event);
        }
        self.reclaim();
        drained
    }

    // ── persistence ─────────────────────────────────────────────────────

    /// Current output name and gains in channel order
    pub fn capture_state(&self) -> MixerState {
        MixerState {
            output_stream_name: self.output_name(),
            per_source_volume: self
                .engine
                .channels
                .load()
                .iter()
                .map(|c| c.params().gain())
                .collect(),
        }
    }

    /// Apply a loaded record: the output name if present, gains by position
    /// for every usable entry. Returns the number of gains applied.
    pub fn apply_state(&self, state: &LoadedMixerState) -> usize {
        if let Some(name) = &state.output_stream_name {
            if let Err(e) = self.rename_output(name) {
                tracing::warn!("Ignoring stored output name: {}", e);
            }
        }

        let channels = self.engine.channels.load();
        let mut applied = 0;
        for (channel, gain) in channels.iter().zip(state.per_source_volume.iter()) {
            if let Some(gain) = gain {
                channel.params().set_gain(*gain);
                applied += 1;
            }
        }
        applied
    }

    pub fn save_state(&self, path: &Path) -> std::result::Result<(), ConfigError> {
        self.capture_state().save(path)?;
        tracing::info!("Saved mixer state to {}", path.display());
        Ok(())
    }

    pub fn load_state(&self, path: &Path) -> std::result::Result<usize, ConfigError> {
        let state = MixerState::load(path)?;
        let applied = self.apply_state(&state);
        tracing::info!(
            "Loaded mixer state from {} ({} gains applied)",
            path.display(),
            applied
        );
        Ok(applied)
    }

    // ── lifecycle ───────────────────────────────────────────────────────

    /// Stop mixing. Waits up to `timeout` for a cycle in progress to finish
    /// and returns whether it did. Later cycles write silence until
    /// [`resume`](Self::resume).
    pub fn stop(&self, timeout: Duration) -> bool {
        self.engine.running.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + timeout;
        while self.engine.phase().in_progress() {
            if Instant::now() >= deadline {
                tracing::warn!("Mix cycle still running after {:?}", timeout);
                return false;
            }
            std::thread::sleep(Duration::from_micros(200));
        }
        tracing::info!("Mixer stopped");
        true
    }

    pub fn resume(&self) {
        self.engine.running.store(true, Ordering::SeqCst);
        tracing::info!("Mixer resumed");
    }
}

fn reclaim_retired(control: &mut ControlState) {
    control.retired.retain(|list| Arc::strong_count(list) > 1);
}

fn validate_name(name: &str) -> std::result::Result<&str, ControlError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ControlError::InvalidName(name.to_string()));
    }
    Ok(trimmed)
}

fn check_unit(name: &'static str, value: f32) -> std::result::Result<f32, ControlError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ControlError::InvalidParameter { name, value });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::SourceHandle;
    use crate::error::Error;
    use std::collections::BTreeMap;

    struct ConstPort(f32);

    impl AudioSourcePort for ConstPort {
        fn receive(&mut self, out: &mut [f32]) -> usize {
            out.fill(self.0);
            out.len()
        }
    }

    /// Directory that serves constant-level ports
    struct FixedDirectory(Vec<&'static str>);

    impl SourceDirectory for FixedDirectory {
        fn snapshot(&self) -> BTreeMap<String, SourceHandle> {
            self.0
                .iter()
                .map(|n| {
                    (
                        n.to_string(),
                        SourceHandle {
                            name: n.to_string(),
                            address: "127.0.0.1:0".parse().unwrap(),
                        },
                    )
                })
                .collect()
        }

        fn open(
            &self,
            _handle: &SourceHandle,
        ) -> std::result::Result<Box<dyn AudioSourcePort>, SourceError> {
            Ok(Box::new(ConstPort(0.1)))
        }
    }

    fn engine() -> (MixerHandle, MixCycle) {
        MixerEngine::create(EngineConfig::default(), None).unwrap()
    }

    #[test]
    fn test_attach_and_detach() {
        let (handle, _cycle) = engine();
        handle.attach_port("a", Box::new(ConstPort(0.1))).unwrap();
        handle.attach_port("b", Box::new(ConstPort(0.1))).unwrap();
        assert_eq!(handle.channel_names(), vec!["a", "b"]);

        assert_eq!(
            handle.attach_port("a", Box::new(ConstPort(0.1))),
            Err(ControlError::AlreadyAttached("a".to_string()))
        );

        handle.detach("a").unwrap();
        assert_eq!(handle.channel_names(), vec!["b"]);
        assert_eq!(
            handle.detach("a"),
            Err(ControlError::UnknownChannel("a".to_string()))
        );
    }

    #[test]
    fn test_roster_is_bounded() {
        let (handle, _cycle) = engine();
        for i in 0..MAX_SOURCES {
            handle
                .attach_port(&format!("s{}", i), Box::new(ConstPort(0.0)))
                .unwrap();
        }
        assert_eq!(
            handle.attach_port("one-more", Box::new(ConstPort(0.0))),
            Err(ControlError::TooManySources(MAX_SOURCES))
        );
    }

    #[test]
    fn test_attach_through_directory() {
        let (handle, _cycle) = engine();
        assert!(matches!(
            handle.attach("cam"),
            Err(Error::Control(ControlError::NoDirectory))
        ));

        let handle = handle.with_directory(Arc::new(FixedDirectory(vec!["cam"])));
        handle.attach("cam").unwrap();
        assert!(handle.is_attached("cam"));
        assert!(matches!(
            handle.attach("ghost"),
            Err(Error::Source(SourceError::Unavailable(_)))
        ));
        assert!(matches!(
            handle.attach("cam"),
            Err(Error::Control(ControlError::AlreadyAttached(_)))
        ));
    }

    #[test]
    fn test_parameter_validation() {
        let (handle, _cycle) = engine();
        handle.attach_port("a", Box::new(ConstPort(0.1))).unwrap();

        assert!(handle.set_gain("a", 0.5).is_ok());
        assert!(handle.set_gain("a", 1.5).is_err());
        assert!(handle.set_gain("a", f32::NAN).is_err());
        assert!(handle.set_master_gain(-0.1).is_err());
        assert!(handle.set_delay_ms("a", -1.0).is_err());
        assert_eq!(
            handle.set_gain("zzz", 0.5),
            Err(ControlError::UnknownChannel("zzz".to_string()))
        );
        assert!(handle.rename_output("   ").is_err());
    }

    #[test]
    fn test_unbounded_max_delay_rejected() {
        for max_delay_ms in [f32::INFINITY, f32::NAN, 1e7] {
            let config = EngineConfig {
                channels: 1,
                max_delay_ms,
                ..EngineConfig::default()
            };
            assert!(matches!(
                MixerEngine::create(config, None),
                Err(Error::Config(_))
            ));
        }
    }

    #[test]
    fn test_delay_clamped_to_maximum() {
        let (handle, _cycle) = engine();
        handle.attach_port("a", Box::new(ConstPort(0.1))).unwrap();

        let applied = handle.set_delay_ms("a", 5000.0).unwrap();
        assert!((applied - 1000.0).abs() < 0.1);
        assert_eq!(handle.set_delay_ms("a", 10.0).unwrap(), 10.0);
        assert_eq!(handle.channel("a").unwrap().delay_ms, 10.0);
    }

    #[test]
    fn test_state_round_trip() {
        let (handle, _cycle) = engine();
        handle.attach_port("a", Box::new(ConstPort(0.1))).unwrap();
        handle.attach_port("b", Box::new(ConstPort(0.1))).unwrap();
        handle.set_gain("a", 0.3).unwrap();
        handle.rename_output("Studio").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        handle.save_state(&path).unwrap();

        handle.set_gain("a", 1.0).unwrap();
        handle.set_gain("b", 0.7).unwrap();
        handle.rename_output("Other").unwrap();

        assert_eq!(handle.load_state(&path).unwrap(), 2);
        assert_eq!(handle.output_name(), "Studio");
        assert!((handle.channel("a").unwrap().gain - 0.3).abs() < 1e-6);
        assert_eq!(handle.channel("b").unwrap().gain, 1.0);
    }

    #[test]
    fn test_partial_state_keeps_prior_gains() {
        let (handle, _cycle) = engine();
        for name in ["a", "b", "c"] {
            handle.attach_port(name, Box::new(ConstPort(0.1))).unwrap();
            handle.set_gain(name, 0.5).unwrap();
        }

        let state = MixerState::parse(r#"{"volume_settings": [0.2, "loud"]}"#).unwrap();
        assert_eq!(handle.apply_state(&state), 1);

        let gains: Vec<f32> = handle.channels().iter().map(|c| c.gain).collect();
        assert_eq!(gains, vec![0.2, 0.5, 0.5]);
        assert_eq!(handle.output_name(), DEFAULT_OUTPUT_NAME);
    }

    #[test]
    fn test_detached_channel_reclaimed_after_cycle() {
        let (handle, mut cycle) = engine();
        handle.attach_port("a", Box::new(ConstPort(0.1))).unwrap();
        let mut out = vec![0.0f32; 2048];
        cycle.process(&mut out);

        handle.detach("a").unwrap();
        cycle.process(&mut out);
        assert_eq!(handle.reclaim(), 0);
    }

    #[test]
    fn test_levels_include_mix() {
        let (handle, mut cycle) = engine();
        handle.attach_port("a", Box::new(ConstPort(0.5))).unwrap();
        let mut out = vec![0.0f32; 2048];
        cycle.process(&mut out);

        let levels = handle.levels();
        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0].name, "a");
        assert_eq!(levels[1].name, MIX_LEVEL_NAME);
        assert!((levels[1].reading.average - 0.5).abs() < 1e-6);
    }
}
