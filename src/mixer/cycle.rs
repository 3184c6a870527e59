//! The real-time mix cycle
//!
//! One call per audio callback (or driver tick). Everything the cycle
//! touches is preallocated; it reads the channel snapshot and parameter
//! atomics, never waits on a lock, and reports problems as [`MixEvent`]s.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::audio::port::AudioSinkPort;
use crate::constants::MAX_SOURCES;
use crate::effects::EffectChain;
use crate::mixer::bus::Mixer;
use crate::mixer::channel::{PullPolicy, PullStatus};
use crate::mixer::engine::MixerEngine;
use crate::mixer::events::{MixEvent, MixEventKind};
use crate::mixer::limiter::Limiter;
use crate::mixer::meter::LevelMeter;

/// Where the cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CyclePhase {
    Idle = 0,
    Pulling = 1,
    Mixing = 2,
    Limiting = 3,
    Effecting = 4,
    Metering = 5,
    Delivered = 6,
}

impl CyclePhase {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => CyclePhase::Pulling,
            2 => CyclePhase::Mixing,
            3 => CyclePhase::Limiting,
            4 => CyclePhase::Effecting,
            5 => CyclePhase::Metering,
            6 => CyclePhase::Delivered,
            _ => CyclePhase::Idle,
        }
    }

    /// True between the start of a cycle and its output being written
    pub fn in_progress(self) -> bool {
        !matches!(self, CyclePhase::Idle | CyclePhase::Delivered)
    }
}

/// Cycle counters, written by the cycle and read by the control side
#[derive(Debug, Default)]
pub struct CycleStats {
    pub cycles: AtomicU64,
    pub stalls: AtomicU64,
    pub effect_failures: AtomicU64,
    pub deadline_misses: AtomicU64,
    pub sink_failures: AtomicU64,
    pub last_cycle_us: AtomicU64,
}

/// Point-in-time copy of [`CycleStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CycleStatsSnapshot {
    pub cycles: u64,
    pub stalls: u64,
    pub effect_failures: u64,
    pub deadline_misses: u64,
    pub sink_failures: u64,
    pub last_cycle_us: u64,
}

impl CycleStats {
    pub fn snapshot(&self) -> CycleStatsSnapshot {
        CycleStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
            effect_failures: self.effect_failures.load(Ordering::Relaxed),
            deadline_misses: self.deadline_misses.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            last_cycle_us: self.last_cycle_us.load(Ordering::Relaxed),
        }
    }
}

/// Real-time side of the mixer. Created together with its
/// [`MixerHandle`](crate::mixer::MixerHandle) by [`MixerEngine::create`].
pub struct MixCycle {
    engine: Arc<MixerEngine>,
    limiter: Limiter,
    effects: EffectChain,
    policy: PullPolicy,
    /// Mix accumulator, `max_block` samples
    acc: Vec<f32>,
    /// One `max_block` slot per possible channel
    channel_blocks: Vec<f32>,
    /// Block handed to a sink by `run`
    output: Vec<f32>,
    max_block: usize,
    consecutive_misses: u32,
    cycle: u64,
}

impl MixCycle {
    pub(crate) fn new(engine: Arc<MixerEngine>, limiter: Limiter, effects: EffectChain) -> Self {
        let config = engine.config();
        let max_block = engine.max_block();
        let policy = PullPolicy::for_block(
            config.block_frames,
            config.sample_rate,
            config.pull_budget_fraction,
        );
        let block_samples = config.block_samples();

        Self {
            engine,
            limiter,
            effects,
            policy,
            acc: vec![0.0; max_block],
            channel_blocks: vec![0.0; max_block * MAX_SOURCES],
            output: vec![0.0; block_samples],
            max_block,
            consecutive_misses: 0,
            cycle: 0,
        }
    }

    /// Override the pull budget
    pub fn with_pull_policy(mut self, policy: PullPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pull_policy(&self) -> PullPolicy {
        self.policy
    }

    /// Number of completed cycles
    pub fn cycle_count(&self) -> u64 {
        self.cycle
    }

    /// Fill `out` with the next mixed audio.
    ///
    /// Requests longer than the preallocated block are mixed as consecutive
    /// sub-blocks. Returns false, leaving silence in `out`, while the mixer
    /// is stopped.
    pub fn process(&mut self, out: &mut [f32]) -> bool {
        let mut mixed = true;
        for chunk in out.chunks_mut(self.max_block) {
            mixed &= self.mix_block(chunk);
        }
        mixed
    }

    /// Mix one configured block and hand it to `sink`. Sink errors become
    /// `SinkFailed` events. Returns false while the mixer is stopped.
    pub fn run(&mut self, sink: &mut dyn AudioSinkPort) -> bool {
        let mut output = std::mem::take(&mut self.output);
        let mixed = self.process(&mut output);

        if mixed && sink.deliver(&output).is_err() {
            self.engine.stats().sink_failures.fetch_add(1, Ordering::Relaxed);
            self.engine
                .events()
                .push(MixEvent::new(MixEventKind::SinkFailed, "", self.cycle));
        }

        self.output = output;
        mixed
    }

    fn mix_block(&mut self, out: &mut [f32]) -> bool {
        let Self {
            engine,
            limiter,
            effects,
            policy,
            acc,
            channel_blocks,
            max_block,
            consecutive_misses,
            cycle,
            ..
        } = self;
        let max_block = *max_block;
        let cycle_index = *cycle;
        let events = engine.events();
        let stats = engine.stats();

        // Publish the phase before looking at `running`; `stop` does the
        // reverse, so one of the two always sees the other.
        engine.set_phase(CyclePhase::Pulling);
        if !engine.is_running() {
            out.fill(0.0);
            engine.set_phase(CyclePhase::Idle);
            return false;
        }

        let start = Instant::now();
        let len = out.len();
        let acc = &mut acc[..len];

        let snapshot = engine.channel_snapshot();
        let count = snapshot.len().min(MAX_SOURCES);
        for (i, channel) in snapshot.iter().take(count).enumerate() {
            let block = &mut channel_blocks[i * max_block..i * max_block + len];
            if channel.pull(block, policy) != PullStatus::Delivered {
                stats.stalls.fetch_add(1, Ordering::Relaxed);
                events.push(MixEvent::new(
                    MixEventKind::SourceStalled,
                    channel.name(),
                    cycle_index,
                ));
            }
        }

        engine.set_phase(CyclePhase::Mixing);
        Mixer::mix(
            channel_blocks
                .chunks(max_block)
                .take(count)
                .map(|block| &block[..len]),
            acc,
            engine.master_gain(),
        );

        engine.set_phase(CyclePhase::Limiting);
        limiter.limit(acc);
        engine.store_limiter_reduction(limiter.reduction());

        engine.set_phase(CyclePhase::Effecting);
        let failures = effects.apply(acc, |stage| {
            events.push(MixEvent::new(
                MixEventKind::EffectStageFailed,
                stage,
                cycle_index,
            ));
        });
        if failures > 0 {
            stats
                .effect_failures
                .fetch_add(failures as u64, Ordering::Relaxed);
        }

        engine.set_phase(CyclePhase::Metering);
        engine.store_mix_level(LevelMeter::measure(acc));

        out.copy_from_slice(acc);
        drop(snapshot);
        engine.set_phase(CyclePhase::Delivered);

        let elapsed = start.elapsed();
        let budget = engine.block_budget(len);
        if elapsed > budget {
            *consecutive_misses += 1;
            stats.deadline_misses.fetch_add(1, Ordering::Relaxed);
            events.push(MixEvent::new(
                MixEventKind::DeadlineMissed {
                    elapsed_us: duration_us(elapsed),
                    budget_us: duration_us(budget),
                },
                "",
                cycle_index,
            ));

            let threshold = engine.config().overload_threshold;
            if threshold > 0
                && *consecutive_misses >= threshold
                && !effects.is_empty()
                && !effects.is_shed()
            {
                effects.shed();
                events.push(MixEvent::new(MixEventKind::LoadShed, "", cycle_index));
            }
        } else {
            *consecutive_misses = 0;
        }

        stats.cycles.fetch_add(1, Ordering::Relaxed);
        stats
            .last_cycle_us
            .store(elapsed.as_micros() as u64, Ordering::Relaxed);
        *cycle += 1;

        engine.set_phase(CyclePhase::Idle);
        true
    }
}

fn duration_us(d: Duration) -> u32 {
    d.as_micros().min(u32::MAX as u128) as u32
}
