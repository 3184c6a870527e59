//! Source channel: one attached source with its delay, gain and mute
//!
//! Parameters are plain atomics written by the control thread and read once
//! per cycle. The DSP state (port, delay line, scratch) is only ever locked
//! by the mix cycle, and only with `try_lock`, so the cycle never waits.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::audio::port::AudioSourcePort;
use crate::mixer::delay::DelayLine;
use crate::mixer::meter::{AtomicLevel, LevelMeter, LevelReading};

/// Bound on the short-read retry loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PullPolicy {
    /// Wall-clock budget for filling one block
    pub timeout: Duration,
    /// Upper bound on receive calls per block
    pub max_attempts: u32,
}

impl PullPolicy {
    /// Budget as a fraction of one block's playback time
    pub fn for_block(frames: usize, sample_rate: u32, fraction: f32) -> Self {
        let block_secs = frames as f64 / sample_rate.max(1) as f64;
        let fraction = fraction.clamp(0.0, 1.0) as f64;
        Self {
            timeout: Duration::from_secs_f64(block_secs * fraction),
            max_attempts: 4096,
        }
    }
}

impl Default for PullPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5),
            max_attempts: 4096,
        }
    }
}

/// Outcome of one pull
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    /// A full block was read
    Delivered,
    /// The source ran out of budget; the block is silence
    Stalled,
    /// The channel state was locked elsewhere; the block is silence
    Busy,
}

/// Control-side parameters, one atomic per scalar
#[derive(Debug)]
pub struct ChannelParams {
    gain: AtomicU32,
    muted: AtomicBool,
    delay_samples: AtomicUsize,
}

impl ChannelParams {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: AtomicU32::new(gain.clamp(0.0, 1.0).to_bits()),
            muted: AtomicBool::new(false),
            delay_samples: AtomicUsize::new(0),
        }
    }

    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    pub fn delay_samples(&self) -> usize {
        self.delay_samples.load(Ordering::Relaxed)
    }

    pub fn set_delay_samples(&self, samples: usize) {
        self.delay_samples.store(samples, Ordering::Relaxed);
    }
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self::new(1.0)
    }
}

struct ChannelState {
    port: Box<dyn AudioSourcePort>,
    delay: DelayLine,
    raw: Vec<f32>,
}

/// One attached source
pub struct SourceChannel {
    name: String,
    params: ChannelParams,
    level: AtomicLevel,
    stalls: AtomicU64,
    state: Mutex<ChannelState>,
}

impl SourceChannel {
    /// Create a channel. `max_delay` and `max_block` are in samples.
    pub fn new(
        name: impl Into<String>,
        port: Box<dyn AudioSourcePort>,
        max_delay: usize,
        max_block: usize,
    ) -> Self {
        Self {
            name: name.into(),
            params: ChannelParams::default(),
            level: AtomicLevel::new(),
            stalls: AtomicU64::new(0),
            state: Mutex::new(ChannelState {
                port,
                delay: DelayLine::new(max_delay, max_block),
                raw: vec![0.0; max_block.max(1)],
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &ChannelParams {
        &self.params
    }

    /// Latest post-delay, pre-gain reading
    pub fn level(&self) -> LevelReading {
        self.level.load()
    }

    /// Number of cycles this channel contributed silence because of a stall
    pub fn stall_count(&self) -> u64 {
        self.stalls.load(Ordering::Relaxed)
    }

    /// Produce this channel's contribution for one cycle into `out`.
    ///
    /// Reads exactly `out.len()` samples from the port (retrying short reads
    /// within `policy`), runs them through the delay line, meters the
    /// delayed block, then applies gain or mute. A stalled or busy channel
    /// writes silence, and the delay line still advances so the timeline
    /// stays continuous.
    pub fn pull(&self, out: &mut [f32], policy: &PullPolicy) -> PullStatus {
        let Some(mut guard) = self.state.try_lock() else {
            out.fill(0.0);
            self.stalls.fetch_add(1, Ordering::Relaxed);
            return PullStatus::Busy;
        };
        let state = &mut *guard;

        let len = out.len().min(state.raw.len());
        debug_assert_eq!(len, out.len(), "block larger than channel scratch");
        let raw = &mut state.raw[..len];

        let status = if read_exact(state.port.as_mut(), raw, policy) {
            PullStatus::Delivered
        } else {
            raw.fill(0.0);
            self.stalls.fetch_add(1, Ordering::Relaxed);
            PullStatus::Stalled
        };

        let delay = self.params.delay_samples();
        if delay != state.delay.delay() {
            state.delay.configure(delay);
        }
        state.delay.push(raw, &mut out[..len]);

        self.level.store(LevelMeter::measure(&out[..len]));

        if self.params.is_muted() {
            out.fill(0.0);
        } else {
            let gain = self.params.gain();
            if gain != 1.0 {
                out.iter_mut().for_each(|s| *s *= gain);
            }
        }

        status
    }
}

/// Fill `buf` from `port`, concatenating short reads. Returns false if the
/// budget ran out first.
fn read_exact(port: &mut dyn AudioSourcePort, buf: &mut [f32], policy: &PullPolicy) -> bool {
    let len = buf.len();
    let mut filled = 0;
    let mut attempts = 0u32;
    let deadline = Instant::now() + policy.timeout;

    while filled < len {
        // A port can claim more than it was offered; never trust it
        let got = port.receive(&mut buf[filled..]).min(len - filled);
        filled += got;
        if filled >= len {
            return true;
        }

        attempts += 1;
        if attempts >= policy.max_attempts || Instant::now() >= deadline {
            return false;
        }
        if got == 0 {
            std::thread::yield_now();
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Port that hands out scripted chunk sizes of a ramp signal
    struct ChunkedPort {
        chunks: VecDeque<usize>,
        next: f32,
    }

    impl AudioSourcePort for ChunkedPort {
        fn receive(&mut self, out: &mut [f32]) -> usize {
            let n = self.chunks.pop_front().unwrap_or(0).min(out.len());
            for sample in &mut out[..n] {
                *sample = self.next;
                self.next += 1.0;
            }
            n
        }
    }

    struct ConstPort(f32);

    impl AudioSourcePort for ConstPort {
        fn receive(&mut self, out: &mut [f32]) -> usize {
            out.fill(self.0);
            out.len()
        }
    }

    struct DeadPort;

    impl AudioSourcePort for DeadPort {
        fn receive(&mut self, _out: &mut [f32]) -> usize {
            0
        }
    }

    fn quick_policy() -> PullPolicy {
        PullPolicy {
            timeout: Duration::from_millis(2),
            max_attempts: 64,
        }
    }

    #[test]
    fn test_short_reads_concatenated() {
        let port = ChunkedPort {
            chunks: VecDeque::from(vec![3, 0, 2, 5]),
            next: 1.0,
        };
        let channel = SourceChannel::new("a", Box::new(port), 0, 8);
        let mut out = [0.0f32; 8];

        assert_eq!(channel.pull(&mut out, &quick_policy()), PullStatus::Delivered);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_gain_and_mute() {
        let channel = SourceChannel::new("a", Box::new(ConstPort(0.4)), 0, 4);
        let mut out = [0.0f32; 4];

        channel.params().set_gain(0.5);
        channel.pull(&mut out, &quick_policy());
        assert!(out.iter().all(|s| (s - 0.2).abs() < 1e-6));

        channel.params().set_muted(true);
        channel.pull(&mut out, &quick_policy());
        assert_eq!(out, [0.0; 4]);
        // Meter still sees the source while muted
        assert!(channel.level().average > 0.39);
    }

    #[test]
    fn test_gain_is_clamped() {
        let params = ChannelParams::new(3.0);
        assert_eq!(params.gain(), 1.0);
        params.set_gain(-1.0);
        assert_eq!(params.gain(), 0.0);
    }

    #[test]
    fn test_stalled_source_yields_silence() {
        let channel = SourceChannel::new("dead", Box::new(DeadPort), 0, 16);
        let mut out = [1.0f32; 16];

        assert_eq!(channel.pull(&mut out, &quick_policy()), PullStatus::Stalled);
        assert_eq!(out, [0.0; 16]);
        assert_eq!(channel.stall_count(), 1);
    }

    #[test]
    fn test_meter_is_pre_gain() {
        let channel = SourceChannel::new("a", Box::new(ConstPort(0.5)), 0, 4);
        channel.params().set_gain(0.0);
        let mut out = [0.0f32; 4];
        channel.pull(&mut out, &quick_policy());
        assert_eq!(out, [0.0; 4]);
        assert!((channel.level().average - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_delay_applied_from_params() {
        let port = ChunkedPort {
            chunks: VecDeque::from(vec![4, 4]),
            next: 1.0,
        };
        let channel = SourceChannel::new("a", Box::new(port), 8, 4);
        channel.params().set_delay_samples(2);

        let mut out = [0.0f32; 4];
        channel.pull(&mut out, &quick_policy());
        assert_eq!(out, [0.0, 0.0, 1.0, 2.0]);
        channel.pull(&mut out, &quick_policy());
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_policy_for_block() {
        let policy = PullPolicy::for_block(1024, 48000, 0.25);
        let expected = 1024.0 / 48000.0 * 0.25;
        assert!((policy.timeout.as_secs_f64() - expected).abs() < 1e-6);
    }
}
