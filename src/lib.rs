//! # Net Audio Mixer
//!
//! Real-time mixing of several independently clocked network audio sources
//! into one re-published stream.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │   UDP source A        UDP source B        UDP source C                   │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐                │
//! │  │ Receiver    │     │ Receiver    │     │ Receiver    │  network::     │
//! │  │ thread      │     │ thread      │     │ thread      │  receiver      │
//! │  └──────┬──────┘     └──────┬──────┘     └──────┬──────┘                │
//! │         ▼                   ▼                   ▼                        │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐                │
//! │  │ Ring buffer │     │ Ring buffer │     │ Ring buffer │  audio::buffer │
//! │  └──────┬──────┘     └──────┬──────┘     └──────┬──────┘                │
//! │ ════════╪═══════════════════╪═══════════════════╪══════ real-time ═════ │
//! │         ▼                   ▼                   ▼                        │
//! │  ┌─────────────┐     ┌─────────────┐     ┌─────────────┐                │
//! │  │ pull → delay│     │ pull → delay│     │ pull → delay│  mixer::channel│
//! │  │ meter → gain│     │ meter → gain│     │ meter → gain│                │
//! │  └──────┬──────┘     └──────┬──────┘     └──────┬──────┘                │
//! │         └───────────────────┼───────────────────┘                        │
//! │                             ▼                                            │
//! │             sum → master gain → limiter → effects → meter                │
//! │                             │                         mixer::cycle       │
//! │ ════════════════════════════╪════════════════════════════════════════════│
//! │                             ▼                                            │
//! │                  UDP sink / sound card output                            │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Control (attach/detach, gain, mute, delay, effects) happens on other
//! threads through [`mixer::MixerHandle`]. The real-time side only ever reads
//! atomically published snapshots and scalar atomics.

pub mod audio;
pub mod config;
pub mod discovery;
pub mod effects;
pub mod error;
pub mod mixer;
pub mod network;
pub mod ui;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for audio processing
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Default block size in frames
    pub const DEFAULT_BLOCK_FRAMES: usize = 1024;

    /// Largest block the mix cycle processes in one pass (frames)
    pub const MAX_BLOCK_FRAMES: usize = 4096;

    /// Default maximum per-source delay in milliseconds
    pub const DEFAULT_MAX_DELAY_MS: f32 = 1000.0;

    /// Upper bound for the configured maximum delay in milliseconds
    pub const MAX_DELAY_MS: f32 = 10_000.0;

    /// Default limiter threshold (fraction of full scale)
    pub const DEFAULT_LIMITER_THRESHOLD: f32 = 0.9;

    /// Maximum number of concurrently attached sources
    pub const MAX_SOURCES: usize = 16;

    /// Default UDP port for the mixed output stream
    pub const DEFAULT_UDP_PORT: u16 = 5000;

    /// Default HTTP port for control
    pub const DEFAULT_HTTP_PORT: u16 = 8080;

    /// Maximum packet size for UDP
    pub const MAX_PACKET_SIZE: usize = 1472; // MTU - IP/UDP headers

    /// Lock-free ring buffer capacity (in frames)
    pub const RING_BUFFER_CAPACITY: usize = 256;

    /// Capacity of the real-time event queue
    pub const EVENT_QUEUE_CAPACITY: usize = 1024;

    /// Default output stream name
    pub const DEFAULT_OUTPUT_NAME: &str = "Mixed Audio";

    /// Interval between source directory refreshes in seconds
    pub const DISCOVERY_INTERVAL_SECS: u64 = 5;

    /// Name used for the mix in level readings
    pub const MIX_LEVEL_NAME: &str = "mix";
}
