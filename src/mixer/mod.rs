//! Real-time mixing engine
//!
//! Per cycle: pull every channel (delay, meter, gain), sum, master gain,
//! limiter, effect chain, mix meter, output.

pub mod bus;
pub mod channel;
pub mod cycle;
pub mod delay;
pub mod driver;
pub mod engine;
pub mod events;
pub mod limiter;
pub mod meter;

pub use bus::Mixer;
pub use channel::{PullPolicy, PullStatus, SourceChannel};
pub use cycle::{CyclePhase, CycleStatsSnapshot, MixCycle};
pub use delay::DelayLine;
pub use driver::CycleDriver;
pub use engine::{ChannelStatus, MixerEngine, MixerHandle, MixerStatus};
pub use events::{MixEvent, MixEventKind};
pub use limiter::Limiter;
pub use meter::{LevelMeter, LevelReading, NamedLevel};
