//! Audio subsystem module

pub mod buffer;
#[cfg(feature = "device")]
pub mod device;
pub mod gc;
pub mod port;

pub use buffer::{AudioFrame, FrameBox, RingBuffer};
#[cfg(feature = "device")]
pub use device::{list_output_devices, DeviceOutput};
pub use port::{AudioSinkPort, AudioSourcePort, BufferedSource, NullSink};
