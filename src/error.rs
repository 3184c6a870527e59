//! Error types for the audio mixer

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Effect error: {0}")]
    Effect(#[from] EffectError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Control error: {0}")]
    Control(#[from] ControlError),

    #[error("Audio device error: {0}")]
    Device(#[from] DeviceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio source errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    #[error("Source stalled: {0}")]
    Stalled(String),

    #[error("Failed to open source {name}: {reason}")]
    OpenFailed { name: String, reason: String },
}

/// Effect stage errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EffectError {
    #[error("Effect stage {stage} failed: {reason}")]
    StageFailed { stage: String, reason: String },

    #[error("Invalid parameter {param}: {value}")]
    InvalidParameter { param: &'static str, value: f32 },

    #[error("Block shape mismatch: {len} samples for {channels} channels")]
    ShapeMismatch { len: usize, channels: u16 },
}

/// Configuration load/save errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration from {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("Failed to save configuration to {path}: {reason}")]
    Save { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Invalid packet format")]
    InvalidPacket,
}

/// Sound card output errors
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Unsupported configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Stream error: {0}")]
    StreamError(String),
}

/// Control surface errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlError {
    #[error("Channel not found: {0}")]
    UnknownChannel(String),

    #[error("Effect stage not found: {0}")]
    UnknownEffect(String),

    #[error("Channel already attached: {0}")]
    AlreadyAttached(String),

    #[error("Maximum sources reached: {0}")]
    TooManySources(usize),

    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: f32 },

    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    #[error("No source directory configured")]
    NoDirectory,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
