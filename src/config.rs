//! Application configuration and persisted mixer state
//!
//! `AppConfig` is the TOML file read at startup. `MixerState` is the small
//! JSON record of output name and per-source volumes that the user saves
//! and loads at runtime.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::ConfigError;

/// Mixing engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Frames per mix cycle
    pub block_frames: usize,
    /// Largest per-source delay in milliseconds
    pub max_delay_ms: f32,
    /// Limiter threshold as a fraction of full scale
    pub limiter_threshold: f32,
    /// Share of the block period a source may spend filling its block
    pub pull_budget_fraction: f32,
    /// Consecutive deadline misses before effects are shed
    pub overload_threshold: u32,
    pub master_gain: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            block_frames: DEFAULT_BLOCK_FRAMES,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            limiter_threshold: DEFAULT_LIMITER_THRESHOLD,
            pull_budget_fraction: 0.25,
            overload_threshold: 8,
            master_gain: 1.0,
        }
    }
}

impl EngineConfig {
    /// Samples per block (frames × channels)
    pub fn block_samples(&self) -> usize {
        self.block_frames * self.channels as usize
    }

    /// Playback time of one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_frames as f64 / self.sample_rate.max(1) as f64)
    }

    /// Convert a delay in milliseconds to interleaved samples (whole frames).
    /// The delay is bounded to `0..=MAX_DELAY_MS`; NaN counts as zero.
    pub fn delay_samples(&self, delay_ms: f32) -> usize {
        let delay_ms = delay_ms.max(0.0).min(MAX_DELAY_MS);
        let frames = (delay_ms as f64 * self.sample_rate as f64 / 1000.0).round() as usize;
        frames.saturating_mul(self.channels as usize)
    }

    /// Largest delay in interleaved samples
    pub fn max_delay_samples(&self) -> usize {
        self.delay_samples(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be positive".into()));
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(ConfigError::Invalid(format!(
                "channels must be 1..=8, got {}",
                self.channels
            )));
        }
        if self.block_frames == 0 || self.block_frames > MAX_BLOCK_FRAMES {
            return Err(ConfigError::Invalid(format!(
                "block_frames must be 1..={}, got {}",
                MAX_BLOCK_FRAMES, self.block_frames
            )));
        }
        if !(self.limiter_threshold > 0.0 && self.limiter_threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "limiter_threshold must be in (0, 1], got {}",
                self.limiter_threshold
            )));
        }
        if !(self.max_delay_ms >= 0.0 && self.max_delay_ms <= MAX_DELAY_MS) {
            return Err(ConfigError::Invalid(format!(
                "max_delay_ms must be in 0..={}, got {}",
                MAX_DELAY_MS, self.max_delay_ms
            )));
        }
        Ok(())
    }
}

/// Output stream settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Name published with the mixed stream
    pub stream_name: String,
    /// Where the mixed stream is sent
    pub target: SocketAddr,
    /// Local address for the sending socket
    pub bind: SocketAddr,
    /// Play the mix on this sound card instead of sending it (`device`
    /// feature; empty string selects the default output)
    pub device: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            stream_name: DEFAULT_OUTPUT_NAME.to_string(),
            target: SocketAddr::from(([127, 0, 0, 1], DEFAULT_UDP_PORT)),
            bind: SocketAddr::from(([0, 0, 0, 0], 0)),
            device: None,
        }
    }
}

/// One configured network source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    /// Local address the source's stream arrives on
    pub bind: SocketAddr,
    /// Attach automatically when the source is available
    #[serde(default = "default_true")]
    pub auto_attach: bool,
}

fn default_true() -> bool {
    true
}

/// Equalizer parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqSettings {
    pub enabled: bool,
    pub low_gain_db: f32,
    pub mid_gain_db: f32,
    pub high_gain_db: f32,
    pub low_freq_hz: f32,
    pub mid_freq_hz: f32,
    pub high_freq_hz: f32,
    pub q: f32,
}

impl Default for EqSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            low_gain_db: 0.0,
            mid_gain_db: 0.0,
            high_gain_db: 0.0,
            low_freq_hz: 200.0,
            mid_freq_hz: 1000.0,
            high_freq_hz: 5000.0,
            q: 0.707,
        }
    }
}

/// Compressor parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorSettings {
    pub enabled: bool,
    pub threshold_db: f32,
    pub ratio: f32,
    pub attack_ms: f32,
    pub release_ms: f32,
    pub makeup_db: f32,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: -18.0,
            ratio: 4.0,
            attack_ms: 5.0,
            release_ms: 100.0,
            makeup_db: 0.0,
        }
    }
}

/// Phase rotation parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSettings {
    pub enabled: bool,
    /// Rotation in degrees; 180 flips polarity
    pub phase_deg: f32,
}

impl Default for PhaseSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            phase_deg: 180.0,
        }
    }
}

/// Post-mix effect settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectsConfig {
    pub eq: EqSettings,
    pub compressor: CompressorSettings,
    pub phase: PhaseSettings,
}

/// Web UI settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiConfig {
    pub bind_address: String,
    pub http_port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            http_port: DEFAULT_HTTP_PORT,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub output: OutputConfig,
    pub sources: Vec<SourceConfig>,
    pub effects: EffectsConfig,
    pub ui: UiConfig,
    /// Where `MixerState` is saved; defaults to the data directory
    pub state_file: Option<PathBuf>,
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "net-audio-mixer")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Default mixer state location
    pub fn default_state_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "net-audio-mixer")
            .map(|dirs| dirs.data_dir().join("mixer_state.json"))
    }

    /// Resolved mixer state path
    pub fn state_path(&self) -> PathBuf {
        self.state_file
            .clone()
            .or_else(Self::default_state_path)
            .unwrap_or_else(|| PathBuf::from("mixer_state.json"))
    }

    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Load {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&text).map_err(|e| match e {
            ConfigError::Load { reason, .. } => ConfigError::Load {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }

    /// Load from a file, falling back to defaults if it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = toml::to_string_pretty(self).map_err(|e| ConfigError::Save {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        write_file(path, &text)
    }
}

/// Persisted mixer state as written
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MixerState {
    pub output_stream_name: String,
    pub per_source_volume: Vec<f32>,
}

/// Mixer state as read back. Anything missing or unusable is `None` and
/// leaves the current value alone.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LoadedMixerState {
    pub output_stream_name: Option<String>,
    pub per_source_volume: Vec<Option<f32>>,
}

impl MixerState {
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Save {
            path: "<inline>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = self.to_json().map_err(|e| match e {
            ConfigError::Save { reason, .. } => ConfigError::Save {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })?;
        write_file(path, &text)
    }

    /// Parse a state record leniently.
    ///
    /// The document must be a JSON object; beyond that, unknown keys are
    /// ignored, the older `ndi_output_stream_name` / `volume_settings` keys
    /// are accepted, and volume entries that are not finite numbers come
    /// back as `None`.
    pub fn parse(text: &str) -> Result<LoadedMixerState, ConfigError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ConfigError::Load {
                path: "<inline>".to_string(),
                reason: e.to_string(),
            })?;
        let object = value.as_object().ok_or_else(|| ConfigError::Load {
            path: "<inline>".to_string(),
            reason: "expected a JSON object".to_string(),
        })?;

        let output_stream_name = object
            .get("output_stream_name")
            .or_else(|| object.get("ndi_output_stream_name"))
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let per_source_volume = object
            .get("per_source_volume")
            .or_else(|| object.get("volume_settings"))
            .and_then(|v| v.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .map(|v| {
                        v.as_f64()
                            .map(|g| g as f32)
                            .filter(|g| g.is_finite())
                            .map(|g| g.clamp(0.0, 1.0))
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(LoadedMixerState {
            output_stream_name,
            per_source_volume,
        })
    }

    pub fn load(path: &Path) -> Result<LoadedMixerState, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|e| match e {
            ConfigError::Load { reason, .. } => ConfigError::Load {
                path: path.display().to_string(),
                reason,
            },
            other => other,
        })
    }
}

fn write_file(path: &Path, text: &str) -> Result<(), ConfigError> {
    let save_err = |e: std::io::Error| ConfigError::Save {
        path: path.display().to_string(),
        reason: e.to_string(),
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(save_err)?;
    }
    std::fs::write(path, text).map_err(save_err)
}
