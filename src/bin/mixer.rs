//! Network Audio Mixer
//!
//! Receives the configured UDP sources, mixes them and publishes the result
//! over UDP (or on a sound card with the `device` feature). Controlled over
//! HTTP.
//!
//! Usage: `mixer [config.toml]`

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use net_audio_mixer::{
    config::AppConfig,
    constants::*,
    discovery::{reconcile, DiscoveryMonitor, StaticDirectory},
    effects::{EffectChain, StageContext},
    mixer::{CycleDriver, MixCycle, MixerEngine, MixerHandle},
    network::UdpSink,
    ui::{AppState, WebServer},
};

/// Whatever is currently pacing the mix cycle
enum Output {
    Network(CycleDriver),
    #[cfg(feature = "device")]
    Device(net_audio_mixer::audio::DeviceOutput),
}

fn start_output(config: &AppConfig, mixer: &MixerHandle, cycle: MixCycle) -> Result<Output> {
    #[cfg(feature = "device")]
    if let Some(device) = &config.output.device {
        for info in net_audio_mixer::audio::list_output_devices() {
            tracing::debug!(
                "Output device '{}'{}: rates {:?}, channels {:?}",
                info.name,
                if info.is_default { " (default)" } else { "" },
                info.sample_rates,
                info.channels
            );
        }
        let device = Some(device.as_str()).filter(|d| !d.is_empty());
        let output = net_audio_mixer::audio::DeviceOutput::start(device, &config.engine, cycle)?;
        return Ok(Output::Device(output));
    }

    #[cfg(not(feature = "device"))]
    if config.output.device.is_some() {
        tracing::warn!("Sound card output requested but built without the `device` feature; sending over UDP");
    }

    let sink = UdpSink::new(
        config.output.bind,
        config.output.target,
        config.engine.channels,
        mixer.output_name_source(),
    )?;
    let driver = CycleDriver::spawn(cycle, sink, config.engine.block_duration())
        .context("failed to start cycle driver")?;
    Ok(Output::Network(driver))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Network Audio Mixer");

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(AppConfig::default_path);
    let config = match &config_path {
        Some(path) => AppConfig::load_or_default(path)?,
        None => AppConfig::default(),
    };
    let engine_config = &config.engine;

    // Effect chain and engine
    let ctx = StageContext {
        sample_rate: engine_config.sample_rate,
        channels: engine_config.channels,
    };
    let max_block = MAX_BLOCK_FRAMES * engine_config.channels as usize;
    let effects = EffectChain::from_config(&config.effects, ctx, max_block)?;

    let directory = Arc::new(StaticDirectory::new(
        config.sources.clone(),
        engine_config.channels,
    ));
    let (mixer, cycle) = MixerEngine::create(engine_config.clone(), Some(effects))?;
    let mixer = mixer.with_directory(directory.clone());
    mixer.rename_output(&config.output.stream_name)?;

    // Attach configured sources, then restore saved gains
    let wanted: BTreeSet<String> = config
        .sources
        .iter()
        .filter(|s| s.auto_attach)
        .map(|s| s.name.clone())
        .collect();
    let mut monitor = DiscoveryMonitor::new();
    let events = monitor.refresh(directory.as_ref());
    reconcile(&mixer, &events, &wanted);

    let state_path = config.state_path();
    if state_path.exists() {
        if let Err(e) = mixer.load_state(&state_path) {
            tracing::warn!("Could not load mixer state: {}", e);
        }
    }

    let mut output = start_output(&config, &mixer, cycle)?;

    // Control API
    let app_state = Arc::new(AppState::new(mixer.clone(), state_path.clone()));
    let _web_handle = WebServer::new(config.ui.clone(), app_state).start_background();

    tracing::info!(
        "Mixing {} source(s) into '{}' - press Ctrl+C to stop",
        mixer.channel_names().len(),
        mixer.output_name()
    );

    let mut refresh = tokio::time::interval(Duration::from_secs(DISCOVERY_INTERVAL_SECS));
    let mut housekeeping = tokio::time::interval(Duration::from_millis(250));
    let mut stats_timer = tokio::time::interval(Duration::from_secs(10));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
            _ = refresh.tick() => {
                let events = monitor.refresh(directory.as_ref());
                if !events.is_empty() {
                    reconcile(&mixer, &events, &wanted);
                }
            }
            _ = housekeeping.tick() => {
                mixer.drain_events();
                #[cfg(feature = "device")]
                if let Output::Device(device) = &output {
                    for e in device.take_errors() {
                        tracing::warn!("{}", e);
                    }
                }
            }
            _ = stats_timer.tick() => {
                let stats = mixer.stats();
                tracing::info!(
                    "Stats: {} cycles, {} stalls, {} effect failures, {} deadline misses, last cycle {} us",
                    stats.cycles,
                    stats.stalls,
                    stats.effect_failures,
                    stats.deadline_misses,
                    stats.last_cycle_us
                );
            }
        }
    }

    mixer.stop(engine_config.block_duration() * 2);
    match &mut output {
        Output::Network(_) => {}
        #[cfg(feature = "device")]
        Output::Device(device) => device.stop(),
    }
    drop(output);
    mixer.drain_events();

    if let Err(e) = mixer.save_state(&state_path) {
        tracing::warn!("Could not save mixer state: {}", e);
    }

    Ok(())
}
