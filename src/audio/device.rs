//! Sound card output
//!
//! Drives the mix cycle straight from a `cpal` output callback, so the
//! device clock paces mixing. Only built with the `device` feature.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::DeviceError;
use crate::mixer::MixCycle;

/// Output device description for listings
#[derive(Debug, Clone, Serialize)]
pub struct OutputDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List output devices on the default host
pub fn list_output_devices() -> Vec<OutputDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(outputs) = host.output_devices() {
        for device in outputs {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = output_capabilities(&device);
                devices.push(OutputDeviceInfo {
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }
    devices
}

fn output_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut rates = Vec::new();
    let mut chans = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [44100u32, 48000, 88200, 96000, 176400, 192000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !rates.contains(&rate_val)
                {
                    rates.push(rate_val);
                }
            }
            if !chans.contains(&config.channels()) {
                chans.push(config.channels());
            }
        }
    }

    rates.sort();
    chans.sort();
    (rates, chans)
}

fn find_output_device(name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| DeviceError::NotFound("No default output device".to_string())),
        Some(wanted) => host
            .output_devices()
            .map_err(|e| DeviceError::NotFound(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| DeviceError::NotFound(wanted.to_string())),
    }
}

/// A running sound card output. The stream lives on its own thread because
/// `cpal::Stream` cannot move between threads on every platform.
pub struct DeviceOutput {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Receiver<DeviceError>,
}

impl DeviceOutput {
    /// Open `device` (or the default output) with the engine's rate and
    /// channel count and start pulling mixed audio from `cycle`
    pub fn start(
        device: Option<&str>,
        engine: &EngineConfig,
        mut cycle: MixCycle,
    ) -> Result<Self, DeviceError> {
        let device = find_output_device(device)?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = StreamConfig {
            channels: engine.channels,
            sample_rate: cpal::SampleRate(engine.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(engine.block_frames as u32),
        };

        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (error_tx, error_rx) = bounded::<DeviceError>(16);
        let (ready_tx, ready_rx) = bounded::<Result<(), DeviceError>>(1);

        let handle = thread::Builder::new()
            .name("device-output".to_string())
            .spawn(move || {
                let stream = device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        cycle.process(data);
                    },
                    move |err| {
                        let _ = error_tx.try_send(DeviceError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(DeviceError::UnsupportedConfig(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(DeviceError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| DeviceError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(DeviceError::StreamError("output thread exited".to_string()));
            }
        }

        tracing::info!("Playing mixed output on '{}'", device_name);

        Ok(Self {
            running,
            thread_handle: Some(handle),
            error_rx,
        })
    }

    /// Stream errors reported since the last call
    pub fn take_errors(&self) -> Vec<DeviceError> {
        self.error_rx.try_iter().collect()
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.stop();
    }
}
