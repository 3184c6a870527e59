//! Test Tone Sender
//!
//! Streams a sine tone to a mixer source port over UDP.
//!
//! Usage: `tone-sender [target] [name] [frequency_hz]`

use anyhow::{Context, Result};
use bytes::BytesMut;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use net_audio_mixer::{constants::*, network::packet, network::create_socket};

/// Frames per packet (10 ms at 48 kHz)
const FRAMES_PER_PACKET: usize = 480;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let target: SocketAddr = args
        .next()
        .unwrap_or_else(|| "127.0.0.1:6000".to_string())
        .parse()
        .context("invalid target address")?;
    let name = args.next().unwrap_or_else(|| "Test Tone".to_string());
    let frequency: f32 = args
        .next()
        .map(|f| f.parse::<f32>())
        .transpose()
        .context("invalid frequency")?
        .unwrap_or(440.0);

    let channels = DEFAULT_CHANNELS;
    let sample_rate = DEFAULT_SAMPLE_RATE;
    let socket = create_socket(SocketAddr::from(([0, 0, 0, 0], 0)))?;

    tracing::info!(
        "Sending {} Hz tone as '{}' to {} ({} Hz, {} ch)",
        frequency,
        name,
        target,
        sample_rate,
        channels
    );

    let samples_per_packet = FRAMES_PER_PACKET * channels as usize;
    let max_samples = packet::max_samples_per_packet(packet::wire_name(&name).len(), channels);
    anyhow::ensure!(
        samples_per_packet <= max_samples,
        "packet of {} samples exceeds the {} sample limit",
        samples_per_packet,
        max_samples
    );

    let period = Duration::from_secs_f64(FRAMES_PER_PACKET as f64 / sample_rate as f64);
    let step = std::f32::consts::TAU * frequency / sample_rate as f32;

    let mut phase = 0.0f32;
    let mut samples = vec![0.0f32; samples_per_packet];
    let mut buf = BytesMut::with_capacity(MAX_PACKET_SIZE);
    let mut sequence: u32 = 0;
    let mut next = Instant::now();

    loop {
        for frame in samples.chunks_exact_mut(channels as usize) {
            frame.fill(phase.sin() * 0.5);
            phase = (phase + step) % std::f32::consts::TAU;
        }

        packet::encode(&mut buf, channels, sequence, &name, &samples)?;
        if let Err(e) = socket.send_to(&buf, target) {
            tracing::warn!("Failed to send packet: {}", e);
        }
        sequence = sequence.wrapping_add(1);

        if sequence % 1000 == 0 {
            tracing::info!("Sent {} packets", sequence);
        }

        next += period;
        tokio::time::sleep_until(next.into()).await;
    }
}
