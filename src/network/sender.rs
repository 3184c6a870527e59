//! UDP output sink for the mixed stream

use arc_swap::ArcSwap;
use bytes::BytesMut;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::audio::port::AudioSinkPort;
use crate::constants::MAX_PACKET_SIZE;
use crate::error::NetworkError;
use crate::network::packet;
use crate::network::udp::{create_socket, UdpSocket};

/// Sender statistics
#[derive(Debug, Default)]
pub struct SenderStats {
    pub packets_sent: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub send_errors: AtomicU64,
}

/// Sends each mixed block to `target` as one or more PCM datagrams tagged
/// with the current output stream name
pub struct UdpSink {
    socket: UdpSocket,
    target: SocketAddr,
    channels: u16,
    stream_name: Arc<ArcSwap<String>>,
    sequence: u32,
    buf: BytesMut,
    stats: Arc<SenderStats>,
}

impl UdpSink {
    pub fn new(
        bind: SocketAddr,
        target: SocketAddr,
        channels: u16,
        stream_name: Arc<ArcSwap<String>>,
    ) -> Result<Self, NetworkError> {
        let socket = create_socket(bind)?;
        tracing::info!("Sending mixed output to {}", target);
        Ok(Self {
            socket,
            target,
            channels: channels.max(1),
            stream_name,
            sequence: 0,
            buf: BytesMut::with_capacity(MAX_PACKET_SIZE),
            stats: Arc::new(SenderStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<SenderStats> {
        self.stats.clone()
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))
    }
}

impl AudioSinkPort for UdpSink {
    fn deliver(&mut self, block: &[f32]) -> Result<(), NetworkError> {
        let name = self.stream_name.load();
        let wire_name = packet::wire_name(name.as_str());
        let chunk = packet::max_samples_per_packet(wire_name.len(), self.channels).max(1);

        for samples in block.chunks(chunk) {
            packet::encode(&mut self.buf, self.channels, self.sequence, wire_name, samples)?;
            self.sequence = self.sequence.wrapping_add(1);

            match self.socket.send_to(&self.buf, self.target) {
                Ok(n) => {
                    self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                    self.stats.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.send_errors.fetch_add(1, Ordering::Relaxed);
                    return Err(NetworkError::SendFailed(e.to_string()));
                }
            }
        }
        Ok(())
    }
}
