//! UDP audio receiver
//!
//! One reader thread per source socket. Datagrams are decoded, remapped to
//! the mixer's channel layout and pushed as [`AudioFrame`]s into a ring
//! buffer that the mix cycle drains through [`UdpSourcePort`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use basedrop::Handle;

use crate::audio::buffer::{create_shared_buffer, AudioFrame, SharedRingBuffer};
use crate::audio::gc::gc_handle;
use crate::audio::port::{AudioSourcePort, BufferedSource};
use crate::constants::{MAX_PACKET_SIZE, RING_BUFFER_CAPACITY};
use crate::error::NetworkError;
use crate::network::packet;
use crate::network::udp::{create_socket, UdpSocket};

/// Receiver statistics
#[derive(Debug, Default)]
pub struct ReceiverStats {
    pub packets_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub invalid_packets: AtomicU64,
    pub packets_lost: AtomicU64,
    pub frames_dropped: AtomicU64,
}

/// Point-in-time copy of [`ReceiverStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct ReceiverStatsSnapshot {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub invalid_packets: u64,
    pub packets_lost: u64,
    pub frames_dropped: u64,
}

impl ReceiverStats {
    pub fn snapshot(&self) -> ReceiverStatsSnapshot {
        ReceiverStatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            invalid_packets: self.invalid_packets.load(Ordering::Relaxed),
            packets_lost: self.packets_lost.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Convert interleaved `input` with `in_ch` channels to `out_ch` channels.
///
/// Mono is duplicated to every output channel, anything to mono is averaged,
/// other layouts keep the common channels and zero the rest.
pub fn remap_channels(input: &[f32], in_ch: u16, out_ch: u16, out: &mut Vec<f32>) {
    out.clear();
    let in_ch = in_ch.max(1) as usize;
    let out_ch = out_ch.max(1) as usize;

    if in_ch == out_ch {
        out.extend_from_slice(input);
        return;
    }

    for frame in input.chunks_exact(in_ch) {
        if in_ch == 1 {
            out.extend(std::iter::repeat(frame[0]).take(out_ch));
        } else if out_ch == 1 {
            out.push(frame.iter().sum::<f32>() / in_ch as f32);
        } else {
            for c in 0..out_ch {
                out.push(frame.get(c).copied().unwrap_or(0.0));
            }
        }
    }
}

/// Background reader for one source socket
pub struct UdpSourceReceiver {
    name: String,
    local_addr: SocketAddr,
    output: SharedRingBuffer,
    recycle: SharedRingBuffer,
    stats: Arc<ReceiverStats>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl UdpSourceReceiver {
    /// Bind `bind` and start the reader thread. Frames are remapped to
    /// `channels`.
    pub fn start(name: &str, bind: SocketAddr, channels: u16) -> Result<Self, NetworkError> {
        let socket = create_socket(bind)?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        let gc = gc_handle().map_err(|e| NetworkError::ReceiveFailed(e.to_string()))?;

        let output = create_shared_buffer(RING_BUFFER_CAPACITY);
        let recycle = create_shared_buffer(RING_BUFFER_CAPACITY);
        let stats = Arc::new(ReceiverStats::default());
        let running = Arc::new(AtomicBool::new(true));

        let worker = ReaderLoop {
            socket,
            gc,
            channels,
            output: output.clone(),
            recycle: recycle.clone(),
            stats: stats.clone(),
            running: running.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("udp-source-{}", name))
            .spawn(move || worker.run())
            .map_err(|e| NetworkError::BindFailed(e.to_string()))?;

        tracing::info!("Receiving source '{}' on {}", name, local_addr);

        Ok(Self {
            name: name.to_string(),
            local_addr,
            output,
            recycle,
            stats,
            running,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> ReceiverStatsSnapshot {
        self.stats.snapshot()
    }

    /// Source port reading this receiver's frames
    pub fn port(&self) -> BufferedSource {
        BufferedSource::new(self.output.clone()).with_recycle(self.recycle.clone())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Receiver thread for '{}' panicked", self.name);
            }
            tracing::info!("Stopped receiving source '{}'", self.name);
        }
    }
}

impl Drop for UdpSourceReceiver {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ReaderLoop {
    socket: UdpSocket,
    gc: Handle,
    channels: u16,
    output: SharedRingBuffer,
    recycle: SharedRingBuffer,
    stats: Arc<ReceiverStats>,
    running: Arc<AtomicBool>,
}

impl ReaderLoop {
    fn run(self) {
        let mut datagram = vec![0u8; MAX_PACKET_SIZE];
        let mut decoded = Vec::with_capacity(MAX_PACKET_SIZE / 4);
        let mut last_sequence: Option<u32> = None;

        while self.running.load(Ordering::Relaxed) {
            let len = match self.socket.recv_from(&mut datagram) {
                Ok((len, _)) => len,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    continue
                }
                Err(e) => {
                    tracing::warn!("Receive error: {}", e);
                    continue;
                }
            };

            self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
            self.stats.bytes_received.fetch_add(len as u64, Ordering::Relaxed);

            let header = match packet::decode(&datagram[..len], &mut decoded) {
                Ok(header) => header,
                Err(_) => {
                    self.stats.invalid_packets.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            };

            if let Some(last) = last_sequence {
                let gap = header.sequence.wrapping_sub(last).wrapping_sub(1);
                if gap > 0 && gap < u32::MAX / 2 {
                    self.stats.packets_lost.fetch_add(gap as u64, Ordering::Relaxed);
                }
            }
            last_sequence = Some(header.sequence);

            let mut frame = self.recycle.try_pop().unwrap_or_else(|| {
                AudioFrame::new(Vec::with_capacity(decoded.len()), self.channels, 0)
                    .boxed(&self.gc)
            });
            remap_channels(
                &decoded,
                header.channels as u16,
                self.channels,
                &mut frame.samples,
            );
            frame.channels = self.channels;
            frame.sequence = header.sequence;

            if !self.output.push(frame) {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Source port that owns its receiver; dropping the port stops the thread.
pub struct UdpSourcePort {
    source: BufferedSource,
    receiver: UdpSourceReceiver,
}

impl UdpSourcePort {
    pub fn new(receiver: UdpSourceReceiver) -> Self {
        Self {
            source: receiver.port(),
            receiver,
        }
    }

    pub fn receiver(&self) -> &UdpSourceReceiver {
        &self.receiver
    }
}

impl AudioSourcePort for UdpSourcePort {
    fn receive(&mut self, out: &mut [f32]) -> usize {
        self.source.receive(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use std::time::{Duration, Instant};

    #[test]
    fn test_remap_mono_to_stereo() {
        let mut out = Vec::new();
        remap_channels(&[0.1, 0.2], 1, 2, &mut out);
        assert_eq!(out, vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn test_remap_stereo_to_mono() {
        let mut out = Vec::new();
        remap_channels(&[0.2, 0.4, 1.0, 0.0], 2, 1, &mut out);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_receives_packets() {
        let receiver = UdpSourceReceiver::start("test", "127.0.0.1:0".parse().unwrap(), 2).unwrap();
        let target = receiver.local_addr();
        let mut port = UdpSourcePort::new(receiver);

        let sender = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut buf = BytesMut::new();
        packet::encode(&mut buf, 2, 0, "tone", &[0.25; 8]).unwrap();
        sender.send_to(&buf, target).unwrap();
        sender.send_to(b"junk", target).unwrap();

        let mut out = [0.0f32; 8];
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut got = 0;
        while got < 8 && Instant::now() < deadline {
            got += port.receive(&mut out[got..]);
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(got, 8);
        assert_eq!(out, [0.25; 8]);

        let deadline = Instant::now() + Duration::from_secs(2);
        while port.receiver().stats().invalid_packets == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(port.receiver().stats().invalid_packets, 1);
    }
}
