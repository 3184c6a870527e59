//! Wire format for PCM audio datagrams
//!
//! ```text
//! ┌──────┬─────┬──────────┬──────────┬──────────┬──────────┬───────────┬─────────────┐
//! │ NAMX │ ver │ channels │ sequence │ name_len │ name     │ n_samples │ samples     │
//! │ 4 B  │ u8  │ u8       │ u32 LE   │ u8       │ ≤ 64 B   │ u16 LE    │ n × f32 LE  │
//! └──────┴─────┴──────────┴──────────┴──────────┴──────────┴───────────┴─────────────┘
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::constants::MAX_PACKET_SIZE;
use crate::error::NetworkError;

pub const MAGIC: [u8; 4] = *b"NAMX";
pub const VERSION: u8 = 1;
pub const MAX_NAME_LEN: usize = 64;

/// Fixed header bytes, excluding the stream name
pub const FIXED_HEADER_LEN: usize = 4 + 1 + 1 + 4 + 1 + 2;

/// Decoded packet header
#[derive(Debug, Clone, PartialEq)]
pub struct PacketHeader {
    pub channels: u8,
    pub sequence: u32,
    pub name: String,
    pub sample_count: u16,
}

/// Samples that fit in one datagram for a stream name of `name_len` bytes,
/// rounded down to whole frames
pub fn max_samples_per_packet(name_len: usize, channels: u16) -> usize {
    let room = (MAX_PACKET_SIZE - FIXED_HEADER_LEN - name_len.min(MAX_NAME_LEN)) / 4;
    let channels = channels.max(1) as usize;
    room / channels * channels
}

/// Truncate `name` to the wire limit on a char boundary
pub fn wire_name(name: &str) -> &str {
    let mut end = name.len().min(MAX_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

/// Encode one packet into `buf` (cleared first)
pub fn encode(
    buf: &mut BytesMut,
    channels: u16,
    sequence: u32,
    name: &str,
    samples: &[f32],
) -> Result<(), NetworkError> {
    let name = wire_name(name);
    let len = FIXED_HEADER_LEN + name.len() + samples.len() * 4;
    if len > MAX_PACKET_SIZE || samples.len() > u16::MAX as usize {
        return Err(NetworkError::PacketTooLarge(len));
    }
    if channels == 0 || samples.len() % channels as usize != 0 {
        return Err(NetworkError::InvalidPacket);
    }

    buf.clear();
    buf.reserve(len);
    buf.put_slice(&MAGIC);
    buf.put_u8(VERSION);
    buf.put_u8(channels.min(u8::MAX as u16) as u8);
    buf.put_u32_le(sequence);
    buf.put_u8(name.len() as u8);
    buf.put_slice(name.as_bytes());
    buf.put_u16_le(samples.len() as u16);
    for &sample in samples {
        buf.put_f32_le(sample);
    }
    Ok(())
}

/// Decode a datagram. Samples are appended to `samples` (cleared first).
pub fn decode(mut data: &[u8], samples: &mut Vec<f32>) -> Result<PacketHeader, NetworkError> {
    if data.len() < FIXED_HEADER_LEN || data[..4] != MAGIC {
        return Err(NetworkError::InvalidPacket);
    }
    data.advance(4);

    if data.get_u8() != VERSION {
        return Err(NetworkError::InvalidPacket);
    }
    let channels = data.get_u8();
    let sequence = data.get_u32_le();
    let name_len = data.get_u8() as usize;
    if channels == 0 || name_len > MAX_NAME_LEN || data.remaining() < name_len + 2 {
        return Err(NetworkError::InvalidPacket);
    }

    let name = std::str::from_utf8(&data[..name_len])
        .map_err(|_| NetworkError::InvalidPacket)?
        .to_string();
    data.advance(name_len);

    let sample_count = data.get_u16_le();
    // Partial frames would shift the interleaving for the rest of the stream
    if sample_count as usize % channels as usize != 0
        || data.remaining() != sample_count as usize * 4
    {
        return Err(NetworkError::InvalidPacket);
    }

    samples.clear();
    samples.reserve(sample_count as usize);
    for _ in 0..sample_count {
        samples.push(data.get_f32_le());
    }

    Ok(PacketHeader {
        channels,
        sequence,
        name,
        sample_count,
    })
}
