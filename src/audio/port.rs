//! Source and sink ports consumed by the mix cycle
//!
//! The engine only knows these two contracts. Transports (UDP, sound card,
//! test doubles) implement them.

use crate::audio::buffer::{FrameBox, SharedRingBuffer};
use crate::error::NetworkError;

/// One inbound audio source.
///
/// `receive` is called from the real-time thread and must not block. It
/// writes up to `out.len()` interleaved samples and returns how many it
/// wrote; returning fewer (including zero) is a short read that the caller
/// retries within its time budget.
pub trait AudioSourcePort: Send {
    fn receive(&mut self, out: &mut [f32]) -> usize;
}

/// Consumer of the mixed output, one block per cycle.
pub trait AudioSinkPort: Send {
    fn deliver(&mut self, block: &[f32]) -> Result<(), NetworkError>;
}

/// Sink that discards every block
#[derive(Debug, Default)]
pub struct NullSink {
    blocks: u64,
}

impl NullSink {
    pub fn blocks_delivered(&self) -> u64 {
        self.blocks
    }
}

impl AudioSinkPort for NullSink {
    fn deliver(&mut self, _block: &[f32]) -> Result<(), NetworkError> {
        self.blocks += 1;
        Ok(())
    }
}

/// Source port backed by a frame ring buffer filled by a transport thread.
///
/// Frames rarely line up with the mixer's block size, so the unread tail of
/// the current frame is kept for the next call. Spent frames are handed back
/// through `recycle` so the producer can reuse their storage. A frame that
/// does not fit there is dropped, which only queues it for the GC thread.
pub struct BufferedSource {
    input: SharedRingBuffer,
    recycle: Option<SharedRingBuffer>,
    pending: Option<FrameBox>,
    offset: usize,
}

impl BufferedSource {
    pub fn new(input: SharedRingBuffer) -> Self {
        Self {
            input,
            recycle: None,
            pending: None,
            offset: 0,
        }
    }

    /// Return consumed frames to `recycle` for reuse by the producer
    pub fn with_recycle(mut self, recycle: SharedRingBuffer) -> Self {
        self.recycle = Some(recycle);
        self
    }

    /// Samples buffered but not yet read
    pub fn buffered_samples(&self) -> usize {
        self.pending
            .as_ref()
            .map(|f| f.samples.len() - self.offset)
            .unwrap_or(0)
    }

    fn retire(&mut self, frame: FrameBox) {
        match &self.recycle {
            Some(recycle) => {
                recycle.push(frame);
            }
            None => drop(frame),
        }
    }
}

impl AudioSourcePort for BufferedSource {
    fn receive(&mut self, out: &mut [f32]) -> usize {
        let mut written = 0;

        while written < out.len() {
            if self.pending.is_none() {
                match self.input.try_pop() {
                    Some(frame) => {
                        self.pending = Some(frame);
                        self.offset = 0;
                    }
                    None => break,
                }
            }

            let Some(frame) = self.pending.as_ref() else {
                break;
            };

            let available = &frame.samples[self.offset..];
            let n = available.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&available[..n]);
            written += n;
            self.offset += n;

            if self.offset >= frame.samples.len() {
                if let Some(spent) = self.pending.take() {
                    self.retire(spent);
                }
                self.offset = 0;
            }
        }

        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{create_shared_buffer, AudioFrame};
    use basedrop::{Collector, Handle};

    fn frame(handle: &Handle, samples: Vec<f32>, sequence: u32) -> FrameBox {
        AudioFrame::new(samples, 1, sequence).boxed(handle)
    }

    #[test]
    fn test_buffered_source_spans_frames() {
        let mut collector = Collector::new();
        let handle = collector.handle();
        let input = create_shared_buffer(8);
        input.push(frame(&handle, vec![1.0, 2.0, 3.0], 0));
        input.push(frame(&handle, vec![4.0, 5.0], 1));

        let mut source = BufferedSource::new(input.clone());
        let mut out = [0.0f32; 4];
        assert_eq!(source.receive(&mut out), 4);
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(source.buffered_samples(), 1);

        let mut out = [0.0f32; 4];
        assert_eq!(source.receive(&mut out), 1);
        assert_eq!(out[0], 5.0);
        assert_eq!(source.receive(&mut out), 0);

        drop(source);
        drop(input);
        collector.collect();
        assert_eq!(collector.alloc_count(), 0);
    }

    #[test]
    fn test_spent_frames_recycled() {
        let mut collector = Collector::new();
        let handle = collector.handle();
        let input = create_shared_buffer(4);
        let recycle = create_shared_buffer(4);
        input.push(frame(&handle, vec![0.5; 4], 0));

        let mut source = BufferedSource::new(input).with_recycle(recycle.clone());
        let mut out = [0.0f32; 4];
        source.receive(&mut out);

        assert_eq!(recycle.len(), 1);

        drop(source);
        drop(recycle);
        collector.collect();
    }

    #[test]
    fn test_spent_frame_freed_by_collector_when_recycle_full() {
        let mut collector = Collector::new();
        let handle = collector.handle();
        let input = create_shared_buffer(4);
        let recycle = create_shared_buffer(1);
        assert!(recycle.push(frame(&handle, Vec::new(), 9)));
        input.push(frame(&handle, vec![0.5; 4], 0));

        let mut source = BufferedSource::new(input).with_recycle(recycle.clone());
        let mut out = [0.0f32; 4];
        assert_eq!(source.receive(&mut out), 4);
        assert_eq!(recycle.overflow_count(), 1);

        // The spent frame was dropped but its storage waits for the collector
        assert_eq!(collector.alloc_count(), 2);
        collector.collect();
        assert_eq!(collector.alloc_count(), 1);

        drop(source);
        drop(recycle);
        collector.collect();
        assert_eq!(collector.alloc_count(), 0);
    }

    #[test]
    fn test_null_sink_counts_blocks() {
        let mut sink = NullSink::default();
        sink.deliver(&[0.0; 16]).unwrap();
        sink.deliver(&[0.0; 16]).unwrap();
        assert_eq!(sink.blocks_delivered(), 2);
    }
}
