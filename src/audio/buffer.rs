//! Lock-free ring buffer for audio frames and real-time events
//!
//! This implements a bounded multi-producer multi-consumer queue on top of
//! `crossbeam`'s `ArrayQueue`. Storage is allocated once at construction,
//! so pushing and popping never touch the allocator.

use basedrop::{Handle, Owned};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Audio frame containing interleaved samples
#[derive(Clone, Debug)]
pub struct AudioFrame {
    /// Interleaved audio samples (f32)
    pub samples: Vec<f32>,
    /// Number of channels
    pub channels: u16,
    /// Frame sequence number
    pub sequence: u32,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16, sequence: u32) -> Self {
        Self {
            samples,
            channels,
            sequence,
        }
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples_per_channel() as u64 * 1_000_000) / sample_rate as u64
    }

    /// Wrap for handing to the audio thread; dropping the box there defers
    /// the free to the collector behind `handle`.
    pub fn boxed(self, handle: &Handle) -> FrameBox {
        Owned::new(handle, self)
    }
}

/// An [`AudioFrame`] whose storage is released by the GC thread
pub type FrameBox = Owned<AudioFrame>;

/// Bounded lock-free ring buffer
pub struct RingBuffer<T> {
    queue: ArrayQueue<T>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl<T> RingBuffer<T> {
    /// Create a new ring buffer with the specified capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Push an item into the buffer
    /// Returns false if buffer is full (overflow); the item is dropped
    pub fn push(&self, item: T) -> bool {
        match self.queue.push(item) {
            Ok(()) => true,
            Err(_) => {
                self.overflow_count.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pop an item from the buffer
    /// Returns None if buffer is empty (underrun)
    pub fn pop(&self) -> Option<T> {
        match self.queue.pop() {
            Some(item) => Some(item),
            None => {
                self.underrun_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Try to pop without counting underrun
    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    /// Get current buffer length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Get overflow count
    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    /// Get underrun count
    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Reset statistics
    pub fn reset_stats(&self) {
        self.overflow_count.store(0, Ordering::Relaxed);
        self.underrun_count.store(0, Ordering::Relaxed);
    }

    /// Get fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a frame ring buffer
pub type SharedRingBuffer = Arc<RingBuffer<FrameBox>>;

/// Create a new shared frame ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_basic() {
        let buffer = RingBuffer::new(4);

        let frame1 = AudioFrame::new(vec![0.0; 480], 2, 0);
        let frame2 = AudioFrame::new(vec![1.0; 480], 2, 1);

        assert!(buffer.push(frame1));
        assert!(buffer.push(frame2));
        assert_eq!(buffer.len(), 2);

        let popped = buffer.pop().unwrap();
        assert_eq!(popped.sequence, 0);

        let popped = buffer.pop().unwrap();
        assert_eq!(popped.sequence, 1);

        assert!(buffer.is_empty());
    }

    #[test]
    fn test_overflow_and_underrun_counted() {
        let buffer: RingBuffer<u32> = RingBuffer::new(2);

        assert!(buffer.push(1));
        assert!(buffer.push(2));
        assert!(!buffer.push(3));
        assert_eq!(buffer.overflow_count(), 1);
        assert!(buffer.is_full());

        buffer.pop();
        buffer.pop();
        assert!(buffer.pop().is_none());
        assert_eq!(buffer.underrun_count(), 1);

        // try_pop does not count
        assert!(buffer.try_pop().is_none());
        assert_eq!(buffer.underrun_count(), 1);

        buffer.reset_stats();
        assert_eq!(buffer.overflow_count(), 0);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0.0; 960], 2, 0);
        assert_eq!(frame.samples_per_channel(), 480);
        assert_eq!(frame.duration_us(48000), 10_000);
    }
}
