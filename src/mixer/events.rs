//! Conditions reported out of the real-time path
//!
//! The mix cycle never logs or allocates. It pushes small `Copy` events into
//! a preallocated queue; the control side drains them and hands them to
//! `tracing`.

use std::fmt;
use std::sync::Arc;

use crate::audio::buffer::RingBuffer;

/// Longest name carried inline in an event
pub const EVENT_NAME_CAPACITY: usize = 48;

/// Fixed-capacity UTF-8 name that can be copied without allocating
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct InlineName {
    bytes: [u8; EVENT_NAME_CAPACITY],
    len: u8,
}

impl InlineName {
    /// Copy `name`, truncating on a char boundary if it is too long
    pub fn new(name: &str) -> Self {
        let mut end = name.len().min(EVENT_NAME_CAPACITY);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        let mut bytes = [0u8; EVENT_NAME_CAPACITY];
        bytes[..end].copy_from_slice(&name.as_bytes()[..end]);
        Self {
            bytes,
            len: end as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Debug for InlineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for InlineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened during a cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MixEventKind {
    /// A source did not deliver its block within the pull budget
    SourceStalled,
    /// An effect stage errored or produced non-finite output and was bypassed
    EffectStageFailed,
    /// The cycle ran longer than one block period
    DeadlineMissed { elapsed_us: u32, budget_us: u32 },
    /// Effects bypassed after repeated deadline misses
    LoadShed,
    /// The output sink rejected a block
    SinkFailed,
}

/// One reported condition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixEvent {
    pub kind: MixEventKind,
    /// Source or stage name; empty for cycle-wide events
    pub subject: InlineName,
    /// Cycle counter at the time of the event
    pub cycle: u64,
}

impl MixEvent {
    pub fn new(kind: MixEventKind, subject: &str, cycle: u64) -> Self {
        Self {
            kind,
            subject: InlineName::new(subject),
            cycle,
        }
    }

    /// Log this event on the control side
    pub fn log(&self) {
        match self.kind {
            MixEventKind::SourceStalled => {
                tracing::warn!(source = %self.subject, cycle = self.cycle, "Source stalled, mixing silence");
            }
            MixEventKind::EffectStageFailed => {
                tracing::warn!(stage = %self.subject, cycle = self.cycle, "Effect stage failed, bypassed for one block");
            }
            MixEventKind::DeadlineMissed { elapsed_us, budget_us } => {
                tracing::debug!(cycle = self.cycle, elapsed_us, budget_us, "Mix cycle missed its deadline");
            }
            MixEventKind::LoadShed => {
                tracing::error!(cycle = self.cycle, "Mixer overloaded, effect chain bypassed");
            }
            MixEventKind::SinkFailed => {
                tracing::warn!(cycle = self.cycle, "Output sink rejected a block");
            }
        }
    }
}

/// Shared event queue
pub type EventQueue = Arc<RingBuffer<MixEvent>>;

/// Create an event queue with the given capacity
pub fn create_event_queue(capacity: usize) -> EventQueue {
    Arc::new(RingBuffer::new(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inline_name_truncates_on_char_boundary() {
        let long = "é".repeat(40); // 80 bytes
        let name = InlineName::new(&long);
        assert!(name.as_str().len() <= EVENT_NAME_CAPACITY);
        assert!(name.as_str().chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_event_queue_drops_when_full() {
        let queue = create_event_queue(2);
        for cycle in 0..3 {
            queue.push(MixEvent::new(MixEventKind::SourceStalled, "cam", cycle));
        }
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.overflow_count(), 1);
        assert_eq!(queue.try_pop().unwrap().subject.as_str(), "cam");
    }
}
