//! Deferred deallocation for buffers released on the audio thread
//!
//! Frames are wrapped in `basedrop::Owned` when a transport thread creates
//! them. Dropping one anywhere, the mix cycle included, only queues it; the
//! memory is freed later on the `audio-gc` thread.

use basedrop::{Collector, Handle};
use parking_lot::Mutex;
use std::io;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector thread frees queued buffers
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();
static GC_INIT: Mutex<()> = parking_lot::const_mutex(());

/// Start the collector thread and wait for its handle
fn init_gc() -> io::Result<Handle> {
    let (tx, rx) = crossbeam_channel::bounded(1);

    thread::Builder::new()
        .name("audio-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives and dies on this thread
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }

            tracing::debug!("Audio GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })?;

    rx.recv()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "audio GC thread exited early"))
}

/// Handle for wrapping buffers that may be dropped on the audio thread.
///
/// The collector thread is started on first use.
pub fn gc_handle() -> io::Result<Handle> {
    if let Some(handle) = GC_HANDLE.get() {
        return Ok(handle.clone());
    }

    let _guard = GC_INIT.lock();
    if let Some(handle) = GC_HANDLE.get() {
        return Ok(handle.clone());
    }
    let handle = init_gc()?;
    Ok(GC_HANDLE.get_or_init(|| handle).clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Owned;

    #[test]
    fn test_gc_handle_is_shared() {
        let first = gc_handle().unwrap();
        let second = gc_handle().unwrap();

        // Both handles feed the same collector thread
        let a = Owned::new(&first, vec![0.0f32; 16]);
        let b = Owned::new(&second, vec![0.0f32; 16]);
        assert_eq!(a.len() + b.len(), 32);
    }
}
