//! Clocked driver for outputs without their own audio clock
//!
//! Runs one mix cycle per block period on a dedicated thread and hands each
//! block to a sink. Ticks are scheduled against absolute deadlines so
//! jitter does not accumulate into drift.

use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::port::AudioSinkPort;
use crate::mixer::cycle::MixCycle;

/// Handle to a running driver thread
pub struct CycleDriver {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<MixCycle>>,
}

impl CycleDriver {
    /// Start driving `cycle` into `sink` every `period`
    pub fn spawn<S>(cycle: MixCycle, sink: S, period: Duration) -> std::io::Result<Self>
    where
        S: AudioSinkPort + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("mix-cycle".to_string())
            .spawn(move || {
                let mut cycle = cycle;
                let mut sink = sink;
                let mut next = Instant::now();

                tracing::debug!("Cycle driver started, period {:?}", period);

                loop {
                    cycle.run(&mut sink);
                    next += period;

                    let now = Instant::now();
                    if next > now {
                        match stop_rx.recv_timeout(next - now) {
                            Err(RecvTimeoutError::Timeout) => {}
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        }
                    } else {
                        // More than a period behind: drop the backlog
                        if now - next > period {
                            next = now;
                        }
                        match stop_rx.try_recv() {
                            Err(TryRecvError::Empty) => {}
                            Ok(()) | Err(TryRecvError::Disconnected) => break,
                        }
                    }
                }

                tracing::debug!("Cycle driver stopped after {} cycles", cycle.cycle_count());
                cycle
            })?;

        Ok(Self {
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Stop after the current cycle and hand the cycle back
    pub fn stop(mut self) -> Option<MixCycle> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<MixCycle> {
        let _ = self.stop_tx.try_send(());
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(cycle) => Some(cycle),
            Err(_) => {
                tracing::error!("Cycle driver thread panicked");
                None
            }
        }
    }
}

impl Drop for CycleDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}
