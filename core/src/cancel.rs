//! Operator cancellation.
//!
//! A cloneable flag plus a wake-up channel, so the tick pacing sleep
//! returns as soon as shutdown is requested instead of at the next tick.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct ShutdownSignal {
    flag:    Arc<AtomicBool>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            wake_tx,
            wake_rx,
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        let _ = self.wake_tx.try_send(());
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Sleep for up to `duration`. Returns `true` if shutdown was
    /// requested before or during the wait.
    pub fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return true;
        }
        if duration.is_zero() {
            return false;
        }
        match self.wake_rx.recv_timeout(duration) {
            Ok(()) => {
                // Re-arm for any other clone that is waiting.
                let _ = self.wake_tx.try_send(());
                true
            }
            Err(RecvTimeoutError::Timeout) => self.is_triggered(),
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
