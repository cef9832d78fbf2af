use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::watch;

/// Clonable shutdown flag. Triggering it interrupts the scheduler's sleep; a
/// cycle already in progress always runs to completion.
#[derive(Clone, Debug)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`StopSignal::trigger`] has been called.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives cycles back to back with a fixed pause in between.
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Run `cycle` until `stop` is triggered and return how many cycles ran.
    /// A failed cycle is logged and never ends the loop.
    pub async fn run<F, Fut, T, E>(&self, mut cycle: F, stop: &StopSignal) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut cycles = 0u64;
        while !stop.is_stopped() {
            cycles += 1;
            debug!("scheduler: starting cycle {cycles}");
            if let Err(err) = cycle().await {
                error!("scheduler: cycle {cycles} failed: {err}");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop.stopped() => {}
            }
        }
        info!("scheduler: stopped after {cycles} cycles");
        cycles
    }

    /// Run a single cycle, handing its result back to the caller.
    pub async fn run_once<F, Fut, T, E>(&self, cycle: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        cycle().await
    }
}
