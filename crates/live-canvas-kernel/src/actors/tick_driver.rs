//! Fixed-cadence tick source for the coordinator.
//!
//! Ticks that would fire while the previous send is still pending are
//! skipped rather than queued, so a slow mailbox never builds a backlog.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use acton_reactive::prelude::*;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::messages::Tick;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Sends `Tick` to the coordinator every `interval`.
pub struct TickDriver {
    coordinator: ActorHandle,
    interval: Duration,
}

impl TickDriver {
    pub fn new(coordinator: ActorHandle, interval: Duration) -> Self {
        Self {
            coordinator,
            interval,
        }
    }

    /// Start ticking in a background task.
    pub fn start(self) -> TickDriverHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let interval_ms = self.interval.as_millis() as u64;

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut sent = 0u64;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        self.coordinator.send(Tick { now_ms: now_ms() }).await;
                        sent += 1;
                    }
                }
            }

            debug!(ticks = sent, "Tick driver stopped");
            sent
        });

        info!(interval_ms, "Tick driver started");
        TickDriverHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}

/// Stops a running [`TickDriver`].
pub struct TickDriverHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<u64>,
}

impl TickDriverHandle {
    /// Stop ticking and return how many ticks were sent.
    pub async fn stop(mut self) -> u64 {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task).await.unwrap_or(0)
    }
}

impl Drop for TickDriverHandle {
    fn drop(&mut self) {
        if self.stop.is_some() {
            self.task.abort();
        }
    }
}
