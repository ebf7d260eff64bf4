//! Periodic background maintenance with an explicit stop handle.

use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time;

/// A spawned interval loop running a sweep closure.
///
/// The loop exits when [`MaintenanceTask::stop`] is called or when the process
/// shutdown broadcast fires, whichever comes first.
pub struct MaintenanceTask {
    name: &'static str,
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl MaintenanceTask {
    /// Spawn `tick` every `period`. The first tick fires one full period after spawn.
    pub fn spawn<F>(
        name: &'static str,
        period: Duration,
        mut shutdown: broadcast::Receiver<()>,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            tracing::debug!(task = name, period = ?period, "Maintenance task starting");
            let mut ticker = time::interval_at(time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => tick(),
                    _ = &mut stop_rx => break,
                    _ = shutdown.recv() => break,
                }
            }
            tracing::debug!(task = name, "Maintenance task stopped");
        });

        Self {
            name,
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.handle).await {
            tracing::warn!(task = self.name, error = %e, "Maintenance task ended abnormally");
        }
    }
}
