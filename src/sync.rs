//! Background reconciliation of the sync queue.
//!
//! A [`Reconciler`] owns a tokio task that drains the current identity's
//! queued votes on a fixed interval, and immediately whenever it is
//! triggered. Dropping the handle stops the task.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::PollClient;

pub struct Reconciler {
    wake: Arc<Notify>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Reconciler {
    /// Spawn the reconciliation task on the current runtime.
    pub fn spawn(client: PollClient, interval: Duration) -> Self {
        let wake = Arc::new(Notify::new());
        let (stop, stopped) = watch::channel(false);
        let task = tokio::spawn(run(client, interval, wake.clone(), stopped));
        tracing::debug!("Reconciler started ({}s interval)", interval.as_secs_f32());
        Self {
            wake,
            stop,
            task: Some(task),
        }
    }

    /// Run a pass now instead of waiting for the next tick.
    pub fn trigger(&self) {
        self.wake.notify_one();
    }

    /// Stop the task and wait for an in-flight pass to finish.
    pub async fn shutdown(mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("Reconciler task ended abnormally: {}", e);
            }
        }
    }
}

impl Drop for Reconciler {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    client: PollClient,
    interval: Duration,
    wake: Arc<Notify>,
    mut stopped: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
            changed = stopped.changed() => {
                if changed.is_err() || *stopped.borrow() {
                    break;
                }
                continue;
            }
        }

        let synced = client.sync_pending_votes().await;
        if synced > 0 {
            tracing::info!("Reconciler delivered {} queued vote(s)", synced);
        }
    }
    tracing::debug!("Reconciler stopped");
}
