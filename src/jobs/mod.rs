//! Periodic expiration sweep.
//!
//! One background task converts plus records whose paid-through instant has
//! lapsed. User-scoped reads fold expiry in inline, so the sweep is the
//! catch-all for subscribers who never come back.

use crate::gateway::PreapprovalClient;
use crate::store::UserStore;
use crate::subscription::LifecycleManager;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};

/// Background task running the expiration sweep on an interval.
pub struct SweepWorker<S: UserStore, G: PreapprovalClient> {
    manager: Arc<LifecycleManager<S, G>>,
    interval: Duration,
    shutdown_tx: mpsc::Sender<()>,
}

impl<S: UserStore, G: PreapprovalClient> SweepWorker<S, G> {
    /// Create a worker and the receiver to hand to [`SweepWorker::start`].
    pub fn new(
        manager: Arc<LifecycleManager<S, G>>,
        interval: Duration,
    ) -> (Self, mpsc::Receiver<()>) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        (
            Self {
                manager,
                interval,
                shutdown_tx,
            },
            shutdown_rx,
        )
    }

    /// Run until shutdown is requested via the shutdown channel.
    ///
    /// Sweeps once immediately, then on every interval tick.
    pub async fn start(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        tracing::info!(
            interval_seconds = self.interval.as_secs(),
            "Sweep worker started"
        );

        self.run_sweep().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received, stopping sweep worker");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.run_sweep().await;
                }
            }
        }

        tracing::info!("Sweep worker stopped");
    }

    async fn run_sweep(&self) {
        match self.manager.sweep_expired(Utc::now()).await {
            Ok(0) => tracing::debug!("Sweep found no expired subscriptions"),
            Ok(converted) => tracing::info!(converted, "Sweep converted expired subscriptions"),
            Err(e) => tracing::warn!(error = %e, "Sweep failed, will retry next tick"),
        }
    }

    /// Request shutdown of this worker
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::test::MockPreapprovalClient;
    use crate::store::record::{Plan, UserRecord};
    use crate::store::test::InMemoryUserStore;

    fn expired_plus(id: &str) -> UserRecord {
        let mut record = UserRecord::new_free(id, "producer@example.com", 10);
        record.plan = Plan::Plus;
        record.is_plus = true;
        record.external_agreement_id = Some("mp_1".to_string());
        record.expires_at = Some(Utc::now() - chrono::Duration::hours(1));
        record
    }

    fn spawn_worker(
        store: &InMemoryUserStore,
        interval: Duration,
    ) -> (
        Arc<SweepWorker<InMemoryUserStore, MockPreapprovalClient>>,
        tokio::task::JoinHandle<()>,
    ) {
        let manager = Arc::new(LifecycleManager::new(
            store.clone(),
            MockPreapprovalClient::new(),
            10,
        ));
        let (worker, shutdown_rx) = SweepWorker::new(manager, interval);
        let worker = Arc::new(worker);
        let task = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.start(shutdown_rx).await }
        });
        (worker, task)
    }

    #[tokio::test]
    async fn test_worker_sweeps_on_start() {
        let store = InMemoryUserStore::new();
        store.seed(expired_plus("user_1"));

        let (worker, task) = spawn_worker(&store, Duration::from_secs(3600));
        sleep(Duration::from_millis(50)).await;

        let stored = store.stored("user_1").unwrap();
        assert_eq!(stored.plan, Plan::Free);
        assert_eq!(stored.previous_plan, Some(Plan::Plus));

        worker.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_stops_worker() {
        let store = InMemoryUserStore::new();
        let (worker, task) = spawn_worker(&store, Duration::from_secs(3600));

        worker.shutdown().await;
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_sweeps_records_expired_later() {
        let store = InMemoryUserStore::new();
        let (worker, task) = spawn_worker(&store, Duration::from_secs(60));

        // let the startup sweep pass over an empty store
        sleep(Duration::from_millis(10)).await;
        store.seed(expired_plus("late_user"));

        // cross one interval tick
        sleep(Duration::from_secs(61)).await;
        assert_eq!(store.stored("late_user").unwrap().plan, Plan::Free);

        worker.shutdown().await;
        task.await.unwrap();
    }
}
