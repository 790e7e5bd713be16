//! WorkerGroup - 独立したワーカーループを N 本起動する
//!
//! Each loop owns its own subscription; the group adds no parallelism inside a
//! loop. Scaling out means more loops, never more deliveries per loop.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::error;

use super::status::WorkerStats;
use super::worker_loop::WorkerLoop;

/// Worker group handle.
/// - `request_shutdown()` で全ワーカーに停止を要求する
/// - `join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: Arc<watch::Sender<bool>>,
    joins: Vec<JoinHandle<WorkerStats>>,
}

/// Cloneable handle that can stop a [`WorkerGroup`] from another task
/// (e.g. a signal handler).
#[derive(Clone)]
pub struct ShutdownHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request shutdown for all workers.
    /// In-flight deliveries are settled first; loops stop taking new ones.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }
}

impl WorkerGroup {
    /// Spawn one task per loop.
    pub fn spawn(loops: Vec<WorkerLoop>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = loops
            .into_iter()
            .map(|worker| tokio::spawn(worker.run(shutdown_rx.clone())))
            .collect();

        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            joins,
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shutdown_tx: Arc::clone(&self.shutdown_tx),
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown_handle().request_shutdown();
    }

    /// Wait for every loop to stop and return their combined counters.
    ///
    /// Loops stop on shutdown or when their subscription ends.
    pub async fn join(self) -> WorkerStats {
        let mut total = WorkerStats::default();
        for join in self.joins {
            match join.await {
                Ok(stats) => total = total.merge(stats),
                Err(e) => error!(error = %e, "Worker task ended abnormally"),
            }
        }
        total
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) -> WorkerStats {
        self.request_shutdown();
        self.join().await
    }
}
