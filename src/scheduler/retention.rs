//! Retention manager: prunes the time series and snapshots state to disk.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::monitor::Collector;
use crate::store::{PersistenceError, StateFile};

struct Running {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Background timer independent of the poll loops.
pub struct RetentionManager {
    collector: Arc<Collector>,
    state_file: Option<Arc<StateFile>>,
    prune_every: Duration,
    persist_every: Duration,
    running: Mutex<Option<Running>>,
}

impl RetentionManager {
    pub fn new(
        collector: Arc<Collector>,
        state_file: Option<Arc<StateFile>>,
        prune_every: Duration,
        persist_every: Duration,
    ) -> Self {
        Self {
            collector,
            state_file,
            prune_every,
            persist_every,
            running: Mutex::new(None),
        }
    }

    /// Start the retention manager background task. No-op when running.
    pub fn start(&self) {
        let mut running = self.running.lock();
        if running.is_some() {
            return;
        }

        let (stop_tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(run_retention_loop(
            Arc::clone(&self.collector),
            self.state_file.clone(),
            self.prune_every,
            self.persist_every,
            rx,
        ));
        *running = Some(Running { stop_tx, handle });
    }

    /// Stop the background task and write a final snapshot.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(Running { stop_tx, handle }) = running else {
            return;
        };

        let _ = stop_tx.send(());
        if let Err(e) = handle.await {
            tracing::error!("RetentionManager: task failed: {}", e);
        }

        if let Some(file) = &self.state_file {
            if let Err(e) = persist_state(&self.collector, Arc::clone(file)).await {
                tracing::error!("RetentionManager: Failed to write final snapshot: {}", e);
            }
        }
    }
}

async fn run_retention_loop(
    collector: Arc<Collector>,
    state_file: Option<Arc<StateFile>>,
    prune_every: Duration,
    persist_every: Duration,
    mut rx: broadcast::Receiver<()>,
) {
    let mut prune = interval_at(Instant::now() + prune_every, prune_every);
    prune.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut persist = interval_at(Instant::now() + persist_every, persist_every);
    persist.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = rx.recv() => break,
            _ = prune.tick() => {
                let removed = collector.prune(Utc::now());
                if removed > 0 {
                    tracing::info!("RetentionManager: Pruned {} samples", removed);
                }
            }
            _ = persist.tick(), if state_file.is_some() => {
                if let Some(file) = &state_file {
                    if let Err(e) = persist_state(&collector, Arc::clone(file)).await {
                        tracing::error!("RetentionManager: Failed to write snapshot: {}", e);
                    }
                }
            }
        }
    }
}

/// Write the collector's current state to the state file.
///
/// Encoding and file I/O run on the blocking pool.
pub async fn persist_state(collector: &Collector, file: Arc<StateFile>) -> Result<(), PersistenceError> {
    let snapshot = collector.export_snapshot();
    let targets = snapshot.targets.len();

    let path = file.path().to_path_buf();
    tokio::task::spawn_blocking(move || file.save(&snapshot))
        .await
        .map_err(|e| PersistenceError::Task(e.to_string()))??;

    tracing::debug!("RetentionManager: Saved {} targets to {}", targets, path.display());
    Ok(())
}
