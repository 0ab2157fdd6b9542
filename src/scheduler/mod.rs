//! Scheduler module for running probes on fixed intervals.
//!
//! One task per target. Each task runs its poll cycle inline, so a target
//! never has more than one probe in flight; ticks that fall due while a probe
//! is still running are skipped.

mod retention;

pub use retention::*;

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::monitor::Collector;
use crate::probe::{probe_target, Prober};
use crate::store::{ErrorKind, PhaseTimings, ProbeFailure, Sample, Target};

/// How long `stop` waits for a loop to exit before aborting it.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Scheduler error types.
#[derive(Error, Debug, PartialEq)]
pub enum SchedulerError {
    #[error("scheduler has been stopped and cannot be restarted")]
    Stopped,
}

enum State {
    Idle,
    Running {
        stop_tx: broadcast::Sender<()>,
        tasks: HashMap<String, JoinHandle<()>>,
    },
    Stopped,
}

/// The scheduler that drives every target's poll loop.
pub struct Scheduler {
    targets: Vec<Target>,
    prober: Arc<dyn Prober>,
    collector: Arc<Collector>,
    probe_timeout: Duration,
    state: Mutex<State>,
}

impl Scheduler {
    pub fn new(
        targets: Vec<Target>,
        prober: Arc<dyn Prober>,
        collector: Arc<Collector>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            targets,
            prober,
            collector,
            probe_timeout,
            state: Mutex::new(State::Idle),
        }
    }

    /// Start one poll loop per target.
    ///
    /// Returns `Ok(false)` when already running.
    pub async fn start(&self) -> Result<bool, SchedulerError> {
        let mut state = self.state.lock().await;
        match *state {
            State::Running { .. } => {
                tracing::warn!("Scheduler: start called while already running");
                return Ok(false);
            }
            State::Stopped => return Err(SchedulerError::Stopped),
            State::Idle => {}
        }

        tracing::info!("Starting scheduler with {} targets", self.targets.len());

        let (stop_tx, _) = broadcast::channel(1);
        let mut tasks = HashMap::with_capacity(self.targets.len());

        for target in &self.targets {
            tracing::info!(
                "Scheduler: Adding target {} every {:?}",
                target.name,
                target.interval()
            );

            let handle = tokio::spawn(run_target_loop(
                target.clone(),
                Arc::clone(&self.prober),
                Arc::clone(&self.collector),
                self.probe_timeout,
                stop_tx.subscribe(),
            ));
            tasks.insert(target.name.clone(), handle);
        }

        *state = State::Running { stop_tx, tasks };
        Ok(true)
    }

    /// Cancel every timer and in-flight probe.
    ///
    /// Returns `false` when there was nothing to stop. Safe to call repeatedly.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        if !matches!(*state, State::Running { .. }) {
            return false;
        }
        let State::Running { stop_tx, tasks } = std::mem::replace(&mut *state, State::Stopped) else {
            return false;
        };

        let _ = stop_tx.send(());
        for (name, mut handle) in tasks {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                tracing::warn!("Scheduler: aborting poll loop for {}", name);
                handle.abort();
            }
        }

        tracing::info!("Scheduler stopped");
        true
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.lock().await, State::Running { .. })
    }
}

/// Run the poll loop for a single target.
async fn run_target_loop(
    target: Target,
    prober: Arc<dyn Prober>,
    collector: Arc<Collector>,
    probe_timeout: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(target.interval());
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = stop_rx.recv() => {
                break;
            }
            _ = interval.tick() => {
                let probe = {
                    let prober = Arc::clone(&prober);
                    let target = target.clone();
                    tokio::spawn(async move { probe_target(prober, &target, probe_timeout).await })
                };
                let abort = probe.abort_handle();

                let sample = tokio::select! {
                    _ = stop_rx.recv() => {
                        abort.abort();
                        break;
                    }
                    joined = probe => match joined {
                        Ok(sample) => sample,
                        Err(e) => {
                            tracing::error!("Probe task for {} failed: {}", target.name, e);
                            Sample::failed(
                                Utc::now(),
                                Duration::ZERO,
                                None,
                                PhaseTimings::default(),
                                ProbeFailure::new(ErrorKind::Internal, format!("probe task failed: {}", e)),
                            )
                        }
                    }
                };

                tracing::debug!(
                    "Probe {}: success={} time={:.1}ms",
                    target.name,
                    sample.success,
                    sample.response_time
                );
                collector.process(&target.name, sample).await;
            }
        }
    }

    tracing::debug!("Scheduler: poll loop for {} exited", target.name);
}
