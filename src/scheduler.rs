// src/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;
use uuid::Uuid;

use crate::clock::Clock;
use crate::dispatch::DispatchEngine;
use crate::poll::{ClosureReport, PollClosureEngine};

/// What one tick did. `None` means that stage failed before doing any work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub delivered: Option<usize>,
    pub polls: Option<ClosureReport>,
}

/// Runs the dispatch engine, then the poll closure engine.
pub struct Reconciler {
    dispatch: DispatchEngine,
    closure: Arc<PollClosureEngine>,
    clock: Arc<dyn Clock>,
    running: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        dispatch: DispatchEngine,
        closure: Arc<PollClosureEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dispatch,
            closure,
            clock,
            running: Mutex::new(()),
        }
    }

    /// Runs one tick, or returns `None` if another tick in this process is still running.
    /// Never fails: every error is logged and the next tick retries.
    pub async fn tick(&self) -> Option<TickReport> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::warn!("previous tick still running, skipping");
            return None;
        };

        let span = tracing::info_span!("tick", tick_id = %Uuid::new_v4());
        Some(self.run_tick().instrument(span).await)
    }

    async fn run_tick(&self) -> TickReport {
        let now = self.clock.now();

        let delivered = match self.dispatch.run(now).await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::error!(error = %e, "notification dispatch failed, retrying next tick");
                None
            }
        };

        let polls = match self.closure.run(now).await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!(error = %e, "poll closure failed, retrying next tick");
                None
            }
        };

        TickReport { delivered, polls }
    }
}

/// Fires the reconciler on a fixed interval until stopped.
pub struct Scheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Spawns the timer loop. The first tick fires immediately.
    pub fn start(reconciler: Arc<Reconciler>, every: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = every.as_secs(), "scheduler started");

            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = stop.changed() => break,
                }
                // Not raced against the stop signal: a running tick always completes.
                reconciler.tick().await;
            }

            tracing::info!("scheduler stopped");
        });

        Self { shutdown, handle }
    }

    /// Signals the loop and waits for any in-flight tick to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "scheduler task ended abnormally");
        }
    }
}
