//! Continuous reconciliation loop.

use std::future;
use std::sync::Arc;

use converge_statedb::{Database, Object, Table};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::reconciler::Reconciler;
use crate::retry::{FAR_FUTURE, deadline};

/// Runs a [`Reconciler`] until stopped.
///
/// Each iteration runs an incremental round, then waits for the table to
/// change, a retry to come due, or the full reconciliation timer.
pub struct ReconciliationLoop<O: Object> {
    /// The reconciler.
    reconciler: Reconciler<O>,
    /// Stop signal receiver.
    stop_rx: watch::Receiver<bool>,
    /// Stop signal sender (for external control).
    stop_tx: Arc<watch::Sender<bool>>,
}

impl<O: Object> ReconciliationLoop<O> {
    /// Create a new reconciliation loop.
    pub fn new(mut reconciler: Reconciler<O>) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        reconciler.set_stop(stop_rx.clone());
        Self {
            reconciler,
            stop_rx,
            stop_tx: Arc::new(stop_tx),
        }
    }

    pub const fn reconciler(&self) -> &Reconciler<O> {
        &self.reconciler
    }

    /// Run the reconciliation loop.
    ///
    /// Returns `Ok(())` once stopped. Operation failures never end the loop.
    ///
    /// # Errors
    ///
    /// Returns an error if the state database rejects a read or write, which
    /// means the table or database is misconfigured.
    pub async fn run(&mut self) -> Result<()> {
        let interval = self.reconciler.config().full_reconciliation_interval;
        let table = self.reconciler.table().name().to_string();
        info!(
            table = %table,
            full_interval_ms = interval.as_millis(),
            round_size = self.reconciler.config().incremental_round_size,
            "Starting reconciliation loop"
        );

        let period = interval.min(FAR_FUTURE);
        let mut full_timer = tokio::time::interval_at(deadline(Instant::now(), period), period);
        full_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            if self.is_stopped() {
                break Ok(());
            }

            let round = match self.reconciler.incremental_round().await {
                Ok(round) => round,
                Err(e) => break Err(e),
            };
            if round.more {
                // Full rounds must not hold off a due full pass.
                tokio::select! {
                    biased;
                    _ = full_timer.tick() => {
                        if let Err(e) = self.reconciler.full_reconciliation().await {
                            break Err(e);
                        }
                    }
                    () = tokio::task::yield_now() => {}
                }
                continue;
            }

            let mut changes = round.watch;
            let retry_at = self.reconciler.next_retry();
            tokio::select! {
                () = changes.ready() => {
                    debug!(table = %table, "Table changed");
                }
                () = sleep_until(retry_at) => {
                    debug!(table = %table, "Retry due");
                }
                _ = full_timer.tick() => {
                    if let Err(e) = self.reconciler.full_reconciliation().await {
                        break Err(e);
                    }
                }
                changed = self.stop_rx.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
            }
        };

        match &result {
            Ok(()) => info!(table = %table, "Reconciliation loop stopped"),
            Err(e) => error!(table = %table, error = %e, "Reconciliation loop failed"),
        }
        result
    }

    fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Stop the loop.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Get a stopper handle.
    pub fn stopper(&self) -> LoopStopper {
        LoopStopper {
            stop_tx: Arc::clone(&self.stop_tx),
        }
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

/// Handle to stop a reconciliation loop.
///
/// The loop finishes the operation in flight and writes its status first.
#[derive(Debug, Clone)]
pub struct LoopStopper {
    stop_tx: Arc<watch::Sender<bool>>,
}

impl LoopStopper {
    /// Stop the loop.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }
}

/// A reconciliation loop running on a tokio task.
#[derive(Debug)]
pub struct ReconcilerHandle {
    stopper: LoopStopper,
    join: JoinHandle<Result<()>>,
}

impl ReconcilerHandle {
    pub fn stopper(&self) -> LoopStopper {
        self.stopper.clone()
    }

    /// Ask the loop to stop without waiting for it.
    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to exit.
    ///
    /// # Errors
    ///
    /// Returns the loop's error, or [`Error::LoopStopped`] if the task was
    /// cancelled or panicked.
    pub async fn join(self) -> Result<()> {
        self.join.await.map_err(|e| {
            error!(error = %e, "Reconciliation task aborted");
            Error::LoopStopped
        })?
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// # Errors
    ///
    /// See [`join`](Self::join).
    pub async fn shutdown(self) -> Result<()> {
        self.stop();
        self.join().await
    }
}

/// Start reconciling `table` against `config.operations` on a new task.
///
/// # Errors
///
/// Returns [`Error::InvalidConfig`] if the configuration does not validate.
pub fn spawn<O: Object>(db: Database, table: Table<O>, config: Config<O>) -> Result<ReconcilerHandle> {
    let reconciler = Reconciler::new(db, table, config)?;
    let mut reconciliation = ReconciliationLoop::new(reconciler);
    let stopper = reconciliation.stopper();
    let join = tokio::spawn(async move { reconciliation.run().await });
    Ok(ReconcilerHandle { stopper, join })
}
