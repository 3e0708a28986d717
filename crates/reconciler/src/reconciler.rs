//! Reconciler implementation.
//!
//! A [`Reconciler`] owns the progress of one table against one resource: the
//! last revision it has scanned and the retry queue of failed objects. The
//! loop in [`crate::r#loop`] decides when to call it.

use std::collections::HashSet;
use std::sync::Arc;

use converge_statedb::{Database, Key, Object, Query, ReadTxn, Revision, Table, Txn, Watch};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ops::BatchEntry;
use crate::retry::{Backoff, RetryQueue};
use crate::status::{Op, Status, StatusKind};
use crate::types::{FullResult, RoundResult};

/// Result of [`Reconciler::incremental_round`].
#[derive(Debug)]
pub struct IncrementalRound {
    pub result: RoundResult,
    /// Fires when the table changes after the round's snapshot.
    pub watch: Watch,
    /// The round hit its size limit and more work is waiting.
    pub more: bool,
}

/// An object selected for work, at the revision it was read.
struct Work<O> {
    key: Key,
    object: O,
    revision: Revision,
    op: Op,
}

/// What happened to one object after its operation ran.
enum Outcome {
    Succeeded,
    Failed(Error),
}

/// Drives a table's objects onto an external resource.
pub struct Reconciler<O: Object> {
    db: Database,
    table: Table<O>,
    config: Config<O>,
    retries: RetryQueue,
    processed: Revision,
    stop: Option<watch::Receiver<bool>>,
}

impl<O: Object> std::fmt::Debug for Reconciler<O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("table", &self.table.name())
            .field("processed", &self.processed)
            .field("retries", &self.retries.len())
            .finish_non_exhaustive()
    }
}

impl<O: Object> Reconciler<O> {
    /// Create a reconciler for `table`, which must be registered with `db`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration does not validate.
    pub fn new(db: Database, table: Table<O>, config: Config<O>) -> Result<Self> {
        config.validate()?;
        let backoff = Backoff::new(
            config.retry_backoff_min_duration,
            config.retry_backoff_max_duration,
        );
        Ok(Self {
            db,
            table,
            config,
            retries: RetryQueue::new(backoff),
            processed: 0,
            stop: None,
        })
    }

    /// Stop between objects once `stop` turns true.
    pub(crate) fn set_stop(&mut self, stop: watch::Receiver<bool>) {
        self.stop = Some(stop);
    }

    pub const fn config(&self) -> &Config<O> {
        &self.config
    }

    pub const fn table(&self) -> &Table<O> {
        &self.table
    }

    /// Highest revision every row of which has been examined.
    pub const fn processed(&self) -> Revision {
        self.processed
    }

    /// Objects with failure history.
    pub fn pending_retries(&self) -> usize {
        self.retries.len()
    }

    /// When the earliest scheduled retry is due.
    pub fn next_retry(&mut self) -> Option<Instant> {
        self.retries.next_due()
    }

    fn stopped(&self) -> bool {
        self.stop.as_ref().is_some_and(|rx| *rx.borrow())
    }

    fn status(&self, object: &O) -> Status {
        (self.config.get_object_status)(object)
    }

    fn with_status(&self, object: &O, status: Status) -> O {
        (self.config.with_object_status)(object, status)
    }

    /// Process objects that changed since the last round, plus due retries.
    ///
    /// # Errors
    ///
    /// Returns an error only if the state database rejects a read or write.
    /// Operation failures are recorded in object status and retried.
    pub async fn incremental_round(&mut self) -> Result<IncrementalRound> {
        let txn = self.db.read_txn();
        let (mut work, more, watch) = self.select(&txn)?;

        let mut result = RoundResult::default();
        if work.is_empty() {
            return Ok(IncrementalRound { result, watch, more });
        }

        debug!(
            table = self.table.name(),
            objects = work.len(),
            processed = self.processed,
            "Starting incremental round"
        );

        let (txn, skipped) = self.mark_in_progress(&mut work).await?;
        result.skipped = result.skipped.saturating_add(skipped);
        if work.is_empty() {
            return Ok(IncrementalRound { result, watch, more });
        }

        let outcomes = if self.config.batch_operations.is_some() {
            self.run_batch(&txn, work).await
        } else {
            self.run_each(&txn, work).await
        };

        result.attempted = outcomes.len();
        self.write_results(outcomes, &mut result).await?;

        debug!(
            table = self.table.name(),
            attempted = result.attempted,
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            "Incremental round complete"
        );
        Ok(IncrementalRound { result, watch, more })
    }

    /// Pick the objects of this round and advance the scan position.
    ///
    /// Due retries come first and count toward the round size.
    fn select(&mut self, txn: &ReadTxn) -> Result<(Vec<Work<O>>, bool, Watch)> {
        let limit = self.config.incremental_round_size;
        let now = Instant::now();
        let mut work = Vec::new();
        let mut seen = HashSet::new();

        for (key, failed_at) in self.retries.pop_due(now, limit) {
            match self.table.first(txn, self.table.query_primary(key.clone()))? {
                None => self.retries.forget(&key),
                Some((object, revision)) if revision == failed_at => {
                    if let Some(op) = self.status(&object).pending_op() {
                        seen.insert(key.clone());
                        work.push(Work {
                            key,
                            object,
                            revision,
                            op,
                        });
                    }
                }
                // Rewritten since it failed; the scan picks up the new row.
                Some(_) => {}
            }
        }

        let (changed, watch) = self
            .table
            .lower_bound_watch(txn, Query::revision(self.processed.saturating_add(1)))?;

        let mut more = false;
        let mut next = txn.revision();
        for (object, revision) in changed {
            let Some(op) = self.status(&object).pending_op() else {
                continue;
            };
            let key = self.table.primary_key(&object)?;
            if seen.contains(&key) || self.retries.is_waiting(&key, revision) {
                continue;
            }
            if work.len() >= limit {
                // Rows sharing this revision are rescanned next round.
                next = revision.saturating_sub(1).max(self.processed);
                more = true;
                break;
            }
            seen.insert(key.clone());
            work.push(Work {
                key,
                object,
                revision,
                op,
            });
        }
        self.processed = next;
        Ok((work, more || self.retries.has_due(now), watch))
    }

    /// Commit `InProgress` for the selected objects.
    ///
    /// Objects a producer rewrote since they were read are dropped from
    /// `work`. Returns the committed snapshot and how many were dropped.
    async fn mark_in_progress(&self, work: &mut Vec<Work<O>>) -> Result<(ReadTxn, usize)> {
        let mut wtxn = self.db.write_txn(&[&self.table]).await?;
        let before = work.len();
        let mut kept = Vec::with_capacity(before);
        for item in work.drain(..) {
            let marked = self.with_status(&item.object, Status::in_progress(item.op));
            match self
                .table
                .compare_and_swap(&mut wtxn, item.revision, marked.clone())
            {
                Ok(_) => kept.push(Work {
                    object: marked,
                    ..item
                }),
                Err(e) if e.is_conflict() => {
                    debug!(key = %item.key, error = %e, "Object changed before processing, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let txn = wtxn.commit();
        for item in &mut kept {
            item.revision = txn.revision();
        }
        *work = kept;
        Ok((txn, before.saturating_sub(work.len())))
    }

    async fn run_each(&self, txn: &ReadTxn, work: Vec<Work<O>>) -> Vec<(Work<O>, Outcome)> {
        let ops = Arc::clone(&self.config.operations);
        let mut outcomes = Vec::with_capacity(work.len());
        for item in work {
            if self.stopped() {
                debug!(table = self.table.name(), "Stop requested, leaving remaining objects");
                break;
            }
            let outcome = match item.op {
                Op::Update => ops.update(txn, &item.object).await.map(|_| ()),
                Op::Delete => ops.delete(txn, &item.object).await,
            };
            outcomes.push((item, outcome.map_or_else(Outcome::Failed, |()| Outcome::Succeeded)));
        }
        outcomes
    }

    async fn run_batch(&self, txn: &ReadTxn, work: Vec<Work<O>>) -> Vec<(Work<O>, Outcome)> {
        let Some(batch_ops) = self.config.batch_operations.as_ref().map(Arc::clone) else {
            return self.run_each(txn, work).await;
        };

        let mut outcomes = Vec::with_capacity(work.len());
        let (updates, deletes): (Vec<_>, Vec<_>) =
            work.into_iter().partition(|item| item.op == Op::Update);

        for (op, items) in [(Op::Update, updates), (Op::Delete, deletes)] {
            if items.is_empty() {
                continue;
            }
            let mut batch: Vec<BatchEntry<O>> = items
                .iter()
                .map(|item| BatchEntry::new(item.object.clone(), item.revision))
                .collect();
            match op {
                Op::Update => batch_ops.update_batch(txn, &mut batch).await,
                Op::Delete => batch_ops.delete_batch(txn, &mut batch).await,
            }
            outcomes.extend(items.into_iter().zip(batch).map(|(item, entry)| {
                let outcome = entry.result.map_or_else(Outcome::Failed, |()| Outcome::Succeeded);
                (item, outcome)
            }));
        }
        outcomes
    }

    /// Write the outcome of each object back in one transaction.
    async fn write_results(
        &mut self,
        outcomes: Vec<(Work<O>, Outcome)>,
        result: &mut RoundResult,
    ) -> Result<()> {
        let mut wtxn = self.db.write_txn(&[&self.table]).await?;
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for (item, outcome) in outcomes {
            let written = match (&outcome, item.op) {
                (Outcome::Succeeded, Op::Update) => self
                    .table
                    .compare_and_swap(
                        &mut wtxn,
                        item.revision,
                        self.with_status(&item.object, Status::done()),
                    )
                    .map(|_| ()),
                (Outcome::Succeeded, Op::Delete) => self
                    .table
                    .compare_and_delete(&mut wtxn, item.revision, &item.object)
                    .map(|_| ()),
                (Outcome::Failed(e), op) => self
                    .table
                    .compare_and_swap(
                        &mut wtxn,
                        item.revision,
                        self.with_status(&item.object, Status::error(op, e.to_string())),
                    )
                    .map(|_| ()),
            };

            match written {
                Ok(()) => match outcome {
                    Outcome::Succeeded => succeeded.push(item),
                    Outcome::Failed(e) => failed.push((item, e)),
                },
                Err(e) if e.is_conflict() => {
                    debug!(key = %item.key, error = %e, "Object changed during processing, status not written");
                    result.skipped = result.skipped.saturating_add(1);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let txn = wtxn.commit();
        let now = Instant::now();

        for item in succeeded {
            match item.op {
                Op::Update => self.retries.succeed(&item.key),
                Op::Delete => self.retries.forget(&item.key),
            }
            debug!(key = %item.key, op = %item.op, "Object reconciled");
            result.succeeded = result.succeeded.saturating_add(1);
        }
        for (item, error) in failed {
            let delay = self.retries.fail(item.key.clone(), txn.revision(), now);
            warn!(
                table = self.table.name(),
                key = %item.key,
                op = %item.op,
                error = %error,
                failures = self.retries.failures(&item.key),
                retry_in_ms = delay.as_millis(),
                "Operation failed, retrying"
            );
            result.failed = result.failed.saturating_add(1);
        }
        Ok(())
    }

    /// Re-apply every settled object and prune the resource.
    ///
    /// Objects whose re-apply fails are marked `Error` and retried. A prune
    /// failure is reported in the result and retried on the next pass.
    ///
    /// # Errors
    ///
    /// Returns an error only if the state database rejects a read or write.
    pub async fn full_reconciliation(&mut self) -> Result<FullResult> {
        let txn = self.db.read_txn();
        let ops = Arc::clone(&self.config.operations);
        let mut result = FullResult::default();

        info!(
            table = self.table.name(),
            revision = txn.revision(),
            "Starting full reconciliation"
        );

        let settled: Vec<(O, Revision)> = self
            .table
            .all(&txn)?
            .filter(|(object, _)| self.status(object).kind == StatusKind::Done)
            .collect();

        let mut failures = Vec::new();
        for (object, revision) in settled {
            if self.stopped() {
                info!(table = self.table.name(), "Stop requested, full reconciliation cut short");
                return Ok(result);
            }
            result.updated = result.updated.saturating_add(1);
            match ops.update(&txn, &object).await {
                Ok(true) => {
                    let key = self.table.primary_key(&object)?;
                    warn!(
                        table = self.table.name(),
                        key = %key,
                        "Resource drifted from desired state, repaired"
                    );
                    result.repaired = result.repaired.saturating_add(1);
                }
                Ok(false) => {}
                Err(e) => failures.push((object, revision, e)),
            }
        }

        if !failures.is_empty() {
            result.failed = failures.len();
            self.record_full_failures(failures).await?;
        }

        let desired: Vec<(O, Revision)> = self
            .table
            .all(&txn)?
            .filter(|(object, _)| self.status(object).op != Op::Delete)
            .collect();
        result.pruned_against = desired.len();

        if let Err(e) = ops.prune(&txn, Box::new(desired.into_iter())).await {
            warn!(table = self.table.name(), error = %e, "Prune failed");
            result.prune_error = Some(e.to_string());
        }

        info!(
            table = self.table.name(),
            updated = result.updated,
            repaired = result.repaired,
            failed = result.failed,
            pruned_against = result.pruned_against,
            "Full reconciliation complete"
        );
        Ok(result)
    }

    async fn record_full_failures(&mut self, failures: Vec<(O, Revision, Error)>) -> Result<()> {
        let mut wtxn = self.db.write_txn(&[&self.table]).await?;
        let mut written = Vec::new();
        for (object, revision, error) in failures {
            let key = self.table.primary_key(&object)?;
            let marked = self.with_status(&object, Status::error(Op::Update, error.to_string()));
            match self.table.compare_and_swap(&mut wtxn, revision, marked) {
                Ok(_) => written.push((key, error)),
                Err(e) if e.is_conflict() => {
                    debug!(key = %key, error = %e, "Object changed during full reconciliation, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let txn = wtxn.commit();
        let now = Instant::now();
        for (key, error) in written {
            let delay = self.retries.fail(key.clone(), txn.revision(), now);
            warn!(
                table = self.table.name(),
                key = %key,
                error = %error,
                retry_in_ms = delay.as_millis(),
                "Re-apply failed, retrying"
            );
        }
        Ok(())
    }
}
