use super::connectivity::Connectivity;
use super::mirror::{MirrorEntry, MirrorRecord};
use super::store::bounded;
use crate::domain::ledger::{LedgerDelta, LedgerEntry};
use crate::domain::ports::DurableStoreRef;
use crate::domain::transaction::Transaction;
use crate::error::{PaymentError, Result};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Counts of what one reconciliation run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub inserted: usize,
    pub merged: usize,
    pub unchanged: usize,
    pub ledger_applied: usize,
    pub conflicts: usize,
}

enum Replayed {
    Inserted(Transaction),
    Merged(Transaction),
    Unchanged(Transaction),
    Ledger(LedgerEntry),
}

/// Replays fallback-mirror entries into the durable store.
pub struct Reconciler {
    durable: DurableStoreRef,
    connectivity: Connectivity,
    op_timeout: Duration,
}

impl Reconciler {
    pub fn new(durable: DurableStoreRef, connectivity: Connectivity, op_timeout: Duration) -> Self {
        Self {
            durable,
            connectivity,
            op_timeout,
        }
    }

    /// Replays every unsynced entry, oldest first, until none are left.
    ///
    /// Entries that conflict with a terminal durable record are marked and skipped;
    /// they are retried on the next run. A transient failure aborts the run and
    /// flips connectivity back to disconnected. Writes arriving meanwhile land in
    /// the mirror and are picked up by the next pass of the loop.
    pub async fn run(&self) -> Result<SyncReport> {
        self.connectivity
            .with_state(|s| s.mirror.retry_conflicted());

        let mut report = SyncReport::default();
        loop {
            let batch = self.connectivity.with_state(|s| s.mirror.pending_entries());
            if batch.is_empty() {
                break;
            }
            for entry in batch {
                match self.replay(&entry).await {
                    Ok(replayed) => self.settle(&entry, replayed, &mut report),
                    Err(PaymentError::SyncConflict { key, reason }) => {
                        error!(
                            seq = entry.seq,
                            key = %key,
                            reason = %reason,
                            "Mirror entry conflicts with durable record"
                        );
                        self.connectivity
                            .with_state(|s| s.mirror.mark_conflicted(entry.seq));
                        report.conflicts += 1;
                    }
                    Err(e) => {
                        error!(seq = entry.seq, error = %e, "Reconciliation aborted");
                        self.connectivity.report_failure(&e);
                        return Err(e);
                    }
                }
            }
        }

        if report != SyncReport::default() {
            info!(?report, "Reconciliation finished");
        }
        Ok(report)
    }

    fn settle(&self, entry: &MirrorEntry, replayed: Replayed, report: &mut SyncReport) {
        self.connectivity.with_state(|s| {
            s.mirror.remove(entry.seq);
            match &replayed {
                Replayed::Inserted(tx) | Replayed::Merged(tx) | Replayed::Unchanged(tx) => {
                    s.mirror.remember_transaction(tx)
                }
                Replayed::Ledger(ledger) => s.mirror.remember_ledger(ledger),
            }
        });
        match replayed {
            Replayed::Inserted(_) => report.inserted += 1,
            Replayed::Merged(_) => report.merged += 1,
            Replayed::Unchanged(_) => report.unchanged += 1,
            Replayed::Ledger(_) => report.ledger_applied += 1,
        }
        debug!(seq = entry.seq, key = entry.record.key(), "Mirror entry replayed");
    }

    async fn replay(&self, entry: &MirrorEntry) -> Result<Replayed> {
        match &entry.record {
            MirrorRecord::Transaction(tx) => self.replay_transaction(tx).await,
            MirrorRecord::Ledger { username, delta } => {
                self.replay_ledger(username, delta).await.map(Replayed::Ledger)
            }
        }
    }

    async fn replay_transaction(&self, mirrored: &Transaction) -> Result<Replayed> {
        let existing = bounded(
            self.op_timeout,
            "get_transaction",
            self.durable.get_transaction(&mirrored.checkout_id),
        )
        .await?;

        let Some(mut durable) = existing else {
            bounded(
                self.op_timeout,
                "insert_transaction",
                self.durable.insert_transaction(mirrored),
            )
            .await?;
            return Ok(Replayed::Inserted(mirrored.clone()));
        };

        match durable.merge_from(mirrored) {
            Ok(true) => {
                bounded(
                    self.op_timeout,
                    "update_transaction",
                    self.durable.update_transaction(&durable),
                )
                .await?;
                Ok(Replayed::Merged(durable))
            }
            Ok(false) => Ok(Replayed::Unchanged(durable)),
            Err(e) => Err(PaymentError::SyncConflict {
                key: mirrored.checkout_id.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    async fn replay_ledger(&self, username: &str, delta: &LedgerDelta) -> Result<LedgerEntry> {
        let mut entry = bounded(self.op_timeout, "get_ledger", self.durable.get_ledger(username))
            .await?
            .unwrap_or_else(|| LedgerEntry::new(username));

        if let LedgerDelta::Credit { checkout_id, .. } = delta
            && entry.has_credit(checkout_id)
        {
            debug!(username, %checkout_id, "Credit already reflected in durable ledger");
            return Ok(entry);
        }

        let shortfall = entry.apply_replayed(delta);
        if shortfall > 0 {
            warn!(username, shortfall, "Offline consumption exceeded durable balance, clamped at zero");
        }
        bounded(self.op_timeout, "put_ledger", self.durable.put_ledger(&entry)).await?;
        Ok(entry)
    }
}
