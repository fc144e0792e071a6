use super::connectivity::Connectivity;
use super::mirror::MirrorRecord;
use crate::domain::ledger::{LedgerDelta, LedgerEntry};
use crate::domain::ports::DurableStoreRef;
use crate::domain::transaction::{CheckoutId, Transaction, TransactionStatus};
use crate::error::{PaymentError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Bounds a durable call by `limit`; a timeout counts as the store being unreachable.
pub(crate) async fn bounded<T>(
    limit: Duration,
    op: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(PaymentError::TransientStore(format!(
            "{} timed out after {:?}",
            op, limit
        ))),
    }
}

/// Typed access to transactions and ledger entries across the durable store and
/// the fallback mirror.
///
/// Each call goes to the durable store while it is reachable. A transient failure
/// flips connectivity and the same call is retried once against the mirror.
/// Writes made while reachable are never mirrored.
#[derive(Clone)]
pub struct TransactionRecordStore {
    durable: DurableStoreRef,
    connectivity: Connectivity,
    op_timeout: Duration,
}

impl TransactionRecordStore {
    pub fn new(durable: DurableStoreRef, connectivity: Connectivity, op_timeout: Duration) -> Self {
        Self {
            durable,
            connectivity,
            op_timeout,
        }
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    /// Runs `fut` against the durable store if it is reachable.
    ///
    /// `Ok(None)` means the caller must use the mirror: either the store was already
    /// unreachable or this call just found it so.
    async fn try_durable<T>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<Option<T>> {
        if !self.connectivity.is_reachable() {
            return Ok(None);
        }
        match bounded(self.op_timeout, op, fut).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_transient() => {
                self.connectivity.report_failure(&e);
                debug!(op, error = %e, "Falling back to mirror");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn create(&self, tx: Transaction) -> Result<()> {
        if self
            .try_durable("insert_transaction", self.durable.insert_transaction(&tx))
            .await?
            .is_some()
        {
            self.connectivity
                .with_state(|s| s.mirror.remember_transaction(&tx));
            return Ok(());
        }

        self.connectivity.with_state(|s| {
            if s.mirror.unsynced_transaction(&tx.checkout_id).is_some() {
                return Err(PaymentError::AlreadyExists(tx.checkout_id.to_string()));
            }
            let seq = s.mirror.append(MirrorRecord::Transaction(tx.clone()));
            debug!(checkout_id = %tx.checkout_id, seq, "Transaction recorded in mirror");
            Ok(())
        })
    }

    /// Looks a transaction up. An unsynced mirror snapshot always wins so a record
    /// written during an outage is never shadowed by stale durable data.
    pub async fn get(&self, checkout_id: &CheckoutId) -> Result<Transaction> {
        if let Some(tx) = self
            .connectivity
            .with_state(|s| s.mirror.unsynced_transaction(checkout_id))
        {
            return Ok(tx);
        }

        if let Some(found) = self
            .try_durable("get_transaction", self.durable.get_transaction(checkout_id))
            .await?
        {
            return match found {
                Some(tx) => {
                    self.connectivity
                        .with_state(|s| s.mirror.remember_transaction(&tx));
                    Ok(tx)
                }
                None => Err(PaymentError::NotFound(checkout_id.to_string())),
            };
        }

        self.connectivity
            .with_state(|s| s.mirror.last_known_transaction(checkout_id))
            .ok_or_else(|| PaymentError::NotFound(checkout_id.to_string()))
    }

    /// Moves a transaction to `status`. Terminal transactions are never changed.
    pub async fn update_status(
        &self,
        checkout_id: &CheckoutId,
        status: TransactionStatus,
        reference: Option<String>,
    ) -> Result<Transaction> {
        let mut tx = self.get(checkout_id).await?;
        tx.transition(status, reference)?;

        let has_unsynced = self
            .connectivity
            .with_state(|s| s.mirror.unsynced_transaction(checkout_id).is_some());
        if !has_unsynced
            && self
                .try_durable("update_transaction", self.durable.update_transaction(&tx))
                .await?
                .is_some()
        {
            self.connectivity
                .with_state(|s| s.mirror.remember_transaction(&tx));
            return Ok(tx);
        }

        self.connectivity
            .with_state(|s| s.mirror.append(MirrorRecord::Transaction(tx.clone())));
        Ok(tx)
    }

    /// Every transaction of `username`, newest first.
    ///
    /// Unsynced mirror snapshots replace their durable counterparts; offline, the
    /// last-known cache stands in for the durable store.
    pub async fn list_for_user(&self, username: &str) -> Result<Vec<Transaction>> {
        let durable = self
            .try_durable(
                "list_transactions",
                self.durable.list_transactions(username),
            )
            .await?;

        let mut merged: Vec<Transaction> = self.connectivity.with_state(|s| {
            let mut by_id: HashMap<CheckoutId, Transaction> = match durable {
                Some(found) => {
                    for tx in &found {
                        s.mirror.remember_transaction(tx);
                    }
                    found
                        .into_iter()
                        .map(|tx| (tx.checkout_id.clone(), tx))
                        .collect()
                }
                None => s.mirror.last_known_transactions_of(username),
            };
            by_id.extend(s.mirror.unsynced_transactions_of(username));
            by_id.into_values().collect()
        });
        merged.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.checkout_id.cmp(&a.checkout_id))
        });
        Ok(merged)
    }

    /// Every ledger entry, ordered by username.
    pub async fn list_ledger(&self) -> Result<Vec<LedgerEntry>> {
        if let Some(entries) = self
            .try_durable("list_ledger", self.durable.list_ledger())
            .await?
        {
            self.connectivity.with_state(|s| {
                for entry in &entries {
                    s.mirror.remember_ledger(entry);
                }
            });
            return Ok(entries);
        }
        Ok(self.connectivity.with_state(|s| s.mirror.ledger_views()))
    }

    /// Current ledger entry, or a fresh zero-balance entry for unknown users.
    pub async fn load_ledger(&self, username: &str) -> Result<LedgerEntry> {
        if let Some(found) = self
            .try_durable("get_ledger", self.durable.get_ledger(username))
            .await?
        {
            let entry = found.unwrap_or_else(|| LedgerEntry::new(username));
            self.connectivity
                .with_state(|s| s.mirror.remember_ledger(&entry));
            return Ok(entry);
        }
        Ok(self
            .connectivity
            .with_state(|s| s.mirror.ledger_view(username))
            .unwrap_or_else(|| LedgerEntry::new(username)))
    }

    /// Applies `delta` to a ledger entry and returns the resulting entry.
    ///
    /// Callers serialize per username; this is a read-modify-write.
    pub async fn apply_ledger(&self, username: &str, delta: LedgerDelta) -> Result<LedgerEntry> {
        if self.connectivity.is_reachable() {
            match self.apply_ledger_durable(username, &delta).await {
                Ok(entry) => return Ok(entry),
                Err(e) if e.is_transient() => {
                    self.connectivity.report_failure(&e);
                    warn!(username, error = %e, "Ledger write falling back to mirror");
                }
                Err(e) => return Err(e),
            }
        }

        self.connectivity.with_state(|s| {
            let mut view = s
                .mirror
                .ledger_view(username)
                .unwrap_or_else(|| LedgerEntry::new(username));
            if view.apply(&delta)? {
                s.mirror.append(MirrorRecord::Ledger {
                    username: username.to_string(),
                    delta,
                });
            }
            Ok(view)
        })
    }

    async fn apply_ledger_durable(&self, username: &str, delta: &LedgerDelta) -> Result<LedgerEntry> {
        let mut entry = bounded(self.op_timeout, "get_ledger", self.durable.get_ledger(username))
            .await?
            .unwrap_or_else(|| LedgerEntry::new(username));
        if entry.apply(delta)? {
            bounded(self.op_timeout, "put_ledger", self.durable.put_ledger(&entry)).await?;
        }
        self.connectivity
            .with_state(|s| s.mirror.remember_ledger(&entry));
        Ok(entry)
    }
}
