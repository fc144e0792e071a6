use super::locks::KeyedLocks;
use super::store::TransactionRecordStore;
use crate::domain::ledger::{LedgerDelta, LedgerEntry};
use crate::domain::ports::WordLedger;
use crate::domain::transaction::CheckoutId;
use crate::error::Result;
use async_trait::async_trait;
use tracing::{debug, info};

/// `WordLedger` backed by the record store, so ledger writes follow the same
/// durable-or-mirror routing as transactions.
#[derive(Clone)]
pub struct StoreLedger {
    store: TransactionRecordStore,
    locks: KeyedLocks,
}

impl StoreLedger {
    pub fn new(store: TransactionRecordStore) -> Self {
        Self {
            store,
            locks: KeyedLocks::new(),
        }
    }
}

#[async_trait]
impl WordLedger for StoreLedger {
    async fn word_balance(&self, username: &str) -> Result<LedgerEntry> {
        self.store.load_ledger(username).await
    }

    async fn consume_words(&self, username: &str, words: u64) -> Result<u64> {
        let _guard = self.locks.lock(username).await;
        let entry = self
            .store
            .apply_ledger(username, LedgerDelta::Consume { words })
            .await?;
        debug!(username, words, balance = entry.word_balance, "Words consumed");
        Ok(entry.word_balance)
    }

    async fn credit_words(
        &self,
        username: &str,
        checkout_id: &CheckoutId,
        words: u64,
    ) -> Result<u64> {
        let _guard = self.locks.lock(username).await;
        let before = self.store.load_ledger(username).await?;
        if before.has_credit(checkout_id) {
            debug!(username, %checkout_id, "Checkout already credited");
            return Ok(before.word_balance);
        }
        let entry = self
            .store
            .apply_ledger(
                username,
                LedgerDelta::Credit {
                    checkout_id: checkout_id.clone(),
                    words,
                },
            )
            .await?;
        info!(username, %checkout_id, words, balance = entry.word_balance, "Words credited");
        Ok(entry.word_balance)
    }
}
