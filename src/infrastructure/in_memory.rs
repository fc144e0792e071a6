use crate::domain::ledger::LedgerEntry;
use crate::domain::ports::DurableStore;
use crate::domain::transaction::{CheckoutId, Transaction};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// A thread-safe in-memory durable store.
///
/// Uses `Arc<RwLock<HashMap<..>>>` for shared concurrent access; clones share state.
/// Reachability and latency can be switched at runtime, which is how outages and
/// slow networks are simulated. Used as the default backend when no database path
/// is given.
#[derive(Clone)]
pub struct InMemoryDurableStore {
    transactions: Arc<RwLock<HashMap<CheckoutId, Transaction>>>,
    ledger: Arc<RwLock<HashMap<String, LedgerEntry>>>,
    reachable: Arc<AtomicBool>,
    indexed: Arc<AtomicBool>,
    latency_ms: Arc<AtomicU64>,
}

impl Default for InMemoryDurableStore {
    fn default() -> Self {
        Self {
            transactions: Arc::default(),
            ledger: Arc::default(),
            reachable: Arc::new(AtomicBool::new(true)),
            indexed: Arc::new(AtomicBool::new(false)),
            latency_ms: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl InMemoryDurableStore {
    /// Creates a new, empty and reachable store.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Delay added to every call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn indexes_ready(&self) -> bool {
        self.indexed.load(Ordering::SeqCst)
    }

    /// Reads a transaction directly, bypassing reachability.
    pub async fn snapshot_transaction(&self, checkout_id: &CheckoutId) -> Option<Transaction> {
        self.transactions.read().await.get(checkout_id).cloned()
    }

    /// Reads a ledger entry directly, bypassing reachability.
    pub async fn snapshot_ledger(&self, username: &str) -> Option<LedgerEntry> {
        self.ledger.read().await.get(username).cloned()
    }

    async fn round_trip(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PaymentError::TransientStore(
                "in-memory durable store is offline".to_string(),
            ))
        }
    }
}

#[async_trait]
impl DurableStore for InMemoryDurableStore {
    async fn ping(&self) -> Result<()> {
        self.round_trip().await
    }

    async fn ensure_indexes(&self) -> Result<()> {
        self.round_trip().await?;
        self.indexed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        self.round_trip().await?;
        let mut transactions = self.transactions.write().await;
        if transactions.contains_key(&tx.checkout_id) {
            return Err(PaymentError::AlreadyExists(tx.checkout_id.to_string()));
        }
        transactions.insert(tx.checkout_id.clone(), tx.clone());
        Ok(())
    }

    async fn get_transaction(&self, checkout_id: &CheckoutId) -> Result<Option<Transaction>> {
        self.round_trip().await?;
        Ok(self.transactions.read().await.get(checkout_id).cloned())
    }

    async fn update_transaction(&self, tx: &Transaction) -> Result<()> {
        self.round_trip().await?;
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(&tx.checkout_id) {
            Some(existing) => {
                *existing = tx.clone();
                Ok(())
            }
            None => Err(PaymentError::NotFound(tx.checkout_id.to_string())),
        }
    }

    async fn list_transactions(&self, username: &str) -> Result<Vec<Transaction>> {
        self.round_trip().await?;
        Ok(self
            .transactions
            .read()
            .await
            .values()
            .filter(|tx| tx.username == username)
            .cloned()
            .collect())
    }

    async fn get_ledger(&self, username: &str) -> Result<Option<LedgerEntry>> {
        self.round_trip().await?;
        Ok(self.ledger.read().await.get(username).cloned())
    }

    async fn put_ledger(&self, entry: &LedgerEntry) -> Result<()> {
        self.round_trip().await?;
        self.ledger
            .write()
            .await
            .insert(entry.username.clone(), entry.clone());
        Ok(())
    }

    async fn list_ledger(&self) -> Result<Vec<LedgerEntry>> {
        self.round_trip().await?;
        let mut entries: Vec<_> = self.ledger.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(entries)
    }
}
