use super::ledger::LedgerEntry;
use super::transaction::{CheckoutId, Transaction};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// The authoritative, network-resident store.
///
/// Implementations report reachability problems as `PaymentError::TransientStore`;
/// every other error is about the data and is not retried.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Lightweight reachability check.
    async fn ping(&self) -> Result<()>;
    /// Establishes the unique keys (checkout id, username) the engine relies on.
    async fn ensure_indexes(&self) -> Result<()>;
    /// Fails with `AlreadyExists` when the checkout id is taken.
    async fn insert_transaction(&self, tx: &Transaction) -> Result<()>;
    async fn get_transaction(&self, checkout_id: &CheckoutId) -> Result<Option<Transaction>>;
    /// Fails with `NotFound` when the checkout id is unknown.
    async fn update_transaction(&self, tx: &Transaction) -> Result<()>;
    /// Every transaction of `username`, in no particular order.
    async fn list_transactions(&self, username: &str) -> Result<Vec<Transaction>>;
    async fn get_ledger(&self, username: &str) -> Result<Option<LedgerEntry>>;
    async fn put_ledger(&self, entry: &LedgerEntry) -> Result<()>;
    /// Every ledger entry, ordered by username.
    async fn list_ledger(&self) -> Result<Vec<LedgerEntry>>;
}

pub type DurableStoreRef = Arc<dyn DurableStore>;

/// Body of an STK push request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StkRequest {
    pub phone: String,
    /// Whole currency units, as a decimal string.
    pub amount: String,
    pub callback_url: String,
}

/// How the gateway answered an STK push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StkOutcome {
    /// Paid synchronously.
    Completed {
        checkout_id: Option<CheckoutId>,
        reference: Option<String>,
    },
    /// Accepted; completion arrives later through the callback.
    Deferred { checkout_id: CheckoutId },
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_stk(&self, request: &StkRequest) -> Result<StkOutcome>;
}

pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;

/// Word-balance operations owned by the account component.
#[async_trait]
pub trait WordLedger: Send + Sync {
    async fn word_balance(&self, username: &str) -> Result<LedgerEntry>;
    /// Debits words, refusing to go below zero. Returns the new balance.
    async fn consume_words(&self, username: &str, words: u64) -> Result<u64>;
    /// Credits words at most once per checkout id. Returns the new balance.
    async fn credit_words(&self, username: &str, checkout_id: &CheckoutId, words: u64)
    -> Result<u64>;
}

pub type WordLedgerRef = Arc<dyn WordLedger>;
