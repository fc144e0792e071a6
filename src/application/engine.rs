use super::callbacks::{CallbackNotice, CompletionHandler};
use super::locks::KeyedLocks;
use super::store::TransactionRecordStore;
use crate::domain::ledger::LedgerEntry;
use crate::domain::phone::normalize_phone;
use crate::domain::plan::{Plan, PlanCatalog, major_units};
use crate::domain::ports::{PaymentGatewayRef, StkOutcome, StkRequest, WordLedgerRef};
use crate::domain::transaction::{
    CheckoutId, FREE_PREFIX, MANUAL_PREFIX, STK_PREFIX, Transaction, TransactionStatus,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Reference prefix for zero-price plans.
const FREE_REFERENCE_PREFIX: &str = "FREE-PLAN";

/// Result of `PaymentEngine::initiate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitiateOutcome {
    /// Settled before returning. `manual` is set when the gateway was bypassed.
    Completed {
        checkout_id: CheckoutId,
        reference: String,
        manual: bool,
    },
    /// Waiting for the gateway callback.
    Pending { checkout_id: CheckoutId },
}

impl InitiateOutcome {
    pub fn checkout_id(&self) -> &CheckoutId {
        match self {
            InitiateOutcome::Completed { checkout_id, .. } => checkout_id,
            InitiateOutcome::Pending { checkout_id } => checkout_id,
        }
    }
}

/// Result of completing a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    Completed {
        checkout_id: CheckoutId,
        words_credited: u64,
    },
    /// The transaction was already terminal; nothing changed.
    AlreadySettled(TransactionStatus),
}

/// What status queries return.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub checkout_id: CheckoutId,
    pub status: TransactionStatus,
    pub reference: Option<String>,
    /// Whole currency units.
    pub amount: String,
    pub subscription_type: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Transaction> for StatusView {
    fn from(tx: &Transaction) -> Self {
        Self {
            checkout_id: tx.checkout_id.clone(),
            status: tx.status,
            reference: tx.reference.clone(),
            amount: major_units(tx.amount_minor_units),
            subscription_type: tx.plan_code.clone(),
            timestamp: tx.updated_at,
        }
    }
}

/// Knobs the orchestrator needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub plans: PlanCatalog,
    /// Where the gateway should post the callback.
    pub callback_url: String,
    pub gateway_timeout: Duration,
    /// Pending transactions older than this are failed on the next status query.
    pub pending_timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            plans: PlanCatalog::default(),
            callback_url: String::new(),
            gateway_timeout: Duration::from_secs(5),
            pending_timeout: None,
        }
    }
}

/// Payment orchestrator.
///
/// Initiates STK pushes, decides between synchronous and callback completion,
/// and applies the word credit of every completed checkout exactly once.
/// Mutations of one checkout id are serialized; different ids run in parallel.
pub struct PaymentEngine {
    store: TransactionRecordStore,
    ledger: WordLedgerRef,
    gateway: PaymentGatewayRef,
    settings: EngineSettings,
    locks: KeyedLocks,
}

impl PaymentEngine {
    pub fn new(
        store: TransactionRecordStore,
        ledger: WordLedgerRef,
        gateway: PaymentGatewayRef,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            ledger,
            gateway,
            settings,
            locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &TransactionRecordStore {
        &self.store
    }

    pub fn ledger(&self) -> &WordLedgerRef {
        &self.ledger
    }

    /// Starts a payment for `username` on `plan_code`.
    ///
    /// Zero-price plans settle without contacting the gateway. A gateway failure
    /// does not fail the call: the payment is completed manually and flagged so.
    pub async fn initiate(
        &self,
        username: &str,
        plan_code: &str,
        phone: &str,
    ) -> Result<InitiateOutcome> {
        let plan = self.settings.plans.resolve(plan_code)?.clone();
        let phone = normalize_phone(phone)?;

        if plan.is_free() {
            return self
                .settle_locally(username, &plan, &phone, FREE_PREFIX, FREE_REFERENCE_PREFIX)
                .await;
        }

        let request = StkRequest {
            phone: phone.clone(),
            amount: plan.gateway_amount(),
            callback_url: self.settings.callback_url.clone(),
        };

        match self.request_stk(&request).await {
            Ok(StkOutcome::Deferred { checkout_id }) => {
                self.store
                    .create(Transaction::pending(checkout_id.clone(), username, &plan, &phone))
                    .await?;
                info!(%checkout_id, username, plan = %plan.code, "Payment awaiting callback");
                Ok(InitiateOutcome::Pending { checkout_id })
            }
            Ok(StkOutcome::Completed {
                checkout_id,
                reference,
            }) => {
                let checkout_id = checkout_id.unwrap_or_else(|| CheckoutId::generate(STK_PREFIX));
                let reference = reference.unwrap_or_else(|| checkout_id.to_string());
                self.store
                    .create(Transaction::pending(checkout_id.clone(), username, &plan, &phone))
                    .await?;
                self.complete_transaction(&checkout_id, Some(reference.clone()))
                    .await?;
                Ok(InitiateOutcome::Completed {
                    checkout_id,
                    reference,
                    manual: false,
                })
            }
            Err(e) => {
                warn!(
                    username,
                    plan = %plan.code,
                    error = %e,
                    "Gateway unavailable, completing payment manually"
                );
                self.settle_locally(username, &plan, &phone, MANUAL_PREFIX, MANUAL_PREFIX)
                    .await
            }
        }
    }

    async fn request_stk(&self, request: &StkRequest) -> Result<StkOutcome> {
        let limit = self.settings.gateway_timeout;
        tokio::time::timeout(limit, self.gateway.request_stk(request))
            .await
            .map_err(|_| PaymentError::Gateway(format!("STK request timed out after {:?}", limit)))?
    }

    /// Records a transaction that is complete on creation and credits it.
    async fn settle_locally(
        &self,
        username: &str,
        plan: &Plan,
        phone: &str,
        id_prefix: &str,
        reference_prefix: &str,
    ) -> Result<InitiateOutcome> {
        let checkout_id = CheckoutId::generate(id_prefix);
        let reference = format!("{}-{}", reference_prefix, checkout_id.short_suffix());
        let tx = Transaction::completed(checkout_id.clone(), username, plan, phone, reference.clone());
        let manual = tx.is_manual();

        self.store.create(tx).await?;
        self.ledger
            .credit_words(username, &checkout_id, plan.word_limit)
            .await?;

        info!(%checkout_id, username, plan = %plan.code, manual, "Payment completed locally");
        Ok(InitiateOutcome::Completed {
            checkout_id,
            reference,
            manual,
        })
    }

    /// Completes a pending transaction and credits its plan's words.
    ///
    /// Terminal transactions are left alone and reported as `AlreadySettled`.
    pub async fn complete_transaction(
        &self,
        checkout_id: &CheckoutId,
        reference: Option<String>,
    ) -> Result<CompletionOutcome> {
        let _guard = self.locks.lock(checkout_id.as_str()).await;

        let tx = self.store.get(checkout_id).await?;
        if tx.status.is_terminal() {
            if tx.status == TransactionStatus::Completed {
                // Idempotent per checkout id; restores a credit lost after the status write.
                let words = self.settings.plans.resolve(&tx.plan_code)?.word_limit;
                self.ledger
                    .credit_words(&tx.username, checkout_id, words)
                    .await?;
            }
            return Ok(CompletionOutcome::AlreadySettled(tx.status));
        }
        let words = self.settings.plans.resolve(&tx.plan_code)?.word_limit;

        let tx = self
            .store
            .update_status(checkout_id, TransactionStatus::Completed, reference)
            .await?;
        let balance = self
            .ledger
            .credit_words(&tx.username, checkout_id, words)
            .await?;

        info!(%checkout_id, username = %tx.username, words, balance, "Payment completed");
        Ok(CompletionOutcome::Completed {
            checkout_id: checkout_id.clone(),
            words_credited: words,
        })
    }

    /// Pending -> Cancelled. Terminal transactions are returned unchanged.
    pub async fn cancel(&self, checkout_id: &CheckoutId) -> Result<Transaction> {
        self.close_pending(checkout_id, TransactionStatus::Cancelled)
            .await
    }

    /// Pending -> Failed. Terminal transactions are returned unchanged.
    pub async fn fail(&self, checkout_id: &CheckoutId) -> Result<Transaction> {
        self.close_pending(checkout_id, TransactionStatus::Failed)
            .await
    }

    async fn close_pending(
        &self,
        checkout_id: &CheckoutId,
        status: TransactionStatus,
    ) -> Result<Transaction> {
        let _guard = self.locks.lock(checkout_id.as_str()).await;
        let tx = self.store.get(checkout_id).await?;
        if tx.status.is_terminal() {
            return Ok(tx);
        }
        let tx = self.store.update_status(checkout_id, status, None).await?;
        info!(%checkout_id, %status, "Payment closed");
        Ok(tx)
    }

    pub async fn status(&self, checkout_id: &CheckoutId) -> Result<StatusView> {
        let tx = self.store.get(checkout_id).await?;
        if self.is_stale(&tx) {
            warn!(%checkout_id, "Pending payment expired without a callback");
            let failed = self.fail(checkout_id).await?;
            return Ok(StatusView::from(&failed));
        }
        Ok(StatusView::from(&tx))
    }

    fn is_stale(&self, tx: &Transaction) -> bool {
        let Some(timeout) = self.settings.pending_timeout else {
            return false;
        };
        tx.status == TransactionStatus::Pending
            && (Utc::now() - tx.created_at)
                .to_std()
                .is_ok_and(|age| age > timeout)
    }

    pub async fn balance(&self, username: &str) -> Result<LedgerEntry> {
        self.ledger.word_balance(username).await
    }

    /// Every payment of `username`, newest first.
    pub async fn history(&self, username: &str) -> Result<Vec<StatusView>> {
        let transactions = self.store.list_for_user(username).await?;
        Ok(transactions.iter().map(StatusView::from).collect())
    }

    /// Balances of every known account, ordered by username.
    pub async fn balances(&self) -> Result<Vec<LedgerEntry>> {
        self.store.list_ledger().await
    }
}

#[async_trait]
impl CompletionHandler for PaymentEngine {
    async fn handle_callback(&self, notice: CallbackNotice) -> Result<CompletionOutcome> {
        match self
            .complete_transaction(&notice.checkout_id, notice.reference)
            .await?
        {
            CompletionOutcome::AlreadySettled(_) => Err(PaymentError::DuplicateCallback(
                notice.checkout_id.to_string(),
            )),
            outcome => Ok(outcome),
        }
    }
}
