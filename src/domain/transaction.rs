use crate::domain::plan::Plan;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Prefix of checkout ids synthesized for zero-price plans.
pub const FREE_PREFIX: &str = "FREE";
/// Prefix of checkout ids and references synthesized when the gateway is unavailable.
pub const MANUAL_PREFIX: &str = "MANUAL";
/// Prefix used when the gateway confirms a payment without returning a checkout id.
pub const STK_PREFIX: &str = "STK";

/// Identity of one payment attempt and the idempotency key of every mutation on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckoutId(String);

impl CheckoutId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a self-assigned id such as `MANUAL-6f1c...`.
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{}-{}", prefix, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight hex digits after the prefix, used to build synthetic references.
    pub fn short_suffix(&self) -> String {
        let tail = self
            .0
            .split_once('-')
            .map_or(self.0.as_str(), |(_, rest)| rest);
        tail.chars().filter(char::is_ascii_hexdigit).take(8).collect()
    }
}

impl fmt::Display for CheckoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CheckoutId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Cancelled,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    /// Only `Pending` may move, and only forward.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        *self == TransactionStatus::Pending && next != TransactionStatus::Pending
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A recorded payment attempt.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
pub struct Transaction {
    pub checkout_id: CheckoutId,
    pub username: String,
    /// Price in minor currency units (cents).
    pub amount_minor_units: u64,
    pub plan_code: String,
    pub phone: String,
    pub status: TransactionStatus,
    #[serde(default)]
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// A payment awaiting gateway confirmation.
    pub fn pending(checkout_id: CheckoutId, username: &str, plan: &Plan, phone: &str) -> Self {
        let now = Utc::now();
        Self {
            checkout_id,
            username: username.to_string(),
            amount_minor_units: plan.price_minor_units,
            plan_code: plan.code.clone(),
            phone: phone.to_string(),
            status: TransactionStatus::Pending,
            reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A payment that is settled at creation (free plans, manual completion).
    pub fn completed(
        checkout_id: CheckoutId,
        username: &str,
        plan: &Plan,
        phone: &str,
        reference: String,
    ) -> Self {
        let mut tx = Self::pending(checkout_id, username, plan, phone);
        tx.status = TransactionStatus::Completed;
        tx.reference = Some(reference);
        tx
    }

    /// Moves the transaction forward, refusing anything that leaves a terminal state.
    pub fn transition(&mut self, next: TransactionStatus, reference: Option<String>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::InvalidTransition {
                checkout_id: self.checkout_id.to_string(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if reference.is_some() {
            self.reference = reference;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Folds a newer snapshot of the same transaction into this one.
    ///
    /// Only the mutable fields (status, reference) are taken from `newer`.
    /// Returns whether anything changed.
    pub fn merge_from(&mut self, newer: &Transaction) -> Result<bool> {
        if self.status == newer.status {
            if self.reference.is_none() && newer.reference.is_some() {
                self.reference = newer.reference.clone();
                self.updated_at = newer.updated_at;
                return Ok(true);
            }
            return Ok(false);
        }
        self.transition(newer.status, newer.reference.clone())?;
        self.updated_at = newer.updated_at;
        Ok(true)
    }

    pub fn is_manual(&self) -> bool {
        self.checkout_id.as_str().starts_with(MANUAL_PREFIX)
    }
}
