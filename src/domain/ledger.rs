use crate::domain::transaction::CheckoutId;
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Paid,
    #[default]
    Pending,
}

/// Word balance of one account.
///
/// `applied_credits` remembers every checkout id that has already been credited,
/// which makes `credit` idempotent even when the completion path runs twice.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct LedgerEntry {
    pub username: String,
    pub word_balance: u64,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub applied_credits: BTreeSet<CheckoutId>,
}

/// A ledger mutation, recorded while the durable store is unreachable and
/// replayed once it is back.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LedgerDelta {
    Credit { checkout_id: CheckoutId, words: u64 },
    Consume { words: u64 },
}

impl LedgerEntry {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            word_balance: 0,
            payment_status: PaymentStatus::Pending,
            applied_credits: BTreeSet::new(),
        }
    }

    pub fn has_credit(&self, checkout_id: &CheckoutId) -> bool {
        self.applied_credits.contains(checkout_id)
    }

    /// Adds `words` for `checkout_id` unless that checkout was already credited.
    /// Returns whether the balance changed.
    pub fn credit(&mut self, checkout_id: &CheckoutId, words: u64) -> bool {
        if !self.applied_credits.insert(checkout_id.clone()) {
            return false;
        }
        self.word_balance = self.word_balance.saturating_add(words);
        self.payment_status = PaymentStatus::Paid;
        true
    }

    pub fn consume(&mut self, words: u64) -> Result<()> {
        if self.word_balance < words {
            return Err(PaymentError::InsufficientWords {
                requested: words,
                available: self.word_balance,
            });
        }
        self.word_balance -= words;
        Ok(())
    }

    /// Applies a delta strictly: consumes beyond the balance are refused.
    pub fn apply(&mut self, delta: &LedgerDelta) -> Result<bool> {
        match delta {
            LedgerDelta::Credit { checkout_id, words } => Ok(self.credit(checkout_id, *words)),
            LedgerDelta::Consume { words } => self.consume(*words).map(|_| true),
        }
    }

    /// Applies a delta during replay. Consumes clamp at zero instead of failing,
    /// since the words were already handed out while offline.
    /// Returns the number of words that could not be debited.
    pub fn apply_replayed(&mut self, delta: &LedgerDelta) -> u64 {
        match delta {
            LedgerDelta::Credit { checkout_id, words } => {
                self.credit(checkout_id, *words);
                0
            }
            LedgerDelta::Consume { words } => {
                let shortfall = words.saturating_sub(self.word_balance);
                self.word_balance = self.word_balance.saturating_sub(*words);
                shortfall
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_once_per_checkout() {
        let mut entry = LedgerEntry::new("alice");
        let id = CheckoutId::new("CO123");
        assert!(entry.credit(&id, 1_500));
        assert!(!entry.credit(&id, 1_500));
        assert_eq!(entry.word_balance, 1_500);
        assert_eq!(entry.payment_status, PaymentStatus::Paid);
    }

    #[test]
    fn test_consume_never_goes_negative() {
        let mut entry = LedgerEntry::new("alice");
        entry.credit(&"CO1".into(), 100);
        assert!(matches!(
            entry.consume(101),
            Err(PaymentError::InsufficientWords {
                requested: 101,
                available: 100
            })
        ));
        entry.consume(40).unwrap();
        assert_eq!(entry.word_balance, 60);
    }

    #[test]
    fn test_replayed_consume_clamps() {
        let mut entry = LedgerEntry::new("alice");
        entry.credit(&"CO1".into(), 10);
        let shortfall = entry.apply_replayed(&LedgerDelta::Consume { words: 25 });
        assert_eq!(shortfall, 15);
        assert_eq!(entry.word_balance, 0);
    }

    #[test]
    fn test_delta_serialization() {
        let delta = LedgerDelta::Credit {
            checkout_id: "CO1".into(),
            words: 5,
        };
        let json = serde_json::to_string(&delta).unwrap();
        assert_eq!(json, r#"{"kind":"credit","checkout_id":"CO1","words":5}"#);
    }
}
