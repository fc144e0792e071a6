use crate::domain::ledger::{LedgerDelta, LedgerEntry};
use crate::domain::transaction::{CheckoutId, Transaction};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// What a mirror entry replays into the durable store.
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorRecord {
    /// Full snapshot of a transaction as written while offline.
    Transaction(Transaction),
    Ledger { username: String, delta: LedgerDelta },
}

impl MirrorRecord {
    /// Key the record is linearized on: checkout id or username.
    pub fn key(&self) -> &str {
        match self {
            MirrorRecord::Transaction(tx) => tx.checkout_id.as_str(),
            MirrorRecord::Ledger { username, .. } => username,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    PendingSync,
    /// Replay collided with a terminal durable record. Kept for the next cycle.
    Conflicted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MirrorEntry {
    pub seq: u64,
    pub record: MirrorRecord,
    pub state: EntryState,
    pub recorded_at: DateTime<Utc>,
}

impl MirrorEntry {
    pub fn is_pending_sync(&self) -> bool {
        self.state == EntryState::PendingSync
    }
}

/// In-memory stand-in for the durable store while it is unreachable.
///
/// `entries` is the replay log, in write order. `last_known_*` caches the latest
/// durable state seen so records that predate an outage can still be read; the
/// cache is never replayed.
#[derive(Debug, Default)]
pub struct FallbackMirror {
    entries: Vec<MirrorEntry>,
    next_seq: u64,
    last_known_transactions: HashMap<CheckoutId, Transaction>,
    last_known_ledger: HashMap<String, LedgerEntry>,
}

impl FallbackMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, record: MirrorRecord) -> u64 {
        self.next_seq += 1;
        self.entries.push(MirrorEntry {
            seq: self.next_seq,
            record,
            state: EntryState::PendingSync,
            recorded_at: Utc::now(),
        });
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[MirrorEntry] {
        &self.entries
    }

    /// Entries awaiting replay, oldest first.
    pub fn pending_entries(&self) -> Vec<MirrorEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_pending_sync())
            .cloned()
            .collect()
    }

    pub fn has_unsynced(&self) -> bool {
        self.entries.iter().any(MirrorEntry::is_pending_sync)
    }

    pub fn conflicted(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Conflicted)
            .count()
    }

    pub fn remove(&mut self, seq: u64) {
        self.entries.retain(|e| e.seq != seq);
    }

    pub fn mark_conflicted(&mut self, seq: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.seq == seq) {
            entry.state = EntryState::Conflicted;
        }
    }

    /// Puts conflicted entries back in line for another replay attempt.
    pub fn retry_conflicted(&mut self) {
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.state == EntryState::Conflicted)
        {
            entry.state = EntryState::PendingSync;
        }
    }

    /// Latest unsynced snapshot of a transaction, if any.
    pub fn unsynced_transaction(&self, checkout_id: &CheckoutId) -> Option<Transaction> {
        self.entries.iter().rev().find_map(|e| match &e.record {
            MirrorRecord::Transaction(tx)
                if e.is_pending_sync() && &tx.checkout_id == checkout_id =>
            {
                Some(tx.clone())
            }
            _ => None,
        })
    }

    /// Latest unsynced snapshot of every transaction of `username`.
    pub fn unsynced_transactions_of(&self, username: &str) -> HashMap<CheckoutId, Transaction> {
        let mut latest = HashMap::new();
        for entry in self.entries.iter().filter(|e| e.is_pending_sync()) {
            if let MirrorRecord::Transaction(tx) = &entry.record
                && tx.username == username
            {
                latest.insert(tx.checkout_id.clone(), tx.clone());
            }
        }
        latest
    }

    pub fn last_known_transactions_of(&self, username: &str) -> HashMap<CheckoutId, Transaction> {
        self.last_known_transactions
            .values()
            .filter(|tx| tx.username == username)
            .map(|tx| (tx.checkout_id.clone(), tx.clone()))
            .collect()
    }

    pub fn last_known_transaction(&self, checkout_id: &CheckoutId) -> Option<Transaction> {
        self.last_known_transactions.get(checkout_id).cloned()
    }

    pub fn remember_transaction(&mut self, tx: &Transaction) {
        self.last_known_transactions
            .insert(tx.checkout_id.clone(), tx.clone());
    }

    pub fn remember_ledger(&mut self, entry: &LedgerEntry) {
        self.last_known_ledger
            .insert(entry.username.clone(), entry.clone());
    }

    /// Offline view of an account: last known durable state plus unsynced deltas.
    pub fn ledger_view(&self, username: &str) -> Option<LedgerEntry> {
        let mut view = self.last_known_ledger.get(username).cloned();
        for entry in self.entries.iter().filter(|e| e.is_pending_sync()) {
            if let MirrorRecord::Ledger { username: u, delta } = &entry.record
                && u == username
            {
                view.get_or_insert_with(|| LedgerEntry::new(username))
                    .apply_replayed(delta);
            }
        }
        view
    }

    /// Offline view of every account the mirror knows of, ordered by username.
    pub fn ledger_views(&self) -> Vec<LedgerEntry> {
        let mut usernames: Vec<&str> = self
            .last_known_ledger
            .keys()
            .map(String::as_str)
            .chain(self.entries.iter().filter_map(|e| match &e.record {
                MirrorRecord::Ledger { username, .. } if e.is_pending_sync() => {
                    Some(username.as_str())
                }
                _ => None,
            }))
            .collect();
        usernames.sort_unstable();
        usernames.dedup();
        usernames
            .into_iter()
            .filter_map(|username| self.ledger_view(username))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::Plan;
    use crate::domain::transaction::TransactionStatus;

    fn tx(id: &str) -> Transaction {
        Transaction::pending(id.into(), "alice", &Plan::new("Basic", 50_000, 1_500), "0712345678")
    }

    #[test]
    fn test_append_orders_entries() {
        let mut mirror = FallbackMirror::new();
        let a = mirror.append(MirrorRecord::Transaction(tx("CO1")));
        let b = mirror.append(MirrorRecord::Transaction(tx("CO2")));
        assert!(a < b);
        let keys: Vec<_> = mirror
            .pending_entries()
            .iter()
            .map(|e| e.record.key().to_string())
            .collect();
        assert_eq!(keys, vec!["CO1", "CO2"]);
        assert!(mirror.entries().iter().all(MirrorEntry::is_pending_sync));
    }

    #[test]
    fn test_latest_snapshot_wins() {
        let mut mirror = FallbackMirror::new();
        mirror.append(MirrorRecord::Transaction(tx("CO1")));
        let mut done = tx("CO1");
        done.transition(TransactionStatus::Completed, Some("REF".into()))
            .unwrap();
        mirror.append(MirrorRecord::Transaction(done));

        let seen = mirror.unsynced_transaction(&"CO1".into()).unwrap();
        assert_eq!(seen.status, TransactionStatus::Completed);
    }

    #[test]
    fn test_conflicted_entries_are_hidden_until_retried() {
        let mut mirror = FallbackMirror::new();
        let seq = mirror.append(MirrorRecord::Transaction(tx("CO1")));
        mirror.mark_conflicted(seq);
        assert!(!mirror.has_unsynced());
        assert!(mirror.unsynced_transaction(&"CO1".into()).is_none());
        assert_eq!(mirror.conflicted(), 1);

        let other = mirror.append(MirrorRecord::Transaction(tx("CO2")));
        mirror.retry_conflicted();
        assert!(mirror.has_unsynced());
        assert_eq!(mirror.conflicted(), 0);
        assert_eq!(mirror.pending_entries().len(), 2);
        mirror.remove(seq);
        mirror.remove(other);
        assert!(mirror.is_empty());
    }

    #[test]
    fn test_unsynced_transactions_of_keeps_latest_snapshot() {
        let mut mirror = FallbackMirror::new();
        mirror.append(MirrorRecord::Transaction(tx("CO1")));
        let mut done = tx("CO1");
        done.transition(TransactionStatus::Completed, Some("REF".into()))
            .unwrap();
        mirror.append(MirrorRecord::Transaction(done));
        let mut other = tx("CO2");
        other.username = "bob".into();
        mirror.append(MirrorRecord::Transaction(other));

        let alice = mirror.unsynced_transactions_of("alice");
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[&"CO1".into()].status, TransactionStatus::Completed);
        assert!(mirror.last_known_transactions_of("alice").is_empty());
    }

    #[test]
    fn test_ledger_view_applies_deltas_on_last_known() {
        let mut mirror = FallbackMirror::new();
        let mut known = LedgerEntry::new("alice");
        known.credit(&"CO0".into(), 100);
        mirror.remember_ledger(&known);

        mirror.append(MirrorRecord::Ledger {
            username: "alice".into(),
            delta: LedgerDelta::Credit {
                checkout_id: "CO1".into(),
                words: 50,
            },
        });
        mirror.append(MirrorRecord::Ledger {
            username: "alice".into(),
            delta: LedgerDelta::Consume { words: 30 },
        });

        let view = mirror.ledger_view("alice").unwrap();
        assert_eq!(view.word_balance, 120);
        assert!(view.has_credit(&"CO1".into()));
        assert!(mirror.ledger_view("bob").is_none());

        mirror.append(MirrorRecord::Ledger {
            username: "bob".into(),
            delta: LedgerDelta::Credit {
                checkout_id: "CO2".into(),
                words: 10,
            },
        });
        let names: Vec<_> = mirror
            .ledger_views()
            .into_iter()
            .map(|e| (e.username, e.word_balance))
            .collect();
        assert_eq!(names, vec![("alice".to_string(), 120), ("bob".to_string(), 10)]);
    }
}
