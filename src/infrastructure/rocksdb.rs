use crate::domain::ledger::LedgerEntry;
use crate::domain::ports::DurableStore;
use crate::domain::transaction::{CheckoutId, Transaction};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Column Family for transaction documents, keyed by checkout id.
pub const CF_TRANSACTIONS: &str = "transactions";
/// Column Family for ledger documents, keyed by username.
pub const CF_LEDGER: &str = "ledger";

/// A persistent durable store using RocksDB.
///
/// Transactions and ledger entries live in separate Column Families as JSON
/// documents. Keys are the unique identities, so the unique indexes come for free.
/// Any RocksDB failure is reported as a store outage.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    // Serializes check-then-write sequences (insert and update).
    write_lock: Arc<Mutex<()>>,
}

fn storage_error(e: impl std::fmt::Display) -> PaymentError {
    PaymentError::TransientStore(format!("RocksDB error: {}", e))
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating both column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_transactions = ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Options::default());
        let cf_ledger = ColumnFamilyDescriptor::new(CF_LEDGER, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_transactions, cf_ledger])
            .map_err(storage_error)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| storage_error(format!("column family {} not found", name)))
    }

    fn read<T: DeserializeOwned>(&self, cf: &str, key: &str) -> Result<Option<T>> {
        match self.db.get_pinned_cf(self.cf(cf)?, key).map_err(storage_error)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf: &str, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db
            .put_cf(self.cf(cf)?, key, bytes)
            .map_err(storage_error)
    }

    fn exists(&self, cf: &str, key: &str) -> Result<bool> {
        Ok(self
            .db
            .get_pinned_cf(self.cf(cf)?, key)
            .map_err(storage_error)?
            .is_some())
    }

    /// Decodes every document of `cf`, in key order.
    fn scan<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<T>> {
        let iter = self
            .db
            .iterator_cf(self.cf(cf)?, rocksdb::IteratorMode::Start);
        let mut values = Vec::new();
        for item in iter {
            let (_key, value) = item.map_err(storage_error)?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }
}

#[async_trait]
impl DurableStore for RocksDBStore {
    async fn ping(&self) -> Result<()> {
        self.cf(CF_TRANSACTIONS)?;
        self.cf(CF_LEDGER)?;
        Ok(())
    }

    async fn ensure_indexes(&self) -> Result<()> {
        self.ping().await
    }

    async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = tx.checkout_id.as_str();
        if self.exists(CF_TRANSACTIONS, key)? {
            return Err(PaymentError::AlreadyExists(key.to_string()));
        }
        self.write(CF_TRANSACTIONS, key, tx)
    }

    async fn get_transaction(&self, checkout_id: &CheckoutId) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, checkout_id.as_str())
    }

    async fn update_transaction(&self, tx: &Transaction) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key = tx.checkout_id.as_str();
        if !self.exists(CF_TRANSACTIONS, key)? {
            return Err(PaymentError::NotFound(key.to_string()));
        }
        self.write(CF_TRANSACTIONS, key, tx)
    }

    // Keys are checkout ids, so a per-user lookup is a full scan.
    async fn list_transactions(&self, username: &str) -> Result<Vec<Transaction>> {
        let all: Vec<Transaction> = self.scan(CF_TRANSACTIONS)?;
        Ok(all.into_iter().filter(|tx| tx.username == username).collect())
    }

    async fn get_ledger(&self, username: &str) -> Result<Option<LedgerEntry>> {
        self.read(CF_LEDGER, username)
    }

    async fn put_ledger(&self, entry: &LedgerEntry) -> Result<()> {
        self.write(CF_LEDGER, &entry.username, entry)
    }

    async fn list_ledger(&self) -> Result<Vec<LedgerEntry>> {
        self.scan(CF_LEDGER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::Plan;
    use crate::domain::transaction::TransactionStatus;
    use tempfile::tempdir;

    fn tx(id: &str) -> Transaction {
        Transaction::pending(id.into(), "alice", &Plan::new("Basic", 50_000, 1_500), "0712345678")
    }

    #[tokio::test]
    async fn test_rocksdb_open_cf() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).expect("Failed to open RocksDB");

        assert!(store.db.cf_handle(CF_TRANSACTIONS).is_some());
        assert!(store.db.cf_handle(CF_LEDGER).is_some());
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_rocksdb_transactions() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();

        let mut original = tx("CO1");
        store.insert_transaction(&original).await.unwrap();
        assert!(matches!(
            store.insert_transaction(&original).await,
            Err(PaymentError::AlreadyExists(_))
        ));

        original
            .transition(TransactionStatus::Completed, Some("REF1".into()))
            .unwrap();
        store.update_transaction(&original).await.unwrap();

        let retrieved = store.get_transaction(&"CO1".into()).await.unwrap().unwrap();
        assert_eq!(retrieved, original);
        assert!(store.get_transaction(&"CO2".into()).await.unwrap().is_none());
        assert!(matches!(
            store.update_transaction(&tx("CO2")).await,
            Err(PaymentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rocksdb_ledger_survives_reopen() {
        let dir = tempdir().unwrap();
        let mut entry = LedgerEntry::new("alice");
        entry.credit(&"CO1".into(), 1_500);
        {
            let store = RocksDBStore::open(dir.path()).unwrap();
            store.put_ledger(&entry).await.unwrap();
        }

        let store = RocksDBStore::open(dir.path()).unwrap();
        assert_eq!(store.get_ledger("alice").await.unwrap(), Some(entry.clone()));
        assert_eq!(store.list_ledger().await.unwrap(), vec![entry]);
    }

    #[tokio::test]
    async fn test_rocksdb_list_transactions() {
        let dir = tempdir().unwrap();
        let store = RocksDBStore::open(dir.path()).unwrap();
        store.insert_transaction(&tx("CO1")).await.unwrap();
        let mut other = tx("CO2");
        other.username = "bob".to_string();
        store.insert_transaction(&other).await.unwrap();

        let alice = store.list_transactions("alice").await.unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].checkout_id.as_str(), "CO1");
    }
}
