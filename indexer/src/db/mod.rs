//! redb-backed projection store.
//!
//! One `Database` holds every table of the data model. A write transaction
//! is the atomicity boundary for a whole projection step: either all of a
//! transaction event's effects commit, or the dropped transaction rolls
//! everything back. Read snapshots run concurrently with the single writer.

mod address_store;
pub mod codec;
mod schema;
mod wallet_store;

pub use wallet_store::{WalletAddress, WalletBalanceEntry, WalletHistoryEntry};

use std::fs;
use std::path::Path;

use redb::{Database, ReadableTable};
use thiserror::Error;

use codec::CodecError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("storage error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("storage error: {0}")]
    Table(#[from] redb::TableError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("storage error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("serialization error: {0}")]
    Codec(#[from] CodecError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt key encoding: {0}")]
    CorruptKey(String),
    #[error("balance underflow for {owner}/{token_id}")]
    BalanceUnderflow { owner: String, token_id: String },
    #[error("balance overflow for {owner}/{token_id}")]
    BalanceOverflow { owner: String, token_id: String },
}

/// Facade over the projection database.
pub struct Ledger {
    db: Database,
}

impl Ledger {
    /// Open or create the projection store at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;
        let ledger = Self { db };
        ledger.initialise_tables()?;
        Ok(ledger)
    }

    fn initialise_tables(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        for table in schema::ALL_TABLES {
            txn.open_table(table)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Start the write transaction covering one projection or
    /// materialization step. Dropping the batch without committing rolls
    /// back every write.
    pub fn begin_write(&self) -> Result<LedgerBatch, StoreError> {
        Ok(LedgerBatch { txn: self.db.begin_write()? })
    }

    /// Read-only snapshot for queries; sees the latest committed state.
    pub fn begin_read(&self) -> Result<LedgerSnapshot, StoreError> {
        Ok(LedgerSnapshot { txn: self.db.begin_read()? })
    }
}

/// One pending write transaction over all tables.
pub struct LedgerBatch {
    pub(crate) txn: redb::WriteTransaction,
}

impl LedgerBatch {
    pub fn commit(self) -> Result<(), StoreError> {
        Ok(self.txn.commit()?)
    }
}

/// One read snapshot over all tables.
pub struct LedgerSnapshot {
    pub(crate) txn: redb::ReadTransaction,
}

/// Collect every (key, value) pair whose key starts with `prefix`.
pub(crate) fn prefix_scan<T>(table: &T, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut entries = Vec::new();
    let end = schema::prefix_successor(prefix);
    let iter = match end.as_deref() {
        Some(end) => table.range::<&[u8]>(prefix..end)?,
        None => table.range::<&[u8]>(prefix..)?,
    };
    for item in iter {
        let (key, value) = item?;
        entries.push((key.value().to_vec(), value.value().to_vec()));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn open_creates_tables_and_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("indexer.redb");
        let ledger = Ledger::open(&path).unwrap();
        let snapshot = ledger.begin_read().unwrap();
        assert!(snapshot.wallet("missing").unwrap().is_none());
    }

    #[test]
    fn dropped_batch_rolls_back() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(&dir.path().join("indexer.redb")).unwrap();
        {
            let batch = ledger.begin_write().unwrap();
            batch
                .insert_wallet(
                    "w1",
                    &codec::WalletRow {
                        xpubkey: "xpub".to_string(),
                        status: codec::WalletStatus::Creating,
                        max_gap: 20,
                        created_at: 0,
                        ready_at: None,
                    },
                )
                .unwrap();
            // no commit
        }
        let snapshot = ledger.begin_read().unwrap();
        assert!(snapshot.wallet("w1").unwrap().is_none());
    }
}
