//! Wallet-tier mutations and read queries: `wallet`, `wallet_balance`,
//! `wallet_tx_history` and the ordered wallet-address index.

use redb::ReadableTable;

use crate::balance::WalletDeltaMap;
use crate::db::codec::{self, BalanceRow, HistoryRow, WalletRow};
use crate::db::{prefix_scan, schema, LedgerBatch, LedgerSnapshot, StoreError};
use crate::event::TxId;

/// One address of a materialized wallet, ordered by derivation index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletAddress {
    pub address: String,
    pub index: u32,
    pub transactions: u32,
}

/// One (wallet, token) balance cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletBalanceEntry {
    pub token_id: String,
    pub unlocked: u64,
    pub locked: u64,
    pub transactions: u32,
}

/// One wallet history row, newest first in query results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletHistoryEntry {
    pub tx_id: TxId,
    pub timestamp: u32,
    pub balance: i64,
}

impl LedgerBatch {
    pub fn wallet(&self, wallet_id: &str) -> Result<Option<WalletRow>, StoreError> {
        let table = self.txn.open_table(schema::WALLET)?;
        let x = match table.get(wallet_id.as_bytes())? {
            Some(guard) => Some(codec::decode_wallet(guard.value())?),
            None => None,
        };
        Ok(x)
    }

    pub fn insert_wallet(&self, wallet_id: &str, row: &WalletRow) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(schema::WALLET)?;
        table.insert(wallet_id.as_bytes(), codec::encode_wallet(row)?.as_slice())?;
        Ok(())
    }

    /// Attach a wallet identity to an address, creating the address row if
    /// the chain has not touched it yet. Maintains the ordered index.
    pub fn claim_address(
        &self,
        address: &str,
        wallet_id: &str,
        index: u32,
    ) -> Result<(), StoreError> {
        let mut row = self.address_row(address)?.unwrap_or_default();
        row.wallet_id = Some(wallet_id.to_string());
        row.index = Some(index);
        self.put_address_row(address, &row)?;
        let mut table = self.txn.open_table(schema::WALLET_ADDRESS)?;
        table.insert(
            schema::wallet_address_key(wallet_id, index).as_slice(),
            address.as_bytes(),
        )?;
        Ok(())
    }

    /// Wallet-tier counterpart of `apply_address_deltas`: one balance upsert
    /// and one history row per (wallet, token) touched by the transaction.
    pub fn apply_wallet_deltas(
        &self,
        tx_id: &TxId,
        timestamp: u32,
        deltas: &WalletDeltaMap,
    ) -> Result<(), StoreError> {
        for (wallet_id, tokens) in deltas {
            for (token_id, delta) in tokens {
                self.upsert_balance_cell(schema::WALLET_BALANCE, wallet_id, token_id, *delta)?;
            }
            let mut history = self.txn.open_table(schema::WALLET_TX_HISTORY)?;
            for (token_id, delta) in tokens {
                let row = HistoryRow { balance: delta.total(), timestamp };
                history.insert(
                    schema::wallet_history_key(wallet_id, token_id, timestamp, tx_id).as_slice(),
                    codec::encode_history(&row)?.as_slice(),
                )?;
            }
        }
        Ok(())
    }

    pub fn apply_wallet_unlock(&self, deltas: &WalletDeltaMap) -> Result<(), StoreError> {
        self.apply_unlock_cells(schema::WALLET_BALANCE, deltas)
    }

    /// Seeded history row written during materialization.
    pub fn insert_wallet_history(
        &self,
        wallet_id: &str,
        token_id: &str,
        timestamp: u32,
        tx_id: &TxId,
        balance: i64,
    ) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(schema::WALLET_TX_HISTORY)?;
        let row = HistoryRow { balance, timestamp };
        table.insert(
            schema::wallet_history_key(wallet_id, token_id, timestamp, tx_id).as_slice(),
            codec::encode_history(&row)?.as_slice(),
        )?;
        Ok(())
    }

    /// Seeded balance cell written during materialization.
    pub fn put_wallet_balance(
        &self,
        wallet_id: &str,
        token_id: &str,
        row: &BalanceRow,
    ) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(schema::WALLET_BALANCE)?;
        table.insert(
            schema::balance_key(wallet_id, token_id).as_slice(),
            codec::encode_balance(row)?.as_slice(),
        )?;
        Ok(())
    }
}

impl LedgerSnapshot {
    pub fn wallet(&self, wallet_id: &str) -> Result<Option<WalletRow>, StoreError> {
        let table = self.txn.open_table(schema::WALLET)?;
        let x = match table.get(wallet_id.as_bytes())? {
            Some(guard) => Some(codec::decode_wallet(guard.value())?),
            None => None,
        };
        Ok(x)
    }

    /// Addresses of a wallet ordered by derivation index ascending.
    pub fn wallet_addresses(&self, wallet_id: &str) -> Result<Vec<WalletAddress>, StoreError> {
        let index_table = self.txn.open_table(schema::WALLET_ADDRESS)?;
        let prefix = schema::owner_prefix(wallet_id);
        let entries = prefix_scan(&index_table, &prefix)?;
        drop(index_table);
        let address_table = self.txn.open_table(schema::ADDRESS)?;
        let mut addresses = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let index = schema::parse_u32(&key[prefix.len()..])?;
            let address = schema::parse_utf8(&value)?;
            let transactions = match address_table.get(address.as_bytes())? {
                Some(guard) => codec::decode_address(guard.value())?.transactions,
                None => 0,
            };
            addresses.push(WalletAddress { address, index, transactions });
        }
        Ok(addresses)
    }

    /// Balance cells of a wallet, optionally narrowed to one token.
    pub fn wallet_balances(
        &self,
        wallet_id: &str,
        token_id: Option<&str>,
    ) -> Result<Vec<WalletBalanceEntry>, StoreError> {
        let table = self.txn.open_table(schema::WALLET_BALANCE)?;
        let mut balances = Vec::new();
        match token_id {
            Some(token_id) => {
                let key = schema::balance_key(wallet_id, token_id);
                if let Some(guard) = table.get(key.as_slice())? {
                    let row = codec::decode_balance(guard.value())?;
                    balances.push(entry(token_id.to_string(), row));
                }
            }
            None => {
                let prefix = schema::owner_prefix(wallet_id);
                for (key, value) in prefix_scan(&table, &prefix)? {
                    let (token, _) = schema::split_segment(&key[prefix.len()..])?;
                    let row = codec::decode_balance(&value)?;
                    balances.push(entry(schema::parse_utf8(token)?, row));
                }
            }
        }
        Ok(balances)
    }

    pub fn wallet_balance(
        &self,
        wallet_id: &str,
        token_id: &str,
    ) -> Result<Option<BalanceRow>, StoreError> {
        let table = self.txn.open_table(schema::WALLET_BALANCE)?;
        let key = schema::balance_key(wallet_id, token_id);
        match table.get(key.as_slice())? {
            Some(guard) => Ok(Some(codec::decode_balance(guard.value())?)),
            None => Ok(None),
        }
    }

    /// History page for one (wallet, token), newest first.
    pub fn wallet_history(
        &self,
        wallet_id: &str,
        token_id: &str,
        skip: usize,
        count: usize,
    ) -> Result<Vec<WalletHistoryEntry>, StoreError> {
        let table = self.txn.open_table(schema::WALLET_TX_HISTORY)?;
        let prefix = schema::wallet_history_prefix(wallet_id, token_id);
        let end = schema::prefix_successor(&prefix);
        let iter = match end.as_deref() {
            Some(end) => table.range::<&[u8]>(prefix.as_slice()..end)?,
            None => table.range::<&[u8]>(prefix.as_slice()..)?,
        };
        let mut entries = Vec::new();
        for item in iter.rev().skip(skip).take(count) {
            let (key, value) = item?;
            let rest = &key.value()[prefix.len()..];
            let timestamp = schema::parse_u32(&rest[..4])?;
            let tx_id = schema::parse_tx_id(&rest[4..])?;
            let row = codec::decode_history(value.value())?;
            entries.push(WalletHistoryEntry { tx_id, timestamp, balance: row.balance });
        }
        Ok(entries)
    }
}

fn entry(token_id: String, row: BalanceRow) -> WalletBalanceEntry {
    WalletBalanceEntry {
        token_id,
        unlocked: row.unlocked,
        locked: row.locked,
        transactions: row.transactions,
    }
}
