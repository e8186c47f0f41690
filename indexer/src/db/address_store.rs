//! Address-tier mutations and queries: `utxo`, `address`, `address_balance`
//! and `address_tx_history`, plus the heightlock maturity index.

use std::collections::BTreeMap;

use redb::ReadableTable;

use crate::balance::{AddressDeltaMap, BalanceDelta, TokenDeltaMap};
use crate::db::codec::{self, AddressRow, BalanceRow, HistoryRow, UtxoRow};
use crate::db::schema::{self, KeyedTable};
use crate::db::{prefix_scan, LedgerBatch, LedgerSnapshot, StoreError};
use crate::event::TxId;

/// Clamp applied when a delta creates a balance cell: negative contributions
/// can only exist when an earlier tx credited the cell, so a fresh insert
/// floors at zero.
fn clamp_initial(delta: i64) -> u64 {
    delta.max(0) as u64
}

/// Raw signed addition against a stored bucket. Underflow means the spend
/// contradicts projected history and is a programmer/chain error, never a
/// wrapped value.
fn apply_signed(current: u64, delta: i64, owner: &str, token_id: &str) -> Result<u64, StoreError> {
    if delta >= 0 {
        current
            .checked_add(delta as u64)
            .ok_or_else(|| StoreError::BalanceOverflow {
                owner: owner.to_string(),
                token_id: token_id.to_string(),
            })
    } else {
        current
            .checked_sub(delta.unsigned_abs())
            .ok_or_else(|| StoreError::BalanceUnderflow {
                owner: owner.to_string(),
                token_id: token_id.to_string(),
            })
    }
}

impl LedgerBatch {
    /// Insert one produced output, maintaining the heightlock index.
    pub fn insert_utxo(&self, row: &UtxoRow) -> Result<(), StoreError> {
        let key = schema::utxo_key(&row.tx_id, row.index);
        let value = codec::encode_utxo(row)?;
        let mut table = self.txn.open_table(schema::UTXO)?;
        table.insert(key.as_slice(), value.as_slice())?;
        drop(table);
        if let Some(height) = row.heightlock {
            let empty: &[u8] = &[];
            let mut index = self.txn.open_table(schema::UTXO_HEIGHTLOCK)?;
            index.insert(
                schema::heightlock_key(height, &row.tx_id, row.index).as_slice(),
                empty,
            )?;
        }
        Ok(())
    }

    /// Delete a spent outpoint. `None` means the input references nothing
    /// unspent, which callers surface as a chain inconsistency.
    pub fn remove_utxo(&self, tx_id: &TxId, index: u32) -> Result<Option<UtxoRow>, StoreError> {
        let key = schema::utxo_key(tx_id, index);
        let removed = {
            let mut table = self.txn.open_table(schema::UTXO)?;
            let x = match table.remove(key.as_slice())? {
                Some(guard) => Some(codec::decode_utxo(guard.value())?),
                None => None,
            };
            x
        };
        if let Some(row) = &removed {
            if let Some(height) = row.heightlock {
                let mut index_table = self.txn.open_table(schema::UTXO_HEIGHTLOCK)?;
                index_table.remove(schema::heightlock_key(height, tx_id, row.index).as_slice())?;
            }
        }
        Ok(removed)
    }

    /// Apply one transaction's address deltas: bump address counters, upsert
    /// balance cells, then append history rows. Balances are written before
    /// history so no reader can observe a history row without its balance.
    pub fn apply_address_deltas(
        &self,
        tx_id: &TxId,
        timestamp: u32,
        deltas: &AddressDeltaMap,
    ) -> Result<(), StoreError> {
        for (address, tokens) in deltas {
            self.bump_address_transactions(address)?;
            for (token_id, delta) in tokens {
                self.upsert_balance_cell(schema::ADDRESS_BALANCE, address, token_id, *delta)?;
            }
            let mut history = self.txn.open_table(schema::ADDRESS_TX_HISTORY)?;
            for (token_id, delta) in tokens {
                let row = HistoryRow { balance: delta.total(), timestamp };
                history.insert(
                    schema::address_history_key(address, tx_id, token_id).as_slice(),
                    codec::encode_history(&row)?.as_slice(),
                )?;
            }
        }
        Ok(())
    }

    /// Move matured value from `locked` to `unlocked`. Transaction counters
    /// and histories are untouched.
    pub fn apply_address_unlock(&self, deltas: &AddressDeltaMap) -> Result<(), StoreError> {
        self.apply_unlock_cells(schema::ADDRESS_BALANCE, deltas)
    }

    /// UTXOs whose heightlock matures exactly at `height` and whose timelock
    /// (if any) has already passed.
    pub fn utxos_maturing_at(&self, height: u32, now: u32) -> Result<Vec<UtxoRow>, StoreError> {
        let keys = {
            let index = self.txn.open_table(schema::UTXO_HEIGHTLOCK)?;
            prefix_scan(&index, &schema::heightlock_prefix(height))?
        };
        let mut rows = Vec::new();
        let table = self.txn.open_table(schema::UTXO)?;
        for (key, _) in keys {
            let tx_id = schema::parse_tx_id(&key[4..36])?;
            let index = schema::parse_u32(&key[36..])?;
            let utxo_key = schema::utxo_key(&tx_id, index);
            let row = match table.get(utxo_key.as_slice())? {
                Some(guard) => codec::decode_utxo(guard.value())?,
                None => {
                    return Err(StoreError::CorruptKey(format!(
                        "heightlock index references missing utxo {tx_id}:{index}"
                    )))
                }
            };
            if row.timelock.is_none_or(|timelock| timelock <= now) {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Drop index entries for UTXOs released at `height`.
    pub fn clear_heightlock_entries(&self, height: u32, utxos: &[UtxoRow]) -> Result<(), StoreError> {
        let mut index = self.txn.open_table(schema::UTXO_HEIGHTLOCK)?;
        for utxo in utxos {
            index.remove(schema::heightlock_key(height, &utxo.tx_id, utxo.index).as_slice())?;
        }
        Ok(())
    }

    /// Wallet claims for the given addresses: address → wallet id, for
    /// addresses a materialized wallet has already attached itself to.
    pub fn wallet_claims<'a, I>(&self, addresses: I) -> Result<BTreeMap<String, String>, StoreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let table = self.txn.open_table(schema::ADDRESS)?;
        let mut claims = BTreeMap::new();
        for address in addresses {
            if let Some(guard) = table.get(address.as_bytes())? {
                let row = codec::decode_address(guard.value())?;
                if let Some(wallet_id) = row.wallet_id {
                    claims.insert(address.to_string(), wallet_id);
                }
            }
        }
        Ok(claims)
    }

    pub fn address_row(&self, address: &str) -> Result<Option<AddressRow>, StoreError> {
        let table = self.txn.open_table(schema::ADDRESS)?;
        read_address_row(&table, address)
    }

    pub fn put_address_row(&self, address: &str, row: &AddressRow) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(schema::ADDRESS)?;
        table.insert(address.as_bytes(), codec::encode_address(row)?.as_slice())?;
        Ok(())
    }

    /// All balance cells of one address, as (token id, row) pairs.
    pub fn address_balances(&self, address: &str) -> Result<Vec<(String, BalanceRow)>, StoreError> {
        let table = self.txn.open_table(schema::ADDRESS_BALANCE)?;
        scan_address_balances(&table, address)
    }

    /// All history rows of one address, as (tx id, token id, row) triples.
    pub fn address_history(
        &self,
        address: &str,
    ) -> Result<Vec<(TxId, String, HistoryRow)>, StoreError> {
        let table = self.txn.open_table(schema::ADDRESS_TX_HISTORY)?;
        scan_address_history(&table, address)
    }

    /// Whether `project` already consumed this transaction id.
    pub fn is_projected(&self, tx_id: &TxId) -> Result<bool, StoreError> {
        let table = self.txn.open_table(schema::PROJECTED_TX)?;
        let x = table.get(tx_id.as_bytes().as_slice())?.is_some();
        Ok(x)
    }

    pub fn record_projected(&self, tx_id: &TxId, height: Option<u32>) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(schema::PROJECTED_TX)?;
        table.insert(
            tx_id.as_bytes().as_slice(),
            codec::encode_projected_height(height)?.as_slice(),
        )?;
        Ok(())
    }

    fn bump_address_transactions(&self, address: &str) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(schema::ADDRESS)?;
        let mut row = match table.get(address.as_bytes())? {
            Some(guard) => codec::decode_address(guard.value())?,
            None => AddressRow::default(),
        };
        row.transactions += 1;
        table.insert(address.as_bytes(), codec::encode_address(&row)?.as_slice())?;
        Ok(())
    }

    /// Shared upsert for address- and wallet-tier balance cells: clamp to
    /// zero on first insert, raw signed addition on existing rows, counter
    /// bumped once per transaction.
    pub(crate) fn upsert_balance_cell(
        &self,
        table_def: KeyedTable,
        owner: &str,
        token_id: &str,
        delta: BalanceDelta,
    ) -> Result<(), StoreError> {
        let key = schema::balance_key(owner, token_id);
        let mut table = self.txn.open_table(table_def)?;
        let existing = match table.get(key.as_slice())? {
            Some(guard) => Some(codec::decode_balance(guard.value())?),
            None => None,
        };
        let row = match existing {
            Some(mut row) => {
                row.unlocked = apply_signed(row.unlocked, delta.unlocked, owner, token_id)?;
                row.locked = apply_signed(row.locked, delta.locked, owner, token_id)?;
                row.transactions += 1;
                row
            }
            None => BalanceRow {
                unlocked: clamp_initial(delta.unlocked),
                locked: clamp_initial(delta.locked),
                transactions: 1,
            },
        };
        table.insert(key.as_slice(), codec::encode_balance(&row)?.as_slice())?;
        Ok(())
    }

    pub(crate) fn apply_unlock_cells(
        &self,
        table_def: KeyedTable,
        deltas: &BTreeMap<String, TokenDeltaMap>,
    ) -> Result<(), StoreError> {
        let mut table = self.txn.open_table(table_def)?;
        for (owner, tokens) in deltas {
            for (token_id, delta) in tokens {
                let key = schema::balance_key(owner, token_id);
                let mut row = match table.get(key.as_slice())? {
                    Some(guard) => codec::decode_balance(guard.value())?,
                    None => {
                        return Err(StoreError::BalanceUnderflow {
                            owner: owner.clone(),
                            token_id: token_id.clone(),
                        })
                    }
                };
                row.unlocked = apply_signed(row.unlocked, delta.unlocked, owner, token_id)?;
                row.locked = apply_signed(row.locked, delta.locked, owner, token_id)?;
                table.insert(key.as_slice(), codec::encode_balance(&row)?.as_slice())?;
            }
        }
        Ok(())
    }
}

impl LedgerSnapshot {
    pub fn utxo(&self, tx_id: &TxId, index: u32) -> Result<Option<UtxoRow>, StoreError> {
        let table = self.txn.open_table(schema::UTXO)?;
        let key = schema::utxo_key(tx_id, index);
        match table.get(key.as_slice())? {
            Some(guard) => Ok(Some(codec::decode_utxo(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn utxo_count(&self) -> Result<usize, StoreError> {
        let table = self.txn.open_table(schema::UTXO)?;
        let mut count = 0;
        for item in table.iter()? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn address_row(&self, address: &str) -> Result<Option<AddressRow>, StoreError> {
        let table = self.txn.open_table(schema::ADDRESS)?;
        read_address_row(&table, address)
    }

    pub fn address_balance(
        &self,
        address: &str,
        token_id: &str,
    ) -> Result<Option<BalanceRow>, StoreError> {
        let table = self.txn.open_table(schema::ADDRESS_BALANCE)?;
        let key = schema::balance_key(address, token_id);
        match table.get(key.as_slice())? {
            Some(guard) => Ok(Some(codec::decode_balance(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn address_history(
        &self,
        address: &str,
    ) -> Result<Vec<(TxId, String, HistoryRow)>, StoreError> {
        let table = self.txn.open_table(schema::ADDRESS_TX_HISTORY)?;
        scan_address_history(&table, address)
    }
}

fn read_address_row<T>(table: &T, address: &str) -> Result<Option<AddressRow>, StoreError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(address.as_bytes())? {
        Some(guard) => Ok(Some(codec::decode_address(guard.value())?)),
        None => Ok(None),
    }
}

fn scan_address_balances<T>(table: &T, address: &str) -> Result<Vec<(String, BalanceRow)>, StoreError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let prefix = schema::owner_prefix(address);
    let mut cells = Vec::new();
    for (key, value) in prefix_scan(table, &prefix)? {
        let (token, rest) = schema::split_segment(&key[prefix.len()..])?;
        if !rest.is_empty() {
            return Err(StoreError::CorruptKey("trailing bytes in balance key".to_string()));
        }
        cells.push((schema::parse_utf8(token)?, codec::decode_balance(&value)?));
    }
    Ok(cells)
}

fn scan_address_history<T>(
    table: &T,
    address: &str,
) -> Result<Vec<(TxId, String, HistoryRow)>, StoreError>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let prefix = schema::owner_prefix(address);
    let mut rows = Vec::new();
    for (key, value) in prefix_scan(table, &prefix)? {
        let rest = &key[prefix.len()..];
        let tx_id = schema::parse_tx_id(&rest[..32])?;
        let (token, _) = schema::split_segment(&rest[32..])?;
        rows.push((tx_id, schema::parse_utf8(token)?, codec::decode_history(&value)?));
    }
    Ok(rows)
}
