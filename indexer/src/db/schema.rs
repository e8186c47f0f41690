//! Table and key layout for the relational projection.
//!
//! Keys are composite byte strings: fixed-width big-endian integers for
//! ordered segments, u16-length-prefixed bytes for variable-width segments.
//! The length prefix keeps composite keys unambiguous while preserving the
//! property that all keys sharing a first segment form one contiguous range.

use redb::TableDefinition;

use crate::db::StoreError;
use crate::event::TxId;

pub(crate) type KeyedTable = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// Unspent outputs keyed by (tx_id, index).
pub(crate) const UTXO: KeyedTable = TableDefinition::new("utxo");
/// Secondary index (heightlock, tx_id, index) → () backing maturity scans.
pub(crate) const UTXO_HEIGHTLOCK: KeyedTable = TableDefinition::new("utxo_heightlock");
/// Address rows keyed by the address string.
pub(crate) const ADDRESS: KeyedTable = TableDefinition::new("address");
/// Balance cells keyed by (address, token_id).
pub(crate) const ADDRESS_BALANCE: KeyedTable = TableDefinition::new("address_balance");
/// Append-only history keyed by (address, tx_id, token_id).
pub(crate) const ADDRESS_TX_HISTORY: KeyedTable = TableDefinition::new("address_tx_history");
/// Wallet rows keyed by wallet id.
pub(crate) const WALLET: KeyedTable = TableDefinition::new("wallet");
/// Secondary index (wallet_id, index) → address backing ordered listings.
pub(crate) const WALLET_ADDRESS: KeyedTable = TableDefinition::new("wallet_address");
/// Balance cells keyed by (wallet_id, token_id).
pub(crate) const WALLET_BALANCE: KeyedTable = TableDefinition::new("wallet_balance");
/// Append-only history keyed by (wallet_id, token_id, timestamp, tx_id).
pub(crate) const WALLET_TX_HISTORY: KeyedTable = TableDefinition::new("wallet_tx_history");
/// Ledger of already-projected transaction ids → height.
pub(crate) const PROJECTED_TX: KeyedTable = TableDefinition::new("projected_tx");

pub(crate) const ALL_TABLES: [KeyedTable; 10] = [
    UTXO,
    UTXO_HEIGHTLOCK,
    ADDRESS,
    ADDRESS_BALANCE,
    ADDRESS_TX_HISTORY,
    WALLET,
    WALLET_ADDRESS,
    WALLET_BALANCE,
    WALLET_TX_HISTORY,
    PROJECTED_TX,
];

fn push_segment(key: &mut Vec<u8>, bytes: &[u8]) {
    debug_assert!(bytes.len() <= u16::MAX as usize);
    key.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    key.extend_from_slice(bytes);
}

pub(crate) fn utxo_key(tx_id: &TxId, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(36);
    key.extend_from_slice(tx_id.as_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub(crate) fn heightlock_key(height: u32, tx_id: &TxId, index: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(&height.to_be_bytes());
    key.extend_from_slice(tx_id.as_bytes());
    key.extend_from_slice(&index.to_be_bytes());
    key
}

pub(crate) fn heightlock_prefix(height: u32) -> Vec<u8> {
    height.to_be_bytes().to_vec()
}

/// First segment of every owner-scoped key; doubles as the scan prefix for
/// all of an owner's balance cells or history rows.
pub(crate) fn owner_prefix(owner: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(2 + owner.len());
    push_segment(&mut key, owner.as_bytes());
    key
}

pub(crate) fn balance_key(owner: &str, token_id: &str) -> Vec<u8> {
    let mut key = owner_prefix(owner);
    push_segment(&mut key, token_id.as_bytes());
    key
}

pub(crate) fn address_history_key(address: &str, tx_id: &TxId, token_id: &str) -> Vec<u8> {
    let mut key = owner_prefix(address);
    key.extend_from_slice(tx_id.as_bytes());
    push_segment(&mut key, token_id.as_bytes());
    key
}

pub(crate) fn wallet_history_key(
    wallet_id: &str,
    token_id: &str,
    timestamp: u32,
    tx_id: &TxId,
) -> Vec<u8> {
    let mut key = wallet_history_prefix(wallet_id, token_id);
    key.extend_from_slice(&timestamp.to_be_bytes());
    key.extend_from_slice(tx_id.as_bytes());
    key
}

pub(crate) fn wallet_history_prefix(wallet_id: &str, token_id: &str) -> Vec<u8> {
    let mut key = owner_prefix(wallet_id);
    push_segment(&mut key, token_id.as_bytes());
    key
}

pub(crate) fn wallet_address_key(wallet_id: &str, index: u32) -> Vec<u8> {
    let mut key = owner_prefix(wallet_id);
    key.extend_from_slice(&index.to_be_bytes());
    key
}

/// Smallest key strictly greater than every key starting with `prefix`, or
/// `None` when the prefix is all 0xff and the scan must run to the end.
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < u8::MAX {
            *last += 1;
            return Some(end);
        }
        end.pop();
    }
    None
}

/// Split one u16-length-prefixed segment off the front of `bytes`.
pub(crate) fn split_segment(bytes: &[u8]) -> Result<(&[u8], &[u8]), StoreError> {
    if bytes.len() < 2 {
        return Err(StoreError::CorruptKey("truncated segment length".to_string()));
    }
    let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
    let rest = &bytes[2..];
    if rest.len() < len {
        return Err(StoreError::CorruptKey(format!(
            "segment length {len} exceeds remaining {} bytes",
            rest.len()
        )));
    }
    Ok((&rest[..len], &rest[len..]))
}

pub(crate) fn parse_utf8(bytes: &[u8]) -> Result<String, StoreError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|err| StoreError::CorruptKey(err.to_string()))
}

pub(crate) fn parse_tx_id(bytes: &[u8]) -> Result<TxId, StoreError> {
    let array: [u8; 32] = bytes.try_into().map_err(|_| {
        StoreError::CorruptKey(format!("expected 32-byte tx id, got {} bytes", bytes.len()))
    })?;
    Ok(TxId(array))
}

pub(crate) fn parse_u32(bytes: &[u8]) -> Result<u32, StoreError> {
    let array: [u8; 4] = bytes.try_into().map_err(|_| {
        StoreError::CorruptKey(format!("expected 4-byte integer, got {} bytes", bytes.len()))
    })?;
    Ok(u32::from_be_bytes(array))
}
