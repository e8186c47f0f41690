//! Row types and their binary encoding.

use bincode::Options;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::TxId;

/// Error surfaced when encoding or decoding stored rows fails.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

fn options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    Ok(options().serialize(value)?)
}

fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, CodecError> {
    Ok(options().deserialize(bytes)?)
}

/// Unspent output row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UtxoRow {
    pub tx_id: TxId,
    pub index: u32,
    pub token_id: String,
    pub address: String,
    pub value: u64,
    pub timelock: Option<u32>,
    pub heightlock: Option<u32>,
}

/// Address row; wallet identity is attached retroactively by materialization.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressRow {
    pub wallet_id: Option<String>,
    pub index: Option<u32>,
    pub transactions: u32,
}

/// Balance cell for one (owner, token). Stored buckets never go negative;
/// signed deltas are applied with checked arithmetic.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceRow {
    pub unlocked: u64,
    pub locked: u64,
    pub transactions: u32,
}

/// Append-only history row: net signed delta of one tx on one (owner, token).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryRow {
    pub balance: i64,
    pub timestamp: u32,
}

/// Wallet lifecycle states.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    Creating,
    Ready,
    Error,
}

/// Wallet row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletRow {
    pub xpubkey: String,
    pub status: WalletStatus,
    pub max_gap: u16,
    pub created_at: u64,
    pub ready_at: Option<u64>,
}

pub(crate) fn encode_utxo(row: &UtxoRow) -> Result<Vec<u8>, CodecError> {
    encode(row)
}

pub(crate) fn decode_utxo(bytes: &[u8]) -> Result<UtxoRow, CodecError> {
    decode(bytes)
}

pub(crate) fn encode_address(row: &AddressRow) -> Result<Vec<u8>, CodecError> {
    encode(row)
}

pub(crate) fn decode_address(bytes: &[u8]) -> Result<AddressRow, CodecError> {
    decode(bytes)
}

pub(crate) fn encode_balance(row: &BalanceRow) -> Result<Vec<u8>, CodecError> {
    encode(row)
}

pub(crate) fn decode_balance(bytes: &[u8]) -> Result<BalanceRow, CodecError> {
    decode(bytes)
}

pub(crate) fn encode_history(row: &HistoryRow) -> Result<Vec<u8>, CodecError> {
    encode(row)
}

pub(crate) fn decode_history(bytes: &[u8]) -> Result<HistoryRow, CodecError> {
    decode(bytes)
}

pub(crate) fn encode_wallet(row: &WalletRow) -> Result<Vec<u8>, CodecError> {
    encode(row)
}

pub(crate) fn decode_wallet(bytes: &[u8]) -> Result<WalletRow, CodecError> {
    decode(bytes)
}

pub(crate) fn encode_projected_height(height: Option<u32>) -> Result<Vec<u8>, CodecError> {
    encode(&height)
}
