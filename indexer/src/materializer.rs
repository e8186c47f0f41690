//! Wallet registration and materialization.
//!
//! Registration inserts a `creating` wallet row. Materialization then runs a
//! gap-limit scan over the already-observed address set, attaches the wallet
//! identity to the discovered window, seeds the wallet-tier balance and
//! history tables from the address tier, and flips the wallet to `ready` —
//! all inside one write transaction, so a half-seeded wallet is never
//! visible to the projector or to readers.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::db::codec::{BalanceRow, WalletRow, WalletStatus};
use crate::db::{Ledger, LedgerBatch, StoreError};
use crate::derive::{self, AddressDeriver, DeriveError, DerivedAddress};
use crate::event::TxId;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("wallet already created")]
    AlreadyCreated,
    #[error("wallet {0} not found")]
    NotFound(String),
    /// Address-tier balances and history disagree; the wallet is marked
    /// `error` and operator intervention is required.
    #[error("materialization consistency check failed: {0}")]
    Inconsistent(String),
    #[error(transparent)]
    Derive(#[from] DeriveError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct WalletMaterializer {
    ledger: Arc<Ledger>,
    deriver: Arc<dyn AddressDeriver>,
}

impl WalletMaterializer {
    pub fn new(ledger: Arc<Ledger>, deriver: Arc<dyn AddressDeriver>) -> Self {
        Self { ledger, deriver }
    }

    /// Insert the wallet row with status `creating` and return its id.
    /// Registering an xpubkey that already has a wallet fails regardless of
    /// that wallet's state.
    pub fn register(
        &self,
        xpubkey: &str,
        max_gap: u16,
        now: u64,
    ) -> Result<String, MaterializeError> {
        self.deriver.validate(xpubkey)?;
        let wallet_id = derive::wallet_id(xpubkey);
        let batch = self.ledger.begin_write()?;
        if batch.wallet(&wallet_id)?.is_some() {
            return Err(MaterializeError::AlreadyCreated);
        }
        batch.insert_wallet(
            &wallet_id,
            &WalletRow {
                xpubkey: xpubkey.to_string(),
                status: WalletStatus::Creating,
                max_gap,
                created_at: now,
                ready_at: None,
            },
        )?;
        batch.commit()?;
        info!(wallet_id = %wallet_id, max_gap, "registered wallet");
        Ok(wallet_id)
    }

    /// Run the materialization for a registered wallet. A consistency
    /// failure rolls the whole attempt back and records status `error`.
    pub fn materialize(&self, wallet_id: &str, now: u64) -> Result<(), MaterializeError> {
        match self.try_materialize(wallet_id, now) {
            Err(err @ (MaterializeError::Inconsistent(_) | MaterializeError::Derive(_))) => {
                warn!(wallet_id, error = %err, "materialization failed; marking wallet errored");
                self.mark_error(wallet_id)?;
                Err(err)
            }
            other => other,
        }
    }

    fn try_materialize(&self, wallet_id: &str, now: u64) -> Result<(), MaterializeError> {
        let batch = self.ledger.begin_write()?;
        let Some(wallet) = batch.wallet(wallet_id)? else {
            return Err(MaterializeError::NotFound(wallet_id.to_string()));
        };
        if wallet.status == WalletStatus::Ready {
            // Re-dispatch of an already-materialized wallet is a no-op.
            return Ok(());
        }

        let window = self.scan_window(&batch, &wallet)?;
        for entry in &window {
            batch.claim_address(&entry.address, wallet_id, entry.index)?;
        }

        // Aggregate the window two ways: balance cells per token, and
        // history rows grouped per (tx, token). The two views must agree.
        let mut balance_by_token: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        let mut grouped: BTreeMap<(TxId, String), (i64, u32)> = BTreeMap::new();
        for entry in &window {
            for (token_id, row) in batch.address_balances(&entry.address)? {
                let cell = balance_by_token.entry(token_id).or_insert((0, 0));
                cell.0 += row.unlocked;
                cell.1 += row.locked;
            }
            for (tx_id, token_id, history) in batch.address_history(&entry.address)? {
                let cell = grouped
                    .entry((tx_id, token_id))
                    .or_insert((0, history.timestamp));
                cell.0 += history.balance;
            }
        }

        let mut history_by_token: BTreeMap<String, (i64, u32)> = BTreeMap::new();
        for ((_, token_id), (balance, _)) in &grouped {
            let cell = history_by_token.entry(token_id.clone()).or_insert((0, 0));
            cell.0 += balance;
            cell.1 += 1;
        }

        let tokens: BTreeSet<String> = balance_by_token
            .keys()
            .chain(history_by_token.keys())
            .cloned()
            .collect();
        for token_id in &tokens {
            let (unlocked, locked) = balance_by_token.get(token_id).copied().unwrap_or((0, 0));
            let (history_sum, _) = history_by_token.get(token_id).copied().unwrap_or((0, 0));
            let balance_total = unlocked as i128 + locked as i128;
            if balance_total != i128::from(history_sum) {
                return Err(MaterializeError::Inconsistent(format!(
                    "token {token_id}: balances total {balance_total} but history sums to {history_sum}"
                )));
            }
        }

        for ((tx_id, token_id), (balance, timestamp)) in &grouped {
            batch.insert_wallet_history(wallet_id, token_id, *timestamp, tx_id, *balance)?;
        }
        for (token_id, (unlocked, locked)) in &balance_by_token {
            let transactions = history_by_token
                .get(token_id)
                .map(|(_, count)| *count)
                .unwrap_or(0);
            batch.put_wallet_balance(
                wallet_id,
                token_id,
                &BalanceRow { unlocked: *unlocked, locked: *locked, transactions },
            )?;
        }

        let mut wallet = wallet;
        wallet.status = WalletStatus::Ready;
        wallet.ready_at = Some(now);
        batch.insert_wallet(wallet_id, &wallet)?;
        batch.commit()?;
        info!(wallet_id, addresses = window.len(), "wallet materialized");
        Ok(())
    }

    /// Gap-limit scan: derive `max_gap` addresses at a time until a full
    /// gap of unused addresses has been checked past the highest used
    /// index. The subscribed window is every derived address with
    /// index ≤ highest_used + max_gap; later derivations are discarded.
    fn scan_window(
        &self,
        batch: &LedgerBatch,
        wallet: &WalletRow,
    ) -> Result<Vec<DerivedAddress>, MaterializeError> {
        let max_gap = i64::from(wallet.max_gap);
        let mut highest_checked: i64 = -1;
        let mut highest_used: i64 = -1;
        let mut derived_all: Vec<DerivedAddress> = Vec::new();
        loop {
            let start = (highest_checked + 1) as u32;
            let derived = self
                .deriver
                .derive(&wallet.xpubkey, start, u32::from(wallet.max_gap))?;
            for entry in &derived {
                if let Some(row) = batch.address_row(&entry.address)? {
                    if row.transactions > 0 {
                        highest_used = highest_used.max(i64::from(entry.index));
                    }
                }
            }
            derived_all.extend(derived);
            highest_checked += max_gap;
            if highest_used + max_gap <= highest_checked {
                break;
            }
        }
        let window_end = highest_used + max_gap;
        derived_all.retain(|entry| i64::from(entry.index) <= window_end);
        Ok(derived_all)
    }

    fn mark_error(&self, wallet_id: &str) -> Result<(), StoreError> {
        let batch = self.ledger.begin_write()?;
        if let Some(mut wallet) = batch.wallet(wallet_id)? {
            wallet.status = WalletStatus::Error;
            batch.insert_wallet(wallet_id, &wallet)?;
            batch.commit()?;
        }
        Ok(())
    }
}
