//! Single-writer projection of transaction events.
//!
//! One event is projected inside one write transaction: input spends,
//! output inserts, address deltas, wallet deltas and any heightlock
//! releases commit together or not at all.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::balance::{accumulate, AddressDeltaMap, BalanceDelta, WalletDeltaMap};
use crate::db::codec::UtxoRow;
use crate::db::{Ledger, LedgerBatch, StoreError};
use crate::event::TxEvent;
use crate::locks::{self, LockClass};

#[derive(Debug, Error)]
pub enum ProjectError {
    /// The event contradicts projected state; operator intervention needed.
    #[error("chain inconsistency: {0}")]
    InconsistentChain(String),
    /// Transient or internal storage failure; the transport should retry.
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct TxProjector {
    ledger: Arc<Ledger>,
    block_reward_lock: u32,
    write_guard: Mutex<()>,
}

impl TxProjector {
    pub fn new(ledger: Arc<Ledger>, block_reward_lock: u32) -> Self {
        Self {
            ledger,
            block_reward_lock,
            write_guard: Mutex::new(()),
        }
    }

    /// Project one event. Re-submitting an already-projected tx id is a
    /// no-op; any error leaves the store untouched.
    pub fn project(&self, event: &TxEvent) -> Result<(), ProjectError> {
        let _serial = self.write_guard.lock();
        let batch = self.ledger.begin_write()?;

        if batch.is_projected(&event.tx_id)? {
            debug!(tx_id = %event.tx_id, "dropping duplicate transaction event");
            return Ok(());
        }

        let is_block = event.is_block();
        if is_block && event.height.is_none() {
            return Err(ProjectError::InconsistentChain(format!(
                "block event {} carries no height",
                event.tx_id
            )));
        }
        validate_values(event)?;
        let now = event.timestamp;

        // 1. Address-level deltas for every input and output.
        let deltas = compute_deltas(event, now, is_block);

        // 2. Spend inputs.
        for input in &event.inputs {
            if batch.remove_utxo(&input.tx_id, input.index)?.is_none() {
                return Err(ProjectError::InconsistentChain(format!(
                    "input {}:{} of {} references no unspent output",
                    input.tx_id, input.index, event.tx_id
                )));
            }
        }

        // 3. Insert outputs; block outputs mature at height + reward lock.
        let heightlock = if is_block {
            event.height.map(|height| height + self.block_reward_lock)
        } else {
            None
        };
        for (index, output) in event.outputs.iter().enumerate() {
            batch.insert_utxo(&UtxoRow {
                tx_id: event.tx_id,
                index: index as u32,
                token_id: output.token.clone(),
                address: output.decoded.address.clone(),
                value: output.value,
                timelock: output.decoded.timelock,
                heightlock,
            })?;
        }

        // 4. Address-tier counters, balances and history.
        batch.apply_address_deltas(&event.tx_id, event.timestamp, &deltas)?;

        // 5. Wallet-tier aggregation over claimed addresses.
        let wallet_deltas = aggregate_by_wallet(&batch, &deltas)?;
        if !wallet_deltas.is_empty() {
            batch.apply_wallet_deltas(&event.tx_id, event.timestamp, &wallet_deltas)?;
        }

        // 6. Release height locks maturing at this block.
        if let (true, Some(height)) = (is_block, event.height) {
            release_matured(&batch, height, now)?;
        }

        batch.record_projected(&event.tx_id, event.height)?;
        batch.commit()?;
        info!(tx_id = %event.tx_id, height = ?event.height, is_block, "projected transaction event");
        Ok(())
    }
}

fn compute_deltas(event: &TxEvent, now: u32, is_block: bool) -> AddressDeltaMap {
    let mut deltas = AddressDeltaMap::new();
    for input in &event.inputs {
        // Spends always come out of the unlocked bucket: a locked UTXO is
        // unspendable by construction.
        accumulate(
            &mut deltas,
            &input.decoded.address,
            &input.token,
            BalanceDelta { unlocked: -(input.value as i64), locked: 0 },
        );
    }
    for output in &event.outputs {
        let value = output.value as i64;
        let delta = match locks::classify(output, now, is_block) {
            LockClass::Unlocked => BalanceDelta { unlocked: value, locked: 0 },
            LockClass::Locked => BalanceDelta { unlocked: 0, locked: value },
        };
        accumulate(&mut deltas, &output.decoded.address, &output.token, delta);
    }
    deltas
}

/// Sum the address deltas of already-claimed addresses per wallet.
fn aggregate_by_wallet(
    batch: &LedgerBatch,
    deltas: &AddressDeltaMap,
) -> Result<WalletDeltaMap, ProjectError> {
    let claims = batch.wallet_claims(deltas.keys().map(String::as_str))?;
    let mut wallet_deltas = WalletDeltaMap::new();
    for (address, tokens) in deltas {
        if let Some(wallet_id) = claims.get(address) {
            for (token_id, delta) in tokens {
                accumulate(&mut wallet_deltas, wallet_id, token_id, *delta);
            }
        }
    }
    Ok(wallet_deltas)
}

fn release_matured(batch: &LedgerBatch, height: u32, now: u32) -> Result<(), ProjectError> {
    let matured = batch.utxos_maturing_at(height, now)?;
    if matured.is_empty() {
        return Ok(());
    }
    let releases = locks::release_deltas(&matured);
    batch.apply_address_unlock(&releases)?;
    let wallet_releases = aggregate_by_wallet(batch, &releases)?;
    if !wallet_releases.is_empty() {
        batch.apply_wallet_unlock(&wallet_releases)?;
    }
    batch.clear_heightlock_entries(height, &matured)?;
    debug!(height, released = matured.len(), "released matured height locks");
    Ok(())
}

fn validate_values(event: &TxEvent) -> Result<(), ProjectError> {
    let oversized = event
        .inputs
        .iter()
        .map(|input| input.value)
        .chain(event.outputs.iter().map(|output| output.value))
        .any(|value| value > i64::MAX as u64);
    if oversized {
        return Err(ProjectError::InconsistentChain(format!(
            "transaction {} carries a value beyond the signed range",
            event.tx_id
        )));
    }
    Ok(())
}
