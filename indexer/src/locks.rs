//! Per-output lock policy.
//!
//! Decides which balance bucket an output value is credited to, and builds
//! the deltas that move matured height-locked value back to `unlocked`.

use crate::balance::{accumulate, AddressDeltaMap, BalanceDelta};
use crate::db::codec::UtxoRow;
use crate::event::TxOutput;

/// Bucket an output value lands in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockClass {
    Unlocked,
    Locked,
}

/// Block outputs always mature via their heightlock; regular outputs are
/// locked only while the timelock lies in the future. A timelock equal to
/// `now` releases immediately.
pub fn classify(output: &TxOutput, now: u32, is_block: bool) -> LockClass {
    if is_block {
        return LockClass::Locked;
    }
    match output.decoded.timelock {
        Some(timelock) if timelock > now => LockClass::Locked,
        _ => LockClass::Unlocked,
    }
}

/// Whether a stored UTXO still counts as locked at the given chain position.
pub fn is_locked(utxo: &UtxoRow, chain_height: u32, now: u32) -> bool {
    let height_locked = utxo.heightlock.is_some_and(|height| chain_height < height);
    let time_locked = utxo.timelock.is_some_and(|timelock| now < timelock);
    height_locked || time_locked
}

/// Deltas releasing each UTXO's value from `locked` to `unlocked`. Applied
/// through the unlock paths only: counters and histories stay untouched.
pub fn release_deltas(utxos: &[UtxoRow]) -> AddressDeltaMap {
    let mut map = AddressDeltaMap::new();
    for utxo in utxos {
        let value = utxo.value as i64;
        accumulate(
            &mut map,
            &utxo.address,
            &utxo.token_id,
            BalanceDelta { unlocked: value, locked: -value },
        );
    }
    map
}
