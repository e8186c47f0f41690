//! Signed balance deltas accumulated while projecting one transaction.

use std::collections::BTreeMap;

/// Signed (unlocked, locked) delta for one (owner, token) cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BalanceDelta {
    pub unlocked: i64,
    pub locked: i64,
}

impl BalanceDelta {
    /// Net signed effect, the value recorded in history rows.
    pub fn total(&self) -> i64 {
        self.unlocked + self.locked
    }
}

/// token id → delta.
pub type TokenDeltaMap = BTreeMap<String, BalanceDelta>;

/// address → token id → delta.
pub type AddressDeltaMap = BTreeMap<String, TokenDeltaMap>;

/// wallet id → token id → delta.
pub type WalletDeltaMap = BTreeMap<String, TokenDeltaMap>;

/// Accumulate `delta` into `map[owner][token]`.
pub fn accumulate(
    map: &mut BTreeMap<String, TokenDeltaMap>,
    owner: &str,
    token_id: &str,
    delta: BalanceDelta,
) {
    let cell = map
        .entry(owner.to_string())
        .or_default()
        .entry(token_id.to_string())
        .or_default();
    cell.unlocked += delta.unlocked;
    cell.locked += delta.locked;
}
