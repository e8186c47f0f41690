//! Deterministic address derivation from an extended public key.
//!
//! The key-derivation collaborator is a trait so that deployments can plug
//! their chain's real BIP-32 stack; the bundled deriver hashes the xpubkey
//! together with the index, yielding the hex address encoding the rest of
//! the system expects.

use thiserror::Error;

/// Derivation position of an address inside a wallet's sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DerivedAddress {
    pub address: String,
    pub index: u32,
}

#[derive(Debug, Error)]
pub enum DeriveError {
    #[error("invalid xpubkey: {0}")]
    InvalidXpubkey(String),
}

/// Collaborator-supplied key derivation: `derive(xpub, start, count)`.
pub trait AddressDeriver: Send + Sync {
    /// Cheap structural validation, run before a wallet row is created.
    fn validate(&self, xpubkey: &str) -> Result<(), DeriveError>;

    /// Derive `count` consecutive addresses starting at `start`.
    fn derive(
        &self,
        xpubkey: &str,
        start: u32,
        count: u32,
    ) -> Result<Vec<DerivedAddress>, DeriveError>;
}

/// Hash-chain deriver: addresses are hex digests of (xpubkey, index).
pub struct HashDeriver;

impl HashDeriver {
    fn derive_one(xpubkey: &str, index: u32) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(xpubkey.as_bytes());
        hasher.update(&index.to_be_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }
}

impl AddressDeriver for HashDeriver {
    fn validate(&self, xpubkey: &str) -> Result<(), DeriveError> {
        if xpubkey.is_empty() {
            return Err(DeriveError::InvalidXpubkey("empty key".to_string()));
        }
        if !xpubkey.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DeriveError::InvalidXpubkey(
                "non-alphanumeric characters".to_string(),
            ));
        }
        Ok(())
    }

    fn derive(
        &self,
        xpubkey: &str,
        start: u32,
        count: u32,
    ) -> Result<Vec<DerivedAddress>, DeriveError> {
        self.validate(xpubkey)?;
        Ok((start..start.saturating_add(count))
            .map(|index| DerivedAddress {
                address: Self::derive_one(xpubkey, index),
                index,
            })
            .collect())
    }
}

/// Stable wallet identity derived from the xpubkey; a second registration of
/// the same key lands on the same id.
pub fn wallet_id(xpubkey: &str) -> String {
    hex::encode(blake3::hash(xpubkey.as_bytes()).as_bytes())
}
