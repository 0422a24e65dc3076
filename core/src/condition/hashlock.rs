use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use super::preimage::{Preimage, PREIMAGE_LEN};
use crate::{EscrowError, Result};

/// Capability to mint hash-lock secrets.
///
/// Injected into [`ConditionEngine`](super::ConditionEngine) at construction;
/// an engine never reaches for a global crypto instance.
pub trait HashlockProvider: Send + Sync + std::fmt::Debug {
    /// Short name, logged when the engine starts.
    fn name(&self) -> &'static str;

    /// Draws a fresh preimage from a cryptographically secure source.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::CryptoUnavailable`] if no secure entropy is available.
    fn random_preimage(&self) -> Result<Preimage>;

    /// SHA-256 fingerprint of `preimage`.
    fn fingerprint(&self, preimage: &[u8]) -> [u8; 32];
}

/// OS entropy and SHA-256.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hashlock;

impl HashlockProvider for Sha256Hashlock {
    fn name(&self) -> &'static str {
        "preimage-sha-256/os-rng"
    }

    fn random_preimage(&self) -> Result<Preimage> {
        let mut bytes = [0u8; PREIMAGE_LEN];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| EscrowError::CryptoUnavailable(e.to_string()))?;
        Ok(Preimage::new(bytes))
    }

    fn fingerprint(&self, preimage: &[u8]) -> [u8; 32] {
        Sha256::digest(preimage).into()
    }
}
