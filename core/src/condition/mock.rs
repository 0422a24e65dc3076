//! Deterministic condition bundles for environments without a hash-lock
//! provider. NOT FOR PRODUCTION USE: anyone who knows the seed can derive
//! every fulfillment.

use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use super::preimage::{Fulfillment, Preimage, PREIMAGE_LEN};
use super::{BundleOrigin, ConditionBundle};

/// Leading bytes of every mock preimage.
pub const MOCK_MARKER: &[u8; 4] = b"MOCK";

const DOMAIN: &[u8] = b"xescrow-mock-preimage";

/// Mock generator: preimage `n` is `MOCK || SHA-256(domain || seed || n)[..28]`.
#[derive(Debug, Default)]
pub struct MockConditions {
    seed: u64,
    counter: AtomicU64,
}

impl MockConditions {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            counter: AtomicU64::new(0),
        }
    }

    /// Produces the next bundle in the sequence.
    pub fn next_bundle(&self) -> ConditionBundle {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let digest = Sha256::new()
            .chain_update(DOMAIN)
            .chain_update(self.seed.to_le_bytes())
            .chain_update(n.to_le_bytes())
            .finalize();

        let mut bytes = [0u8; PREIMAGE_LEN];
        bytes[..MOCK_MARKER.len()].copy_from_slice(MOCK_MARKER);
        bytes[MOCK_MARKER.len()..].copy_from_slice(&digest[..PREIMAGE_LEN - MOCK_MARKER.len()]);

        let preimage = Preimage::new(bytes);
        let fulfillment = Fulfillment::new(preimage.clone());
        ConditionBundle {
            condition: fulfillment.condition(),
            fulfillment,
            preimage,
            origin: BundleOrigin::Mock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_per_seed() {
        let a = MockConditions::new(7);
        let b = MockConditions::new(7);
        assert_eq!(a.next_bundle().condition, b.next_bundle().condition);
        // but never repeats within one generator
        assert_ne!(a.next_bundle().condition, a.next_bundle().condition);
    }

    #[test]
    fn structurally_tagged() {
        let bundle = MockConditions::new(1).next_bundle();
        assert_eq!(bundle.origin, BundleOrigin::Mock);
        assert!(bundle.preimage.is_mock());
        assert_eq!(&bundle.preimage.as_bytes()[..4], b"MOCK");
        assert!(bundle.condition.verify(&bundle.fulfillment).is_ok());
    }
}
