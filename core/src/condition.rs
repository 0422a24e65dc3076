//! Hash-lock condition/fulfillment generation.
//!
//! The [`ConditionEngine`] mints a [`ConditionBundle`] per escrow. How it
//! mints is a [`ConditionStrategy`] chosen once, at construction: either a
//! real [`HashlockProvider`] or the deterministic [`MockConditions`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::interface::Environment;
use crate::{EscrowError, Result};

mod hashlock;
mod mock;
mod preimage;

pub use hashlock::{HashlockProvider, Sha256Hashlock};
pub use mock::{MockConditions, MOCK_MARKER};
pub use preimage::{Condition, Fulfillment, Preimage, PREIMAGE_LEN};

/// Where a bundle came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleOrigin {
    /// Minted from secure entropy.
    Genuine,
    /// Deterministic; must never guard real funds.
    Mock,
}

/// A condition together with the secrets that satisfy it.
///
/// `fulfillment` and `preimage` stay local until the holder releases funds.
#[derive(Debug, Clone)]
pub struct ConditionBundle {
    pub condition: Condition,
    pub fulfillment: Fulfillment,
    pub preimage: Preimage,
    pub origin: BundleOrigin,
}

/// How the engine produces bundles.
#[derive(Debug, Clone)]
pub enum ConditionStrategy {
    Hashlock(Arc<dyn HashlockProvider>),
    Mock,
}

/// Produces condition bundles.
#[derive(Debug)]
pub struct ConditionEngine {
    strategy: ConditionStrategy,
    environment: Environment,
    mock: MockConditions,
}

impl ConditionEngine {
    /// Builds an engine with an explicit strategy.
    ///
    /// # Errors
    ///
    /// A [`ConditionStrategy::Mock`] engine cannot be built for
    /// [`Environment::Production`]; that is reported as
    /// [`EscrowError::CryptoUnavailable`].
    pub fn new(strategy: ConditionStrategy, environment: Environment) -> Result<Self> {
        match &strategy {
            ConditionStrategy::Hashlock(provider) => {
                info!(provider = provider.name(), %environment, "condition engine ready");
            }
            ConditionStrategy::Mock if environment.is_production() => {
                return Err(EscrowError::CryptoUnavailable(
                    "mock conditions are not allowed in production".into(),
                ));
            }
            ConditionStrategy::Mock => {
                warn!(%environment, "condition engine using MOCK conditions");
            }
        }

        Ok(Self {
            strategy,
            environment,
            mock: MockConditions::new(0),
        })
    }

    /// Picks the strategy from configuration: the provider if one is given,
    /// the mock generator otherwise (never in production).
    pub fn from_config(
        environment: Environment,
        provider: Option<Arc<dyn HashlockProvider>>,
    ) -> Result<Self> {
        let strategy = match provider {
            Some(provider) => ConditionStrategy::Hashlock(provider),
            None => ConditionStrategy::Mock,
        };
        Self::new(strategy, environment)
    }

    /// Replaces the mock generator's seed.
    pub fn with_mock_seed(mut self, seed: u64) -> Self {
        self.mock = MockConditions::new(seed);
        self
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn is_mock(&self) -> bool {
        matches!(self.strategy, ConditionStrategy::Mock)
    }

    /// Mints a genuine bundle from the configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::CryptoUnavailable`] if the engine has no provider,
    /// the provider has no entropy, or its fingerprint disagrees with SHA-256.
    pub fn generate(&self) -> Result<ConditionBundle> {
        let ConditionStrategy::Hashlock(provider) = &self.strategy else {
            return Err(EscrowError::CryptoUnavailable(
                "no hash-lock provider configured".into(),
            ));
        };

        let preimage = provider.random_preimage()?;
        let condition = Condition::new(
            provider.fingerprint(preimage.as_bytes()),
            PREIMAGE_LEN as u64,
        );
        let fulfillment = Fulfillment::new(preimage.clone());
        condition.verify(&fulfillment).map_err(|_| {
            EscrowError::CryptoUnavailable(format!(
                "provider `{}` does not compute SHA-256",
                provider.name()
            ))
        })?;

        Ok(ConditionBundle {
            condition,
            fulfillment,
            preimage,
            origin: BundleOrigin::Genuine,
        })
    }

    /// Deterministic, tagged bundle. Never use it where real funds move.
    pub fn generate_mock(&self) -> ConditionBundle {
        self.mock.next_bundle()
    }

    /// Real path first; on [`EscrowError::CryptoUnavailable`] falls back to
    /// the mock generator outside production, logging the downgrade.
    pub fn safe_generate(&self) -> Result<ConditionBundle> {
        match self.generate() {
            Ok(bundle) => Ok(bundle),
            Err(EscrowError::CryptoUnavailable(reason)) if !self.environment.is_production() => {
                warn!(%reason, environment = %self.environment, "falling back to MOCK condition");
                Ok(self.generate_mock())
            }
            Err(e) => Err(e),
        }
    }
}
