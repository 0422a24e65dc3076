use std::sync::Arc;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;
use xescrow_core::{
    ConditionEngine, ContractStore, EscrowConfig, EscrowError, EscrowReference, EscrowRequest,
    EscrowSnapshot, HashlockProvider, Sha256Hashlock,
};

pub use error::{ClientError, Result};
pub use ledger::{JsonRpcLedger, LedgerClient};
pub use orchestrator::{Clock, Orchestrator, OrchestratorSettings, SystemClock};
pub use signer::{HttpSigningService, SigningRequestRef, SigningService};

pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod signer;

/// What a caller sees when an operation fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeError {
    /// Error category, e.g. `SigningServiceUnavailable`.
    pub kind: &'static str,
    pub message: String,
    /// Whether the same call may succeed if repeated later.
    pub retriable: bool,
    /// Offending fields for `InvalidEscrowParams`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<&'static str>,
}

impl From<&EscrowError> for OutcomeError {
    fn from(e: &EscrowError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            retriable: e.is_retriable(),
            fields: e.invalid_fields(),
        }
    }
}

/// Result of [`EscrowClient::create_escrow`].
///
/// `escrow_contract` is present whenever a contract was allocated, including
/// when submission to the signing service failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEscrowOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escrow_contract: Option<EscrowSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_request_ref: Option<SigningRequestRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

/// Result of an operation that hands a transaction to the signing service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigningOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_request_ref: Option<SigningRequestRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OutcomeError>,
}

impl From<xescrow_core::Result<SigningRequestRef>> for SigningOutcome {
    fn from(result: xescrow_core::Result<SigningRequestRef>) -> Self {
        match result {
            Ok(reference) => Self {
                success: true,
                signing_request_ref: Some(reference),
                error: None,
            },
            Err(e) => Self {
                success: false,
                signing_request_ref: None,
                error: Some(OutcomeError::from(&e)),
            },
        }
    }
}

/// Entry point for booking flows: every operation reports an outcome
/// instead of failing, so "not yet signed" and "failed" stay distinct.
pub struct EscrowClient {
    orchestrator: Orchestrator,
}

impl EscrowClient {
    /// Wires the HTTP signing service, the JSON-RPC ledger and a SHA-256
    /// hash-lock engine from `config`.
    pub fn new(config: &EscrowConfig, store: Arc<ContractStore>) -> Result<Self> {
        let hashlock: Arc<dyn HashlockProvider> = Arc::new(Sha256Hashlock);
        let engine = ConditionEngine::from_config(config.environment, Some(hashlock))?;
        let signer = Arc::new(HttpSigningService::new(&config.signer)?);
        let ledger = Arc::new(JsonRpcLedger::new(&config.ledger)?);
        Ok(Self::with_orchestrator(Orchestrator::new(
            config, engine, signer, ledger, store,
        )))
    }

    pub fn with_orchestrator(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Allocates a contract and submits its EscrowCreate for signing.
    pub async fn create_escrow(&self, request: &EscrowRequest) -> CreateEscrowOutcome {
        let id = match self.orchestrator.prepare_escrow(request).await {
            Ok(id) => id,
            Err(e) => {
                warn!(booking_id = %request.booking_id, error = %e, "Escrow rejected");
                return CreateEscrowOutcome {
                    success: false,
                    escrow_contract: None,
                    signing_request_ref: None,
                    error: Some(OutcomeError::from(&e)),
                };
            }
        };
        self.resubmit_escrow(&id).await
    }

    /// Submits (again) the EscrowCreate of a contract still in `created`.
    pub async fn resubmit_escrow(&self, id: &Uuid) -> CreateEscrowOutcome {
        let submitted = self.orchestrator.submit_escrow_create(id).await;
        let escrow_contract = self.orchestrator.get_escrow_status(id).await.ok();
        match submitted {
            Ok(reference) => CreateEscrowOutcome {
                success: true,
                escrow_contract,
                signing_request_ref: Some(reference),
                error: None,
            },
            Err(e) => CreateEscrowOutcome {
                success: false,
                escrow_contract,
                signing_request_ref: None,
                error: Some(OutcomeError::from(&e)),
            },
        }
    }

    pub async fn finish_escrow(
        &self,
        id: &Uuid,
        expected: Option<&EscrowReference>,
    ) -> SigningOutcome {
        self.orchestrator.start_escrow_finish(id, expected).await.into()
    }

    pub async fn cancel_escrow(
        &self,
        id: &Uuid,
        reason: &str,
        expected: Option<&EscrowReference>,
    ) -> SigningOutcome {
        self.orchestrator
            .start_escrow_cancel(id, reason, expected)
            .await
            .into()
    }

    /// Refreshes a contract from its outstanding signing request.
    pub async fn poll_escrow(&self, id: &Uuid) -> xescrow_core::Result<EscrowSnapshot> {
        self.orchestrator.poll_signing_status(id).await
    }

    pub async fn abort_escrow(
        &self,
        id: &Uuid,
        reason: &str,
    ) -> xescrow_core::Result<EscrowSnapshot> {
        self.orchestrator.abort(id, reason).await
    }

    pub async fn expire_stale(&self) -> Vec<Uuid> {
        self.orchestrator.expire_stale().await
    }

    pub async fn get_escrow_status(&self, id: &Uuid) -> xescrow_core::Result<EscrowSnapshot> {
        self.orchestrator.get_escrow_status(id).await
    }
}
