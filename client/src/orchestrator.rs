//! Drives escrow contracts through the signing service and the ledger.
//!
//! Every operation holds the contract's lock from the state check until the
//! resulting event is applied, so two concurrent finishes on one contract
//! cannot both reach the signing service.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use xescrow_core::{
    BundleOrigin, ConditionEngine, ContractStore, EscrowConfig, EscrowContract, EscrowError,
    EscrowEvent, EscrowReference, EscrowRequest, EscrowSnapshot, PendingStage, Result,
    Transaction, TransactionBuilder,
};

use crate::error::ClientError;
use crate::ledger::LedgerClient;
use crate::signer::{
    CancelOutcome, SignedResponse, SigningOptions, SigningRequestRef, SigningRequestStatus,
    SigningService,
};

/// Stand-in request id for dry-running an event before the real id exists.
const DRY_RUN_REQUEST: &str = "dry-run";

/// Source of "now" for every state transition.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Upper bound on any single signing-service or ledger call.
    pub call_timeout: Duration,
    /// How long a signing request may stay unanswered.
    pub signing_window: chrono::Duration,
    /// Grace after `finish_after` before an unsettled escrow is expired.
    pub expiry_grace: chrono::Duration,
}

impl From<&EscrowConfig> for OrchestratorSettings {
    fn from(config: &EscrowConfig) -> Self {
        Self {
            call_timeout: config.signing_timeout(),
            signing_window: config.signing_window(),
            expiry_grace: config.expiry_grace(),
        }
    }
}

pub struct Orchestrator {
    store: Arc<ContractStore>,
    engine: ConditionEngine,
    builder: TransactionBuilder,
    signer: Arc<dyn SigningService>,
    ledger: Arc<dyn LedgerClient>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        config: &EscrowConfig,
        engine: ConditionEngine,
        signer: Arc<dyn SigningService>,
        ledger: Arc<dyn LedgerClient>,
        store: Arc<ContractStore>,
    ) -> Self {
        Self {
            store,
            engine,
            builder: TransactionBuilder::new(config.max_amount),
            signer,
            ledger,
            clock: Arc::new(SystemClock),
            settings: config.into(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<ContractStore> {
        &self.store
    }

    /// Mints a condition, validates `request` into an EscrowCreate and stores
    /// a new contract in `created`. Nothing leaves the process.
    ///
    /// # Errors
    ///
    /// Address and parameter errors from the builder; `CryptoUnavailable`
    /// when no condition can be minted for this environment.
    #[instrument(skip_all, fields(booking_id = %request.booking_id))]
    pub async fn prepare_escrow(&self, request: &EscrowRequest) -> Result<Uuid> {
        let bundle = self.engine.safe_generate()?;
        let tx = self.builder.escrow_create(request, &bundle.condition)?;
        let contract = EscrowContract::new(
            &tx,
            bundle,
            &request.booking_id,
            request.purpose.clone(),
            self.clock.now(),
        );
        let id = self.store.insert(contract).await;
        info!(%id, "Escrow contract created");
        Ok(id)
    }

    /// Pins the payer's sequence and hands the EscrowCreate to the signing
    /// service. Safe to call again while the contract is still `created`.
    ///
    /// # Errors
    ///
    /// `SigningServiceUnavailable`/`SigningTimeout` leave the contract in
    /// `created`; the caller decides whether to retry.
    #[instrument(skip(self))]
    pub async fn submit_escrow_create(&self, id: &Uuid) -> Result<SigningRequestRef> {
        let mut contract = self.store.lock(id).await?;
        let dry_run = EscrowEvent::SigningAccepted {
            request_id: DRY_RUN_REQUEST.into(),
        };
        contract.can_apply(&dry_run, self.clock.now())?;
        if contract.origin == BundleOrigin::Mock && self.engine.environment().is_production() {
            return Err(EscrowError::CryptoUnavailable(
                "refusing to submit a mock condition in production".into(),
            ));
        }

        let sequence = self
            .call("account_info", self.ledger.account_sequence(&contract.from))
            .await?;
        contract.record_sequence(sequence)?;

        let tx = Transaction::from(contract.escrow_create()?);
        let instruction = format!("Escrow for booking {}", contract.booking_id);
        let reference = self.submit(&tx, instruction).await?;

        contract.apply(
            EscrowEvent::SigningAccepted {
                request_id: reference.request_id.clone(),
            },
            self.clock.now(),
        )?;
        info!(request_id = %reference.request_id, sequence, "EscrowCreate sent for signing");
        Ok(reference)
    }

    /// Asks the signing service about the contract's outstanding request and
    /// applies at most one resulting event.
    ///
    /// Idempotent: with nothing outstanding, or nothing new to report, the
    /// contract is returned unchanged.
    ///
    /// # Errors
    ///
    /// `SigningTimeout` when the request outlived the signing window. The
    /// contract is moved on as for an expiry only once the provider confirms
    /// the withdrawal; otherwise it stays pending on the same request.
    #[instrument(skip(self))]
    pub async fn poll_signing_status(&self, id: &Uuid) -> Result<EscrowSnapshot> {
        let mut contract = self.store.lock(id).await?;
        let Some(stage) = contract.status.stage().cloned() else {
            return Ok(contract.snapshot());
        };
        let Some(request_id) = stage.request_id().map(str::to_owned) else {
            return Ok(contract.snapshot());
        };

        let status = self
            .call(
                "get_signing_request_status",
                self.signer.get_signing_request_status(&request_id),
            )
            .await?;
        let now = self.clock.now();
        let answered = status.signed;

        let event = match Self::event_for(&contract, &stage, status)? {
            Some(event) => event,
            None if !answered && now - contract.status.since() >= self.settings.signing_window => {
                // The holder can still sign a request the provider kept open.
                match self.withdraw(&request_id).await {
                    Ok(outcome) if outcome.cancelled => {
                        contract.apply(EscrowEvent::SigningExpired, now)?;
                        warn!(%request_id, state = contract.status.label(), "Signing request timed out");
                    }
                    Ok(outcome) => {
                        warn!(%request_id, reason = %outcome.reason, "Timed out request still open at the provider")
                    }
                    Err(e) => {
                        warn!(%request_id, error = %e, "Could not withdraw timed out request")
                    }
                }
                return Err(EscrowError::SigningTimeout(format!(
                    "request {request_id} unanswered after {} minutes",
                    self.settings.signing_window.num_minutes()
                )));
            }
            None => {
                debug!(%request_id, "Signing request still open");
                return Ok(contract.snapshot());
            }
        };

        let label = event.label();
        contract.apply(event, now)?;
        info!(%request_id, event = label, state = contract.status.label(), "Signing outcome applied");
        Ok(contract.snapshot())
    }

    /// Maps a provider status onto the event it means for `stage`, if any.
    fn event_for(
        contract: &EscrowContract,
        stage: &PendingStage,
        status: SigningRequestStatus,
    ) -> Result<Option<EscrowEvent>> {
        if status.signed {
            return match status.response {
                Some(response) => Self::settled(contract, stage, response),
                None => Ok(None),
            };
        }
        if status.rejected {
            return Ok(Some(EscrowEvent::SigningRejected {
                reason: "signing request declined".into(),
            }));
        }
        if status.expired {
            return Ok(Some(EscrowEvent::SigningExpired));
        }
        Ok(None)
    }

    fn settled(
        contract: &EscrowContract,
        stage: &PendingStage,
        response: SignedResponse,
    ) -> Result<Option<EscrowEvent>> {
        let creating = matches!(stage, PendingStage::AwaitingCreate { .. });
        if creating && !response.account.is_empty() && response.account != contract.from.as_str()
        {
            return Err(EscrowError::InvalidEscrowReference(format!(
                "EscrowCreate signed by {}, expected {}",
                response.account, contract.from
            )));
        }

        let Some(code) = response.dispatched_result.as_deref() else {
            // signed, not yet validated
            return Ok(None);
        };
        let event = match (creating, response.is_success()) {
            (true, true) => EscrowEvent::CreateValidated {
                tx_hash: response.tx_hash,
            },
            (false, true) => EscrowEvent::SettlementValidated {
                tx_hash: response.tx_hash,
            },
            (true, false) => EscrowEvent::SigningRejected {
                reason: format!("EscrowCreate failed: {code}"),
            },
            (false, false) => EscrowEvent::SettlementFailed {
                reason: code.to_string(),
            },
        };
        Ok(Some(event))
    }

    /// Hands an EscrowFinish carrying the stored fulfillment to the signing service.
    ///
    /// When `expected` is given it must address this contract's escrow.
    #[instrument(skip(self))]
    pub async fn start_escrow_finish(
        &self,
        id: &Uuid,
        expected: Option<&EscrowReference>,
    ) -> Result<SigningRequestRef> {
        let mut contract = self.store.lock(id).await?;
        let dry_run = EscrowEvent::FinishRequested {
            request_id: DRY_RUN_REQUEST.into(),
        };
        contract.can_apply(&dry_run, self.clock.now())?;
        if let Some(expected) = expected {
            contract.check_reference(expected)?;
        }

        let reference = contract.escrow_reference()?;
        let tx = self.builder.escrow_finish(
            reference.owner.as_str(),
            reference.sequence,
            &contract.condition.to_string(),
            &contract.fulfillment().to_string(),
        )?;
        let instruction = format!("Release escrow for booking {}", contract.booking_id);
        let request = self.submit(&Transaction::from(tx), instruction).await?;

        contract.apply(
            EscrowEvent::FinishRequested {
                request_id: request.request_id.clone(),
            },
            self.clock.now(),
        )?;
        info!(request_id = %request.request_id, "EscrowFinish sent for signing");
        Ok(request)
    }

    /// Hands an EscrowCancel to the signing service once `cancel_after` has passed.
    #[instrument(skip(self))]
    pub async fn start_escrow_cancel(
        &self,
        id: &Uuid,
        reason: &str,
        expected: Option<&EscrowReference>,
    ) -> Result<SigningRequestRef> {
        let mut contract = self.store.lock(id).await?;
        let dry_run = EscrowEvent::CancelRequested {
            request_id: DRY_RUN_REQUEST.into(),
            reason: reason.to_string(),
        };
        contract.can_apply(&dry_run, self.clock.now())?;
        if let Some(expected) = expected {
            contract.check_reference(expected)?;
        }

        let reference = contract.escrow_reference()?;
        let tx = self
            .builder
            .escrow_cancel(reference.owner.as_str(), reference.sequence)?;
        let instruction = format!("Cancel escrow for booking {}", contract.booking_id);
        let request = self.submit(&Transaction::from(tx), instruction).await?;

        contract.apply(
            EscrowEvent::CancelRequested {
                request_id: request.request_id.clone(),
                reason: reason.to_string(),
            },
            self.clock.now(),
        )?;
        info!(request_id = %request.request_id, "EscrowCancel sent for signing");
        Ok(request)
    }

    /// Drops a contract that was never submitted.
    #[instrument(skip(self))]
    pub async fn abort(&self, id: &Uuid, reason: &str) -> Result<EscrowSnapshot> {
        let mut contract = self.store.lock(id).await?;
        contract.apply(
            EscrowEvent::Abort {
                reason: reason.to_string(),
            },
            self.clock.now(),
        )?;
        info!("Escrow aborted");
        Ok(contract.snapshot())
    }

    /// Marks every live escrow whose `finish_after` plus the grace period has
    /// passed as expired. Returns the ids that changed.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self) -> Vec<Uuid> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        for id in self.store.ids().await {
            let Ok(mut contract) = self.store.lock(&id).await else {
                continue;
            };
            let stale = contract.status.stage() == Some(&PendingStage::Escrowed)
                && contract
                    .finish_after
                    .is_some_and(|at| at + self.settings.expiry_grace <= now);
            if stale && contract.apply(EscrowEvent::WindowElapsed, now).is_ok() {
                info!(%id, "Escrow expired");
                expired.push(id);
            }
        }
        expired
    }

    pub async fn get_escrow_status(&self, id: &Uuid) -> Result<EscrowSnapshot> {
        self.store.snapshot(id).await
    }

    async fn submit(&self, tx: &Transaction, instruction: String) -> Result<SigningRequestRef> {
        let json = tx.to_json().map_err(|e| {
            EscrowError::SigningServiceUnavailable(format!("encoding {}: {e}", tx.kind()))
        })?;
        let options = SigningOptions {
            expire_minutes: u32::try_from(self.settings.signing_window.num_minutes())
                .unwrap_or(u32::MAX)
                .max(1),
            instruction: Some(instruction),
        };
        self.call(
            "create_signing_request",
            self.signer.create_signing_request(&json, &options),
        )
        .await
    }

    async fn withdraw(&self, request_id: &str) -> Result<CancelOutcome> {
        let outcome = self
            .call(
                "cancel_signing_request",
                self.signer.cancel_signing_request(request_id),
            )
            .await?;
        debug!(request_id, cancelled = outcome.cancelled, reason = %outcome.reason, "Withdrawal answered");
        Ok(outcome)
    }

    /// Bounds a remote call by the configured timeout and folds its failure
    /// into the escrow error taxonomy.
    async fn call<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = crate::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.settings.call_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ClientError::Escrow(e))) => Err(e),
            Ok(Err(e)) => {
                warn!(operation, error = %e, "Remote call failed");
                Err(EscrowError::SigningServiceUnavailable(format!(
                    "{operation}: {e}"
                )))
            }
            Err(_) => {
                warn!(operation, timeout = ?self.settings.call_timeout, "Remote call timed out");
                Err(EscrowError::SigningTimeout(format!(
                    "{operation} did not answer within {:?}",
                    self.settings.call_timeout
                )))
            }
        }
    }
}
