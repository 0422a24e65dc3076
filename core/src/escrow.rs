//! Escrow contracts and the state machine that guards their lifecycle.
//!
//! ```text
//! created --SigningAccepted--> pending --SettlementValidated--> finished | cancelled
//!    |                            |
//!    +--Abort--> cancelled        +--SigningExpired / WindowElapsed--> expired
//! ```
//!
//! [`EscrowContract::apply`] is the only way to change a contract's status;
//! a rejected event leaves the contract untouched.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::amount::Drops;
use crate::condition::{BundleOrigin, Condition, ConditionBundle, Fulfillment};
use crate::error::FieldError;
use crate::transaction::{EscrowCreate, EscrowReference};
use crate::{EscrowError, Result};

/// Lifecycle of an escrow contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Built locally; nothing sent to the signing service yet.
    Created { at: DateTime<Utc> },
    /// Handed to the signing service, or live on the ledger awaiting settlement.
    Pending {
        stage: PendingStage,
        /// Why the last settlement attempt did not go through, if it didn't.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    Finished { tx_hash: String, at: DateTime<Utc> },
    Cancelled {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tx_hash: Option<String>,
        at: DateTime<Utc>,
    },
    /// Local bookkeeping only; the ledger has no such state.
    Expired { at: DateTime<Utc> },
}

/// Which signing request, if any, a pending contract waits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PendingStage {
    AwaitingCreate { request_id: String },
    /// The escrow is on the ledger and no settlement request is outstanding.
    Escrowed,
    AwaitingFinish { request_id: String },
    AwaitingCancel { request_id: String, reason: String },
}

impl PendingStage {
    /// The outstanding signing request, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Self::AwaitingCreate { request_id }
            | Self::AwaitingFinish { request_id }
            | Self::AwaitingCancel { request_id, .. } => Some(request_id),
            Self::Escrowed => None,
        }
    }
}

impl EscrowStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Pending { .. } => "pending",
            Self::Finished { .. } => "finished",
            Self::Cancelled { .. } => "cancelled",
            Self::Expired { .. } => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished { .. } | Self::Cancelled { .. } | Self::Expired { .. }
        )
    }

    /// When the contract entered this status.
    pub fn since(&self) -> DateTime<Utc> {
        match self {
            Self::Created { at }
            | Self::Pending { at, .. }
            | Self::Finished { at, .. }
            | Self::Cancelled { at, .. }
            | Self::Expired { at } => *at,
        }
    }

    pub fn stage(&self) -> Option<&PendingStage> {
        match self {
            Self::Pending { stage, .. } => Some(stage),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Pending { reason, .. } => reason.as_deref(),
            Self::Cancelled { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Everything that can happen to a contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowEvent {
    /// The signing service accepted the EscrowCreate request.
    SigningAccepted { request_id: String },
    /// The user gave up before anything was submitted.
    Abort { reason: String },
    /// EscrowCreate was signed and validated; the escrow is live.
    CreateValidated { tx_hash: String },
    /// The holder declined the outstanding request, or the ledger refused it
    /// before an escrow existed.
    SigningRejected { reason: String },
    /// The outstanding request lapsed unanswered.
    SigningExpired,
    FinishRequested { request_id: String },
    CancelRequested { request_id: String, reason: String },
    /// The outstanding EscrowFinish/EscrowCancel was signed and validated.
    SettlementValidated { tx_hash: String },
    /// The ledger refused the outstanding EscrowFinish/EscrowCancel.
    SettlementFailed { reason: String },
    /// `finish_after` passed without settlement.
    WindowElapsed,
}

impl EscrowEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::SigningAccepted { .. } => "signing_accepted",
            Self::Abort { .. } => "abort",
            Self::CreateValidated { .. } => "create_validated",
            Self::SigningRejected { .. } => "signing_rejected",
            Self::SigningExpired => "signing_expired",
            Self::FinishRequested { .. } => "finish_requested",
            Self::CancelRequested { .. } => "cancel_requested",
            Self::SettlementValidated { .. } => "settlement_validated",
            Self::SettlementFailed { .. } => "settlement_failed",
            Self::WindowElapsed => "window_elapsed",
        }
    }
}

/// One conditional payment between a payer and a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowContract {
    /// Local identifier, not the ledger's.
    pub id: Uuid,
    pub from: Address,
    pub to: Address,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub condition: Condition,
    /// Secret until finish time; never part of a snapshot.
    fulfillment: Fulfillment,
    pub origin: BundleOrigin,
    /// Payer's account sequence used by the EscrowCreate.
    pub sequence: Option<u32>,
    pub create_tx_hash: Option<String>,
    pub booking_id: String,
    pub purpose: Option<String>,
    pub destination_tag: Option<u32>,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub finish_after: Option<DateTime<Utc>>,
    pub cancel_after: Option<DateTime<Utc>>,
}

impl EscrowContract {
    /// A new contract in `created`, bound to an already validated EscrowCreate.
    pub fn new(
        tx: &EscrowCreate,
        bundle: ConditionBundle,
        booking_id: impl Into<String>,
        purpose: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: tx.account.clone(),
            to: tx.destination.clone(),
            amount: tx.amount.to_xrp(),
            condition: bundle.condition,
            fulfillment: bundle.fulfillment,
            origin: bundle.origin,
            sequence: tx.sequence,
            create_tx_hash: None,
            booking_id: booking_id.into(),
            purpose,
            destination_tag: tx.destination_tag,
            status: EscrowStatus::Created { at: now },
            created_at: now,
            finish_after: tx.finish_after,
            cancel_after: tx.cancel_after,
        }
    }

    pub fn fulfillment(&self) -> &Fulfillment {
        &self.fulfillment
    }

    /// Records the payer sequence the EscrowCreate is pinned to.
    ///
    /// # Errors
    ///
    /// Only allowed while `created`; the sequence is what addresses the escrow.
    pub fn record_sequence(&mut self, sequence: u32) -> Result<()> {
        if !matches!(self.status, EscrowStatus::Created { .. }) {
            return Err(EscrowError::InvalidEscrowReference(format!(
                "sequence is fixed once a contract is {}",
                self.status.label()
            )));
        }
        self.sequence = Some(sequence);
        Ok(())
    }

    /// The EscrowCreate this contract stands for, pinned to its recorded sequence.
    pub fn escrow_create(&self) -> Result<EscrowCreate> {
        let amount = Drops::from_xrp(self.amount).map_err(|e| {
            EscrowError::InvalidEscrowParams(vec![FieldError::new("amount", e.to_string())])
        })?;
        Ok(EscrowCreate {
            account: self.from.clone(),
            destination: self.to.clone(),
            amount,
            condition: self.condition.clone(),
            finish_after: self.finish_after,
            cancel_after: self.cancel_after,
            destination_tag: self.destination_tag,
            sequence: self.sequence,
        })
    }

    /// Owner and sequence that address this escrow on the ledger.
    pub fn escrow_reference(&self) -> Result<EscrowReference> {
        let sequence = self.sequence.ok_or_else(|| {
            EscrowError::InvalidEscrowReference(format!("contract {} has no sequence", self.id))
        })?;
        Ok(EscrowReference {
            owner: self.from.clone(),
            sequence,
        })
    }

    /// Fails fast when `reference` does not address this contract's escrow.
    pub fn check_reference(&self, reference: &EscrowReference) -> Result<()> {
        let own = self.escrow_reference()?;
        if own != *reference {
            return Err(EscrowError::InvalidEscrowReference(format!(
                "contract {} is escrow {}:{}, not {}:{}",
                self.id, own.owner, own.sequence, reference.owner, reference.sequence
            )));
        }
        Ok(())
    }

    /// Applies `event` at time `now`.
    ///
    /// # Errors
    ///
    /// [`EscrowError::InvalidStateTransition`] if the event is not allowed from
    /// the current status; the contract is left as it was.
    pub fn apply(&mut self, event: EscrowEvent, now: DateTime<Utc>) -> Result<&EscrowStatus> {
        let next = self.next_status(&event, now)?;
        if let EscrowEvent::CreateValidated { tx_hash } = event {
            self.create_tx_hash = Some(tx_hash);
        }
        self.status = next;
        Ok(&self.status)
    }

    /// Checks whether `event` would be accepted at `now`, without applying it.
    pub fn can_apply(&self, event: &EscrowEvent, now: DateTime<Utc>) -> Result<()> {
        self.next_status(event, now).map(|_| ())
    }

    fn next_status(&self, event: &EscrowEvent, now: DateTime<Utc>) -> Result<EscrowStatus> {
        use EscrowEvent as E;
        use PendingStage as S;

        let reject = |reason: &str| EscrowError::InvalidStateTransition {
            from: self.status.label(),
            event: event.label(),
            reason: reason.to_string(),
        };
        let pending = |stage: PendingStage, reason: Option<String>| EscrowStatus::Pending {
            stage,
            reason,
            at: now,
        };

        if self.status.is_terminal() {
            return Err(reject("contract already settled"));
        }

        let stage = self.status.stage();
        let next = match (stage, event) {
            // created
            (None, E::SigningAccepted { request_id }) => {
                if request_id.is_empty() {
                    return Err(reject("signing request id missing"));
                }
                pending(
                    S::AwaitingCreate {
                        request_id: request_id.clone(),
                    },
                    None,
                )
            }
            (None, E::Abort { reason }) => EscrowStatus::Cancelled {
                reason: reason.clone(),
                tx_hash: None,
                at: now,
            },

            // pending: EscrowCreate outstanding
            (Some(S::AwaitingCreate { .. }), E::CreateValidated { .. }) => {
                pending(S::Escrowed, None)
            }
            (Some(S::AwaitingCreate { .. }), E::SigningRejected { reason }) => {
                EscrowStatus::Cancelled {
                    reason: reason.clone(),
                    tx_hash: None,
                    at: now,
                }
            }
            (Some(S::AwaitingCreate { .. }), E::SigningExpired) => EscrowStatus::Expired { at: now },

            // pending: live on the ledger
            (Some(S::Escrowed), E::FinishRequested { request_id }) => {
                if let Some(finish_after) = self.finish_after {
                    if now < finish_after {
                        return Err(reject("finish_after has not passed"));
                    }
                }
                pending(
                    S::AwaitingFinish {
                        request_id: request_id.clone(),
                    },
                    None,
                )
            }
            (Some(S::Escrowed), E::CancelRequested { request_id, reason }) => {
                match self.cancel_after {
                    Some(cancel_after) if now >= cancel_after => {}
                    Some(_) => return Err(reject("cancel_after has not passed")),
                    None => return Err(reject("escrow has no cancel_after")),
                }
                pending(
                    S::AwaitingCancel {
                        request_id: request_id.clone(),
                        reason: reason.clone(),
                    },
                    None,
                )
            }
            (Some(S::Escrowed), E::WindowElapsed) => match self.finish_after {
                Some(finish_after) if now >= finish_after => EscrowStatus::Expired { at: now },
                _ => return Err(reject("finish window still open")),
            },

            // pending: settlement outstanding
            (Some(S::AwaitingFinish { .. }), E::SettlementValidated { tx_hash }) => {
                if self.condition.verify(&self.fulfillment).is_err() {
                    return Err(reject("stored fulfillment does not match condition"));
                }
                EscrowStatus::Finished {
                    tx_hash: tx_hash.clone(),
                    at: now,
                }
            }
            (Some(S::AwaitingCancel { reason, .. }), E::SettlementValidated { tx_hash }) => {
                EscrowStatus::Cancelled {
                    reason: reason.clone(),
                    tx_hash: Some(tx_hash.clone()),
                    at: now,
                }
            }
            (
                Some(S::AwaitingFinish { .. } | S::AwaitingCancel { .. }),
                E::SettlementFailed { reason } | E::SigningRejected { reason },
            ) => pending(S::Escrowed, Some(reason.clone())),
            (Some(S::AwaitingFinish { .. } | S::AwaitingCancel { .. }), E::SigningExpired) => {
                pending(S::Escrowed, Some("signing request expired".into()))
            }

            _ => return Err(reject("event not allowed in this state")),
        };
        Ok(next)
    }

    /// Read-only view without the fulfillment.
    pub fn snapshot(&self) -> EscrowSnapshot {
        EscrowSnapshot {
            id: self.id,
            from: self.from.clone(),
            to: self.to.clone(),
            amount: self.amount,
            condition: self.condition.clone(),
            origin: self.origin,
            sequence: self.sequence,
            create_tx_hash: self.create_tx_hash.clone(),
            booking_id: self.booking_id.clone(),
            purpose: self.purpose.clone(),
            destination_tag: self.destination_tag,
            status: self.status.clone(),
            created_at: self.created_at,
            finish_after: self.finish_after,
            cancel_after: self.cancel_after,
        }
    }
}

/// What callers get back from a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowSnapshot {
    pub id: Uuid,
    pub from: Address,
    pub to: Address,
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub condition: Condition,
    pub origin: BundleOrigin,
    pub sequence: Option<u32>,
    pub create_tx_hash: Option<String>,
    pub booking_id: String,
    pub purpose: Option<String>,
    pub destination_tag: Option<u32>,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub finish_after: Option<DateTime<Utc>>,
    pub cancel_after: Option<DateTime<Utc>>,
}
