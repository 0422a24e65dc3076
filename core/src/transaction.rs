//! Ledger escrow transactions and the builders that validate their inputs.
//!
//! Builders are pure: they check addresses first, then every remaining
//! field, and return a transaction ready to hand to a signing service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::address::Address;
use crate::amount::{parse_amount, Drops};
use crate::condition::{Condition, Fulfillment};
use crate::error::FieldError;
use crate::interface::EscrowRequest;
use crate::serde::ledger_time;
use crate::{EscrowError, Result};

/// Unix timestamp of the ledger epoch, 2000-01-01T00:00:00Z.
pub const LEDGER_EPOCH_UNIX: i64 = 946_684_800;

/// Seconds since the ledger epoch, or `None` if `time` is not representable.
pub fn to_ledger_time(time: DateTime<Utc>) -> Option<u32> {
    u32::try_from(time.timestamp() - LEDGER_EPOCH_UNIX).ok()
}

pub fn from_ledger_time(secs: u32) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(i64::from(secs) + LEDGER_EPOCH_UNIX, 0)
}

/// Locks `amount` from `account` until finished with a fulfillment or cancelled.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct EscrowCreate {
    pub account: Address,
    pub destination: Address,
    /// Drops, serialized as a decimal string.
    #[serde_as(as = "DisplayFromStr")]
    pub amount: Drops,
    pub condition: Condition,
    #[serde(with = "ledger_time", default, skip_serializing_if = "Option::is_none")]
    pub finish_after: Option<DateTime<Utc>>,
    #[serde(with = "ledger_time", default, skip_serializing_if = "Option::is_none")]
    pub cancel_after: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_tag: Option<u32>,
    /// Pins the account sequence so the escrow's `OfferSequence` is known up front.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u32>,
}

/// Releases an escrow to its destination.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct EscrowFinish {
    pub account: Address,
    pub owner: Address,
    pub offer_sequence: u32,
    pub condition: Condition,
    pub fulfillment: Fulfillment,
}

/// Returns an expired escrow to its owner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct EscrowCancel {
    pub account: Address,
    pub owner: Address,
    pub offer_sequence: u32,
}

/// Any transaction this crate builds, tagged the way the ledger expects.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "TransactionType")]
pub enum Transaction {
    EscrowCreate(EscrowCreate),
    EscrowFinish(EscrowFinish),
    EscrowCancel(EscrowCancel),
}

impl Transaction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EscrowCreate(_) => "EscrowCreate",
            Self::EscrowFinish(_) => "EscrowFinish",
            Self::EscrowCancel(_) => "EscrowCancel",
        }
    }

    /// JSON form handed to the signing service.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl From<EscrowCreate> for Transaction {
    fn from(tx: EscrowCreate) -> Self {
        Self::EscrowCreate(tx)
    }
}

impl From<EscrowFinish> for Transaction {
    fn from(tx: EscrowFinish) -> Self {
        Self::EscrowFinish(tx)
    }
}

impl From<EscrowCancel> for Transaction {
    fn from(tx: EscrowCancel) -> Self {
        Self::EscrowCancel(tx)
    }
}

/// Ledger escrows are addressed by owner and the owner's sequence at creation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EscrowReference {
    pub owner: Address,
    pub sequence: u32,
}

/// Validating builder for the three escrow transactions.
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    max_amount: Decimal,
}

impl TransactionBuilder {
    /// `max_amount` is the ceiling, in whole units, for any escrow amount.
    pub fn new(max_amount: Decimal) -> Self {
        Self { max_amount }
    }

    /// Builds an `EscrowCreate`.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::InvalidAddress`] for the first malformed address.
    /// - [`EscrowError::InvalidEscrowParams`] listing every other violation.
    pub fn escrow_create(
        &self,
        request: &EscrowRequest,
        condition: &Condition,
    ) -> Result<EscrowCreate> {
        let account = Address::parse(&request.from)?;
        let destination = Address::parse(&request.to)?;

        let mut errors = Vec::new();
        if account == destination {
            errors.push(FieldError::new(
                "to",
                "destination must differ from the source account",
            ));
        }

        let amount = match parse_amount(&request.amount, self.max_amount) {
            Ok((_, drops)) => Some(drops),
            Err(e) => {
                errors.push(FieldError::new("amount", e.to_string()));
                None
            }
        };

        // The ledger keeps whole seconds; compare and store what it will see.
        let mut window = [None, None];
        for (slot, (field, time)) in window.iter_mut().zip([
            ("finishAfter", request.finish_after),
            ("cancelAfter", request.cancel_after),
        ]) {
            if let Some(time) = time {
                *slot = to_ledger_time(time).and_then(from_ledger_time);
                if slot.is_none() {
                    errors.push(FieldError::new(field, "outside the ledger time range"));
                }
            }
        }
        let [finish_after, cancel_after] = window;
        if let (Some(finish), Some(cancel)) = (finish_after, cancel_after) {
            if cancel <= finish {
                errors.push(FieldError::new(
                    "cancelAfter",
                    "must be later than finishAfter",
                ));
            }
        }

        match amount {
            Some(amount) if errors.is_empty() => Ok(EscrowCreate {
                account,
                destination,
                amount,
                condition: condition.clone(),
                finish_after,
                cancel_after,
                destination_tag: request.destination_tag,
                sequence: None,
            }),
            _ => Err(EscrowError::InvalidEscrowParams(errors)),
        }
    }

    /// Builds an `EscrowFinish` submitted by the escrow owner.
    ///
    /// Does not check that `fulfillment` satisfies `condition`; the ledger
    /// does. Both must however be well-formed PREIMAGE-SHA-256 encodings.
    pub fn escrow_finish(
        &self,
        owner: &str,
        sequence: u32,
        condition: &str,
        fulfillment: &str,
    ) -> Result<EscrowFinish> {
        let owner = Address::parse(owner)?;

        let mut errors = Vec::new();
        check_sequence(sequence, &mut errors);
        let condition = condition
            .parse::<Condition>()
            .map_err(|e| errors.push(FieldError::new("condition", e.to_string())))
            .ok();
        let fulfillment = fulfillment
            .parse::<Fulfillment>()
            .map_err(|e| errors.push(FieldError::new("fulfillment", e.to_string())))
            .ok();

        match (condition, fulfillment) {
            (Some(condition), Some(fulfillment)) if errors.is_empty() => Ok(EscrowFinish {
                account: owner.clone(),
                owner,
                offer_sequence: sequence,
                condition,
                fulfillment,
            }),
            _ => Err(EscrowError::InvalidEscrowParams(errors)),
        }
    }

    /// Builds an `EscrowCancel`. Only the ledger's time window authorizes it.
    pub fn escrow_cancel(&self, owner: &str, sequence: u32) -> Result<EscrowCancel> {
        let owner = Address::parse(owner)?;

        let mut errors = Vec::new();
        check_sequence(sequence, &mut errors);
        if !errors.is_empty() {
            return Err(EscrowError::InvalidEscrowParams(errors));
        }

        Ok(EscrowCancel {
            account: owner.clone(),
            owner,
            offer_sequence: sequence,
        })
    }
}

fn check_sequence(sequence: u32, errors: &mut Vec<FieldError>) {
    if sequence == 0 {
        errors.push(FieldError::new(
            "offerSequence",
            "must be a positive account sequence",
        ));
    }
}
