use thiserror::Error;
use uuid::Uuid;

/// Escrow-related errors.
#[derive(Debug, Error, PartialEq)]
pub enum EscrowError {
    /// A ledger address failed the format check.
    #[error("invalid address `{address}`: {reason}")]
    InvalidAddress {
        address: String,
        reason: AddressError,
    },

    /// One or more escrow parameters are invalid. Every violated field is listed.
    #[error("invalid escrow params: {}", render_fields(.0))]
    InvalidEscrowParams(Vec<FieldError>),

    /// The hash-lock primitive (or its entropy source) cannot be used.
    #[error("hash-lock primitive unavailable: {0}")]
    CryptoUnavailable(String),

    /// The external signing service could not be reached.
    #[error("signing service unavailable: {0}")]
    SigningServiceUnavailable(String),

    /// A signing request went unanswered past its window.
    #[error("signing request timed out: {0}")]
    SigningTimeout(String),

    /// Attempted a transition the contract's current state does not allow.
    #[error("invalid state transition from `{from}` on `{event}`: {reason}")]
    InvalidStateTransition {
        from: &'static str,
        event: &'static str,
        reason: String,
    },

    /// `OfferSequence`/owner does not address the escrow the contract created.
    #[error("invalid escrow reference: {0}")]
    InvalidEscrowReference(String),

    #[error("escrow contract {0} not found")]
    ContractNotFound(Uuid),

    #[error("condition error: {0}")]
    Condition(#[from] ConditionError),
}

impl EscrowError {
    /// Only signing-service failures may be retried, and only by the caller.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::SigningServiceUnavailable(_) | Self::SigningTimeout(_)
        )
    }

    /// Stable machine-readable name of the error category.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidAddress { .. } => "InvalidAddress",
            Self::InvalidEscrowParams(_) => "InvalidEscrowParams",
            Self::CryptoUnavailable(_) => "CryptoUnavailable",
            Self::SigningServiceUnavailable(_) => "SigningServiceUnavailable",
            Self::SigningTimeout(_) => "SigningTimeout",
            Self::InvalidStateTransition { .. } => "InvalidStateTransition",
            Self::InvalidEscrowReference(_) => "InvalidEscrowReference",
            Self::ContractNotFound(_) => "ContractNotFound",
            Self::Condition(_) => "Condition",
        }
    }

    /// Names of the fields rejected by an [`EscrowError::InvalidEscrowParams`].
    pub fn invalid_fields(&self) -> Vec<&'static str> {
        match self {
            Self::InvalidEscrowParams(fields) => fields.iter().map(|f| f.field).collect(),
            _ => Vec::new(),
        }
    }
}

/// A single rejected field, named as it appears on the ledger-facing form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn render_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors while checking a classic ledger address.
#[derive(Debug, Error, PartialEq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address must start with `r`")]
    Prefix,

    #[error("address length {0} is outside 25..=35")]
    Length(usize),

    #[error("invalid base58check: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("decoded payload has {0} bytes, expected 21")]
    Payload(usize),
}

/// Errors from parsing or verifying hash-lock conditions and fulfillments.
#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("malformed {kind}: {reason}")]
    Malformed { kind: &'static str, reason: String },

    /// SHA-256 of the fulfillment's preimage does not match the condition.
    #[error("fulfillment does not satisfy condition")]
    Mismatch,
}

impl ConditionError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Errors while parsing an escrow amount.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("`{0}` is not a decimal number")]
    NotANumber(String),

    #[error("amount must be greater than zero")]
    NonPositive,

    #[error("amount has more than {0} fractional digits")]
    TooPrecise(u32),

    #[error("amount exceeds the configured ceiling of {0}")]
    AboveCeiling(String),

    #[error("amount does not fit in drops")]
    Overflow,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_error_lists_every_field() {
        let err = EscrowError::InvalidEscrowParams(vec![
            FieldError::new("amount", "amount must be greater than zero"),
            FieldError::new("cancelAfter", "must be later than finishAfter"),
        ]);
        assert_eq!(err.invalid_fields(), vec!["amount", "cancelAfter"]);
        assert_eq!(
            err.to_string(),
            "invalid escrow params: amount: amount must be greater than zero; \
             cancelAfter: must be later than finishAfter"
        );
    }

    #[test]
    fn only_signing_failures_are_retriable() {
        assert!(EscrowError::SigningTimeout("req".into()).is_retriable());
        assert!(EscrowError::SigningServiceUnavailable("down".into()).is_retriable());
        assert!(!EscrowError::CryptoUnavailable("no rng".into()).is_retriable());
        assert!(!EscrowError::InvalidEscrowParams(vec![]).is_retriable());
    }
}
