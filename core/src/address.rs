//! Classic ledger account addresses.

use serde::{Deserialize, Serialize};

use crate::error::AddressError;
use crate::EscrowError;

/// Version byte prefixed to a 20-byte account id before base58check encoding.
pub const ACCOUNT_ID_VERSION: u8 = 0x00;

/// A syntactically valid classic address (`r...`).
///
/// Only constructible through [`Address::parse`] or [`Address::from_account_id`],
/// so every `Address` in the crate has passed the checksum test.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    /// Parses and checks a classic address.
    ///
    /// # Errors
    ///
    /// Returns [`EscrowError::InvalidAddress`] if `s` is not a base58check
    /// encoded account id in the ledger's alphabet.
    pub fn parse(s: &str) -> Result<Self, EscrowError> {
        decode_account_id(s).map_err(|reason| EscrowError::InvalidAddress {
            address: s.to_string(),
            reason,
        })?;
        Ok(Self(s.to_string()))
    }

    /// Encodes a raw 20-byte account id as a classic address.
    pub fn from_account_id(account_id: &[u8; 20]) -> Self {
        let encoded = bs58::encode(account_id)
            .with_alphabet(bs58::Alphabet::RIPPLE)
            .with_check_version(ACCOUNT_ID_VERSION)
            .into_string();
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Address {
    type Err = EscrowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = EscrowError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

/// Returns `true` if `s` is a syntactically valid classic address.
pub fn is_valid_address(s: &str) -> bool {
    decode_account_id(s).is_ok()
}

/// Decodes a classic address into its 20-byte account id.
pub fn decode_account_id(s: &str) -> Result<[u8; 20], AddressError> {
    if s.is_empty() {
        return Err(AddressError::Empty);
    }
    if !s.starts_with('r') {
        return Err(AddressError::Prefix);
    }
    if !(25..=35).contains(&s.len()) {
        return Err(AddressError::Length(s.len()));
    }

    // Checksum is stripped, the version byte is kept.
    let payload = bs58::decode(s)
        .with_alphabet(bs58::Alphabet::RIPPLE)
        .with_check(Some(ACCOUNT_ID_VERSION))
        .into_vec()?;
    if payload.len() != 21 {
        return Err(AddressError::Payload(payload.len()));
    }

    let mut account_id = [0u8; 20];
    account_id.copy_from_slice(&payload[1..]);
    Ok(account_id)
}
