//! PREIMAGE-SHA-256 crypto-conditions in their DER encoding.
//!
//! ```text
//! fulfillment = A0 22 | 80 20 <preimage>
//! condition   = A0 25 | 80 20 <SHA-256(preimage)> | 81 01 <cost>
//! ```
//!
//! `cost` is the preimage length in bytes.

use serde_with::{DeserializeFromStr, SerializeDisplay};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::ConditionError;

/// Preimage length minted by this crate.
pub const PREIMAGE_LEN: usize = 32;

const TAG_PREIMAGE_SHA256: u8 = 0xA0;
const TAG_PREIMAGE: u8 = 0x80;
const TAG_FINGERPRINT: u8 = 0x80;
const TAG_COST: u8 = 0x81;

/// The secret a fulfillment reveals.
#[derive(Clone, PartialEq, Eq)]
pub struct Preimage([u8; PREIMAGE_LEN]);

impl Preimage {
    pub fn new(bytes: [u8; PREIMAGE_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; PREIMAGE_LEN] {
        &self.0
    }

    /// Whether the preimage carries the mock generator's marker.
    pub fn is_mock(&self) -> bool {
        self.0.starts_with(super::mock::MOCK_MARKER)
    }
}

impl std::fmt::Debug for Preimage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Preimage(<redacted>)")
    }
}

/// Public commitment to a preimage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Condition {
    fingerprint: [u8; 32],
    cost: u64,
}

impl Condition {
    pub fn new(fingerprint: [u8; 32], cost: u64) -> Self {
        Self { fingerprint, cost }
    }

    pub fn fingerprint(&self) -> &[u8; 32] {
        &self.fingerprint
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }

    /// DER encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let cost = encode_uint(self.cost);
        let mut inner = Vec::with_capacity(36 + cost.len());
        push_tlv(&mut inner, TAG_FINGERPRINT, &self.fingerprint);
        push_tlv(&mut inner, TAG_COST, &cost);

        let mut out = Vec::with_capacity(inner.len() + 2);
        push_tlv(&mut out, TAG_PREIMAGE_SHA256, &inner);
        out
    }

    /// Parses a DER-encoded condition, rejecting anything but PREIMAGE-SHA-256.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConditionError> {
        const KIND: &str = "condition";

        let (inner, rest) = read_tlv(KIND, bytes, TAG_PREIMAGE_SHA256)?;
        expect_end(KIND, rest)?;

        let (fingerprint, rest) = read_tlv(KIND, inner, TAG_FINGERPRINT)?;
        let fingerprint: [u8; 32] = fingerprint.try_into().map_err(|_| {
            ConditionError::malformed(KIND, format!("fingerprint has {} bytes", fingerprint.len()))
        })?;

        let (cost, rest) = read_tlv(KIND, rest, TAG_COST)?;
        expect_end(KIND, rest)?;
        let cost = decode_uint(KIND, cost)?;

        Ok(Self { fingerprint, cost })
    }

    /// Checks that `fulfillment` satisfies this condition in constant time.
    pub fn verify(&self, fulfillment: &Fulfillment) -> Result<(), ConditionError> {
        let derived = fulfillment.condition();
        let fingerprint_ok = derived
            .fingerprint
            .as_slice()
            .ct_eq(self.fingerprint.as_slice());
        (bool::from(fingerprint_ok) && derived.cost == self.cost)
            .then_some(())
            .ok_or(ConditionError::Mismatch)
    }
}

impl std::fmt::Display for Condition {
    /// Uppercase hex, as the ledger expects.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode_upper(self.to_bytes()))
    }
}

impl std::str::FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(&hex::decode(s)?)
    }
}

/// Redeemable proof for a [`Condition`]. Reveals the preimage.
#[derive(Clone, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct Fulfillment {
    preimage: Preimage,
}

impl Fulfillment {
    pub fn new(preimage: Preimage) -> Self {
        Self { preimage }
    }

    pub fn preimage(&self) -> &Preimage {
        &self.preimage
    }

    /// The condition this fulfillment satisfies.
    pub fn condition(&self) -> Condition {
        let fingerprint = Sha256::digest(self.preimage.as_bytes()).into();
        Condition::new(fingerprint, PREIMAGE_LEN as u64)
    }

    /// DER encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut inner = Vec::with_capacity(PREIMAGE_LEN + 2);
        push_tlv(&mut inner, TAG_PREIMAGE, self.preimage.as_bytes());

        let mut out = Vec::with_capacity(inner.len() + 2);
        push_tlv(&mut out, TAG_PREIMAGE_SHA256, &inner);
        out
    }

    /// Parses a DER-encoded fulfillment carrying a 32-byte preimage.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConditionError> {
        const KIND: &str = "fulfillment";

        let (inner, rest) = read_tlv(KIND, bytes, TAG_PREIMAGE_SHA256)?;
        expect_end(KIND, rest)?;

        let (preimage, rest) = read_tlv(KIND, inner, TAG_PREIMAGE)?;
        expect_end(KIND, rest)?;
        let preimage: [u8; PREIMAGE_LEN] = preimage.try_into().map_err(|_| {
            ConditionError::malformed(
                KIND,
                format!("preimage has {} bytes, expected {PREIMAGE_LEN}", preimage.len()),
            )
        })?;

        Ok(Self::new(Preimage::new(preimage)))
    }
}

impl std::fmt::Debug for Fulfillment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Fulfillment(<redacted>)")
    }
}

impl std::fmt::Display for Fulfillment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode_upper(self.to_bytes()))
    }
}

impl std::str::FromStr for Fulfillment {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(&hex::decode(s)?)
    }
}

// Short-form lengths only; every value here is < 128 bytes.
fn push_tlv(out: &mut Vec<u8>, tag: u8, value: &[u8]) {
    debug_assert!(value.len() < 0x80);
    out.push(tag);
    out.push(value.len() as u8);
    out.extend_from_slice(value);
}

fn read_tlv<'a>(
    kind: &'static str,
    bytes: &'a [u8],
    tag: u8,
) -> Result<(&'a [u8], &'a [u8]), ConditionError> {
    let [found, len, rest @ ..] = bytes else {
        return Err(ConditionError::malformed(kind, "truncated"));
    };
    if *found != tag {
        return Err(ConditionError::malformed(
            kind,
            format!("expected tag {tag:#04x}, found {found:#04x}"),
        ));
    }
    let len = *len as usize;
    if len >= 0x80 {
        return Err(ConditionError::malformed(kind, "long-form length"));
    }
    if rest.len() < len {
        return Err(ConditionError::malformed(kind, "truncated"));
    }
    Ok(rest.split_at(len))
}

fn expect_end(kind: &'static str, rest: &[u8]) -> Result<(), ConditionError> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(ConditionError::malformed(
            kind,
            format!("{} trailing bytes", rest.len()),
        ))
    }
}

fn encode_uint(value: u64) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(7);
    let mut out = bytes[first..].to_vec();
    // keep the DER INTEGER non-negative
    if out[0] & 0x80 != 0 {
        out.insert(0, 0);
    }
    out
}

fn decode_uint(kind: &'static str, bytes: &[u8]) -> Result<u64, ConditionError> {
    if bytes.is_empty() || bytes.len() > 9 || (bytes.len() == 9 && bytes[0] != 0) {
        return Err(ConditionError::malformed(kind, "cost out of range"));
    }
    Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Fulfillment {
        Fulfillment::new(Preimage::new([0xAB; PREIMAGE_LEN]))
    }

    #[test]
    fn encodings_have_ledger_layout() {
        let fulfillment = sample();
        let condition = fulfillment.condition();

        let f = fulfillment.to_bytes();
        assert_eq!(f.len(), 36);
        assert_eq!(&f[..4], &[0xA0, 0x22, 0x80, 0x20]);

        let c = condition.to_bytes();
        assert_eq!(c.len(), 39);
        assert_eq!(&c[..4], &[0xA0, 0x25, 0x80, 0x20]);
        assert_eq!(&c[36..], &[0x81, 0x01, 0x20]);
        assert_eq!(&c[4..36], Sha256::digest([0xAB; PREIMAGE_LEN]).as_slice());
    }

    #[test]
    fn hex_is_uppercase_and_parses_back() {
        let fulfillment = sample();
        let condition = fulfillment.condition();

        let hex = condition.to_string();
        assert_eq!(hex, hex.to_uppercase());
        assert_eq!(hex.parse::<Condition>().unwrap(), condition);

        let hex = fulfillment.to_string();
        assert_eq!(hex.parse::<Fulfillment>().unwrap(), fulfillment);
    }

    #[test]
    fn verify_binding() {
        let fulfillment = sample();
        let condition = fulfillment.condition();
        assert!(condition.verify(&fulfillment).is_ok());

        let other = Fulfillment::new(Preimage::new([0x01; PREIMAGE_LEN]));
        assert_eq!(condition.verify(&other), Err(ConditionError::Mismatch));

        // same fingerprint, different cost
        let costly = Condition::new(*condition.fingerprint(), 64);
        assert_eq!(costly.verify(&fulfillment), Err(ConditionError::Mismatch));
    }

    #[test]
    fn rejects_malformed_encodings() {
        let condition = sample().condition().to_bytes();

        assert!(Condition::from_bytes(&condition[..20]).is_err());
        assert!(Condition::from_bytes(&[condition.as_slice(), &[0u8][..]].concat()).is_err());

        let mut wrong_type = condition.clone();
        wrong_type[0] = 0xA4;
        assert!(matches!(
            Condition::from_bytes(&wrong_type),
            Err(ConditionError::Malformed { kind: "condition", .. })
        ));

        // a fulfillment is not a condition and vice versa
        let fulfillment = sample().to_bytes();
        assert!(Condition::from_bytes(&fulfillment).is_err());
        assert!(Fulfillment::from_bytes(&condition).is_err());

        assert!(matches!(
            "zz".parse::<Fulfillment>(),
            Err(ConditionError::Hex(_))
        ));
    }

    #[test]
    fn secrets_are_redacted() {
        let fulfillment = sample();
        assert_eq!(format!("{fulfillment:?}"), "Fulfillment(<redacted>)");
        assert_eq!(format!("{:?}", fulfillment.preimage()), "Preimage(<redacted>)");
    }

    #[test]
    fn cost_encoding() {
        assert_eq!(encode_uint(32), vec![0x20]);
        assert_eq!(encode_uint(0), vec![0x00]);
        assert_eq!(encode_uint(200), vec![0x00, 0xC8]);
        assert_eq!(decode_uint("condition", &[0x00, 0xC8]).unwrap(), 200);
    }
}
