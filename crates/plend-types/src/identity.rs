use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Maximum accepted length of a commitment string, in bytes.
pub const MAX_COMMITMENT_LEN: usize = 256;

/// Account address of a protocol participant.
///
/// Addresses are 20 raw bytes rendered as `0x`-prefixed lowercase hex. The
/// ledger binds a borrower's address at apply time; everything above the
/// ledger only ever sees it after a default is revealed to the lender.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address([u8; 20]);

impl Address {
    /// Derive a deterministic address from a label (tests, demos, fixtures).
    pub fn derive(label: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"plend-address-v1:");
        hasher.update(label.as_bytes());
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hasher.finalize().as_bytes()[..20]);
        Self(bytes)
    }

    /// Create a random address.
    pub fn ephemeral() -> Self {
        let mut bytes = [0u8; 20];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Full `0x`-prefixed hex string.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Short identifier (first 4 bytes) for log lines.
    pub fn short_id(&self) -> String {
        format!("0x{}", hex::encode(&self.0[..4]))
    }

    /// Parse from hex, with or without the `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        decode_fixed::<20>(s).map(Self)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.short_id())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for Address {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_hex()
    }
}

/// Opaque reference to an off-chain zero-knowledge activity proof.
///
/// Treated purely as an identifier: the registry checks membership and the
/// bound commitment, never the proof content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProofHash([u8; 32]);

impl ProofHash {
    /// Hash arbitrary proof bytes into a `ProofHash`.
    pub fn derive(proof_bytes: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"plend-proof-v1:");
        hasher.update(proof_bytes);
        Self(*hasher.finalize().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    pub fn from_hex(s: &str) -> Result<Self, TypeError> {
        decode_fixed::<32>(s).map(Self)
    }
}

impl fmt::Debug for ProofHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProofHash({})", self.short_hex())
    }
}

impl fmt::Display for ProofHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<String> for ProofHash {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<ProofHash> for String {
    fn from(hash: ProofHash) -> Self {
        hash.to_hex()
    }
}

/// Opaque identity commitment supplied by the identity subsystem.
///
/// Used only as a correlation key; the core never decodes it. Must be
/// non-empty, at most [`MAX_COMMITMENT_LEN`] bytes and free of whitespace so
/// it can travel in URL paths unchanged.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Commitment(String);

impl Commitment {
    pub fn new(value: impl Into<String>) -> Result<Self, TypeError> {
        let value = value.into();
        if value.is_empty() {
            return Err(TypeError::InvalidCommitment("empty commitment".into()));
        }
        if value.len() > MAX_COMMITMENT_LEN {
            return Err(TypeError::InvalidCommitment(format!(
                "commitment is {} bytes, limit is {MAX_COMMITMENT_LEN}",
                value.len()
            )));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(TypeError::InvalidCommitment(
                "commitment contains whitespace".into(),
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix of the commitment for log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Debug for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Commitment({})", self.short())
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Commitment {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Commitment> for String {
    fn from(commitment: Commitment) -> Self {
        commitment.0
    }
}

fn decode_fixed<const N: usize>(s: &str) -> Result<[u8; N], TypeError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
    if bytes.len() != N {
        return Err(TypeError::InvalidLength {
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut arr = [0u8; N];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_is_deterministic() {
        assert_eq!(Address::derive("lender"), Address::derive("lender"));
        assert_ne!(Address::derive("lender"), Address::derive("borrower"));
    }

    #[test]
    fn ephemeral_addresses_are_unique() {
        assert_ne!(Address::ephemeral(), Address::ephemeral());
    }

    #[test]
    fn address_hex_accepts_optional_prefix() {
        let addr = Address::derive("alice");
        let hex = addr.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(hex.len(), 42);
        assert_eq!(Address::from_hex(&hex).unwrap(), addr);
        assert_eq!(Address::from_hex(&hex[2..]).unwrap(), addr);
    }

    #[test]
    fn address_rejects_wrong_length() {
        let err = Address::from_hex("0xdeadbeef").unwrap_err();
        assert_eq!(
            err,
            TypeError::InvalidLength {
                expected: 20,
                actual: 4
            }
        );
    }

    #[test]
    fn address_serializes_as_hex_string() {
        let addr = Address::derive("bob");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, format!("\"{}\"", addr.to_hex()));
        let parsed: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn proof_hash_derive_differs_by_content() {
        assert_ne!(ProofHash::derive(b"a"), ProofHash::derive(b"b"));
        let hash = ProofHash::derive(b"proof");
        assert_eq!(ProofHash::from_hex(&hash.to_hex()).unwrap(), hash);
    }

    #[test]
    fn commitment_validation() {
        assert!(Commitment::new("0xabc123").is_ok());
        assert!(matches!(
            Commitment::new(""),
            Err(TypeError::InvalidCommitment(_))
        ));
        assert!(matches!(
            Commitment::new("has space"),
            Err(TypeError::InvalidCommitment(_))
        ));
        assert!(Commitment::new("x".repeat(MAX_COMMITMENT_LEN)).is_ok());
        assert!(Commitment::new("x".repeat(MAX_COMMITMENT_LEN + 1)).is_err());
    }

    #[test]
    fn commitment_deserialize_validates() {
        let bad: Result<Commitment, _> = serde_json::from_str("\"\"");
        assert!(bad.is_err());
        let good: Commitment = serde_json::from_str("\"c-1\"").unwrap();
        assert_eq!(good.as_str(), "c-1");
    }

    #[test]
    fn commitment_short_is_bounded() {
        let c = Commitment::new("0123456789abcdefghij").unwrap();
        assert_eq!(c.short(), "0123456789ab");
        let tiny = Commitment::new("abc").unwrap();
        assert_eq!(tiny.short(), "abc");
    }
}
