//! Ledger identifiers
//!
//! Addresses and transaction hashes originate on the value ledger, so
//! they are string-backed rather than locally minted. Addresses are
//! lowercased at construction: every registry and index key uses the
//! canonical form, which rules out case-variant duplicates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A value-ledger account address, canonicalized to lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Create an address, lowercasing the input
    pub fn new(s: impl AsRef<str>) -> Self {
        Self(s.as_ref().trim().to_lowercase())
    }

    /// The canonical (lowercase) string form
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::new(s))
    }
}

/// A value-ledger transaction hash, the primary key of a payment record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TxHash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_canonical_form() {
        let a = Address::new("0xAbCd00");
        let b = Address::new("0xabcd00");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "0xabcd00");
    }

    #[test]
    fn test_address_deserialize_lowercases() {
        let a: Address = serde_json::from_str("\"0xDEADBEEF\"").unwrap();
        assert_eq!(a.as_str(), "0xdeadbeef");
    }

    #[test]
    fn test_tx_hash_preserved() {
        let h = TxHash::new("0xFeed01");
        assert_eq!(h.as_str(), "0xFeed01");
    }
}
