//! Byte quantities with Kubernetes-style suffixes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::PooletError;

const BINARY_SUFFIXES: [(&str, u64); 5] = [
    ("Pi", 1 << 50),
    ("Ti", 1 << 40),
    ("Gi", 1 << 30),
    ("Mi", 1 << 20),
    ("Ki", 1 << 10),
];

const DECIMAL_SUFFIXES: [(&str, u64); 5] = [
    ("P", 1_000_000_000_000_000),
    ("T", 1_000_000_000_000),
    ("G", 1_000_000_000),
    ("M", 1_000_000),
    ("k", 1_000),
];

/// A non-negative amount of a resource, in bytes.
///
/// Arithmetic saturates instead of going negative or overflowing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "QuantityRepr", into = "String")]
pub struct Quantity(u64);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub const fn from_bytes(bytes: u64) -> Self {
        Quantity(bytes)
    }

    pub const fn gib(n: u64) -> Self {
        Quantity(n.saturating_mul(1 << 30))
    }

    pub const fn bytes(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_add(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity(self.0.saturating_sub(other.0))
    }
}

impl std::iter::Sum for Quantity {
    fn sum<I: Iterator<Item = Quantity>>(iter: I) -> Self {
        iter.fold(Quantity::ZERO, Quantity::saturating_add)
    }
}

impl FromStr for Quantity {
    type Err = PooletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = || PooletError::Validation(format!("invalid quantity: {:?}", s));

        let (digits, multiplier) = BINARY_SUFFIXES
            .iter()
            .chain(DECIMAL_SUFFIXES.iter())
            .find_map(|(suffix, mult)| s.strip_suffix(suffix).map(|d| (d, *mult)))
            .unwrap_or((s, 1));

        let value: u64 = digits.trim().parse().map_err(|_| invalid())?;
        value.checked_mul(multiplier).map(Quantity).ok_or_else(invalid)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "0");
        }
        for (suffix, mult) in BINARY_SUFFIXES {
            if self.0 % mult == 0 {
                return write!(f, "{}{}", self.0 / mult, suffix);
            }
        }
        write!(f, "{}", self.0)
    }
}

impl From<Quantity> for String {
    fn from(q: Quantity) -> Self {
        q.to_string()
    }
}

/// Accepts both `"10Gi"` and a bare integer byte count.
#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityRepr {
    Bytes(u64),
    Text(String),
}

impl TryFrom<QuantityRepr> for Quantity {
    type Error = PooletError;

    fn try_from(repr: QuantityRepr) -> Result<Self, Self::Error> {
        match repr {
            QuantityRepr::Bytes(b) => Ok(Quantity(b)),
            QuantityRepr::Text(s) => s.parse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!("10Gi".parse::<Quantity>().unwrap(), Quantity::gib(10));
        assert_eq!("1Ki".parse::<Quantity>().unwrap().bytes(), 1024);
        assert_eq!("2M".parse::<Quantity>().unwrap().bytes(), 2_000_000);
        assert_eq!("512".parse::<Quantity>().unwrap().bytes(), 512);
    }

    #[test]
    fn test_parse_invalid() {
        assert!("ten".parse::<Quantity>().is_err());
        assert!("-1Gi".parse::<Quantity>().is_err());
        assert!("".parse::<Quantity>().is_err());
    }

    #[test]
    fn test_display_picks_largest_even_suffix() {
        assert_eq!(Quantity::gib(100).to_string(), "100Gi");
        assert_eq!(Quantity::from_bytes(3072).to_string(), "3Ki");
        assert_eq!(Quantity::from_bytes(1536).to_string(), "1536");
        assert_eq!(Quantity::from_bytes(1000).to_string(), "1000");
        assert_eq!(Quantity::ZERO.to_string(), "0");
    }

    #[test]
    fn test_saturating_sub_clamps_at_zero() {
        let q = Quantity::gib(1).saturating_sub(Quantity::gib(2));
        assert!(q.is_zero());
    }

    #[test]
    fn test_serde_accepts_string_and_integer() {
        #[derive(Deserialize)]
        struct Wrapper {
            size: Quantity,
        }

        let from_str: Wrapper = serde_json::from_str(r#"{"size":"4Gi"}"#).unwrap();
        assert_eq!(from_str.size, Quantity::gib(4));

        let from_int: Wrapper = serde_json::from_str(r#"{"size":4096}"#).unwrap();
        assert_eq!(from_int.size.bytes(), 4096);

        assert_eq!(serde_json::to_string(&Quantity::gib(4)).unwrap(), r#""4Gi""#);
    }
}
