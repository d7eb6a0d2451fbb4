use serde::{Deserialize, Deserializer, Serialize};
use smol_str::SmolStr;
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

/// Canonical symbol new type identifier, eg/ `BTCUSDT`, `ETHUSDT`.
///
/// The canonical form is the concatenation of base and quote asset, always upper-cased. Every
/// exchange client is responsible for translating between this canonical form and the exchange's
/// own native market identifier (see `arb_data::client::translate`).
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
pub struct Symbol(SmolStr);

#[derive(Debug, Clone, Copy, Error, Eq, PartialEq)]
#[error("Symbol must be a non-empty string")]
pub struct EmptySymbolError;

impl Symbol {
    /// Construct a new canonical [`Symbol`], upper-casing the input.
    ///
    /// # Errors
    /// Returns [`EmptySymbolError`] if `input` is empty once trimmed.
    pub fn new<S>(input: S) -> Result<Self, EmptySymbolError>
    where
        S: AsRef<str>,
    {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(EmptySymbolError);
        }
        Ok(Self(SmolStr::new(trimmed.to_ascii_uppercase())))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Debug for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let input = String::deserialize(deserializer)?;
        Symbol::new(input).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = EmptySymbolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Symbol::new(value)
    }
}

impl TryFrom<String> for Symbol {
    type Error = EmptySymbolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Symbol::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_uppercases() {
        let symbol = Symbol::new("btcusdt").unwrap();
        assert_eq!(symbol.as_str(), "BTCUSDT");
    }

    #[test]
    fn test_symbol_rejects_empty() {
        assert!(Symbol::new("").is_err());
        assert!(Symbol::new("   ").is_err());
    }

    #[test]
    fn test_symbol_equality_is_case_insensitive_by_construction() {
        assert_eq!(Symbol::new("btcusdt").unwrap(), Symbol::new("BTCUSDT").unwrap());
    }
}
