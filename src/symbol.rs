use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A validated trading symbol, e.g. `"AAPL"` or `"BTC-USD"`.
///
/// Always stored uppercase; construction rejects empty strings so an
/// [`OrderBook`](crate::orderbook::OrderBook) can never be registered under
/// a symbol nobody could have typed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(String);

#[derive(Debug, thiserror::Error)]
#[error("symbol must be a non-empty alphanumeric ticker, got `{0}`")]
pub struct InvalidSymbol(String);

impl Symbol {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = InvalidSymbol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty()
            || !trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(InvalidSymbol(s.to_string()));
        }
        Ok(Symbol(trimmed.to_ascii_uppercase()))
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Symbol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Symbol::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uppercases_and_trims() {
        let s: Symbol = " aapl ".parse().unwrap();
        assert_eq!(s.as_str(), "AAPL");
        assert_eq!(s.to_string(), "AAPL");
    }

    #[test]
    fn rejects_empty() {
        assert!("".parse::<Symbol>().is_err());
        assert!("   ".parse::<Symbol>().is_err());
    }

    #[test]
    fn rejects_unsupported_characters() {
        assert!("BTC/USD".parse::<Symbol>().is_err());
        assert!("BTC USD".parse::<Symbol>().is_err());
    }

    #[test]
    fn serde_round_trips_as_string() {
        let s: Symbol = "btc-usd".parse().unwrap();
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, "\"BTC-USD\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
