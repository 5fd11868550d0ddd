use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The number of fractional digits a [`Price`] carries.
pub const SCALE: u32 = 4;
const SCALE_FACTOR: i64 = 10_000;

/// A price represented as a fixed-point integer scaled by `10^SCALE`.
///
/// Prices never touch `f64`: the wire format is a decimal string, parsed
/// through [`rust_decimal::Decimal`] and converted to an exact scaled
/// integer. Comparisons and arithmetic on `Price` are therefore exact —
/// there is no rounding drift across thousands of matches, which is the
/// whole point of banning floats at this boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Price(i64);

#[derive(Debug, thiserror::Error)]
pub enum InvalidPrice {
    #[error("price must be positive, got `{0}`")]
    NotPositive(Decimal),
    #[error("price has more than {SCALE} fractional digits: `{0}`")]
    TooPrecise(Decimal),
    #[error("price out of representable range: `{0}`")]
    OutOfRange(Decimal),
    #[error("invalid decimal literal: `{0}`")]
    Parse(String),
}

impl Price {
    /// Build a `Price` directly from an already-scaled integer (internal use
    /// and tests where writing `150_0000` is more cumbersome than it's
    /// worth).
    pub fn from_scaled(scaled: i64) -> Self {
        Price(scaled)
    }

    pub fn scaled(self) -> i64 {
        self.0
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, SCALE)
    }
}

impl TryFrom<Decimal> for Price {
    type Error = InvalidPrice;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        if value <= Decimal::ZERO {
            return Err(InvalidPrice::NotPositive(value));
        }
        if value.scale() > SCALE {
            return Err(InvalidPrice::TooPrecise(value));
        }
        let scaled = value
            .checked_mul(Decimal::from(SCALE_FACTOR))
            .and_then(|d| i64::try_from(d.trunc()).ok())
            .ok_or(InvalidPrice::OutOfRange(value))?;
        Ok(Price(scaled))
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl Serialize for Price {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_decimal().to_string())
    }
}

impl<'de> Deserialize<'de> for Price {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        let decimal = match &raw {
            serde_json::Value::String(s) => {
                s.parse::<Decimal>().map_err(|_| InvalidPrice::Parse(s.clone()))
            }
            serde_json::Value::Number(n) => n
                .to_string()
                .parse::<Decimal>()
                .map_err(|_| InvalidPrice::Parse(n.to_string())),
            other => Err(InvalidPrice::Parse(other.to_string())),
        }
        .map_err(serde::de::Error::custom)?;
        Price::try_from(decimal).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn exact_scale_round_trip() {
        let d = Decimal::from_str("150.00").unwrap();
        let p = Price::try_from(d).unwrap();
        assert_eq!(p.scaled(), 150_0000);
        assert_eq!(p.to_decimal(), Decimal::from_str("150.0000").unwrap());
    }

    #[test]
    fn rejects_non_positive() {
        assert!(Price::try_from(Decimal::ZERO).is_err());
        assert!(Price::try_from(Decimal::from(-1)).is_err());
    }

    #[test]
    fn rejects_excess_precision() {
        let d = Decimal::from_str("1.23456").unwrap();
        assert!(matches!(
            Price::try_from(d),
            Err(InvalidPrice::TooPrecise(_))
        ));
    }

    #[test]
    fn ordering_matches_decimal_ordering() {
        let low = Price::try_from(Decimal::from_str("99.99").unwrap()).unwrap();
        let high = Price::try_from(Decimal::from_str("100.00").unwrap()).unwrap();
        assert!(low < high);
    }

    #[test]
    fn serde_round_trip_from_string() {
        let json = "\"150.5\"";
        let p: Price = serde_json::from_str(json).unwrap();
        assert_eq!(p.to_decimal(), Decimal::from_str("150.5").unwrap());
        assert_eq!(serde_json::to_string(&p).unwrap(), "\"150.5000\"");
    }

    #[test]
    fn serde_round_trip_from_number() {
        let json = "150";
        let p: Price = serde_json::from_str(json).unwrap();
        assert_eq!(p.scaled(), 150_0000);
    }
}
