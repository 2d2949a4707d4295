//! Money conversion and currency types.
//!
//! All balances and amounts are carried internally as `i64` minor units;
//! the partner wire format carries decimal strings. Every conversion between
//! the two goes through this module. No binary floating point anywhere.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("Unsupported currency: {0}")]
    UnsupportedCurrency(String),

    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Too many decimal places for currency (max {max})")]
    PrecisionOverflow { max: u32 },

    #[error("Amount too large, would overflow")]
    Overflow,

    #[error("Invalid amount format: {0}")]
    InvalidFormat(String),
}

/// Currencies the ledger custodies.
///
/// Only Tether today; the enum exists so new currencies extend match arms
/// instead of leaking strings through the codebase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Tether,
}

impl Currency {
    /// Minor-unit decimal places (Tether balances are kept in cents).
    pub fn decimals(&self) -> u32 {
        match self {
            Currency::Tether => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Tether => "Tether",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Currency {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Tether" => Ok(Currency::Tether),
            other => Err(MoneyError::UnsupportedCurrency(other.to_string())),
        }
    }
}

/// An exact amount of one currency, in minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Amount {
    pub currency: Currency,
    pub units: i64,
}

impl Amount {
    pub fn new(currency: Currency, units: i64) -> Self {
        Self { currency, units }
    }

    pub fn tether(units: i64) -> Self {
        Self::new(Currency::Tether, units)
    }

    /// Parse a partner-facing decimal string (e.g. "30", "1.50") into
    /// minor units of `currency`.
    pub fn parse(currency: Currency, value: &str) -> Result<Self, MoneyError> {
        let units = parse_units(value, currency.decimals())?;
        Ok(Self { currency, units })
    }

    /// Partner-facing decimal string (e.g. 3000 cents -> "30.00").
    pub fn to_decimal_string(&self) -> String {
        format_units(self.units, self.currency.decimals())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency)
    }
}

/// Convert a decimal string into `i64` minor units.
///
/// Rejects negatives, excess precision, and anything that does not parse
/// exactly. The partner API is the only producer of these strings.
pub fn parse_units(value: &str, decimals: u32) -> Result<i64, MoneyError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    let parsed =
        Decimal::from_str(value).map_err(|e| MoneyError::InvalidFormat(format!("{value}: {e}")))?;

    if parsed.is_sign_negative() {
        return Err(MoneyError::InvalidAmount);
    }

    let scale = Decimal::from(10i64.pow(decimals));
    let scaled = parsed.checked_mul(scale).ok_or(MoneyError::Overflow)?;

    if scaled != scaled.trunc() {
        return Err(MoneyError::PrecisionOverflow { max: decimals });
    }

    scaled.trunc().to_i64().ok_or(MoneyError::Overflow)
}

/// Format `i64` minor units as a decimal string with the full scale.
pub fn format_units(units: i64, decimals: u32) -> String {
    Decimal::new(units, decimals).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_whole_number() {
        assert_eq!(parse_units("30", 2).unwrap(), 3000);
        assert_eq!(parse_units("0", 2).unwrap(), 0);
    }

    #[test]
    fn test_parse_fractional() {
        assert_eq!(parse_units("1.5", 2).unwrap(), 150);
        assert_eq!(parse_units("1.50", 2).unwrap(), 150);
    }

    #[test]
    fn test_parse_rejects_excess_precision() {
        assert!(matches!(
            parse_units("1.505", 2),
            Err(MoneyError::PrecisionOverflow { max: 2 })
        ));
    }

    #[test]
    fn test_parse_rejects_negative() {
        assert!(matches!(parse_units("-5", 2), Err(MoneyError::InvalidAmount)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_units("abc", 2).is_err());
        assert!(parse_units("", 2).is_err());
        assert!(parse_units("1.2.3", 2).is_err());
    }

    #[test]
    fn test_format_roundtrip() {
        assert_eq!(format_units(3000, 2), "30.00");
        assert_eq!(format_units(150, 2), "1.50");
        assert_eq!(parse_units(&format_units(12345, 2), 2).unwrap(), 12345);
    }

    #[test]
    fn test_amount_wire_string() {
        let amount = Amount::tether(3000);
        assert_eq!(amount.to_decimal_string(), "30.00");
        assert_eq!(Amount::parse(Currency::Tether, "30.00").unwrap(), amount);
    }

    #[test]
    fn test_currency_from_str() {
        assert_eq!("Tether".parse::<Currency>().unwrap(), Currency::Tether);
        assert!("Dogecoin".parse::<Currency>().is_err());
    }
}
