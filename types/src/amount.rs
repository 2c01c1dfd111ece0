//! Currency amounts.
//!
//! An amount is a currency code plus a fixed-point value split into an integer
//! part and a fraction counted in units of `1 / FRACTIONAL_BASE`. All arithmetic
//! is exact; mixing currencies is always an error.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::AmountError;

/// Number of fraction units in one unit of currency.
pub const FRACTIONAL_BASE: u32 = 100_000_000;

/// Number of decimal digits the fraction can carry.
pub const FRACTIONAL_DIGITS: usize = 8;

/// Largest representable integer part (2^52).
pub const MAX_AMOUNT_VALUE: u64 = 1 << 52;

/// Longest currency code accepted.
pub const MAX_CURRENCY_LEN: usize = 11;

/// An exact currency amount, always normalized so that `fraction < FRACTIONAL_BASE`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Amount {
    currency: String,
    value: u64,
    fraction: u32,
}

/// Result of a subtraction that clamps at zero instead of failing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaturatedDifference {
    pub amount: Amount,
    /// `true` when the subtrahend was larger and the result was clamped to zero.
    pub saturated: bool,
}

impl Amount {
    /// Build an amount, carrying fraction overflow into the value.
    pub fn new(currency: &str, value: u64, fraction: u32) -> Result<Self, AmountError> {
        let currency = normalize_currency(currency)?;
        let carry = (fraction / FRACTIONAL_BASE) as u64;
        let value = value.checked_add(carry).ok_or(AmountError::Overflow)?;
        if value > MAX_AMOUNT_VALUE {
            return Err(AmountError::Overflow);
        }
        Ok(Self {
            currency,
            value,
            fraction: fraction % FRACTIONAL_BASE,
        })
    }

    pub fn zero(currency: &str) -> Result<Self, AmountError> {
        Self::new(currency, 0, 0)
    }

    /// Parse either `CUR:123.45` or `123.45 CUR`.
    pub fn parse(s: &str) -> Result<Self, AmountError> {
        let s = s.trim();
        let (currency, number) = if let Some((cur, num)) = s.split_once(':') {
            (cur, num)
        } else if let Some((num, cur)) = s.split_once(' ') {
            (cur.trim(), num.trim())
        } else {
            return Err(AmountError::InvalidFormat(format!(
                "missing currency in {s:?}"
            )));
        };
        let currency = normalize_currency(currency)?;
        let (value, fraction) = parse_number(number)?;
        Ok(Self {
            currency,
            value,
            fraction,
        })
    }

    /// Rebuild an amount from a total number of fraction units.
    pub fn from_units(currency: &str, units: u128) -> Result<Self, AmountError> {
        let value = units / FRACTIONAL_BASE as u128;
        if value > MAX_AMOUNT_VALUE as u128 {
            return Err(AmountError::Overflow);
        }
        Self::new(currency, value as u64, (units % FRACTIONAL_BASE as u128) as u32)
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn fraction(&self) -> u32 {
        self.fraction
    }

    /// Total number of fraction units.
    pub fn to_units(&self) -> u128 {
        self.value as u128 * FRACTIONAL_BASE as u128 + self.fraction as u128
    }

    pub fn is_zero(&self) -> bool {
        self.value == 0 && self.fraction == 0
    }

    pub fn is_same_currency(&self, other: &Amount) -> bool {
        self.currency == other.currency
    }

    fn check_currency(&self, other: &Amount) -> Result<(), AmountError> {
        if self.currency == other.currency {
            Ok(())
        } else {
            Err(AmountError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            })
        }
    }

    pub fn checked_add(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.check_currency(other)?;
        let units = self.to_units() + other.to_units();
        Self::from_units(&self.currency, units)
    }

    pub fn checked_sub(&self, other: &Amount) -> Result<Amount, AmountError> {
        self.check_currency(other)?;
        let units = self
            .to_units()
            .checked_sub(other.to_units())
            .ok_or(AmountError::Underflow)?;
        Self::from_units(&self.currency, units)
    }

    /// Subtract, clamping at zero. The result says whether clamping happened.
    pub fn saturating_sub(&self, other: &Amount) -> Result<SaturatedDifference, AmountError> {
        self.check_currency(other)?;
        match self.to_units().checked_sub(other.to_units()) {
            Some(units) => Ok(SaturatedDifference {
                amount: Self::from_units(&self.currency, units)?,
                saturated: false,
            }),
            None => Ok(SaturatedDifference {
                amount: Self::zero(&self.currency)?,
                saturated: true,
            }),
        }
    }

    /// Compare two amounts of the same currency.
    pub fn cmp_checked(&self, other: &Amount) -> Result<Ordering, AmountError> {
        self.check_currency(other)?;
        Ok(self.to_units().cmp(&other.to_units()))
    }

    pub fn min(&self, other: &Amount) -> Result<Amount, AmountError> {
        Ok(match self.cmp_checked(other)? {
            Ordering::Greater => other.clone(),
            _ => self.clone(),
        })
    }

    pub fn max(&self, other: &Amount) -> Result<Amount, AmountError> {
        Ok(match self.cmp_checked(other)? {
            Ordering::Less => other.clone(),
            _ => self.clone(),
        })
    }

    /// Sum a sequence of amounts; an empty sequence sums to zero.
    pub fn sum<'a, I>(currency: &str, amounts: I) -> Result<Amount, AmountError>
    where
        I: IntoIterator<Item = &'a Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Self::zero(currency)?, |acc, a| acc.checked_add(a))
    }

    pub fn mult(&self, n: u32) -> Result<Amount, AmountError> {
        let units = self
            .to_units()
            .checked_mul(n as u128)
            .ok_or(AmountError::Overflow)?;
        Self::from_units(&self.currency, units)
    }

    /// Integer division, rounding down to the nearest fraction unit.
    pub fn divide(&self, n: u32) -> Result<Amount, AmountError> {
        if n == 0 {
            return Err(AmountError::InvalidFormat("division by zero".into()));
        }
        Self::from_units(&self.currency, self.to_units() / n as u128)
    }

    /// Binary encoding used inside signed payloads:
    /// value (u64 BE), fraction (u32 BE), currency NUL-padded to 12 bytes.
    pub fn to_bytes(&self) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[..8].copy_from_slice(&self.value.to_be_bytes());
        out[8..12].copy_from_slice(&self.fraction.to_be_bytes());
        let cur = self.currency.as_bytes();
        out[12..12 + cur.len()].copy_from_slice(cur);
        out
    }
}

fn normalize_currency(currency: &str) -> Result<String, AmountError> {
    let mut chars = currency.chars();
    let first = chars
        .next()
        .ok_or_else(|| AmountError::InvalidFormat("empty currency".into()))?;
    if !first.is_ascii_alphabetic() {
        return Err(AmountError::InvalidFormat(format!(
            "currency {currency:?} must start with a letter"
        )));
    }
    if currency.len() > MAX_CURRENCY_LEN {
        return Err(AmountError::InvalidFormat(format!(
            "currency {currency:?} longer than {MAX_CURRENCY_LEN} characters"
        )));
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(AmountError::InvalidFormat(format!(
            "currency {currency:?} contains invalid characters"
        )));
    }
    Ok(currency.to_ascii_uppercase())
}

fn parse_number(number: &str) -> Result<(u64, u32), AmountError> {
    let invalid = || AmountError::InvalidFormat(format!("invalid number {number:?}"));
    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (number, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = int_part.parse().map_err(|_| AmountError::Overflow)?;
    if value > MAX_AMOUNT_VALUE {
        return Err(AmountError::Overflow);
    }
    let fraction = match frac_part {
        None => 0,
        Some(f) => {
            if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            if f.len() > FRACTIONAL_DIGITS {
                return Err(AmountError::InvalidFormat(format!(
                    "fraction {f:?} exceeds {FRACTIONAL_DIGITS} digits"
                )));
            }
            let mut fraction = 0u32;
            let mut scale = FRACTIONAL_BASE / 10;
            for b in f.bytes() {
                fraction += (b - b'0') as u32 * scale;
                scale /= 10;
            }
            fraction
        }
    };
    Ok((value, fraction))
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.currency, self.value)?;
        if self.fraction != 0 {
            let digits = format!("{:0width$}", self.fraction, width = FRACTIONAL_DIGITS);
            write!(f, ".{}", digits.trim_end_matches('0'))?;
        }
        Ok(())
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Amount::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn amt(s: &str) -> Amount {
        Amount::parse(s).unwrap()
    }

    #[test]
    fn parse_colon_form() {
        let a = amt("EUR:10.5");
        assert_eq!(a.currency(), "EUR");
        assert_eq!(a.value(), 10);
        assert_eq!(a.fraction(), 50_000_000);
    }

    #[test]
    fn parse_suffix_form() {
        let a = amt("10.5 EUR");
        assert_eq!(a, amt("EUR:10.5"));
    }

    #[test]
    fn parse_rejects_malformed() {
        for bad in [
            "EUR",
            "EUR:",
            "EUR:1.",
            "EUR:.5",
            "EUR:1.123456789",
            "0EUR:1",
            ":1",
            "EUR:1a",
            "EUR:-1",
            "TOOLONGCURRENCY:1",
        ] {
            assert!(
                matches!(Amount::parse(bad), Err(AmountError::InvalidFormat(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn parse_rejects_value_over_max() {
        let s = format!("EUR:{}", MAX_AMOUNT_VALUE + 1);
        assert_eq!(Amount::parse(&s), Err(AmountError::Overflow));
    }

    #[test]
    fn currency_is_uppercased() {
        assert_eq!(amt("kudos:1").currency(), "KUDOS");
    }

    #[test]
    fn display_trims_trailing_zeros() {
        assert_eq!(amt("EUR:10.50").to_string(), "EUR:10.5");
        assert_eq!(amt("EUR:007").to_string(), "EUR:7");
        assert_eq!(amt("EUR:0.00000001").to_string(), "EUR:0.00000001");
    }

    #[test]
    fn add_carries_fraction() {
        let sum = amt("EUR:0.7").checked_add(&amt("EUR:0.6")).unwrap();
        assert_eq!(sum, amt("EUR:1.3"));
    }

    #[test]
    fn new_normalizes_fraction() {
        let a = Amount::new("EUR", 1, FRACTIONAL_BASE + 5).unwrap();
        assert_eq!(a.value(), 2);
        assert_eq!(a.fraction(), 5);
    }

    #[test]
    fn add_currency_mismatch() {
        let err = amt("EUR:1").checked_add(&amt("USD:1")).unwrap_err();
        assert!(matches!(err, AmountError::CurrencyMismatch { .. }));
    }

    #[test]
    fn add_overflow() {
        let max = Amount::new("EUR", MAX_AMOUNT_VALUE, 0).unwrap();
        assert_eq!(max.checked_add(&amt("EUR:1")), Err(AmountError::Overflow));
    }

    #[test]
    fn sub_underflow_is_error() {
        assert_eq!(
            amt("EUR:1").checked_sub(&amt("EUR:1.5")),
            Err(AmountError::Underflow)
        );
    }

    #[test]
    fn saturating_sub_is_tagged() {
        let d = amt("EUR:1").saturating_sub(&amt("EUR:1.5")).unwrap();
        assert!(d.saturated);
        assert!(d.amount.is_zero());

        let d = amt("EUR:2").saturating_sub(&amt("EUR:0.5")).unwrap();
        assert!(!d.saturated);
        assert_eq!(d.amount, amt("EUR:1.5"));
    }

    #[test]
    fn cmp_and_min_max() {
        assert_eq!(
            amt("EUR:1.1").cmp_checked(&amt("EUR:1.01")).unwrap(),
            Ordering::Greater
        );
        assert_eq!(amt("EUR:3").min(&amt("EUR:2")).unwrap(), amt("EUR:2"));
        assert_eq!(amt("EUR:3").max(&amt("EUR:2")).unwrap(), amt("EUR:3"));
        assert!(amt("EUR:1").cmp_checked(&amt("USD:1")).is_err());
    }

    #[test]
    fn sum_mult_divide() {
        let parts = [amt("EUR:1.5"), amt("EUR:2.25")];
        assert_eq!(Amount::sum("EUR", &parts).unwrap(), amt("EUR:3.75"));
        assert_eq!(Amount::sum("EUR", std::iter::empty()).unwrap(), amt("EUR:0"));
        assert_eq!(amt("EUR:1.5").mult(3).unwrap(), amt("EUR:4.5"));
        assert_eq!(amt("EUR:10").divide(3).unwrap().to_string(), "EUR:3.33333333");
        assert!(amt("EUR:1").divide(0).is_err());
    }

    #[test]
    fn binary_encoding_layout() {
        let bytes = amt("EUR:1.5").to_bytes();
        assert_eq!(&bytes[..8], &1u64.to_be_bytes());
        assert_eq!(&bytes[8..12], &50_000_000u32.to_be_bytes());
        assert_eq!(&bytes[12..15], b"EUR");
        assert!(bytes[15..].iter().all(|b| *b == 0));
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&amt("EUR:1.5")).unwrap();
        assert_eq!(json, "\"EUR:1.5\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amt("EUR:1.5"));
    }
}
