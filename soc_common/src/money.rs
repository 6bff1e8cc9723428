use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

//--------------------------------------       Money         ---------------------------------------------------------

/// An exact 2-decimal currency amount, stored as integer cents.
///
/// Marketplaces and Shopify both express money as decimal strings ("6.00"). Parsing into cents up front
/// keeps every downstream sum, split and comparison exact, so reconciliation never drifts by float error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

#[derive(Debug, Clone, Error)]
#[error("Invalid currency amount: {0}")]
pub struct MoneyParseError(String);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    pub fn to_f64(&self) -> f64 {
        self.0 as f64 / 100.0
    }

    /// `num/den` of this amount, rounded half-away-from-zero to the nearest cent.
    /// Used for per-unit tax and discount apportionment. Returns zero when `den` is zero.
    pub fn proportion(&self, num: i64, den: i64) -> Self {
        if den == 0 {
            return Self(0);
        }
        let share = (self.0 as f64 * num as f64 / den as f64).round();
        Self(share as i64)
    }

    /// Penny-fair division of this amount across `lines` equal shares.
    ///
    /// Each share starts at the rounded mean; the residual cents (positive or negative) are handed out
    /// one cent at a time to the first shares in order. The returned values always sum back to the
    /// original amount, and no share deviates from the mean by more than one cent.
    pub fn split_among(&self, lines: usize) -> Vec<Money> {
        if lines == 0 {
            return Vec::new();
        }
        let n = lines as i64;
        let base = (self.0 as f64 / n as f64).round() as i64;
        let residual = self.0 - base * n;
        let modifier = if residual > 0 { 1 } else { -1 };
        let mut pennies = residual.abs();
        (0..lines)
            .map(|_| {
                let mut share = base;
                if pennies > 0 {
                    share += modifier;
                    pennies -= 1;
                }
                Money(share)
            })
            .collect()
    }
}

impl FromStr for Money {
    type Err = MoneyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(MoneyParseError(s.to_string()));
        }
        let (negative, unsigned) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.strip_prefix('+').unwrap_or(raw)),
        };
        let mut parts = unsigned.splitn(2, '.');
        let whole = parts.next().unwrap_or("");
        let frac = parts.next().unwrap_or("");
        if whole.is_empty() && frac.is_empty() {
            return Err(MoneyParseError(s.to_string()));
        }
        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<i64>().map_err(|_| MoneyParseError(s.to_string()))?
        };
        let mut cents = 0i64;
        if !frac.is_empty() {
            if frac.bytes().any(|b| !b.is_ascii_digit()) {
                return Err(MoneyParseError(s.to_string()));
            }
            let digits: Vec<i64> = frac.bytes().map(|b| i64::from(b - b'0')).collect();
            cents = digits.first().copied().unwrap_or(0) * 10 + digits.get(1).copied().unwrap_or(0);
            // third digit decides rounding of the half-cent remainder
            if digits.get(2).copied().unwrap_or(0) >= 5 {
                cents += 1;
            }
        }
        let total = whole_units * 100 + cents;
        Ok(Money(if negative { -total } else { total }))
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Money {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MoneyVisitor;

        impl<'de> de::Visitor<'de> for MoneyVisitor {
            type Value = Money;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a decimal currency amount as a string or number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Money, E> {
                if v.trim().is_empty() {
                    return Ok(Money::default());
                }
                v.parse().map_err(de::Error::custom)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Money, E> {
                Ok(Money((v * 100.0).round() as i64))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Money, E> {
                Ok(Money(v * 100))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Money, E> {
                Ok(Money((v as i64) * 100))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Money, E> {
                Ok(Money::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<Money, E> {
                Ok(Money::default())
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Money, D::Error> {
                d.deserialize_any(MoneyVisitor)
            }
        }

        deserializer.deserialize_any(MoneyVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_decimal_strings() {
        assert_eq!("6.00".parse::<Money>().unwrap(), Money::from_cents(600));
        assert_eq!("1.5".parse::<Money>().unwrap(), Money::from_cents(150));
        assert_eq!("-12.34".parse::<Money>().unwrap(), Money::from_cents(-1234));
        assert_eq!("0".parse::<Money>().unwrap(), Money::from_cents(0));
        assert_eq!("10".parse::<Money>().unwrap(), Money::from_cents(1000));
        assert!("abc".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
    }

    #[test]
    fn displays_with_two_decimals() {
        assert_eq!(Money::from_cents(600).to_string(), "6.00");
        assert_eq!(Money::from_cents(-150).to_string(), "-1.50");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn split_conserves_the_total() {
        for (cents, lines) in [(1000, 3), (1001, 3), (999, 4), (-1000, 3), (1, 5), (0, 2), (7, 7)] {
            let total = Money::from_cents(cents);
            let shares = total.split_among(lines);
            assert_eq!(shares.len(), lines);
            assert_eq!(shares.iter().copied().sum::<Money>(), total, "total {cents} over {lines}");
            let mean = (cents as f64 / lines as f64).round() as i64;
            for share in &shares {
                assert!((share.cents() - mean).abs() <= 1, "share {share} deviates from mean for {cents}/{lines}");
            }
        }
    }

    #[test]
    fn split_among_zero_lines_is_empty() {
        assert!(Money::from_cents(500).split_among(0).is_empty());
    }

    #[test]
    fn proportion_rounds_half_away_from_zero() {
        // one third of a dollar, twice over
        assert_eq!(Money::from_cents(100).proportion(1, 3), Money::from_cents(33));
        assert_eq!(Money::from_cents(100).proportion(2, 3), Money::from_cents(67));
        assert_eq!(Money::from_cents(50).proportion(1, 0), Money::from_cents(0));
    }

    #[test]
    fn deserializes_strings_and_numbers() {
        assert_eq!(serde_json::from_str::<Money>("\"6.00\"").unwrap(), Money::from_cents(600));
        assert_eq!(serde_json::from_str::<Money>("6.5").unwrap(), Money::from_cents(650));
        assert_eq!(serde_json::from_str::<Money>("3").unwrap(), Money::from_cents(300));
        assert_eq!(serde_json::from_str::<Money>("\"\"").unwrap(), Money::default());
        assert_eq!(serde_json::from_str::<Money>("null").unwrap(), Money::default());
    }
}
