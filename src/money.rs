use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};

use rust_decimal::Decimal;

use crate::error::InvalidSplitError;

/// A signed amount counted in the currency's minor unit (paise, cents).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_minor(units: i64) -> Self {
        Self(units)
    }

    /// Converts a currency amount exactly. Values finer than one minor unit
    /// are rejected rather than rounded.
    pub fn from_decimal(value: Decimal, exponent: u32) -> Result<Self, InvalidSplitError> {
        let normalized = value.normalize();
        if normalized.scale() > exponent {
            return Err(InvalidSplitError::SubMinorUnit(value));
        }
        10i128
            .checked_pow(exponent - normalized.scale())
            .and_then(|factor| normalized.mantissa().checked_mul(factor))
            .and_then(|units| i64::try_from(units).ok())
            .map(Self)
            .ok_or(InvalidSplitError::AmountOutOfRange(value))
    }

    pub fn to_decimal(self, exponent: u32) -> Decimal {
        Decimal::new(self.0, exponent)
    }

    pub fn minor_units(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
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

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::ZERO, Add::add)
    }
}
