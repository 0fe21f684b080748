//! Demand: how many more values a subscriber is willing to receive.
//!
//! A [`Demand`] is either a finite count or [`Demand::UNLIMITED`]. All
//! arithmetic saturates: adding to an unlimited demand stays unlimited,
//! overflowing a finite sum becomes unlimited, and subtraction never drops
//! below zero.
//!
//! ```rust
//! use rxflow::demand::Demand;
//!
//! let mut demand = Demand::max(2);
//! demand += 3;
//! assert_eq!(demand, 5);
//! demand -= 10;
//! assert_eq!(demand, Demand::NONE);
//! assert!(Demand::UNLIMITED + 1 == Demand::UNLIMITED);
//! ```

use std::{
  cmp::Ordering,
  fmt,
  ops::{Add, AddAssign, Mul, MulAssign, Sub, SubAssign},
};

/// A saturating request count.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum Demand {
  Max(usize),
  Unlimited,
}

impl Demand {
  /// No values requested.
  pub const NONE: Demand = Demand::Max(0);
  /// As many values as the publisher can produce.
  pub const UNLIMITED: Demand = Demand::Unlimited;

  /// A finite demand of `count` values.
  #[inline]
  pub const fn max(count: usize) -> Self { Demand::Max(count) }

  #[inline]
  pub fn is_unlimited(&self) -> bool { matches!(self, Demand::Unlimited) }

  #[inline]
  pub fn is_none(&self) -> bool { matches!(self, Demand::Max(0)) }

  /// `true` when at least one more value may be delivered.
  #[inline]
  pub fn has_demand(&self) -> bool { !self.is_none() }

  /// The finite count, or `None` for an unlimited demand.
  #[inline]
  pub fn max_count(&self) -> Option<usize> {
    match self {
      Demand::Max(n) => Some(*n),
      Demand::Unlimited => None,
    }
  }

  /// Requesting zero values is a caller bug, not a runtime condition.
  ///
  /// # Panics
  ///
  /// Panics when `self` is [`Demand::NONE`].
  #[inline]
  #[track_caller]
  pub fn assert_non_zero(&self) {
    assert!(!self.is_none(), "demand requested through a subscription must be greater than zero");
  }

  /// Consumes one unit if any is available and reports whether it did.
  #[inline]
  pub fn take_one(&mut self) -> bool {
    match self {
      Demand::Unlimited => true,
      Demand::Max(0) => false,
      Demand::Max(n) => {
        *n -= 1;
        true
      }
    }
  }
}

impl Default for Demand {
  fn default() -> Self { Demand::NONE }
}

impl From<usize> for Demand {
  fn from(count: usize) -> Self { Demand::Max(count) }
}

impl fmt::Debug for Demand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { fmt::Display::fmt(self, f) }
}

impl fmt::Display for Demand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Demand::Max(n) => write!(f, "max({n})"),
      Demand::Unlimited => f.write_str("unlimited"),
    }
  }
}

// ==================== Arithmetic ====================

impl Add for Demand {
  type Output = Demand;

  fn add(self, rhs: Demand) -> Demand {
    match (self, rhs) {
      (Demand::Max(a), Demand::Max(b)) => a.checked_add(b).map_or(Demand::Unlimited, Demand::Max),
      _ => Demand::Unlimited,
    }
  }
}

impl Add<usize> for Demand {
  type Output = Demand;

  fn add(self, rhs: usize) -> Demand { self + Demand::Max(rhs) }
}

impl AddAssign for Demand {
  fn add_assign(&mut self, rhs: Demand) { *self = *self + rhs; }
}

impl AddAssign<usize> for Demand {
  fn add_assign(&mut self, rhs: usize) { *self = *self + rhs; }
}

impl Sub for Demand {
  type Output = Demand;

  fn sub(self, rhs: Demand) -> Demand {
    match (self, rhs) {
      (Demand::Unlimited, _) => Demand::Unlimited,
      (Demand::Max(_), Demand::Unlimited) => Demand::NONE,
      (Demand::Max(a), Demand::Max(b)) => Demand::Max(a.saturating_sub(b)),
    }
  }
}

impl Sub<usize> for Demand {
  type Output = Demand;

  fn sub(self, rhs: usize) -> Demand { self - Demand::Max(rhs) }
}

impl SubAssign for Demand {
  fn sub_assign(&mut self, rhs: Demand) { *self = *self - rhs; }
}

impl SubAssign<usize> for Demand {
  fn sub_assign(&mut self, rhs: usize) { *self = *self - rhs; }
}

impl Mul<usize> for Demand {
  type Output = Demand;

  fn mul(self, rhs: usize) -> Demand {
    match self {
      Demand::Unlimited => Demand::Unlimited,
      Demand::Max(a) => a.checked_mul(rhs).map_or(Demand::Unlimited, Demand::Max),
    }
  }
}

impl MulAssign<usize> for Demand {
  fn mul_assign(&mut self, rhs: usize) { *self = *self * rhs; }
}

// ==================== Comparison ====================

impl Ord for Demand {
  fn cmp(&self, other: &Self) -> Ordering {
    match (self, other) {
      (Demand::Unlimited, Demand::Unlimited) => Ordering::Equal,
      (Demand::Unlimited, Demand::Max(_)) => Ordering::Greater,
      (Demand::Max(_), Demand::Unlimited) => Ordering::Less,
      (Demand::Max(a), Demand::Max(b)) => a.cmp(b),
    }
  }
}

impl PartialOrd for Demand {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq<usize> for Demand {
  fn eq(&self, other: &usize) -> bool { *self == Demand::Max(*other) }
}

impl PartialOrd<usize> for Demand {
  fn partial_cmp(&self, other: &usize) -> Option<Ordering> { Some(self.cmp(&Demand::Max(*other))) }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[rxflow_macro::test]
  fn addition_saturates() {
    assert_eq!(Demand::max(2) + Demand::max(3), Demand::max(5));
    assert_eq!(Demand::max(usize::MAX) + 1, Demand::UNLIMITED);
    assert_eq!(Demand::UNLIMITED + Demand::max(7), Demand::UNLIMITED);
    assert_eq!(Demand::max(7) + Demand::UNLIMITED, Demand::UNLIMITED);
  }

  #[rxflow_macro::test]
  fn subtraction_never_goes_negative() {
    assert_eq!(Demand::max(3) - 1, Demand::max(2));
    assert_eq!(Demand::max(3) - 5, Demand::NONE);
    assert_eq!(Demand::max(3) - Demand::UNLIMITED, Demand::NONE);
    assert_eq!(Demand::UNLIMITED - Demand::UNLIMITED, Demand::UNLIMITED);
    assert_eq!(Demand::UNLIMITED - 100, Demand::UNLIMITED);
  }

  #[rxflow_macro::test]
  fn multiplication() {
    assert_eq!(Demand::max(3) * 4, Demand::max(12));
    assert_eq!(Demand::max(usize::MAX) * 2, Demand::UNLIMITED);
    assert_eq!(Demand::UNLIMITED * 0, Demand::UNLIMITED);
  }

  #[rxflow_macro::test]
  fn ordering_puts_unlimited_last() {
    assert!(Demand::UNLIMITED > Demand::max(usize::MAX));
    assert!(Demand::max(1) > Demand::NONE);
    assert!(Demand::max(4) > 3);
    assert!(Demand::UNLIMITED > 0);
    assert_eq!(Demand::max(4), 4);
  }

  #[rxflow_macro::test]
  fn take_one_consumes_finite_only() {
    let mut finite = Demand::max(1);
    assert!(finite.take_one());
    assert!(!finite.take_one());
    assert!(finite.is_none());

    let mut unlimited = Demand::UNLIMITED;
    assert!(unlimited.take_one());
    assert!(unlimited.is_unlimited());
  }

  #[rxflow_macro::test]
  fn display() {
    assert_eq!(Demand::max(3).to_string(), "max(3)");
    assert_eq!(Demand::UNLIMITED.to_string(), "unlimited");
    assert_eq!(format!("{:?}", Demand::NONE), "max(0)");
  }

  #[rxflow_macro::test]
  #[should_panic(expected = "greater than zero")]
  fn zero_demand_is_a_contract_violation() { Demand::NONE.assert_non_zero(); }
}
