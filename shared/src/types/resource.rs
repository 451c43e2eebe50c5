//! Resource factors
//!
//! A resource factor is the fraction of GPU capacity a kernel occupies while
//! ACTIVE. Factors are kept as exact fixed-point rationals (parts per
//! million) so the admission sum never drifts the way repeated float
//! additions would.

use crate::error::WardenError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Denominator of the fixed-point representation
pub const PPM: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct ResourceFactor(u64);

impl ResourceFactor {
    pub const ZERO: ResourceFactor = ResourceFactor(0);

    /// One whole GPU
    pub const FULL: ResourceFactor = ResourceFactor(PPM);

    pub const fn from_ppm(ppm: u64) -> Self {
        Self(ppm)
    }

    /// `numerator / denominator`, rounded to the nearest part per million
    pub fn from_ratio(numerator: u64, denominator: u64) -> Result<Self, WardenError> {
        if denominator == 0 {
            return Err(WardenError::InvalidResourceFactor(format!(
                "{}/0 has a zero denominator",
                numerator
            )));
        }
        let denominator_wide = denominator as u128;
        let scaled = (numerator as u128 * PPM as u128 + denominator_wide / 2) / denominator_wide;
        u64::try_from(scaled).map(Self).map_err(|_| {
            WardenError::InvalidResourceFactor(format!(
                "{}/{} is too large",
                numerator, denominator
            ))
        })
    }

    pub fn from_f64(value: f64) -> Result<Self, WardenError> {
        if !value.is_finite() || value < 0.0 {
            return Err(WardenError::InvalidResourceFactor(format!(
                "{} is not a non-negative finite number",
                value
            )));
        }
        let scaled = (value * PPM as f64).round();
        if scaled > u64::MAX as f64 {
            return Err(WardenError::InvalidResourceFactor(format!("{} is too large", value)));
        }
        Ok(Self(scaled as u64))
    }

    pub fn as_ppm(self) -> u64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / PPM as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: ResourceFactor) -> Option<ResourceFactor> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn saturating_add(self, other: ResourceFactor) -> ResourceFactor {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: ResourceFactor) -> ResourceFactor {
        Self(self.0.saturating_sub(other.0))
    }

    /// Scale by `num / den`; used for the measured duty-cycle factor
    pub fn scale(self, num: u64, den: u64) -> ResourceFactor {
        if den == 0 {
            return Self::ZERO;
        }
        Self((self.0 as u128 * num as u128 / den as u128) as u64)
    }
}

impl TryFrom<f64> for ResourceFactor {
    type Error = WardenError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_f64(value)
    }
}

impl From<ResourceFactor> for f64 {
    fn from(factor: ResourceFactor) -> Self {
        factor.as_f64()
    }
}

impl std::iter::Sum for ResourceFactor {
    fn sum<I: Iterator<Item = ResourceFactor>>(iter: I) -> Self {
        iter.fold(Self::ZERO, ResourceFactor::saturating_add)
    }
}

impl fmt::Display for ResourceFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_sums() {
        let a = ResourceFactor::from_f64(0.6).unwrap();
        let b = ResourceFactor::from_f64(0.5).unwrap();
        let c = ResourceFactor::from_f64(0.4).unwrap();
        assert!(a.saturating_add(b) > ResourceFactor::FULL);
        assert_eq!(a.saturating_add(c), ResourceFactor::FULL);

        // 0.1 added ten times is exactly one, unlike f64.
        let tenth = ResourceFactor::from_ratio(1, 10).unwrap();
        let total: ResourceFactor = std::iter::repeat(tenth).take(10).sum();
        assert_eq!(total, ResourceFactor::FULL);
    }

    #[test]
    fn test_from_ratio() {
        assert_eq!(ResourceFactor::from_ratio(1, 3).unwrap().as_ppm(), 333_333);
        assert_eq!(ResourceFactor::from_ratio(2, 3).unwrap().as_ppm(), 666_667);
        assert!(ResourceFactor::from_ratio(1, 0).is_err());
    }

    #[test]
    fn test_rejects_invalid_floats() {
        assert!(ResourceFactor::from_f64(-0.1).is_err());
        assert!(ResourceFactor::from_f64(f64::NAN).is_err());
        assert!(ResourceFactor::from_f64(f64::INFINITY).is_err());
    }

    #[test]
    fn test_saturating_sub_and_scale() {
        let a = ResourceFactor::from_f64(0.25).unwrap();
        assert_eq!(a.saturating_sub(ResourceFactor::FULL), ResourceFactor::ZERO);
        assert_eq!(ResourceFactor::FULL.scale(1, 4), a);
        assert_eq!(a.scale(3, 0), ResourceFactor::ZERO);
    }

    #[test]
    fn test_serde_roundtrip_through_f64() {
        let factor = ResourceFactor::from_f64(0.35).unwrap();
        let json = serde_json::to_string(&factor).unwrap();
        assert_eq!(json, "0.35");
        let back: ResourceFactor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, factor);
        assert!(serde_json::from_str::<ResourceFactor>("-1.0").is_err());
    }
}
