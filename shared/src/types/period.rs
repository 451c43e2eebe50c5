//! Period classes
//!
//! Software components recur at one of ten fixed periods, expressed in
//! scheduler ticks. Declaration order is priority order: a shorter period
//! outranks a longer one.

use crate::error::WardenError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of distinct period classes
pub const NR_PERIOD_CLASSES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum PeriodClass {
    P1,
    P2,
    P5,
    P10,
    P20,
    P50,
    P100,
    P200,
    P500,
    P1000,
}

impl PeriodClass {
    pub const ALL: [PeriodClass; NR_PERIOD_CLASSES] = [
        PeriodClass::P1,
        PeriodClass::P2,
        PeriodClass::P5,
        PeriodClass::P10,
        PeriodClass::P20,
        PeriodClass::P50,
        PeriodClass::P100,
        PeriodClass::P200,
        PeriodClass::P500,
        PeriodClass::P1000,
    ];

    /// Period length in ticks
    pub fn ticks(self) -> u64 {
        match self {
            Self::P1 => 1,
            Self::P2 => 2,
            Self::P5 => 5,
            Self::P10 => 10,
            Self::P20 => 20,
            Self::P50 => 50,
            Self::P100 => 100,
            Self::P200 => 200,
            Self::P500 => 500,
            Self::P1000 => 1000,
        }
    }

    pub fn from_ticks(ticks: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.ticks() == ticks)
    }

    /// True when `tick` is a multiple of the period. Tick 0 is never
    /// processed by the tick loop, so it is not special-cased.
    pub fn is_due(self, tick: u64) -> bool {
        tick % self.ticks() == 0
    }

    /// First due tick strictly after `tick`
    pub fn next_due_after(self, tick: u64) -> u64 {
        let p = self.ticks();
        (tick / p + 1) * p
    }
}

impl TryFrom<u64> for PeriodClass {
    type Error = WardenError;

    fn try_from(ticks: u64) -> Result<Self, Self::Error> {
        Self::from_ticks(ticks).ok_or(WardenError::InvalidPeriod(ticks))
    }
}

impl From<PeriodClass> for u64 {
    fn from(period: PeriodClass) -> Self {
        period.ticks()
    }
}

impl FromStr for PeriodClass {
    type Err = WardenError;

    /// Accepts "10", "10ms" or "P10".
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let digits = s
            .strip_suffix("ms")
            .or_else(|| s.strip_prefix('P'))
            .or_else(|| s.strip_prefix('p'))
            .unwrap_or(s);
        let ticks: u64 = digits
            .parse()
            .map_err(|_| WardenError::InvalidPeriod(0))?;
        Self::try_from(ticks)
    }
}

impl fmt::Display for PeriodClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.ticks())
    }
}
