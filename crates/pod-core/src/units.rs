//! # Insulin Quantities
//!
//! `InsulinRate` (units per hour) and `InsulinUnits` (a dose) are stored as
//! integer hundredths of a unit. Requests arrive as `f64` from the host
//! application and are rounded to the nearest hundredth once, at
//! construction; everything downstream compares integers.

use serde::{Deserialize, Serialize};

use crate::error::PodError;

const HUNDREDTHS: f64 = 100.0;

fn to_hundredths(value: f64, what: &str) -> Result<u32, PodError> {
    if !value.is_finite() {
        return Err(PodError::Validation(format!("{what} must be finite, got {value}")));
    }
    if value < 0.0 {
        return Err(PodError::Validation(format!("{what} must be >= 0, got {value}")));
    }
    let scaled = (value * HUNDREDTHS).round();
    if scaled > f64::from(u32::MAX) {
        return Err(PodError::Validation(format!("{what} out of range: {value}")));
    }
    Ok(scaled as u32)
}

/// A basal rate in units per hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InsulinRate(u32);

impl InsulinRate {
    /// Zero rate. A temp basal at this rate is "no temp basal" only when
    /// its duration is also zero.
    pub const ZERO: InsulinRate = InsulinRate(0);

    /// Build a rate from units per hour.
    pub fn from_units_per_hour(value: f64) -> Result<Self, PodError> {
        to_hundredths(value, "insulin rate").map(Self)
    }

    /// Build a rate from hundredths of a unit per hour.
    pub fn from_hundredths(hundredths: u32) -> Self {
        Self(hundredths)
    }

    /// The rate in units per hour.
    pub fn units_per_hour(&self) -> f64 {
        f64::from(self.0) / HUNDREDTHS
    }

    /// The rate in hundredths of a unit per hour.
    pub fn hundredths(&self) -> u32 {
        self.0
    }

    /// Whether this is the zero rate.
    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for InsulinRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} U/h", self.units_per_hour())
    }
}

/// An amount of insulin in units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InsulinUnits(u32);

impl InsulinUnits {
    /// Build an amount from units.
    pub fn from_units(value: f64) -> Result<Self, PodError> {
        to_hundredths(value, "insulin amount").map(Self)
    }

    /// The amount in units.
    pub fn units(&self) -> f64 {
        f64::from(self.0) / HUNDREDTHS
    }

    /// The amount in hundredths of a unit.
    pub fn hundredths(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for InsulinUnits {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2} U", self.units())
    }
}
