//! Precursor charge states and conversions between m/z and mass
use std::cmp;
use std::fmt::Display;

use chemical_elements::{neutral_mass, PROTON};
use serde::{Deserialize, Serialize};

use crate::peaks::Peak;

pub type ChargeRange = (i32, i32);

/// The fraction of total ion current that must lie below the precursor m/z
/// for a spectrum without charge annotations to be called singly charged.
pub const SINGLY_CHARGED_INTENSITY_FRACTION: f64 = 0.95;

/// Iterate over the charge states in a [`ChargeRange`], inclusive of both ends and
/// ordered by absolute magnitude.
#[derive(Debug, Clone)]
pub struct ChargeRangeIter {
    pub min: i32,
    pub max: i32,
    pub sign: i32,
    index: usize,
    size: usize,
}

impl ChargeRangeIter {
    pub fn new(min: i32, max: i32) -> ChargeRangeIter {
        let low = cmp::min(min.abs(), max.abs());
        let high = cmp::max(min.abs(), max.abs());
        let sign = if min < 0 || max < 0 { -1 } else { 1 };
        let size = if low == 0 && high == 0 {
            0
        } else {
            (high - low.max(1) + 1) as usize
        };
        ChargeRangeIter {
            min: low.max(1),
            max: high,
            sign,
            index: 0,
            size,
        }
    }

    pub fn next_charge(&mut self) -> Option<i32> {
        if self.index >= self.size {
            None
        } else {
            let i = (self.min + self.index as i32) * self.sign;
            self.index += 1;
            Some(i)
        }
    }
}

impl Iterator for ChargeRangeIter {
    type Item = i32;

    fn next(&mut self) -> Option<i32> {
        self.next_charge()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rem = self.size - self.index.min(self.size);
        (rem, Some(rem))
    }
}

impl From<ChargeRange> for ChargeRangeIter {
    fn from(pair: ChargeRange) -> ChargeRangeIter {
        ChargeRangeIter::new(pair.0, pair.1)
    }
}

/// Compute the m/z of an ion with neutral mass `mass` carrying `charge` protons.
#[inline]
pub fn mass_charge_ratio(mass: f64, charge: i32) -> f64 {
    let z = charge as f64;
    (mass + z * PROTON) / z
}

/// A single hypothesis about the charge state of a spectrum's precursor ion.
///
/// Any one of the m/z, neutral mass, or singly charged mass (M+H) determines the
/// others once the charge is known, so only the charge and neutral mass are stored.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZState {
    charge: i32,
    neutral_mass: f64,
}

impl ZState {
    /// Create a charge state from an observed precursor m/z.
    ///
    /// `charge` must not be zero.
    pub fn from_mz(mz: f64, charge: i32) -> Self {
        Self {
            charge,
            neutral_mass: neutral_mass(mz, charge, PROTON),
        }
    }

    /// Create a charge state from a singly protonated mass, as written on MS2 `Z` lines.
    pub fn from_singly_charged_mass(singly_charged_mass: f64, charge: i32) -> Self {
        Self {
            charge,
            neutral_mass: singly_charged_mass - PROTON,
        }
    }

    pub fn from_neutral_mass(neutral_mass: f64, charge: i32) -> Self {
        Self {
            charge,
            neutral_mass,
        }
    }

    #[inline]
    pub fn charge(&self) -> i32 {
        self.charge
    }

    #[inline]
    pub fn neutral_mass(&self) -> f64 {
        self.neutral_mass
    }

    #[inline]
    pub fn mz(&self) -> f64 {
        mass_charge_ratio(self.neutral_mass, self.charge)
    }

    #[inline]
    pub fn singly_charged_mass(&self) -> f64 {
        self.neutral_mass + PROTON
    }
}

impl Display for ZState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:+}@{:.4}", self.charge, self.neutral_mass)
    }
}

/// Which of a spectrum's charge states should be searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeSelection {
    #[default]
    All,
    Only(i32),
}

impl ChargeSelection {
    pub fn select<'a>(&self, zstates: &'a [ZState]) -> Vec<&'a ZState> {
        match self {
            ChargeSelection::All => zstates.iter().collect(),
            ChargeSelection::Only(z) => zstates.iter().filter(|s| s.charge() == *z).collect(),
        }
    }
}

/// The outcome of inferring a precursor charge from the peak list alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeCall {
    /// Nearly all fragment signal lies below the precursor m/z
    Singly,
    /// The precursor may be doubly or triply charged
    Multiple,
}

impl ChargeCall {
    pub fn charges(&self) -> ChargeRangeIter {
        match self {
            ChargeCall::Singly => ChargeRangeIter::new(1, 1),
            ChargeCall::Multiple => ChargeRangeIter::new(2, 3),
        }
    }
}

/// Guess whether a spectrum without charge annotations came from a singly charged
/// precursor by measuring how much of its signal lies below the precursor m/z.
pub fn choose_charge(precursor_mz: f64, peaks: &[Peak]) -> ChargeCall {
    let mut below = 0.0f64;
    let mut total = 0.0f64;
    for p in peaks {
        let inten = p.intensity as f64;
        total += inten;
        if p.mz <= precursor_mz {
            below += inten;
        }
    }
    if total <= 0.0 {
        return ChargeCall::Multiple;
    }
    if below / total >= SINGLY_CHARGED_INTENSITY_FRACTION {
        ChargeCall::Singly
    } else {
        ChargeCall::Multiple
    }
}
