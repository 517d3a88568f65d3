//! Score kinds, their interpretation, per-match score storage, and candidate scorers
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Display;
use std::ops::Index;

use itertools::Itertools;
use mzpeaks::Tolerance;
use serde::{Deserialize, Serialize};

use crate::candidate::{Candidate, CandidateLike, IonSeries, MassType};
use crate::charge::ZState;
use crate::config::SearchConfig;
use crate::spectrum::Spectrum;

pub type ScoreType = f64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreInterpretation {
    HigherIsBetter,
    LowerIsBetter,
}

impl ScoreInterpretation {
    /// Order two scores so that the better one comes first
    #[inline]
    pub fn compare(&self, a: ScoreType, b: ScoreType) -> Ordering {
        match self {
            ScoreInterpretation::HigherIsBetter => b.total_cmp(&a),
            ScoreInterpretation::LowerIsBetter => a.total_cmp(&b),
        }
    }

    #[inline]
    pub fn is_better(&self, a: ScoreType, b: ScoreType) -> bool {
        self.compare(a, b) == Ordering::Less
    }
}

/// The closed set of scores a match can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreKind {
    /// A fast filtering score, Sp in SEQUEST terms
    Preliminary,
    /// The primary cross-correlation score
    Primary,
    /// The Weibull tail probability of the primary score
    PValue,
    /// Decoy-derived q-value of the primary score
    PrimaryQValue,
    /// Decoy-derived q-value of the p-value
    PValueQValue,
    PercolatorScore,
    PercolatorQValue,
    QRankerScore,
    QRankerQValue,
}

impl ScoreKind {
    pub const COUNT: usize = 9;

    pub const ALL: [ScoreKind; Self::COUNT] = [
        ScoreKind::Preliminary,
        ScoreKind::Primary,
        ScoreKind::PValue,
        ScoreKind::PrimaryQValue,
        ScoreKind::PValueQValue,
        ScoreKind::PercolatorScore,
        ScoreKind::PercolatorQValue,
        ScoreKind::QRankerScore,
        ScoreKind::QRankerQValue,
    ];

    #[inline]
    pub const fn index(&self) -> usize {
        *self as usize
    }

    pub const fn interpretation(&self) -> ScoreInterpretation {
        match self {
            ScoreKind::Preliminary
            | ScoreKind::Primary
            | ScoreKind::PercolatorScore
            | ScoreKind::QRankerScore => ScoreInterpretation::HigherIsBetter,
            ScoreKind::PValue
            | ScoreKind::PrimaryQValue
            | ScoreKind::PValueQValue
            | ScoreKind::PercolatorQValue
            | ScoreKind::QRankerQValue => ScoreInterpretation::LowerIsBetter,
        }
    }

    /// The q-value kind derived from this score, if any
    pub const fn qvalue_kind(&self) -> Option<ScoreKind> {
        match self {
            ScoreKind::Primary => Some(ScoreKind::PrimaryQValue),
            ScoreKind::PValue => Some(ScoreKind::PValueQValue),
            ScoreKind::PercolatorScore => Some(ScoreKind::PercolatorQValue),
            ScoreKind::QRankerScore => Some(ScoreKind::QRankerQValue),
            _ => None,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            ScoreKind::Preliminary => "sp",
            ScoreKind::Primary => "xcorr",
            ScoreKind::PValue => "p-value",
            ScoreKind::PrimaryQValue => "xcorr q-value",
            ScoreKind::PValueQValue => "p-value q-value",
            ScoreKind::PercolatorScore => "percolator score",
            ScoreKind::PercolatorQValue => "percolator q-value",
            ScoreKind::QRankerScore => "q-ranker score",
            ScoreKind::QRankerQValue => "q-ranker q-value",
        }
    }
}

impl Display for ScoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-size table holding an optional value for each [`ScoreKind`].
///
/// An unset entry means the value was never computed, so there is no sentinel value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreVector<T: Copy> {
    values: [Option<T>; ScoreKind::COUNT],
}

impl<T: Copy> Default for ScoreVector<T> {
    fn default() -> Self {
        Self {
            values: [None; ScoreKind::COUNT],
        }
    }
}

impl<T: Copy> ScoreVector<T> {
    #[inline]
    pub fn get(&self, kind: ScoreKind) -> Option<T> {
        self.values[kind.index()]
    }

    #[inline]
    pub fn set(&mut self, kind: ScoreKind, value: T) -> Option<T> {
        self.values[kind.index()].replace(value)
    }

    #[inline]
    pub fn clear(&mut self, kind: ScoreKind) -> Option<T> {
        self.values[kind.index()].take()
    }

    #[inline]
    pub fn is_set(&self, kind: ScoreKind) -> bool {
        self.values[kind.index()].is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ScoreKind, T)> + '_ {
        ScoreKind::ALL
            .iter()
            .filter_map(|k| self.get(*k).map(|v| (*k, v)))
    }
}

impl<T: Copy> Index<ScoreKind> for ScoreVector<T> {
    type Output = Option<T>;

    fn index(&self, index: ScoreKind) -> &Self::Output {
        &self.values[index.index()]
    }
}

pub type Scores = ScoreVector<ScoreType>;
pub type Ranks = ScoreVector<u32>;

/// The raw similarity between a spectrum and one candidate at one charge state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CandidateScore {
    pub preliminary: ScoreType,
    pub primary: ScoreType,
    pub ions_matched: u32,
    pub ions_possible: u32,
}

/// Computes the preliminary and primary scores of a candidate against a spectrum.
///
/// Implementations are shared between worker threads.
pub trait PsmScorer: Sync {
    fn score(&self, spectrum: &Spectrum, zstate: &ZState, candidate: &Candidate) -> CandidateScore;
}

impl<F> PsmScorer for F
where
    F: Fn(&Spectrum, &ZState, &Candidate) -> CandidateScore + Sync,
{
    fn score(&self, spectrum: &Spectrum, zstate: &ZState, candidate: &Candidate) -> CandidateScore {
        self(spectrum, zstate, candidate)
    }
}

/// The bonus per consecutive fragment ion in the preliminary score
pub const CONSECUTIVE_ION_BONUS: f64 = 0.075;

/// Stirling's approximation of `ln(n!)`
fn ln_factorial(n: u32) -> f64 {
    if n < 2 {
        0.0
    } else {
        let n = n as f64;
        n * n.ln() - n + 0.5 * n.ln() + 0.5 * (std::f64::consts::PI * 2.0).ln()
    }
}

/// Scores a candidate by matching its predicted b and y ions against the nearest peaks.
///
/// The preliminary score is the matched intensity scaled by the fraction of ions matched and
/// a bonus for runs of consecutive ions. The primary score is the hyperscore,
/// `ln((Ib + 1)(Iy + 1)) + ln(nb!) + ln(ny!)`.
#[derive(Debug, Clone, Copy)]
pub struct IonMatchScorer {
    pub tolerance: Tolerance,
    pub max_fragment_charge: i32,
    pub mass_type: MassType,
}

impl IonMatchScorer {
    pub fn new(tolerance: Tolerance, max_fragment_charge: i32, mass_type: MassType) -> Self {
        Self {
            tolerance,
            max_fragment_charge,
            mass_type,
        }
    }

    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(
            config.fragment_tolerance(),
            config.max_fragment_charge,
            config.mass_type,
        )
    }

    /// Fragments carry at most one less charge than the precursor
    fn fragment_charge(&self, zstate: &ZState) -> i32 {
        self.max_fragment_charge
            .min((zstate.charge().abs() - 1).max(1))
    }
}

impl PsmScorer for IonMatchScorer {
    fn score(&self, spectrum: &Spectrum, zstate: &ZState, candidate: &Candidate) -> CandidateScore {
        let ions = candidate.predict_fragment_ions(self.fragment_charge(zstate), self.mass_type);
        let mut matched = HashSet::new();
        let mut summed = [0.0f64; 2];
        let mut counts = [0u32; 2];
        for ion in ions.iter() {
            if let Some(peak) = spectrum.nearest_peak(ion.mz, self.tolerance) {
                let i = match ion.series {
                    IonSeries::B => 0,
                    IonSeries::Y => 1,
                };
                summed[i] += peak.intensity as f64;
                counts[i] += 1;
                matched.insert((ion.series, ion.charge, ion.ordinal));
            }
        }
        let consecutive = matched
            .iter()
            .sorted()
            .tuple_windows()
            .filter(|(a, b)| a.0 == b.0 && a.1 == b.1 && b.2 == a.2 + 1)
            .count();
        let ions_matched = matched.len() as u32;
        let ions_possible = ions.len() as u32;
        let preliminary = if ions_possible > 0 {
            (summed[0] + summed[1])
                * ions_matched as f64
                * (1.0 + CONSECUTIVE_ION_BONUS * consecutive as f64)
                / ions_possible as f64
        } else {
            0.0
        };
        let primary = ((summed[0] + 1.0) * (summed[1] + 1.0)).ln()
            + ln_factorial(counts[0])
            + ln_factorial(counts[1]);
        CandidateScore {
            preliminary,
            primary,
            ions_matched,
            ions_possible,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_interpretation() {
        let hi = ScoreKind::Primary.interpretation();
        assert!(hi.is_better(2.0, 1.0));
        let lo = ScoreKind::PValue.interpretation();
        assert!(lo.is_better(0.01, 0.5));
        assert_eq!(lo.compare(0.5, 0.5), Ordering::Equal);
    }

    #[test]
    fn test_score_vector() {
        let mut scores = Scores::default();
        assert_eq!(scores.get(ScoreKind::Primary), None);
        assert_eq!(scores.set(ScoreKind::Primary, 3.5), None);
        assert_eq!(scores.set(ScoreKind::Primary, 4.0), Some(3.5));
        assert_eq!(scores[ScoreKind::Primary], Some(4.0));
        assert!(scores.is_set(ScoreKind::Primary));
        assert!(!scores.is_set(ScoreKind::PValue));
        let set: Vec<_> = scores.iter().collect();
        assert_eq!(set, vec![(ScoreKind::Primary, 4.0)]);
    }

    #[test]
    fn test_kind_table() {
        for (i, k) in ScoreKind::ALL.iter().enumerate() {
            assert_eq!(k.index(), i);
        }
        assert_eq!(
            ScoreKind::Primary.qvalue_kind(),
            Some(ScoreKind::PrimaryQValue)
        );
    }

    #[test]
    fn test_ion_match_scorer() {
        let candidate = Candidate::from(crate::candidate::Peptide::parse("GASK").unwrap());
        let zstate = ZState::from_neutral_mass(candidate.compute_mass(MassType::Monoisotopic), 2);
        let ions = candidate.predict_fragment_ions(1, MassType::Monoisotopic);
        assert_eq!(ions.len(), 6);

        let mut spectrum = Spectrum::new(1, 1, zstate.mz());
        for ion in ions.iter() {
            let keep = matches!(
                (ion.series, ion.ordinal),
                (IonSeries::B, 1) | (IonSeries::B, 2) | (IonSeries::Y, 1)
            );
            if keep {
                spectrum.add_peak(ion.mz + 0.1, 10.0);
            }
        }
        spectrum.add_peak(1000.0, 50.0);

        let scorer = IonMatchScorer::new(Tolerance::Da(0.5), 3, MassType::Monoisotopic);
        let score = scorer.score(&spectrum, &zstate, &candidate);
        assert_eq!(score.ions_matched, 3);
        assert_eq!(score.ions_possible, 6);
        assert!((score.preliminary - 30.0 * 3.0 * 1.075 / 6.0).abs() < 1e-9);
        let expected = (21.0f64 * 11.0).ln() + ln_factorial(2);
        assert!((score.primary - expected).abs() < 1e-9);

        let empty = Spectrum::new(2, 2, zstate.mz());
        let score = scorer.score(&empty, &zstate, &candidate);
        assert_eq!(score.ions_matched, 0);
        assert_eq!(score.preliminary, 0.0);
        assert_eq!(score.primary, 0.0);
    }

    #[test]
    fn test_ln_factorial() {
        assert_eq!(ln_factorial(0), 0.0);
        assert_eq!(ln_factorial(1), 0.0);
        let exact: f64 = (1..=10).map(|i| (i as f64).ln()).sum();
        assert!((ln_factorial(10) - exact).abs() < 0.02);
    }
}
