//! A single scored spectrum-candidate pairing and the ordering rules used to rank them.
use std::cmp::Ordering;
use std::fmt::Display;
use std::ops::Range;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candidate::{Candidate, CandidateLike, Digestion, DigestionClass, Enzyme};
use crate::charge::ZState;
use crate::scorer::{Ranks, ScoreKind, ScoreType, Scores};
use crate::spectrum::Spectrum;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("The {kind} score of {sequence} for scan {scan} was read before it was computed")]
    ScoreNotComputed {
        kind: ScoreKind,
        scan: u32,
        sequence: String,
    },
    #[error("The {kind} rank of {sequence} for scan {scan} was read before it was computed")]
    RankNotComputed {
        kind: ScoreKind,
        scan: u32,
        sequence: String,
    },
}

/// The position of a [`Match`] in the [`MatchCollection`](crate::collection::MatchCollection)
/// that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MatchId(pub u32);

impl MatchId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// A candidate scored against one charge state of a spectrum.
///
/// A decoy match keeps the target candidate it was derived from, but every
/// sequence accessor reports the decoy sequence.
#[derive(Debug, Clone)]
pub struct Match {
    spectrum: Arc<Spectrum>,
    zstate: ZState,
    source: Arc<Candidate>,
    decoy: Option<Candidate>,
    scores: Scores,
    ranks: Ranks,
    digestion: Option<Digestion>,
    target_experiment_size: usize,
    decoy_experiment_size: usize,
    pub b_y_ions_matched: u32,
    pub b_y_ions_possible: u32,
    pub delta_cn: f64,
    pub ln_delta_cn: f64,
    pub ln_experiment_size: f64,
    pub best_per_peptide: bool,
}

impl Match {
    fn new(
        spectrum: Arc<Spectrum>,
        zstate: ZState,
        source: Arc<Candidate>,
        decoy: Option<Candidate>,
    ) -> Self {
        Self {
            spectrum,
            zstate,
            source,
            decoy,
            scores: Scores::default(),
            ranks: Ranks::default(),
            digestion: None,
            target_experiment_size: 0,
            decoy_experiment_size: 0,
            b_y_ions_matched: 0,
            b_y_ions_possible: 0,
            delta_cn: 0.0,
            ln_delta_cn: 0.0,
            ln_experiment_size: 0.0,
            best_per_peptide: false,
        }
    }

    pub fn target(spectrum: Arc<Spectrum>, zstate: ZState, candidate: Arc<Candidate>) -> Self {
        Self::new(spectrum, zstate, candidate, None)
    }

    /// A match against `decoy`, which was derived from `source`
    pub fn decoy(
        spectrum: Arc<Spectrum>,
        zstate: ZState,
        source: Arc<Candidate>,
        decoy: Candidate,
    ) -> Self {
        Self::new(spectrum, zstate, source, Some(decoy))
    }

    pub fn is_decoy(&self) -> bool {
        self.decoy.is_some()
    }

    pub fn spectrum(&self) -> &Spectrum {
        &self.spectrum
    }

    pub fn scan(&self) -> u32 {
        self.spectrum.first_scan
    }

    pub fn zstate(&self) -> &ZState {
        &self.zstate
    }

    pub fn charge(&self) -> i32 {
        self.zstate.charge()
    }

    /// The candidate that was actually scored
    pub fn candidate(&self) -> &Candidate {
        self.decoy.as_ref().unwrap_or(&self.source)
    }

    /// The target candidate this match was derived from. Only used for digestion
    /// bookkeeping, never for scoring.
    pub fn source_candidate(&self) -> &Arc<Candidate> {
        &self.source
    }

    pub fn sequence(&self) -> String {
        self.candidate().sequence()
    }

    pub fn sequence_string(&self) -> String {
        self.candidate().sequence_string()
    }

    pub fn modified_sequence_with_symbols(&self) -> String {
        self.candidate().modified_sequence_with_symbols()
    }

    pub fn modified_sequence_with_masses(&self, merge: bool) -> String {
        self.candidate().modified_sequence_with_masses(merge)
    }

    pub fn score(&self, kind: ScoreKind) -> Result<ScoreType, MatchError> {
        self.scores
            .get(kind)
            .ok_or_else(|| MatchError::ScoreNotComputed {
                kind,
                scan: self.scan(),
                sequence: self.sequence_string(),
            })
    }

    #[inline]
    pub fn get_score(&self, kind: ScoreKind) -> Option<ScoreType> {
        self.scores.get(kind)
    }

    pub fn set_score(&mut self, kind: ScoreKind, value: ScoreType) {
        self.scores.set(kind, value);
    }

    pub fn has_score(&self, kind: ScoreKind) -> bool {
        self.scores.is_set(kind)
    }

    pub fn scores(&self) -> &Scores {
        &self.scores
    }

    pub fn rank(&self, kind: ScoreKind) -> Result<u32, MatchError> {
        self.ranks
            .get(kind)
            .ok_or_else(|| MatchError::RankNotComputed {
                kind,
                scan: self.scan(),
                sequence: self.sequence_string(),
            })
    }

    #[inline]
    pub fn get_rank(&self, kind: ScoreKind) -> Option<u32> {
        self.ranks.get(kind)
    }

    pub fn set_rank(&mut self, kind: ScoreKind, rank: u32) {
        self.ranks.set(kind, rank);
    }

    pub(crate) fn clear_ranks(&mut self) {
        for kind in ScoreKind::ALL {
            self.ranks.clear(kind);
        }
    }

    pub fn target_experiment_size(&self) -> usize {
        self.target_experiment_size
    }

    pub fn decoy_experiment_size(&self) -> usize {
        self.decoy_experiment_size
    }

    pub(crate) fn set_experiment_size(&mut self, targets: usize, decoys: usize) {
        self.target_experiment_size = targets;
        self.decoy_experiment_size = decoys;
    }

    /// Record how the source candidate was digested under `enzyme`
    pub fn assign_digestion(&mut self, enzyme: Enzyme) {
        self.digestion = Some(self.source.digestion(enzyme));
    }

    pub fn digestion(&self) -> Option<&Digestion> {
        self.digestion.as_ref()
    }

    pub fn b_y_ion_fraction_matched(&self) -> f64 {
        if self.b_y_ions_possible == 0 {
            0.0
        } else {
            self.b_y_ions_matched as f64 / self.b_y_ions_possible as f64
        }
    }

    /// Flatten the match into a serializable record for reporting
    pub fn to_record(&self) -> MatchRecord {
        let candidate = self.candidate();
        MatchRecord {
            scan: self.scan(),
            charge: self.charge(),
            precursor_mz: self.spectrum.precursor_mz,
            spectrum_neutral_mass: self.zstate.neutral_mass(),
            sequence: self.sequence_string(),
            proteins: candidate.proteins().into_iter().map(String::from).collect(),
            is_decoy: self.is_decoy(),
            sp: self.get_score(ScoreKind::Preliminary),
            xcorr: self.get_score(ScoreKind::Primary),
            p_value: self.get_score(ScoreKind::PValue),
            xcorr_qvalue: self.get_score(ScoreKind::PrimaryQValue),
            p_value_qvalue: self.get_score(ScoreKind::PValueQValue),
            percolator_score: self.get_score(ScoreKind::PercolatorScore),
            percolator_qvalue: self.get_score(ScoreKind::PercolatorQValue),
            qranker_score: self.get_score(ScoreKind::QRankerScore),
            qranker_qvalue: self.get_score(ScoreKind::QRankerQValue),
            sp_rank: self.get_rank(ScoreKind::Preliminary),
            xcorr_rank: self.get_rank(ScoreKind::Primary),
            delta_cn: self.delta_cn,
            ln_delta_cn: self.ln_delta_cn,
            ln_experiment_size: self.ln_experiment_size,
            b_y_ions_matched: self.b_y_ions_matched,
            b_y_ions_possible: self.b_y_ions_possible,
            target_experiment_size: self.target_experiment_size,
            decoy_experiment_size: self.decoy_experiment_size,
            best_per_peptide: self.best_per_peptide,
            digestion: self.digestion.map(|d| d.class()),
        }
    }
}

impl Display for Match {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Match({}, {}, {}{})",
            self.scan(),
            self.zstate,
            self.sequence_string(),
            if self.is_decoy() { ", decoy" } else { "" }
        )
    }
}

/// A flat, serializable view of a [`Match`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub scan: u32,
    pub charge: i32,
    pub precursor_mz: f64,
    pub spectrum_neutral_mass: f64,
    pub sequence: String,
    pub proteins: Vec<String>,
    pub is_decoy: bool,
    pub sp: Option<f64>,
    pub xcorr: Option<f64>,
    pub p_value: Option<f64>,
    pub xcorr_qvalue: Option<f64>,
    pub p_value_qvalue: Option<f64>,
    pub percolator_score: Option<f64>,
    pub percolator_qvalue: Option<f64>,
    pub qranker_score: Option<f64>,
    pub qranker_qvalue: Option<f64>,
    pub sp_rank: Option<u32>,
    pub xcorr_rank: Option<u32>,
    pub delta_cn: f64,
    pub ln_delta_cn: f64,
    pub ln_experiment_size: f64,
    pub b_y_ions_matched: u32,
    pub b_y_ions_possible: u32,
    pub target_experiment_size: usize,
    pub decoy_experiment_size: usize,
    pub best_per_peptide: bool,
    pub digestion: Option<DigestionClass>,
}

/// How to order matches when sorting a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Best score first, then by scan number
    Score(ScoreKind),
    /// By scan number, then best score first. Used when matches from many spectra are pooled.
    SpectrumThenScore(ScoreKind),
}

impl SortOrder {
    pub fn kind(&self) -> ScoreKind {
        match self {
            SortOrder::Score(k) | SortOrder::SpectrumThenScore(k) => *k,
        }
    }

    fn compare_scores(kind: ScoreKind, a: &Match, b: &Match) -> Ordering {
        match (a.get_score(kind), b.get_score(kind)) {
            (Some(x), Some(y)) => kind.interpretation().compare(x, y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }

    /// Compare two matches. Unscored matches sort after scored ones.
    ///
    /// Matches that compare equal here are ordered by [`MatchId`] by the owning collection.
    pub fn compare(&self, a: &Match, b: &Match) -> Ordering {
        match self {
            SortOrder::Score(kind) => {
                Self::compare_scores(*kind, a, b).then_with(|| a.scan().cmp(&b.scan()))
            }
            SortOrder::SpectrumThenScore(kind) => a
                .scan()
                .cmp(&b.scan())
                .then_with(|| Self::compare_scores(*kind, a, b)),
        }
    }

    pub fn compare_with_ids(&self, a: (MatchId, &Match), b: (MatchId, &Match)) -> Ordering {
        self.compare(a.1, b.1).then_with(|| a.0.cmp(&b.0))
    }
}

/// Shuffle `items[range]` in place with the Fisher-Yates algorithm, so every permutation of
/// the range is equally likely. Positions of `range` past the end of `items` are ignored.
pub fn shuffle_matches<T, R: Rng + ?Sized>(items: &mut [T], range: Range<usize>, rng: &mut R) {
    let end = range.end.min(items.len());
    let start = range.start;
    if start >= end {
        return;
    }
    for i in (start + 1..end).rev() {
        let j = rng.gen_range(start..=i);
        items.swap(i, j);
    }
}

#[cfg(test)]
mod test {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::candidate::Peptide;

    fn make_match(scan: u32, seq: &str, decoy: bool) -> Match {
        let spectrum = Arc::new(Spectrum::new(scan, scan, 500.0));
        let zstate = ZState::from_mz(500.0, 2);
        let candidate = Arc::new(Candidate::from(Peptide::parse(seq).unwrap()));
        if decoy {
            let mut rng = StdRng::seed_from_u64(scan as u64);
            let shuffled = candidate.shuffle(crate::candidate::DecoyKind::Reverse, &mut rng);
            Match::decoy(spectrum, zstate, candidate, shuffled)
        } else {
            Match::target(spectrum, zstate, candidate)
        }
    }

    #[test]
    fn test_score_access() {
        let mut m = make_match(3, "PEPTIDEK", false);
        let err = m.score(ScoreKind::Primary).unwrap_err();
        assert_eq!(
            err,
            MatchError::ScoreNotComputed {
                kind: ScoreKind::Primary,
                scan: 3,
                sequence: "PEPTIDEK".to_string()
            }
        );
        m.set_score(ScoreKind::Primary, 2.5);
        assert_eq!(m.score(ScoreKind::Primary).unwrap(), 2.5);
        assert!(m.rank(ScoreKind::Primary).is_err());
        m.set_rank(ScoreKind::Primary, 1);
        assert_eq!(m.rank(ScoreKind::Primary).unwrap(), 1);
        m.clear_ranks();
        assert!(m.get_rank(ScoreKind::Primary).is_none());
    }

    #[test]
    fn test_decoy_sequence() {
        let m = make_match(1, "PEPTIDEK", true);
        assert!(m.is_decoy());
        assert_eq!(m.sequence(), "PEDITPEK");
        assert_eq!(m.source_candidate().sequence(), "PEPTIDEK");
    }

    #[test]
    fn test_compare() {
        let mut a = make_match(2, "PEPTIDEK", false);
        let mut b = make_match(1, "PEPTIDER", false);
        let c = make_match(1, "PEPTIDEG", false);
        a.set_score(ScoreKind::Primary, 3.0);
        b.set_score(ScoreKind::Primary, 3.0);
        let order = SortOrder::Score(ScoreKind::Primary);
        assert_eq!(order.compare(&b, &a), Ordering::Less);
        assert_eq!(order.compare(&a, &c), Ordering::Less);

        a.set_score(ScoreKind::PValue, 0.01);
        b.set_score(ScoreKind::PValue, 0.5);
        let order = SortOrder::Score(ScoreKind::PValue);
        assert_eq!(order.compare(&a, &b), Ordering::Less);
        let order = SortOrder::SpectrumThenScore(ScoreKind::PValue);
        assert_eq!(order.compare(&a, &b), Ordering::Greater);
        assert_eq!(
            order.compare_with_ids((MatchId(0), &c), (MatchId(1), &c)),
            Ordering::Less
        );
    }

    #[test]
    fn test_shuffle_range() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut items: Vec<u32> = (0..10).collect();
        shuffle_matches(&mut items, 2..6, &mut rng);
        assert_eq!(&items[..2], &[0, 1]);
        assert_eq!(&items[6..], &[6, 7, 8, 9]);
        let mut mid = items[2..6].to_vec();
        mid.sort();
        assert_eq!(mid, vec![2, 3, 4, 5]);
        shuffle_matches(&mut items, 8..20, &mut rng);
        shuffle_matches(&mut items, 5..5, &mut rng);
    }

    #[test]
    fn test_record() {
        let mut m = make_match(4, "PEPTIDEK", false);
        m.set_score(ScoreKind::Primary, 1.5);
        m.assign_digestion(Enzyme::Trypsin);
        let rec = m.to_record();
        assert_eq!(rec.xcorr, Some(1.5));
        assert_eq!(rec.sp, None);
        assert_eq!(rec.digestion, Some(DigestionClass::Full));
        let text = serde_json::to_string(&rec).unwrap();
        assert!(text.contains("\"xcorr\":1.5"));
    }
}
