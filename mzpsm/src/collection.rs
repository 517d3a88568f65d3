//! Aggregation, ordering and ranking of the matches for one spectrum, or for a pooled set of
//! spectra when fitting global statistics.
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use rand::Rng;
use thiserror::Error;
use tracing::{debug, trace};

use crate::matches::{shuffle_matches, Match, MatchError, MatchId, SortOrder};
use crate::qvalue::{decoy_qvalues, QValueError};
use crate::scorer::{ScoreKind, ScoreType};
use crate::weibull::{bonferroni_correct, fit_scores, WeibullError, WeibullFit, WeibullParams};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CollectionError {
    #[error("No match in the collection has a {kind} score")]
    NotScored { kind: ScoreKind },
    #[error("There is no q-value derived from the {kind} score")]
    NoQValueKind { kind: ScoreKind },
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Weibull(#[from] WeibullError),
    #[error(transparent)]
    QValue(#[from] QValueError),
}

/// Owns the matches for one spectrum-charge pairing.
///
/// Matches are stored in insertion order and addressed by [`MatchId`]. Sorting only
/// reorders a view over them, so ids stay valid until [`MatchCollection::truncate`]
/// compacts the collection.
#[derive(Debug, Clone, Default)]
pub struct MatchCollection {
    matches: Vec<Match>,
    order: Vec<MatchId>,
    sorted_by: Option<SortOrder>,
    ranked: [bool; ScoreKind::COUNT],
    target_experiment_size: usize,
    decoy_experiment_size: usize,
    weibull_fit: Option<WeibullFit>,
}

impl MatchCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            matches: Vec::with_capacity(capacity),
            order: Vec::with_capacity(capacity),
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    fn invalidate_ranks(&mut self) {
        if self.ranked.iter().any(|r| *r) {
            for m in self.matches.iter_mut() {
                m.clear_ranks();
            }
            self.ranked = [false; ScoreKind::COUNT];
        }
    }

    /// Add a match to the collection, counting it towards the target or decoy experiment
    /// size. Any ranks computed so far are discarded.
    pub fn add(&mut self, m: Match) -> MatchId {
        self.invalidate_ranks();
        if m.is_decoy() {
            self.decoy_experiment_size += 1;
        } else {
            self.target_experiment_size += 1;
        }
        let id = MatchId(self.matches.len() as u32);
        self.matches.push(m);
        self.order.push(id);
        self.sorted_by = None;
        id
    }

    pub fn get(&self, id: MatchId) -> Option<&Match> {
        self.matches.get(id.index())
    }

    /// Mutable access to one match. The current order is treated as stale afterwards, so the
    /// next sort-dependent operation sorts again.
    pub fn get_mut(&mut self, id: MatchId) -> Option<&mut Match> {
        self.sorted_by = None;
        self.matches.get_mut(id.index())
    }

    /// Iterate over the matches in the current order
    pub fn iter(&self) -> impl Iterator<Item = &Match> + '_ {
        self.order.iter().map(move |i| &self.matches[i.index()])
    }

    /// Iterate mutably over the matches in insertion order. As with
    /// [`MatchCollection::get_mut`], the current order is treated as stale afterwards.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Match> + '_ {
        self.sorted_by = None;
        self.matches.iter_mut()
    }

    pub fn ids(&self) -> &[MatchId] {
        &self.order
    }

    pub fn sorted_by(&self) -> Option<SortOrder> {
        self.sorted_by
    }

    pub fn is_ranked(&self, kind: ScoreKind) -> bool {
        self.ranked[kind.index()]
    }

    /// The number of target candidates evaluated, including any since truncated
    pub fn target_experiment_size(&self) -> usize {
        self.target_experiment_size
    }

    /// The number of decoy candidates evaluated, including any since truncated
    pub fn decoy_experiment_size(&self) -> usize {
        self.decoy_experiment_size
    }

    pub fn weibull_fit(&self) -> Option<&WeibullFit> {
        self.weibull_fit.as_ref()
    }

    /// Whether any match carries a score of `kind`
    pub fn scored_type(&self, kind: ScoreKind) -> bool {
        self.matches.iter().any(|m| m.has_score(kind))
    }

    pub fn sort(&mut self, order: SortOrder) -> Result<(), CollectionError> {
        let kind = order.kind();
        if !self.scored_type(kind) {
            return Err(CollectionError::NotScored { kind });
        }
        let matches = &self.matches;
        self.order.sort_unstable_by(|a, b| {
            order.compare_with_ids((*a, &matches[a.index()]), (*b, &matches[b.index()]))
        });
        self.sorted_by = Some(order);
        trace!("Sorted {} matches by {order:?}", self.matches.len());
        Ok(())
    }

    /// Sort by `kind` if needed and give each scored match its position in that order,
    /// starting from 1. Equal scores get distinct, order-consistent ranks.
    pub fn populate_rank(&mut self, kind: ScoreKind) -> Result<(), CollectionError> {
        let order = SortOrder::Score(kind);
        if self.sorted_by != Some(order) {
            self.sort(order)?;
        }
        let mut rank = 0u32;
        for id in self.order.iter() {
            let m = &mut self.matches[id.index()];
            if m.has_score(kind) {
                rank += 1;
                m.set_rank(kind, rank);
            }
        }
        self.ranked[kind.index()] = true;
        Ok(())
    }

    /// Flag the best scoring match of each distinct peptide as `best_per_peptide`, clearing the
    /// flag on the rest. Ties go to the match added first.
    pub fn filter_best_per_peptide(&mut self) -> Result<usize, CollectionError> {
        let kind = ScoreKind::Primary;
        if !self.scored_type(kind) {
            return Err(CollectionError::NotScored { kind });
        }
        let interp = kind.interpretation();
        let mut best: HashMap<String, (MatchId, ScoreType)> = HashMap::new();
        for (i, m) in self.matches.iter().enumerate() {
            let Some(score) = m.get_score(kind) else {
                continue;
            };
            let id = MatchId(i as u32);
            match best.entry(m.modified_sequence_with_masses(true)) {
                Entry::Occupied(mut e) => {
                    if interp.is_better(score, e.get().1) {
                        e.insert((id, score));
                    }
                }
                Entry::Vacant(e) => {
                    e.insert((id, score));
                }
            }
        }
        for m in self.matches.iter_mut() {
            m.best_per_peptide = false;
        }
        for (id, _) in best.values() {
            self.matches[id.index()].best_per_peptide = true;
        }
        Ok(best.len())
    }

    pub fn targets(&self) -> impl Iterator<Item = &Match> + '_ {
        self.iter().filter(|m| !m.is_decoy())
    }

    pub fn decoys(&self) -> impl Iterator<Item = &Match> + '_ {
        self.iter().filter(|m| m.is_decoy())
    }

    /// Split the collection's ids, in current order, into targets and decoys
    pub fn partition(&self) -> (Vec<MatchId>, Vec<MatchId>) {
        self.order
            .iter()
            .copied()
            .partition(|id| !self.matches[id.index()].is_decoy())
    }

    /// Randomly reorder the matches
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let n = self.order.len();
        shuffle_matches(&mut self.order, 0..n, rng);
        self.sorted_by = None;
    }

    /// Keep only the best `n` matches by `kind`.
    ///
    /// This compacts the collection, so previously issued [`MatchId`]s no longer apply.
    /// The experiment sizes are unchanged.
    pub fn truncate(&mut self, n: usize, kind: ScoreKind) -> Result<(), CollectionError> {
        let order = SortOrder::Score(kind);
        if self.sorted_by != Some(order) {
            self.sort(order)?;
        }
        if n >= self.matches.len() {
            return Ok(());
        }
        let mut slots: Vec<Option<Match>> = self.matches.drain(..).map(Some).collect();
        let kept: Vec<Match> = self
            .order
            .iter()
            .take(n)
            .filter_map(|id| slots[id.index()].take())
            .collect();
        debug!("Truncated {} matches to {}", slots.len(), kept.len());
        self.matches = kept;
        self.order = (0..self.matches.len() as u32).map(MatchId).collect();
        Ok(())
    }

    /// Compute each match's normalized gap to the next match by `kind`.
    ///
    /// For the `i`th match in score order, `delta_cn = |s[i] - s[i + 1]| / |s[0]|`, and the
    /// last match gets 0. `ln_delta_cn` is the log of a positive `delta_cn` and 0 otherwise.
    pub fn compute_delta_cn(&mut self, kind: ScoreKind) -> Result<(), CollectionError> {
        let order = SortOrder::Score(kind);
        if self.sorted_by != Some(order) {
            self.sort(order)?;
        }
        let scored: Vec<(MatchId, ScoreType)> = self
            .order
            .iter()
            .filter_map(|id| {
                self.matches[id.index()]
                    .get_score(kind)
                    .map(|s| (*id, s))
            })
            .collect();
        let Some((_, top)) = scored.first().copied() else {
            return Ok(());
        };
        let norm = top.abs();
        for (i, (id, s)) in scored.iter().enumerate() {
            let delta = match scored.get(i + 1) {
                Some((_, next)) if norm > 0.0 => (s - next).abs() / norm,
                _ => 0.0,
            };
            let m = &mut self.matches[id.index()];
            m.delta_cn = delta;
            m.ln_delta_cn = if delta > 0.0 { delta.ln() } else { 0.0 };
        }
        Ok(())
    }

    /// Copy the collection's experiment sizes onto every match, along with the log of the
    /// target experiment size
    pub fn propagate_experiment_size(&mut self) {
        let targets = self.target_experiment_size;
        let decoys = self.decoy_experiment_size;
        let ln_size = if targets > 0 {
            (targets as f64).ln()
        } else {
            0.0
        };
        for m in self.matches.iter_mut() {
            m.set_experiment_size(targets, decoys);
            m.ln_experiment_size = ln_size;
        }
    }

    /// Move every match of `other` into this collection, summing experiment sizes
    pub fn merge(&mut self, other: MatchCollection) {
        self.invalidate_ranks();
        let offset = self.matches.len() as u32;
        self.target_experiment_size += other.target_experiment_size;
        self.decoy_experiment_size += other.decoy_experiment_size;
        self.order
            .extend(other.order.iter().map(|id| MatchId(id.0 + offset)));
        self.matches.extend(other.matches);
        self.sorted_by = None;
    }

    /// The best scoring target match by `kind`
    pub fn best_target(&self, kind: ScoreKind) -> Option<&Match> {
        self.best_where(kind, |m| !m.is_decoy()).map(|(_, m)| m)
    }

    /// The best scoring decoy match by `kind`
    pub fn best_decoy(&self, kind: ScoreKind) -> Option<&Match> {
        self.best_where(kind, |m| m.is_decoy()).map(|(_, m)| m)
    }

    pub fn best_target_id(&self, kind: ScoreKind) -> Option<MatchId> {
        self.best_where(kind, |m| !m.is_decoy()).map(|(id, _)| id)
    }

    fn best_where<F: Fn(&Match) -> bool>(
        &self,
        kind: ScoreKind,
        pred: F,
    ) -> Option<(MatchId, &Match)> {
        let order = SortOrder::Score(kind);
        self.matches
            .iter()
            .enumerate()
            .map(|(i, m)| (MatchId(i as u32), m))
            .filter(|(_, m)| m.has_score(kind) && pred(m))
            .min_by(|a, b| order.compare_with_ids(*a, *b))
    }

    /// The scores of `kind` over all matches
    pub fn scores(&self, kind: ScoreKind) -> Vec<ScoreType> {
        self.matches.iter().filter_map(|m| m.get_score(kind)).collect()
    }

    /// Fit a Weibull tail model to the primary scores of every match and remember it
    pub fn fit_weibull(&mut self, params: &WeibullParams) -> Result<WeibullFit, CollectionError> {
        let scores = self.scores(ScoreKind::Primary);
        let fit = fit_scores(&scores, params)?;
        self.weibull_fit = Some(fit);
        Ok(fit)
    }

    /// Assign p-values from `fit` to every match with a primary score. With `bonferroni`,
    /// each p-value is corrected for the number of targets compared against its spectrum.
    pub fn assign_p_values(&mut self, fit: &WeibullFit, bonferroni: bool) -> usize {
        let mut assigned = 0;
        let n = self.target_experiment_size;
        for m in self.matches.iter_mut() {
            let Some(score) = m.get_score(ScoreKind::Primary) else {
                continue;
            };
            let mut p = fit.p_value(score);
            if bonferroni {
                let n = if m.target_experiment_size() > 0 {
                    m.target_experiment_size()
                } else {
                    n
                };
                p = bonferroni_correct(p, n);
            }
            m.set_score(ScoreKind::PValue, p);
            assigned += 1;
        }
        assigned
    }

    /// Estimate q-values for the targets by `kind` against the decoys in this collection and
    /// store them under the q-value kind derived from `kind`
    pub fn assign_decoy_qvalues(&mut self, kind: ScoreKind) -> Result<usize, CollectionError> {
        let qkind = kind
            .qvalue_kind()
            .ok_or(CollectionError::NoQValueKind { kind })?;
        if !self.scored_type(kind) {
            return Err(CollectionError::NotScored { kind });
        }
        let mut target_ids = Vec::new();
        let mut target_scores = Vec::new();
        let mut decoy_scores = Vec::new();
        for (i, m) in self.matches.iter().enumerate() {
            let Some(s) = m.get_score(kind) else { continue };
            if m.is_decoy() {
                decoy_scores.push(s);
            } else {
                target_ids.push(i);
                target_scores.push(s);
            }
        }
        let qvalues = decoy_qvalues(&target_scores, &decoy_scores, kind.interpretation())?;
        for (i, q) in target_ids.iter().zip(qvalues) {
            self.matches[*i].set_score(qkind, q);
        }
        Ok(target_ids.len())
    }
}

impl FromIterator<Match> for MatchCollection {
    fn from_iter<T: IntoIterator<Item = Match>>(iter: T) -> Self {
        let mut this = Self::new();
        for m in iter {
            this.add(m);
        }
        this
    }
}

impl Extend<Match> for MatchCollection {
    fn extend<T: IntoIterator<Item = Match>>(&mut self, iter: T) {
        for m in iter {
            self.add(m);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::candidate::{Candidate, Peptide};
    use crate::charge::ZState;
    use crate::spectrum::Spectrum;

    fn collection(scores: &[(&str, f64, bool)]) -> MatchCollection {
        let spectrum = Arc::new(Spectrum::new(7, 7, 600.0));
        let z = ZState::from_mz(600.0, 2);
        scores
            .iter()
            .map(|(seq, score, decoy)| {
                let cand = Arc::new(Candidate::from(Peptide::parse(seq).unwrap()));
                let mut m = if *decoy {
                    let d = Candidate::from(Peptide::parse(seq).unwrap());
                    Match::decoy(spectrum.clone(), z, cand, d)
                } else {
                    Match::target(spectrum.clone(), z, cand)
                };
                m.set_score(ScoreKind::Primary, *score);
                m
            })
            .collect()
    }

    #[test]
    fn test_sort_and_rank() {
        let mut c = collection(&[
            ("PEPTIDEK", 1.0, false),
            ("PEPTIDER", 3.0, false),
            ("PEPTLDEK", 2.0, true),
            ("PEPTIDEG", 3.0, false),
        ]);
        assert_eq!(c.target_experiment_size(), 3);
        assert_eq!(c.decoy_experiment_size(), 1);
        c.populate_rank(ScoreKind::Primary).unwrap();
        let ranked: Vec<(String, u32)> = c
            .iter()
            .map(|m| (m.sequence(), m.rank(ScoreKind::Primary).unwrap()))
            .collect();
        assert_eq!(
            ranked,
            vec![
                ("PEPTIDER".to_string(), 1),
                ("PEPTIDEG".to_string(), 2),
                ("PEPTLDEK".to_string(), 3),
                ("PEPTIDEK".to_string(), 4),
            ]
        );
        assert!(c.is_ranked(ScoreKind::Primary));

        assert_eq!(
            c.sort(SortOrder::Score(ScoreKind::PValue)),
            Err(CollectionError::NotScored {
                kind: ScoreKind::PValue
            })
        );
    }

    #[test]
    fn test_add_invalidates_ranks() {
        let mut c = collection(&[("PEPTIDEK", 1.0, false), ("PEPTIDER", 3.0, false)]);
        c.populate_rank(ScoreKind::Primary).unwrap();
        let extra = collection(&[("PEPTIDEG", 2.0, false)]);
        c.merge(extra);
        assert!(!c.is_ranked(ScoreKind::Primary));
        assert!(c.iter().all(|m| m.rank(ScoreKind::Primary).is_err()));
        assert_eq!(c.target_experiment_size(), 3);
        c.populate_rank(ScoreKind::Primary).unwrap();
        let mut ranks: Vec<u32> = c
            .iter()
            .map(|m| m.rank(ScoreKind::Primary).unwrap())
            .collect();
        ranks.sort();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_rerank_after_mutation() {
        let mut c = collection(&[
            ("PEPTIDEK", 3.0, false),
            ("PEPTIDER", 2.0, false),
            ("PEPTIDEG", 1.0, false),
        ]);
        c.populate_rank(ScoreKind::Primary).unwrap();
        let last = c.ids()[2];
        c.get_mut(last).unwrap().set_score(ScoreKind::Primary, 10.0);
        assert_eq!(c.sorted_by(), None);
        c.populate_rank(ScoreKind::Primary).unwrap();
        let ranked: Vec<(f64, u32)> = c
            .iter()
            .map(|m| {
                (
                    m.score(ScoreKind::Primary).unwrap(),
                    m.rank(ScoreKind::Primary).unwrap(),
                )
            })
            .collect();
        assert_eq!(ranked, vec![(10.0, 1), (3.0, 2), (2.0, 3)]);

        for m in c.iter_mut() {
            let s = m.score(ScoreKind::Primary).unwrap();
            m.set_score(ScoreKind::Primary, -s);
        }
        c.populate_rank(ScoreKind::Primary).unwrap();
        assert_eq!(c.iter().next().unwrap().score(ScoreKind::Primary).unwrap(), -2.0);
        assert_eq!(c.get(last).unwrap().rank(ScoreKind::Primary).unwrap(), 3);
    }

    #[test]
    fn test_unscored_matches_are_unranked() {
        let mut c = collection(&[("PEPTIDEK", 1.0, false)]);
        let spectrum = Arc::new(Spectrum::new(7, 7, 600.0));
        let cand = Arc::new(Candidate::from(Peptide::parse("AAAK").unwrap()));
        let id = c.add(Match::target(spectrum, ZState::from_mz(600.0, 2), cand));
        c.populate_rank(ScoreKind::Primary).unwrap();
        assert!(c.get(id).unwrap().get_rank(ScoreKind::Primary).is_none());
        assert_eq!(c.iter().last().unwrap().sequence(), "AAAK");
    }

    #[test]
    fn test_best_per_peptide() {
        let mut c = collection(&[
            ("PEPTIDEK", 1.0, false),
            ("PEPTIDEK", 4.0, false),
            ("AAAK", 2.0, false),
        ]);
        assert_eq!(c.filter_best_per_peptide().unwrap(), 2);
        let flags: Vec<bool> = c
            .ids()
            .iter()
            .map(|id| c.get(*id).unwrap().best_per_peptide)
            .collect();
        assert_eq!(flags, vec![false, true, true]);
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn test_truncate_and_delta() {
        let mut c = collection(&[
            ("PEPTIDEK", 1.0, false),
            ("PEPTIDER", 4.0, false),
            ("AAAK", 2.0, false),
            ("GGGK", 3.0, true),
        ]);
        c.truncate(3, ScoreKind::Primary).unwrap();
        assert_eq!(c.len(), 3);
        assert_eq!(c.target_experiment_size(), 3);
        let seqs: Vec<String> = c.iter().map(|m| m.sequence()).collect();
        assert_eq!(seqs, vec!["PEPTIDER", "GGGK", "AAAK"]);

        c.compute_delta_cn(ScoreKind::Primary).unwrap();
        let deltas: Vec<f64> = c.iter().map(|m| m.delta_cn).collect();
        assert_eq!(deltas, vec![0.25, 0.25, 0.0]);
        let first = c.iter().next().unwrap();
        assert!((first.ln_delta_cn - 0.25f64.ln()).abs() < 1e-12);

        c.propagate_experiment_size();
        assert!(c
            .iter()
            .all(|m| (m.ln_experiment_size - 3.0f64.ln()).abs() < 1e-12));
        assert!(c.iter().all(|m| m.decoy_experiment_size() == 1));
    }

    #[test]
    fn test_partition_and_best() {
        let c = collection(&[
            ("PEPTIDEK", 1.0, false),
            ("GGGK", 3.0, true),
            ("AAAK", 2.0, false),
            ("GGGR", 0.5, true),
        ]);
        let (targets, decoys) = c.partition();
        assert_eq!(targets.len(), 2);
        assert_eq!(decoys.len(), 2);
        assert_eq!(c.targets().count(), 2);
        assert_eq!(c.decoys().count(), 2);
        assert_eq!(c.best_target(ScoreKind::Primary).unwrap().sequence(), "AAAK");
        assert_eq!(c.best_decoy(ScoreKind::Primary).unwrap().sequence(), "GGGK");
        assert!(c.best_target(ScoreKind::PValue).is_none());
    }

    #[test]
    fn test_qvalues() {
        let mut c = collection(&[
            ("PEPTIDEK", 10.0, false),
            ("PEPTIDER", 9.0, false),
            ("AAAK", 8.0, false),
            ("GGGK", 7.0, false),
            ("GGGR", 9.0, true),
            ("GGAR", 5.0, true),
        ]);
        assert_eq!(c.assign_decoy_qvalues(ScoreKind::Primary).unwrap(), 4);
        let q: Vec<f64> = c
            .targets()
            .map(|m| m.score(ScoreKind::PrimaryQValue).unwrap())
            .collect();
        assert_eq!(q, vec![0.0, 0.5, 0.5, 0.5]);
        assert!(c
            .decoys()
            .all(|m| m.get_score(ScoreKind::PrimaryQValue).is_none()));
        assert_eq!(
            c.assign_decoy_qvalues(ScoreKind::Preliminary),
            Err(CollectionError::NoQValueKind {
                kind: ScoreKind::Preliminary
            })
        );
    }

    #[test]
    fn test_shuffle_keeps_members() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;
        let mut c = collection(&[
            ("PEPTIDEK", 1.0, false),
            ("PEPTIDER", 4.0, false),
            ("AAAK", 2.0, false),
        ]);
        c.sort(SortOrder::Score(ScoreKind::Primary)).unwrap();
        let mut rng = StdRng::seed_from_u64(11);
        c.shuffle(&mut rng);
        assert!(c.sorted_by().is_none());
        let mut ids: Vec<u32> = c.ids().iter().map(|i| i.0).collect();
        ids.sort();
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
