//! The spectrum-parallel search driver.
//!
//! Every spectrum-charge pairing is scored, ranked and truncated on its own worker with its
//! own [`MatchCollection`]. Statistics that need every spectrum, a pooled Weibull fit and the
//! global q-values, run after all workers finish.
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::candidate::{Candidate, CandidateLike};
use crate::charge::ZState;
use crate::collection::{CollectionError, MatchCollection};
use crate::config::SearchConfig;
use crate::features::PsmFeatures;
use crate::matches::{Match, MatchRecord};
use crate::qvalue::{decoy_qvalues, QValueError};
use crate::scorer::{PsmScorer, ScoreKind, ScoreType};
use crate::spectrum::Spectrum;
use crate::weibull::{fit_scores, WeibullError, WeibullFit, WeibullScope};

/// Supplies the target candidates to compare against a spectrum at one charge state.
///
/// The candidate database is read concurrently by every worker and must not change while a
/// search is running.
pub trait CandidateSource: Sync {
    fn candidates(&self, spectrum: &Spectrum, zstate: &ZState) -> Vec<Arc<Candidate>>;
}

impl<F> CandidateSource for F
where
    F: Fn(&Spectrum, &ZState) -> Vec<Arc<Candidate>> + Sync,
{
    fn candidates(&self, spectrum: &Spectrum, zstate: &ZState) -> Vec<Arc<Candidate>> {
        self(spectrum, zstate)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error("No candidates for scan {scan} at charge {charge}")]
    NoCandidates { scan: u32, charge: i32 },
    #[error("Failed to process scan {scan} at charge {charge}: {source}")]
    Collection {
        scan: u32,
        charge: i32,
        #[source]
        source: CollectionError,
    },
}

impl SearchError {
    pub fn scan(&self) -> u32 {
        match self {
            Self::NoCandidates { scan, .. } | Self::Collection { scan, .. } => *scan,
        }
    }
}

/// The retained matches for one spectrum at one charge state
#[derive(Debug, Clone)]
pub struct SpectrumMatches {
    pub scan: u32,
    pub zstate: ZState,
    pub collection: MatchCollection,
    /// The primary scores of every candidate compared, taken before truncation. Only
    /// recorded when fitting a pooled Weibull model.
    pub population: Vec<ScoreType>,
}

#[derive(Debug, Default)]
pub struct SearchResults {
    pub matches: Vec<SpectrumMatches>,
    /// Spectrum-charge pairings that were skipped, with the reason
    pub failures: Vec<SearchError>,
    /// The Weibull fit over all spectra when fitting a pooled population
    pub pooled_fit: Option<WeibullFit>,
}

impl SearchResults {
    /// Every retained match, in scan order and then score order
    pub fn iter(&self) -> impl Iterator<Item = &Match> + '_ {
        self.matches.iter().flat_map(|s| s.collection.iter())
    }

    pub fn records(&self) -> Vec<MatchRecord> {
        self.iter().map(|m| m.to_record()).collect()
    }

    /// The re-ranking features of every match with the scores they need
    pub fn features(&self, config: &SearchConfig) -> Vec<PsmFeatures> {
        self.iter()
            .filter_map(|m| PsmFeatures::from_match(m, config.mass_type).ok())
            .collect()
    }

    /// The best target for each spectrum-charge pairing
    pub fn best_targets(&self, kind: ScoreKind) -> impl Iterator<Item = &Match> + '_ {
        self.matches
            .iter()
            .filter_map(move |s| s.collection.best_target(kind))
    }
}

/// Runs searches with one configuration, candidate source and scorer
pub struct SearchEngine<C: CandidateSource, S: PsmScorer> {
    config: SearchConfig,
    candidates: C,
    scorer: S,
}

impl<C: CandidateSource, S: PsmScorer> SearchEngine<C, S> {
    pub fn new(config: SearchConfig, candidates: C, scorer: S) -> Self {
        Self {
            config,
            candidates,
            scorer,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Decoys for a scan and charge are drawn from their own generator, so results do not
    /// depend on which worker handles them.
    fn rng_for(&self, scan: u32, charge: i32) -> StdRng {
        let seed = self.config.decoys.seed ^ ((scan as u64) << 16) ^ (charge as u32 as u64);
        StdRng::seed_from_u64(seed)
    }

    fn score_into(&self, mut m: Match) -> Match {
        let score = self.scorer.score(m.spectrum(), m.zstate(), m.candidate());
        m.set_score(ScoreKind::Preliminary, score.preliminary);
        m.set_score(ScoreKind::Primary, score.primary);
        m.b_y_ions_matched = score.ions_matched;
        m.b_y_ions_possible = score.ions_possible;
        m
    }

    fn build_collection(
        &self,
        spectrum: &Arc<Spectrum>,
        zstate: ZState,
        candidates: Vec<Arc<Candidate>>,
    ) -> MatchCollection {
        let decoys = &self.config.decoys;
        let mut rng = self.rng_for(spectrum.first_scan, zstate.charge());
        let mut collection =
            MatchCollection::with_capacity(candidates.len() * (1 + decoys.decoys_per_target));
        for candidate in candidates {
            collection.add(self.score_into(Match::target(
                spectrum.clone(),
                zstate,
                candidate.clone(),
            )));
            let target_sequence = candidate.sequence_string();
            for _ in 0..decoys.decoys_per_target {
                let decoy = candidate.shuffle(decoys.kind, &mut rng);
                if decoy.sequence_string() == target_sequence {
                    debug!("No distinct decoy for {target_sequence}, skipping");
                    continue;
                }
                collection.add(self.score_into(Match::decoy(
                    spectrum.clone(),
                    zstate,
                    candidate.clone(),
                    decoy,
                )));
            }
        }
        collection
    }

    /// Fit a per-spectrum Weibull model and assign p-values. Too few matches or a poor fit
    /// leaves the matches without p-values.
    fn assign_local_p_values(
        &self,
        collection: &mut MatchCollection,
        scan: u32,
    ) -> Result<(), CollectionError> {
        let params = &self.config.weibull;
        match collection.fit_weibull(params) {
            Ok(fit) => {
                collection.assign_p_values(&fit, params.bonferroni);
                Ok(())
            }
            Err(CollectionError::Weibull(
                e @ (WeibullError::InsufficientData { .. }
                | WeibullError::CorrelationBelowThreshold { .. }),
            )) => {
                warn!("No Weibull fit for scan {scan}, falling back to decoy estimates: {e}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Score, rank and truncate the matches of one spectrum at one charge state.
    ///
    /// Targets are added ahead of their decoys, so a decoy never wins a tie against its
    /// own target.
    pub fn search_charge(
        &self,
        spectrum: &Arc<Spectrum>,
        zstate: ZState,
    ) -> Result<SpectrumMatches, SearchError> {
        let scan = spectrum.first_scan;
        let charge = zstate.charge();
        let candidates = self.candidates.candidates(spectrum, &zstate);
        if candidates.is_empty() {
            return Err(SearchError::NoCandidates { scan, charge });
        }
        let mut collection = self.build_collection(spectrum, zstate, candidates);
        let mut population = Vec::new();

        let mut process = || -> Result<(), CollectionError> {
            collection.populate_rank(ScoreKind::Preliminary)?;
            collection.populate_rank(ScoreKind::Primary)?;
            collection.compute_delta_cn(ScoreKind::Primary)?;
            collection.filter_best_per_peptide()?;
            collection.propagate_experiment_size();
            for m in collection.iter_mut() {
                m.assign_digestion(self.config.enzyme);
            }
            match self.config.weibull.scope {
                WeibullScope::PerSpectrum => self.assign_local_p_values(&mut collection, scan)?,
                WeibullScope::Pooled => population = collection.scores(ScoreKind::Primary),
            }
            collection.truncate(self.config.top_match, ScoreKind::Primary)?;
            Ok(())
        };
        process().map_err(|source| SearchError::Collection {
            scan,
            charge,
            source,
        })?;

        Ok(SpectrumMatches {
            scan,
            zstate,
            collection,
            population,
        })
    }

    /// Search every charge state selected for `spectrum`, looking its peaks up with the
    /// configured index parameters
    pub fn search_spectrum(
        &self,
        mut spectrum: Spectrum,
    ) -> Vec<Result<SpectrumMatches, SearchError>> {
        let span = tracing::debug_span!("search", scan = spectrum.first_scan);
        let _entered = span.enter();
        spectrum.set_index_params(self.config.peak_index);
        let zstates = spectrum.zstates_to_search(self.config.spectrum_charge);
        let spectrum = Arc::new(spectrum);
        zstates
            .into_iter()
            .map(|z| self.search_charge(&spectrum, z))
            .collect()
    }

    /// Search all `spectra` in parallel, then compute pooled statistics
    pub fn search(&self, spectra: Vec<Spectrum>) -> SearchResults {
        let n_spectra = spectra.len();
        let outcomes: Vec<Result<SpectrumMatches, SearchError>> = spectra
            .into_par_iter()
            .flat_map_iter(|spectrum| self.search_spectrum(spectrum))
            .collect();

        let mut results = SearchResults::default();
        for outcome in outcomes {
            match outcome {
                Ok(m) => results.matches.push(m),
                Err(e) => {
                    warn!("Skipping: {e}");
                    results.failures.push(e);
                }
            }
        }
        results
            .matches
            .sort_by(|a, b| a.scan.cmp(&b.scan).then(a.zstate.charge().cmp(&b.zstate.charge())));
        info!(
            "Searched {n_spectra} spectra, {} spectrum-charge pairs retained and {} skipped",
            results.matches.len(),
            results.failures.len()
        );

        if self.config.weibull.scope == WeibullScope::Pooled {
            results.pooled_fit = self.assign_pooled_p_values(&mut results.matches);
        }
        if let Err(e) = assign_global_qvalues(&mut results.matches, ScoreKind::Primary) {
            warn!("Could not estimate {} q-values: {e}", ScoreKind::Primary);
        }
        if results
            .matches
            .iter()
            .any(|s| s.collection.scored_type(ScoreKind::PValue))
        {
            if let Err(e) = assign_global_qvalues(&mut results.matches, ScoreKind::PValue) {
                warn!("Could not estimate {} q-values: {e}", ScoreKind::PValue);
            }
        }
        results
    }

    /// Fit one Weibull model to the score populations of every spectrum and assign p-values
    /// to the retained matches
    fn assign_pooled_p_values(&self, matches: &mut [SpectrumMatches]) -> Option<WeibullFit> {
        let params = &self.config.weibull;
        let pooled: Vec<ScoreType> = matches
            .iter()
            .flat_map(|s| s.population.iter().copied())
            .collect();
        match fit_scores(&pooled, params) {
            Ok(fit) => {
                let assigned: usize = matches
                    .iter_mut()
                    .map(|s| s.collection.assign_p_values(&fit, params.bonferroni))
                    .sum();
                debug!("Assigned {assigned} p-values from the pooled fit");
                Some(fit)
            }
            Err(e) => {
                warn!("Pooled Weibull fit failed, falling back to decoy estimates: {e}");
                None
            }
        }
    }
}

/// Estimate q-values for the best target of every spectrum-charge pairing against the best
/// decoy of every pairing, storing them under the q-value kind derived from `kind`.
pub fn assign_global_qvalues(
    matches: &mut [SpectrumMatches],
    kind: ScoreKind,
) -> Result<usize, CollectionError> {
    let qkind = kind
        .qvalue_kind()
        .ok_or(CollectionError::NoQValueKind { kind })?;
    let mut owners = Vec::new();
    let mut targets = Vec::new();
    let mut decoys = Vec::new();
    for (i, s) in matches.iter().enumerate() {
        if let Some(id) = s.collection.best_target_id(kind) {
            if let Some(score) = s.collection.get(id).and_then(|m| m.get_score(kind)) {
                owners.push((i, id));
                targets.push(score);
            }
        }
        if let Some(score) = s
            .collection
            .best_decoy(kind)
            .and_then(|m| m.get_score(kind))
        {
            decoys.push(score);
        }
    }
    if decoys.is_empty() && !targets.is_empty() {
        return Err(QValueError::NoDecoys {
            targets: targets.len(),
        }
        .into());
    }
    let qvalues = decoy_qvalues(&targets, &decoys, kind.interpretation())?;
    for ((i, id), q) in owners.into_iter().zip(qvalues) {
        if let Some(m) = matches[i].collection.get_mut(id) {
            m.set_score(qkind, q);
        }
    }
    debug!(
        "Assigned {} {qkind} values against {} decoys",
        targets.len(),
        decoys.len()
    );
    Ok(targets.len())
}
