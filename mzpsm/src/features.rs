//! Per-match features for external re-ranking models
use serde::Serialize;

use crate::candidate::{CandidateLike, MassType};
use crate::matches::{Match, MatchError};
use crate::scorer::ScoreKind;

/// Column names in the order produced by [`PsmFeatures::to_vec`]
pub const FEATURE_NAMES: [&str; 17] = [
    "XCorr", "DeltCN", "DeltLCN", "Sp", "lnrSp", "dM", "absdM", "Mass", "ionFrac", "lnSM", "enzN",
    "enzC", "enzInt", "pepLen", "charge1", "charge2", "charge3",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Features of a scored match
pub struct PsmFeatures {
    pub scan: u32,
    /// -1 for decoys, 1 for targets
    pub label: i32,
    /// Primary score
    pub xcorr: f64,
    pub delta_cn: f64,
    pub ln_delta_cn: f64,
    /// Preliminary score
    pub sp: f64,
    /// Log of the preliminary score rank
    pub ln_rank_sp: f64,
    /// Observed minus calculated neutral mass
    pub delta_mass: f64,
    pub abs_delta_mass: f64,
    /// Observed neutral mass
    pub mass: f64,
    pub ion_fraction: f64,
    pub ln_experiment_size: f64,
    pub enz_n: bool,
    pub enz_c: bool,
    /// Missed cleavages
    pub enz_int: usize,
    pub peptide_length: usize,
    pub charge1: bool,
    pub charge2: bool,
    pub charge3: bool,
}

impl PsmFeatures {
    /// Collect the features of `m`. The primary and preliminary scores and the preliminary
    /// rank must already be computed.
    pub fn from_match(m: &Match, mass_type: MassType) -> Result<Self, MatchError> {
        let xcorr = m.score(ScoreKind::Primary)?;
        let sp = m.score(ScoreKind::Preliminary)?;
        let sp_rank = m.rank(ScoreKind::Preliminary)?;
        let observed = m.zstate().neutral_mass();
        let calculated = m.candidate().compute_mass(mass_type);
        let delta_mass = observed - calculated;
        let (enz_n, enz_c, enz_int) = m
            .digestion()
            .map(|d| (d.n_terminal, d.c_terminal, d.missed_cleavages))
            .unwrap_or((false, false, 0));
        let charge = m.charge();
        Ok(Self {
            scan: m.scan(),
            label: if m.is_decoy() { -1 } else { 1 },
            xcorr,
            delta_cn: m.delta_cn,
            ln_delta_cn: m.ln_delta_cn,
            sp,
            ln_rank_sp: (sp_rank as f64).ln(),
            delta_mass,
            abs_delta_mass: delta_mass.abs(),
            mass: observed,
            ion_fraction: m.b_y_ion_fraction_matched(),
            ln_experiment_size: m.ln_experiment_size,
            enz_n,
            enz_c,
            enz_int,
            peptide_length: m.candidate().len(),
            charge1: charge == 1,
            charge2: charge == 2,
            charge3: charge >= 3,
        })
    }

    /// The numeric feature vector, ordered as [`FEATURE_NAMES`]
    pub fn to_vec(&self) -> Vec<f64> {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        vec![
            self.xcorr,
            self.delta_cn,
            self.ln_delta_cn,
            self.sp,
            self.ln_rank_sp,
            self.delta_mass,
            self.abs_delta_mass,
            self.mass,
            self.ion_fraction,
            self.ln_experiment_size,
            flag(self.enz_n),
            flag(self.enz_c),
            self.enz_int as f64,
            self.peptide_length as f64,
            flag(self.charge1),
            flag(self.charge2),
            flag(self.charge3),
        ]
    }
}
