//! Peptide candidates, their masses, digestion properties and decoy forms.
//!
//! A search scores three shapes of candidate: ordinary linear peptides, peptides looped
//! back onto themselves by a cross-linker, and pairs of peptides joined by a cross-linker.
//! [`Candidate`] carries all three and [`CandidateLike`] is the interface the rest of the
//! crate uses so that ranking logic never needs to know which shape it has.
use std::fmt::{Display, Write as _};
use std::ops::Range;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::charge::{mass_charge_ratio, ChargeRangeIter};

pub const WATER_MONOISOTOPIC: f64 = 18.0105646863;
pub const WATER_AVERAGE: f64 = 18.01528;

/// The number of times a shuffle is retried when it reproduces the input sequence
const MAX_SHUFFLE_ATTEMPTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandidateError {
    #[error("Unknown residue '{residue}' at position {position}")]
    UnknownResidue { residue: char, position: usize },
    #[error("Empty peptide sequence")]
    Empty,
    #[error("Malformed modification \"{text}\" at position {position}")]
    MalformedModification { text: String, position: usize },
    #[error("Link site {site} is outside of a peptide of length {length}")]
    InvalidLinkSite { site: usize, length: usize },
    #[error("Position {position} is outside of a peptide of length {length}")]
    PositionOutOfRange { position: usize, length: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MassType {
    #[default]
    Monoisotopic,
    Average,
}

impl MassType {
    pub fn water(&self) -> f64 {
        match self {
            MassType::Monoisotopic => WATER_MONOISOTOPIC,
            MassType::Average => WATER_AVERAGE,
        }
    }
}

/// The mass of an amino acid residue, or `None` if the code is not a known amino acid
pub fn residue_mass(aa: char, mass_type: MassType) -> Option<f64> {
    let (mono, avg) = match aa {
        'A' => (71.037114, 71.0788),
        'R' => (156.101111, 156.1875),
        'N' => (114.042927, 114.1038),
        'D' => (115.026943, 115.0886),
        'C' => (103.009185, 103.1388),
        'E' => (129.042593, 129.1155),
        'Q' => (128.058578, 128.1307),
        'G' => (57.021464, 57.0519),
        'H' => (137.058912, 137.1411),
        'I' | 'L' => (113.084064, 113.1594),
        'K' => (128.094963, 128.1741),
        'M' => (131.040485, 131.1926),
        'F' => (147.068414, 147.1766),
        'P' => (97.052764, 97.1167),
        'S' => (87.032028, 87.0782),
        'T' => (101.047679, 101.1051),
        'W' => (186.079313, 186.2132),
        'Y' => (163.063329, 163.1760),
        'V' => (99.068414, 99.1326),
        'U' => (150.953636, 150.0379),
        'O' => (237.147727, 237.2982),
        _ => return None,
    };
    Some(match mass_type {
        MassType::Monoisotopic => mono,
        MassType::Average => avg,
    })
}

/// A mass shift attached to a residue
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub symbol: Option<char>,
    pub mass_delta: f64,
}

impl Modification {
    pub fn new(mass_delta: f64) -> Self {
        Self {
            symbol: None,
            mass_delta,
        }
    }

    pub fn with_symbol(symbol: char, mass_delta: f64) -> Self {
        Self {
            symbol: Some(symbol),
            mass_delta,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Residue {
    pub aa: char,
    pub modifications: Vec<Modification>,
}

impl Residue {
    pub fn new(aa: char) -> Self {
        Self {
            aa,
            modifications: Vec::new(),
        }
    }

    pub fn modification_mass(&self) -> f64 {
        self.modifications.iter().map(|m| m.mass_delta).sum()
    }

    fn mass(&self, mass_type: MassType) -> f64 {
        residue_mass(self.aa, mass_type).unwrap_or_default() + self.modification_mass()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Enzyme {
    #[default]
    Trypsin,
    Chymotrypsin,
    Elastase,
    /// Every peptide bond is a cleavage site
    NoEnzyme,
}

impl Enzyme {
    /// Whether the enzyme cuts the bond between `prev` and `next`. The protein termini,
    /// written as `-`, always count as cleavage sites.
    pub fn cleaves(&self, prev: char, next: char) -> bool {
        if prev == '-' || next == '-' {
            return true;
        }
        match self {
            Enzyme::Trypsin => matches!(prev, 'K' | 'R') && next != 'P',
            Enzyme::Chymotrypsin => matches!(prev, 'F' | 'W' | 'Y') && next != 'P',
            Enzyme::Elastase => matches!(prev, 'A' | 'L' | 'I' | 'V') && next != 'P',
            Enzyme::NoEnzyme => true,
        }
    }
}

/// How many of a peptide's termini are consistent with the enzyme
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DigestionClass {
    NonSpecific,
    Partial,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Digestion {
    pub n_terminal: bool,
    pub c_terminal: bool,
    pub missed_cleavages: usize,
}

impl Digestion {
    pub fn class(&self) -> DigestionClass {
        match (self.n_terminal, self.c_terminal) {
            (true, true) => DigestionClass::Full,
            (false, false) => DigestionClass::NonSpecific,
            _ => DigestionClass::Partial,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoyKind {
    /// Randomly permute the residues between the termini
    #[default]
    Shuffle,
    /// Reverse the residues between the termini
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IonSeries {
    B,
    Y,
}

/// A predicted fragment ion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentIon {
    pub series: IonSeries,
    /// The number of residues the fragment contains
    pub ordinal: usize,
    pub charge: i32,
    pub mz: f64,
}

/// A linear peptide with its flanking residues and source proteins.
#[derive(Debug, Clone, PartialEq)]
pub struct Peptide {
    residues: Vec<Residue>,
    pub prev_aa: char,
    pub next_aa: char,
    pub proteins: Vec<String>,
}

impl Peptide {
    /// Parse a peptide sequence.
    ///
    /// Accepts plain residue codes, optionally wrapped in flanking residues as `K.PEPTIDE.R`,
    /// with modification masses in brackets after the residue they modify, e.g. `PEPM[15.99]K`
    /// or `PEPS[79.97,1.00]K`.
    pub fn parse(text: &str) -> Result<Self, CandidateError> {
        let text = text.trim();
        let (prev_aa, core, next_aa) = split_flanks(text);
        let mut residues: Vec<Residue> = Vec::with_capacity(core.len());
        let mut chars = core.char_indices();
        while let Some((i, c)) = chars.next() {
            if c == '[' {
                let mut buf = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    buf.push(c);
                }
                let Some(last) = residues.last_mut() else {
                    return Err(CandidateError::MalformedModification {
                        text: buf,
                        position: i,
                    });
                };
                if !closed {
                    return Err(CandidateError::MalformedModification {
                        text: buf,
                        position: i,
                    });
                }
                for tok in buf.split(',') {
                    let delta: f64 = tok.trim().parse().map_err(|_| {
                        CandidateError::MalformedModification {
                            text: buf.clone(),
                            position: i,
                        }
                    })?;
                    last.modifications.push(Modification::new(delta));
                }
            } else {
                let aa = c.to_ascii_uppercase();
                if residue_mass(aa, MassType::Monoisotopic).is_none() {
                    return Err(CandidateError::UnknownResidue {
                        residue: c,
                        position: i,
                    });
                }
                residues.push(Residue::new(aa));
            }
        }
        if residues.is_empty() {
            return Err(CandidateError::Empty);
        }
        Ok(Self {
            residues,
            prev_aa,
            next_aa,
            proteins: Vec::new(),
        })
    }

    pub fn with_flanks(mut self, prev_aa: char, next_aa: char) -> Self {
        self.prev_aa = prev_aa;
        self.next_aa = next_aa;
        self
    }

    pub fn with_protein(mut self, accession: impl Into<String>) -> Self {
        self.proteins.push(accession.into());
        self
    }

    pub fn add_modification(
        &mut self,
        position: usize,
        modification: Modification,
    ) -> Result<(), CandidateError> {
        let length = self.residues.len();
        let residue = self
            .residues
            .get_mut(position)
            .ok_or(CandidateError::PositionOutOfRange { position, length })?;
        residue.modifications.push(modification);
        Ok(())
    }

    pub fn residues(&self) -> &[Residue] {
        &self.residues
    }

    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }

    pub fn sequence(&self) -> String {
        self.residues.iter().map(|r| r.aa).collect()
    }

    /// The sequence with each modification's symbol written after the residue it modifies
    pub fn modified_sequence_with_symbols(&self) -> String {
        let mut buf = String::with_capacity(self.residues.len() * 2);
        for r in self.residues.iter() {
            buf.push(r.aa);
            for m in r.modifications.iter() {
                if let Some(s) = m.symbol {
                    buf.push(s);
                }
            }
        }
        buf
    }

    /// The sequence with modification masses in brackets after each modified residue.
    ///
    /// When `merge` is true a residue carrying several modifications shows their sum,
    /// otherwise each mass is listed.
    pub fn modified_sequence_with_masses(&self, merge: bool) -> String {
        let mut buf = String::with_capacity(self.residues.len() * 2);
        for r in self.residues.iter() {
            buf.push(r.aa);
            if r.modifications.is_empty() {
                continue;
            }
            buf.push('[');
            if merge {
                let _ = write!(buf, "{:.2}", r.modification_mass());
            } else {
                for (i, m) in r.modifications.iter().enumerate() {
                    if i > 0 {
                        buf.push(',');
                    }
                    let _ = write!(buf, "{:.2}", m.mass_delta);
                }
            }
            buf.push(']');
        }
        buf
    }

    /// The sequence with flanking residues, `K.PEPTIDE.R`
    pub fn flanked_sequence(&self) -> String {
        format!("{}.{}.{}", self.prev_aa, self.sequence(), self.next_aa)
    }

    pub fn mass(&self, mass_type: MassType) -> f64 {
        self.residues.iter().map(|r| r.mass(mass_type)).sum::<f64>() + mass_type.water()
    }

    pub fn digestion(&self, enzyme: Enzyme) -> Digestion {
        let first = self.residues.first().map(|r| r.aa).unwrap_or('-');
        let last = self.residues.last().map(|r| r.aa).unwrap_or('-');
        let missed_cleavages = self
            .residues
            .windows(2)
            .filter(|w| enzyme.cleaves(w[0].aa, w[1].aa))
            .count();
        Digestion {
            n_terminal: enzyme.cleaves(self.prev_aa, first),
            c_terminal: enzyme.cleaves(last, self.next_aa),
            missed_cleavages,
        }
    }

    /// Build a decoy by permuting the residues between the termini, leaving any positions
    /// in `fixed` in place.
    pub fn decoy<R: Rng + ?Sized>(&self, kind: DecoyKind, fixed: &[usize], rng: &mut R) -> Self {
        let n = self.residues.len();
        if n < 3 {
            return self.clone();
        }
        let movable: Vec<usize> = (1..n - 1).filter(|i| !fixed.contains(i)).collect();
        if movable.len() < 2 {
            return self.clone();
        }
        let mut picked: Vec<Residue> = movable.iter().map(|i| self.residues[*i].clone()).collect();
        match kind {
            DecoyKind::Reverse => picked.reverse(),
            DecoyKind::Shuffle => {
                let original: Vec<char> = picked.iter().map(|r| r.aa).collect();
                for attempt in 0..MAX_SHUFFLE_ATTEMPTS {
                    picked.shuffle(rng);
                    if picked.iter().map(|r| r.aa).ne(original.iter().copied()) {
                        break;
                    }
                    trace!(
                        "Shuffle attempt {attempt} of {} reproduced the target",
                        self.sequence()
                    );
                }
            }
        }
        let mut residues = self.residues.clone();
        for (i, r) in movable.into_iter().zip(picked) {
            residues[i] = r;
        }
        Self {
            residues,
            prev_aa: self.prev_aa,
            next_aa: self.next_aa,
            proteins: self.proteins.clone(),
        }
    }

    /// The cumulative residue masses, where entry `i` is the mass of the first `i + 1` residues
    fn prefix_masses(&self, mass_type: MassType) -> Vec<f64> {
        let mut acc = 0.0;
        self.residues
            .iter()
            .map(|r| {
                acc += r.mass(mass_type);
                acc
            })
            .collect()
    }

    /// Predict b and y ions. `extra` receives the series and the residue span of each
    /// fragment and returns the additional mass it carries, or `None` if it cannot form.
    fn fragment_ladder<F>(
        &self,
        max_charge: i32,
        mass_type: MassType,
        extra: F,
    ) -> Vec<FragmentIon>
    where
        F: Fn(IonSeries, Range<usize>) -> Option<f64>,
    {
        let n = self.residues.len();
        if n < 2 {
            return Vec::new();
        }
        let prefix = self.prefix_masses(mass_type);
        let total = prefix[n - 1];
        let water = mass_type.water();
        let mut ions = Vec::with_capacity(2 * (n - 1) * max_charge.max(1) as usize);
        for ordinal in 1..n {
            let b = prefix[ordinal - 1];
            let y = total - prefix[n - ordinal - 1] + water;
            let spans = [
                (IonSeries::B, b, 0..ordinal),
                (IonSeries::Y, y, (n - ordinal)..n),
            ];
            for (series, mass, span) in spans {
                let Some(delta) = extra(series, span) else {
                    continue;
                };
                for charge in ChargeRangeIter::new(1, max_charge.max(1)) {
                    ions.push(FragmentIon {
                        series,
                        ordinal,
                        charge,
                        mz: mass_charge_ratio(mass + delta, charge),
                    });
                }
            }
        }
        ions
    }
}

fn split_flanks(text: &str) -> (char, &str, char) {
    let bytes = text.as_bytes();
    let n = bytes.len();
    if n >= 5 && bytes[1] == b'.' && bytes[n - 2] == b'.' {
        let prev = bytes[0] as char;
        let next = bytes[n - 1] as char;
        (prev, &text[2..n - 2], next)
    } else {
        ('-', text, '-')
    }
}

impl Display for Peptide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.modified_sequence_with_masses(true))
    }
}

/// The shared interface over all candidate shapes
pub trait CandidateLike {
    /// A textual form of the candidate that identifies it uniquely
    fn sequence_string(&self) -> String;

    /// The neutral mass of the candidate
    fn compute_mass(&self, mass_type: MassType) -> f64;

    /// Predict the b and y ions of the candidate up to `max_charge`
    fn predict_fragment_ions(&self, max_charge: i32, mass_type: MassType) -> Vec<FragmentIon>;

    /// Produce a decoy of the same shape
    fn shuffle<R: Rng + ?Sized>(&self, kind: DecoyKind, rng: &mut R) -> Self
    where
        Self: Sized;
}

impl CandidateLike for Peptide {
    fn sequence_string(&self) -> String {
        self.modified_sequence_with_masses(true)
    }

    fn compute_mass(&self, mass_type: MassType) -> f64 {
        self.mass(mass_type)
    }

    fn predict_fragment_ions(&self, max_charge: i32, mass_type: MassType) -> Vec<FragmentIon> {
        self.fragment_ladder(max_charge, mass_type, |_, _| Some(0.0))
    }

    fn shuffle<R: Rng + ?Sized>(&self, kind: DecoyKind, rng: &mut R) -> Self {
        self.decoy(kind, &[], rng)
    }
}

/// A candidate explanation for a spectrum.
///
/// Link sites are zero-based residue positions.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Linear(Peptide),
    SelfLoop {
        peptide: Peptide,
        sites: (usize, usize),
        linker_mass: f64,
    },
    CrossLinked {
        alpha: Peptide,
        beta: Peptide,
        sites: (usize, usize),
        linker_mass: f64,
    },
}

fn check_site(site: usize, peptide: &Peptide) -> Result<(), CandidateError> {
    if site >= peptide.len() {
        Err(CandidateError::InvalidLinkSite {
            site,
            length: peptide.len(),
        })
    } else {
        Ok(())
    }
}

impl Candidate {
    pub fn self_loop(
        peptide: Peptide,
        sites: (usize, usize),
        linker_mass: f64,
    ) -> Result<Self, CandidateError> {
        check_site(sites.0, &peptide)?;
        check_site(sites.1, &peptide)?;
        let sites = (sites.0.min(sites.1), sites.0.max(sites.1));
        Ok(Self::SelfLoop {
            peptide,
            sites,
            linker_mass,
        })
    }

    pub fn cross_linked(
        alpha: Peptide,
        beta: Peptide,
        sites: (usize, usize),
        linker_mass: f64,
    ) -> Result<Self, CandidateError> {
        check_site(sites.0, &alpha)?;
        check_site(sites.1, &beta)?;
        Ok(Self::CrossLinked {
            alpha,
            beta,
            sites,
            linker_mass,
        })
    }

    pub fn is_linear(&self) -> bool {
        matches!(self, Self::Linear(_))
    }

    /// The peptide that sequence-level bookkeeping is done for
    pub fn primary_peptide(&self) -> &Peptide {
        match self {
            Candidate::Linear(p) => p,
            Candidate::SelfLoop { peptide, .. } => peptide,
            Candidate::CrossLinked { alpha, .. } => alpha,
        }
    }

    pub fn peptides(&self) -> Vec<&Peptide> {
        match self {
            Candidate::Linear(p) => vec![p],
            Candidate::SelfLoop { peptide, .. } => vec![peptide],
            Candidate::CrossLinked { alpha, beta, .. } => vec![alpha, beta],
        }
    }

    /// The total number of residues
    pub fn len(&self) -> usize {
        self.peptides().iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sequence(&self) -> String {
        match self {
            Candidate::Linear(p) | Candidate::SelfLoop { peptide: p, .. } => p.sequence(),
            Candidate::CrossLinked { alpha, beta, .. } => {
                format!("{},{}", alpha.sequence(), beta.sequence())
            }
        }
    }

    pub fn modified_sequence_with_symbols(&self) -> String {
        self.peptides()
            .iter()
            .map(|p| p.modified_sequence_with_symbols())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn modified_sequence_with_masses(&self, merge: bool) -> String {
        self.peptides()
            .iter()
            .map(|p| p.modified_sequence_with_masses(merge))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Combine the digestion of every peptide, keeping the least specific terminus
    pub fn digestion(&self, enzyme: Enzyme) -> Digestion {
        self.peptides()
            .iter()
            .map(|p| p.digestion(enzyme))
            .reduce(|a, b| Digestion {
                n_terminal: a.n_terminal && b.n_terminal,
                c_terminal: a.c_terminal && b.c_terminal,
                missed_cleavages: a.missed_cleavages + b.missed_cleavages,
            })
            .unwrap_or(Digestion {
                n_terminal: false,
                c_terminal: false,
                missed_cleavages: 0,
            })
    }

    pub fn proteins(&self) -> Vec<&str> {
        self.peptides()
            .iter()
            .flat_map(|p| p.proteins.iter().map(|s| s.as_str()))
            .collect()
    }
}

impl From<Peptide> for Candidate {
    fn from(value: Peptide) -> Self {
        Self::Linear(value)
    }
}

impl CandidateLike for Candidate {
    fn sequence_string(&self) -> String {
        match self {
            Candidate::Linear(p) => p.sequence_string(),
            Candidate::SelfLoop { peptide, sites, .. } => {
                format!("{}({},{})", peptide.sequence_string(), sites.0 + 1, sites.1 + 1)
            }
            Candidate::CrossLinked {
                alpha, beta, sites, ..
            } => format!(
                "{},{}({},{})",
                alpha.sequence_string(),
                beta.sequence_string(),
                sites.0 + 1,
                sites.1 + 1
            ),
        }
    }

    fn compute_mass(&self, mass_type: MassType) -> f64 {
        match self {
            Candidate::Linear(p) => p.mass(mass_type),
            Candidate::SelfLoop {
                peptide,
                linker_mass,
                ..
            } => peptide.mass(mass_type) + linker_mass,
            Candidate::CrossLinked {
                alpha,
                beta,
                linker_mass,
                ..
            } => alpha.mass(mass_type) + beta.mass(mass_type) + linker_mass,
        }
    }

    fn predict_fragment_ions(&self, max_charge: i32, mass_type: MassType) -> Vec<FragmentIon> {
        match self {
            Candidate::Linear(p) => p.predict_fragment_ions(max_charge, mass_type),
            Candidate::SelfLoop {
                peptide,
                sites,
                linker_mass,
            } => {
                let (i, j) = *sites;
                // A fragment that separates the two link sites stays attached through the loop
                peptide.fragment_ladder(max_charge, mass_type, |_, span| {
                    let has_i = span.contains(&i);
                    let has_j = span.contains(&j);
                    match (has_i, has_j) {
                        (false, false) => Some(0.0),
                        (true, true) => Some(*linker_mass),
                        _ => None,
                    }
                })
            }
            Candidate::CrossLinked {
                alpha,
                beta,
                sites,
                linker_mass,
            } => {
                let alpha_partner = beta.mass(mass_type) + linker_mass;
                let beta_partner = alpha.mass(mass_type) + linker_mass;
                let mut ions = alpha.fragment_ladder(max_charge, mass_type, |_, span| {
                    Some(if span.contains(&sites.0) {
                        alpha_partner
                    } else {
                        0.0
                    })
                });
                ions.extend(beta.fragment_ladder(max_charge, mass_type, |_, span| {
                    Some(if span.contains(&sites.1) {
                        beta_partner
                    } else {
                        0.0
                    })
                }));
                ions
            }
        }
    }

    fn shuffle<R: Rng + ?Sized>(&self, kind: DecoyKind, rng: &mut R) -> Self {
        match self {
            Candidate::Linear(p) => Candidate::Linear(p.decoy(kind, &[], rng)),
            Candidate::SelfLoop {
                peptide,
                sites,
                linker_mass,
            } => Candidate::SelfLoop {
                peptide: peptide.decoy(kind, &[sites.0, sites.1], rng),
                sites: *sites,
                linker_mass: *linker_mass,
            },
            Candidate::CrossLinked {
                alpha,
                beta,
                sites,
                linker_mass,
            } => Candidate::CrossLinked {
                alpha: alpha.decoy(kind, &[sites.0], rng),
                beta: beta.decoy(kind, &[sites.1], rng),
                sites: *sites,
                linker_mass: *linker_mass,
            },
        }
    }
}

impl Display for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.sequence_string())
    }
}
