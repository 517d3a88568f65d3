//! Scoring, ranking and significance estimation for peptide-spectrum matches.
//!
//! A [`Spectrum`](spectrum::Spectrum) is compared against candidate peptides at each of its
//! charge states. The resulting [`Match`](matches::Match)es for one spectrum and charge live in
//! a [`MatchCollection`](collection::MatchCollection), which sorts, ranks and truncates them.
//! Statistical significance comes from a Weibull model of the score tail and from target-decoy
//! q-values. The [`pipeline`] module runs all of this over many spectra in parallel.
pub mod charge;
pub mod peaks;
pub mod scorer;
pub mod spectrum;

pub mod candidate;
pub mod collection;
pub mod matches;

pub mod qvalue;
pub mod weibull;

pub mod config;
pub mod features;
pub mod io;
pub mod pipeline;

pub use crate::candidate::{Candidate, CandidateLike, Peptide};
pub use crate::charge::ZState;
pub use crate::collection::MatchCollection;
pub use crate::config::SearchConfig;
pub use crate::matches::{Match, MatchId, SortOrder};
pub use crate::pipeline::{SearchEngine, SearchResults};
pub use crate::scorer::{PsmScorer, ScoreKind};
pub use crate::spectrum::Spectrum;
