//! Search configuration, layered from defaults, a TOML file and the environment
use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use mzpeaks::Tolerance;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::candidate::{DecoyKind, Enzyme, MassType};
use crate::charge::ChargeSelection;
use crate::peaks::PeakIndexParams;
use crate::weibull::WeibullParams;

/// The prefix for environment variable overrides. Nested keys are separated by `__`,
/// e.g. `MZPSM_WEIBULL__MIN_MATCHES=20`.
pub const ENV_PREFIX: &str = "MZPSM_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(
        #[from]
        #[source]
        Box<figment::Error>,
    ),
    #[error("Failed to render configuration: {0}")]
    Render(
        #[from]
        #[source]
        toml::ser::Error,
    ),
}

impl From<figment::Error> for ConfigError {
    fn from(value: figment::Error) -> Self {
        Self::Load(Box::new(value))
    }
}

/// A fragment mass tolerance, written as `{ unit = "ppm", value = 20.0 }`.
///
/// The unit and the value are separate keys so each layer can override either one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "value", rename_all = "lowercase")]
pub enum FragmentTolerance {
    Da(f64),
    Ppm(f64),
}

impl Default for FragmentTolerance {
    fn default() -> Self {
        Self::Da(0.5)
    }
}

impl From<FragmentTolerance> for Tolerance {
    fn from(value: FragmentTolerance) -> Self {
        match value {
            FragmentTolerance::Da(x) => Tolerance::Da(x),
            FragmentTolerance::Ppm(x) => Tolerance::PPM(x),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoyParams {
    /// How many decoys to generate for every target candidate
    pub decoys_per_target: usize,
    pub kind: DecoyKind,
    /// Base seed, combined with the scan number and charge of each search
    pub seed: u64,
}

impl Default for DecoyParams {
    fn default() -> Self {
        Self {
            decoys_per_target: 1,
            kind: DecoyKind::default(),
            seed: 0,
        }
    }
}

/// Everything that controls a search. Components receive the pieces they need from
/// this value explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub peak_index: PeakIndexParams,
    pub weibull: WeibullParams,
    pub decoys: DecoyParams,
    pub spectrum_charge: ChargeSelection,
    /// How many matches to retain per spectrum and charge
    pub top_match: usize,
    pub enzyme: Enzyme,
    pub mass_type: MassType,
    pub max_fragment_charge: i32,
    pub fragment_tolerance: FragmentTolerance,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            peak_index: PeakIndexParams::default(),
            weibull: WeibullParams::default(),
            decoys: DecoyParams::default(),
            spectrum_charge: ChargeSelection::default(),
            top_match: 5,
            enzyme: Enzyme::default(),
            mass_type: MassType::default(),
            max_fragment_charge: 1,
            fragment_tolerance: FragmentTolerance::default(),
        }
    }
}

impl SearchConfig {
    /// The layered configuration sources: defaults, then `path` if given, then the environment
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path).extract()?;
        debug!("Loaded configuration from {path:?}");
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn fragment_tolerance(&self) -> Tolerance {
        self.fragment_tolerance.into()
    }
}
