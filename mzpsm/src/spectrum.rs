//! A single MS/MS spectrum with its precursor metadata and peak list.
use std::fmt::Display;
use std::sync::OnceLock;

use mzpeaks::Tolerance;
use thiserror::Error;
use tracing::trace;

use crate::charge::{choose_charge, ChargeSelection, ZState};
use crate::peaks::{MzPeakIndex, Peak, PeakIndexParams};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpectrumError {
    #[error("Cannot normalize scan {scan}, total intensity is {total}")]
    NonPositiveTotalIntensity { scan: u32, total: f64 },
    #[error("Scan {scan} has no peaks")]
    Empty { scan: u32 },
}

/// The order the peaks of a [`Spectrum`] are currently stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakOrdering {
    /// The order the peaks were added in
    #[default]
    Insertion,
    /// Ascending m/z
    MZ,
    /// Descending intensity
    Intensity,
}

/// An observed MS/MS spectrum.
///
/// `min_mz`, `max_mz` and `total_intensity` always describe the current peak list. The
/// nearest-peak index is built on first use and discarded whenever the peak list is
/// modified.
#[derive(Debug, Clone, Default)]
pub struct Spectrum {
    pub first_scan: u32,
    pub last_scan: u32,
    pub precursor_mz: f64,
    zstates: Vec<ZState>,
    peaks: Vec<Peak>,
    annotations: Vec<String>,
    min_mz: f64,
    max_mz: f64,
    total_intensity: f64,
    ordering: PeakOrdering,
    index_params: PeakIndexParams,
    index: OnceLock<MzPeakIndex>,
}

impl Spectrum {
    pub fn new(first_scan: u32, last_scan: u32, precursor_mz: f64) -> Self {
        Self {
            first_scan,
            last_scan,
            precursor_mz,
            ..Default::default()
        }
    }

    pub fn with_index_params(mut self, params: PeakIndexParams) -> Self {
        self.set_index_params(params);
        self
    }

    pub fn index_params(&self) -> PeakIndexParams {
        self.index_params
    }

    /// Change the shape of the nearest-peak index, discarding it if it was already built
    pub fn set_index_params(&mut self, params: PeakIndexParams) {
        if self.index_params != params {
            self.index_params = params;
            self.index.take();
        }
    }

    pub fn add_peak(&mut self, mz: f64, intensity: f32) {
        if self.peaks.is_empty() {
            self.min_mz = mz;
            self.max_mz = mz;
        } else {
            self.min_mz = self.min_mz.min(mz);
            self.max_mz = self.max_mz.max(mz);
        }
        self.total_intensity += intensity as f64;
        self.peaks.push(Peak::new(mz, intensity));
        self.ordering = PeakOrdering::Insertion;
        self.index.take();
    }

    pub fn add_zstate(&mut self, zstate: ZState) {
        self.zstates.push(zstate);
    }

    /// Free-text header lines carried along with the spectrum
    pub fn add_annotation(&mut self, line: impl Into<String>) {
        self.annotations.push(line.into());
    }

    pub fn peaks(&self) -> &[Peak] {
        &self.peaks
    }

    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn zstates(&self) -> &[ZState] {
        &self.zstates
    }

    pub fn annotations(&self) -> &[String] {
        &self.annotations
    }

    pub fn min_mz(&self) -> f64 {
        self.min_mz
    }

    pub fn max_mz(&self) -> f64 {
        self.max_mz
    }

    pub fn total_intensity(&self) -> f64 {
        self.total_intensity
    }

    pub fn ordering(&self) -> PeakOrdering {
        self.ordering
    }

    pub fn max_peak_intensity(&self) -> Option<f32> {
        self.peaks
            .iter()
            .map(|p| p.intensity)
            .max_by(|a, b| a.total_cmp(b))
    }

    /// The charge states to search under `selection`.
    ///
    /// When no charge states were recorded, they are inferred from how the peak
    /// intensity is distributed around the precursor m/z.
    pub fn zstates_to_search(&self, selection: ChargeSelection) -> Vec<ZState> {
        if self.zstates.is_empty() {
            let call = choose_charge(self.precursor_mz, &self.peaks);
            trace!("Scan {} has no charge states, inferred {call:?}", self.first_scan);
            let inferred: Vec<ZState> = call
                .charges()
                .map(|z| ZState::from_mz(self.precursor_mz, z))
                .collect();
            selection.select(&inferred).into_iter().copied().collect()
        } else {
            selection.select(&self.zstates).into_iter().copied().collect()
        }
    }

    fn peak_index(&self) -> &MzPeakIndex {
        self.index
            .get_or_init(|| MzPeakIndex::build(&self.peaks, self.index_params))
    }

    /// Whether the nearest-peak index has been built for the current peak list
    pub fn is_indexed(&self) -> bool {
        self.index.get().is_some()
    }

    /// Find the peak closest to `mz` within `tolerance`, if any
    pub fn nearest_peak(&self, mz: f64, tolerance: Tolerance) -> Option<&Peak> {
        self.peak_index()
            .nearest(&self.peaks, mz, tolerance)
            .map(|i| &self.peaks[i])
    }

    pub fn peaks_within(&self, mz: f64, tolerance: Tolerance) -> impl Iterator<Item = &Peak> {
        self.peak_index()
            .within(&self.peaks, mz, tolerance)
            .map(move |i| &self.peaks[i])
    }

    /// Scale every peak's intensity so that they sum to one.
    pub fn sum_normalize(&mut self) -> Result<(), SpectrumError> {
        let total = self.total_intensity;
        if !(total > 0.0) {
            return Err(SpectrumError::NonPositiveTotalIntensity {
                scan: self.first_scan,
                total,
            });
        }
        let mut acc = 0.0;
        for p in self.peaks.iter_mut() {
            p.intensity = (p.intensity as f64 / total) as f32;
            acc += p.intensity as f64;
        }
        self.total_intensity = acc;
        self.index.take();
        Ok(())
    }

    /// Sort the peaks by decreasing intensity and give each a rank in `(0, 1]`, where the
    /// most intense peak has rank 1.
    pub fn rank_transform(&mut self) -> Result<(), SpectrumError> {
        if self.peaks.is_empty() {
            return Err(SpectrumError::Empty {
                scan: self.first_scan,
            });
        }
        self.peaks
            .sort_by(|a, b| b.intensity.total_cmp(&a.intensity));
        let n = self.peaks.len() as f32;
        for (i, p) in self.peaks.iter_mut().enumerate() {
            p.rank = Some((n - i as f32) / n);
        }
        self.ordering = PeakOrdering::Intensity;
        self.index.take();
        Ok(())
    }

    pub fn sort_by_mz(&mut self) {
        if self.ordering == PeakOrdering::MZ {
            return;
        }
        self.peaks.sort_by(|a, b| a.mz.total_cmp(&b.mz));
        self.ordering = PeakOrdering::MZ;
        self.index.take();
    }
}

impl Display for Spectrum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Spectrum({}-{}, {:.4}, {} peaks)",
            self.first_scan,
            self.last_scan,
            self.precursor_mz,
            self.peaks.len()
        )
    }
}
