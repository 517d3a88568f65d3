use std::io;

use mzdata::io::mgf::MGFReaderType;
use mzdata::prelude::*;
use mzdata::spectrum::MultiLayerSpectrum;
use mzpeaks::{CentroidPeak, DeconvolutedPeak};
use thiserror::Error;
use tracing::{debug, trace};

use crate::charge::ZState;
use crate::peaks::PeakIndexParams;
use crate::spectrum::Spectrum;

type MgfSpectrum = MultiLayerSpectrum<CentroidPeak, DeconvolutedPeak>;

#[derive(Debug, Error)]
pub enum MgfError {
    #[error("MGF spectrum {index} ({id:?}) has no precursor m/z")]
    MissingPrecursor { index: usize, id: String },
    #[error("Failed to read the peaks of MGF spectrum {index} ({id:?}): {reason}")]
    Peaks {
        index: usize,
        id: String,
        reason: String,
    },
}

/// Reads spectra from MGF text through `mzdata`.
///
/// A spectrum's scan number comes from its `SCANS` header when present, otherwise from its
/// position in the input, starting from 1. A spectrum without a precursor charge carries no
/// charge states, so its charges are inferred when it is searched. The title is kept as an
/// annotation.
pub struct MgfReader<R: io::Read> {
    inner: MGFReaderType<R, CentroidPeak, DeconvolutedPeak>,
    index_params: PeakIndexParams,
}

/// Parse `n` or `first-last`
fn parse_scans(value: &str) -> Option<(u32, u32)> {
    let value = value.trim();
    match value.split_once('-') {
        Some((first, last)) => Some((first.trim().parse().ok()?, last.trim().parse().ok()?)),
        None => {
            let scan = value.parse().ok()?;
            Some((scan, scan))
        }
    }
}

fn scan_range(spectrum: &MgfSpectrum) -> (u32, u32) {
    spectrum
        .params()
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case("scans"))
        .and_then(|p| parse_scans(&p.value.to_string()))
        .unwrap_or_else(|| {
            let position = spectrum.index() as u32 + 1;
            (position, position)
        })
}

impl<R: io::Read> MgfReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: MGFReaderType::new(inner),
            index_params: PeakIndexParams::default(),
        }
    }

    pub fn with_index_params(mut self, params: PeakIndexParams) -> Self {
        self.index_params = params;
        self
    }

    fn convert(&self, mut source: MgfSpectrum) -> Result<Spectrum, MgfError> {
        let index = source.index();
        let Some(precursor) = source.precursor() else {
            return Err(MgfError::MissingPrecursor {
                index,
                id: source.id().to_string(),
            });
        };
        let precursor_mz = precursor.ion().mz;
        let charge = precursor.charge().filter(|z| *z != 0);

        let (first_scan, last_scan) = scan_range(&source);
        let mut spectrum =
            Spectrum::new(first_scan, last_scan, precursor_mz).with_index_params(self.index_params);
        if let Some(z) = charge {
            spectrum.add_zstate(ZState::from_mz(precursor_mz, z));
        }
        if !source.id().is_empty() {
            spectrum.add_annotation(format!("TITLE={}", source.id()));
        }

        if source.peaks().is_empty() {
            debug!("No peaks found for scan {first_scan}");
            return Ok(spectrum);
        }
        let id = source.id().to_string();
        let peaks = source.try_build_centroids().map_err(|e| MgfError::Peaks {
            index,
            id,
            reason: e.to_string(),
        })?;
        for peak in peaks.iter() {
            spectrum.add_peak(peak.mz, peak.intensity);
        }
        trace!("Read scan {first_scan} with {} peaks", spectrum.len());
        Ok(spectrum)
    }
}

impl<R: io::Read> Iterator for MgfReader<R> {
    type Item = Result<Spectrum, MgfError>;

    fn next(&mut self) -> Option<Self::Item> {
        let source = self.inner.next()?;
        Some(self.convert(source))
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    const TEXT: &str = "BEGIN IONS
TITLE=first
PEPMASS=500.5 1200
CHARGE=2+
150.0 10
250.0 30
END IONS

BEGIN IONS
TITLE=second
PEPMASS=300.25
100.0 5
END IONS
";

    #[test]
    fn test_read() {
        let spectra: Vec<_> = MgfReader::new(Cursor::new(TEXT))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(spectra.len(), 2);

        let s = &spectra[0];
        assert_eq!(s.first_scan, 1);
        assert_eq!(s.precursor_mz, 500.5);
        assert_eq!(s.len(), 2);
        assert_eq!(s.peaks()[1].mz, 250.0);
        assert_eq!(s.peaks()[1].intensity, 30.0);
        let charges: Vec<i32> = s.zstates().iter().map(|z| z.charge()).collect();
        assert_eq!(charges, vec![2]);
        assert!((s.zstates()[0].mz() - 500.5).abs() < 1e-9);
        assert_eq!(s.annotations(), &["TITLE=first"]);

        let s = &spectra[1];
        assert_eq!(s.first_scan, 2);
        assert_eq!(s.len(), 1);
        assert!(s.zstates().is_empty());
    }

    #[test]
    fn test_index_params() {
        let params = PeakIndexParams::new(20, 1000.0);
        let spectra: Vec<_> = MgfReader::new(Cursor::new(TEXT))
            .with_index_params(params)
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(spectra.iter().all(|s| s.index_params() == params));
    }

    #[test]
    fn test_scan_ranges() {
        assert_eq!(parse_scans("7-9"), Some((7, 9)));
        assert_eq!(parse_scans(" 7 "), Some((7, 7)));
        assert_eq!(parse_scans("seven"), None);
    }
}
