use std::io::prelude::*;

use tracing::trace;

use super::{parse_peak_line, LineSource, SpectrumParseError, SpectrumParseErrorKind};
use crate::charge::ZState;
use crate::peaks::PeakIndexParams;
use crate::spectrum::Spectrum;

/// Reads spectra from MS2 text.
///
/// Each spectrum is an `S` line, then any number of `I`, `Z` and `D` lines, then peak lines.
/// At least one `Z` line must precede the peaks. File-level `H` lines are skipped.
pub struct Ms2Reader<R: BufRead> {
    source: LineSource<R>,
    index_params: PeakIndexParams,
    resync: bool,
    done: bool,
}

fn parse_scan_line(line: &str) -> Option<Spectrum> {
    let mut fields = line.split_whitespace();
    if fields.next()? != "S" {
        return None;
    }
    let first_scan = fields.next()?.parse().ok()?;
    let last_scan = fields.next()?.parse().ok()?;
    let precursor_mz = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(Spectrum::new(first_scan, last_scan, precursor_mz))
}

fn parse_charge_line(line: &str) -> Option<ZState> {
    let mut fields = line.split_whitespace();
    if fields.next()? != "Z" {
        return None;
    }
    let charge: i32 = fields.next()?.parse().ok()?;
    let singly_charged_mass: f64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() || charge == 0 {
        return None;
    }
    Some(ZState::from_singly_charged_mass(singly_charged_mass, charge))
}

impl<R: BufRead> Ms2Reader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            source: LineSource::new(inner),
            index_params: PeakIndexParams::default(),
            resync: false,
            done: false,
        }
    }

    pub fn with_index_params(mut self, params: PeakIndexParams) -> Self {
        self.index_params = params;
        self
    }

    fn error(&mut self, kind: SpectrumParseErrorKind) -> SpectrumParseError {
        self.resync = true;
        SpectrumParseError::new(self.source.line_number(), kind)
    }

    fn next_line(&mut self) -> Result<Option<String>, SpectrumParseError> {
        self.source.next_line().map_err(|e| {
            self.done = true;
            SpectrumParseError::new(self.source.line_number() + 1, e.into())
        })
    }

    /// Read the next spectrum, or `None` at the end of the input
    pub fn read_next(&mut self) -> Result<Option<Spectrum>, SpectrumParseError> {
        let header = loop {
            let Some(line) = self.next_line()? else {
                return Ok(None);
            };
            let trimmed = line.trim_start();
            if trimmed.starts_with('S') {
                break line;
            }
            if self.resync || trimmed.is_empty() || trimmed.starts_with('H') {
                continue;
            }
            return Err(self.error(SpectrumParseErrorKind::OutOfOrder(line)));
        };
        self.resync = false;

        let mut spectrum = match parse_scan_line(&header) {
            Some(spectrum) => spectrum.with_index_params(self.index_params),
            None => return Err(self.error(SpectrumParseErrorKind::MalformedScanLine(header))),
        };

        let mut has_charge = false;
        let mut has_peaks = false;
        while let Some(line) = self.next_line()? {
            let trimmed = line.trim();
            match trimmed.chars().next() {
                None => {}
                Some('S') => {
                    if has_peaks {
                        self.source.push_back(line);
                        break;
                    }
                    let err = self.error(SpectrumParseErrorKind::NoPeaks);
                    self.source.push_back(line);
                    return Err(err);
                }
                Some('Z') => {
                    if has_peaks {
                        return Err(self.error(SpectrumParseErrorKind::OutOfOrder(line)));
                    }
                    match parse_charge_line(trimmed) {
                        Some(z) => spectrum.add_zstate(z),
                        None => {
                            return Err(
                                self.error(SpectrumParseErrorKind::MalformedChargeLine(line))
                            )
                        }
                    }
                    has_charge = true;
                }
                Some('I') | Some('D') => {
                    if has_peaks {
                        return Err(self.error(SpectrumParseErrorKind::OutOfOrder(line)));
                    }
                    spectrum.add_annotation(trimmed);
                }
                Some('H') => {
                    return Err(self.error(SpectrumParseErrorKind::OutOfOrder(line)));
                }
                Some(_) => {
                    if !has_charge {
                        return Err(self.error(SpectrumParseErrorKind::OutOfOrder(line)));
                    }
                    match parse_peak_line(trimmed) {
                        Some((mz, intensity)) => spectrum.add_peak(mz, intensity),
                        None => {
                            return Err(self.error(SpectrumParseErrorKind::MalformedPeakLine(line)))
                        }
                    }
                    has_peaks = true;
                }
            }
        }
        if !has_peaks {
            return Err(self.error(SpectrumParseErrorKind::NoPeaks));
        }
        trace!(
            "Read scan {} with {} peaks and {} charge states",
            spectrum.first_scan,
            spectrum.len(),
            spectrum.zstates().len()
        );
        Ok(Some(spectrum))
    }
}

impl<R: BufRead> Iterator for Ms2Reader<R> {
    type Item = Result<Spectrum, SpectrumParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_next() {
            Ok(Some(spectrum)) => Some(Ok(spectrum)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => Some(Err(e)),
        }
    }
}
