//! Spectrum readers.
//!
//! Both readers yield one `Result` per spectrum, so a caller may log a failure and keep
//! iterating. MGF is read with `mzdata`; MS2 is parsed here, and after a parse failure the
//! MS2 reader skips ahead to the next `S` line.
use std::fs;
use std::io::{self, prelude::*, BufReader};
use std::path::Path;

use flate2::bufread::MultiGzDecoder;
use mzdata::io::{infer_from_path, RestartableGzDecoder};
use thiserror::Error;
use tracing::debug;

mod mgf;
mod ms2;

pub use mgf::{MgfError, MgfReader};
pub use ms2::Ms2Reader;

#[derive(Debug, Error)]
pub enum SpectrumParseErrorKind {
    #[error("expected `S <first scan> <last scan> <precursor m/z>`, found {0:?}")]
    MalformedScanLine(String),
    #[error("expected `Z <charge> <M+H>`, found {0:?}")]
    MalformedChargeLine(String),
    #[error("expected `<m/z> <intensity>`, found {0:?}")]
    MalformedPeakLine(String),
    #[error("{0:?} is out of order")]
    OutOfOrder(String),
    #[error("the spectrum has no peaks")]
    NoPeaks,
    #[error(transparent)]
    IO(#[from] io::Error),
}

#[derive(Debug, Error)]
#[error("Failed to parse spectrum at line {line}: {kind}")]
pub struct SpectrumParseError {
    pub line: usize,
    pub kind: SpectrumParseErrorKind,
}

impl SpectrumParseError {
    pub fn new(line: usize, kind: SpectrumParseErrorKind) -> Self {
        Self { line, kind }
    }
}

/// Line reader with one line of push-back
pub(crate) struct LineSource<R: BufRead> {
    inner: R,
    pending: Option<String>,
    line_number: usize,
}

impl<R: BufRead> LineSource<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self {
            inner,
            pending: None,
            line_number: 0,
        }
    }

    /// The number of the line most recently returned, starting from 1
    pub(crate) fn line_number(&self) -> usize {
        self.line_number
    }

    pub(crate) fn next_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.pending.take() {
            self.line_number += 1;
            return Ok(Some(line));
        }
        let mut buffer = String::new();
        if self.inner.read_line(&mut buffer)? == 0 {
            return Ok(None);
        }
        self.line_number += 1;
        let trimmed = buffer.trim_end_matches(['\n', '\r']).len();
        buffer.truncate(trimmed);
        Ok(Some(buffer))
    }

    pub(crate) fn push_back(&mut self, line: String) {
        self.line_number -= 1;
        self.pending = Some(line);
    }
}

/// Parse a whitespace-separated `m/z intensity` pair, rejecting any other field count
pub(crate) fn parse_peak_line(line: &str) -> Option<(f64, f32)> {
    let mut fields = line.split_whitespace();
    let mz = fields.next()?.parse().ok()?;
    let intensity = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((mz, intensity))
}

fn is_gzipped(path: &Path) -> bool {
    let (format, compressed) = infer_from_path(path);
    debug!("Detected {format:?} from {} (compressed? {compressed})", path.display());
    compressed
}

/// Open `path` for buffered reading, decompressing it if it is gzipped
pub fn open_path(path: impl AsRef<Path>) -> io::Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let handle = BufReader::new(fs::File::open(path)?);
    if is_gzipped(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(handle))))
    } else {
        Ok(Box::new(handle))
    }
}

pub fn open_ms2_path(path: impl AsRef<Path>) -> io::Result<Ms2Reader<Box<dyn BufRead + Send>>> {
    Ok(Ms2Reader::new(open_path(path)?))
}

pub fn open_mgf_path(path: impl AsRef<Path>) -> io::Result<MgfReader<Box<dyn Read + Send>>> {
    let path = path.as_ref();
    let handle = BufReader::new(fs::File::open(path)?);
    if is_gzipped(path) {
        Ok(MgfReader::new(Box::new(RestartableGzDecoder::new(handle))))
    } else {
        Ok(MgfReader::new(Box::new(handle)))
    }
}
