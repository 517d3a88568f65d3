//! Spectrum peaks and the dense m/z bucket index used for nearest-peak lookup.

use mzpeaks::{prelude::*, CentroidPeak, Tolerance, MZ};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// The default number of buckets per m/z unit
pub const DEFAULT_RESOLUTION: u32 = 5;
/// The default upper m/z bound of the bucket index
pub const DEFAULT_MAX_MZ: f64 = 5000.0;

/// A single observed fragment peak.
///
/// `rank` is only populated by [`Spectrum::rank_transform`](crate::spectrum::Spectrum::rank_transform).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Peak {
    pub mz: f64,
    pub intensity: f32,
    pub rank: Option<f32>,
}

impl Peak {
    pub fn new(mz: f64, intensity: f32) -> Self {
        Self {
            mz,
            intensity,
            rank: None,
        }
    }
}

impl CoordinateLike<MZ> for Peak {
    #[inline]
    fn coordinate(&self) -> f64 {
        self.mz
    }
}

impl IntensityMeasurement for Peak {
    #[inline]
    fn intensity(&self) -> f32 {
        self.intensity
    }
}

impl IntensityMeasurementMut for Peak {
    #[inline]
    fn intensity_mut(&mut self) -> &mut f32 {
        &mut self.intensity
    }
}

impl From<CentroidPeak> for Peak {
    fn from(value: CentroidPeak) -> Self {
        Self::new(value.mz, value.intensity)
    }
}

impl From<Peak> for CentroidPeak {
    fn from(value: Peak) -> Self {
        CentroidPeak::new(value.mz, value.intensity, 0)
    }
}

/// Parameters controlling the shape of a [`MzPeakIndex`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakIndexParams {
    /// Buckets per m/z unit
    pub resolution: u32,
    /// Peaks at or above this m/z are not indexed
    pub max_mz: f64,
}

impl Default for PeakIndexParams {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            max_mz: DEFAULT_MAX_MZ,
        }
    }
}

impl PeakIndexParams {
    pub fn new(resolution: u32, max_mz: f64) -> Self {
        Self { resolution, max_mz }
    }

    #[inline]
    fn bucket_for(&self, mz: f64) -> isize {
        (mz * self.resolution as f64).floor() as isize
    }

    fn bucket_count(&self) -> usize {
        (self.max_mz * self.resolution as f64).ceil().max(0.0) as usize
    }
}

/// A fixed-resolution lookup table mapping m/z buckets to the most intense peak
/// that fell into each bucket.
///
/// The index stores positions into the peak slice it was built from, so it must be
/// rebuilt whenever that slice changes. [`Spectrum`](crate::spectrum::Spectrum) takes
/// care of this.
#[derive(Debug, Clone)]
pub struct MzPeakIndex {
    params: PeakIndexParams,
    buckets: Vec<Option<u32>>,
    collisions: usize,
    skipped: usize,
}

impl MzPeakIndex {
    pub fn build(peaks: &[Peak], params: PeakIndexParams) -> Self {
        let mut buckets = vec![None; params.bucket_count()];
        let mut collisions = 0;
        let mut skipped = 0;

        for (i, peak) in peaks.iter().enumerate() {
            if !(peak.mz >= 0.0 && peak.mz < params.max_mz) {
                debug!("Peak at m/z {:.4} is outside the indexed range, skipping", peak.mz);
                skipped += 1;
                continue;
            }
            let bucket = params.bucket_for(peak.mz) as usize;
            let Some(slot) = buckets.get_mut(bucket) else {
                skipped += 1;
                continue;
            };
            match slot {
                Some(j) => {
                    let incumbent: &Peak = &peaks[*j as usize];
                    collisions += 1;
                    debug!(
                        "Peak collision at m/z {:.4} ({:.2}) and m/z {:.4} ({:.2})",
                        incumbent.mz, incumbent.intensity, peak.mz, peak.intensity
                    );
                    if peak.intensity > incumbent.intensity {
                        *slot = Some(i as u32);
                    }
                }
                None => {
                    *slot = Some(i as u32);
                }
            }
        }
        if collisions > 0 {
            info!(
                "{collisions} peaks collided while building an index over {} peaks",
                peaks.len()
            );
        }
        Self {
            params,
            buckets,
            collisions,
            skipped,
        }
    }

    pub fn params(&self) -> &PeakIndexParams {
        &self.params
    }

    /// The number of peaks that lost their bucket to a more intense peak
    pub fn collisions(&self) -> usize {
        self.collisions
    }

    /// The number of peaks that were outside the indexed m/z range
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Find the position of the indexed peak closest to `mz` within `tolerance`.
    ///
    /// Ties in distance are broken in favor of the peak that was inserted first.
    pub fn nearest(&self, peaks: &[Peak], mz: f64, tolerance: Tolerance) -> Option<usize> {
        let (low, high) = tolerance.bounds(mz);
        if high < 0.0 || low >= self.params.max_mz || self.buckets.is_empty() {
            return None;
        }
        let last = self.buckets.len() as isize - 1;
        let start = self.params.bucket_for(low).clamp(0, last) as usize;
        let end = self.params.bucket_for(high).clamp(0, last) as usize;

        let mut best: Option<(usize, f64)> = None;
        for slot in self.buckets[start..=end].iter() {
            let Some(j) = slot else { continue };
            let j = *j as usize;
            let peak = &peaks[j];
            if !tolerance.test(peak.mz, mz) {
                continue;
            }
            let dist = (peak.mz - mz).abs();
            best = match best {
                Some((k, d)) if d < dist || (d == dist && k < j) => Some((k, d)),
                _ => Some((j, dist)),
            };
        }
        best.map(|(j, _)| j)
    }

    /// Iterate over the positions of indexed peaks whose m/z lies within `tolerance` of `mz`,
    /// in m/z bucket order.
    pub fn within<'a>(
        &'a self,
        peaks: &'a [Peak],
        mz: f64,
        tolerance: Tolerance,
    ) -> impl Iterator<Item = usize> + 'a {
        let (low, high) = tolerance.bounds(mz);
        let last = self.buckets.len() as isize - 1;
        let range = if high < 0.0 || low >= self.params.max_mz || last < 0 {
            0..0
        } else {
            let start = self.params.bucket_for(low).clamp(0, last) as usize;
            let end = self.params.bucket_for(high).clamp(0, last) as usize;
            start..(end + 1)
        };
        self.buckets[range]
            .iter()
            .flatten()
            .map(|j| *j as usize)
            .filter(move |j| tolerance.test(peaks[*j].mz, mz))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peaks() -> Vec<Peak> {
        vec![
            Peak::new(100.0, 10.0),
            Peak::new(100.05, 50.0),
            Peak::new(150.3, 20.0),
            Peak::new(200.0, 5.0),
            Peak::new(6000.0, 5.0),
        ]
    }

    #[test]
    fn test_coordinate_traits() {
        fn mz_of<T: CoordinateLike<MZ>>(peak: &T) -> f64 {
            peak.coordinate()
        }
        let a = Peak::new(100.0, 5.0);
        let b = Peak::new(200.0, 1.0);
        assert_eq!(mz_of(&a), 100.0);
        assert!(a < b);
        assert_eq!(b.intensity(), 1.0);
        assert_eq!(Peak::from(CentroidPeak::from(b)), b);
    }

    #[test]
    fn test_build() {
        let peaks = peaks();
        let index = MzPeakIndex::build(&peaks, PeakIndexParams::default());
        assert_eq!(index.collisions(), 1);
        assert_eq!(index.skipped(), 1);
        // The more intense peak wins the shared bucket
        let hit = index.nearest(&peaks, 100.0, Tolerance::Da(0.01));
        assert_eq!(hit, None);
        let hit = index.nearest(&peaks, 100.0, Tolerance::Da(0.1));
        assert_eq!(hit, Some(1));
    }

    #[test]
    fn test_nearest() {
        let peaks = peaks();
        let index = MzPeakIndex::build(&peaks, PeakIndexParams::default());
        assert_eq!(index.nearest(&peaks, 150.0, Tolerance::Da(0.5)), Some(2));
        assert_eq!(index.nearest(&peaks, 150.0, Tolerance::Da(0.2)), None);
        assert_eq!(index.nearest(&peaks, 199.9, Tolerance::Da(0.5)), Some(3));
        assert_eq!(index.nearest(&peaks, 6000.0, Tolerance::Da(0.5)), None);
        assert_eq!(index.nearest(&peaks, 175.0, Tolerance::Da(30.0)), Some(2));
    }

    #[test]
    fn test_bucket_edges() {
        // Rounding the lower bound of this window up would skip the peak's bucket
        let peaks = vec![Peak::new(100.39, 1.0)];
        let index = MzPeakIndex::build(&peaks, PeakIndexParams::default());
        assert_eq!(index.nearest(&peaks, 100.37, Tolerance::Da(0.05)), Some(0));
    }

    #[test]
    fn test_distance_ties() {
        let peaks = vec![Peak::new(99.75, 1.0), Peak::new(100.25, 1.0)];
        let index = MzPeakIndex::build(&peaks, PeakIndexParams::new(1, 1000.0));
        assert_eq!(index.nearest(&peaks, 100.0, Tolerance::Da(0.5)), Some(0));
    }

    #[test]
    fn test_within() {
        let peaks = peaks();
        let index = MzPeakIndex::build(&peaks, PeakIndexParams::default());
        let hits: Vec<_> = index.within(&peaks, 175.0, Tolerance::Da(30.0)).collect();
        assert_eq!(hits, vec![2, 3]);
        let hits: Vec<_> = index.within(&peaks, 9000.0, Tolerance::Da(30.0)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn test_traits() {
        let p = Peak::new(120.0, 3.0);
        assert_eq!(p.mz(), 120.0);
        let c: CentroidPeak = p.into();
        let q: Peak = c.into();
        assert_eq!(q.intensity(), 3.0);
    }
}
