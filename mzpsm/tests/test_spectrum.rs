use std::fs;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use mzpeaks::Tolerance;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mzpsm::charge::ChargeSelection;
use mzpsm::io::{open_mgf_path, open_ms2_path};
use mzpsm::peaks::{MzPeakIndex, Peak, PeakIndexParams};
use mzpsm::weibull::WeibullScope;
use mzpsm::{SearchConfig, Spectrum};

/// Peaks at least one index bucket apart so none collide
fn spread_peaks(rng: &mut StdRng, n: usize) -> Vec<Peak> {
    (0..n)
        .map(|i| {
            let mz = 100.0 + i as f64 * 0.5 + rng.gen_range(0.0..0.2);
            Peak::new(mz, rng.gen_range(1.0..1000.0))
        })
        .collect()
}

fn brute_force_nearest(peaks: &[Peak], mz: f64, tol: Tolerance) -> Option<usize> {
    peaks
        .iter()
        .enumerate()
        .filter(|(_, p)| tol.test(p.mz, mz))
        .min_by(|(_, a), (_, b)| (a.mz - mz).abs().total_cmp(&(b.mz - mz).abs()))
        .map(|(i, _)| i)
}

#[test_log::test]
fn test_nearest_matches_brute_force() {
    let mut rng = StdRng::seed_from_u64(99);
    let peaks = spread_peaks(&mut rng, 400);
    let params = PeakIndexParams::default();
    let index = MzPeakIndex::build(&peaks, params);
    let rebuilt = MzPeakIndex::build(&peaks, params);
    assert_eq!(index.collisions(), 0);

    for tol in [Tolerance::Da(0.05), Tolerance::Da(0.3), Tolerance::PPM(500.0)] {
        for _ in 0..2000 {
            let mz = rng.gen_range(90.0..310.0);
            let expected = brute_force_nearest(&peaks, mz, tol);
            let found = index.nearest(&peaks, mz, tol);
            assert_eq!(found, expected, "query {mz} with {tol:?}");
            assert_eq!(rebuilt.nearest(&peaks, mz, tol), found);
            if let Some(i) = found {
                assert!(tol.test(peaks[i].mz, mz));
            }
        }
    }
}

#[test_log::test]
fn test_spectrum_index_follows_mutation() {
    let mut spectrum = Spectrum::new(1, 1, 500.0);
    spectrum.add_peak(200.0, 10.0);
    assert!(spectrum.nearest_peak(300.0, Tolerance::Da(0.5)).is_none());
    assert!(spectrum.is_indexed());

    spectrum.add_peak(300.1, 5.0);
    assert!(!spectrum.is_indexed());
    let peak = spectrum.nearest_peak(300.0, Tolerance::Da(0.5)).unwrap();
    assert_eq!(peak.mz, 300.1);
}

#[test_log::test]
fn test_sum_normalize() {
    let mut rng = StdRng::seed_from_u64(8);
    for n in [1usize, 3, 250] {
        let mut spectrum = Spectrum::new(1, 1, 800.0);
        for _ in 0..n {
            spectrum.add_peak(rng.gen_range(50.0..2000.0), rng.gen_range(0.5..1e6));
        }
        spectrum.sum_normalize().unwrap();
        let total: f64 = spectrum.peaks().iter().map(|p| p.intensity as f64).sum();
        assert!((total - 1.0).abs() < 1e-4, "{total}");
        assert!((spectrum.total_intensity() - 1.0).abs() < 1e-4);
    }

    let mut empty = Spectrum::new(2, 2, 800.0);
    assert!(empty.sum_normalize().is_err());
}

const MS2: &str = "S\t000100\t000100\t722.40
Z\t2\t1443.7927
201.12 120
302.2 55
";

const MGF: &str = "BEGIN IONS
TITLE=scan 100
PEPMASS=722.40
CHARGE=2+
201.12 120
302.2 55
END IONS
";

#[test_log::test]
fn test_read_compressed_files() {
    let dir = std::env::temp_dir().join(format!("mzpsm-io-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();

    let write_gz = |name: &str, text: &str| {
        let path = dir.join(name);
        let mut encoder = GzEncoder::new(fs::File::create(&path).unwrap(), Compression::fast());
        encoder.write_all(text.as_bytes()).unwrap();
        encoder.finish().unwrap();
        path
    };
    let ms2_path = write_gz("run.ms2.gz", MS2);
    let mgf_gz_path = write_gz("run.mgf.gz", MGF);
    let mgf_path = dir.join("run.mgf");
    fs::write(&mgf_path, MGF).unwrap();

    let from_ms2: Vec<Spectrum> = open_ms2_path(&ms2_path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let from_mgf: Vec<Spectrum> = open_mgf_path(&mgf_path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let from_mgf_gz: Vec<Spectrum> = open_mgf_path(&mgf_gz_path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(from_mgf_gz.len(), 1);
    assert_eq!(from_mgf_gz[0].peaks(), from_mgf[0].peaks());
    assert_eq!(from_ms2.len(), 1);
    assert_eq!(from_mgf.len(), 1);
    let (a, b) = (&from_ms2[0], &from_mgf[0]);
    assert_eq!(a.first_scan, 100);
    assert_eq!(b.first_scan, 1);
    assert_eq!(a.peaks(), b.peaks());
    assert_eq!(a.zstates()[0].charge(), b.zstates()[0].charge());
    assert!((a.zstates()[0].neutral_mass() - b.zstates()[0].neutral_mass()).abs() < 1e-3);

    fs::remove_dir_all(&dir).unwrap();
}

#[test_log::test]
fn test_load_config_file() {
    let dir = std::env::temp_dir().join(format!("mzpsm-config-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join("mzpsm.toml");
    fs::write(
        &path,
        r#"
top_match = 10
spectrum_charge = { only = 3 }
fragment_tolerance = { unit = "ppm", value = 20.0 }

[decoys]
decoys_per_target = 2
seed = 1234

[weibull]
scope = "pooled"
"#,
    )
    .unwrap();
    let config = SearchConfig::load(Some(&path)).unwrap();
    assert_eq!(config.top_match, 10);
    assert_eq!(config.spectrum_charge, ChargeSelection::Only(3));
    assert_eq!(config.decoys.decoys_per_target, 2);
    assert_eq!(config.decoys.seed, 1234);
    assert_eq!(config.weibull.scope, WeibullScope::Pooled);
    assert_eq!(config.peak_index, PeakIndexParams::default());
    assert!(matches!(config.fragment_tolerance(), Tolerance::PPM(x) if x == 20.0));

    let rendered = config.to_toml().unwrap();
    assert!(rendered.contains("pooled"));
    assert!(rendered.contains("ppm"));
    fs::remove_dir_all(&dir).unwrap();
}
