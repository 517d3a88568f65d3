use std::fmt::Write as _;
use std::io::Cursor;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use mzpsm::candidate::{DecoyKind, MassType};
use mzpsm::io::Ms2Reader;
use mzpsm::qvalue::decoy_qvalues;
use mzpsm::scorer::IonMatchScorer;
use mzpsm::{
    Candidate, CandidateLike, Match, MatchCollection, Peptide, ScoreKind, SearchConfig,
    SearchEngine, SortOrder, Spectrum, ZState,
};

fn candidate(sequence: &str) -> Arc<Candidate> {
    Arc::new(Candidate::from(Peptide::parse(sequence).unwrap()))
}

#[test_log::test]
fn test_target_outranks_decoy() {
    let mut spectrum = Spectrum::new(1, 1, 450.0);
    spectrum.add_peak(150.0, 10.0);
    spectrum.add_peak(250.0, 40.0);
    spectrum.add_peak(350.0, 25.0);
    let spectrum = Arc::new(spectrum);
    let z = ZState::from_mz(450.0, 2);

    let target_source = candidate("PEPTIDEK");
    let mut rng = StdRng::seed_from_u64(1);
    let decoy = target_source.shuffle(DecoyKind::Shuffle, &mut rng);

    let mut decoy_match = Match::decoy(spectrum.clone(), z, target_source.clone(), decoy);
    decoy_match.set_score(ScoreKind::Primary, 5.1);
    let mut target_match = Match::target(spectrum.clone(), z, target_source);
    target_match.set_score(ScoreKind::Primary, 7.2);

    let mut collection = MatchCollection::new();
    collection.add(decoy_match);
    let target_id = collection.add(target_match);

    collection.sort(SortOrder::Score(ScoreKind::Primary)).unwrap();
    collection.populate_rank(ScoreKind::Primary).unwrap();

    let target = collection.get(target_id).unwrap();
    assert!(!target.is_decoy());
    assert_eq!(target.rank(ScoreKind::Primary).unwrap(), 1);
    assert_eq!(target.score(ScoreKind::Primary).unwrap(), 7.2);
    let best = collection.iter().next().unwrap();
    assert!(!best.is_decoy());
}

#[test_log::test]
fn test_ranks_are_a_permutation() {
    let spectrum = Arc::new(Spectrum::new(5, 5, 600.0));
    let z = ZState::from_mz(600.0, 2);
    let source = candidate("SAMPLER");
    let mut rng = StdRng::seed_from_u64(42);

    for n in [1usize, 2, 17, 100] {
        let mut collection = MatchCollection::new();
        for _ in 0..n {
            let mut m = Match::target(spectrum.clone(), z, source.clone());
            // Coarse values so ties occur
            m.set_score(ScoreKind::Primary, rng.gen_range(0..20) as f64 / 4.0);
            collection.add(m);
        }
        collection.populate_rank(ScoreKind::Primary).unwrap();

        let mut ranked: Vec<(f64, u32)> = collection
            .iter()
            .map(|m| {
                (
                    m.score(ScoreKind::Primary).unwrap(),
                    m.rank(ScoreKind::Primary).unwrap(),
                )
            })
            .collect();
        let mut ranks: Vec<u32> = ranked.iter().map(|(_, r)| *r).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, (1..=n as u32).collect::<Vec<_>>());

        ranked.sort_by(|a, b| a.1.cmp(&b.1));
        for pair in ranked.windows(2) {
            assert!(pair[0].0 >= pair[1].0, "{pair:?}");
        }
    }
}

#[test_log::test]
fn test_qvalue_reference() {
    let targets = [10.0, 9.0, 8.0, 7.0];
    let decoys = [9.0, 5.0];
    let q = decoy_qvalues(
        &targets,
        &decoys,
        ScoreKind::Primary.interpretation(),
    )
    .unwrap();
    assert!(q.windows(2).all(|w| w[0] <= w[1]));
    // No decoy reaches the best target, so its q-value is its raw FDR
    assert_eq!(q[0], 0.0);
    assert_eq!(q, vec![0.0, 0.5, 0.5, 0.5]);
}

fn write_ms2(text: &mut String, scan: u32, peptide: &Peptide) {
    let mass = peptide.compute_mass(MassType::Monoisotopic);
    let z = ZState::from_neutral_mass(mass, 2);
    writeln!(text, "S\t{scan}\t{scan}\t{:.5}", z.mz()).unwrap();
    writeln!(text, "Z\t2\t{:.5}", z.singly_charged_mass()).unwrap();
    let mut ions = peptide.predict_fragment_ions(1, MassType::Monoisotopic);
    ions.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    for ion in ions {
        writeln!(text, "{:.4} 100", ion.mz).unwrap();
    }
}

#[test_log::test]
fn test_search_identifies_synthetic_spectra() {
    let sequences = ["K.PEPTIDEK.A", "R.SAMPLEDR.G", "R.NEGVTSAFESK.-", "R.GYFWK.L"];
    let peptides: Vec<Peptide> = sequences
        .iter()
        .map(|s| Peptide::parse(s).unwrap())
        .collect();
    let mut text = String::from("H\tExtractor\tsynthetic\n");
    for (i, p) in peptides.iter().enumerate() {
        write_ms2(&mut text, i as u32 + 1, p);
    }
    let spectra: Vec<Spectrum> = Ms2Reader::new(Cursor::new(text))
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(spectra.len(), 4);

    let database: Vec<Arc<Candidate>> = peptides
        .iter()
        .map(|p| Arc::new(Candidate::from(p.clone())))
        .collect();
    let mut config = SearchConfig::default();
    config.decoys.seed = 7;
    let scorer = IonMatchScorer::from_config(&config);
    let engine = SearchEngine::new(
        config,
        move |_: &Spectrum, _: &ZState| database.clone(),
        scorer,
    );
    let results = engine.search(spectra);
    assert!(results.failures.is_empty());
    assert_eq!(results.matches.len(), 4);

    for (s, expected) in results.matches.iter().zip(peptides.iter()) {
        let best = s.collection.iter().next().unwrap();
        assert!(!best.is_decoy());
        assert_eq!(best.sequence(), expected.sequence());
        assert_eq!(best.rank(ScoreKind::Primary).unwrap(), 1);
        assert_eq!(best.b_y_ions_matched, best.b_y_ions_possible);
        assert!(best.has_score(ScoreKind::PrimaryQValue));
    }
    let records = results.records();
    assert!(records.iter().all(|r| r.xcorr.is_some()));
}
