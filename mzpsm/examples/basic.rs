//! Search a few MS2 spectra against a handful of peptides and print the best match for each.
use std::fmt::Write as _;
use std::io;
use std::sync::Arc;

use mzpsm::candidate::MassType;
use mzpsm::io::Ms2Reader;
use mzpsm::scorer::IonMatchScorer;
use mzpsm::{Candidate, CandidateLike, Peptide, ScoreKind, SearchConfig, SearchEngine, Spectrum, ZState};

/// Write an MS2 record whose peaks are the singly charged b and y ions of `peptide`
fn synthesize(text: &mut String, scan: u32, peptide: &Peptide) {
    let mass = peptide.compute_mass(MassType::Monoisotopic);
    let z = ZState::from_neutral_mass(mass, 2);
    writeln!(text, "S\t{scan}\t{scan}\t{:.4}", z.mz()).unwrap();
    writeln!(text, "Z\t2\t{:.4}", z.singly_charged_mass()).unwrap();
    let mut ions = peptide.predict_fragment_ions(1, MassType::Monoisotopic);
    ions.sort_by(|a, b| a.mz.total_cmp(&b.mz));
    for (i, ion) in ions.iter().enumerate() {
        writeln!(text, "{:.4} {}", ion.mz, 100 + 10 * i).unwrap();
    }
}

fn main() -> io::Result<()> {
    tracing_subscriber::fmt::init();

    let peptides: Vec<Peptide> = ["K.PEPTIDEK.A", "R.SAMPLEDR.G", "K.ELVISLIVESK.-"]
        .iter()
        .map(|s| Peptide::parse(s).unwrap())
        .collect();

    let mut text = String::new();
    for (i, peptide) in peptides.iter().enumerate() {
        synthesize(&mut text, i as u32 + 1, peptide);
    }
    let spectra: Vec<Spectrum> = Ms2Reader::new(io::Cursor::new(text))
        .collect::<Result<_, _>>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let database: Vec<Arc<Candidate>> = peptides
        .into_iter()
        .map(|p| Arc::new(Candidate::from(p)))
        .collect();

    let config = SearchConfig::default();
    let scorer = IonMatchScorer::from_config(&config);
    let engine = SearchEngine::new(config, |_: &Spectrum, _: &ZState| database.clone(), scorer);
    let results = engine.search(spectra);

    for m in results.best_targets(ScoreKind::Primary) {
        println!(
            "{}\t{}\t{:.3}\tq={:.3}",
            m.scan(),
            m.sequence_string(),
            m.get_score(ScoreKind::Primary).unwrap_or_default(),
            m.get_score(ScoreKind::PrimaryQValue).unwrap_or(1.0),
        );
    }
    Ok(())
}
