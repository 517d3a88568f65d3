//! Target-decoy q-value estimation
use thiserror::Error;
use tracing::debug;

use crate::scorer::{ScoreInterpretation, ScoreType};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QValueError {
    #[error("Cannot estimate q-values for {targets} targets without any decoys")]
    NoDecoys { targets: usize },
}

/// Count the leading entries of `sorted` (best first) that are at least as good as `score`
fn count_at_least(sorted: &[ScoreType], score: ScoreType, interp: ScoreInterpretation) -> usize {
    sorted.partition_point(|x| interp.compare(*x, score) != std::cmp::Ordering::Greater)
}

/// Estimate a q-value for every target score from the decoy score population.
///
/// For a target scoring `s` the false discovery rate is the number of decoys at least as good as
/// `s` over the number of targets at least as good as `s`, scaled by the ratio of targets to
/// decoys and capped at 1. Each q-value is the smallest such rate at any threshold that would
/// still accept the target. Scores may be given in any order, and the q-values are returned in
/// the same order as `targets`.
pub fn decoy_qvalues(
    targets: &[ScoreType],
    decoys: &[ScoreType],
    interpretation: ScoreInterpretation,
) -> Result<Vec<f64>, QValueError> {
    if targets.is_empty() {
        return Ok(Vec::new());
    }
    if decoys.is_empty() {
        return Err(QValueError::NoDecoys {
            targets: targets.len(),
        });
    }
    let mut sorted_decoys = decoys.to_vec();
    sorted_decoys.sort_by(|a, b| interpretation.compare(*a, *b));

    let mut order: Vec<usize> = (0..targets.len()).collect();
    order.sort_by(|a, b| interpretation.compare(targets[*a], targets[*b]));
    let sorted_targets: Vec<ScoreType> = order.iter().map(|i| targets[*i]).collect();

    let ratio = targets.len() as f64 / decoys.len() as f64;

    let mut fdr: Vec<f64> = sorted_targets
        .iter()
        .map(|s| {
            let n_decoy = count_at_least(&sorted_decoys, *s, interpretation) as f64;
            let n_target = count_at_least(&sorted_targets, *s, interpretation) as f64;
            (n_decoy * ratio / n_target).min(1.0)
        })
        .collect();

    let mut q_min = 1.0f64;
    for q in fdr.iter_mut().rev() {
        q_min = q_min.min(*q);
        *q = q_min;
    }

    let mut qvalues = vec![0.0; targets.len()];
    for (i, q) in order.into_iter().zip(fdr) {
        qvalues[i] = q;
    }
    debug!(
        "Estimated q-values for {} targets against {} decoys",
        targets.len(),
        decoys.len()
    );
    Ok(qvalues)
}

/// The number of q-values at or below `threshold`
pub fn count_passing(qvalues: &[f64], threshold: f64) -> usize {
    qvalues.iter().filter(|q| **q <= threshold).count()
}
