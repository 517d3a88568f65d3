//! Weibull tail fitting for estimating the significance of high scores.
//!
//! The extreme tail of a spectrum's candidate score distribution is modeled with a
//! shifted Weibull distribution. For a fixed shift the fit is a least-squares line on
//! a Weibull plot of the highest scores against their median-rank quantiles; the
//! shift itself is chosen by a grid search maximizing the correlation of that line.
//!
//! ```math
//! p(x) = \exp\left(-\left(\frac{x + c}{\eta}\right)^\beta\right)
//! ```
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WeibullError {
    #[error("Degenerate Weibull fit at shift {shift:.3} over {points} points")]
    DegenerateFit { shift: f64, points: usize },
    #[error("A Weibull fit needs at least {required} scores, but only {found} were given")]
    InsufficientData { required: usize, found: usize },
    #[error("No shift between {min_shift} and {max_shift} produced a positive correlation")]
    NoCorrelatedShift { min_shift: f64, max_shift: f64 },
    #[error("The best Weibull fit has correlation {correlation:.4}, below the threshold {threshold:.4}")]
    CorrelationBelowThreshold { correlation: f64, threshold: f64 },
}

/// Whether a Weibull model is fit for every spectrum or once on a pooled population
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeibullScope {
    #[default]
    PerSpectrum,
    Pooled,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeibullParams {
    /// The fraction of the highest scores used in the regression
    pub fraction_to_fit: f64,
    /// The smallest score population a fit is attempted on
    pub min_matches: usize,
    pub min_shift: f64,
    pub max_shift: f64,
    pub shift_step: f64,
    /// How far the correlation may fall below the best seen before the shift search stops
    pub correlation_tolerance: f64,
    /// Fits with a lower correlation than this are rejected
    pub correlation_threshold: f64,
    /// Correct p-values for the number of candidates compared against a spectrum
    pub bonferroni: bool,
    pub scope: WeibullScope,
}

impl Default for WeibullParams {
    fn default() -> Self {
        Self {
            fraction_to_fit: 0.55,
            min_matches: 40,
            min_shift: -5.0,
            max_shift: 5.0,
            shift_step: 0.05,
            correlation_tolerance: 0.1,
            correlation_threshold: 0.0,
            bonferroni: true,
            scope: WeibullScope::PerSpectrum,
        }
    }
}

/// A fitted shifted Weibull distribution
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeibullFit {
    /// Scale
    pub eta: f64,
    /// Shape
    pub beta: f64,
    pub shift: f64,
    /// The Pearson correlation of the Weibull plot the parameters were read from
    pub correlation: f64,
    /// The number of scores the regression was computed over
    pub fit_points: usize,
}

impl WeibullFit {
    /// The probability of observing a score at least as high as `score`
    pub fn p_value(&self, score: f64) -> f64 {
        let shifted = score + self.shift;
        if shifted <= 0.0 {
            return 1.0;
        }
        (-(shifted / self.eta).powf(self.beta)).exp()
    }
}

/// Correct a p-value for `n` independent tests
pub fn bonferroni_correct(p_value: f64, n: usize) -> f64 {
    if n <= 1 {
        return p_value;
    }
    // 1 - (1 - p)^n without losing precision for small p
    -(n as f64 * (-p_value).ln_1p()).exp_m1()
}

/// Fit a two-parameter Weibull distribution to the top `fit_points` of `scores` after adding
/// `shift` to each.
///
/// `scores` must be sorted in descending order, and `total_points` is the size of the whole
/// population the scores were drawn from, which sets the median-rank quantiles. The window
/// stops at the first score that is not positive after shifting.
pub fn fit_two_parameter(
    scores: &[f64],
    fit_points: usize,
    total_points: usize,
    shift: f64,
) -> Result<WeibullFit, WeibullError> {
    let fit_points = fit_points.min(scores.len());
    let mut xs: Vec<f64> = Vec::with_capacity(fit_points);
    for (i, s) in scores.iter().take(fit_points).enumerate() {
        let shifted = s + shift;
        if shifted <= 0.0 {
            trace!("Reached a non-positive score at {i} with shift {shift}");
            break;
        }
        xs.push(shifted.ln());
    }
    let n = xs.len();
    if n < 2 || xs.iter().all(|x| *x == xs[0]) {
        return Err(WeibullError::DegenerateFit { shift, points: n });
    }

    let total = total_points as f64;
    let ys: Vec<f64> = (0..n)
        .map(|i| {
            let f = (total - i as f64 - 0.3) / (total + 0.4);
            (-(1.0 - f).ln()).ln()
        })
        .collect();

    let nf = n as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xx = 0.0;
    let mut sum_xy = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        sum_x += x;
        sum_y += y;
        sum_xx += x * x;
        sum_xy += x * y;
    }

    let b_denom = sum_xx - sum_x * sum_x / nf;
    if b_denom == 0.0 {
        return Err(WeibullError::DegenerateFit { shift, points: n });
    }
    let b = (sum_xy - sum_x * sum_y / nf) / b_denom;
    let a = (sum_y - b * sum_x) / nf;
    let beta = b;
    let eta = (-a / b).exp();

    let mean_x = sum_x / nf;
    let mean_y = sum_y / nf;
    let mut c_num = 0.0;
    let mut c_denom_x = 0.0;
    let mut c_denom_y = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        c_num += dx * dy;
        c_denom_x += dx * dx;
        c_denom_y += dy * dy;
    }
    let c_denom = (c_denom_x * c_denom_y).sqrt();
    if c_denom == 0.0 {
        return Err(WeibullError::DegenerateFit { shift, points: n });
    }
    let correlation = c_num / c_denom;
    trace!("shift={shift:.3} eta={eta:.6} beta={beta:.6} correlation={correlation:.6}");

    Ok(WeibullFit {
        eta,
        beta,
        shift,
        correlation,
        fit_points: n,
    })
}

/// Fit a three-parameter Weibull distribution by searching shifts from `max_shift` down
/// towards `min_shift`.
///
/// The search keeps the best correlation seen and stops once a trial falls more than
/// `correlation_tolerance` below it. It also stops when a shift leaves fewer than two
/// positive scores in the window, since every smaller shift leaves fewer still.
pub fn fit_three_parameter(
    scores: &[f64],
    fit_points: usize,
    total_points: usize,
    params: &WeibullParams,
) -> Result<WeibullFit, WeibullError> {
    scan_shifts(params, |shift| {
        fit_two_parameter(scores, fit_points, total_points, shift)
    })
}

fn scan_shifts<F>(params: &WeibullParams, mut trial: F) -> Result<WeibullFit, WeibullError>
where
    F: FnMut(f64) -> Result<WeibullFit, WeibullError>,
{
    let mut best: Option<WeibullFit> = None;
    let mut k = 0usize;
    loop {
        let shift = params.max_shift - k as f64 * params.shift_step;
        if !(shift > params.min_shift) || params.shift_step <= 0.0 {
            break;
        }
        k += 1;
        let fit = match trial(shift) {
            Ok(fit) => fit,
            Err(WeibullError::DegenerateFit { points, .. }) if points < 2 => {
                debug!("The fit window collapsed at shift {shift:.3}");
                break;
            }
            Err(e) => return Err(e),
        };
        debug!(
            "Weibull trial shift={shift:.3} correlation={:.6}",
            fit.correlation
        );
        let best_correlation = best.map(|b| b.correlation).unwrap_or(0.0);
        if fit.correlation > best_correlation {
            best = Some(fit);
        } else if fit.correlation < best_correlation - params.correlation_tolerance {
            info!(
                "Stopping shift scan at {shift:.3}, correlation {:.6} fell below best {best_correlation:.6}",
                fit.correlation
            );
            break;
        }
    }
    best.ok_or(WeibullError::NoCorrelatedShift {
        min_shift: params.min_shift,
        max_shift: params.max_shift,
    })
}

/// Fit a Weibull tail model to an unordered score population.
///
/// Fails when there are fewer than `params.min_matches` scores or when the best fit's
/// correlation is below `params.correlation_threshold`.
pub fn fit_scores(scores: &[f64], params: &WeibullParams) -> Result<WeibullFit, WeibullError> {
    if scores.len() < params.min_matches.max(2) {
        return Err(WeibullError::InsufficientData {
            required: params.min_matches.max(2),
            found: scores.len(),
        });
    }
    let mut sorted: Vec<f64> = scores.to_vec();
    sorted.sort_by(|a, b| b.total_cmp(a));
    let total = sorted.len();
    let fit_points = ((total as f64 * params.fraction_to_fit) as usize).clamp(2, total);
    let fit = fit_three_parameter(&sorted, fit_points, total, params)?;
    if fit.correlation < params.correlation_threshold {
        return Err(WeibullError::CorrelationBelowThreshold {
            correlation: fit.correlation,
            threshold: params.correlation_threshold,
        });
    }
    info!(
        "Fit Weibull eta={:.4} beta={:.4} shift={:.3} correlation={:.4} over {} of {} scores",
        fit.eta, fit.beta, fit.shift, fit.correlation, fit.fit_points, total
    );
    Ok(fit)
}
