use n170_core::Condition;
use ndarray::{ArrayView2, Axis};
use rand::Rng;

use crate::epochs::Epochs;

/// Linear-interpolated percentile of already sorted values, `q` in `[0, 100]`.
pub(crate) fn percentile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}

pub(crate) fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_sorted(&sorted, q)
}

/// Mean over epochs with a bootstrap confidence band.
///
/// `trials` is `[n_epochs, n_times]`. Each of the `n_boot` resamples draws
/// `n_epochs` rows with replacement; the band is the central `ci` percent of
/// the resampled means at each time point.
pub fn bootstrap_ci<R: Rng + ?Sized>(
    trials: ArrayView2<f64>,
    ci: f64,
    n_boot: usize,
    rng: &mut R,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    let (n, n_times) = trials.dim();
    let mean: Vec<f64> = match trials.mean_axis(Axis(0)) {
        Some(m) => m.to_vec(),
        None => return (Vec::new(), Vec::new(), Vec::new()),
    };
    if n_boot == 0 {
        return (mean.clone(), mean.clone(), mean);
    }

    // boot_means[t][b]
    let mut boot_means = vec![Vec::with_capacity(n_boot); n_times];
    let mut acc = vec![0.0; n_times];
    for _ in 0..n_boot {
        acc.iter_mut().for_each(|a| *a = 0.0);
        for _ in 0..n {
            let row = trials.row(rng.random_range(0..n));
            for (a, v) in acc.iter_mut().zip(row.iter()) {
                *a += v;
            }
        }
        for (t, a) in acc.iter().enumerate() {
            boot_means[t].push(a / n as f64);
        }
    }

    let tail = (100.0 - ci) / 2.0;
    let mut lower = Vec::with_capacity(n_times);
    let mut upper = Vec::with_capacity(n_times);
    for samples in &mut boot_means {
        samples.sort_by(f64::total_cmp);
        lower.push(percentile_sorted(samples, tail));
        upper.push(percentile_sorted(samples, 100.0 - tail));
    }
    (mean, lower, upper)
}

/// Per-channel ERP trace of one condition with its confidence band.
#[derive(Debug, Clone)]
pub struct ConditionSummary {
    pub condition: Condition,
    pub channel: String,
    pub times: Vec<f64>,
    pub mean: Vec<f64>,
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
    pub n_epochs: usize,
}

impl ConditionSummary {
    pub fn from_epochs<R: Rng + ?Sized>(
        epochs: &Epochs,
        condition: Condition,
        channel: usize,
        ci: f64,
        n_boot: usize,
        rng: &mut R,
    ) -> Option<Self> {
        let picked = epochs.select(condition);
        if picked.is_empty() || channel >= epochs.ch_names.len() {
            return None;
        }
        let trials = picked.index_axis(Axis(1), channel);
        let (mean, lower, upper) = bootstrap_ci(trials, ci, n_boot, rng);
        Some(Self {
            condition,
            channel: epochs.ch_names[channel].clone(),
            times: epochs.times(),
            mean,
            lower,
            upper,
            n_epochs: picked.len_of(Axis(0)),
        })
    }
}
