//! Spectral parametrization: a power spectrum in log10 space is modelled as
//! an aperiodic component plus a sum of gaussian peaks.

use anyhow::{Context, Result, bail};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::bootstrap::percentile;
use crate::config::SpectralSettings;
use crate::fit::{LmOptions, curve_fit};

/// Share (as a percentile) of the flattened spectrum used to refit the aperiodic component.
const AP_PERCENTILE_THRESH: f64 = 0.025;
/// Peaks closer than this many standard deviations to a range edge are dropped.
const BW_STD_EDGE: f64 = 1.0;
/// Overlap, in standard deviations, above which the smaller of two peaks is dropped.
const GAUSS_OVERLAP_THRESH: f64 = 0.75;
/// Center frequency may move this many widths during the joint fit.
const CF_BOUND: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AperiodicMode {
    /// `offset - log10(f^exponent)`
    Fixed,
    /// `offset - log10(knee + f^exponent)`
    Knee,
}

impl AperiodicMode {
    pub fn n_params(self) -> usize {
        match self {
            AperiodicMode::Fixed => 2,
            AperiodicMode::Knee => 3,
        }
    }

    pub fn eval(self, f: f64, p: &[f64]) -> f64 {
        match self {
            AperiodicMode::Fixed => p[0] - p[1] * f.log10(),
            AperiodicMode::Knee => p[0] - (p[1] + f.powf(p[2])).log10(),
        }
    }

    fn bounds(self) -> Vec<(f64, f64)> {
        let free = (f64::NEG_INFINITY, f64::INFINITY);
        match self {
            AperiodicMode::Fixed => vec![free, free],
            AperiodicMode::Knee => vec![free, (0.0, f64::INFINITY), free],
        }
    }
}

fn gaussian_sum(f: f64, params: &[f64]) -> f64 {
    params
        .chunks_exact(3)
        .map(|g| g[1] * (-(f - g[0]).powi(2) / (2.0 * g[2] * g[2])).exp())
        .sum()
}

/// A fitted peak: center frequency, height over the aperiodic fit, full width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeakParams {
    pub cf: f64,
    pub power: f64,
    pub bandwidth: f64,
}

/// Gaussian peak as fitted: center, height, standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    pub cf: f64,
    pub height: f64,
    pub std: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SpectralModel {
    pub mode: AperiodicMode,
    /// First and last frequency inside the requested range.
    pub freq_range: (f64, f64),
    pub freq_res: f64,
    pub freqs: Vec<f64>,
    /// log10 power in the fitted range.
    pub power_spectrum: Vec<f64>,
    pub aperiodic_params: Vec<f64>,
    pub gaussians: Vec<Gaussian>,
    pub peak_params: Vec<PeakParams>,
    pub ap_fit: Vec<f64>,
    pub peak_fit: Vec<f64>,
    /// Spectrum with the aperiodic fit removed.
    pub spectrum_flat: Vec<f64>,
    pub spectrum_peak_rm: Vec<f64>,
    pub modeled_spectrum: Vec<f64>,
    pub r_squared: f64,
    /// Mean absolute error of the model.
    pub error: f64,
}

struct Fitter<'a> {
    settings: &'a SpectralSettings,
    freqs: &'a [f64],
    freq_res: f64,
    std_limits: (f64, f64),
    opts: LmOptions,
}

impl Fitter<'_> {
    fn ap(&self, p: &[f64]) -> Vec<f64> {
        let mode = self.settings.aperiodic_mode;
        self.freqs.iter().map(|&f| mode.eval(f, p)).collect()
    }

    fn simple_ap_fit(&self, freqs: &[f64], ys: &[f64], guess: Option<&[f64]>) -> Result<Vec<f64>> {
        let mode = self.settings.aperiodic_mode;
        let p0 = match guess {
            Some(g) => g.to_vec(),
            None => {
                let n = ys.len() - 1;
                let exp = ((ys[n] - ys[0]) / (freqs[n].log10() - freqs[0].log10())).abs();
                match mode {
                    AperiodicMode::Fixed => vec![ys[0], exp],
                    AperiodicMode::Knee => vec![ys[0], 0.0, exp],
                }
            }
        };
        let bounds = mode.bounds();
        let fit = curve_fit(|f, p| mode.eval(f, p), freqs, ys, &p0, Some(&bounds), &self.opts)
            .context("aperiodic fit failed")?;
        Ok(fit.params)
    }

    /// Refit the aperiodic component on the points that lie below an initial fit.
    fn robust_ap_fit(&self, ys: &[f64]) -> Result<Vec<f64>> {
        let popt = self.simple_ap_fit(self.freqs, ys, None)?;
        let initial = self.ap(&popt);
        let flat: Vec<f64> = ys.iter().zip(&initial).map(|(y, a)| (y - a).max(0.0)).collect();
        let thresh = percentile(&flat, AP_PERCENTILE_THRESH);

        let (f_sel, y_sel): (Vec<f64>, Vec<f64>) = self
            .freqs
            .iter()
            .zip(ys)
            .zip(&flat)
            .filter(|(_, fl)| **fl <= thresh)
            .map(|((f, y), _)| (*f, *y))
            .unzip();
        if f_sel.len() < self.settings.aperiodic_mode.n_params() {
            debug!("robust aperiodic fit: only {} points below the initial fit", f_sel.len());
            return Ok(popt);
        }
        self.simple_ap_fit(&f_sel, &y_sel, Some(&popt))
    }

    fn guess_peaks(&self, flat: &[f64]) -> Vec<Gaussian> {
        let s = self.settings;
        let mut flat_iter = flat.to_vec();
        let mut guesses = Vec::new();

        while guesses.len() < s.max_n_peaks {
            let Some((max_ind, &max_height)) =
                flat_iter.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1))
            else {
                break;
            };
            let n = flat_iter.len() as f64;
            let mean = flat_iter.iter().sum::<f64>() / n;
            let std = (flat_iter.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            if max_height <= s.peak_threshold * std || max_height <= s.min_peak_height {
                break;
            }

            let half = 0.5 * max_height;
            let left = (1..max_ind).rev().find(|&i| flat_iter[i] <= half);
            let right = (max_ind + 1..flat_iter.len()).find(|&i| flat_iter[i] <= half);
            let short_side = [left, right]
                .into_iter()
                .flatten()
                .map(|i| i.abs_diff(max_ind))
                .min();
            let std_guess = match short_side {
                Some(side) => {
                    let fwhm = side as f64 * 2.0 * self.freq_res;
                    fwhm / (2.0 * (2.0 * std::f64::consts::LN_2).sqrt())
                }
                None => (self.std_limits.0 + self.std_limits.1) / 2.0,
            }
            .clamp(self.std_limits.0, self.std_limits.1);

            let g = Gaussian {
                cf: self.freqs[max_ind],
                height: max_height,
                std: std_guess,
            };
            for (v, &f) in flat_iter.iter_mut().zip(self.freqs) {
                *v -= gaussian_sum(f, &[g.cf, g.height, g.std]);
            }
            guesses.push(g);
        }

        let (lo, hi) = self.span();
        guesses.retain(|g| {
            let edge = g.std * BW_STD_EDGE;
            (g.cf - lo).abs() > edge && (g.cf - hi).abs() > edge
        });

        guesses.sort_by(|a, b| a.cf.total_cmp(&b.cf));
        let mut drop = vec![false; guesses.len()];
        for i in 0..guesses.len().saturating_sub(1) {
            let (a, b) = (&guesses[i], &guesses[i + 1]);
            if a.cf + a.std * GAUSS_OVERLAP_THRESH > b.cf - b.std * GAUSS_OVERLAP_THRESH {
                drop[if a.height <= b.height { i } else { i + 1 }] = true;
            }
        }
        guesses
            .into_iter()
            .zip(drop)
            .filter(|(_, d)| !d)
            .map(|(g, _)| g)
            .collect()
    }

    /// First and last fitted frequency.
    fn span(&self) -> (f64, f64) {
        (self.freqs[0], self.freqs[self.freqs.len() - 1])
    }

    /// Initial parameters and bounds of the joint gaussian fit. Centres may move
    /// `2 * CF_BOUND` std around the guess, never past the fitted frequencies.
    fn peak_bounds(&self, guesses: &[Gaussian]) -> (Vec<f64>, Vec<(f64, f64)>) {
        let (lo, hi) = self.span();
        let mut p0 = Vec::with_capacity(guesses.len() * 3);
        let mut bounds = Vec::with_capacity(guesses.len() * 3);
        for g in guesses {
            p0.extend([g.cf, g.height, g.std]);
            let cf_lo = (g.cf - 2.0 * CF_BOUND * g.std).max(lo);
            let cf_hi = (g.cf + 2.0 * CF_BOUND * g.std).min(hi);
            bounds.push((cf_lo, cf_hi));
            bounds.push((self.settings.min_peak_height, f64::INFINITY));
            bounds.push(self.std_limits);
        }
        (p0, bounds)
    }

    fn fit_peaks(&self, flat: &[f64]) -> Result<Vec<Gaussian>> {
        let guesses = self.guess_peaks(flat);
        if guesses.is_empty() {
            return Ok(guesses);
        }
        let (p0, bounds) = self.peak_bounds(&guesses);
        let fit = curve_fit(gaussian_sum, self.freqs, flat, &p0, Some(&bounds), &self.opts)
            .context("peak fit failed")?;
        let mut out: Vec<Gaussian> = fit
            .params
            .chunks_exact(3)
            .map(|g| Gaussian {
                cf: g[0],
                height: g[1],
                std: g[2],
            })
            .collect();
        out.sort_by(|a, b| a.cf.total_cmp(&b.cf));
        Ok(out)
    }
}

impl SpectralModel {
    /// Fit the model to a linear-power spectrum within `freq_range` (inclusive).
    pub fn fit(
        freqs: &[f64],
        power: &[f64],
        freq_range: (f64, f64),
        settings: &SpectralSettings,
    ) -> Result<Self> {
        if freqs.len() != power.len() {
            bail!("{} frequencies for {} power values", freqs.len(), power.len());
        }
        let (f_in, p_in): (Vec<f64>, Vec<f64>) = freqs
            .iter()
            .zip(power)
            .filter(|(f, _)| **f >= freq_range.0 && **f <= freq_range.1)
            .map(|(f, p)| (*f, *p))
            .unzip();
        let mode = settings.aperiodic_mode;
        if f_in.len() <= mode.n_params() {
            bail!(
                "only {} frequencies in [{}, {}] Hz, too few to fit",
                f_in.len(),
                freq_range.0,
                freq_range.1
            );
        }
        if let Some(bad) = p_in.iter().find(|p| !(**p > 0.0 && p.is_finite())) {
            bail!("power spectrum must be positive and finite, found {bad}");
        }
        let ys: Vec<f64> = p_in.iter().map(|p| p.log10()).collect();

        let fitter = Fitter {
            settings,
            freqs: &f_in,
            freq_res: f_in[1] - f_in[0],
            std_limits: (settings.peak_width_limits.0 / 2.0, settings.peak_width_limits.1 / 2.0),
            opts: LmOptions::default(),
        };

        let robust = fitter.robust_ap_fit(&ys)?;
        let initial_ap = fitter.ap(&robust);
        let flat: Vec<f64> = ys.iter().zip(&initial_ap).map(|(y, a)| y - a).collect();

        let gaussians = fitter.fit_peaks(&flat)?;
        let g_flat: Vec<f64> = gaussians.iter().flat_map(|g| [g.cf, g.height, g.std]).collect();
        let peak_fit: Vec<f64> = f_in.iter().map(|&f| gaussian_sum(f, &g_flat)).collect();

        let spectrum_peak_rm: Vec<f64> = ys.iter().zip(&peak_fit).map(|(y, p)| y - p).collect();
        let aperiodic_params = fitter.simple_ap_fit(&f_in, &spectrum_peak_rm, None)?;
        let ap_fit = fitter.ap(&aperiodic_params);
        let spectrum_flat: Vec<f64> = ys.iter().zip(&ap_fit).map(|(y, a)| y - a).collect();
        let modeled_spectrum: Vec<f64> = peak_fit.iter().zip(&ap_fit).map(|(p, a)| p + a).collect();

        let peak_params = gaussians
            .iter()
            .map(|g| {
                let ind = nearest_index(&f_in, g.cf);
                PeakParams {
                    cf: g.cf,
                    power: modeled_spectrum[ind] - ap_fit[ind],
                    bandwidth: 2.0 * g.std,
                }
            })
            .collect();

        let r_squared = pearson(&ys, &modeled_spectrum).powi(2);
        let error = ys
            .iter()
            .zip(&modeled_spectrum)
            .map(|(a, b)| (a - b).abs())
            .sum::<f64>()
            / ys.len() as f64;
        debug!(
            "spectral model: ap {:?}, {} peaks, r2 {:.4}, error {:.4}",
            aperiodic_params,
            gaussians.len(),
            r_squared,
            error
        );

        Ok(Self {
            mode,
            freq_range: fitter.span(),
            freq_res: fitter.freq_res,
            freqs: f_in,
            power_spectrum: ys,
            aperiodic_params,
            gaussians,
            peak_params,
            ap_fit,
            peak_fit,
            spectrum_flat,
            spectrum_peak_rm,
            modeled_spectrum,
            r_squared,
            error,
        })
    }

    pub fn offset(&self) -> f64 {
        self.aperiodic_params[0]
    }

    pub fn knee(&self) -> Option<f64> {
        (self.mode == AperiodicMode::Knee).then(|| self.aperiodic_params[1])
    }

    pub fn exponent(&self) -> f64 {
        self.aperiodic_params[self.aperiodic_params.len() - 1]
    }
}

fn nearest_index(xs: &[f64], target: f64) -> usize {
    xs.iter()
        .enumerate()
        .min_by(|a, b| (a.1 - target).abs().total_cmp(&(b.1 - target).abs()))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let ma = a.iter().sum::<f64>() / n;
    let mb = b.iter().sum::<f64>() / n;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        sab += (x - ma) * (y - mb);
        saa += (x - ma).powi(2);
        sbb += (y - mb).powi(2);
    }
    if saa == 0.0 || sbb == 0.0 {
        return 0.0;
    }
    sab / (saa * sbb).sqrt()
}
