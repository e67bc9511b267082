use anyhow::{Result, bail};
use ndarray::{Array2, ArrayView1};
use rustfft::{FftPlanner, num_complex::Complex64};
use std::f64::consts::PI;

use crate::epochs::Evoked;

/// Periodic Hamming window (FFT convention, `N` in the denominator).
pub fn hamming_periodic(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => (0..n)
            .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / n as f64).cos())
            .collect(),
    }
}

/// Power spectral density, `power` is `[n_channels, n_freqs]` in V²/Hz.
#[derive(Debug, Clone)]
pub struct Psd {
    pub freqs: Vec<f64>,
    pub power: Array2<f64>,
}

impl Psd {
    /// Welch PSD of every channel of an evoked response, one segment spanning
    /// the whole average with half overlap.
    pub fn of_evoked(evoked: &Evoked) -> Result<Self> {
        let n = evoked.n_times();
        Self::of_rows(&evoked.data, evoked.sfreq, n, n / 2)
    }

    pub fn of_rows(data: &Array2<f64>, sfreq: f64, n_fft: usize, n_overlap: usize) -> Result<Self> {
        let mut freqs = Vec::new();
        let mut rows = Vec::with_capacity(data.nrows());
        for row in data.rows() {
            let (f, p) = welch(row, sfreq, n_fft, n_overlap)?;
            freqs = f;
            rows.extend(p);
        }
        let power = Array2::from_shape_vec((data.nrows(), freqs.len()), rows)?;
        Ok(Self { freqs, power })
    }
}

/// Welch's method: Hamming-windowed segments of `n_fft` samples, stepping by
/// `n_fft - n_overlap`, averaged with the mean. One-sided density scaling.
pub fn welch(
    x: ArrayView1<f64>,
    sfreq: f64,
    n_fft: usize,
    n_overlap: usize,
) -> Result<(Vec<f64>, Vec<f64>)> {
    if n_fft == 0 || n_overlap >= n_fft {
        bail!("invalid welch segments: n_fft {n_fft}, n_overlap {n_overlap}");
    }
    if x.len() < n_fft {
        bail!("signal of {} samples is shorter than n_fft {n_fft}", x.len());
    }
    let window = hamming_periodic(n_fft);
    let scale = 1.0 / (sfreq * window.iter().map(|w| w * w).sum::<f64>());
    let step = n_fft - n_overlap;
    let n_freqs = n_fft / 2 + 1;

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let mut buf = vec![Complex64::new(0.0, 0.0); n_fft];
    let mut acc = vec![0.0; n_freqs];
    let mut n_segments = 0usize;

    let mut start = 0;
    while start + n_fft <= x.len() {
        for (i, (b, w)) in buf.iter_mut().zip(&window).enumerate() {
            *b = Complex64::new(x[start + i] * w, 0.0);
        }
        fft.process(&mut buf);
        for (a, c) in acc.iter_mut().zip(&buf) {
            *a += c.norm_sqr();
        }
        n_segments += 1;
        start += step;
    }

    let last = n_freqs - 1;
    let nyquist_bin = n_fft % 2 == 0;
    let power = acc
        .iter()
        .enumerate()
        .map(|(k, a)| {
            let one_sided = if k == 0 || (k == last && nyquist_bin) { 1.0 } else { 2.0 };
            a / n_segments as f64 * scale * one_sided
        })
        .collect();
    let freqs = (0..n_freqs).map(|k| k as f64 * sfreq / n_fft as f64).collect();
    Ok((freqs, power))
}
