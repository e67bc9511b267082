use anyhow::{Result, bail};
use log::debug;
use ndarray::{Array1, Array2, Axis};
use std::f64::consts::PI;

/// Second order section, transposed direct form II, coefficients normalised
/// so that `a0 == 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Biquad {
    b: [f64; 3],
    a: [f64; 2],
    z: [f64; 2],
}

impl Biquad {
    fn from_raw(b: [f64; 3], a: [f64; 3]) -> Self {
        let a0 = a[0];
        Biquad {
            b: [b[0] / a0, b[1] / a0, b[2] / a0],
            a: [a[1] / a0, a[2] / a0],
            z: [0.0, 0.0],
        }
    }

    /// Bilinear-transform lowpass at `f0` Hz with quality `q`.
    pub fn lowpass(f0: f64, fs: f64, q: f64) -> Self {
        let omega = 2.0 * PI * f0 / fs;
        let (sin, cos) = omega.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::from_raw(
            [(1.0 - cos) / 2.0, 1.0 - cos, (1.0 - cos) / 2.0],
            [1.0 + alpha, -2.0 * cos, 1.0 - alpha],
        )
    }

    /// Bilinear-transform highpass at `f0` Hz with quality `q`.
    pub fn highpass(f0: f64, fs: f64, q: f64) -> Self {
        let omega = 2.0 * PI * f0 / fs;
        let (sin, cos) = omega.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::from_raw(
            [(1.0 + cos) / 2.0, -(1.0 + cos), (1.0 + cos) / 2.0],
            [1.0 + alpha, -2.0 * cos, 1.0 - alpha],
        )
    }

    /// Gain at 0 Hz.
    pub fn dc_gain(&self) -> f64 {
        (self.b[0] + self.b[1] + self.b[2]) / (1.0 + self.a[0] + self.a[1])
    }

    /// Put the state where a constant input `x0` would have left it.
    pub fn settle(&mut self, x0: f64) {
        let y0 = self.dc_gain() * x0;
        self.z[1] = self.b[2] * x0 - self.a[1] * y0;
        self.z[0] = self.b[1] * x0 - self.a[0] * y0 + self.z[1];
    }

    #[inline]
    pub fn process(&mut self, x: f64) -> f64 {
        let y = self.b[0] * x + self.z[0];
        self.z[0] = self.b[1] * x - self.a[0] * y + self.z[1];
        self.z[1] = self.b[2] * x - self.a[1] * y;
        y
    }
}

/// Butterworth band-pass built as a highpass cascade followed by a lowpass
/// cascade of the same order.
#[derive(Debug, Clone)]
pub struct BandPass {
    sections: Vec<Biquad>,
}

/// Quality factors of the second order sections of an even-order Butterworth.
fn butterworth_q(order: usize) -> Vec<f64> {
    (0..order / 2)
        .map(|k| {
            let theta = PI * (2 * k + 1) as f64 / (2 * order) as f64;
            1.0 / (2.0 * theta.sin())
        })
        .collect()
}

impl BandPass {
    pub fn butterworth(l_freq: f64, h_freq: f64, sfreq: f64, order: usize) -> Result<Self> {
        let nyquist = sfreq / 2.0;
        if !(l_freq > 0.0 && l_freq < h_freq && h_freq < nyquist) {
            bail!("band {l_freq}-{h_freq} Hz does not fit below Nyquist ({nyquist} Hz)");
        }
        if order == 0 || order % 2 != 0 {
            bail!("filter order must be even and positive, got {order}");
        }
        let qs = butterworth_q(order);
        let mut sections: Vec<Biquad> =
            qs.iter().map(|&q| Biquad::highpass(l_freq, sfreq, q)).collect();
        sections.extend(qs.iter().map(|&q| Biquad::lowpass(h_freq, sfreq, q)));
        debug!(
            "butterworth band-pass {l_freq}-{h_freq} Hz, order {order}, {} sections",
            sections.len()
        );
        Ok(Self { sections })
    }

    fn run(&mut self, x: &mut [f64]) {
        let Some(&x0) = x.first() else {
            return;
        };
        let mut level = x0;
        for s in &mut self.sections {
            s.settle(level);
            level *= s.dc_gain();
        }
        for v in x.iter_mut() {
            let mut y = *v;
            for s in &mut self.sections {
                y = s.process(y);
            }
            *v = y;
        }
    }

    /// Default edge padding: three times the filter length.
    fn padlen(&self) -> usize {
        3 * (2 * self.sections.len() + 1)
    }

    /// Zero-phase filtering: forward then backward over an odd extension of
    /// the signal, so the output has no group delay.
    pub fn filtfilt(&self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        if n < 2 {
            return x.to_vec();
        }
        let pad = self.padlen().min(n - 1);
        let (first, last) = (x[0], x[n - 1]);

        let mut ext = Vec::with_capacity(n + 2 * pad);
        ext.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
        ext.extend_from_slice(x);
        ext.extend((1..=pad).map(|i| 2.0 * last - x[n - 1 - i]));

        let mut f = self.clone();
        f.run(&mut ext);
        ext.reverse();
        f.run(&mut ext);
        ext.reverse();

        ext[pad..pad + n].to_vec()
    }

    /// Filter every row of `[n_channels, n_samples]` in place.
    pub fn apply(&self, data: &mut Array2<f64>) {
        for mut row in data.axis_iter_mut(Axis(0)) {
            let filtered = self.filtfilt(&row.to_vec());
            row.assign(&Array1::from(filtered));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FS: f64 = 256.0;

    fn sine(freq: f64, secs: f64) -> Vec<f64> {
        let n = (secs * FS) as usize;
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / FS).sin()).collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    fn middle(x: &[f64]) -> &[f64] {
        let q = x.len() / 4;
        &x[q..x.len() - q]
    }

    #[test]
    fn butterworth_q_values() {
        let q = butterworth_q(4);
        approx::assert_abs_diff_eq!(q[0], 1.306_563, epsilon = 1e-5);
        approx::assert_abs_diff_eq!(q[1], 0.541_196, epsilon = 1e-5);
        approx::assert_abs_diff_eq!(
            butterworth_q(2)[0],
            std::f64::consts::FRAC_1_SQRT_2,
            epsilon = 1e-12
        );
    }

    #[test]
    fn passband_is_untouched() {
        let bp = BandPass::butterworth(1.0, 30.0, FS, 4).unwrap();
        let x = sine(10.0, 20.0);
        let y = bp.filtfilt(&x);
        let ratio = rms(middle(&y)) / rms(middle(&x));
        approx::assert_abs_diff_eq!(ratio, 1.0, epsilon = 0.02);
    }

    #[test]
    fn no_phase_shift() {
        let bp = BandPass::butterworth(1.0, 30.0, FS, 4).unwrap();
        let x = sine(8.0, 20.0);
        let y = bp.filtfilt(&x);
        for (a, b) in middle(&x).iter().zip(middle(&y)) {
            approx::assert_abs_diff_eq!(a, b, epsilon = 0.03);
        }
    }

    #[test]
    fn stopbands_are_attenuated() {
        let bp = BandPass::butterworth(1.0, 30.0, FS, 4).unwrap();
        let high = bp.filtfilt(&sine(80.0, 20.0));
        assert!(rms(middle(&high)) < 0.01, "80 Hz leaked: {}", rms(middle(&high)));
        let slow = bp.filtfilt(&sine(0.1, 20.0));
        assert!(rms(middle(&slow)) < 0.05, "0.1 Hz leaked: {}", rms(middle(&slow)));
    }

    #[test]
    fn removes_dc_offset() {
        let bp = BandPass::butterworth(1.0, 30.0, FS, 4).unwrap();
        let x: Vec<f64> = sine(10.0, 20.0).iter().map(|v| v + 5.0).collect();
        let y = bp.filtfilt(&x);
        let mean = middle(&y).iter().sum::<f64>() / middle(&y).len() as f64;
        approx::assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-3);
    }

    #[test]
    fn rejects_band_above_nyquist() {
        assert!(BandPass::butterworth(1.0, 200.0, FS, 4).is_err());
        assert!(BandPass::butterworth(1.0, 30.0, FS, 3).is_err());
    }

    #[test]
    fn apply_filters_each_channel() {
        let bp = BandPass::butterworth(1.0, 30.0, FS, 4).unwrap();
        let n = 2048;
        let mut data = Array2::from_shape_fn((2, n), |(c, _)| c as f64 * 3.0);
        bp.apply(&mut data);
        assert!(data.row(1).iter().skip(n / 4).take(n / 2).all(|v| v.abs() < 1e-6));
    }
}
