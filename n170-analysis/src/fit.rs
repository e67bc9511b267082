//! Bounded non-linear least squares (Levenberg-Marquardt) for the small
//! models of the spectral parametrization.

use anyhow::{Result, bail};
use log::trace;

#[derive(Debug, Clone)]
pub struct LmOptions {
    pub max_iter: usize,
    /// Relative cost decrease below which the fit is considered converged.
    pub ftol: f64,
    /// Relative step size below which the fit is considered converged.
    pub xtol: f64,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iter: 500,
            ftol: 1e-10,
            xtol: 1e-10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LmFit {
    pub params: Vec<f64>,
    /// Half the sum of squared residuals.
    pub cost: f64,
    pub iterations: usize,
}

/// Box constraints, one `(lower, upper)` per parameter.
pub type Bounds = [(f64, f64)];

fn clamp_into(p: &mut [f64], bounds: Option<&Bounds>) {
    if let Some(b) = bounds {
        for (v, &(lo, hi)) in p.iter_mut().zip(b) {
            *v = v.clamp(lo, hi);
        }
    }
}

fn cost<F: Fn(f64, &[f64]) -> f64>(
    model: &F,
    xs: &[f64],
    ys: &[f64],
    p: &[f64],
    r: &mut [f64],
) -> f64 {
    let mut c = 0.0;
    for ((ri, &x), &y) in r.iter_mut().zip(xs).zip(ys) {
        *ri = y - model(x, p);
        c += *ri * *ri;
    }
    0.5 * c
}

/// Solve `a * x = b` for a small dense system; `None` if singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-300 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..n {
            let f = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= f * a[col][k];
            }
            b[row] -= f * b[col];
        }
    }
    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let s: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - s) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Fit `model(x, params)` to `(xs, ys)` starting from `p0`.
pub fn curve_fit<F>(
    model: F,
    xs: &[f64],
    ys: &[f64],
    p0: &[f64],
    bounds: Option<&Bounds>,
    opts: &LmOptions,
) -> Result<LmFit>
where
    F: Fn(f64, &[f64]) -> f64,
{
    let n = p0.len();
    let m = xs.len();
    if m != ys.len() {
        bail!("{} x values for {} y values", m, ys.len());
    }
    if m < n {
        bail!("{m} points cannot determine {n} parameters");
    }
    if let Some(b) = bounds {
        if b.len() != n || b.iter().any(|(lo, hi)| lo > hi) {
            bail!("bounds do not match the {n} parameters");
        }
    }

    let mut p = p0.to_vec();
    clamp_into(&mut p, bounds);
    let mut r = vec![0.0; m];
    let mut c = cost(&model, xs, ys, &p, &mut r);
    if !c.is_finite() {
        bail!("model is not finite at the initial guess {p:?}");
    }

    let mut lambda = 1e-3;
    let mut jac = vec![vec![0.0; n]; m];
    let mut trial = vec![0.0; m];
    let mut iterations = 0;

    'outer: while iterations < opts.max_iter {
        iterations += 1;

        // forward differences, stepping backwards at an upper bound
        for j in 0..n {
            let mut h = 1.5e-8 * p[j].abs().max(1e-4);
            if let Some(b) = bounds {
                if p[j] + h > b[j].1 {
                    h = -h;
                }
            }
            let mut shifted = p.clone();
            shifted[j] += h;
            for (i, &x) in xs.iter().enumerate() {
                jac[i][j] = (model(x, &shifted) - model(x, &p)) / h;
            }
        }

        let mut jtj = vec![vec![0.0; n]; n];
        let mut jtr = vec![0.0; n];
        for (row, &ri) in jac.iter().zip(&r) {
            for a in 0..n {
                jtr[a] += row[a] * ri;
                for b in 0..n {
                    jtj[a][b] += row[a] * row[b];
                }
            }
        }

        loop {
            let mut damped = jtj.clone();
            for (k, row) in damped.iter_mut().enumerate() {
                row[k] += lambda * jtj[k][k].max(1e-12);
            }
            let step = solve(damped, jtr.clone());
            let accepted = step.and_then(|delta| {
                let mut candidate: Vec<f64> = p.iter().zip(&delta).map(|(a, d)| a + d).collect();
                clamp_into(&mut candidate, bounds);
                let c_new = cost(&model, xs, ys, &candidate, &mut trial);
                (c_new.is_finite() && c_new < c).then_some((candidate, c_new))
            });
            match accepted {
                Some((candidate, c_new)) => {
                    let step_norm = p
                        .iter()
                        .zip(&candidate)
                        .map(|(a, b)| (a - b).powi(2))
                        .sum::<f64>()
                        .sqrt();
                    let p_norm = candidate.iter().map(|v| v * v).sum::<f64>().sqrt();
                    let decrease = c - c_new;
                    p = candidate;
                    c = c_new;
                    std::mem::swap(&mut r, &mut trial);
                    lambda = (lambda / 10.0).max(1e-15);
                    let converged_cost = decrease <= opts.ftol * c.max(f64::MIN_POSITIVE);
                    let converged_step = step_norm <= opts.xtol * (p_norm + opts.xtol);
                    if converged_cost || converged_step {
                        break 'outer;
                    }
                    break;
                }
                None => {
                    lambda *= 10.0;
                    if lambda > 1e15 {
                        // no downhill step left
                        break 'outer;
                    }
                }
            }
        }
    }
    trace!("curve_fit: cost {c:.3e} after {iterations} iterations");
    Ok(LmFit {
        params: p,
        cost: c,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn solves_small_system() {
        let x = solve(vec![vec![2.0, 1.0], vec![1.0, 3.0]], vec![3.0, 5.0]).unwrap();
        assert_abs_diff_eq!(x[0], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 1.4, epsilon = 1e-12);
        assert!(solve(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![1.0, 2.0]).is_none());
    }

    #[test]
    fn recovers_exponential_decay() {
        let xs: Vec<f64> = (0..50).map(|i| i as f64 * 0.1).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 3.0 * (-1.3 * x).exp()).collect();
        let model = |x: f64, p: &[f64]| p[0] * (-p[1] * x).exp();
        let fit = curve_fit(model, &xs, &ys, &[1.0, 0.5], None, &LmOptions::default()).unwrap();
        assert_abs_diff_eq!(fit.params[0], 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fit.params[1], 1.3, epsilon = 1e-6);
    }

    #[test]
    fn recovers_gaussian() {
        let g = |x: f64, p: &[f64]| p[1] * (-(x - p[0]).powi(2) / (2.0 * p[2] * p[2])).exp();
        let xs: Vec<f64> = (0..60).map(|i| i as f64 * 0.5).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| g(x, &[10.0, 0.8, 1.5])).collect();
        let fit = curve_fit(g, &xs, &ys, &[9.0, 0.5, 2.0], None, &LmOptions::default()).unwrap();
        assert_abs_diff_eq!(fit.params[0], 10.0, epsilon = 1e-5);
        assert_abs_diff_eq!(fit.params[1], 0.8, epsilon = 1e-5);
        assert_abs_diff_eq!(fit.params[2], 1.5, epsilon = 1e-5);
    }

    #[test]
    fn respects_bounds() {
        let xs: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let ys: Vec<f64> = xs.iter().map(|x| 2.0 * x).collect();
        let bounds = [(0.0, 1.0)];
        let fit =
            curve_fit(|x, p| p[0] * x, &xs, &ys, &[0.5], Some(&bounds), &LmOptions::default())
                .unwrap();
        assert_abs_diff_eq!(fit.params[0], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn too_few_points() {
        let line = |x: f64, p: &[f64]| p[0] + p[1] * x;
        let fit = curve_fit(line, &[1.0], &[1.0], &[0.0, 0.0], None, &LmOptions::default());
        assert!(fit.is_err());
    }
}
