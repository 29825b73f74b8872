//! Sum-of-exponentials approximation of power-law interaction profiles.
//!
//! An MPO can carry an exponentially decaying two-site coupling at constant
//! bond dimension (one auxiliary state with a weighted identity self-loop),
//! but a bare power law 1/*r*<sup>α</sup> would need one auxiliary state per
//! distance. The fit here approximates
//!
//! ```text
//! 1/r^α ≈ Σ_k ν_k λ_k^r,    r = 1, ..., N
//! ```
//!
//! so a [`PowerLaw`][crate::channel::Channel::PowerLaw] channel compiles to
//! `K` exponential branches, reducing the MPO bond dimension from *O*(*N*)
//! to *O*(*K*).
//!
//! The decay rates are recovered with a matrix-pencil method on the Hankel
//! matrix of samples: a thin QR orthonormalizes the column space, the
//! eigenvalues of pinv(Q₁)·Q₂ (Q with its last/first row dropped) are the
//! rates, and the amplitudes follow from a Vandermonde least-squares solve.
//! The pseudoinverse is guarded with a relative singular-value cutoff since
//! the pencil is poorly conditioned for slowly decaying profiles.

use nalgebra as na;
use num_complex::Complex64 as C64;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FitError {
    /// Returned when the sample range is too short for the requested
    /// expansion order.
    #[error("fit range {n} is too short for expansion order {order}")]
    RangeTooShort { n: usize, order: usize },

    /// Returned when a recovered decay rate has modulus ≥ 1, which would
    /// make the interaction grow with distance.
    #[error("fit produced non-decaying rate with modulus {0}")]
    ModulusBound(f64),

    /// Returned when the fitted profile misses the target by more than the
    /// allowed relative error somewhere on the sample range.
    #[error("fit error {err:.3e} exceeds bound {bound:.3e}")]
    MaxErrorExceeded { err: f64, bound: f64 },
}
use FitError::*;
pub type FitResult<T> = Result<T, FitError>;

// tolerance on |λ| ≥ 1 rejections
const MODULUS_EPS: f64 = 1e-8;
// relative singular-value cutoff guarding the pseudoinverse
const PINV_CUTOFF: f64 = 1e-12;

/// Default bound on the maximum relative error of a fit.
pub const DEFAULT_MAX_REL_ERR: f64 = 5e-2;

/// A fitted exponential sum Σ<sub>k</sub> ν<sub>k</sub>
/// λ<sub>k</sub><sup>r</sup>.
///
/// Rates and amplitudes are complex in general; conjugate pairs appear for
/// oscillatory profiles and are only representable in a complex-kind MPO.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpFit {
    /// Decay rates λ<sub>k</sub>, all with |λ<sub>k</sub>| < 1.
    pub rates: Vec<C64>,
    /// Amplitudes ν<sub>k</sub>.
    pub amps: Vec<C64>,
    /// Maximum relative error over the fitted range.
    pub max_rel_err: f64,
}

impl ExpFit {
    /// Evaluate the fitted sum at distance `r` ≥ 1.
    pub fn eval(&self, r: usize) -> C64 {
        self.rates.iter().zip(&self.amps)
            .map(|(l, v)| *v * l.powu(r as u32))
            .sum()
    }
}

/// Fit `f[r - 1] ≈ Σ_k ν_k λ_k^r` for `r = 1, ..., f.len()` with `order`
/// exponentials.
///
/// Fails if the sample range is shorter than `2 * order`, if any recovered
/// rate has modulus ≥ 1 (within a small tolerance), or if the maximum
/// relative error over the range exceeds `max_rel_err`. Sample values must
/// be nonzero for the relative-error check to be meaningful.
pub fn fit_exponential_sum(f: &[f64], order: usize, max_rel_err: f64)
    -> FitResult<ExpFit>
{
    let n = f.len();
    let k = order;
    if n < 2 * k || k == 0 {
        return Err(RangeTooShort { n, order: k });
    }

    // hankel matrix of samples: M[i, j] = f[i + j]
    let rows = n - k + 1;
    let m: na::DMatrix<f64> =
        na::DMatrix::from_fn(rows, k, |i, j| f[i + j]);

    // thin qr; the orthonormal factor spans the same shifted subspaces as
    // the raw hankel columns but with tame conditioning
    let q = m.qr().q();

    // shifted pencil: V = pinv(Q₁) Q₂ with Q₁ = Q[..rows-1], Q₂ = Q[1..]
    let q1 = q.rows(0, rows - 1).into_owned();
    let q2 = q.rows(1, rows - 1).into_owned();
    let v = pinv_apply(&q1, &q2);

    // the eigenvalues of the pencil are the decay rates
    let rates: Vec<C64> =
        v.complex_eigenvalues().iter().copied().collect();
    for l in rates.iter() {
        if l.norm() >= 1.0 + MODULUS_EPS {
            return Err(ModulusBound(l.norm()));
        }
    }

    // vandermonde least squares for the amplitudes
    let vand: na::DMatrix<C64> =
        na::DMatrix::from_fn(n, k, |i, j| rates[j].powu(i as u32 + 1));
    let rhs: na::DVector<C64> =
        na::DVector::from_iterator(n, f.iter().map(|fk| C64::from(*fk)));
    let svd = vand.svd(true, true);
    let Ok(amps) = svd.solve(&rhs, PINV_CUTOFF) else {
        return Err(RangeTooShort { n, order: k });
    };
    let amps: Vec<C64> = amps.iter().copied().collect();

    let fit = ExpFit { rates, amps, max_rel_err: 0.0 };
    let err =
        (1..=n)
        .map(|r| (fit.eval(r) - C64::from(f[r - 1])).norm() / f[r - 1].abs())
        .fold(0.0_f64, f64::max);
    if err > max_rel_err {
        return Err(MaxErrorExceeded { err, bound: max_rel_err });
    }
    Ok(ExpFit { max_rel_err: err, ..fit })
}

/// Fit `1/r^α` on `r = 1, ..., n` with `order` exponentials.
pub fn fit_power_law(alpha: f64, n: usize, order: usize, max_rel_err: f64)
    -> FitResult<ExpFit>
{
    let f: Vec<f64> =
        (1..=n).map(|r| (r as f64).powf(-alpha)).collect();
    fit_exponential_sum(&f, order, max_rel_err)
}

// x ↦ pinv(a) · x with a relative cutoff on the singular spectrum
fn pinv_apply(a: &na::DMatrix<f64>, x: &na::DMatrix<f64>) -> na::DMatrix<f64> {
    let svd = a.clone().svd(true, true);
    let Some(u) = svd.u.as_ref() else { unreachable!() };
    let Some(vt) = svd.v_t.as_ref() else { unreachable!() };
    let smax = svd.singular_values.iter().copied().fold(0.0_f64, f64::max);
    let mut utx = u.adjoint() * x;
    utx.row_iter_mut()
        .zip(svd.singular_values.iter())
        .for_each(|(mut row, s)| {
            if *s > PINV_CUTOFF * smax {
                row.scale_mut(s.recip());
            } else {
                row.fill(0.0);
            }
        });
    vt.adjoint() * utx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_pure_exponentials() {
        // f(r) = 0.75 · 0.5^r + 0.25 · 0.9^r is exactly order 2
        let f: Vec<f64> =
            (1..=40)
            .map(|r| {
                0.75 * 0.5_f64.powi(r) + 0.25 * 0.9_f64.powi(r)
            })
            .collect();
        let fit = fit_exponential_sum(&f, 2, 1e-8).unwrap();
        assert!(fit.max_rel_err < 1e-8);
        let mut rates: Vec<f64> =
            fit.rates.iter().map(|l| l.re).collect();
        rates.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!((rates[0] - 0.5).abs() < 1e-8);
        assert!((rates[1] - 0.9).abs() < 1e-8);
    }

    #[test]
    fn power_law_grid() {
        for alpha in [1.0, 1.5, 2.0, 3.0] {
            for n in [30, 100, 300] {
                for order in [8, 10, 12] {
                    let fit =
                        fit_power_law(alpha, n, order, DEFAULT_MAX_REL_ERR)
                        .unwrap();
                    assert!(
                        fit.max_rel_err <= DEFAULT_MAX_REL_ERR,
                        "α={alpha} N={n} K={order}: err {}", fit.max_rel_err,
                    );
                    assert!(fit.rates.iter().all(|l| l.norm() < 1.0));
                }
            }
        }
    }

    #[test]
    fn short_range_rejected() {
        let f: Vec<f64> = (1..=10).map(|r| (r as f64).recip()).collect();
        assert!(matches!(
            fit_exponential_sum(&f, 8, 0.05),
            Err(RangeTooShort { .. }),
        ));
    }
}
