//! Read-only measurements on finalized states.
//!
//! Everything here consumes an [`Mps`] produced by the sweep algorithms:
//! local expectation values and their subsystem sums, two-site
//! correlators, the full ⟨ψ|H|ψ⟩ against an MPO, and entanglement data
//! (Schmidt spectra, von Neumann and Rényi entropies) read off bond
//! decompositions.
//!
//! Expectation values are computed by transfer contraction from the left
//! boundary and therefore work in any gauge, canonical or not; the
//! entropy functions move the canonical center to the probed bond, which
//! changes only the gauge, so they take `&mut` without changing the
//! state.

use std::ops::{ Bound, RangeBounds };
use itertools::Itertools;
use nalgebra as na;
use num_traits::{ Float, One, Zero };
use thiserror::Error;
use crate::{ ComplexScalar, scalar_from_c64 };
use crate::env::{ self, EnvError };
use crate::mpo::Mpo;
use crate::mps::{ Mps, MpsError };
use crate::site::{ OpSym, SiteError, SiteTables };

#[derive(Debug, Error)]
pub enum MeasError {
    /// Returned when a measured site or bond is out of bounds.
    #[error("error in measurement: site or bond index out of bounds")]
    OutOfBounds,

    /// Returned when an operator cannot be represented over the state's
    /// scalar kind.
    #[error("error in measurement: \
        complex-valued operator on a real scalar kind")]
    ComplexData,

    /// Returned when an operator symbol fails to resolve on its site.
    #[error("{0}")]
    Site(#[from] SiteError),

    /// Returned when a state operation fails.
    #[error("{0}")]
    Mps(#[from] MpsError),

    /// Returned when an MPO expectation fails.
    #[error("{0}")]
    Env(#[from] EnvError),
}
use MeasError::*;
pub type MeasResult<T> = Result<T, MeasError>;

// resolve an operator symbol on site `k` over the state's scalar kind
fn op_matrix<A>(
    mps: &Mps<A>,
    tables: &SiteTables,
    k: usize,
    sym: OpSym,
) -> MeasResult<na::DMatrix<A>>
where A: ComplexScalar
{
    let site = mps.chain()[k];
    let raw = tables.operator(site, sym)?;
    raw.iter()
        .map(|z| scalar_from_c64::<A>(*z))
        .collect::<Option<Vec<A>>>()
        .map(|data| na::DMatrix::from_vec(raw.nrows(), raw.ncols(), data))
        .ok_or(ComplexData)
}

// ⟨ψ| Π_k O_k |ψ⟩ for a sparse set of single-site insertions, by transfer
// contraction from the left boundary
fn expect_with<A>(mps: &Mps<A>, ops: &[(usize, na::DMatrix<A>)]) -> A
where A: ComplexScalar
{
    let mut env: na::DMatrix<A> = na::DMatrix::identity(1, 1);
    for i in 0..mps.len() {
        let d = mps.chain()[i].dim();
        let a = mps.tensor(i);
        let chi_r = a.dims().2;
        let mut next: na::DMatrix<A> = na::DMatrix::zeros(chi_r, chi_r);
        match ops.iter().find(|(k, _)| *k == i) {
            Some((_, op)) => {
                (0..d).cartesian_product(0..d)
                    .for_each(|(sp, s)| {
                        let wgt = op[(sp, s)];
                        if wgt == A::zero() { return; }
                        next += a.phys_slice(sp).adjoint()
                            * &env
                            * a.phys_slice(s)
                            * wgt;
                    });
            },
            None => {
                for s in 0..d {
                    let slice = a.phys_slice(s);
                    next += slice.adjoint() * &env * slice;
                }
            },
        }
        env = next;
    }
    env[(0, 0)]
}

/// Evaluate the expectation value ⟨O<sub>k</sub>⟩ of a local operator on
/// the `k`-th site.
pub fn expect_site<A>(
    mps: &Mps<A>,
    tables: &SiteTables,
    k: usize,
    sym: OpSym,
) -> MeasResult<A>
where A: ComplexScalar
{
    if k >= mps.len() { return Err(OutOfBounds); }
    let op = op_matrix(mps, tables, k, sym)?;
    Ok(expect_with(mps, &[(k, op)]))
}

/// Evaluate the subsystem sum ⟨Σ<sub>k∈range</sub> O<sub>k</sub>⟩.
pub fn expect_sum<A, P>(
    mps: &Mps<A>,
    tables: &SiteTables,
    range: P,
    sym: OpSym,
) -> MeasResult<A>
where
    A: ComplexScalar,
    P: RangeBounds<usize>,
{
    let i0: usize =
        match range.start_bound() {
            Bound::Included(i) => *i,
            Bound::Excluded(i) => i.saturating_add(1),
            Bound::Unbounded   => 0,
        };
    let i1: usize =
        match range.end_bound() {
            Bound::Included(i) => i.saturating_add(1),
            Bound::Excluded(i) => *i,
            Bound::Unbounded   => mps.len(),
        };
    let i1 = i1.min(mps.len());
    let mut total = A::zero();
    for k in i0..i1 {
        total = total + expect_site(mps, tables, k, sym)?;
    }
    Ok(total)
}

/// Evaluate the two-site correlator ⟨O<sub>i</sub> O<sub>j</sub>⟩.
///
/// The two operators act on distinct sites in either order; for `i == j`
/// the correlator degenerates to the single-site expectation of the
/// operator product.
pub fn correlator<A>(
    mps: &Mps<A>,
    tables: &SiteTables,
    i: usize,
    sym_i: OpSym,
    j: usize,
    sym_j: OpSym,
) -> MeasResult<A>
where A: ComplexScalar
{
    if i >= mps.len() || j >= mps.len() { return Err(OutOfBounds); }
    let op_i = op_matrix(mps, tables, i, sym_i)?;
    let op_j = op_matrix(mps, tables, j, sym_j)?;
    if i == j {
        return Ok(expect_with(mps, &[(i, op_i * op_j)]));
    }
    Ok(expect_with(mps, &[(i, op_i), (j, op_j)]))
}

/// Evaluate ⟨ψ|H|ψ⟩ for an MPO Hamiltonian.
pub fn expect_mpo<A>(mps: &Mps<A>, mpo: &Mpo<A>) -> MeasResult<A>
where A: ComplexScalar
{
    Ok(env::expectation(mps, mpo)?)
}

/// Compute the von Neumann entanglement entropy across the bond between
/// sites `b` and `b + 1`.
pub fn entropy_vn<A>(mps: &mut Mps<A>, b: usize) -> MeasResult<A::Re>
where A: ComplexScalar
{
    let spectrum = mps.schmidt_spectrum(b)?;
    let s =
        spectrum.iter()
        .filter(|sk| sk.is_normal())
        .map(|sk| {
            let p = *sk * *sk;
            -p * Float::ln(p)
        })
        .fold(A::Re::zero(), |acc, x| acc + x);
    Ok(s)
}

/// Compute the Rényi-α entanglement entropy across the bond between
/// sites `b` and `b + 1`.
///
/// Reduces to the von Neumann entropy at α = 1.
pub fn entropy_renyi<A>(mps: &mut Mps<A>, alpha: A::Re, b: usize)
    -> MeasResult<A::Re>
where A: ComplexScalar
{
    if alpha.is_one() { return entropy_vn(mps, b); }
    let spectrum = mps.schmidt_spectrum(b)?;
    let total =
        spectrum.iter()
        .filter(|sk| sk.is_normal())
        .map(|sk| Float::powf(*sk * *sk, alpha))
        .fold(A::Re::zero(), |acc, x| acc + x);
    Ok(Float::ln(total) / (A::Re::one() - alpha))
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64 as C64;
    use rand::SeedableRng;
    use crate::mps::{ ProductPattern, TruncPolicy };
    use crate::site::{ Site, SpinAxis };

    fn up_state(n: usize) -> (Vec<Site>, SiteTables, Mps<C64>) {
        let chain = vec![Site::spin_half(); n];
        let tables = SiteTables::for_chain(&chain);
        let pattern = vec![ProductPattern::Spin(SpinAxis::Z, 1); n];
        let mps = Mps::product_state(
            &chain, &pattern, &tables, TruncPolicy::default()).unwrap();
        (chain, tables, mps)
    }

    #[test]
    fn polarized_expectations() {
        let (_, tables, mps) = up_state(5);
        for k in 0..5 {
            let z = expect_site(&mps, &tables, k, OpSym::Z).unwrap();
            assert!((z.re - 0.5).abs() < 1e-14);
            let x = expect_site(&mps, &tables, k, OpSym::X).unwrap();
            assert!(x.norm() < 1e-14);
        }
        let zsum = expect_sum(&mps, &tables, .., OpSym::Z).unwrap();
        assert!((zsum.re - 2.5).abs() < 1e-13);
        let partial = expect_sum(&mps, &tables, 1..4, OpSym::Z).unwrap();
        assert!((partial.re - 1.5).abs() < 1e-13);
    }

    #[test]
    fn product_correlators_factorize() {
        let (_, tables, mps) = up_state(4);
        let zz = correlator(&mps, &tables, 0, OpSym::Z, 3, OpSym::Z).unwrap();
        assert!((zz.re - 0.25).abs() < 1e-14);
        // Z² = 1/4 on a single spin-1/2 site
        let z2 = correlator(&mps, &tables, 2, OpSym::Z, 2, OpSym::Z).unwrap();
        assert!((z2.re - 0.25).abs() < 1e-14);
    }

    #[test]
    fn correlator_matches_dense_on_random_state() {
        let chain = vec![Site::spin_half(); 5];
        let tables = SiteTables::for_chain(&chain);
        let mut rng = rand::rngs::StdRng::seed_from_u64(31);
        let mut mps: Mps<C64> = Mps::random(
            &chain, 4, TruncPolicy::default(), &mut rng).unwrap();
        mps.canonicalize(0).unwrap();
        let got = correlator(&mps, &tables, 1, OpSym::Sp, 3, OpSym::Sm).unwrap();
        // dense reference, site 0 slowest
        let psi = mps.to_dense();
        let id = tables.operator(chain[0], OpSym::Id).unwrap();
        let sp = tables.operator(chain[0], OpSym::Sp).unwrap();
        let sm = tables.operator(chain[0], OpSym::Sm).unwrap();
        let op =
            id.kronecker(sp).kronecker(id).kronecker(sm).kronecker(id);
        let want = (psi.adjoint() * op * &psi)[(0, 0)];
        assert!((got - want).norm() < 1e-11);
    }

    #[test]
    fn product_entropies_vanish() {
        let (_, _, mut mps) = up_state(6);
        for b in 0..5 {
            let s1 = entropy_vn(&mut mps, b).unwrap();
            assert!(s1.abs() < 1e-14);
            let s2 = entropy_renyi(&mut mps, 2.0, b).unwrap();
            assert!(s2.abs() < 1e-14);
        }
    }

    #[test]
    fn bell_pair_entropy() {
        // two-site state (∣↑↑⟩ + ∣↓↓⟩)/√2 has one bit of entanglement
        let chain = vec![Site::spin_half(); 2];
        let tables = SiteTables::for_chain(&chain);
        let pattern = vec![ProductPattern::Spin(SpinAxis::Z, 1); 2];
        let mut mps: Mps<C64> = Mps::product_state(
            &chain, &pattern, &tables, TruncPolicy::default()).unwrap();
        // build the Bell state by hand: both tensors become 2×2 factors
        let inv_sqrt2 = std::f64::consts::FRAC_1_SQRT_2;
        let left =
            na::DMatrix::from_row_slice(2, 2, &[
                C64::from(inv_sqrt2), C64::from(0.0),
                C64::from(0.0), C64::from(inv_sqrt2),
            ]);
        let right =
            na::DMatrix::from_row_slice(2, 2, &[
                C64::from(1.0), C64::from(0.0),
                C64::from(0.0), C64::from(1.0),
            ]);
        *mps.tensor_mut(0) = crate::mps::SiteTensor::from_lfused(2, left);
        *mps.tensor_mut(1) = crate::mps::SiteTensor::from_rfused(2, right);
        mps.canonicalize(0).unwrap();
        let s = entropy_vn(&mut mps, 0).unwrap();
        assert!((s - std::f64::consts::LN_2).abs() < 1e-12);
        let spectrum = mps.schmidt_spectrum(0).unwrap();
        assert_eq!(spectrum.len(), 2);
        assert!((spectrum[0] - inv_sqrt2).abs() < 1e-12);
        assert!((spectrum[1] - inv_sqrt2).abs() < 1e-12);
    }
}
