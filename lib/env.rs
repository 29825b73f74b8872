//! Cached boundary environments for MPS–MPO sweep algorithms.
//!
//! The expectation ⟨ψ|H|ψ⟩ contracts the state, the operator, and the
//! conjugate state into a three-layer ladder. Sweep algorithms only ever
//! modify one or two adjacent sites at a time, so everything to the left
//! and right of the active region can be contracted once and reused. An
//! [`EnvTensor`] is one such partial contraction: logically a rank-3 object
//! `E[w, u′, u]` with an MPO bond index `w` and bra/ket MPS bond indices
//! `u′`/`u`, stored as one bra×ket matrix per MPO bond value (the FSM bond
//! index is small and its blocks enter contractions one at a time).
//!
//! [`Environments`] keeps one slot per chain *cut* `p ∈ 0 ‥ N`: slot `p`
//! holds the contraction of sites `0 ‥ p` (a left environment) while the
//! canonical center sits at or right of `p`, and the contraction of sites
//! `p ‥ N` (a right environment) while the center sits left of it. The two
//! boundary slots are trivial. The sweep engine owns the refresh calls and
//! maintains that directional invariant; nothing else mutates the cache.

use nalgebra as na;
use thiserror::Error;
use crate::ComplexScalar;
use crate::mpo::{ Mpo, MpoTensor };
use crate::mps::{ Mps, SiteTensor };

#[derive(Debug, Error)]
pub enum EnvError {
    /// Returned when the state and operator have different chain lengths.
    #[error("error in environment build: MPS and MPO lengths disagree")]
    LengthMismatch,

    /// Returned when building environments for a state with no established
    /// canonical center.
    #[error("error in environment build: state is not in canonical form")]
    NotCanonical,
}
use EnvError::*;
pub type EnvResult<T> = Result<T, EnvError>;

/// One contracted boundary environment, stored per MPO bond value.
#[derive(Clone, Debug, PartialEq)]
pub struct EnvTensor<A> {
    mats: Vec<na::DMatrix<A>>,
}

impl<A> EnvTensor<A>
where A: ComplexScalar
{
    /// The trivial rank-1 environment at a chain boundary.
    pub fn trivial() -> Self {
        Self { mats: vec![na::DMatrix::identity(1, 1)] }
    }

    /// Return the MPO bond dimension.
    pub fn mpo_dim(&self) -> usize { self.mats.len() }

    /// Return the MPS bond dimension.
    pub fn bond_dim(&self) -> usize { self.mats[0].nrows() }

    /// Return the bra×ket matrix at MPO bond value `w`.
    pub fn mat(&self, w: usize) -> &na::DMatrix<A> { &self.mats[w] }
}

// move a left environment one site to the right:
//   E′[b][v′, v] = Σ_{a, s′, s} W[a, b][s′, s] · (A[s′]† E[a] A[s])[v′, v]
fn update_left<A>(
    prev: &EnvTensor<A>,
    a: &SiteTensor<A>,
    w: &MpoTensor<A>,
) -> EnvTensor<A>
where A: ComplexScalar
{
    let (_, d, chi_r) = a.dims();
    let mut mats: Vec<na::DMatrix<A>> =
        vec![na::DMatrix::zeros(chi_r, chi_r); w.right_dim()];
    for (ai, bi, blk) in w.blocks() {
        for s in 0..d {
            let half = prev.mat(ai) * a.phys_slice(s);
            for sp in 0..d {
                let wgt = blk[(sp, s)];
                if wgt == A::zero() { continue; }
                mats[bi] += a.phys_slice(sp).adjoint() * &half * wgt;
            }
        }
    }
    EnvTensor { mats }
}

// move a right environment one site to the left:
//   E′[a][u′, u] = Σ_{b, s′, s} W[a, b][s′, s] · (conj(A[s′]) (A[s] E[b]ᵀ)ᵀ)[u′, u]
fn update_right<A>(
    next: &EnvTensor<A>,
    a: &SiteTensor<A>,
    w: &MpoTensor<A>,
) -> EnvTensor<A>
where A: ComplexScalar
{
    let (chi_l, d, _) = a.dims();
    let mut mats: Vec<na::DMatrix<A>> =
        vec![na::DMatrix::zeros(chi_l, chi_l); w.left_dim()];
    for (ai, bi, blk) in w.blocks() {
        for s in 0..d {
            let half = a.phys_slice(s) * next.mat(bi).transpose();
            for sp in 0..d {
                let wgt = blk[(sp, s)];
                if wgt == A::zero() { continue; }
                mats[ai] += a.phys_slice(sp).conjugate() * half.transpose() * wgt;
            }
        }
    }
    EnvTensor { mats }
}

/// The environment cache for one `(Mps, Mpo)` pair.
///
/// Owned by the sweep state; slot directions follow the canonical center
/// as described in the module docs.
#[derive(Clone, Debug, PartialEq)]
pub struct Environments<A> {
    slots: Vec<EnvTensor<A>>,
    n: usize,
}

impl<A> Environments<A>
where A: ComplexScalar
{
    /// Contract environments inward from both ends for a state canonical at
    /// center `c`: slots `0 ‥ c` become left environments, slots
    /// `c + 1 ‥ N` right environments.
    ///
    /// Fails if the chain lengths disagree or the state has no center.
    pub fn build(mps: &Mps<A>, mpo: &Mpo<A>, c: usize) -> EnvResult<Self> {
        if mps.len() != mpo.len() { return Err(LengthMismatch); }
        if mps.center() != Some(c) { return Err(NotCanonical); }
        let n = mps.len();
        let mut slots: Vec<EnvTensor<A>> =
            (0..=n).map(|_| EnvTensor::trivial()).collect();
        for p in 1..=c {
            slots[p] =
                update_left(&slots[p - 1], mps.tensor(p - 1), mpo.tensor(p - 1));
        }
        for p in (c + 1 .. n).rev() {
            slots[p] = update_right(&slots[p + 1], mps.tensor(p), mpo.tensor(p));
        }
        Ok(Self { slots, n })
    }

    /// Return the environment at cut `p`.
    pub fn slot(&self, p: usize) -> &EnvTensor<A> { &self.slots[p] }

    /// Recompute slot `p` as a left environment from slot `p − 1` and site
    /// `p − 1`.
    pub fn refresh_left(&mut self, p: usize, mps: &Mps<A>, mpo: &Mpo<A>) {
        self.slots[p] =
            update_left(&self.slots[p - 1], mps.tensor(p - 1), mpo.tensor(p - 1));
    }

    /// Recompute slot `p` as a right environment from slot `p + 1` and site
    /// `p`.
    pub fn refresh_right(&mut self, p: usize, mps: &Mps<A>, mpo: &Mpo<A>) {
        self.slots[p] =
            update_right(&self.slots[p + 1], mps.tensor(p), mpo.tensor(p));
    }

    /// Number of sites spanned.
    pub fn len(&self) -> usize { self.n }

    /// Always `false` for a built cache.
    pub fn is_empty(&self) -> bool { false }
}

/// Contract ⟨ψ|H|ψ⟩ in one pass, without touching any cache.
pub fn expectation<A>(mps: &Mps<A>, mpo: &Mpo<A>) -> EnvResult<A>
where A: ComplexScalar
{
    if mps.len() != mpo.len() { return Err(LengthMismatch); }
    let mut env = EnvTensor::trivial();
    for i in 0..mps.len() {
        env = update_left(&env, mps.tensor(i), mpo.tensor(i));
    }
    Ok(env.mat(0)[(0, 0)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_complex::Complex64 as C64;
    use rand::SeedableRng;
    use crate::channel::Channel;
    use crate::mpo::build_hamiltonian;
    use crate::mps::TruncPolicy;
    use crate::site::{ OpSym, Site, SiteTables };

    fn setup(n: usize) -> (Vec<Site>, SiteTables, Mpo<C64>) {
        let chain = vec![Site::spin_half(); n];
        let tables = SiteTables::for_chain(&chain);
        let channels = vec![
            Channel::FiniteRange {
                op_a: OpSym::Z, op_b: OpSym::Z, delta: 1, weight: -1.0 },
            Channel::Field { op: OpSym::X, weight: 0.5 },
        ];
        let mpo = build_hamiltonian(&channels, &chain, &tables).unwrap();
        (chain, tables, mpo)
    }

    #[test]
    fn expectation_matches_dense() {
        let (chain, _, mpo) = setup(5);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut mps: Mps<C64> = Mps::random(
            &chain, 4, TruncPolicy::default(), &mut rng).unwrap();
        mps.canonicalize(0).unwrap();
        let e = expectation(&mps, &mpo).unwrap();
        let h = mpo.to_dense();
        let psi = mps.to_dense();
        let e_dense = (psi.adjoint() * &h * &psi)[(0, 0)];
        assert!((e - e_dense).norm() < 1e-11);
        assert!(e.im.abs() < 1e-11);
    }

    #[test]
    fn rebuild_matches_incremental() {
        let (chain, _, mpo) = setup(6);
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let mut mps: Mps<C64> = Mps::random(
            &chain, 5, TruncPolicy::default(), &mut rng).unwrap();
        mps.canonicalize(2).unwrap();
        let envs = Environments::build(&mps, &mpo, 2).unwrap();

        // advance the center and refresh the crossed slot, then compare
        // against a from-scratch rebuild
        let mut mps2 = mps.clone();
        mps2.move_center_right().unwrap();
        let mut incr = envs.clone();
        incr.refresh_left(3, &mps2, &mpo);
        let fresh = Environments::build(&mps2, &mpo, 3).unwrap();
        for p in 0..=6 {
            let a = incr.slot(p);
            let b = fresh.slot(p);
            assert_eq!(a.mpo_dim(), b.mpo_dim());
            for w in 0..a.mpo_dim() {
                assert!((a.mat(w) - b.mat(w)).norm() < 1e-11, "slot {p} mpo {w}");
            }
        }
    }

    #[test]
    fn product_state_energy() {
        // all-up product state of the Ising chain: ⟨H⟩ = J Σ ⟨Z_i Z_{i+1}⟩
        // with ⟨Z⟩ = 1/2 and ⟨X⟩ = 0
        let (chain, tables, mpo) = setup(6);
        let pattern =
            vec![crate::mps::ProductPattern::Spin(
                crate::site::SpinAxis::Z, 1); 6];
        let mps: Mps<C64> = Mps::product_state(
            &chain, &pattern, &tables, TruncPolicy::default()).unwrap();
        let e = expectation(&mps, &mpo).unwrap();
        let expected = -1.0 * 5.0 * 0.25;
        assert!((e.re - expected).abs() < 1e-12);
        assert!(e.im.abs() < 1e-13);
    }
}
