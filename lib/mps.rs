//! Matrix product states over heterogeneous site chains, held in a
//! center-canonical gauge.
//!
//! A state over an *N*-site chain is factored into rank-3 tensors
//!
//! ```text
//!  u       v
//! ---- A ----
//!      |
//!      | s
//! ```
//!
//! with physical index `s` and bond indices `u`, `v`; boundary bond
//! dimensions are fixed at 1. The gauge freedom on the bonds is used to
//! keep every tensor strictly to the left of a designated *center*
//! left-orthogonal (its left-fused matrix has orthonormal columns) and
//! every tensor to the right right-orthogonal (orthonormal rows). All of
//! the state's norm and entanglement data across a bond is then carried by
//! the center tensor, which is what makes bond-local updates cheap: the
//! sweep algorithms only ever touch the center and its neighbor.
//!
//! Since `nalgebra` has no rank-3 structures, a tensor `A_usv` is stored as
//! a matrix in one of two fused forms (see [`Fused`]): `A_<us>v` with the
//! physical index fused to the left bond, or `A_u<sv>` with it fused to the
//! right. The two are related by a cheap column-major
//! [reshape][na::DMatrix::reshape_generic]; bond moves become ordinary
//! matrix factorizations of the appropriate fusion.
//!
//! Truncation happens at every bond move through a [`Schmidt`]
//! decomposition governed by a [`TruncPolicy`]: singular values below
//! `cutoff · σ_max` or beyond a rank ceiling are discarded (ties at the
//! threshold keep the larger index, deterministically), the kept spectrum
//! is renormalized to unit weight, and the discarded weight is reported.

use std::mem;
use nalgebra as na;
use num_complex::ComplexFloat;
use num_traits::{ Float, Zero };
use rand::{
    Rng,
    distributions::{ Distribution, Standard },
};
use thiserror::Error;
use crate::{ ComplexScalar, scalar_from_c64 };
use crate::site::{ Site, SiteError, SiteTables, SpinAxis };

#[derive(Debug, Error)]
pub enum MpsError {
    /// Returned when attempting to create a new MPS for a state of less
    /// than 1 site.
    #[error("error in MPS creation: cannot create for an empty chain")]
    EmptySystem,

    /// Returned when a product pattern's length doesn't match the chain.
    #[error("error in MPS creation: pattern length doesn't match chain")]
    PatternMismatch,

    /// Returned when a product pattern selects an eigenstate outside the
    /// local dimension, or a Fock level above the truncation ceiling.
    #[error("error in MPS creation: invalid eigenstate index")]
    InvalidEigenindex,

    /// Returned when a product pattern mixes species with the chain (a
    /// spin pattern on a boson site or vice versa).
    #[error("error in MPS creation: pattern species doesn't match site")]
    PatternSpecies,

    /// Returned when state data cannot be represented over the requested
    /// scalar kind.
    #[error("error in MPS creation: \
        complex-valued state data on a real scalar kind")]
    ComplexData,

    /// Returned when an operation addresses a bond or site out of bounds.
    #[error("error in MPS operation: site or bond index out of bounds")]
    OutOfBounds,

    /// Returned when two states over different chains are combined.
    #[error("error in MPS operation: incompatible chains")]
    IncompatibleChains,

    /// Returned when a site table lookup fails.
    #[error("{0}")]
    Site(#[from] SiteError),
}
use MpsError::*;
pub type MpsResult<T> = Result<T, MpsError>;

/// Basic wrapper enum around a bare `DMatrix`, with variants to keep track
/// of which bond index the physical index is fused to.
#[derive(Clone, Debug, PartialEq)]
pub enum Fused<A> {
    /// The physical index is fused with the left bond index; rows are
    /// `u + χ_l · s`.
    L(na::DMatrix<A>),
    /// The physical index is fused with the right bond index; columns are
    /// `s + d · v`.
    R(na::DMatrix<A>),
}

impl<A> Fused<A> {
    /// Discard fusing information and return just the bare matrix.
    pub fn unwrap(self) -> na::DMatrix<A> {
        match self {
            Self::L(mat) => mat,
            Self::R(mat) => mat,
        }
    }

    /// Return a reference to the underlying matrix.
    pub fn get(&self) -> &na::DMatrix<A> {
        match self {
            Self::L(mat) => mat,
            Self::R(mat) => mat,
        }
    }
}

/// A single site tensor in a matrix product state.
///
/// Stores the fused matrix together with the physical dimension, which is
/// what's needed to recover the rank-3 index structure. Conversions between
/// the two fusions are column-major reshapes and never copy.
#[derive(Clone, Debug, PartialEq)]
pub struct SiteTensor<A> {
    pdim: usize,
    data: Fused<A>,
}

impl<A> SiteTensor<A>
where A: ComplexScalar
{
    /// Create a new, left-fused tensor with physical dimension `pdim`.
    ///
    /// *Panics if `pdim` does not evenly divide the number of rows in
    /// `data`.*
    pub fn from_lfused(pdim: usize, data: na::DMatrix<A>) -> Self {
        if data.nrows() % pdim != 0 { panic!("inconsistent dimensions"); }
        Self { pdim, data: Fused::L(data) }
    }

    /// Create a new, right-fused tensor with physical dimension `pdim`.
    ///
    /// *Panics if `pdim` does not evenly divide the number of columns in
    /// `data`.*
    pub fn from_rfused(pdim: usize, data: na::DMatrix<A>) -> Self {
        if data.ncols() % pdim != 0 { panic!("inconsistent dimensions"); }
        Self { pdim, data: Fused::R(data) }
    }

    /// Return the dimensions of each index as `(χ_l, d, χ_r)`.
    pub fn dims(&self) -> (usize, usize, usize) {
        match &self.data {
            Fused::L(mat) => {
                let (us, v) = mat.shape();
                (us / self.pdim, self.pdim, v)
            },
            Fused::R(mat) => {
                let (u, sv) = mat.shape();
                (u, self.pdim, sv / self.pdim)
            },
        }
    }

    /// Return a reference to the inner data.
    pub fn data(&self) -> &Fused<A> { &self.data }

    // take the bare matrix out, leaving an empty placeholder
    fn take(&mut self) -> Fused<A> {
        mem::replace(&mut self.data, Fused::L(na::DMatrix::zeros(0, 0)))
    }

    /// Fuse the physical index with the left bond index, returning a
    /// reference to the underlying matrix after.
    pub fn make_lfused(&mut self) -> &na::DMatrix<A> {
        if matches!(self.data, Fused::R(..)) {
            let (u, s, v) = self.dims();
            let Fused::R(mat) = self.take() else { unreachable!() };
            let lfused = mat.reshape_generic(na::Dyn(u * s), na::Dyn(v));
            self.data = Fused::L(lfused);
        }
        self.data.get()
    }

    /// Fuse the physical index with the right bond index, returning a
    /// reference to the underlying matrix after.
    pub fn make_rfused(&mut self) -> &na::DMatrix<A> {
        if matches!(self.data, Fused::L(..)) {
            let (u, s, v) = self.dims();
            let Fused::L(mat) = self.take() else { unreachable!() };
            let rfused = mat.reshape_generic(na::Dyn(u), na::Dyn(s * v));
            self.data = Fused::R(rfused);
        }
        self.data.get()
    }

    /// Return the bare matrix in left-fused form.
    pub fn into_lfused(mut self) -> na::DMatrix<A> {
        self.make_lfused();
        self.data.unwrap()
    }

    /// Return the bare matrix in right-fused form.
    pub fn into_rfused(mut self) -> na::DMatrix<A> {
        self.make_rfused();
        self.data.unwrap()
    }

    /// Extract the bond matrix at a fixed physical index, regardless of the
    /// current fusion.
    pub fn phys_slice(&self, s: usize) -> na::DMatrix<A> {
        let (u, d, v) = self.dims();
        match &self.data {
            Fused::L(mat) => mat.rows(u * s, u).into_owned(),
            Fused::R(mat) => {
                mat.columns_with_step(s, v, d - 1).into_owned()
            },
        }
    }

    /// Frobenius norm of the tensor.
    pub fn norm(&self) -> A::Re {
        self.data.get().norm()
    }

    /// Divide all entries by the Frobenius norm.
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm.is_normal() {
            match &mut self.data {
                Fused::L(mat) => { mat.unscale_mut(norm); },
                Fused::R(mat) => { mat.unscale_mut(norm); },
            }
        }
    }
}

/// Truncation policy for Schmidt decompositions: a relative cutoff on the
/// singular spectrum combined with an optional hard rank ceiling.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TruncPolicy<R> {
    /// Hard ceiling on the number of kept singular values; `None` leaves
    /// the rank unconstrained.
    pub max_dim: Option<usize>,
    /// Relative cutoff: values below `cutoff · σ_max` are discarded.
    pub cutoff: R,
}

impl<R> Default for TruncPolicy<R>
where R: Float
{
    fn default() -> Self {
        Self { max_dim: None, cutoff: R::epsilon() }
    }
}

impl<R> TruncPolicy<R>
where R: Float
{
    /// A policy that never truncates.
    pub fn none() -> Self {
        Self { max_dim: None, cutoff: R::zero() }
    }

    /// Set the rank ceiling.
    pub fn with_max_dim(mut self, max_dim: usize) -> Self {
        self.max_dim = Some(max_dim);
        self
    }

    /// Set the relative cutoff.
    pub fn with_cutoff(mut self, cutoff: R) -> Self {
        self.cutoff = cutoff;
        self
    }
}

/// Data struct holding a truncated Schmidt decomposition repurposed for MPS
/// factorization.
#[derive(Clone, Debug, PartialEq)]
pub struct Schmidt<A>
where A: ComplexScalar
{
    /// Left Schmidt column vectors.
    pub u: na::DMatrix<A>,
    /// Schmidt values, renormalized to unit total weight.
    pub s: na::DVector<A::Re>,
    /// Right Schmidt row vectors.
    pub q: na::DMatrix<A>,
    /// Schmidt rank after truncation.
    pub rank: usize,
    /// Squared-norm weight discarded by the truncation, relative to the
    /// full spectrum.
    pub discarded: A::Re,
}

impl<A> Schmidt<A>
where A: ComplexScalar
{
    /// Compute the Schmidt decomposition of a matrix, truncating according
    /// to `policy`.
    ///
    /// Singular values come back sorted descending; the kept range is the
    /// largest prefix satisfying both the relative cutoff (values exactly
    /// at the threshold are kept) and the rank ceiling, with at least one
    /// value always retained. The kept spectrum is renormalized so its
    /// squared sum is 1.
    pub fn from_decomp(q: na::DMatrix<A>, policy: &TruncPolicy<A::Re>) -> Self {
        let svd = q.svd(true, true);
        let Some(mut u) = svd.u else { unreachable!() };
        let mut s = svd.singular_values;
        let Some(mut q) = svd.v_t else { unreachable!() };
        let total: A::Re =
            s.iter()
            .map(|sj| sj.powi(2))
            .fold(A::Re::zero(), |acc, x| acc + x);
        let smax = s[0];
        let threshold = policy.cutoff * smax;
        let mut rank =
            s.iter()
            .take_while(|sj| **sj >= threshold && sj.is_normal())
            .count()
            .max(1);
        if let Some(cap) = policy.max_dim { rank = rank.min(cap.max(1)); }
        let discarded: A::Re =
            if total.is_normal() {
                s.iter().skip(rank)
                    .map(|sj| sj.powi(2))
                    .fold(A::Re::zero(), |acc, x| acc + x)
                    / total
            } else {
                A::Re::zero()
            };
        s.resize_vertically_mut(rank, A::Re::zero());
        let norm: A::Re =
            s.iter()
            .map(|sj| sj.powi(2))
            .fold(A::Re::zero(), |acc, x| acc + x)
            .sqrt();
        if norm.is_normal() { s.unscale_mut(norm); }
        u.resize_horizontally_mut(rank, A::zero());
        q.resize_vertically_mut(rank, A::zero());
        Self { u, s, q, rank, discarded }
    }

    /// Return the right factor with the Schmidt values multiplied in.
    pub fn weighted_q(&self) -> na::DMatrix<A> {
        let mut q = self.q.clone();
        q.row_iter_mut().zip(self.s.iter())
            .for_each(|(mut row, sv)| { row.scale_mut(*sv); });
        q
    }

    /// Return the left factor with the Schmidt values multiplied in.
    pub fn weighted_u(&self) -> na::DMatrix<A> {
        let mut u = self.u.clone();
        u.column_iter_mut().zip(self.s.iter())
            .for_each(|(mut col, sv)| { col.scale_mut(*sv); });
        u
    }
}

/// Per-site description of a product state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ProductPattern {
    /// Select the `usize`-th eigenstate (eigenvalues ascending) of the spin
    /// operator along the given axis.
    Spin(SpinAxis, usize),
    /// Select a Fock occupation state of a boson site.
    Fock(usize),
}

/// A matrix product state over a chain of sites.
///
/// The state tracks its canonical center when it has one: `center ==
/// Some(c)` means tensors `0 ‥ c` are left-orthogonal and `c + 1 ‥ N`
/// right-orthogonal. Freshly random states have no center until
/// [`canonicalize`][Self::canonicalize] is called; product states are
/// canonical everywhere and start with the center at 0.
#[derive(Clone, Debug, PartialEq)]
pub struct Mps<A>
where A: ComplexScalar
{
    // number of sites, ≥ 1
    pub(crate) n: usize,
    // site tensors, length n
    pub(crate) data: Vec<SiteTensor<A>>,
    // chain of sites, length n
    pub(crate) chain: Vec<Site>,
    // canonical center, if the gauge is established
    pub(crate) center: Option<usize>,
    // truncation policy applied at every bond move
    pub(crate) policy: TruncPolicy<A::Re>,
}

impl<A> Mps<A>
where A: ComplexScalar
{
    /// Initialize to a separable product state described per-site by
    /// `pattern`.
    ///
    /// Spin sites take an `(axis, eigenindex)` pair selecting an eigenstate
    /// of the spin operator along that axis (eigenvalues ascending); boson
    /// sites take a Fock occupation number.
    ///
    /// Fails if the chain is empty, the pattern doesn't match the chain in
    /// length or species, an eigenstate index is out of range, or the
    /// selected eigenvector cannot be represented over `A` (e.g. a
    /// `Y`-axis eigenstate on a real scalar kind).
    pub fn product_state(
        chain: &[Site],
        pattern: &[ProductPattern],
        tables: &SiteTables,
        policy: TruncPolicy<A::Re>,
    ) -> MpsResult<Self> {
        if chain.is_empty() { return Err(EmptySystem); }
        if pattern.len() != chain.len() { return Err(PatternMismatch); }
        let n = chain.len();
        let data: Vec<SiteTensor<A>> =
            chain.iter().zip(pattern)
            .map(|(site, pat)| {
                let d = site.dim();
                let column: Vec<A> =
                    match (site, pat) {
                        (Site::Spin { .. }, ProductPattern::Spin(axis, j)) => {
                            if *j >= d { return Err(InvalidEigenindex); }
                            let basis = tables.eigenbasis(*site, *axis)?;
                            basis.vectors.column(*j).iter()
                                .map(|z| scalar_from_c64::<A>(*z))
                                .collect::<Option<Vec<A>>>()
                                .ok_or(ComplexData)?
                        },
                        (Site::Boson { .. }, ProductPattern::Fock(level)) => {
                            if *level >= d { return Err(InvalidEigenindex); }
                            (0..d)
                                .map(|k| {
                                    if k == *level { A::one() } else { A::zero() }
                                })
                                .collect()
                        },
                        _ => { return Err(PatternSpecies); },
                    };
                let mat = na::DMatrix::from_vec(d, 1, column);
                Ok(SiteTensor::from_lfused(d, mat))
            })
            .collect::<MpsResult<Vec<_>>>()?;
        Ok(Self { n, data, chain: chain.to_vec(), center: Some(0), policy })
    }

    /// Initialize to a random state with target bond dimension `chi0`.
    ///
    /// Tensor entries are drawn i.i.d. from the scalar kind's standard
    /// distribution. The state is neither canonical nor normalized;
    /// [`canonicalize`][Self::canonicalize] establishes both.
    pub fn random<R>(
        chain: &[Site],
        chi0: usize,
        policy: TruncPolicy<A::Re>,
        rng: &mut R,
    ) -> MpsResult<Self>
    where
        R: Rng + ?Sized,
        Standard: Distribution<A::Re>,
    {
        if chain.is_empty() { return Err(EmptySystem); }
        let n = chain.len();
        let chi0 = chi0.max(1);
        let data: Vec<SiteTensor<A>> =
            chain.iter().enumerate()
            .map(|(i, site)| {
                let d = site.dim();
                let chi_l = if i == 0 { 1 } else { chi0 };
                let chi_r = if i == n - 1 { 1 } else { chi0 };
                let mat = na::DMatrix::from_fn(chi_l * d, chi_r, |_, _| {
                    match A::KIND {
                        crate::ScalarKind::Real => A::from_re(rng.gen()),
                        crate::ScalarKind::Complex =>
                            A::from_components(rng.gen(), rng.gen()),
                    }
                });
                SiteTensor::from_lfused(d, mat)
            })
            .collect();
        Ok(Self { n, data, chain: chain.to_vec(), center: None, policy })
    }

    /// Return the number of sites.
    pub fn len(&self) -> usize { self.n }

    /// Always `false`; constructors reject empty chains.
    pub fn is_empty(&self) -> bool { false }

    /// Return the chain the state lives on.
    pub fn chain(&self) -> &[Site] { &self.chain }

    /// Return the canonical center, if the gauge is established.
    pub fn center(&self) -> Option<usize> { self.center }

    /// Return the current truncation policy.
    pub fn policy(&self) -> TruncPolicy<A::Re> { self.policy }

    /// Set a new truncation policy for subsequent bond moves.
    pub fn set_policy(&mut self, policy: TruncPolicy<A::Re>) {
        self.policy = policy;
    }

    /// Return a reference to the site tensor at `i`.
    pub fn tensor(&self, i: usize) -> &SiteTensor<A> { &self.data[i] }

    /// Return a mutable reference to the site tensor at `i`.
    ///
    /// Replacing tensor data invalidates the canonical gauge; callers that
    /// do so should re-[`canonicalize`][Self::canonicalize].
    pub fn tensor_mut(&mut self, i: usize) -> &mut SiteTensor<A> {
        &mut self.data[i]
    }

    /// Return the dimension of the bond between sites `b` and `b + 1`.
    pub fn bond_dim(&self, b: usize) -> Option<usize> {
        (b + 1 < self.n).then(|| self.data[b].dims().2)
    }

    /// Return the maximum bond dimension in the state.
    pub fn max_bond_dim(&self) -> usize {
        self.data.iter().map(|a| a.dims().2).fold(1, usize::max)
    }

    // factor the tensor at `i` into a right-orthogonal part, absorbing the
    // remainder into the left neighbor; returns the discarded weight
    fn right_orthogonalize(&mut self, i: usize) -> A::Re {
        let d = self.data[i].dims().1;
        let mat = self.data[i].make_rfused().clone();
        let dec = Schmidt::from_decomp(mat, &self.policy);
        self.data[i] = SiteTensor::from_rfused(d, dec.q.clone());
        let carry = dec.weighted_u();
        let dl = self.data[i - 1].dims().1;
        let prev = self.data[i - 1].make_lfused() * carry;
        self.data[i - 1] = SiteTensor::from_lfused(dl, prev);
        dec.discarded
    }

    // factor the tensor at `i` into a left-orthogonal part, absorbing the
    // remainder into the right neighbor; returns the discarded weight
    fn left_orthogonalize(&mut self, i: usize) -> A::Re {
        let d = self.data[i].dims().1;
        let mat = self.data[i].make_lfused().clone();
        let dec = Schmidt::from_decomp(mat, &self.policy);
        self.data[i] = SiteTensor::from_lfused(d, dec.u.clone());
        let carry = dec.weighted_q();
        let dr = self.data[i + 1].dims().1;
        let next = carry * self.data[i + 1].make_rfused();
        self.data[i + 1] = SiteTensor::from_rfused(dr, next);
        dec.discarded
    }

    /// Bring the state into canonical form with center `c`, normalizing it
    /// in the process.
    ///
    /// Sweeps right-to-left from the last site down to `c + 1`, then
    /// left-to-right from the first site up to `c − 1`, truncating every
    /// bond according to the current policy. Returns the total discarded
    /// weight.
    pub fn canonicalize(&mut self, c: usize) -> MpsResult<A::Re> {
        if c >= self.n { return Err(OutOfBounds); }
        let mut discarded = A::Re::zero();
        for i in (c + 1 .. self.n).rev() {
            discarded = discarded + self.right_orthogonalize(i);
        }
        for i in 0 .. c {
            discarded = discarded + self.left_orthogonalize(i);
        }
        // every bond move renormalizes its spectrum, so after the sweeps
        // the entire norm sits in the center tensor
        self.data[c].normalize();
        self.center = Some(c);
        Ok(discarded)
    }

    /// Move the canonical center one site to the right.
    ///
    /// Fails if the gauge is not established or the center is at the last
    /// site.
    pub fn move_center_right(&mut self) -> MpsResult<A::Re> {
        let Some(c) = self.center else { return Err(OutOfBounds); };
        if c + 1 >= self.n { return Err(OutOfBounds); }
        let discarded = self.left_orthogonalize(c);
        self.center = Some(c + 1);
        Ok(discarded)
    }

    /// Move the canonical center one site to the left.
    ///
    /// Fails if the gauge is not established or the center is at the first
    /// site.
    pub fn move_center_left(&mut self) -> MpsResult<A::Re> {
        let Some(c) = self.center else { return Err(OutOfBounds); };
        if c == 0 { return Err(OutOfBounds); }
        let discarded = self.right_orthogonalize(c);
        self.center = Some(c - 1);
        Ok(discarded)
    }

    /// Move the canonical center to site `c`, one bond at a time.
    pub fn move_center_to(&mut self, c: usize) -> MpsResult<A::Re> {
        if c >= self.n { return Err(OutOfBounds); }
        if self.center.is_none() { return self.canonicalize(c); }
        let mut discarded = A::Re::zero();
        while self.center.map(|cur| cur < c).unwrap_or(false) {
            discarded = discarded + self.move_center_right()?;
        }
        while self.center.map(|cur| cur > c).unwrap_or(false) {
            discarded = discarded + self.move_center_left()?;
        }
        Ok(discarded)
    }

    /// Compute the overlap ⟨`self`|`other`⟩ by transfer contraction.
    ///
    /// Works in any gauge. Fails if the two states live on different
    /// chains.
    pub fn overlap(&self, other: &Self) -> MpsResult<A> {
        if self.chain != other.chain { return Err(IncompatibleChains); }
        let mut env: na::DMatrix<A> = na::DMatrix::identity(1, 1);
        for i in 0..self.n {
            let d = self.chain[i].dim();
            let mut next: na::DMatrix<A> = na::DMatrix::zeros(
                self.data[i].dims().2, other.data[i].dims().2);
            for s in 0..d {
                let bra = self.data[i].phys_slice(s);
                let ket = other.data[i].phys_slice(s);
                next += bra.adjoint() * &env * ket;
            }
            env = next;
        }
        Ok(env[(0, 0)])
    }

    /// Compute the squared norm ⟨ψ|ψ⟩.
    pub fn norm_sq(&self) -> A::Re {
        let Ok(ip) = self.overlap(self) else { unreachable!() };
        ip.re()
    }

    /// Contract the full state into a bare vector indexed with site 0
    /// slowest, for testing against dense references on small chains.
    pub fn to_dense(&self) -> na::DVector<A> {
        let total: usize = self.chain.iter().map(|s| s.dim()).product();
        let dims: Vec<usize> = self.chain.iter().map(|s| s.dim()).collect();
        na::DVector::from_fn(total, |idx, _| {
            let mut rem = idx;
            let mut levels: Vec<usize> = Vec::with_capacity(self.n);
            for d in dims.iter().rev() {
                levels.push(rem % d);
                rem /= d;
            }
            levels.reverse();
            let mut acc: na::DMatrix<A> = na::DMatrix::identity(1, 1);
            for (i, s) in levels.into_iter().enumerate() {
                acc = acc * self.data[i].phys_slice(s);
            }
            acc[(0, 0)]
        })
    }

    /// Build the two-site block across bond `(i, i + 1)` as a fused matrix
    /// `(χ_l · d_i) × (d_{i+1} · χ_r)`.
    ///
    /// The canonical center must be at `i` or `i + 1` for the block to
    /// carry the full local state.
    pub fn two_site_block(&mut self, i: usize) -> MpsResult<na::DMatrix<A>> {
        if i + 1 >= self.n { return Err(OutOfBounds); }
        let left = self.data[i].make_lfused().clone();
        let right = self.data[i + 1].make_rfused();
        Ok(left * right)
    }

    /// Split a two-site block back into tensors at `(i, i + 1)` with a
    /// truncated Schmidt decomposition, absorbing the Schmidt values in the
    /// direction of `toward_right`, and move the center accordingly.
    ///
    /// Returns the discarded weight.
    pub fn split_two_site_block(
        &mut self,
        i: usize,
        block: na::DMatrix<A>,
        toward_right: bool,
    ) -> MpsResult<A::Re> {
        if i + 1 >= self.n { return Err(OutOfBounds); }
        let d_l = self.chain[i].dim();
        let d_r = self.chain[i + 1].dim();
        let dec = Schmidt::from_decomp(block, &self.policy);
        if toward_right {
            self.data[i] = SiteTensor::from_lfused(d_l, dec.u.clone());
            self.data[i + 1] = SiteTensor::from_rfused(d_r, dec.weighted_q());
            self.center = Some(i + 1);
        } else {
            self.data[i] = SiteTensor::from_lfused(d_l, dec.weighted_u());
            self.data[i + 1] = SiteTensor::from_rfused(d_r, dec.q.clone());
            self.center = Some(i);
        }
        Ok(dec.discarded)
    }

    /// Return the Schmidt spectrum across the bond between sites `b` and
    /// `b + 1`.
    ///
    /// Moves the canonical center to `b` (a gauge change only; the state
    /// is unaffected up to truncation already implied by the policy).
    pub fn schmidt_spectrum(&mut self, b: usize) -> MpsResult<na::DVector<A::Re>> {
        if b + 1 >= self.n { return Err(OutOfBounds); }
        self.move_center_to(b)?;
        let mat = self.data[b].make_lfused().clone();
        let dec = Schmidt::from_decomp(mat, &TruncPolicy::none());
        Ok(dec.s)
    }
}
