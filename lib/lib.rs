#![allow(non_snake_case)]

//! Core numerical engine for simulating one-dimensional quantum many-body
//! systems with matrix product states (MPS) and matrix product operators
//! (MPO).
//!
//! The crate is organized around three cooperating layers:
//!
//! 1. **Operator compilation**: Hamiltonians are described as lists of
//!    [`Channel`][channel::Channel]s (single-site fields, finite-range and
//!    exponentially/power-law decaying couplings, spin-boson products),
//!    lowered through a weighted finite-state machine ([`fsm`]) into a
//!    bond-dimension-optimal MPO ([`mpo`]). Power-law interactions are
//!    approximated by a sum of exponentials ([`expfit`]) so their MPO bond
//!    dimension is set by the fit order rather than the chain length.
//! 2. **Tensor machinery**: chain states live in [`mps`] as sequences of
//!    rank-3 tensors held in a center-canonical gauge, with truncated
//!    Schmidt decompositions governing every bond move. Contractions of the
//!    state against the MPO are cached in [`env`] and exposed as local
//!    linear operators in [`heff`].
//! 3. **Sweep algorithms**: [`sweep`] drives two-site DMRG (ground-state
//!    search via the Lanczos solver in [`solver`]) and two-site TDVP
//!    (real- or imaginary-time evolution via a Krylov matrix exponential),
//!    maintaining the canonical-form/environment invariant across bonds.
//!
//! Measurements on finalized states (expectation values, correlators,
//! entanglement spectra and entropies) live in [`measure`].
//!
//! All dense linear algebra is done through [`nalgebra`]; rank-3 and rank-4
//! tensors are modeled as matrices with a tracked index fusion, so bond
//! moves are reshapes and matrix products rather than general tensor
//! transposes.

use nalgebra as na;
use num_complex::{ Complex, ComplexFloat, Complex64 as C64 };
use num_traits::{ Float, Zero };

pub mod site;
pub mod channel;
pub mod expfit;
pub mod fsm;
pub mod mpo;
pub mod mps;
pub mod env;
pub mod heff;
pub mod solver;
pub mod sweep;
pub mod measure;

pub use site::{ Site, SiteTables, OpSym, SpinAxis };
pub use channel::Channel;
pub use mpo::Mpo;
pub use mps::{ Mps, TruncPolicy };
pub use sweep::{ SweepEngine, DmrgOptions, TdvpOptions, EvolKind };

/// Distinguishes real from complex scalar fields at runtime.
///
/// The element type of an MPS or MPO is fixed at the type level by the
/// choice of [`ComplexScalar`], but which choice is *required* depends on
/// runtime data: a chain whose channels reference an imaginary-valued
/// operator, or whose power-law fit produces complex decay rates, cannot be
/// represented over a real scalar. `ScalarKind` is the value-level shadow
/// of that requirement; see [`channel::required_kind`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScalarKind {
    /// Elements are real numbers.
    Real,
    /// Elements are complex numbers.
    Complex,
}

impl ScalarKind {
    /// Combine two kinds, promoting to [`Complex`][Self::Complex] if either
    /// operand is complex.
    pub fn promote(self, other: Self) -> Self {
        match (self, other) {
            (Self::Real, Self::Real) => Self::Real,
            _ => Self::Complex,
        }
    }
}

/// Extension trait for [`ComplexFloat`].
pub trait ComplexFloatExt: ComplexFloat {
    /// The runtime kind of the scalar field.
    const KIND: ScalarKind;

    /// Convert from `Self::Real`.
    ///
    /// Should adhere to the usual relationship between ordinary complex and
    /// real numbers, i.e. the result should have imaginary part equal to
    /// zero.
    fn from_re(x: Self::Real) -> Self;

    /// Construct from real and imaginary components.
    ///
    /// *Panics for real scalar types if `im` is nonzero*; callers gate
    /// complex-only code paths on [`KIND`][Self::KIND].
    fn from_components(re: Self::Real, im: Self::Real) -> Self;

    /// Convert an `f64` into `Self::Real`.
    fn re_from_f64(x: f64) -> Self::Real;
}

impl ComplexFloatExt for f64 {
    const KIND: ScalarKind = ScalarKind::Real;

    fn from_re(x: Self::Real) -> Self { x }

    fn from_components(re: Self::Real, im: Self::Real) -> Self {
        if im != 0.0 { panic!("nonzero imaginary part on a real scalar"); }
        re
    }

    fn re_from_f64(x: f64) -> Self::Real { x }
}

impl<T> ComplexFloatExt for Complex<T>
where
    Complex<T>: ComplexFloat<Real = T>,
    T: Zero + Float,
{
    const KIND: ScalarKind = ScalarKind::Complex;

    fn from_re(x: Self::Real) -> Self {
        Self { re: x, im: T::zero() }
    }

    fn from_components(re: Self::Real, im: Self::Real) -> Self {
        Self { re, im }
    }

    fn re_from_f64(x: f64) -> Self::Real {
        <T as num_traits::NumCast>::from(x).unwrap_or_else(T::zero)
    }
}

/// Convenience trait to identify number types that can be used as MPS/MPO
/// elements in linear-algebraic operations.
pub trait ComplexScalar
where
    Self:
        ComplexFloat<Real = Self::Re>
        + ComplexFloatExt
        + na::ComplexField<RealField = Self::Re>
{
    /// Type for associated real values.
    type Re: Float + na::RealField;
}

impl<A> ComplexScalar for A
where
    A:
        ComplexFloat<Real = <A as na::ComplexField>::RealField>
        + ComplexFloatExt
        + na::ComplexField,
    <A as na::ComplexField>::RealField: Float,
{
    type Re = <A as na::ComplexField>::RealField;
}

/// Convert a concrete `Complex64` into an arbitrary [`ComplexScalar`].
///
/// Returns `None` if `z` carries a non-negligible imaginary part but `A` is
/// a real scalar type.
pub(crate) fn scalar_from_c64<A>(z: C64) -> Option<A>
where A: ComplexScalar
{
    const IM_TOL: f64 = 1e-14;
    match A::KIND {
        ScalarKind::Real => {
            if z.im.abs() > IM_TOL * z.re.abs().max(1.0) {
                None
            } else {
                Some(A::from_re(A::re_from_f64(z.re)))
            }
        },
        ScalarKind::Complex => {
            Some(A::from_components(A::re_from_f64(z.re), A::re_from_f64(z.im)))
        },
    }
}
