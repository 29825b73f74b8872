//! Symbolic description of Hamiltonian terms.
//!
//! A Hamiltonian over a chain is given as a list of [`Channel`]s, each one a
//! translation-invariant family of terms: a single-site field, a
//! fixed-distance two-site coupling, an exponentially or power-law decaying
//! long-range coupling, or a product of a spin channel with a boson
//! operator. Sums of channels are represented simply as longer lists; the
//! FSM compiler in [`fsm`][crate::fsm] merges the whole list into a single
//! MPO.
//!
//! Channels carry operator *symbols* ([`OpSym`]), not matrices; symbols are
//! resolved per-site when the MPO is assembled, which is what lets one
//! channel list drive a heterogeneous chain.

use thiserror::Error;
use crate::ScalarKind;
use crate::site::OpSym;

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Returned when a finite-range coupling has zero range.
    #[error("invalid coupling: range must be at least 1")]
    InvalidRange,

    /// Returned when an exponential decay rate lies outside (0, 1) in
    /// modulus.
    #[error("invalid coupling: decay rate {0} must satisfy 0 < |λ| < 1")]
    InvalidDecayRate(f64),

    /// Returned when a power-law exponent is non-positive or non-finite.
    #[error("invalid coupling: power-law exponent {0} must be positive")]
    InvalidExponent(f64),

    /// Returned when a power-law expansion order is zero.
    #[error("invalid coupling: expansion order must be at least 1")]
    InvalidOrder,

    /// Returned when a coupling weight is non-finite.
    #[error("invalid coupling: non-finite weight")]
    NonFiniteWeight,

    /// Returned when a spin channel references a boson operator symbol, or
    /// vice versa.
    #[error("operator {0} is not valid for this channel position")]
    WrongSpecies(OpSym),

    /// Returned when a spin-boson channel has no spin factors.
    #[error("spin-boson channel requires at least one spin sub-channel")]
    EmptySubChannels,

    /// Returned when a spin-boson channel nests another boson-referencing
    /// channel.
    #[error("spin-boson sub-channels must be pure spin channels")]
    NestedBoson,
}
use ChannelError::*;
pub type ChannelResult<T> = Result<T, ChannelError>;

fn spin_sym(sym: OpSym) -> ChannelResult<()> {
    match sym {
        OpSym::Id | OpSym::X | OpSym::Y | OpSym::Z | OpSym::Sp | OpSym::Sm =>
            Ok(()),
        _ => Err(WrongSpecies(sym)),
    }
}

fn boson_sym(sym: OpSym) -> ChannelResult<()> {
    match sym {
        OpSym::B | OpSym::Bdag | OpSym::Nb => Ok(()),
        _ => Err(WrongSpecies(sym)),
    }
}

fn finite(w: f64) -> ChannelResult<()> {
    if w.is_finite() { Ok(()) } else { Err(NonFiniteWeight) }
}

/// One translation-invariant family of Hamiltonian terms.
///
/// The set of variants is closed; each lowers to a fixed set of FSM
/// transitions (see [`fsm::build_fsm`][crate::fsm::build_fsm]).
#[derive(Clone, Debug, PartialEq)]
pub enum Channel {
    /// Single-site spin term *w* · Σ<sub>i</sub> *O*<sub>i</sub>.
    Field {
        /// Operator applied at each spin site.
        op: OpSym,
        /// Overall weight.
        weight: f64,
    },
    /// Two-site coupling at fixed distance,
    /// *w* · Σ<sub>i</sub> *A*<sub>i</sub> *B*<sub>i+Δ</sub>.
    FiniteRange {
        /// Operator at the left (smaller-index) site.
        op_a: OpSym,
        /// Operator at the right site.
        op_b: OpSym,
        /// Distance Δ ≥ 1.
        delta: usize,
        /// Overall weight.
        weight: f64,
    },
    /// Exponentially decaying coupling,
    /// *a* · Σ<sub>i&lt;j</sub> *A*<sub>i</sub> *B*<sub>j</sub>
    /// λ<sup>j−i</sup>.
    ExpDecay {
        /// Operator at the left site of each pair.
        op_a: OpSym,
        /// Operator at the right site of each pair.
        op_b: OpSym,
        /// Amplitude *a*.
        amp: f64,
        /// Decay rate, 0 < |λ| < 1.
        lambda: f64,
    },
    /// Power-law decaying coupling,
    /// *J* · Σ<sub>i&lt;j</sub> *A*<sub>i</sub> *B*<sub>j</sub> /
    /// (j−i)<sup>α</sup>, compiled to a sum of `order` exponentials over
    /// distances 1 ‥ *N* − 1.
    PowerLaw {
        /// Operator at the left site of each pair.
        op_a: OpSym,
        /// Operator at the right site of each pair.
        op_b: OpSym,
        /// Overall coupling *J*.
        coupling: f64,
        /// Exponent α > 0.
        alpha: f64,
        /// Number of exponentials in the fit, ≥ 1.
        order: usize,
    },
    /// Single-site boson term *w* · *O* on the boson site.
    BosonField {
        /// Boson operator.
        op: OpSym,
        /// Overall weight.
        weight: f64,
    },
    /// Product of a list of spin channels with a boson operator,
    /// *w*<sub>b</sub> · *O*<sub>boson</sub> · (spin part).
    ///
    /// The boson site must be the first site of the chain for this channel
    /// to compile.
    SpinBoson {
        /// Pure spin channels making up the spin factor.
        spin: Vec<Channel>,
        /// Boson operator attached to every term of the spin factor.
        boson_op: OpSym,
        /// Coupling weight multiplying the whole product.
        weight: f64,
    },
}

impl Channel {
    /// Check the channel's parameters, returning the first violation found.
    pub fn validate(&self) -> ChannelResult<()> {
        match self {
            Self::Field { op, weight } => {
                spin_sym(*op)?;
                finite(*weight)
            },
            Self::FiniteRange { op_a, op_b, delta, weight } => {
                spin_sym(*op_a)?;
                spin_sym(*op_b)?;
                if *delta == 0 { return Err(InvalidRange); }
                finite(*weight)
            },
            Self::ExpDecay { op_a, op_b, amp, lambda } => {
                spin_sym(*op_a)?;
                spin_sym(*op_b)?;
                if !lambda.is_finite() || lambda.abs() >= 1.0
                    || *lambda == 0.0
                {
                    return Err(InvalidDecayRate(*lambda));
                }
                finite(*amp)
            },
            Self::PowerLaw { op_a, op_b, coupling, alpha, order } => {
                spin_sym(*op_a)?;
                spin_sym(*op_b)?;
                if !alpha.is_finite() || *alpha <= 0.0 {
                    return Err(InvalidExponent(*alpha));
                }
                if *order == 0 { return Err(InvalidOrder); }
                finite(*coupling)
            },
            Self::BosonField { op, weight } => {
                boson_sym(*op)?;
                finite(*weight)
            },
            Self::SpinBoson { spin, boson_op, weight } => {
                boson_sym(*boson_op)?;
                finite(*weight)?;
                if spin.is_empty() { return Err(EmptySubChannels); }
                for sub in spin.iter() {
                    if matches!(
                        sub, Self::BosonField { .. } | Self::SpinBoson { .. })
                    {
                        return Err(NestedBoson);
                    }
                    sub.validate()?;
                }
                Ok(())
            },
        }
    }

    // every operator symbol the channel references
    pub(crate) fn symbols(&self) -> Vec<OpSym> {
        match self {
            Self::Field { op, .. } => vec![*op],
            Self::FiniteRange { op_a, op_b, .. } => vec![*op_a, *op_b],
            Self::ExpDecay { op_a, op_b, .. } => vec![*op_a, *op_b],
            Self::PowerLaw { op_a, op_b, .. } => vec![*op_a, *op_b],
            Self::BosonField { op, .. } => vec![*op],
            Self::SpinBoson { spin, boson_op, .. } => {
                let mut syms: Vec<OpSym> =
                    spin.iter().flat_map(|sub| sub.symbols()).collect();
                syms.push(*boson_op);
                syms
            },
        }
    }
}

/// Compute the scalar kind required to represent a channel list exactly.
///
/// This is the promotion of the kinds of every operator matrix the channels
/// reference with a caller-requested baseline (e.g.
/// [`Complex`][ScalarKind::Complex] when real-time evolution is intended).
/// A [`PowerLaw`][Channel::PowerLaw] channel may additionally demand a
/// complex kind if its exponential fit produces complex decay rates; that
/// case surfaces as a fit error during MPO construction rather than here.
pub fn required_kind(channels: &[Channel], requested: ScalarKind) -> ScalarKind {
    channels.iter()
        .flat_map(|ch| ch.symbols())
        .map(|sym| sym.kind())
        .fold(requested, ScalarKind::promote)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation() {
        let ok = Channel::Field { op: OpSym::Z, weight: 0.5 };
        assert!(ok.validate().is_ok());
        let bad = Channel::FiniteRange {
            op_a: OpSym::Z, op_b: OpSym::Z, delta: 0, weight: 1.0 };
        assert!(matches!(bad.validate(), Err(InvalidRange)));
        let bad = Channel::ExpDecay {
            op_a: OpSym::X, op_b: OpSym::X, amp: 1.0, lambda: 1.0 };
        assert!(matches!(bad.validate(), Err(InvalidDecayRate(_))));
        let bad = Channel::Field { op: OpSym::B, weight: 1.0 };
        assert!(matches!(bad.validate(), Err(WrongSpecies(OpSym::B))));
        let bad = Channel::SpinBoson {
            spin: vec![],
            boson_op: OpSym::B,
            weight: 1.0,
        };
        assert!(matches!(bad.validate(), Err(EmptySubChannels)));
        let bad = Channel::SpinBoson {
            spin: vec![Channel::BosonField { op: OpSym::Nb, weight: 1.0 }],
            boson_op: OpSym::B,
            weight: 1.0,
        };
        assert!(matches!(bad.validate(), Err(NestedBoson)));
    }

    #[test]
    fn kind_requirements() {
        let real = vec![
            Channel::Field { op: OpSym::X, weight: 0.5 },
            Channel::FiniteRange {
                op_a: OpSym::Z, op_b: OpSym::Z, delta: 1, weight: -1.0 },
        ];
        assert_eq!(required_kind(&real, ScalarKind::Real), ScalarKind::Real);
        let complex = vec![
            Channel::Field { op: OpSym::Y, weight: 0.5 },
        ];
        assert_eq!(
            required_kind(&complex, ScalarKind::Real), ScalarKind::Complex);
        assert_eq!(
            required_kind(&real, ScalarKind::Complex), ScalarKind::Complex);
    }
}
