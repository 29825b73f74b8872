//! Assembly of compiled transition graphs into matrix product operators.
//!
//! An MPO site tensor is logically a rank-4 object
//! W[α, β, s′, s] with bond indices α (left), β (right) and physical
//! indices s′, s. The FSM construction makes these tensors *block sparse*
//! in the bond indices: only transitions present in the graph contribute,
//! and the remaining blocks are exactly zero. [`MpoTensor`] therefore
//! stores a χ<sub>l</sub> × χ<sub>r</sub> grid of optional d×d operator
//! blocks, which is both what the assembler naturally produces and what
//! the effective-Hamiltonian contractions want to consume.
//!
//! Boundary reduction selects the single physical row/column of the bulk:
//! the first site keeps only the final-idle row, the last site only the
//! initial-idle column, so W[0] is 1 × χ and W[N−1] is χ × 1.

use nalgebra as na;
use thiserror::Error;
use crate::{ ComplexScalar, scalar_from_c64 };
use crate::channel::Channel;
use crate::fsm::{ self, FsmError, FsmGraph };
use crate::site::{ Site, SiteError, SiteTables };

#[derive(Debug, Error)]
pub enum MpoError {
    /// Returned when attempting to build an MPO over an empty chain.
    #[error("error in MPO construction: cannot build over an empty chain")]
    EmptyChain,

    /// Returned when operator data (or a fitted decay rate) is
    /// complex-valued but the requested scalar kind is real.
    #[error("error in MPO construction: \
        complex-valued operator data on a real scalar kind")]
    ComplexData,

    /// Returned when spin-boson channels are used on a chain whose boson
    /// site is not the unique first site.
    #[error("error in MPO construction: \
        spin-boson channels require a single boson site at the head of the chain")]
    SpinBosonLayout,

    /// Returned when channel compilation fails.
    #[error("{0}")]
    Fsm(#[from] FsmError),

    /// Returned when an operator symbol fails to resolve.
    #[error("{0}")]
    Site(#[from] SiteError),
}
use MpoError::*;
pub type MpoResult<T> = Result<T, MpoError>;

/// A single MPO site tensor as a grid of operator blocks.
///
/// Block `(α, β)` is the d×d operator at left bond value α, right bond
/// value β; `None` blocks are identically zero.
#[derive(Clone, Debug, PartialEq)]
pub struct MpoTensor<A> {
    ldim: usize,
    rdim: usize,
    pdim: usize,
    blocks: Vec<Option<na::DMatrix<A>>>,
}

impl<A> MpoTensor<A>
where A: ComplexScalar
{
    /// Create an all-zero tensor.
    pub fn zeros(ldim: usize, rdim: usize, pdim: usize) -> Self {
        Self {
            ldim,
            rdim,
            pdim,
            blocks: vec![None; ldim * rdim],
        }
    }

    /// Return the left bond dimension.
    pub fn left_dim(&self) -> usize { self.ldim }

    /// Return the right bond dimension.
    pub fn right_dim(&self) -> usize { self.rdim }

    /// Return the physical dimension.
    pub fn phys_dim(&self) -> usize { self.pdim }

    /// Return the operator block at bond values `(a, b)`, if nonzero.
    pub fn block(&self, a: usize, b: usize) -> Option<&na::DMatrix<A>> {
        self.blocks[a * self.rdim + b].as_ref()
    }

    /// Iterate over all nonzero blocks as `(a, b, block)`.
    pub fn blocks(&self) -> impl Iterator<Item = (usize, usize, &na::DMatrix<A>)> {
        self.blocks.iter().enumerate()
            .filter_map(|(k, blk)| {
                blk.as_ref().map(|mat| (k / self.rdim, k % self.rdim, mat))
            })
    }

    fn accumulate(&mut self, a: usize, b: usize, mat: na::DMatrix<A>) {
        let slot = &mut self.blocks[a * self.rdim + b];
        match slot {
            Some(blk) => { *blk += mat; },
            None => { *slot = Some(mat); },
        }
    }
}

/// A matrix product operator over a fixed chain.
///
/// Built once from a channel list and immutable afterward.
#[derive(Clone, Debug, PartialEq)]
pub struct Mpo<A> {
    tensors: Vec<MpoTensor<A>>,
    chain: Vec<Site>,
}

impl<A> Mpo<A>
where A: ComplexScalar
{
    /// Return the number of sites.
    pub fn len(&self) -> usize { self.tensors.len() }

    /// Return `true` if the MPO has no sites.
    pub fn is_empty(&self) -> bool { self.tensors.is_empty() }

    /// Return the site tensor at position `i`.
    pub fn tensor(&self, i: usize) -> &MpoTensor<A> { &self.tensors[i] }

    /// Return the chain the MPO was built over.
    pub fn chain(&self) -> &[Site] { &self.chain }

    /// Return the maximum bond dimension.
    pub fn max_bond_dim(&self) -> usize {
        self.tensors.iter()
            .map(|w| w.left_dim().max(w.right_dim()))
            .fold(0, usize::max)
    }

    /// Contract the full operator into a dense matrix, site 0 slowest.
    ///
    /// Exponential cost in the chain length; for testing on small chains
    /// only.
    pub fn to_dense(&self) -> na::DMatrix<A> {
        let mut acc: Vec<na::DMatrix<A>> =
            (0..self.tensors[0].right_dim())
            .map(|b| {
                self.tensors[0].block(0, b)
                    .cloned()
                    .unwrap_or_else(|| {
                        let d = self.tensors[0].phys_dim();
                        na::DMatrix::zeros(d, d)
                    })
            })
            .collect();
        for w in self.tensors.iter().skip(1) {
            let dtot = acc[0].nrows() * w.phys_dim();
            let mut next: Vec<na::DMatrix<A>> =
                vec![na::DMatrix::zeros(dtot, dtot); w.right_dim()];
            for (b, c, blk) in w.blocks() {
                next[c] += acc[b].kronecker(blk);
            }
            acc = next;
        }
        let Some(h) = acc.pop() else { unreachable!() };
        h
    }
}

/// Assemble an MPO from a compiled transition graph.
///
/// Each edge `(α, β, op, w)` contributes `w · op(site)` to bulk block
/// `(α, β)` at every site carrying the symbol; boundary reduction then
/// selects the final-idle row at the first site and the initial-idle
/// column at the last. Fails if the chain is empty or the graph's weights
/// or operators cannot be represented over `A`.
pub fn build_mpo<A>(
    graph: &FsmGraph,
    chain: &[Site],
    tables: &SiteTables,
) -> MpoResult<Mpo<A>>
where A: ComplexScalar
{
    if chain.is_empty() { return Err(EmptyChain); }
    let n = chain.len();
    let chi = graph.nstates;
    let last = graph.final_state();
    let tensors: Vec<MpoTensor<A>> =
        chain.iter().enumerate()
        .map(|(i, site)| {
            let d = site.dim();
            let (ldim, rdim) = (
                if i == 0 { 1 } else { chi },
                if i == n - 1 { 1 } else { chi },
            );
            let mut w = MpoTensor::zeros(ldim, rdim, d);
            for e in graph.edges.iter() {
                // boundary reduction: the first site only leaves the final
                // idle state, the last only enters the initial one
                if i == 0 && e.from != last { continue; }
                if i == n - 1 && e.to != 0 { continue; }
                if !site.has_op(e.op) { continue; }
                let op = tables.operator(*site, e.op)?;
                let mat: Option<na::DMatrix<A>> =
                    op.iter()
                    .map(|z| scalar_from_c64::<A>(*z * e.weight))
                    .collect::<Option<Vec<A>>>()
                    .map(|data| na::DMatrix::from_vec(d, d, data));
                let Some(mat) = mat else { return Err(ComplexData); };
                let a = if i == 0 { 0 } else { e.from };
                let b = if i == n - 1 { 0 } else { e.to };
                w.accumulate(a, b, mat);
            }
            Ok(w)
        })
        .collect::<MpoResult<Vec<_>>>()?;
    Ok(Mpo { tensors, chain: chain.to_vec() })
}

// true if the channel (or any sub-channel) couples to the boson site
fn references_boson(channel: &Channel) -> bool {
    matches!(channel, Channel::SpinBoson { .. })
}

/// Compile a channel list and assemble its MPO in one step.
///
/// Validates the spin-boson layout rule (the boson site, if coupled to
/// spin channels, must be the unique boson and sit at the head of the
/// chain), builds the FSM with the default fit-error bound, and assembles
/// the tensors.
pub fn build_hamiltonian<A>(
    channels: &[Channel],
    chain: &[Site],
    tables: &SiteTables,
) -> MpoResult<Mpo<A>>
where A: ComplexScalar
{
    if chain.is_empty() { return Err(EmptyChain); }
    if channels.iter().any(references_boson) {
        let ok =
            chain[0].is_boson()
            && chain.iter().skip(1).all(|s| s.is_spin());
        if !ok { return Err(SpinBosonLayout); }
    }
    let graph = fsm::build_fsm(
        channels, chain.len(), crate::expfit::DEFAULT_MAX_REL_ERR)?;
    build_mpo(&graph, chain, tables)
}
