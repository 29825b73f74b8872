//! Compilation of channel lists into weighted finite-state machines.
//!
//! The MPO of a sum of local terms has a well-known automaton structure:
//! every virtual bond value is a state, every nonzero operator block
//! W[α, β] is a transition, and every path between the two idle states
//! spells out one additive term of the Hamiltonian. Compiling channels to
//! an explicit transition graph first, rather than to tensors directly,
//! makes the bond dimension exactly the number of states, which is optimal
//! for the channel vocabulary here.
//!
//! State labels are `0` for the initial idle state and `χ − 1` for the
//! final idle state after compilation; during construction the final state
//! is a placeholder that is relabeled once the number of auxiliary states
//! is known. An edge `(from, to, op, w)` populates operator block
//! `W[from, to]` at every site, with `op` resolving to zero on site kinds
//! that do not carry it.
//!
//! Reading a chain left to right, MPO paths run from the *final* state at
//! the left boundary to the *initial* state at the right boundary: the
//! initial state idles over sites to the right of a term's support, the
//! final state idles to the left, and an edge targeting the initial state
//! therefore carries the term's **rightmost** operator. The lowering rules
//! below are written in that orientation so that a coupling channel
//! `A_i B_{i+Δ}` really places `A` on the left site.

use nalgebra as na;
use num_complex::Complex64 as C64;
use thiserror::Error;
use crate::channel::{ Channel, ChannelError };
use crate::expfit::{ self, FitError };
use crate::site::OpSym;

#[derive(Debug, Error)]
pub enum FsmError {
    /// Returned when a channel fails parameter validation.
    #[error("invalid channel: {0}")]
    Channel(#[from] ChannelError),

    /// Returned when a power-law channel's exponential fit fails.
    #[error("power-law fit failed: {0}")]
    Fit(#[from] FitError),
}
pub type FsmResult<T> = Result<T, FsmError>;

// placeholder label for the final idle state during construction
const FINAL: usize = usize::MAX;

/// One weighted transition of the machine.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FsmEdge {
    /// Source state; the left bond value of the operator block.
    pub from: usize,
    /// Target state; the right bond value of the operator block.
    pub to: usize,
    /// Operator symbol applied at the transition site.
    pub op: OpSym,
    /// Transition weight.
    pub weight: C64,
}

/// A compiled transition graph.
///
/// The MPO assembled from the graph has bond dimension equal to
/// [`nstates`][Self::nstates].
#[derive(Clone, Debug, PartialEq)]
pub struct FsmGraph {
    /// Total number of states, χ.
    pub nstates: usize,
    /// All transitions, with parallel `(from, to, op)` duplicates merged.
    pub edges: Vec<FsmEdge>,
}

impl FsmGraph {
    /// Index of the initial idle state.
    pub fn initial(&self) -> usize { 0 }

    /// Index of the final idle state.
    pub fn final_state(&self) -> usize { self.nstates - 1 }

    /// Rebuild a graph from a serialized edge list.
    ///
    /// Merges parallel edges exactly like [`build_fsm`]; building a graph
    /// from its own edge list is a no-op.
    pub fn from_edges(nstates: usize, edges: Vec<FsmEdge>) -> Self {
        Self { nstates, edges: merge_parallel(edges) }
    }

    /// Check the idle-state invariant: identity self-loops with unit weight
    /// on exactly the initial and final states.
    pub fn idle_loops_ok(&self) -> bool {
        let unit = C64::from(1.0);
        let idle: Vec<&FsmEdge> =
            self.edges.iter()
            .filter(|e| e.from == e.to && e.op == OpSym::Id)
            .collect();
        idle.iter()
            .filter(|e| e.weight == unit)
            .map(|e| e.from)
            .collect::<std::collections::HashSet<usize>>()
            .is_superset(&[self.initial(), self.final_state()].into())
    }
}

// merge edges with identical (from, to, op) by adding weights
fn merge_parallel(edges: Vec<FsmEdge>) -> Vec<FsmEdge> {
    let mut merged: Vec<FsmEdge> = Vec::with_capacity(edges.len());
    for e in edges.into_iter() {
        match merged.iter_mut()
            .find(|m| m.from == e.from && m.to == e.to && m.op == e.op)
        {
            Some(m) => { m.weight += e.weight; },
            None => { merged.push(e); },
        }
    }
    merged
}

struct Builder {
    // number of states allocated so far, counting the initial idle state
    // but not the final placeholder
    ns: usize,
    edges: Vec<FsmEdge>,
    // fit range for power-law channels
    n_sites: usize,
    max_rel_err: f64,
}

impl Builder {
    fn new(n_sites: usize, max_rel_err: f64) -> Self {
        let edges = vec![
            FsmEdge {
                from: 0, to: 0, op: OpSym::Id, weight: C64::from(1.0) },
            FsmEdge {
                from: FINAL, to: FINAL, op: OpSym::Id, weight: C64::from(1.0) },
        ];
        Self { ns: 1, edges, n_sites, max_rel_err }
    }

    fn push(&mut self, from: usize, to: usize, op: OpSym, weight: C64) {
        self.edges.push(FsmEdge { from, to, op, weight });
    }

    // lower one exponential branch: right op B enters an auxiliary state,
    // which idles with weight λ until the left op A leaves for FINAL
    fn exp_branch(&mut self, op_a: OpSym, op_b: OpSym, amp: C64, lambda: C64) {
        let aux = self.ns;
        self.ns += 1;
        self.push(aux, 0, op_b, C64::from(1.0));
        self.push(aux, aux, OpSym::Id, lambda);
        self.push(FINAL, aux, op_a, amp * lambda);
    }

    fn lower(&mut self, channel: &Channel) -> FsmResult<()> {
        channel.validate()?;
        match channel {
            Channel::Field { op, weight } => {
                self.push(FINAL, 0, *op, C64::from(*weight));
            },
            Channel::BosonField { op, weight } => {
                self.push(FINAL, 0, *op, C64::from(*weight));
            },
            Channel::FiniteRange { op_a, op_b, delta, weight } => {
                // B at the right end of the ladder, A at the left, with
                // Δ − 1 identity rungs in between
                let base = self.ns;
                self.ns += delta;
                self.push(base, 0, *op_b, C64::from(1.0));
                for k in 1..*delta {
                    self.push(base + k, base + k - 1, OpSym::Id, C64::from(1.0));
                }
                self.push(FINAL, base + delta - 1, *op_a, C64::from(*weight));
            },
            Channel::ExpDecay { op_a, op_b, amp, lambda } => {
                self.exp_branch(
                    *op_a, *op_b, C64::from(*amp), C64::from(*lambda));
            },
            Channel::PowerLaw { op_a, op_b, coupling, alpha, order } => {
                // the pencil needs at least 2K samples; on short chains,
                // fitting past the last distance only tightens the fit
                let range = self.n_sites.max(2 * *order);
                let fit = expfit::fit_power_law(
                    *alpha, range, *order, self.max_rel_err)?;
                for (l, v) in fit.rates.iter().zip(&fit.amps) {
                    self.exp_branch(*op_a, *op_b, *coupling * v, *l);
                }
            },
            Channel::SpinBoson { spin, boson_op, weight } => {
                // lower the spin factor, then reroute its final-going edges
                // through a fresh state that idles until the boson site
                let mark = self.edges.len();
                for sub in spin.iter() { self.lower(sub)?; }
                let gate = self.ns;
                self.ns += 1;
                self.edges[mark..].iter_mut()
                    .filter(|e| e.from == FINAL)
                    .for_each(|e| { e.from = gate; });
                self.push(gate, gate, OpSym::Id, C64::from(1.0));
                self.push(FINAL, gate, *boson_op, C64::from(*weight));
            },
        }
        Ok(())
    }

    fn finish(self) -> FsmGraph {
        let Self { ns, mut edges, .. } = self;
        // relabel the placeholder now that the state count is known
        edges.iter_mut()
            .for_each(|e| {
                if e.from == FINAL { e.from = ns; }
                if e.to == FINAL { e.to = ns; }
            });
        FsmGraph { nstates: ns + 1, edges: merge_parallel(edges) }
    }
}

/// Compile a channel list into a transition graph.
///
/// `n_sites` is the chain length; power-law channels are fitted over
/// distances 1 ‥ `n_sites` with the given relative-error bound (see
/// [`expfit::DEFAULT_MAX_REL_ERR`]).
///
/// Fails on the first invalid channel parameter or failed fit; no partial
/// graph is returned.
pub fn build_fsm(channels: &[Channel], n_sites: usize, max_rel_err: f64)
    -> FsmResult<FsmGraph>
{
    let mut builder = Builder::new(n_sites, max_rel_err);
    for channel in channels.iter() { builder.lower(channel)?; }
    Ok(builder.finish())
}

/// Evaluate the full matrix of a compiled graph term-by-term on a product
/// basis, for testing against explicit constructions.
///
/// This contracts the graph the same way the MPO assembler does, but into a
/// dense Σ-of-Kronecker-products matrix; exponential cost in the chain
/// length, so only suitable for very small chains.
pub fn dense_hamiltonian(
    graph: &FsmGraph,
    chain: &[crate::site::Site],
    tables: &crate::site::SiteTables,
) -> na::DMatrix<C64> {
    let n = chain.len();
    let total: usize = chain.iter().map(|s| s.dim()).product();
    let mut h: na::DMatrix<C64> = na::DMatrix::zeros(total, total);
    // paths are walked right to left, starting from the initial state
    let mut stack: Vec<(usize, usize, na::DMatrix<C64>)> =
        vec![(n, 0, na::DMatrix::identity(1, 1))];
    while let Some((depth, state, acc)) = stack.pop() {
        if depth == 0 {
            if state == graph.final_state() { h += &acc; }
            continue;
        }
        let site = chain[depth - 1];
        for e in graph.edges.iter().filter(|e| e.to == state) {
            if !site.has_op(e.op) { continue; }
            let Ok(op) = tables.operator(site, e.op) else { continue; };
            stack.push((depth - 1, e.from, (op * e.weight).kronecker(&acc)));
        }
    }
    h
}
