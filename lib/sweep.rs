//! Two-site DMRG and two-site TDVP sweeps over a shared bond-walking
//! engine.
//!
//! A sweep visits the bonds of the chain in strictly ascending order
//! (right sweep) or strictly descending order (left sweep), holding a
//! single invariant at every step: the canonical center sits at one end of
//! the active bond, environment slots at cuts up to the center are left
//! environments, and slots past it are right environments. Each bond step
//! then has the same shape regardless of algorithm:
//!
//! 1. contract the two active site tensors into a patch;
//! 2. run the local update: a Lanczos ground-state solve for DMRG, a
//!    Krylov exponential step for TDVP;
//! 3. split the patch with a truncated Schmidt decomposition, absorbing
//!    the singular values in the direction of motion;
//! 4. refresh the environment slot the walk just crossed and advance the
//!    center.
//!
//! TDVP additionally applies the projector-splitting back-step: after each
//! bond's forward half-step the freshly formed center site is evolved
//! *backward* by the same half-step with the one-site operator, except at
//! the final bond of a sweep. A right sweep followed by a left sweep then
//! advances physical time (or inverse temperature) by `dt`, and the engine
//! repeats such pairs.
//!
//! The engine is a sequential state machine: no update overlaps another,
//! and every bond commits (tensors, center, environments) before the next
//! begins. Cooperative stopping is honored at bond granularity through a
//! shared flag, and per-pair through the caller's report callback. Solver
//! trouble (hitting the iteration cap, a Krylov breakdown) is never fatal:
//! the best-effort vector is used and the worst status of the pair is
//! surfaced in the report.

use std::sync::Arc;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::time::Instant;
use nalgebra as na;
use num_traits::{ Float, Zero };
use thiserror::Error;
use crate::{ ComplexScalar, ScalarKind };
use crate::env::{ EnvError, Environments };
use crate::heff::{ OneSiteHeff, TwoSiteHeff };
use crate::mpo::Mpo;
use crate::mps::{ Mps, MpsError, SiteTensor, TruncPolicy };
use crate::solver::{ self, SolverStatus };

#[derive(Debug, Error)]
pub enum SweepError {
    /// Returned when the state and operator have different chain lengths.
    #[error("error in sweep setup: MPS and MPO lengths disagree")]
    LengthMismatch,

    /// Returned for chains too short to host a two-site update.
    #[error("error in sweep setup: two-site sweeps need at least 2 sites")]
    ChainTooShort,

    /// Returned when real-time evolution is requested over a real scalar
    /// kind.
    #[error("error in sweep setup: real-time evolution requires a complex \
        scalar kind")]
    KindMismatch,

    /// Returned when the environment cache cannot be built.
    #[error("{0}")]
    Env(#[from] EnvError),

    /// Returned when a state operation fails.
    #[error("{0}")]
    Mps(#[from] MpsError),
}
use SweepError::*;
pub type SweepResult<T> = Result<T, SweepError>;

/// Direction of time evolution.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EvolKind {
    /// Unitary evolution `exp(−i H t)`.
    Real,
    /// Imaginary-time evolution `exp(−H β)`, e.g. for quasi-ground-state
    /// cooling.
    Imaginary,
}

/// Options for the two-site DMRG ground-state search.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DmrgOptions<R> {
    /// Bond-dimension ceiling applied at every split.
    pub max_dim: Option<usize>,
    /// Relative singular-value cutoff applied at every split.
    pub cutoff: R,
    /// Krylov dimension of the local Lanczos solves.
    pub krylov_dim: usize,
    /// Restart cap for the local Lanczos solves.
    pub max_iter: usize,
    /// Number of (right, left) sweep pairs to run.
    pub n_sweeps: usize,
}

impl<R> Default for DmrgOptions<R>
where R: Float
{
    fn default() -> Self {
        Self {
            max_dim: None,
            cutoff: R::epsilon(),
            krylov_dim: 16,
            max_iter: 4,
            n_sweeps: 10,
        }
    }
}

/// Options for two-site TDVP time evolution.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct TdvpOptions<R> {
    /// Time step advanced by each (right, left) sweep pair.
    pub dt: R,
    /// Bond-dimension ceiling applied at every split.
    pub max_dim: Option<usize>,
    /// Relative singular-value cutoff applied at every split.
    pub cutoff: R,
    /// Krylov dimension of the local exponential solves.
    pub krylov_dim: usize,
    /// Tolerance on the local exponential's error estimator; 0 runs every
    /// solve to the full Krylov dimension.
    pub tol: R,
    /// Real- or imaginary-time evolution.
    pub kind: EvolKind,
    /// Number of (right, left) sweep pairs to run.
    pub n_sweeps: usize,
}

/// Per-pair telemetry handed to the run callback.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SweepReport<R> {
    /// Index of the completed (right, left) pair, starting at 0.
    pub sweep: usize,
    /// Energy reported by the final bond update of the pair (DMRG only).
    pub energy: Option<R>,
    /// Total time (real evolution) or inverse temperature (imaginary)
    /// reached (TDVP only; 0 for DMRG).
    pub time: R,
    /// Maximum bond dimension of the state after the pair.
    pub max_bond_dim: usize,
    /// Largest squared-norm weight discarded by a single split in the
    /// pair.
    pub max_discarded: R,
    /// Number of splits in the pair that discarded more than 1e−2 of the
    /// squared norm.
    pub degraded_bonds: usize,
    /// Worst local-solver status seen in the pair.
    pub solver_status: SolverStatus,
    /// Wall-clock time spent on the pair.
    pub elapsed: std::time::Duration,
}

/// Caller's verdict after a report.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SweepControl {
    /// Keep sweeping.
    Continue,
    /// Stop after this pair; the state is committed and canonical.
    Stop,
}

/// Outcome of a full run.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RunOutcome<R> {
    /// Last reported energy (DMRG); `None` for TDVP runs.
    pub energy: Option<R>,
    /// Total evolved time (TDVP); 0 for DMRG runs.
    pub time: R,
    /// Number of completed sweep pairs.
    pub sweeps_run: usize,
    /// Worst solver status over the whole run.
    pub solver_status: SolverStatus,
}

// squared-norm weight above which a single truncation counts as degraded
const DEGRADED_TOL: f64 = 1e-2;

// per-pair running statistics
struct PairStats<R> {
    energy: Option<R>,
    max_discarded: R,
    degraded_bonds: usize,
    status: SolverStatus,
}

impl<R> PairStats<R>
where R: Float
{
    fn new() -> Self {
        Self {
            energy: None,
            max_discarded: R::zero(),
            degraded_bonds: 0,
            status: SolverStatus::Converged,
        }
    }

    fn record_split(&mut self, discarded: R) {
        if discarded > self.max_discarded { self.max_discarded = discarded; }
        if discarded > R::from(DEGRADED_TOL).unwrap_or_else(R::zero) {
            self.degraded_bonds += 1;
        }
    }
}

/// The sweep engine: exclusive owner of the environment cache for one
/// `(Mps, Mpo)` pair.
pub struct SweepEngine<'a, A>
where A: ComplexScalar
{
    mps: &'a mut Mps<A>,
    mpo: &'a Mpo<A>,
    envs: Environments<A>,
    stop: Option<Arc<AtomicBool>>,
}

impl<'a, A> SweepEngine<'a, A>
where A: ComplexScalar
{
    /// Prepare a state for sweeping: canonicalize at the first site and
    /// build the environment cache.
    pub fn new(mps: &'a mut Mps<A>, mpo: &'a Mpo<A>) -> SweepResult<Self> {
        if mps.len() != mpo.len() { return Err(LengthMismatch); }
        if mps.len() < 2 { return Err(ChainTooShort); }
        mps.canonicalize(0)?;
        let envs = Environments::build(mps, mpo, 0)?;
        Ok(Self { mps, mpo, envs, stop: None })
    }

    /// Install a shared stop flag, checked after every bond update.
    ///
    /// When the flag reads `true` the in-flight bond commits, the sweep
    /// returns at the next check, and the state is left canonical at the
    /// boundary it reached.
    pub fn set_stop_flag(&mut self, flag: Arc<AtomicBool>) {
        self.stop = Some(flag);
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref()
            .map(|f| f.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Current ⟨ψ|H|ψ⟩ of the engine's state.
    pub fn energy(&self) -> A {
        let Ok(e) = crate::env::expectation(self.mps, self.mpo) else {
            unreachable!()
        };
        e
    }

    // one DMRG bond update; center moves across bond `i` in the direction
    // of `toward_right`
    fn dmrg_bond(
        &mut self,
        i: usize,
        toward_right: bool,
        opts: &DmrgOptions<A::Re>,
        stats: &mut PairStats<A::Re>,
    ) -> SweepResult<()> {
        let block = self.mps.two_site_block(i)?;
        let (rows, cols) = block.shape();
        let heff = TwoSiteHeff::new(
            self.envs.slot(i),
            self.envs.slot(i + 2),
            self.mpo.tensor(i),
            self.mpo.tensor(i + 1),
        );
        let v0 = block.reshape_generic(na::Dyn(rows * cols), na::Const::<1>);
        let res =
            solver::lanczos_ground(&heff, &v0, opts.krylov_dim, opts.max_iter);
        stats.status = stats.status.worst(res.status);
        stats.energy = Some(res.value);
        let updated =
            res.vector.reshape_generic(na::Dyn(rows), na::Dyn(cols));
        let discarded =
            self.mps.split_two_site_block(i, updated, toward_right)?;
        stats.record_split(discarded);
        if toward_right {
            self.envs.refresh_left(i + 1, self.mps, self.mpo);
        } else {
            self.envs.refresh_right(i + 1, self.mps, self.mpo);
        }
        Ok(())
    }

    // one TDVP bond update: forward half-step on the two-site patch, then
    // the backward half-step on the newly formed center unless this is the
    // sweep's final bond
    fn tdvp_bond(
        &mut self,
        i: usize,
        toward_right: bool,
        last_of_sweep: bool,
        tau_half: A,
        opts: &TdvpOptions<A::Re>,
        stats: &mut PairStats<A::Re>,
    ) -> SweepResult<()> {
        let block = self.mps.two_site_block(i)?;
        let (rows, cols) = block.shape();
        let heff = TwoSiteHeff::new(
            self.envs.slot(i),
            self.envs.slot(i + 2),
            self.mpo.tensor(i),
            self.mpo.tensor(i + 1),
        );
        let v0 = block.reshape_generic(na::Dyn(rows * cols), na::Const::<1>);
        let res =
            solver::krylov_expv(&heff, &v0, tau_half, opts.krylov_dim, opts.tol);
        stats.status = stats.status.worst(res.status);
        let evolved =
            res.vector.reshape_generic(na::Dyn(rows), na::Dyn(cols));
        let discarded =
            self.mps.split_two_site_block(i, evolved, toward_right)?;
        stats.record_split(discarded);
        if toward_right {
            self.envs.refresh_left(i + 1, self.mps, self.mpo);
        } else {
            self.envs.refresh_right(i + 1, self.mps, self.mpo);
        }
        if last_of_sweep { return Ok(()); }

        // backward half-step on the center site, correcting the tangent
        // space projection before the next bond's forward step
        let c = if toward_right { i + 1 } else { i };
        let phi = self.mps.tensor_mut(c).make_lfused().clone();
        let (prows, pcols) = phi.shape();
        let d = self.mps.chain()[c].dim();
        let heff1 = OneSiteHeff::new(
            self.envs.slot(c),
            self.envs.slot(c + 1),
            self.mpo.tensor(c),
        );
        let v1 =
            phi.reshape_generic(na::Dyn(prows * pcols), na::Const::<1>);
        let back = solver::krylov_expv(
            &heff1, &v1, -tau_half, opts.krylov_dim, opts.tol);
        stats.status = stats.status.worst(back.status);
        let evolved =
            back.vector.reshape_generic(na::Dyn(prows), na::Dyn(pcols));
        *self.mps.tensor_mut(c) = SiteTensor::from_lfused(d, evolved);
        // imaginary-time steps drift the norm; keep the state normalized
        self.mps.tensor_mut(c).normalize();
        Ok(())
    }

    /// Run two-site DMRG sweep pairs.
    ///
    /// The callback receives a [`SweepReport`] after every (right, left)
    /// pair and may stop the run; the reported energy is the Ritz value of
    /// the pair's final bond update.
    pub fn run_dmrg<F>(
        &mut self,
        opts: &DmrgOptions<A::Re>,
        mut callback: F,
    ) -> SweepResult<RunOutcome<A::Re>>
    where F: FnMut(&SweepReport<A::Re>) -> SweepControl
    {
        self.mps.set_policy(TruncPolicy {
            max_dim: opts.max_dim,
            cutoff: opts.cutoff,
        });
        let n = self.mps.len();
        let mut outcome = RunOutcome {
            energy: None,
            time: A::Re::zero(),
            sweeps_run: 0,
            solver_status: SolverStatus::Converged,
        };
        'pairs: for sweep in 0..opts.n_sweeps {
            let started = Instant::now();
            let mut stats = PairStats::new();
            let mut stopped = false;
            for i in 0 .. n - 1 {
                self.dmrg_bond(i, true, opts, &mut stats)?;
                if self.stop_requested() { stopped = true; break; }
            }
            if !stopped {
                for i in (0 .. n - 1).rev() {
                    self.dmrg_bond(i, false, opts, &mut stats)?;
                    if self.stop_requested() { stopped = true; break; }
                }
            }
            outcome.energy = stats.energy;
            outcome.sweeps_run = sweep + 1;
            outcome.solver_status =
                outcome.solver_status.worst(stats.status);
            if stopped { break 'pairs; }
            let report = SweepReport {
                sweep,
                energy: stats.energy,
                time: A::Re::zero(),
                max_bond_dim: self.mps.max_bond_dim(),
                max_discarded: stats.max_discarded,
                degraded_bonds: stats.degraded_bonds,
                solver_status: stats.status,
                elapsed: started.elapsed(),
            };
            if callback(&report) == SweepControl::Stop { break 'pairs; }
        }
        Ok(outcome)
    }

    /// Run two-site TDVP sweep pairs, each advancing time (or inverse
    /// temperature) by `opts.dt`.
    ///
    /// Fails upfront if real-time evolution is requested over a real
    /// scalar kind.
    pub fn run_tdvp<F>(
        &mut self,
        opts: &TdvpOptions<A::Re>,
        mut callback: F,
    ) -> SweepResult<RunOutcome<A::Re>>
    where F: FnMut(&SweepReport<A::Re>) -> SweepControl
    {
        if opts.kind == EvolKind::Real && A::KIND == ScalarKind::Real {
            return Err(KindMismatch);
        }
        self.mps.set_policy(TruncPolicy {
            max_dim: opts.max_dim,
            cutoff: opts.cutoff,
        });
        let n = self.mps.len();
        let half = opts.dt / A::re_from_f64(2.0);
        let tau_half =
            match opts.kind {
                EvolKind::Real =>
                    A::from_components(A::Re::zero(), -half),
                EvolKind::Imaginary => A::from_re(-half),
            };
        let mut outcome = RunOutcome {
            energy: None,
            time: A::Re::zero(),
            sweeps_run: 0,
            solver_status: SolverStatus::Converged,
        };
        'pairs: for sweep in 0..opts.n_sweeps {
            let started = Instant::now();
            let mut stats = PairStats::new();
            let mut stopped = false;
            for i in 0 .. n - 1 {
                let last = i == n - 2;
                self.tdvp_bond(i, true, last, tau_half, opts, &mut stats)?;
                if self.stop_requested() { stopped = true; break; }
            }
            if !stopped {
                for i in (0 .. n - 1).rev() {
                    let last = i == 0;
                    self.tdvp_bond(i, false, last, tau_half, opts, &mut stats)?;
                    if self.stop_requested() { stopped = true; break; }
                }
            }
            outcome.sweeps_run = sweep + 1;
            outcome.solver_status =
                outcome.solver_status.worst(stats.status);
            if stopped { break 'pairs; }
            outcome.time = outcome.time + opts.dt;
            let report = SweepReport {
                sweep,
                energy: None,
                time: outcome.time,
                max_bond_dim: self.mps.max_bond_dim(),
                max_discarded: stats.max_discarded,
                degraded_bonds: stats.degraded_bonds,
                solver_status: stats.status,
                elapsed: started.elapsed(),
            };
            if callback(&report) == SweepControl::Stop { break 'pairs; }
        }
        Ok(outcome)
    }
}
