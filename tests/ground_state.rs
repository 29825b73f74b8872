//! Ground-state searches checked against exact diagonalization.
//!
//! Chains are kept small enough that the dense Hamiltonian fits in memory,
//! so every energy here has an exactly known reference.

use nalgebra as na;
use num_complex::Complex64 as C64;
use rand::SeedableRng;
use mps_chain::channel::Channel;
use mps_chain::mpo::{ build_hamiltonian, Mpo };
use mps_chain::mps::{ Mps, TruncPolicy };
use mps_chain::site::{ OpSym, Site, SiteTables };
use mps_chain::sweep::{ DmrgOptions, SweepControl, SweepEngine };
use mps_chain::ComplexScalar;

fn exact_ground(mpo: &Mpo<C64>) -> f64 {
    let eig = na::SymmetricEigen::new(mpo.to_dense());
    eig.eigenvalues.iter().copied().fold(f64::MAX, f64::min)
}

fn run_dmrg<A>(
    chain: &[Site],
    mpo: &Mpo<A>,
    chi0: usize,
    opts: &DmrgOptions<A::Re>,
    seed: u64,
) -> (f64, usize)
where
    A: ComplexScalar,
    rand::distributions::Standard: rand::distributions::Distribution<A::Re>,
    A::Re: Into<f64>,
{
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut mps: Mps<A> = Mps::random(
        chain, chi0, TruncPolicy::default(), &mut rng).unwrap();
    let mut engine = SweepEngine::new(&mut mps, mpo).unwrap();
    let outcome = engine.run_dmrg(opts, |_| SweepControl::Continue).unwrap();
    (outcome.energy.unwrap().into(), mps.max_bond_dim())
}

#[test]
fn transverse_field_ising_ground_state() {
    let n = 8;
    let chain = vec![Site::spin_half(); n];
    let tables = SiteTables::for_chain(&chain);
    let channels = vec![
        Channel::FiniteRange {
            op_a: OpSym::Z, op_b: OpSym::Z, delta: 1, weight: -1.0 },
        Channel::Field { op: OpSym::X, weight: 0.5 },
    ];
    let mpo: Mpo<C64> = build_hamiltonian(&channels, &chain, &tables).unwrap();
    let exact = exact_ground(&mpo);
    let opts = DmrgOptions {
        max_dim: Some(64),
        cutoff: 1e-13,
        krylov_dim: 14,
        max_iter: 4,
        n_sweeps: 16,
    };
    let (energy, max_chi) = run_dmrg(&chain, &mpo, 5, &opts, 0xf1);
    assert!(
        (energy - exact).abs() < 1e-8,
        "TFIM: dmrg {energy} vs exact {exact}",
    );
    // the half-chain rank bound for 8 spins
    assert!(max_chi <= 16, "bond dimension blew up to {max_chi}");
}

#[test]
fn heisenberg_ground_state() {
    let n = 8;
    let chain = vec![Site::spin_half(); n];
    let tables = SiteTables::for_chain(&chain);
    let channels = vec![
        Channel::FiniteRange {
            op_a: OpSym::X, op_b: OpSym::X, delta: 1, weight: 1.0 },
        Channel::FiniteRange {
            op_a: OpSym::Y, op_b: OpSym::Y, delta: 1, weight: 1.0 },
        Channel::FiniteRange {
            op_a: OpSym::Z, op_b: OpSym::Z, delta: 1, weight: 1.0 },
    ];
    let mpo: Mpo<C64> = build_hamiltonian(&channels, &chain, &tables).unwrap();
    let exact = exact_ground(&mpo);
    let opts = DmrgOptions {
        max_dim: Some(128),
        cutoff: 1e-13,
        krylov_dim: 16,
        max_iter: 6,
        n_sweeps: 24,
    };
    let (energy, _) = run_dmrg(&chain, &mpo, 5, &opts, 0xbeef);
    assert!(
        (energy - exact).abs() < 1e-8,
        "Heisenberg: dmrg {energy} vs exact {exact}",
    );
}

#[test]
fn heisenberg_ladder_form_is_real_and_equivalent() {
    // (XX + YY) rewritten through the ladder operators compiles to a real
    // MPO with the same dense form, and the f64 engine reaches the same
    // ground energy
    let n = 8;
    let chain = vec![Site::spin_half(); n];
    let tables = SiteTables::for_chain(&chain);
    let xyz = vec![
        Channel::FiniteRange {
            op_a: OpSym::X, op_b: OpSym::X, delta: 1, weight: 1.0 },
        Channel::FiniteRange {
            op_a: OpSym::Y, op_b: OpSym::Y, delta: 1, weight: 1.0 },
        Channel::FiniteRange {
            op_a: OpSym::Z, op_b: OpSym::Z, delta: 1, weight: 1.0 },
    ];
    let ladder = vec![
        Channel::FiniteRange {
            op_a: OpSym::Sp, op_b: OpSym::Sm, delta: 1, weight: 0.5 },
        Channel::FiniteRange {
            op_a: OpSym::Sm, op_b: OpSym::Sp, delta: 1, weight: 0.5 },
        Channel::FiniteRange {
            op_a: OpSym::Z, op_b: OpSym::Z, delta: 1, weight: 1.0 },
    ];
    let mpo_xyz: Mpo<C64> = build_hamiltonian(&xyz, &chain, &tables).unwrap();
    let mpo_ladder: Mpo<f64> =
        build_hamiltonian(&ladder, &chain, &tables).unwrap();
    let dense_ladder = mpo_ladder.to_dense().map(C64::from);
    assert!((mpo_xyz.to_dense() - dense_ladder).norm() < 1e-12);

    let exact = exact_ground(&mpo_xyz);
    let opts = DmrgOptions {
        max_dim: Some(64),
        cutoff: 1e-13,
        krylov_dim: 16,
        max_iter: 6,
        n_sweeps: 24,
    };
    let (energy, _) = run_dmrg(&chain, &mpo_ladder, 5, &opts, 0x11);
    assert!(
        (energy - exact).abs() < 1e-8,
        "ladder Heisenberg: dmrg {energy} vs exact {exact}",
    );
}

#[test]
fn long_range_ising_bond_dimension_and_energy() {
    let order = 10;
    let channels = vec![
        Channel::PowerLaw {
            op_a: OpSym::Z,
            op_b: OpSym::Z,
            coupling: -1.0,
            alpha: 1.5,
            order,
        },
        Channel::Field { op: OpSym::X, weight: 0.5 },
    ];

    // at full length the compiled MPO's bond dimension is exactly K + 2
    let chain = vec![Site::spin_half(); 30];
    let tables = SiteTables::for_chain(&chain);
    let mpo: Mpo<C64> = build_hamiltonian(&channels, &chain, &tables).unwrap();
    assert_eq!(mpo.max_bond_dim(), order + 2);

    // on a reduced chain the ground energy of the compiled operator is
    // checked against its own exact diagonalization
    let chain = vec![Site::spin_half(); 10];
    let mpo: Mpo<C64> = build_hamiltonian(&channels, &chain, &tables).unwrap();
    assert_eq!(mpo.max_bond_dim(), order + 2);
    let exact = exact_ground(&mpo);
    let opts = DmrgOptions {
        max_dim: Some(64),
        cutoff: 1e-13,
        krylov_dim: 14,
        max_iter: 4,
        n_sweeps: 20,
    };
    let (energy, _) = run_dmrg(&chain, &mpo, 5, &opts, 0x1dea);
    assert!(
        (energy - exact).abs() < 1e-8,
        "long-range Ising: dmrg {energy} vs exact {exact}",
    );
}

#[test]
fn exp_decay_channel_matches_explicit_sum() {
    // amp Σ_{i<j} λ^{j−i} Z_i Z_j built explicitly vs the compiled MPO
    let n = 6;
    let (amp, lambda) = (0.7, 0.55);
    let chain = vec![Site::spin_half(); n];
    let tables = SiteTables::for_chain(&chain);
    let channels = vec![
        Channel::ExpDecay {
            op_a: OpSym::Z, op_b: OpSym::Z, amp, lambda },
    ];
    let mpo: Mpo<C64> = build_hamiltonian(&channels, &chain, &tables).unwrap();
    let dense = mpo.to_dense();

    let z = tables.operator(chain[0], OpSym::Z).unwrap();
    let id = tables.operator(chain[0], OpSym::Id).unwrap();
    let dim = 1 << n;
    let mut expected: na::DMatrix<C64> = na::DMatrix::zeros(dim, dim);
    for i in 0..n {
        for j in i + 1 .. n {
            let mut term: na::DMatrix<C64> = na::DMatrix::identity(1, 1);
            for k in 0..n {
                let factor = if k == i || k == j { z } else { id };
                term = term.kronecker(factor);
            }
            expected += term
                * C64::from(amp * lambda.powi((j - i) as i32));
        }
    }
    assert!((dense - expected).norm() < 1e-12);
}
