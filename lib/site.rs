//! Local Hilbert spaces and their operator tables.
//!
//! A chain is an ordered sequence of [`Site`]s, each carrying a finite local
//! Hilbert space: either a spin of arbitrary magnitude *S* (dimension
//! 2*S* + 1) or a bosonic mode truncated at occupation *n*<sub>max</sub>
//! (dimension *n*<sub>max</sub> + 1). Chains may mix the two; site order is
//! significant and shared by every MPS/MPO built over the chain.
//!
//! Operators on a site are referred to symbolically through [`OpSym`] and
//! resolved to dense matrices by a [`SiteTables`] value. The tables also
//! hold the Hermitian eigendecompositions of the spin operators along each
//! axis (eigenvalues ascending, ties broken by original index), which back
//! product-state construction and measurement-basis queries. Tables are
//! computed once per *distinct* site value, so long homogeneous chains
//! share a single set.
//!
//! `SiteTables` is an ordinary value, owned by whoever builds it; there is
//! no process-wide operator cache.

use std::collections::HashMap;
use nalgebra as na;
use num_complex::Complex64 as C64;
use thiserror::Error;
use crate::ScalarKind;

#[derive(Debug, Error)]
pub enum SiteError {
    /// Returned when constructing a site whose local dimension would be less
    /// than 2.
    #[error("unphysical site: local dimension must be at least 2")]
    UnphysicalSite,

    /// Returned when resolving an operator symbol on a site kind that does
    /// not carry it.
    #[error("operator {0} is not defined on site {1}")]
    UnsupportedOp(OpSym, Site),

    /// Returned when requesting an eigenbasis from a site kind that does not
    /// carry one for the given axis.
    #[error("no {0} eigenbasis on site {1}")]
    UnsupportedAxis(SpinAxis, Site),

    /// Returned when querying tables for a site they were not built over.
    #[error("site {0} is not covered by these tables")]
    UnknownSite(Site),
}
use SiteError::*;
pub type SiteResult<T> = Result<T, SiteError>;

/// A single site in a chain.
///
/// The two variants fix both the local dimension and the set of operator
/// symbols the site resolves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Site {
    /// A spin of magnitude *S* = `twos` / 2, with local dimension
    /// `twos + 1`. Carries {`Id`, `X`, `Y`, `Z`, `Sp`, `Sm`}.
    Spin {
        /// Twice the spin magnitude, 2*S* ≥ 1.
        twos: u32,
    },
    /// A bosonic mode truncated at occupation `nmax`, with local dimension
    /// `nmax + 1`. Carries {`Id`, `B`, `Bdag`, `Nb`}.
    Boson {
        /// Maximum occupation number, ≥ 1.
        nmax: u32,
    },
}

impl Site {
    /// A spin-1/2 site.
    pub fn spin_half() -> Self { Self::Spin { twos: 1 } }

    /// A spin site of magnitude *S* = `twos` / 2.
    ///
    /// Fails if `twos == 0`.
    pub fn spin(twos: u32) -> SiteResult<Self> {
        if twos == 0 { return Err(UnphysicalSite); }
        Ok(Self::Spin { twos })
    }

    /// A bosonic site truncated at occupation `nmax`.
    ///
    /// Fails if `nmax == 0`.
    pub fn boson(nmax: u32) -> SiteResult<Self> {
        if nmax == 0 { return Err(UnphysicalSite); }
        Ok(Self::Boson { nmax })
    }

    /// Return the local Hilbert-space dimension.
    pub fn dim(&self) -> usize {
        match self {
            Self::Spin { twos } => *twos as usize + 1,
            Self::Boson { nmax } => *nmax as usize + 1,
        }
    }

    /// Return `true` if `self` is a spin site.
    pub fn is_spin(&self) -> bool { matches!(self, Self::Spin { .. }) }

    /// Return `true` if `self` is a boson site.
    pub fn is_boson(&self) -> bool { matches!(self, Self::Boson { .. }) }

    /// Return the scalar kind of the site's operator table.
    ///
    /// Spin sites are complex (`Y` is imaginary-valued); boson sites are
    /// real.
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Spin { .. } => ScalarKind::Complex,
            Self::Boson { .. } => ScalarKind::Real,
        }
    }

    /// Return `true` if the site resolves the given operator symbol.
    pub fn has_op(&self, sym: OpSym) -> bool {
        match (self, sym) {
            (_, OpSym::Id) => true,
            (Self::Spin { .. }, OpSym::X | OpSym::Y | OpSym::Z) => true,
            (Self::Spin { .. }, OpSym::Sp | OpSym::Sm) => true,
            (Self::Boson { .. }, OpSym::B | OpSym::Bdag | OpSym::Nb) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spin { twos } => write!(f, "Spin({}/2)", twos),
            Self::Boson { nmax } => write!(f, "Boson({})", nmax),
        }
    }
}

/// Symbolic name for a local operator, resolved per-site by [`SiteTables`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum OpSym {
    /// Identity; defined on every site kind.
    Id,
    /// Spin *x*-component.
    X,
    /// Spin *y*-component.
    Y,
    /// Spin *z*-component.
    Z,
    /// Spin raising operator.
    Sp,
    /// Spin lowering operator.
    Sm,
    /// Boson annihilation operator.
    B,
    /// Boson creation operator.
    Bdag,
    /// Boson number operator.
    Nb,
}

impl OpSym {
    /// Return the scalar kind of the operator's matrix elements.
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Y => ScalarKind::Complex,
            _ => ScalarKind::Real,
        }
    }
}

impl std::fmt::Display for OpSym {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s =
            match self {
                Self::Id => "I",
                Self::X => "Sx",
                Self::Y => "Sy",
                Self::Z => "Sz",
                Self::Sp => "S+",
                Self::Sm => "S-",
                Self::B => "b",
                Self::Bdag => "b†",
                Self::Nb => "n",
            };
        write!(f, "{}", s)
    }
}

/// A spin measurement axis.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SpinAxis {
    X,
    Y,
    Z,
}

impl SpinAxis {
    fn op(&self) -> OpSym {
        match self {
            Self::X => OpSym::X,
            Self::Y => OpSym::Y,
            Self::Z => OpSym::Z,
        }
    }
}

impl std::fmt::Display for SpinAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X => write!(f, "X"),
            Self::Y => write!(f, "Y"),
            Self::Z => write!(f, "Z"),
        }
    }
}

// basis convention for spins: index k holds magnetic quantum number
// m = S - k, so k = 0 is the highest-weight state
fn spin_z(twos: u32) -> na::DMatrix<C64> {
    let d = twos as usize + 1;
    let s = f64::from(twos) / 2.0;
    na::DMatrix::from_fn(d, d, |i, j| {
        if i == j { C64::from(s - i as f64) } else { C64::from(0.0) }
    })
}

fn spin_raise(twos: u32) -> na::DMatrix<C64> {
    let d = twos as usize + 1;
    let s = f64::from(twos) / 2.0;
    let mut sp: na::DMatrix<C64> = na::DMatrix::zeros(d, d);
    for k in 1..d {
        let m = s - k as f64;
        sp[(k - 1, k)] = C64::from((s * (s + 1.0) - m * (m + 1.0)).sqrt());
    }
    sp
}

fn spin_lower(twos: u32) -> na::DMatrix<C64> {
    spin_raise(twos).transpose()
}

fn boson_lower(nmax: u32) -> na::DMatrix<C64> {
    let d = nmax as usize + 1;
    let mut b: na::DMatrix<C64> = na::DMatrix::zeros(d, d);
    for n in 1..d {
        b[(n - 1, n)] = C64::from((n as f64).sqrt());
    }
    b
}

fn boson_number(nmax: u32) -> na::DMatrix<C64> {
    let d = nmax as usize + 1;
    na::DMatrix::from_fn(d, d, |i, j| {
        if i == j { C64::from(i as f64) } else { C64::from(0.0) }
    })
}

fn resolve(site: Site, sym: OpSym) -> SiteResult<na::DMatrix<C64>> {
    if !site.has_op(sym) { return Err(UnsupportedOp(sym, site)); }
    let d = site.dim();
    let mat =
        match (site, sym) {
            (_, OpSym::Id) => na::DMatrix::identity(d, d),
            (Site::Spin { twos }, OpSym::Z) => spin_z(twos),
            (Site::Spin { twos }, OpSym::Sp) => spin_raise(twos),
            (Site::Spin { twos }, OpSym::Sm) => spin_lower(twos),
            (Site::Spin { twos }, OpSym::X) => {
                (spin_raise(twos) + spin_lower(twos)).scale(0.5)
            },
            (Site::Spin { twos }, OpSym::Y) => {
                let pm = spin_raise(twos) - spin_lower(twos);
                pm * C64::new(0.0, -0.5)
            },
            (Site::Boson { nmax }, OpSym::B) => boson_lower(nmax),
            (Site::Boson { nmax }, OpSym::Bdag) => {
                boson_lower(nmax).transpose()
            },
            (Site::Boson { nmax }, OpSym::Nb) => boson_number(nmax),
            _ => unreachable!(),
        };
    Ok(mat)
}

/// An eigendecomposition of a Hermitian site operator.
///
/// Eigenvalues are sorted ascending; degenerate values keep their original
/// (pre-sort) relative order so the basis is deterministic.
#[derive(Clone, Debug, PartialEq)]
pub struct Eigenbasis {
    /// Eigenvalues, ascending.
    pub values: na::DVector<f64>,
    /// Eigenvectors as columns, ordered to match `values`.
    pub vectors: na::DMatrix<C64>,
}

fn eig_sorted(mat: &na::DMatrix<C64>) -> Eigenbasis {
    let eig = na::SymmetricEigen::new(mat.clone());
    let d = eig.eigenvalues.len();
    let mut order: Vec<usize> = (0..d).collect();
    order.sort_by(|a, b| {
        eig.eigenvalues[*a].partial_cmp(&eig.eigenvalues[*b])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(b))
    });
    let values =
        na::DVector::from_iterator(
            d, order.iter().map(|k| eig.eigenvalues[*k]));
    let vectors =
        na::DMatrix::from_fn(
            d, d, |i, j| eig.eigenvectors[(i, order[j])]);
    Eigenbasis { values, vectors }
}

#[derive(Clone, Debug, PartialEq)]
struct SiteTable {
    ops: HashMap<OpSym, na::DMatrix<C64>>,
    eig: HashMap<SpinAxis, Eigenbasis>,
}

impl SiteTable {
    fn build(site: Site) -> Self {
        let syms: &[OpSym] =
            match site {
                Site::Spin { .. } =>
                    &[OpSym::Id, OpSym::X, OpSym::Y, OpSym::Z,
                      OpSym::Sp, OpSym::Sm],
                Site::Boson { .. } =>
                    &[OpSym::Id, OpSym::B, OpSym::Bdag, OpSym::Nb],
            };
        let ops: HashMap<OpSym, na::DMatrix<C64>> =
            syms.iter()
            .map(|sym| {
                let Ok(mat) = resolve(site, *sym) else { unreachable!() };
                (*sym, mat)
            })
            .collect();
        let eig: HashMap<SpinAxis, Eigenbasis> =
            if site.is_spin() {
                [SpinAxis::X, SpinAxis::Y, SpinAxis::Z].into_iter()
                    .map(|ax| (ax, eig_sorted(&ops[&ax.op()])))
                    .collect()
            } else {
                HashMap::new()
            };
        Self { ops, eig }
    }
}

/// Precomputed operator matrices and eigenbases for the distinct sites of a
/// chain.
///
/// Constructed once per chain (or superset of chains) and then queried
/// immutably; identical sites share a single table.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct SiteTables {
    tables: HashMap<Site, SiteTable>,
}

impl SiteTables {
    /// Create an empty set of tables.
    pub fn new() -> Self { Self::default() }

    /// Build tables covering every distinct site in `chain`.
    pub fn for_chain(chain: &[Site]) -> Self {
        let mut tables = Self::new();
        chain.iter().for_each(|site| { tables.insert(*site); });
        tables
    }

    /// Ensure a table exists for `site`.
    pub fn insert(&mut self, site: Site) {
        self.tables.entry(site).or_insert_with(|| SiteTable::build(site));
    }

    /// Return the local dimension of `site`.
    pub fn local_dim(&self, site: Site) -> usize { site.dim() }

    /// Resolve an operator symbol on a site to its dense matrix.
    ///
    /// Fails if the site kind does not carry the symbol or the tables were
    /// not built over the site.
    pub fn operator(&self, site: Site, sym: OpSym) -> SiteResult<&na::DMatrix<C64>> {
        if !site.has_op(sym) { return Err(UnsupportedOp(sym, site)); }
        self.tables.get(&site)
            .ok_or(UnknownSite(site))
            .map(|tab| &tab.ops[&sym])
    }

    /// Return the eigenbasis of the spin operator along `axis`.
    ///
    /// Fails on boson sites, and if the tables were not built over the
    /// site.
    pub fn eigenbasis(&self, site: Site, axis: SpinAxis) -> SiteResult<&Eigenbasis> {
        if !site.is_spin() { return Err(UnsupportedAxis(axis, site)); }
        self.tables.get(&site)
            .ok_or(UnknownSite(site))
            .map(|tab| &tab.eig[&axis])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &na::DMatrix<C64>, b: &na::DMatrix<C64>, tol: f64) -> bool {
        a.shape() == b.shape()
            && a.iter().zip(b.iter()).all(|(x, y)| (x - y).norm() < tol)
    }

    #[test]
    fn spin_half_algebra() {
        let site = Site::spin_half();
        let tables = SiteTables::for_chain(&[site]);
        let x = tables.operator(site, OpSym::X).unwrap();
        let y = tables.operator(site, OpSym::Y).unwrap();
        let z = tables.operator(site, OpSym::Z).unwrap();
        // [Sx, Sy] = i Sz
        let comm = x * y - y * x;
        let expected = z * C64::new(0.0, 1.0);
        assert!(approx_eq(&comm, &expected, 1e-14));
        // S± = Sx ± i Sy
        let sp = tables.operator(site, OpSym::Sp).unwrap();
        let expected = x + y * C64::new(0.0, 1.0);
        assert!(approx_eq(sp, &expected, 1e-14));
    }

    #[test]
    fn spin_one_dims() {
        let site = Site::spin(2).unwrap();
        assert_eq!(site.dim(), 3);
        let tables = SiteTables::for_chain(&[site]);
        let z = tables.operator(site, OpSym::Z).unwrap();
        assert_eq!(z[(0, 0)], C64::from(1.0));
        assert_eq!(z[(1, 1)], C64::from(0.0));
        assert_eq!(z[(2, 2)], C64::from(-1.0));
    }

    #[test]
    fn boson_commutator() {
        let site = Site::boson(8).unwrap();
        let tables = SiteTables::for_chain(&[site]);
        let b = tables.operator(site, OpSym::B).unwrap();
        let bdag = tables.operator(site, OpSym::Bdag).unwrap();
        let nb = tables.operator(site, OpSym::Nb).unwrap();
        assert!(approx_eq(&(bdag * b), nb, 1e-14));
        // [b, b†] = 1 on all states below the truncation ceiling
        let comm = b * bdag - bdag * b;
        for n in 0..site.dim() - 1 {
            assert!((comm[(n, n)] - C64::from(1.0)).norm() < 1e-14);
        }
    }

    #[test]
    fn eigenbasis_ascending() {
        let site = Site::spin_half();
        let tables = SiteTables::for_chain(&[site]);
        for axis in [SpinAxis::X, SpinAxis::Y, SpinAxis::Z] {
            let basis = tables.eigenbasis(site, axis).unwrap();
            assert!(basis.values[0] < basis.values[1]);
            assert!((basis.values[0] + 0.5).abs() < 1e-14);
            assert!((basis.values[1] - 0.5).abs() < 1e-14);
        }
    }

    #[test]
    fn eigenbasis_diagonalizes() {
        let site = Site::spin(3).unwrap();
        let tables = SiteTables::for_chain(&[site]);
        let x = tables.operator(site, OpSym::X).unwrap();
        let basis = tables.eigenbasis(site, SpinAxis::X).unwrap();
        for j in 0..site.dim() {
            let v = basis.vectors.column(j);
            let xv = x * v;
            let lv = v * C64::from(basis.values[j]);
            assert!((xv - lv).norm() < 1e-12);
        }
    }

    #[test]
    fn unsupported_ops_rejected() {
        let spin = Site::spin_half();
        let boson = Site::boson(4).unwrap();
        let tables = SiteTables::for_chain(&[spin, boson]);
        assert!(tables.operator(spin, OpSym::Bdag).is_err());
        assert!(tables.operator(boson, OpSym::Sp).is_err());
        assert!(tables.eigenbasis(boson, SpinAxis::Z).is_err());
        assert!(Site::boson(0).is_err());
        assert!(Site::spin(0).is_err());
    }
}
