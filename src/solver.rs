// Incompressible single-phase pressure solver

use crate::boundary::{BoundaryConditions, FlowBc};
use crate::error::{ConfigError, SolverError};
use crate::grid::{CellId, FaceId, GridInterface, Point, DIMENSION};
use crate::params::ParameterGroup;
use crate::rock::RockProperties;
use log::{debug, trace};
use ndarray::Array1;

/// Pressure and face fluxes of a solved flow problem.
#[derive(Debug, Clone, Default)]
pub struct FlowSolution {
    pressure: Array1<f64>,
    outflux: Array1<f64>,
}

impl FlowSolution {
    pub fn new(pressure: Array1<f64>, outflux: Array1<f64>) -> Self {
        Self { pressure, outflux }
    }

    pub fn pressure(&self, cell: CellId) -> f64 {
        self.pressure[cell]
    }

    /// Signed flux through `face`, positive along the face's outward normal.
    pub fn outflux(&self, face: FaceId) -> f64 {
        self.outflux[face]
    }
}

/// A pressure/flux solver that is set up once for a grid and then solved
/// repeatedly under changing boundary conditions.
pub trait FlowSolver {
    /// Build everything that depends only on grid topology and rock.
    fn init<G: GridInterface>(
        &mut self,
        grid: &G,
        rock: &RockProperties,
        bc: &BoundaryConditions,
    ) -> Result<(), SolverError>;

    /// Solve for pressure and fluxes.
    ///
    /// # Arguments
    /// * rock: rock and fluid properties
    /// * saturation: per-cell saturation of the flowing phase
    /// * bc: boundary conditions of this solve
    /// * source: per-cell volumetric source (positive) or sink (negative)
    /// * gravity: gravity acceleration vector
    /// * tolerance: relative residual tolerance of the linear solve
    fn solve(
        &mut self,
        rock: &RockProperties,
        saturation: &[f64],
        bc: &BoundaryConditions,
        source: &[f64],
        gravity: &Point,
        tolerance: f64,
    ) -> Result<(), SolverError>;

    fn solution(&self) -> &FlowSolution;
}

/// Settings of the conjugate gradient iteration.
#[derive(Debug, Clone, Copy)]
pub struct LinearSolverConfig {
    pub max_iterations: usize,
    /// Log the residual of every iteration at trace level.
    pub verbose: bool,
}

impl Default for LinearSolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5000,
            verbose: false,
        }
    }
}

impl LinearSolverConfig {
    pub fn from_params(params: &ParameterGroup) -> Result<Self, ConfigError> {
        let default = Self::default();
        Ok(Self {
            max_iterations: params
                .get_default("linsolver_max_iterations", default.max_iterations)?,
            verbose: params.get_default("linsolver_verbose", default.verbose)?,
        })
    }
}

/// Cached geometry of one half-face.
#[derive(Debug, Clone, Copy, Default)]
struct HalfFace {
    cell: CellId,
    neighbour: Option<CellId>,
    /// Half-face on the neighbour's side.
    opposite: Option<FaceId>,
    /// Half transmissibility without mobility.
    trans: f64,
    /// Face centroid minus cell centroid.
    arm: Point,
}

/// Sparsity pattern in compressed row form.
#[derive(Debug, Clone, Default)]
struct CsrPattern {
    row_ptr: Vec<usize>,
    cols: Vec<usize>,
}

impl CsrPattern {
    fn from_rows(rows: Vec<Vec<usize>>) -> Self {
        let mut row_ptr = Vec::with_capacity(rows.len() + 1);
        let mut cols = Vec::new();
        row_ptr.push(0);
        for mut row in rows {
            row.sort_unstable();
            row.dedup();
            cols.extend(row);
            row_ptr.push(cols.len());
        }
        Self { row_ptr, cols }
    }

    fn nnz(&self) -> usize {
        self.cols.len()
    }

    fn position(&self, row: usize, col: usize) -> Option<usize> {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.cols[start..end]
            .binary_search(&col)
            .ok()
            .map(|i| start + i)
    }

    fn mul_vec(&self, values: &[f64], x: &[f64], y: &mut [f64]) {
        for (row, out) in y.iter_mut().enumerate() {
            *out = (self.row_ptr[row]..self.row_ptr[row + 1])
                .map(|k| values[k] * x[self.cols[k]])
                .sum();
        }
    }
}

/// Two-point flux approximation of incompressible single-phase flow,
/// solved with Jacobi-preconditioned conjugate gradients.
///
/// The flux out of cell $i$ through a face shared with cell $j$ is
///
/// $$\begin{equation}
/// q_{ij} = \lambda T_{ij} \left(p_i - p_j + \rho\, g \cdot (x_j - x_i)\right)
/// \end{equation}$$
///
/// with $T_{ij}$ the harmonic mean of the two half transmissibilities
/// $t = A\, n \cdot K d / |d|^2$.
#[derive(Debug, Clone, Default)]
pub struct TpfaSolver {
    config: LinearSolverConfig,
    faces: Vec<HalfFace>,
    pattern: CsrPattern,
    solution: FlowSolution,
    initialised: bool,
}

impl TpfaSolver {
    pub fn new(config: LinearSolverConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn from_params(params: &ParameterGroup) -> Result<Self, ConfigError> {
        Ok(Self::new(LinearSolverConfig::from_params(params)?))
    }

    fn num_cells(&self) -> usize {
        self.pattern.row_ptr.len().saturating_sub(1)
    }

    /// Transmissibility, mobility and gravity head of the connection across
    /// `face` to the half-face `other`.
    fn connection(
        &self,
        face: &HalfFace,
        other: FaceId,
        mobility: &[f64],
        gravity: &Point,
        density: f64,
    ) -> (CellId, f64, f64) {
        let far = &self.faces[other];
        let t = harmonic(face.trans, far.trans) * 0.5 * (mobility[face.cell] + mobility[far.cell]);
        let head = density * dot(gravity, &sub(&face.arm, &far.arm));
        (far.cell, t, head)
    }
}

impl FlowSolver for TpfaSolver {
    fn init<G: GridInterface>(
        &mut self,
        grid: &G,
        rock: &RockProperties,
        _bc: &BoundaryConditions,
    ) -> Result<(), SolverError> {
        let n = grid.num_cells();
        if rock.num_cells() != n {
            return Err(SolverError::LengthMismatch {
                what: "rock properties",
                actual: rock.num_cells(),
                expected: n,
            });
        }

        let mut faces = vec![HalfFace::default(); grid.num_faces()];
        let mut rows: Vec<Vec<usize>> = (0..n).map(|c| vec![c]).collect();
        for cell in grid.cells() {
            let k = rock.permeability(cell);
            let centre = grid.cell_centroid(cell);
            for face in grid.faces(cell) {
                let arm = sub(&grid.face_centroid(face), &centre);
                let normal = grid.face_normal(face);
                let kd: f64 = (0..DIMENSION).map(|a| normal[a] * k[a] * arm[a]).sum();
                let trans = grid.face_area(face) * kd / dot(&arm, &arm);

                let neighbour = grid.neighbour(face);
                let opposite = match neighbour {
                    Some(other) => {
                        nearest_face_towards(grid, other, cell, &grid.face_centroid(face))
                    }
                    None => grid.periodic_partner(face),
                };
                if let Some(opposite) = opposite {
                    rows[cell].push(grid.face_cell(opposite));
                }
                faces[face] = HalfFace {
                    cell,
                    neighbour,
                    opposite,
                    trans,
                    arm,
                };
            }
        }

        self.faces = faces;
        self.pattern = CsrPattern::from_rows(rows);
        self.solution = FlowSolution::new(Array1::zeros(n), Array1::zeros(grid.num_faces()));
        self.initialised = true;
        debug!(
            "tpfa solver initialised: {} cells, {} half-faces, {} matrix entries",
            n,
            self.faces.len(),
            self.pattern.nnz()
        );
        Ok(())
    }

    fn solve(
        &mut self,
        rock: &RockProperties,
        saturation: &[f64],
        bc: &BoundaryConditions,
        source: &[f64],
        gravity: &Point,
        tolerance: f64,
    ) -> Result<(), SolverError> {
        if !self.initialised {
            return Err(SolverError::NotInitialised);
        }
        let n = self.num_cells();
        for (what, actual) in [("saturation", saturation.len()), ("source", source.len())] {
            if actual != n {
                return Err(SolverError::LengthMismatch {
                    what,
                    actual,
                    expected: n,
                });
            }
        }

        let mobility: Vec<f64> = saturation.iter().map(|&s| rock.mobility(s)).collect();
        let boundary_mobility = rock.mobility(bc.boundary_saturation());
        let density = rock.density_first_phase();

        let mut values = vec![0.0; self.pattern.nnz()];
        let mut rhs = source.to_vec();
        // (row, column) pairs come from the pattern built in init
        let mut add = |row: usize, col: usize, v: f64| {
            if let Some(k) = self.pattern.position(row, col) {
                values[k] += v;
            }
        };

        for (id, face) in self.faces.iter().enumerate() {
            let c = face.cell;
            let coupled = match (face.neighbour, bc.condition(id)) {
                (Some(_), _) => face.opposite.map(|other| (other, 0.0)),
                (None, FlowBc::Periodic { partner, offset }) => Some((partner, offset)),
                (None, FlowBc::Dirichlet(p)) => {
                    let t = face.trans * boundary_mobility;
                    add(c, c, t);
                    rhs[c] += t * (p - density * dot(gravity, &face.arm));
                    None
                }
                (None, FlowBc::NoFlow) => None,
            };
            if let Some((other, offset)) = coupled {
                let (m, t, head) = self.connection(face, other, &mobility, gravity, density);
                add(c, c, t);
                add(c, m, -t);
                rhs[c] += t * (offset - head);
            }
        }

        if !bc.has_dirichlet() && n > 0 {
            // Pressure is only defined up to a constant; pin cell 0.
            for row in 0..n {
                if let Some(k) = self.pattern.position(row, 0) {
                    values[k] = 0.0;
                }
            }
            for k in self.pattern.row_ptr[0]..self.pattern.row_ptr[1] {
                values[k] = 0.0;
            }
            if let Some(k) = self.pattern.position(0, 0) {
                values[k] = 1.0;
            }
            rhs[0] = 0.0;
        }

        let pressure = pcg(&self.pattern, &values, &rhs, tolerance, self.config)?;

        let mut outflux = Array1::zeros(self.faces.len());
        for (id, face) in self.faces.iter().enumerate() {
            let pc = pressure[face.cell];
            outflux[id] = match (face.neighbour, bc.condition(id)) {
                (Some(_), _) => face.opposite.map_or(0.0, |other| {
                    let (m, t, head) = self.connection(face, other, &mobility, gravity, density);
                    t * (pc - pressure[m] + head)
                }),
                (None, FlowBc::Periodic { partner, offset }) => {
                    let (m, t, head) = self.connection(face, partner, &mobility, gravity, density);
                    t * (pc - pressure[m] - offset + head)
                }
                (None, FlowBc::Dirichlet(p)) => {
                    face.trans
                        * boundary_mobility
                        * (pc - p + density * dot(gravity, &face.arm))
                }
                (None, FlowBc::NoFlow) => 0.0,
            };
        }

        self.solution = FlowSolution::new(Array1::from(pressure), outflux);
        Ok(())
    }

    fn solution(&self) -> &FlowSolution {
        &self.solution
    }
}

/// Face of `cell` that leads back to `from`, closest to `centroid`.
fn nearest_face_towards<G: GridInterface>(
    grid: &G,
    cell: CellId,
    from: CellId,
    centroid: &Point,
) -> Option<FaceId> {
    grid.faces(cell)
        .filter(|&f| grid.neighbour(f) == Some(from))
        .min_by(|&a, &b| {
            let da = sub(&grid.face_centroid(a), centroid);
            let db = sub(&grid.face_centroid(b), centroid);
            dot(&da, &da).total_cmp(&dot(&db, &db))
        })
}

fn harmonic(a: f64, b: f64) -> f64 {
    if a > 0.0 && b > 0.0 {
        a * b / (a + b)
    } else {
        0.0
    }
}

fn dot(a: &Point, b: &Point) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sub(a: &Point, b: &Point) -> Point {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn norm2(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Jacobi-preconditioned conjugate gradients, starting from zero.
///
/// Converged when $\|r\| \le \mathrm{tol}\,\|b\|$ (or $\|r\| \le \mathrm{tol}$
/// for a vanishing right-hand side).
fn pcg(
    pattern: &CsrPattern,
    values: &[f64],
    b: &[f64],
    tolerance: f64,
    config: LinearSolverConfig,
) -> Result<Vec<f64>, SolverError> {
    let n = b.len();
    let inv_diag: Vec<f64> = (0..n)
        .map(|i| match pattern.position(i, i).map(|k| values[k]) {
            Some(d) if d != 0.0 => 1.0 / d,
            _ => 1.0,
        })
        .collect();

    let b_norm = norm2(b);
    let scale = if b_norm > 0.0 { b_norm } else { 1.0 };
    let target = tolerance * scale;

    let mut x = vec![0.0; n];
    let mut r = b.to_vec();
    if norm2(&r) <= target {
        return Ok(x);
    }
    let mut z: Vec<f64> = r.iter().zip(&inv_diag).map(|(r, d)| r * d).collect();
    let mut p = z.clone();
    let mut ap = vec![0.0; n];
    let mut rz: f64 = r.iter().zip(&z).map(|(a, b)| a * b).sum();

    for iter in 0..config.max_iterations {
        pattern.mul_vec(values, &p, &mut ap);
        let pap: f64 = p.iter().zip(&ap).map(|(a, b)| a * b).sum();
        if !(pap > 0.0) || !pap.is_finite() {
            return Err(SolverError::Breakdown(iter));
        }
        let alpha = rz / pap;
        for i in 0..n {
            x[i] += alpha * p[i];
            r[i] -= alpha * ap[i];
        }

        let res = norm2(&r);
        if config.verbose {
            trace!("PCG iter {}: residual = {:.6e}", iter + 1, res / scale);
        }
        if res <= target {
            debug!(
                "PCG converged in {} iterations, relative residual {:.3e}",
                iter + 1,
                res / scale
            );
            return Ok(x);
        }

        for i in 0..n {
            z[i] = r[i] * inv_diag[i];
        }
        let rz_new: f64 = r.iter().zip(&z).map(|(a, b)| a * b).sum();
        let beta = rz_new / rz;
        rz = rz_new;
        for i in 0..n {
            p[i] = z[i] + beta * p[i];
        }
    }

    Err(SolverError::NotConverged {
        iterations: config.max_iterations,
        residual: norm2(&r) / scale,
    })
}
