// Single-phase permeability upscaling

use crate::boundary::{setup_upscaling_conditions, BoundaryConditionType, BoundaryConditions, Side};
use crate::error::{ConfigError, Result, SolverError, UpscaleError};
use crate::grid::{CartesianGrid, FaceId, GridInterface, DIMENSION};
use crate::params::ParameterGroup;
use crate::rock::RockProperties;
use crate::setup::setup_grid_and_props;
use crate::solver::{FlowSolution, FlowSolver, TpfaSolver};
use log::{debug, info, warn};
use ndarray::Array2;

/// Upscaled permeability; column `j` is the response to a pressure drop
/// along axis `j`.
pub type PermeabilityTensor = Array2<f64>;

pub const DEFAULT_RESIDUAL_TOLERANCE: f64 = 1e-8;

/// Parameters read by the upscaler itself.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UpscalingSettings {
    pub bc_type: BoundaryConditionType,
    pub twodim_hack: bool,
    pub residual_tolerance: f64,
}

impl UpscalingSettings {
    pub fn new(bc_type: BoundaryConditionType) -> Self {
        Self {
            bc_type,
            twodim_hack: false,
            residual_tolerance: DEFAULT_RESIDUAL_TOLERANCE,
        }
    }

    /// `boundary_condition_type` is required, the rest have defaults.
    pub fn from_params(params: &ParameterGroup) -> Result<Self, ConfigError> {
        let bct: i32 = params.get("boundary_condition_type")?;
        Ok(Self {
            bc_type: BoundaryConditionType::try_from(bct)?,
            twodim_hack: params.get_default("2d_hack", false)?,
            residual_tolerance: params
                .get_default("residual_tolerance", DEFAULT_RESIDUAL_TOLERANCE)?,
        })
    }
}

/// Parameters forwarded to grid construction.
///
/// Periodic conditions need unique boundary ids and a periodically extended
/// grid; both are switched on unless the caller already set them.
pub fn forwarded_params(params: &ParameterGroup, bc_type: BoundaryConditionType) -> ParameterGroup {
    match bc_type {
        BoundaryConditionType::Periodic => params
            .with_default("use_unique_boundary_ids", true)
            .with_default("periodic_extension", true),
        BoundaryConditionType::Fixed | BoundaryConditionType::Linear => params.clone(),
    }
}

/// Read the upscaler's own settings and build the group handed on to grid
/// and solver setup. Keys read here stay marked as used in the result.
fn configure(params: &ParameterGroup) -> Result<(UpscalingSettings, ParameterGroup)> {
    let settings = UpscalingSettings::from_params(params)?;
    let forwarded = forwarded_params(params, settings.bc_type);
    Ok((settings, forwarded))
}

impl BoundaryConditionType {
    /// Flow response along every axis for a pressure drop along `pdd`.
    ///
    /// With fixed conditions only the component along `pdd` is meaningful and
    /// the others are zero.
    fn flow_response<F>(self, pdd: usize, mut average_velocity: F) -> Result<[f64; DIMENSION]>
    where
        F: FnMut(usize) -> Result<f64>,
    {
        let mut q = [0.0; DIMENSION];
        match self {
            BoundaryConditionType::Fixed => q[pdd] = average_velocity(pdd)?,
            BoundaryConditionType::Linear | BoundaryConditionType::Periodic => {
                for (i, qi) in q.iter_mut().enumerate() {
                    *qi = average_velocity(i)?;
                }
            }
        }
        Ok(q)
    }
}

/// Per-side sums of one boundary scan.
#[derive(Debug, Default)]
struct SideSums {
    value: [f64; 2],
    area: [f64; 2],
    faces: [usize; 2],
}

impl SideSums {
    fn add(&mut self, side: Side, value: f64, area: f64) {
        let s = side.index();
        self.value[s] += value;
        self.area[s] += area;
        self.faces[s] += 1;
    }

    /// Area-weighted mean of each side.
    fn means(&self, axis: usize) -> Result<[f64; 2]> {
        if let Some(side) = self.area.iter().position(|a| !(*a > 0.0)) {
            return Err(UpscaleError::Geometry { axis, side });
        }
        Ok([
            self.value[0] / self.area[0],
            self.value[1] / self.area[1],
        ])
    }
}

/// Visit every boundary face whose canonical id lies on `flow_dir`.
fn scan_boundary<G, F>(grid: &G, bc: &BoundaryConditions, flow_dir: usize, mut visit: F)
where
    G: GridInterface,
    F: FnMut(FaceId, Side),
{
    for cell in grid.cells() {
        for face in grid.boundary_faces(cell) {
            let canonical = bc.canonical_boundary_id(grid.boundary_id(face));
            if let Some((axis, side)) = canonical.axis_side() {
                if axis == flow_dir {
                    visit(face, side);
                }
            }
        }
    }
}

/// Outflow through the low side or inflow through the high side.
fn flow_reversed(side: Side, flux: f64) -> bool {
    match side {
        Side::Low => flux > 0.0,
        Side::High => flux < 0.0,
    }
}

/// Average velocity through the two boundaries orthogonal to `flow_dir`.
///
/// $$\begin{equation}
/// q = \frac{1}{2}\left(\frac{\sum_{1} q_f n_f}{\sum_{1} A_f}
///   + \frac{\sum_{2} q_f n_f}{\sum_{2} A_f}\right)
/// \end{equation}$$
///
/// where $q_f$ is the face outflux, $n_f$ the `flow_dir` component of the
/// face normal and the sums run over the low (1) and high (2) side.
///
/// # Arguments
/// * grid: grid of the solved problem
/// * bc: boundary conditions the solution was computed with
/// * solution: solved flow field
/// * flow_dir: axis along which flow is measured
/// * pdrop_dir: axis along which the pressure drop was imposed
pub fn average_velocity<G: GridInterface>(
    grid: &G,
    bc: &BoundaryConditions,
    solution: &FlowSolution,
    flow_dir: usize,
    pdrop_dir: usize,
) -> Result<f64> {
    let mut sums = SideSums::default();
    scan_boundary(grid, bc, flow_dir, |face, side| {
        let flux = solution.outflux(face);
        if flow_dir == pdrop_dir && flow_reversed(side, flux) {
            warn!(
                "Flow may be in wrong direction at bid: {} Magnitude: {}",
                grid.boundary_id(face),
                flux.abs()
            );
        }
        let norm_comp = grid.face_normal(face)[flow_dir];
        sums.add(side, flux * norm_comp, grid.face_area(face));
    });
    debug!(
        "velocity scan along {} (pressure drop {}): {} + {} faces",
        flow_dir, pdrop_dir, sums.faces[0], sums.faces[1]
    );
    let [side1, side2] = sums.means(flow_dir)?;
    Ok(0.5 * (side1 + side2))
}

/// Area-weighted distance between the two boundaries orthogonal to `flow_dir`.
pub fn characteristic_length<G: GridInterface>(
    grid: &G,
    bc: &BoundaryConditions,
    flow_dir: usize,
) -> Result<f64> {
    let mut sums = SideSums::default();
    scan_boundary(grid, bc, flow_dir, |face, side| {
        let area = grid.face_area(face);
        sums.add(side, area * grid.face_centroid(face)[flow_dir], area);
    });
    let [side1, side2] = sums.means(flow_dir)?;
    Ok(side2 - side1)
}

/// Computes an upscaled permeability tensor for a block of cells by imposing
/// a unit pressure drop along each axis in turn and measuring the resulting
/// boundary flow.
#[derive(Debug)]
pub struct SinglePhaseUpscaler<G = CartesianGrid, S = TpfaSolver> {
    settings: UpscalingSettings,
    grid: G,
    rock: RockProperties,
    solver: S,
    bcond: Option<BoundaryConditions>,
}

impl SinglePhaseUpscaler {
    /// Set up grid, properties and solver from parameters.
    ///
    /// Parameters that nothing consumed are logged once setup is done.
    pub fn init(params: &ParameterGroup) -> Result<Self> {
        let (settings, forwarded) = configure(params)?;
        let (grid, rock) = setup_grid_and_props(&forwarded)?;
        let solver = TpfaSolver::from_params(&forwarded)?;

        forwarded.report_unused();
        Ok(Self::from_parts(settings, grid, rock, solver))
    }
}

impl<G: GridInterface, S: FlowSolver> SinglePhaseUpscaler<G, S> {
    pub fn from_parts(
        settings: UpscalingSettings,
        grid: G,
        rock: RockProperties,
        solver: S,
    ) -> Self {
        Self {
            settings,
            grid,
            rock,
            solver,
            bcond: None,
        }
    }

    pub fn grid(&self) -> &G {
        &self.grid
    }

    pub fn rock_properties(&self) -> &RockProperties {
        &self.rock
    }

    pub fn settings(&self) -> &UpscalingSettings {
        &self.settings
    }

    /// Run one pressure solve per axis and assemble the permeability tensor
    /// $K = \mu\, q\, \Delta / \Delta p$ column by column, with $\Delta p = 1$.
    pub fn upscale_single_phase(&mut self) -> Result<PermeabilityTensor> {
        let num_cells = self.grid.num_cells();
        // No source or sink, only the one phase, no gravity.
        let src = vec![0.0; num_cells];
        let sat = vec![1.0; num_cells];
        let gravity = [0.0; DIMENSION];

        let mut upscaled_k = PermeabilityTensor::zeros((DIMENSION, DIMENSION));
        for pdd in 0..DIMENSION {
            let bc = setup_upscaling_conditions(
                &self.grid,
                self.settings.bc_type,
                pdd,
                1.0,
                1.0,
                self.settings.twodim_hack,
            )?;
            if pdd == 0 {
                // Grid topology does not change between directions.
                self.solver.init(&self.grid, &self.rock, &bc)?;
            }
            self.solver.solve(
                &self.rock,
                &sat,
                &bc,
                &src,
                &gravity,
                self.settings.residual_tolerance,
            )?;

            let solution = self.solver.solution();
            let grid = &self.grid;
            let q = self
                .settings
                .bc_type
                .flow_response(pdd, |i| average_velocity(grid, &bc, solution, i, pdd))?;
            let delta = characteristic_length(grid, &bc, pdd)?;
            for i in 0..DIMENSION {
                upscaled_k[[i, pdd]] = q[i] * delta;
            }
            debug!("pressure drop along {}: q = {:?}, delta = {}", pdd, q, delta);
            self.bcond = Some(bc);
        }
        upscaled_k *= self.rock.viscosity_first_phase();
        info!("upscaled permeability:\n{}", upscaled_k);
        Ok(upscaled_k)
    }

    /// Average velocity of the most recent solve.
    pub fn average_velocity(&self, flow_dir: usize, pdrop_dir: usize) -> Result<f64> {
        let bc = self.bcond.as_ref().ok_or(SolverError::NotInitialised)?;
        average_velocity(&self.grid, bc, self.solver.solution(), flow_dir, pdrop_dir)
    }

    /// Characteristic length along `flow_dir` under the most recent conditions.
    pub fn characteristic_length(&self, flow_dir: usize) -> Result<f64> {
        let bc = self.bcond.as_ref().ok_or(SolverError::NotInitialised)?;
        characteristic_length(&self.grid, bc, flow_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CartesianGrid, GridOptions};
    use approx::assert_relative_eq;
    use ndarray::Array1;

    /// Solver that reports a fixed velocity `v[axis]` through every boundary
    /// face, along the face normal's sign.
    struct UniformVelocity {
        v: [f64; DIMENSION],
        solution: FlowSolution,
    }

    impl FlowSolver for UniformVelocity {
        fn init<G: GridInterface>(
            &mut self,
            grid: &G,
            _rock: &RockProperties,
            _bc: &BoundaryConditions,
        ) -> std::result::Result<(), SolverError> {
            let mut outflux = Array1::zeros(grid.num_faces());
            for cell in grid.cells() {
                for face in grid.boundary_faces(cell) {
                    let n = grid.face_normal(face);
                    outflux[face] = (0..DIMENSION)
                        .map(|a| n[a] * self.v[a] * grid.face_area(face))
                        .sum();
                }
            }
            self.solution = FlowSolution::new(Array1::zeros(grid.num_cells()), outflux);
            Ok(())
        }

        fn solve(
            &mut self,
            _rock: &RockProperties,
            _saturation: &[f64],
            _bc: &BoundaryConditions,
            _source: &[f64],
            _gravity: &[f64; DIMENSION],
            _tolerance: f64,
        ) -> std::result::Result<(), SolverError> {
            Ok(())
        }

        fn solution(&self) -> &FlowSolution {
            &self.solution
        }
    }

    fn engine(
        bc_type: BoundaryConditionType,
        v: [f64; DIMENSION],
    ) -> SinglePhaseUpscaler<CartesianGrid, UniformVelocity> {
        let grid =
            CartesianGrid::uniform([2, 2, 2], [0.5, 1.0, 2.0], GridOptions::default()).unwrap();
        let rock = RockProperties::homogeneous(8, [1.0; 3], 2.0).unwrap();
        let solver = UniformVelocity {
            v,
            solution: FlowSolution::default(),
        };
        SinglePhaseUpscaler::from_parts(UpscalingSettings::new(bc_type), grid, rock, solver)
    }

    #[test]
    fn fixed_leaves_off_diagonals_at_zero() {
        let mut upscaler = engine(BoundaryConditionType::Fixed, [1.0, 2.0, 3.0]);
        let k = upscaler.upscale_single_phase().unwrap();
        let lengths = [1.0, 2.0, 4.0];
        for i in 0..DIMENSION {
            for j in 0..DIMENSION {
                if i == j {
                    // viscosity * v * length
                    assert_relative_eq!(k[[i, j]], 2.0 * (i as f64 + 1.0) * lengths[j]);
                } else {
                    assert_eq!(k[[i, j]], 0.0);
                }
            }
        }
    }

    #[test]
    fn linear_fills_every_column_entry() {
        let mut upscaler = engine(BoundaryConditionType::Linear, [1.0, 2.0, 3.0]);
        let k = upscaler.upscale_single_phase().unwrap();
        assert_relative_eq!(k[[2, 0]], 2.0 * 3.0 * 1.0);
        assert_relative_eq!(k[[0, 1]], 2.0 * 1.0 * 2.0);
    }

    #[test]
    fn scans_need_a_solve_first() {
        let upscaler = engine(BoundaryConditionType::Fixed, [1.0; 3]);
        assert!(matches!(
            upscaler.characteristic_length(0),
            Err(UpscaleError::Solver(SolverError::NotInitialised))
        ));
    }

    #[test]
    fn each_classified_face_lands_on_exactly_one_side() {
        let grid = CartesianGrid::uniform([3, 2, 1], [1.0; 3], GridOptions::default()).unwrap();
        let bc =
            setup_upscaling_conditions(&grid, BoundaryConditionType::Linear, 0, 1.0, 1.0, false)
                .unwrap();
        for flow_dir in 0..DIMENSION {
            let mut seen = std::collections::HashMap::new();
            scan_boundary(&grid, &bc, flow_dir, |face, side| {
                assert!(seen.insert(face, side).is_none());
            });
            let expected: usize = grid
                .cells()
                .map(|c| {
                    grid.boundary_faces(c)
                        .filter(|&f| grid.face_normal(f)[flow_dir] != 0.0)
                        .count()
                })
                .sum();
            assert_eq!(seen.len(), expected);
            for (face, side) in seen {
                let expected_side = if grid.face_normal(face)[flow_dir] < 0.0 {
                    Side::Low
                } else {
                    Side::High
                };
                assert_eq!(side, expected_side);
            }
        }
    }

    #[test]
    fn characteristic_length_ignores_translation() {
        let options = GridOptions::default();
        let grid = CartesianGrid::from_widths([vec![1.0, 3.0], vec![2.0], vec![0.5, 0.5]], options)
            .unwrap();
        let shifted = grid.clone().translated([10.0, -4.0, 2.5]);
        for flow_dir in 0..DIMENSION {
            let bc = setup_upscaling_conditions(
                &grid,
                BoundaryConditionType::Fixed,
                flow_dir,
                1.0,
                1.0,
                false,
            )
            .unwrap();
            let a = characteristic_length(&grid, &bc, flow_dir).unwrap();
            let b = characteristic_length(&shifted, &bc, flow_dir).unwrap();
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
        let bc = setup_upscaling_conditions(&grid, BoundaryConditionType::Fixed, 0, 1.0, 1.0, false)
            .unwrap();
        assert_relative_eq!(characteristic_length(&grid, &bc, 0).unwrap(), 4.0);
    }

    #[test]
    fn unclassified_boundary_gives_geometry_error() {
        let grid = CartesianGrid::uniform([1, 1, 1], [1.0; 3], GridOptions::default()).unwrap();
        let bc = BoundaryConditions::default();
        assert!(matches!(
            characteristic_length(&grid, &bc, 1),
            Err(UpscaleError::Geometry { axis: 1, side: 0 })
        ));
    }

    #[test]
    fn average_velocity_symmetrises_the_two_sides() {
        let grid = CartesianGrid::uniform([1, 1, 1], [1.0; 3], GridOptions::default()).unwrap();
        let bc = setup_upscaling_conditions(&grid, BoundaryConditionType::Fixed, 0, 1.0, 1.0, false)
            .unwrap();
        let mut outflux = Array1::zeros(grid.num_faces());
        // inflow through the low x face only
        outflux[0] = -1.0;
        let solution = FlowSolution::new(Array1::zeros(1), outflux);
        let v = average_velocity(&grid, &bc, &solution, 0, 0).unwrap();
        assert_relative_eq!(v, 0.5);
    }

    #[test]
    fn periodic_injection_respects_caller_values() {
        let params = ParameterGroup::from_pairs([("periodic_extension", "false")]);
        let periodic = forwarded_params(&params, BoundaryConditionType::Periodic);
        assert_eq!(periodic.raw("use_unique_boundary_ids"), Some("true"));
        assert_eq!(periodic.raw("periodic_extension"), Some("false"));

        for bc_type in [BoundaryConditionType::Fixed, BoundaryConditionType::Linear] {
            let forwarded = forwarded_params(&params, bc_type);
            assert!(!forwarded.has("use_unique_boundary_ids"));
            assert_eq!(forwarded.raw("periodic_extension"), Some("false"));
        }
    }

    #[test]
    fn reversed_flow_depends_on_side_and_sign() {
        assert!(flow_reversed(Side::Low, 0.3));
        assert!(!flow_reversed(Side::Low, -0.3));
        assert!(flow_reversed(Side::High, -0.3));
        assert!(!flow_reversed(Side::High, 0.3));
        assert!(!flow_reversed(Side::Low, 0.0));
        assert!(!flow_reversed(Side::High, 0.0));
    }

    #[test]
    fn only_unknown_keys_are_left_unused() {
        let params = ParameterGroup::from_pairs([
            ("boundary_condition_type", "0"),
            ("2d_hack", "false"),
            ("residual_tolerance", "1e-10"),
            ("no_such_key", "42"),
        ]);
        let (settings, forwarded) = configure(&params).unwrap();
        assert_eq!(settings.bc_type, BoundaryConditionType::Fixed);
        assert_eq!(forwarded.unused(), vec!["no_such_key".to_string()]);
    }

    #[test]
    fn unused_report_covers_grid_and_solver_keys() {
        let params = ParameterGroup::from_pairs([
            ("boundary_condition_type", "2"),
            ("nx", "2"),
            ("viscosity", "0.5"),
            ("linsolver_verbose", "true"),
            ("permeabilty", "3"),
        ]);
        let (_, forwarded) = configure(&params).unwrap();
        setup_grid_and_props(&forwarded).unwrap();
        TpfaSolver::from_params(&forwarded).unwrap();
        assert_eq!(forwarded.unused(), vec!["permeabilty".to_string()]);
    }

    #[test]
    fn settings_need_the_boundary_type() {
        let params = ParameterGroup::from_pairs([("residual_tolerance", "1e-6")]);
        assert!(matches!(
            UpscalingSettings::from_params(&params),
            Err(ConfigError::Missing(_))
        ));
        let params = ParameterGroup::from_pairs([("boundary_condition_type", "1")]);
        let settings = UpscalingSettings::from_params(&params).unwrap();
        assert_eq!(settings.bc_type, BoundaryConditionType::Linear);
        assert!(!settings.twodim_hack);
        assert_eq!(settings.residual_tolerance, 1e-8);
    }
}
