// Boundary conditions for upscaling

use crate::error::{ConfigError, Result, UpscaleError};
use crate::grid::{FaceId, GridInterface, DIMENSION};
use log::debug;
use std::collections::HashMap;
use std::fmt;

/// Boundary condition regime of an upscaling run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoundaryConditionType {
    /// Pressure drop across the pair of boundaries orthogonal to the flow
    /// direction, no flow through the others.
    Fixed = 0,
    /// Linearly varying pressure on the whole boundary.
    Linear = 1,
    /// Periodic boundaries with a pressure jump along the flow direction.
    Periodic = 2,
}

impl TryFrom<i32> for BoundaryConditionType {
    type Error = ConfigError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(BoundaryConditionType::Fixed),
            1 => Ok(BoundaryConditionType::Linear),
            2 => Ok(BoundaryConditionType::Periodic),
            other => Err(ConfigError::UnknownBoundaryType(other)),
        }
    }
}

impl fmt::Display for BoundaryConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BoundaryConditionType::Fixed => "fixed",
            BoundaryConditionType::Linear => "linear",
            BoundaryConditionType::Periodic => "periodic",
        };
        f.write_str(name)
    }
}

/// Low or high end of a coordinate axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Low = 0,
    High = 1,
}

impl Side {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Grid-independent boundary id encoding an `(axis, side)` pair as
/// `2*axis + side + 1`. Zero means the face is not classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalBoundaryId(usize);

impl CanonicalBoundaryId {
    pub const NONE: CanonicalBoundaryId = CanonicalBoundaryId(0);

    pub fn new(axis: usize, side: Side) -> Self {
        debug_assert!(axis < DIMENSION);
        CanonicalBoundaryId(2 * axis + side.index() + 1)
    }

    pub fn raw(self) -> usize {
        self.0
    }

    pub fn axis_side(self) -> Option<(usize, Side)> {
        let shifted = self.0.checked_sub(1)?;
        let side = if shifted % 2 == 0 { Side::Low } else { Side::High };
        Some((shifted / 2, side))
    }
}

/// Condition imposed on one boundary face.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FlowBc {
    NoFlow,
    /// Prescribed face pressure.
    Dirichlet(f64),
    /// Face coupled to `partner` on the opposite side; the pressure beyond
    /// this face is the partner cell's pressure plus `offset`.
    Periodic { partner: FaceId, offset: f64 },
}

/// Boundary conditions for one pressure-drop direction. Faces without a
/// condition are closed.
#[derive(Debug, Clone, Default)]
pub struct BoundaryConditions {
    canonical: HashMap<usize, CanonicalBoundaryId>,
    conditions: HashMap<FaceId, FlowBc>,
    boundary_saturation: f64,
}

impl BoundaryConditions {
    /// Canonical id of a raw boundary id, [`CanonicalBoundaryId::NONE`] if unknown.
    pub fn canonical_boundary_id(&self, raw_id: usize) -> CanonicalBoundaryId {
        self.canonical
            .get(&raw_id)
            .copied()
            .unwrap_or(CanonicalBoundaryId::NONE)
    }

    pub fn condition(&self, face: FaceId) -> FlowBc {
        self.conditions.get(&face).copied().unwrap_or(FlowBc::NoFlow)
    }

    pub fn boundary_saturation(&self) -> f64 {
        self.boundary_saturation
    }

    pub fn has_dirichlet(&self) -> bool {
        self.conditions
            .values()
            .any(|bc| matches!(bc, FlowBc::Dirichlet(_)))
    }
}

/// Classify a boundary face by its outward normal.
fn classify<G: GridInterface>(grid: &G, face: FaceId) -> Result<CanonicalBoundaryId> {
    let normal = grid.face_normal(face);
    let axis = (0..DIMENSION)
        .max_by(|&a, &b| normal[a].abs().total_cmp(&normal[b].abs()))
        .unwrap_or(0);
    let off_axis: f64 = (0..DIMENSION)
        .filter(|&a| a != axis)
        .map(|a| normal[a].abs())
        .sum();
    if normal[axis].abs() < 1e-6 || off_axis > 1e-6 * normal[axis].abs() {
        return Err(UpscaleError::Topology(format!(
            "boundary face {} with normal {:?} is not aligned with a coordinate axis",
            face, normal
        )));
    }
    let side = if normal[axis] < 0.0 { Side::Low } else { Side::High };
    Ok(CanonicalBoundaryId::new(axis, side))
}

/// Build the boundary conditions that drive flow along axis `pdd`.
///
/// # Arguments
/// * grid: grid whose boundary faces are classified
/// * bc_type: boundary condition regime
/// * pdd: pressure-drop direction
/// * pressure_drop: pressure difference imposed across the grid along `pdd`
/// * boundary_saturation: saturation of fluid entering through pressure boundaries
/// * twodim_hack: treat the third axis as closed for linear and periodic
///   conditions, and fall back to fixed conditions when `pdd` is that axis
pub fn setup_upscaling_conditions<G: GridInterface>(
    grid: &G,
    bc_type: BoundaryConditionType,
    pdd: usize,
    pressure_drop: f64,
    boundary_saturation: f64,
    twodim_hack: bool,
) -> Result<BoundaryConditions> {
    const FLAT_AXIS: usize = DIMENSION - 1;

    let (lo, hi) = grid.bounding_box();
    let effective = if twodim_hack && pdd == FLAT_AXIS {
        BoundaryConditionType::Fixed
    } else {
        bc_type
    };

    let mut canonical = HashMap::new();
    let mut conditions = HashMap::new();
    for cell in grid.cells() {
        for face in grid.boundary_faces(cell) {
            let id = classify(grid, face)?;
            let raw = grid.boundary_id(face);
            if let Some(previous) = canonical.insert(raw, id) {
                if previous != id {
                    return Err(UpscaleError::Topology(format!(
                        "boundary id {} is used on sides {} and {}",
                        raw,
                        previous.raw(),
                        id.raw()
                    )));
                }
            }

            let (axis, side) = id.axis_side().unwrap_or((0, Side::Low));
            let closed = twodim_hack && axis == FLAT_AXIS && pdd != FLAT_AXIS;
            let bc = match effective {
                BoundaryConditionType::Fixed if axis == pdd => match side {
                    Side::Low => FlowBc::Dirichlet(pressure_drop),
                    Side::High => FlowBc::Dirichlet(0.0),
                },
                BoundaryConditionType::Fixed => FlowBc::NoFlow,
                _ if closed => FlowBc::NoFlow,
                BoundaryConditionType::Linear => {
                    let x = grid.face_centroid(face)[pdd];
                    FlowBc::Dirichlet(pressure_drop * (hi[pdd] - x) / (hi[pdd] - lo[pdd]))
                }
                BoundaryConditionType::Periodic => {
                    let partner = grid.periodic_partner(face).ok_or_else(|| {
                        ConfigError::Inconsistent(format!(
                            "periodic conditions need a periodic grid, face {} has no partner \
                             (set periodic_extension=true)",
                            face
                        ))
                    })?;
                    let offset = match side {
                        _ if axis != pdd => 0.0,
                        Side::Low => pressure_drop,
                        Side::High => -pressure_drop,
                    };
                    FlowBc::Periodic { partner, offset }
                }
            };
            conditions.insert(face, bc);
        }
    }

    debug!(
        "{} conditions along axis {}: {} boundary faces, {} boundary ids",
        effective,
        pdd,
        conditions.len(),
        canonical.len()
    );
    Ok(BoundaryConditions {
        canonical,
        conditions,
        boundary_saturation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{CartesianGrid, GridOptions};

    fn periodic_grid() -> CartesianGrid {
        CartesianGrid::uniform(
            [2, 2, 2],
            [1.0; 3],
            GridOptions {
                use_unique_boundary_ids: true,
                periodic_extension: true,
            },
        )
        .unwrap()
    }

    #[test]
    fn canonical_ids_round_trip() {
        for axis in 0..DIMENSION {
            for side in [Side::Low, Side::High] {
                let id = CanonicalBoundaryId::new(axis, side);
                assert_eq!(id.raw(), 2 * axis + side.index() + 1);
                assert_eq!(id.axis_side(), Some((axis, side)));
            }
        }
        assert_eq!(CanonicalBoundaryId::NONE.axis_side(), None);
    }

    #[test]
    fn bc_type_from_integer() {
        assert_eq!(
            BoundaryConditionType::try_from(1).unwrap(),
            BoundaryConditionType::Linear
        );
        assert!(matches!(
            BoundaryConditionType::try_from(3),
            Err(ConfigError::UnknownBoundaryType(3))
        ));
        assert!(BoundaryConditionType::try_from(-1).is_err());
    }

    #[test]
    fn fixed_conditions_close_the_sides() {
        let grid = CartesianGrid::uniform([2, 1, 1], [1.0; 3], GridOptions::default()).unwrap();
        let bc =
            setup_upscaling_conditions(&grid, BoundaryConditionType::Fixed, 0, 1.0, 1.0, false)
                .unwrap();
        for cell in grid.cells() {
            for face in grid.boundary_faces(cell) {
                let id = bc.canonical_boundary_id(grid.boundary_id(face));
                let expected = match id.axis_side().unwrap() {
                    (0, Side::Low) => FlowBc::Dirichlet(1.0),
                    (0, Side::High) => FlowBc::Dirichlet(0.0),
                    _ => FlowBc::NoFlow,
                };
                assert_eq!(bc.condition(face), expected);
            }
        }
        assert_eq!(bc.canonical_boundary_id(99), CanonicalBoundaryId::NONE);
    }

    #[test]
    fn linear_pressure_follows_the_drop_direction() {
        let grid = CartesianGrid::uniform([2, 2, 1], [1.0; 3], GridOptions::default()).unwrap();
        let bc =
            setup_upscaling_conditions(&grid, BoundaryConditionType::Linear, 1, 2.0, 1.0, false)
                .unwrap();
        for cell in grid.cells() {
            for face in grid.boundary_faces(cell) {
                let y = grid.face_centroid(face)[1];
                assert_eq!(bc.condition(face), FlowBc::Dirichlet(2.0 * (2.0 - y) / 2.0));
            }
        }
    }

    #[test]
    fn periodic_offsets_only_along_drop_direction() {
        let grid = periodic_grid();
        let bc =
            setup_upscaling_conditions(&grid, BoundaryConditionType::Periodic, 2, 1.0, 1.0, false)
                .unwrap();
        assert!(!bc.has_dirichlet());
        for cell in grid.cells() {
            for face in grid.boundary_faces(cell) {
                let (axis, side) = bc
                    .canonical_boundary_id(grid.boundary_id(face))
                    .axis_side()
                    .unwrap();
                match bc.condition(face) {
                    FlowBc::Periodic { partner, offset } => {
                        assert_eq!(Some(partner), grid.periodic_partner(face));
                        let expected = match (axis, side) {
                            (2, Side::Low) => 1.0,
                            (2, Side::High) => -1.0,
                            _ => 0.0,
                        };
                        assert_eq!(offset, expected);
                    }
                    other => panic!("expected periodic condition, got {:?}", other),
                }
            }
        }
    }

    #[test]
    fn periodic_needs_partners() {
        let grid = CartesianGrid::uniform([1, 1, 1], [1.0; 3], GridOptions::default()).unwrap();
        let err =
            setup_upscaling_conditions(&grid, BoundaryConditionType::Periodic, 0, 1.0, 1.0, false)
                .unwrap_err();
        assert!(matches!(err, UpscaleError::Config(_)));
    }

    #[test]
    fn twodim_hack_closes_third_axis() {
        let grid = periodic_grid();
        let bc =
            setup_upscaling_conditions(&grid, BoundaryConditionType::Linear, 0, 1.0, 1.0, true)
                .unwrap();
        let top = grid.faces(grid.cell_index([0, 0, 1])).nth(5).unwrap();
        assert_eq!(bc.condition(top), FlowBc::NoFlow);

        let bc =
            setup_upscaling_conditions(&grid, BoundaryConditionType::Periodic, 2, 1.0, 1.0, true)
                .unwrap();
        assert_eq!(bc.condition(top), FlowBc::Dirichlet(0.0));
    }
}
