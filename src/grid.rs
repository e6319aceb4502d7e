// Grid topology and geometry

use crate::error::ConfigError;
use std::collections::HashMap;

/// Spatial dimension of every grid handled by the crate.
pub const DIMENSION: usize = 3;

pub type CellId = usize;
pub type FaceId = usize;
pub type Point = [f64; DIMENSION];

/// Read-only view of a grid as seen by the upscaling engine and flow solver.
///
/// Faces are half-faces: every cell owns its own faces, and a face between
/// two cells appears once in each cell's face list. Normals point out of the
/// owning cell.
pub trait GridInterface {
    fn num_cells(&self) -> usize;

    /// Total number of half-faces; face ids run over `0..num_faces()`.
    fn num_faces(&self) -> usize;

    fn cells(&self) -> impl Iterator<Item = CellId> + '_ {
        0..self.num_cells()
    }

    fn faces(&self, cell: CellId) -> impl Iterator<Item = FaceId> + '_;

    fn boundary_faces(&self, cell: CellId) -> impl Iterator<Item = FaceId> + '_ {
        self.faces(cell).filter(move |&f| self.is_boundary(f))
    }

    fn face_cell(&self, face: FaceId) -> CellId;

    /// Cell on the other side of `face`, `None` on the grid boundary.
    fn neighbour(&self, face: FaceId) -> Option<CellId>;

    fn is_boundary(&self, face: FaceId) -> bool {
        self.neighbour(face).is_none()
    }

    /// Raw, grid-specific boundary id. Zero for interior faces.
    fn boundary_id(&self, face: FaceId) -> usize;

    fn face_area(&self, face: FaceId) -> f64;
    fn face_centroid(&self, face: FaceId) -> Point;
    fn face_normal(&self, face: FaceId) -> Point;

    fn cell_centroid(&self, cell: CellId) -> Point;
    fn cell_volume(&self, cell: CellId) -> f64;

    /// Boundary face on the opposite side of a periodic grid.
    fn periodic_partner(&self, _face: FaceId) -> Option<FaceId> {
        None
    }

    /// Lower and upper corner of the axis-aligned box around the grid.
    fn bounding_box(&self) -> (Point, Point);
}

/// Construction options for [`CartesianGrid`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GridOptions {
    /// Give every boundary face its own raw boundary id.
    pub use_unique_boundary_ids: bool,
    /// Pair opposite boundary faces so that periodic conditions can be imposed.
    pub periodic_extension: bool,
}

/// Rectilinear grid built from per-axis cell widths, cells ordered with `i`
/// fastest and `k` slowest.
///
/// Each cell owns six faces with local index `2*axis + side` (side 0 is the
/// low face along `axis`, side 1 the high face).
#[derive(Debug, Clone)]
pub struct CartesianGrid {
    dims: [usize; DIMENSION],
    // node coordinates along each axis, `dims[a] + 1` entries
    nodes: [Vec<f64>; DIMENSION],
    boundary_ids: HashMap<FaceId, usize>,
    partners: HashMap<FaceId, FaceId>,
}

const FACES_PER_CELL: usize = 2 * DIMENSION;

impl CartesianGrid {
    /// Grid with `widths[a][i]` the width of the `i`-th cell layer along axis `a`.
    pub fn from_widths(
        widths: [Vec<f64>; DIMENSION],
        options: GridOptions,
    ) -> Result<Self, ConfigError> {
        let mut nodes: [Vec<f64>; DIMENSION] = Default::default();
        let mut dims = [0; DIMENSION];
        for axis in 0..DIMENSION {
            if widths[axis].is_empty() {
                return Err(ConfigError::Inconsistent(format!(
                    "grid has no cells along axis {}",
                    axis
                )));
            }
            if let Some(w) = widths[axis].iter().find(|w| !(**w > 0.0)) {
                return Err(ConfigError::Inconsistent(format!(
                    "cell width {} along axis {} is not positive",
                    w, axis
                )));
            }
            dims[axis] = widths[axis].len();
            nodes[axis] = std::iter::once(0.0)
                .chain(widths[axis].iter().scan(0.0, |acc, w| {
                    *acc += w;
                    Some(*acc)
                }))
                .collect();
        }

        let mut grid = Self {
            dims,
            nodes,
            boundary_ids: HashMap::new(),
            partners: HashMap::new(),
        };
        grid.label_boundary(options);
        Ok(grid)
    }

    /// Uniform grid of `dims` cells of size `spacing`.
    pub fn uniform(
        dims: [usize; DIMENSION],
        spacing: [f64; DIMENSION],
        options: GridOptions,
    ) -> Result<Self, ConfigError> {
        let widths = [
            vec![spacing[0]; dims[0]],
            vec![spacing[1]; dims[1]],
            vec![spacing[2]; dims[2]],
        ];
        Self::from_widths(widths, options)
    }

    /// Move every node by `offset`.
    pub fn translated(mut self, offset: Point) -> Self {
        for (axis, nodes) in self.nodes.iter_mut().enumerate() {
            nodes.iter_mut().for_each(|x| *x += offset[axis]);
        }
        self
    }

    pub fn dims(&self) -> [usize; DIMENSION] {
        self.dims
    }

    pub fn cell_index(&self, ijk: [usize; DIMENSION]) -> CellId {
        ijk[0] + self.dims[0] * (ijk[1] + self.dims[1] * ijk[2])
    }

    pub fn cell_ijk(&self, cell: CellId) -> [usize; DIMENSION] {
        let i = cell % self.dims[0];
        let j = (cell / self.dims[0]) % self.dims[1];
        let k = cell / (self.dims[0] * self.dims[1]);
        [i, j, k]
    }

    fn face_of(&self, cell: CellId, axis: usize, side: usize) -> FaceId {
        cell * FACES_PER_CELL + 2 * axis + side
    }

    fn decode_face(face: FaceId) -> (CellId, usize, usize) {
        let local = face % FACES_PER_CELL;
        (face / FACES_PER_CELL, local / 2, local % 2)
    }

    fn width(&self, axis: usize, index: usize) -> f64 {
        self.nodes[axis][index + 1] - self.nodes[axis][index]
    }

    fn centre(&self, axis: usize, index: usize) -> f64 {
        0.5 * (self.nodes[axis][index] + self.nodes[axis][index + 1])
    }

    /// Cell across the given face, ignoring periodicity.
    fn step(&self, cell: CellId, axis: usize, side: usize) -> Option<CellId> {
        let mut ijk = self.cell_ijk(cell);
        if side == 0 {
            ijk[axis] = ijk[axis].checked_sub(1)?;
        } else {
            ijk[axis] += 1;
            if ijk[axis] == self.dims[axis] {
                return None;
            }
        }
        Some(self.cell_index(ijk))
    }

    fn label_boundary(&mut self, options: GridOptions) {
        let mut next_unique = 1;
        for cell in 0..self.num_cells() {
            for axis in 0..DIMENSION {
                for side in 0..2 {
                    if self.step(cell, axis, side).is_some() {
                        continue;
                    }
                    let face = self.face_of(cell, axis, side);
                    if options.use_unique_boundary_ids {
                        self.boundary_ids.insert(face, next_unique);
                        next_unique += 1;
                    } else {
                        self.boundary_ids.insert(face, 2 * axis + side + 1);
                    }

                    if options.periodic_extension {
                        let mut ijk = self.cell_ijk(cell);
                        ijk[axis] = if side == 0 { self.dims[axis] - 1 } else { 0 };
                        let opposite = self.face_of(self.cell_index(ijk), axis, 1 - side);
                        self.partners.insert(face, opposite);
                    }
                }
            }
        }
    }
}

impl GridInterface for CartesianGrid {
    fn num_cells(&self) -> usize {
        self.dims.iter().product()
    }

    fn num_faces(&self) -> usize {
        self.num_cells() * FACES_PER_CELL
    }

    fn faces(&self, cell: CellId) -> impl Iterator<Item = FaceId> + '_ {
        cell * FACES_PER_CELL..(cell + 1) * FACES_PER_CELL
    }

    fn face_cell(&self, face: FaceId) -> CellId {
        face / FACES_PER_CELL
    }

    fn neighbour(&self, face: FaceId) -> Option<CellId> {
        let (cell, axis, side) = Self::decode_face(face);
        self.step(cell, axis, side)
    }

    fn boundary_id(&self, face: FaceId) -> usize {
        self.boundary_ids.get(&face).copied().unwrap_or(0)
    }

    fn face_area(&self, face: FaceId) -> f64 {
        let (cell, axis, _) = Self::decode_face(face);
        let ijk = self.cell_ijk(cell);
        (0..DIMENSION)
            .filter(|&a| a != axis)
            .map(|a| self.width(a, ijk[a]))
            .product()
    }

    fn face_centroid(&self, face: FaceId) -> Point {
        let (cell, axis, side) = Self::decode_face(face);
        let ijk = self.cell_ijk(cell);
        let mut centroid = self.cell_centroid(cell);
        centroid[axis] = self.nodes[axis][ijk[axis] + side];
        centroid
    }

    fn face_normal(&self, face: FaceId) -> Point {
        let (_, axis, side) = Self::decode_face(face);
        let mut normal = [0.0; DIMENSION];
        normal[axis] = if side == 0 { -1.0 } else { 1.0 };
        normal
    }

    fn cell_centroid(&self, cell: CellId) -> Point {
        let ijk = self.cell_ijk(cell);
        [
            self.centre(0, ijk[0]),
            self.centre(1, ijk[1]),
            self.centre(2, ijk[2]),
        ]
    }

    fn cell_volume(&self, cell: CellId) -> f64 {
        let ijk = self.cell_ijk(cell);
        (0..DIMENSION).map(|a| self.width(a, ijk[a])).product()
    }

    fn periodic_partner(&self, face: FaceId) -> Option<FaceId> {
        self.partners.get(&face).copied()
    }

    fn bounding_box(&self) -> (Point, Point) {
        let mut lo = [0.0; DIMENSION];
        let mut hi = [0.0; DIMENSION];
        for axis in 0..DIMENSION {
            lo[axis] = self.nodes[axis][0];
            hi[axis] = self.nodes[axis][self.dims[axis]];
        }
        (lo, hi)
    }
}
