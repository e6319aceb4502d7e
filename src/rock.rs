// Rock and fluid properties

use crate::error::ConfigError;
use crate::grid::{CellId, DIMENSION};
use ndarray::{Array1, Array2, ArrayView1};

/// Per-cell rock properties plus the properties of the single flowing phase.
///
/// Permeability is diagonal per cell (`kx, ky, kz`); any consistent unit
/// system works, the upscaled tensor comes back in the same units.
#[derive(Debug, Clone)]
pub struct RockProperties {
    permeability: Array2<f64>,
    porosity: Array1<f64>,
    viscosity: f64,
    density: f64,
}

impl RockProperties {
    /// # Arguments
    /// * permeability: `(num_cells, 3)` array of diagonal permeabilities
    /// * porosity: per-cell porosity
    /// * viscosity: viscosity of the flowing phase
    /// * density: density of the flowing phase, used only by the gravity term
    pub fn new(
        permeability: Array2<f64>,
        porosity: Array1<f64>,
        viscosity: f64,
        density: f64,
    ) -> Result<Self, ConfigError> {
        let num_cells = permeability.nrows();
        if permeability.ncols() != DIMENSION {
            return Err(ConfigError::Inconsistent(format!(
                "permeability has {} components per cell, expected {}",
                permeability.ncols(),
                DIMENSION
            )));
        }
        if porosity.len() != num_cells {
            return Err(ConfigError::Inconsistent(format!(
                "porosity has {} values for {} cells",
                porosity.len(),
                num_cells
            )));
        }
        if permeability.iter().any(|k| !(*k >= 0.0)) {
            return Err(ConfigError::Inconsistent(
                "permeability values must be non-negative".to_string(),
            ));
        }
        if !(viscosity > 0.0) {
            return Err(ConfigError::InvalidValue {
                key: "viscosity".to_string(),
                value: viscosity.to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(Self {
            permeability,
            porosity,
            viscosity,
            density,
        })
    }

    /// Same diagonal permeability in every cell, unit porosity.
    pub fn homogeneous(
        num_cells: usize,
        k: [f64; DIMENSION],
        viscosity: f64,
    ) -> Result<Self, ConfigError> {
        let permeability = Array2::from_shape_fn((num_cells, DIMENSION), |(_, a)| k[a]);
        Self::new(permeability, Array1::ones(num_cells), viscosity, 0.0)
    }

    pub fn num_cells(&self) -> usize {
        self.permeability.nrows()
    }

    pub fn permeability(&self, cell: CellId) -> ArrayView1<'_, f64> {
        self.permeability.row(cell)
    }

    pub fn porosity(&self, cell: CellId) -> f64 {
        self.porosity[cell]
    }

    pub fn viscosity_first_phase(&self) -> f64 {
        self.viscosity
    }

    pub fn density_first_phase(&self) -> f64 {
        self.density
    }

    /// Mobility $\lambda = k_r(s) / \mu$ with a linear relative permeability.
    pub fn mobility(&self, saturation: f64) -> f64 {
        saturation / self.viscosity
    }
}
