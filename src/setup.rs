// Grid and property construction from parameters

use crate::eclipse::EclipseGridParser;
use crate::error::{ConfigError, Result};
use crate::grid::{CartesianGrid, GridInterface, GridOptions, DIMENSION};
use crate::params::ParameterGroup;
use crate::rock::RockProperties;
use log::{debug, info};
use ndarray::{Array1, Array2};

/// Build the grid and rock properties described by `params`.
///
/// `fileformat=cartesian` (default) describes a uniform box with `nx, ny, nz`,
/// `dx, dy, dz` and a scalar `permeability` (per-axis overrides
/// `permeability_x/y/z`). `fileformat=eclipse` reads `filename` as a `.grdecl`
/// file with `SPECGRID`/`DIMENS`, `DXV/DYV/DZV`, `PERMX` and optionally
/// `PERMY`, `PERMZ`, `PORO`.
pub fn setup_grid_and_props(params: &ParameterGroup) -> Result<(CartesianGrid, RockProperties)> {
    let options = GridOptions {
        use_unique_boundary_ids: params.get_default("use_unique_boundary_ids", false)?,
        periodic_extension: params.get_default("periodic_extension", false)?,
    };
    let viscosity = params.get_default("viscosity", 1.0)?;
    let density = params.get_default("density", 1000.0)?;

    let fileformat: String = params.get_default("fileformat", "cartesian".to_string())?;
    let (grid, permeability, porosity) = match fileformat.as_str() {
        "cartesian" => cartesian_box(params, options)?,
        "eclipse" => {
            let filename: String = params.get("filename")?;
            info!("reading grid from {}", filename);
            let parser = EclipseGridParser::from_file(&filename)?;
            eclipse_box(&parser, options)?
        }
        other => {
            return Err(ConfigError::InvalidValue {
                key: "fileformat".to_string(),
                value: other.to_string(),
                reason: "expected 'cartesian' or 'eclipse'".to_string(),
            }
            .into())
        }
    };

    let rock = RockProperties::new(permeability, porosity, viscosity, density)?;
    debug!(
        "grid {:?} with {} cells, pore volume {}, options {:?}",
        grid.dims(),
        grid.num_cells(),
        pore_volume(&grid, &rock),
        options
    );
    Ok((grid, rock))
}

/// Sum of porosity times bulk volume over all cells.
pub fn pore_volume<G: GridInterface>(grid: &G, rock: &RockProperties) -> f64 {
    grid.cells()
        .map(|cell| rock.porosity(cell) * grid.cell_volume(cell))
        .sum()
}

pub type GridAndArrays = (CartesianGrid, Array2<f64>, Array1<f64>);

fn cartesian_box(params: &ParameterGroup, options: GridOptions) -> Result<GridAndArrays> {
    let dims = [
        params.get_default("nx", 1usize)?,
        params.get_default("ny", 1usize)?,
        params.get_default("nz", 1usize)?,
    ];
    let spacing = [
        params.get_default("dx", 1.0)?,
        params.get_default("dy", 1.0)?,
        params.get_default("dz", 1.0)?,
    ];
    let k: f64 = params.get_default("permeability", 1.0)?;
    let k_axis = [
        params.get_default("permeability_x", k)?,
        params.get_default("permeability_y", k)?,
        params.get_default("permeability_z", k)?,
    ];
    let porosity: f64 = params.get_default("porosity", 1.0)?;

    let grid = CartesianGrid::uniform(dims, spacing, options)?;
    let n = grid.num_cells();
    let permeability = Array2::from_shape_fn((n, DIMENSION), |(_, a)| k_axis[a]);
    Ok((grid, permeability, Array1::from_elem(n, porosity)))
}

/// Grid and arrays from parsed `.grdecl` data.
pub fn eclipse_box(parser: &EclipseGridParser, options: GridOptions) -> Result<GridAndArrays> {
    let dims_field = if parser.has_field("SPECGRID") {
        parser.integer_value("SPECGRID")
    } else {
        parser.integer_value("DIMENS")
    };
    if dims_field.len() < DIMENSION || dims_field[..DIMENSION].iter().any(|&d| d <= 0) {
        return Err(ConfigError::Inconsistent(
            "grid dimensions need SPECGRID or DIMENS with three positive values".to_string(),
        )
        .into());
    }
    let dims: Vec<usize> = dims_field[..DIMENSION].iter().map(|&d| d as usize).collect();

    if !parser.has_fields(&["DXV", "DYV", "DZV"]) {
        return Err(ConfigError::Inconsistent(
            "only tensor grids given by DXV, DYV and DZV are supported".to_string(),
        )
        .into());
    }
    let mut widths: [Vec<f64>; DIMENSION] = Default::default();
    for (axis, keyword) in ["DXV", "DYV", "DZV"].iter().enumerate() {
        widths[axis] = sized_field(parser, keyword, dims[axis])?.to_vec();
    }
    let grid = CartesianGrid::from_widths(widths, options)?;
    let n = grid.num_cells();

    let permx = sized_field(parser, "PERMX", n)?;
    let permy = optional_field(parser, "PERMY", n)?.unwrap_or(permx);
    let permz = optional_field(parser, "PERMZ", n)?.unwrap_or(permx);
    let components = [permx, permy, permz];
    let permeability = Array2::from_shape_fn((n, DIMENSION), |(c, a)| components[a][c]);

    let porosity = match optional_field(parser, "PORO", n)? {
        Some(poro) => Array1::from(poro.to_vec()),
        None => Array1::ones(n),
    };
    Ok((grid, permeability, porosity))
}

fn sized_field<'a>(parser: &'a EclipseGridParser, keyword: &str, len: usize) -> Result<&'a [f64]> {
    optional_field(parser, keyword, len)?
        .ok_or_else(|| ConfigError::Missing(keyword.to_string()).into())
}

fn optional_field<'a>(
    parser: &'a EclipseGridParser,
    keyword: &str,
    len: usize,
) -> Result<Option<&'a [f64]>> {
    if !parser.has_field(keyword) {
        return Ok(None);
    }
    let values = parser.floating_point_value(keyword);
    if values.len() != len {
        return Err(ConfigError::Inconsistent(format!(
            "{} has {} values, expected {}",
            keyword,
            values.len(),
            len
        ))
        .into());
    }
    Ok(Some(values))
}
