// library

pub mod boundary;
pub mod eclipse;
pub mod error;
pub mod grid;
pub mod params;
pub mod rock;
pub mod setup;
pub mod solver;
pub mod upscaler;

pub use boundary::{BoundaryConditionType, CanonicalBoundaryId};
pub use error::{ConfigError, ParseError, SolverError, UpscaleError};
pub use grid::{CartesianGrid, GridInterface, DIMENSION};
pub use params::ParameterGroup;
pub use rock::RockProperties;
pub use upscaler::{PermeabilityTensor, SinglePhaseUpscaler, UpscalingSettings};

#[cfg(feature = "python")]
mod python {
    use super::{ParameterGroup, SinglePhaseUpscaler, UpscaleError};
    use numpy::{IntoPyArray, PyArray2};
    use pyo3::{
        exceptions::{PyRuntimeError, PyValueError},
        pymodule,
        types::PyModule,
        PyErr, PyResult, Python,
    };
    use std::collections::HashMap;

    fn to_py_err(err: UpscaleError) -> PyErr {
        match err {
            UpscaleError::Config(_) | UpscaleError::Parse(_) => {
                PyValueError::new_err(err.to_string())
            }
            _ => PyRuntimeError::new_err(err.to_string()),
        }
    }

    #[pymodule]
    fn permupscale(_py: Python, m: &PyModule) -> PyResult<()> {
        //wrapper
        #[pyfn(m)]
        #[pyo3(name = "upscale_single_phase")]
        fn upscale_single_phase_py<'py>(
            py: Python<'py>,
            params: HashMap<String, String>,
        ) -> PyResult<&'py PyArray2<f64>> {
            let params = ParameterGroup::from_pairs(params);
            let mut upscaler = SinglePhaseUpscaler::init(&params).map_err(to_py_err)?;
            let k = upscaler.upscale_single_phase().map_err(to_py_err)?;
            Ok(k.into_pyarray(py))
        }

        Ok(())
    }
}
