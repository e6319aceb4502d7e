// Error types

use std::io;

/// Configuration errors: missing or malformed parameters and inconsistent
/// grid/property input.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required parameter '{0}'")]
    Missing(String),

    #[error("invalid value '{value}' for parameter '{key}': {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("malformed parameter token '{0}', expected key=value")]
    Malformed(String),

    #[error("unknown boundary condition type {0}, expected 0 (fixed), 1 (linear) or 2 (periodic)")]
    UnknownBoundaryType(i32),

    #[error("{0}")]
    Inconsistent(String),

    #[error("could not read parameter file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Linear/pressure solver failures.
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error("solve called before the solver was initialised")]
    NotInitialised,

    #[error(
        "conjugate gradients did not converge in {iterations} iterations \
         (relative residual {residual:.3e})"
    )]
    NotConverged { iterations: usize, residual: f64 },

    #[error("conjugate gradients broke down at iteration {0}")]
    Breakdown(usize),

    #[error("{what} has length {actual}, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        actual: usize,
        expected: usize,
    },
}

/// Errors raised while reading `.grdecl` input.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("keyword {keyword}: cannot parse '{token}' as a number")]
    BadNumber { keyword: String, token: String },

    #[error("keyword {keyword}: repeat count without a value in '{token}'")]
    BadRepeat { keyword: String, token: String },

    #[error("keyword {0}: data section not terminated by '/'")]
    Unterminated(String),

    #[error("unexpected data token '{0}' outside a keyword section")]
    StrayData(String),
}

/// Top-level error of the upscaling run. Every variant aborts the run.
#[derive(Debug, thiserror::Error)]
pub enum UpscaleError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("solver error: {0}")]
    Solver(#[from] SolverError),

    #[error("grdecl parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("boundary topology error: {0}")]
    Topology(String),

    #[error("no boundary area on side {side} of axis {axis}")]
    Geometry { axis: usize, side: usize },
}

pub type Result<T, E = UpscaleError> = std::result::Result<T, E>;
