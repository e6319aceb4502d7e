// Command-line single-phase upscaling:
//
//   upscale_perm boundary_condition_type=0 nx=10 ny=10 nz=5 permeability=100
//   upscale_perm boundary_condition_type=2 fileformat=eclipse filename=model.grdecl

use anyhow::{Context, Result};
use env_logger::Env;
use permupscale::{ParameterGroup, SinglePhaseUpscaler, DIMENSION};

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let params = ParameterGroup::from_args(std::env::args().skip(1))
        .context("could not read parameters")?;
    let mut upscaler =
        SinglePhaseUpscaler::init(&params).context("could not set up the upscaling problem")?;
    let k = upscaler
        .upscale_single_phase()
        .context("upscaling failed")?;

    for i in 0..DIMENSION {
        let row: Vec<String> = (0..DIMENSION).map(|j| format!("{:>14.6e}", k[[i, j]])).collect();
        println!("{}", row.join(" "));
    }
    Ok(())
}
