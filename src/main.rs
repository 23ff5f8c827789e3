use std::fs;

use anyhow::Context;
use clap::Parser;
use gsim::ui::{make_sim, GsimArgs};

pub fn main() -> anyhow::Result<()> {
    env_logger::init();

    let argv = GsimArgs::parse();
    let config = fs::read_to_string(&argv.config_path)
        .with_context(|| format!("failed to read config file {}", argv.config_path.display()))?;

    let mut sim = make_sim(&config, Some(argv))?;
    sim.simulate()?;
    Ok(())
}
