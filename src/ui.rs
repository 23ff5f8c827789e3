use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use toml::Table;

use crate::graph::import::load_graph;
use crate::sim::config::AppKind;
use crate::sim::log::Logger;
use crate::sim::top::{MachineConfig, Sim};

#[derive(Parser)]
#[command(version, about)]
pub struct GsimArgs {
    #[arg(help = "Path to config.toml")]
    pub config_path: PathBuf,
    #[arg(long, help = "Override graph path (Matrix Market)")]
    pub graph: Option<PathBuf>,
    #[arg(long, help = "Override algorithm (bfs, cc, sssp, pr)")]
    pub app: Option<AppKind>,
    #[arg(long, help = "Override number of pipeline lanes")]
    pub num_lanes: Option<usize>,
    #[arg(long, help = "Override number of destination readers per lane")]
    pub num_dst_readers: Option<usize>,
    #[arg(long, help = "Override iteration cap")]
    pub max_iterations: Option<u64>,
    #[arg(long, help = "Enable log at level (0:none, 1:info, 2:debug)")]
    pub log: Option<u64>,
    #[arg(long, help = "Write vertex properties to this file after the run")]
    pub result: Option<PathBuf>,
    #[arg(long, help = "Write the report to this file instead of stdout")]
    pub logfile: Option<PathBuf>,
}

/// Parse the TOML configuration and apply CLI overrides on top.
pub fn make_config(toml_string: &str, cli_args: Option<GsimArgs>) -> anyhow::Result<MachineConfig> {
    let config_table: Table = toml::from_str(toml_string).context("cannot parse config toml")?;
    let mut config = MachineConfig::from_table(&config_table)?;

    // override toml configs with CLI args
    if let Some(args) = cli_args {
        let sim = &mut config.sim;
        sim.graph = args.graph.unwrap_or(sim.graph.clone());
        sim.app = args.app.unwrap_or(sim.app);
        sim.max_iterations = args.max_iterations.unwrap_or(sim.max_iterations);
        sim.log_level = args.log.unwrap_or(sim.log_level);
        sim.result = args.result.or(sim.result.take());
        sim.logfile = args.logfile.or(sim.logfile.take());
        let pipeline = &mut config.pipeline;
        pipeline.num_lanes = args.num_lanes.unwrap_or(pipeline.num_lanes);
        pipeline.num_dst_readers = args.num_dst_readers.unwrap_or(pipeline.num_dst_readers);
    }
    config.validate()?;
    Ok(config)
}

/// Make a Sim object from the TOML configuration, loading the graph it names.
/// If `cli_args` is given, override TOML options with CLI arguments.
pub fn make_sim(toml_string: &str, cli_args: Option<GsimArgs>) -> anyhow::Result<Sim> {
    let config = make_config(toml_string, cli_args)?;
    let logger = match &config.sim.logfile {
        Some(path) => Logger::to_file(config.sim.log_level, path)?,
        None => Logger::new(config.sim.log_level),
    };
    let graph = load_graph(&config.sim.graph)?;
    Sim::new(config, graph, Arc::new(logger))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> GsimArgs {
        let mut argv = vec!["gsim", "config.toml"];
        argv.extend_from_slice(extra);
        GsimArgs::parse_from(argv)
    }

    #[test]
    fn cli_overrides_toml() {
        let toml = "[sim]\napp = \"cc\"\nmax_iterations = 5\n[pipeline]\nnum_lanes = 2\n";
        let config = make_config(toml, Some(args(&["--app", "pr", "--num-lanes", "4"]))).unwrap();
        assert_eq!(AppKind::Pr, config.sim.app);
        assert_eq!(5, config.sim.max_iterations);
        assert_eq!(4, config.pipeline.num_lanes);
    }

    #[test]
    fn unknown_app_is_rejected_by_the_parser() {
        let parsed = GsimArgs::try_parse_from(["gsim", "config.toml", "--app", "dfs"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn demo_config_parses() {
        let config = make_config(include_str!("../demos/config.toml"), None).unwrap();
        assert_eq!(2, config.pipeline.num_lanes);
        assert_eq!(100, config.dram.read.base_latency);
    }

    #[test]
    fn invalid_section_fails_validation() {
        let toml = "[cache]\nways = 3\n";
        assert!(make_config(toml, None).is_err());
    }
}
