use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::ensure;
use log::warn;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::*;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    #[default]
    Bfs,
    Cc,
    Sssp,
    Pr,
}

impl FromStr for AppKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "bfs" => Ok(Self::Bfs),
            "cc" => Ok(Self::Cc),
            "sssp" => Ok(Self::Sssp),
            "pr" => Ok(Self::Pr),
            _ => Err(format!(
                "unsupported app '{}', expected one of: bfs, cc, sssp, pr",
                value
            )),
        }
    }
}

impl fmt::Display for AppKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AppKind::Bfs => "bfs",
            AppKind::Cc => "cc",
            AppKind::Sssp => "sssp",
            AppKind::Pr => "pr",
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub graph: PathBuf,
    pub app: AppKind,
    /// Root vertex for BFS and SSSP.
    pub source: u64,
    pub max_iterations: u64,
    pub log_level: u64,
    pub logfile: Option<PathBuf>,
    /// Per-phase watchdog, in cycles.
    pub timeout: u64,
    /// Vertex property dump written after the run.
    pub result: Option<PathBuf>,
    pub stats_json: Option<PathBuf>,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> anyhow::Result<Self> {
        match section {
            Some(value) => Ok(value.clone().try_into()?),
            None => {
                warn!("config section not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            graph: PathBuf::new(),
            app: AppKind::Bfs,
            source: 0,
            max_iterations: 10000,
            log_level: 1,
            logfile: None,
            timeout: 10_000_000,
            result: None,
            stats_json: None,
        }
    }
}

impl SimConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.timeout > 0, "sim.timeout must be > 0");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_section_falls_back_to_defaults() {
        let config = SimConfig::from_section(None).unwrap();
        assert_eq!(AppKind::Bfs, config.app);
        assert_eq!(10000, config.max_iterations);
    }

    #[test]
    fn section_overrides_selected_fields() {
        let table: Table = toml::from_str("[sim]\napp = \"sssp\"\nsource = 3\n").unwrap();
        let config = SimConfig::from_section(table.get("sim")).unwrap();
        assert_eq!(AppKind::Sssp, config.app);
        assert_eq!(3, config.source);
        assert_eq!(10_000_000, config.timeout);
    }

    #[test]
    fn unknown_app_is_rejected() {
        assert!("bellman".parse::<AppKind>().is_err());
        assert_eq!(AppKind::Pr, "pr".parse::<AppKind>().unwrap());
    }
}
