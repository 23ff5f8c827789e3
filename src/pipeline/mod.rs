pub mod arbiter;
pub mod config;
pub mod crossbar;
pub mod hazard;
pub mod lane;
pub mod stage;
pub mod stages;

pub use config::PipelineConfig;
pub use crossbar::{Crossbar, CrossbarConfig, Packet};
pub use lane::{Lane, LaneEnv};

#[cfg(test)]
mod unit_tests;
