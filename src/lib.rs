pub mod base;
pub mod graph;
pub mod mem;
pub mod pipeline;
pub mod sim;
pub mod timeq;
pub mod ui;
