pub mod config;
pub mod log;
pub mod prefetch;
pub mod stats;
pub mod top;

#[cfg(test)]
mod tests;
