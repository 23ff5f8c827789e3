pub mod cache;
pub mod dram;
pub mod mshr;
pub mod request;
pub mod scratchpad;
pub mod stats;

pub use cache::{Cache, CacheConfig, Replacement};
pub use dram::{DramConfig, TimedDram};
pub use request::{completion, Completer, MemHandle, MemOp, MemStatus};
pub use scratchpad::{Scratchpad, ScratchpadConfig};
pub use stats::CacheStats;
