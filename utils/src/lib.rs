//! Small helpers shared by the workspace crates: wall-clock timing, process
//! memory reporting and human readable number formatting.

pub mod memory;
pub mod timer;

pub use memory::{MemoryUsage, log_memory_usage};
pub use timer::Timer;

use thousands::Separable;

/// Formats an integer count with thousands separators, e.g. `1,234,567`.
pub fn human_count(count: u64) -> String {
    count.separate_with_commas()
}
