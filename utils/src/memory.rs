//! Process memory reporting.

use bytesize::ByteSize;
use tracing::{info, warn};

/// Snapshot of the memory held by the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub physical: ByteSize,
    pub virtual_mem: ByteSize,
}

impl MemoryUsage {
    /// Returns `None` on platforms where the statistics are not available.
    pub fn current() -> Option<Self> {
        memory_stats::memory_stats().map(|stats| Self {
            physical: ByteSize::b(stats.physical_mem as u64),
            virtual_mem: ByteSize::b(stats.virtual_mem as u64),
        })
    }
}

/// Logs the current memory usage, tagged with `label`.
pub fn log_memory_usage(label: &str) {
    match MemoryUsage::current() {
        Some(usage) => info!(
            "{label}: physical memory {}, virtual memory {}",
            usage.physical, usage.virtual_mem
        ),
        None => warn!("{label}: memory statistics unavailable"),
    }
}
