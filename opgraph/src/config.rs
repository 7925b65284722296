//! Execution configuration handed to a net when it is built.

use std::env;

use serde::{Deserialize, Serialize};

/// Environment variable read by [`ExecutionConfig::from_env`] to enable profiler ranges.
pub const PROFILER_RANGES_ENV: &str = "OPGRAPH_PROFILER_RANGES";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Open a profiler range around every operator run.
    #[serde(default)]
    pub profiler_ranges: bool,
}

impl ExecutionConfig {
    pub fn with_profiler_ranges(self, profiler_ranges: bool) -> Self {
        Self { profiler_ranges }
    }

    /// Reads the configuration from the process environment, falling back to the defaults
    /// for unset or unparsable values.
    pub fn from_env() -> Self {
        let profiler_ranges = env::var(PROFILER_RANGES_ENV)
            .ok()
            .and_then(|val| parse_flag(&val))
            .unwrap_or_default();
        Self { profiler_ranges }
    }
}

fn parse_flag(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
