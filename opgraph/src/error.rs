//! Module containing the [`NetError`] type returned by net construction, execution and
//! benchmarking.

/// Errors relating to [`crate::net::SimpleNet`] and the [`crate::registry::NetRegistry`].
#[derive(thiserror::Error, Debug)]
pub enum NetError {
    /// A benchmark was requested with a negative number of runs.
    #[error("Number of {kind} runs should be non negative, provided {value}.")]
    InvalidRunCount { kind: RunKind, value: i32 },
    /// The factory could not instantiate an operator; the net is unusable.
    #[error("Failed to create operator #{position} ({op_type}): {cause:#}")]
    OperatorCreation {
        position: usize,
        op_type: String,
        cause: anyhow::Error,
    },
    /// An operator reported a failure while running.
    #[error("Operator #{position} {name}({op_type}) has failed: {cause:#}")]
    OperatorFailed {
        position: usize,
        name: String,
        op_type: String,
        cause: anyhow::Error,
    },
    #[error("Warmup run {iteration} has failed: {source}")]
    WarmupFailed {
        iteration: i32,
        #[source]
        source: Box<NetError>,
    },
    #[error("Main run {iteration} has failed: {source}")]
    MainRunFailed {
        iteration: i32,
        #[source]
        source: Box<NetError>,
    },
    #[error("Unknown net type {0:?}")]
    UnknownNetType(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, derive_more::Display)]
pub enum RunKind {
    #[display("warm up")]
    Warmup,
    #[display("main")]
    Main,
}

impl NetError {
    /// Position of the operator at the origin of this error, if any.
    pub fn failed_position(&self) -> Option<usize> {
        match self {
            NetError::OperatorCreation { position, .. }
            | NetError::OperatorFailed { position, .. } => Some(*position),
            NetError::WarmupFailed { source, .. } | NetError::MainRunFailed { source, .. } => {
                source.failed_position()
            }
            NetError::InvalidRunCount { .. } | NetError::UnknownNetType(_) => None,
        }
    }
}
