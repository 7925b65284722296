//! Sequential execution and benchmarking of operator graphs.
//!
//! A [`NetSpec`] lists operators in execution order. [`SimpleNet`] instantiates them through
//! an [`OperatorFactory`], runs them one after the other and stops at the first failure. The
//! benchmark harness times whole runs and individual operators and aggregates per operator
//! type statistics, see [`benchmark`].

pub mod benchmark;
pub mod config;
pub mod error;
pub mod net;
pub mod observer;
pub mod operator;
pub mod ops;
pub mod registry;
pub mod schema;
pub mod spec;
pub mod testing;
pub mod trace;

pub use benchmark::{BenchmarkReport, Metric};
pub use config::ExecutionConfig;
pub use error::NetError;
pub use net::{Net, SimpleNet};
pub use observer::NetObserver;
pub use operator::{Operator, OperatorFactory};
pub use registry::{NetRegistry, SIMPLE_NET_TYPE};
pub use schema::{Cost, OpSchema, SchemaRegistry, TensorShape};
pub use spec::{DeviceOption, DeviceType, NetSpec, OperatorSpec};
