//! Registry of net execution strategies, keyed by the net type name found in a [`NetSpec`].

use std::{collections::BTreeMap, sync::Arc};

use tracing::debug;

use crate::{
    config::ExecutionConfig,
    error::NetError,
    net::{Net, SimpleNet},
    operator::OperatorFactory,
    spec::NetSpec,
    trace::{LogTraceEvents, SpanProfiler},
};

/// Name of the sequential execution strategy implemented by [`SimpleNet`].
pub const SIMPLE_NET_TYPE: &str = "simple";

/// Builds a net of a given strategy from its spec.
pub type NetConstructor<W> = fn(
    Arc<NetSpec>,
    &W,
    &dyn OperatorFactory<W>,
    ExecutionConfig,
) -> Result<Box<dyn Net>, NetError>;

pub struct NetRegistry<W> {
    constructors: BTreeMap<String, NetConstructor<W>>,
}

impl<W> Default for NetRegistry<W> {
    fn default() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }
}

impl<W> NetRegistry<W> {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry knowing the strategies of this crate, i.e. [`SIMPLE_NET_TYPE`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(SIMPLE_NET_TYPE, simple_net::<W>);
        registry
    }

    /// Registers `constructor` under `net_type`, replacing any previous registration.
    pub fn register<S: Into<String>>(&mut self, net_type: S, constructor: NetConstructor<W>) {
        self.constructors.insert(net_type.into(), constructor);
    }

    pub fn contains(&self, net_type: &str) -> bool {
        self.constructors.contains_key(net_type)
    }

    pub fn net_types(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }

    /// Builds the net described by `net_def` with the strategy named by its net type.
    pub fn create_net(
        &self,
        net_def: Arc<NetSpec>,
        ws: &W,
        factory: &dyn OperatorFactory<W>,
        config: ExecutionConfig,
    ) -> Result<Box<dyn Net>, NetError> {
        let net_type = net_def.net_type().to_string();
        let constructor = self
            .constructors
            .get(&net_type)
            .ok_or_else(|| NetError::UnknownNetType(net_type.clone()))?;
        debug!("Creating net {} of type {net_type}", net_def.name);
        constructor(net_def, ws, factory, config)
    }
}

/// Nets built through the registry report their profiler ranges as `tracing` spans and
/// their operator events on [`TRACE_TARGET`](crate::trace::TRACE_TARGET).
fn simple_net<W>(
    net_def: Arc<NetSpec>,
    ws: &W,
    factory: &dyn OperatorFactory<W>,
    config: ExecutionConfig,
) -> Result<Box<dyn Net>, NetError> {
    let net = SimpleNet::new(net_def, ws, factory)?
        .with_config(config)
        .with_profiler(SpanProfiler::new())
        .with_trace_events(LogTraceEvents);
    Ok(Box::new(net))
}
