//! The [`Net`] trait and [`SimpleNet`], the sequential execution strategy: operators run one
//! after the other, in the order of their [`NetSpec`], and the first failure stops the run.

use std::sync::Arc;

use tracing::{debug, error};

use crate::{
    config::ExecutionConfig,
    error::NetError,
    observer::{NetObserver, ObserverList},
    operator::{Operator, OperatorFactory},
    schema::SchemaRegistry,
    spec::{DebugDef, NetSpec},
    trace::{
        Color, NoopProfiler, NoopTraceEvents, ProfiledRange, RangeProfiler, TraceEvents,
        TracePoint,
    },
};

/// An executable net built from a [`NetSpec`].
pub trait Net {
    fn name(&self) -> &str;

    /// Runs every operator once. Stops at the first failing operator.
    fn run(&mut self) -> Result<(), NetError>;

    /// Submits a run and waits for it. There is no overlap with the caller: this returns only
    /// once every operator completed or one of them failed, exactly like [`Net::run`].
    fn run_async(&mut self) -> Result<(), NetError> {
        self.run()
    }

    /// Benchmarks the net, see [`SimpleNet::benchmark_report`]. Returns the average
    /// milliseconds per main run followed by the average milliseconds of each operator.
    fn benchmark(
        &mut self,
        schemas: &SchemaRegistry,
        warmup_runs: i32,
        main_runs: i32,
        run_individual: bool,
    ) -> Result<Vec<f32>, NetError>;

    fn attach_observer(&mut self, observer: Box<dyn NetObserver>);

    /// Number of operators of the net.
    fn num_operators(&self) -> usize;
}

/// An instantiated operator together with the operator spec it was created from.
#[derive(Debug)]
pub struct NetOperator {
    pub(crate) def: DebugDef,
    pub(crate) op: Box<dyn Operator>,
}

impl NetOperator {
    pub fn debug_def(&self) -> &DebugDef {
        &self.def
    }
}

pub struct SimpleNet {
    pub(crate) name: String,
    pub(crate) operators: Vec<NetOperator>,
    observers: ObserverList,
    config: ExecutionConfig,
    profiler: Box<dyn RangeProfiler>,
    trace_events: Box<dyn TraceEvents>,
}

impl std::fmt::Debug for SimpleNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleNet")
            .field("name", &self.name)
            .field("operators", &self.operators)
            .field("observers", &self.observers)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SimpleNet {
    /// Instantiates every operator of `net_def`, in order, through `factory`.
    ///
    /// An operator without its own device option gets the net's default one, if any. Fails
    /// on the first operator the factory cannot create.
    pub fn new<W, F>(net_def: Arc<NetSpec>, ws: &W, factory: &F) -> Result<Self, NetError>
    where
        W: ?Sized,
        F: OperatorFactory<W> + ?Sized,
    {
        debug!("Constructing SimpleNet {}", net_def.name);
        let operators = net_def
            .resolved_operators()
            .enumerate()
            .map(|(position, def)| {
                debug!("Creating operator {}: {}", def.name, def.op_type);
                let op = factory
                    .create_operator(&def, ws, position)
                    .map_err(|cause| NetError::OperatorCreation {
                        position,
                        op_type: def.op_type.clone(),
                        cause,
                    })?;
                Ok(NetOperator { def, op })
            })
            .collect::<Result<Vec<_>, NetError>>()?;
        Ok(Self {
            name: net_def.name.clone(),
            operators,
            observers: ObserverList::default(),
            config: ExecutionConfig::default(),
            profiler: Box::new(NoopProfiler),
            trace_events: Box::new(NoopTraceEvents),
        })
    }

    pub fn with_config(self, config: ExecutionConfig) -> Self {
        Self { config, ..self }
    }

    /// Backend receiving the per operator ranges when [`ExecutionConfig::profiler_ranges`]
    /// is set.
    pub fn with_profiler<P: RangeProfiler + 'static>(self, profiler: P) -> Self {
        Self {
            profiler: Box::new(profiler),
            ..self
        }
    }

    pub fn with_trace_events<T: TraceEvents + 'static>(self, trace_events: T) -> Self {
        Self {
            trace_events: Box::new(trace_events),
            ..self
        }
    }

    pub fn with_observer<O: NetObserver + 'static>(mut self, observer: O) -> Self {
        self.observers.attach(Box::new(observer));
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn operators(&self) -> &[NetOperator] {
        &self.operators
    }

    pub fn num_observers(&self) -> usize {
        self.observers.len()
    }

    /// Removes and returns every observer attached to this net.
    pub fn detach_observers(&mut self) -> Vec<Box<dyn NetObserver>> {
        self.observers.detach_all()
    }

    pub fn run(&mut self) -> Result<(), NetError> {
        self.observers.start_all();
        debug!("Running net {}", self.name);
        for (position, op) in self.operators.iter_mut().enumerate() {
            let def = &op.def;
            debug!("Running operator {}({}).", def.name, def.op_type);
            let point = TracePoint {
                net_name: &self.name,
                op_name: &def.name,
                op_type: &def.op_type,
                op_id: position,
            };
            self.trace_events.operator_start(&point);
            let res = {
                let _range = ProfiledRange::new(
                    self.profiler.as_ref(),
                    self.config.profiler_ranges,
                    &def.op_type,
                    Color::Run,
                );
                op.op.run()
            };
            self.trace_events.operator_done(&point);
            if let Err(cause) = res {
                error!("Operator failed: {}", def.debug_string());
                return Err(NetError::OperatorFailed {
                    position,
                    name: def.name.clone(),
                    op_type: def.op_type.clone(),
                    cause,
                });
            }
        }
        self.observers.stop_all();
        Ok(())
    }
}

impl Net for SimpleNet {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> Result<(), NetError> {
        SimpleNet::run(self)
    }

    fn benchmark(
        &mut self,
        schemas: &SchemaRegistry,
        warmup_runs: i32,
        main_runs: i32,
        run_individual: bool,
    ) -> Result<Vec<f32>, NetError> {
        self.benchmark_report(schemas, warmup_runs, main_runs, run_individual)
            .map(|report| report.timings())
    }

    fn attach_observer(&mut self, observer: Box<dyn NetObserver>) {
        self.observers.attach(observer);
    }

    fn num_operators(&self) -> usize {
        self.operators.len()
    }
}

#[cfg(test)]
mod test {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::{
        spec::{DeviceOption, OperatorSpec},
        testing::{
            Journal, LogCapture, RecordingObserver, RecordingProfiler, RecordingTraceEvents,
            ScriptedFactory, scripted_net,
        },
    };

    fn spec(names: &[&str]) -> NetSpec {
        names.iter().fold(NetSpec::new("test_net"), |net, name| {
            net.with_op(
                OperatorSpec::new("Scripted", *name)
                    .with_inputs(["in"])
                    .with_outputs([format!("{name}_out")]),
            )
        })
    }

    #[test]
    fn test_construction_preserves_order() -> anyhow::Result<()> {
        let journal = Journal::default();
        let factory = ScriptedFactory::new();
        let net = SimpleNet::new(Arc::new(spec(&["a", "b", "c"])), &journal, &factory)?;
        assert_eq!(net.num_operators(), 3);
        let names = net
            .operators()
            .iter()
            .map(|op| op.debug_def().name.clone())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(net.operators().iter().all(|op| op.debug_def().is_shared()));
        Ok(())
    }

    #[test]
    fn test_construction_device_option() -> anyhow::Result<()> {
        let journal = Journal::default();
        let mut net_def = spec(&["a", "b"]).with_device_option(DeviceOption::cuda(3));
        net_def.ops[1].device_option = Some(DeviceOption::cpu());
        let factory = ScriptedFactory::new();
        let net = SimpleNet::new(Arc::new(net_def), &journal, &factory)?;
        assert_eq!(
            net.operators()[0].debug_def().device_option,
            Some(DeviceOption::cuda(3))
        );
        assert_eq!(
            net.operators()[1].debug_def().device_option,
            Some(DeviceOption::cpu())
        );
        // the factory saw the resolved specs
        assert_eq!(
            factory.created_device_options(),
            vec![Some(DeviceOption::cuda(3)), Some(DeviceOption::cpu())]
        );
        Ok(())
    }

    #[test]
    fn test_construction_failure() {
        let journal = Journal::default();
        let factory = ScriptedFactory::new().reject("b");
        let err = SimpleNet::new(Arc::new(spec(&["a", "b", "c"])), &journal, &factory).unwrap_err();
        assert!(matches!(err, NetError::OperatorCreation { position: 1, .. }));
        // nothing after the failing operator was created
        assert_eq!(factory.created(), vec!["a".to_string()]);
    }

    #[test]
    fn test_run_fail_fast() -> anyhow::Result<()> {
        let journal = Journal::default();
        let factory = ScriptedFactory::new().fail_on("c");
        let events = Rc::new(RefCell::new(Vec::new()));
        let mut net = SimpleNet::new(Arc::new(spec(&["a", "b", "c", "d"])), &journal, &factory)?
            .with_observer(RecordingObserver::new("obs", events.clone()));
        let err = net.run().unwrap_err();
        assert!(matches!(
            &err,
            NetError::OperatorFailed { position: 2, name, .. } if name == "c"
        ));
        assert_eq!(err.failed_position(), Some(2));
        // d never ran
        assert_eq!(journal.entries(), vec!["a", "b", "c"]);
        // observers were started but never stopped
        assert_eq!(*events.borrow(), vec!["obs:start".to_string()]);
        Ok(())
    }

    #[test]
    fn test_run_success_notifies_observers() -> anyhow::Result<()> {
        let journal = Journal::default();
        let events = Rc::new(RefCell::new(Vec::new()));
        let factory = ScriptedFactory::new();
        let mut net = SimpleNet::new(Arc::new(spec(&["a", "b"])), &journal, &factory)?
            .with_observer(RecordingObserver::new("first", events.clone()));
        net.attach_observer(Box::new(RecordingObserver::new("second", events.clone())));
        assert_eq!(net.num_observers(), 2);
        net.run()?;
        assert_eq!(journal.entries(), vec!["a", "b"]);
        assert_eq!(
            *events.borrow(),
            vec!["first:start", "second:start", "first:stop", "second:stop"]
        );
        assert_eq!(net.detach_observers().len(), 2);
        net.run()?;
        assert_eq!(events.borrow().len(), 4);
        Ok(())
    }

    #[test]
    fn test_run_async_is_synchronous() -> anyhow::Result<()> {
        let journal = Journal::default();
        let factory = ScriptedFactory::new();
        let mut net = SimpleNet::new(Arc::new(spec(&["a", "b", "c"])), &journal, &factory)?;
        Net::run_async(&mut net)?;
        // every operator completed by the time run_async returned
        assert_eq!(journal.entries(), vec!["a", "b", "c"]);

        let failing = ScriptedFactory::new().fail_on("b");
        let journal = Journal::default();
        let mut net = SimpleNet::new(Arc::new(spec(&["a", "b", "c"])), &journal, &failing)?;
        assert!(Net::run_async(&mut net).is_err());
        assert_eq!(journal.entries(), vec!["a", "b"]);
        Ok(())
    }

    #[test]
    fn test_empty_net() -> anyhow::Result<()> {
        let journal = Journal::default();
        let events = Rc::new(RefCell::new(Vec::new()));
        let factory = ScriptedFactory::new();
        let mut net = SimpleNet::new(Arc::new(NetSpec::new("empty")), &journal, &factory)?
            .with_observer(RecordingObserver::new("obs", events.clone()));
        net.run()?;
        assert_eq!(*events.borrow(), vec!["obs:start", "obs:stop"]);
        Ok(())
    }

    #[test]
    fn test_trace_events_and_ranges() -> anyhow::Result<()> {
        let journal = Journal::default();
        let profiler = RecordingProfiler::default();
        let trace_events = RecordingTraceEvents::default();
        let net_def = scripted_net("traced", &[("a", "FC"), ("b", "Relu")]);
        let mut net = SimpleNet::new(Arc::new(net_def), &journal, &ScriptedFactory::new())?
            .with_config(ExecutionConfig::default().with_profiler_ranges(true))
            .with_profiler(profiler.clone())
            .with_trace_events(trace_events.clone());
        net.run()?;
        assert_eq!(
            *trace_events.events.borrow(),
            vec![
                "start traced a FC 0",
                "done traced a FC 0",
                "start traced b Relu 1",
                "done traced b Relu 1",
            ]
        );
        assert_eq!(
            *profiler.events.borrow(),
            vec!["begin FC 0x0000ccff", "end", "begin Relu 0x0000ccff", "end"]
        );
        Ok(())
    }

    #[test]
    fn test_ranges_disabled() -> anyhow::Result<()> {
        let journal = Journal::default();
        let profiler = RecordingProfiler::default();
        let trace_events = RecordingTraceEvents::default();
        let net_def = scripted_net("traced", &[("a", "FC")]);
        let mut net = SimpleNet::new(Arc::new(net_def), &journal, &ScriptedFactory::new())?
            .with_profiler(profiler.clone())
            .with_trace_events(trace_events.clone());
        assert!(!net.config().profiler_ranges);
        net.run()?;
        assert!(profiler.events.borrow().is_empty());
        // operator events do not depend on the range toggle
        assert_eq!(trace_events.events.borrow().len(), 2);
        Ok(())
    }

    #[test]
    fn test_failing_operator_closes_range() -> anyhow::Result<()> {
        let journal = Journal::default();
        let profiler = RecordingProfiler::default();
        let trace_events = RecordingTraceEvents::default();
        let factory = ScriptedFactory::new().fail_on("a");
        let net_def = scripted_net("n", &[("a", "FC"), ("b", "FC")]);
        let mut net = SimpleNet::new(Arc::new(net_def), &journal, &factory)?
            .with_config(ExecutionConfig::default().with_profiler_ranges(true))
            .with_profiler(profiler.clone())
            .with_trace_events(trace_events.clone());
        assert!(net.run().is_err());
        assert_eq!(*profiler.events.borrow(), vec!["begin FC 0x0000ccff", "end"]);
        assert_eq!(
            *trace_events.events.borrow(),
            vec!["start n a FC 0", "done n a FC 0"]
        );
        Ok(())
    }

    #[test]
    fn test_failure_logs_operator_spec() -> anyhow::Result<()> {
        let logs = LogCapture::default();
        let journal = Journal::default();
        let factory = ScriptedFactory::new().fail_on("b");
        let mut net = SimpleNet::new(Arc::new(spec(&["a", "b", "c"])), &journal, &factory)?;
        let res = tracing::subscriber::with_default(logs.subscriber(), || net.run());
        assert!(res.is_err());
        let contents = logs.contents();
        assert_eq!(contents.matches("ERROR").count(), 1);
        assert!(contents.contains("Operator failed: {"));
        // the full spec of the failing operator, and only of that one
        assert!(contents.contains(r#""name": "b""#));
        assert!(contents.contains(r#""type": "Scripted""#));
        assert!(contents.contains(r#""b_out""#));
        assert!(!contents.contains(r#""name": "a""#));
        Ok(())
    }
}
