//! Scripted operators, observers and tracing backends used to exercise the engine in tests.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    io,
    rc::Rc,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::ensure;

use crate::{
    observer::NetObserver,
    operator::{Operator, OperatorFactory},
    schema::{Cost, OpSchema, SchemaRegistry, TensorShape},
    spec::{Argument, DeviceOption, NetSpec, OperatorSpec},
    trace::{Color, RangeId, RangeProfiler, TraceEvents, TracePoint},
};

/// Shared log of the operators that ran, in run order. Serves as the workspace of scripted
/// operators.
#[derive(Clone, Debug, Default)]
pub struct Journal(Rc<RefCell<Vec<String>>>);

impl Journal {
    pub fn record(&self, entry: &str) {
        self.0.borrow_mut().push(entry.to_string());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Counters shared by every operator of a [`ScriptedFactory`].
#[derive(Debug, Default)]
pub struct Counters {
    pub runs: Cell<usize>,
    pub resets: Cell<usize>,
    pub shape_queries: Cell<usize>,
}

#[derive(Debug)]
pub struct ScriptedOperator {
    name: String,
    journal: Journal,
    /// Number of successful runs before the operator starts failing.
    fail_after: Option<usize>,
    runs: usize,
    sleep: Option<Duration>,
    shapes: Vec<TensorShape>,
    counters: Rc<Counters>,
}

impl Operator for ScriptedOperator {
    fn run(&mut self) -> anyhow::Result<()> {
        self.journal.record(&self.name);
        self.counters.runs.set(self.counters.runs.get() + 1);
        if let Some(sleep) = self.sleep {
            std::thread::sleep(sleep);
        }
        if let Some(limit) = self.fail_after {
            ensure!(self.runs < limit, "scripted failure of {}", self.name);
        }
        self.runs += 1;
        Ok(())
    }

    fn reset_event(&mut self) {
        self.counters.resets.set(self.counters.resets.get() + 1);
    }

    fn input_tensor_shapes(&self) -> Vec<TensorShape> {
        self.counters
            .shape_queries
            .set(self.counters.shape_queries.get() + 1);
        self.shapes.clone()
    }
}

/// Factory of [`ScriptedOperator`]s writing to a [`Journal`], whatever their type. Operators
/// are identified by their spec name.
///
/// Recognized arguments: `sleep_us` (int) makes every run sleep, `shape` (ints) is reported
/// as the shape of every input, `known_inputs` (int) limits the number of reported shapes.
#[derive(Debug, Default)]
pub struct ScriptedFactory {
    reject: Vec<String>,
    fail_after: HashMap<String, usize>,
    created: RefCell<Vec<String>>,
    device_options: RefCell<Vec<Option<DeviceOption>>>,
    counters: Rc<Counters>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The factory refuses to create the operator named `name`.
    pub fn reject(mut self, name: &str) -> Self {
        self.reject.push(name.to_string());
        self
    }

    /// The operator named `name` fails on its first run.
    pub fn fail_on(self, name: &str) -> Self {
        self.fail_after(name, 0)
    }

    /// The operator named `name` fails once it succeeded `runs` times.
    pub fn fail_after(mut self, name: &str, runs: usize) -> Self {
        self.fail_after.insert(name.to_string(), runs);
        self
    }

    pub fn created(&self) -> Vec<String> {
        self.created.borrow().clone()
    }

    pub fn created_device_options(&self) -> Vec<Option<DeviceOption>> {
        self.device_options.borrow().clone()
    }

    pub fn counters(&self) -> Rc<Counters> {
        self.counters.clone()
    }
}

impl OperatorFactory<Journal> for ScriptedFactory {
    fn create_operator(
        &self,
        spec: &OperatorSpec,
        ws: &Journal,
        _position: usize,
    ) -> anyhow::Result<Box<dyn Operator>> {
        ensure!(
            !self.reject.contains(&spec.name),
            "rejected operator {}",
            spec.name
        );
        let shape: Vec<usize> = match spec.args.get("shape") {
            Some(Argument::Ints(dims)) => dims.iter().map(|d| *d as usize).collect(),
            _ => vec![1],
        };
        let known_inputs = spec
            .arg_int("known_inputs")
            .map_or(spec.inputs.len(), |n| n as usize)
            .min(spec.inputs.len());
        let sleep = spec
            .arg_int("sleep_us")
            .map(|us| Duration::from_micros(us as u64));
        self.created.borrow_mut().push(spec.name.clone());
        self.device_options
            .borrow_mut()
            .push(spec.device_option.clone());
        Ok(Box::new(ScriptedOperator {
            name: spec.name.clone(),
            journal: ws.clone(),
            fail_after: self.fail_after.get(&spec.name).copied(),
            runs: 0,
            sleep,
            shapes: vec![TensorShape::from(shape); known_inputs],
            counters: self.counters.clone(),
        }))
    }
}

/// Builds a net of operators with the given `(name, type)` pairs, each reading `x` and
/// writing `<name>_out`.
pub fn scripted_net(name: &str, ops: &[(&str, &str)]) -> NetSpec {
    ops.iter().fold(NetSpec::new(name), |net, (op_name, op_type)| {
        net.with_op(
            OperatorSpec::new(*op_type, *op_name)
                .with_inputs(["x"])
                .with_outputs([format!("{op_name}_out")]),
        )
    })
}

/// Cost of a scripted operator: `numel` of its inputs as flops, four bytes per element moved
/// and `params` (int argument) bytes of parameters.
pub fn scripted_cost(spec: &OperatorSpec, shapes: &[TensorShape]) -> Cost {
    let numel = shapes.iter().map(|s| s.numel() as u64).sum::<u64>();
    Cost {
        flops: numel,
        bytes_moved: 4 * numel,
        params_bytes: spec.arg_int("params").unwrap_or_default() as u64,
    }
}

/// Schema registry pricing the operators of the given types with [`scripted_cost`].
pub fn scripted_schemas(op_types: &[&str]) -> SchemaRegistry {
    op_types.iter().fold(SchemaRegistry::new(), |registry, op_type| {
        registry.with(OpSchema::new(*op_type).with_cost_inference(scripted_cost))
    })
}

/// Observer pushing `<label>:start` and `<label>:stop` into a shared log.
pub struct RecordingObserver {
    label: String,
    events: Rc<RefCell<Vec<String>>>,
}

impl RecordingObserver {
    pub fn new(label: &str, events: Rc<RefCell<Vec<String>>>) -> Self {
        Self {
            label: label.to_string(),
            events,
        }
    }
}

impl NetObserver for RecordingObserver {
    fn on_start(&mut self) {
        self.events.borrow_mut().push(format!("{}:start", self.label));
    }

    fn on_stop(&mut self) {
        self.events.borrow_mut().push(format!("{}:stop", self.label));
    }
}

/// Profiler recording `begin <label> <color>` and `end` entries.
#[derive(Clone, Debug, Default)]
pub struct RecordingProfiler {
    pub events: Rc<RefCell<Vec<String>>>,
}

impl RangeProfiler for RecordingProfiler {
    fn start_range(&self, label: &str, color: Color) -> RangeId {
        let mut events = self.events.borrow_mut();
        events.push(format!("begin {label} {:#010x}", color.argb()));
        RangeId(events.len() as u64)
    }

    fn end_range(&self, _id: RangeId) {
        self.events.borrow_mut().push("end".to_string());
    }
}

/// Trace event sink recording `start|done <net> <op> <type> <id>` entries.
#[derive(Clone, Debug, Default)]
pub struct RecordingTraceEvents {
    pub events: Rc<RefCell<Vec<String>>>,
}

impl RecordingTraceEvents {
    fn push(&self, kind: &str, point: &TracePoint<'_>) {
        self.events.borrow_mut().push(format!(
            "{kind} {} {} {} {}",
            point.net_name, point.op_name, point.op_type, point.op_id
        ));
    }
}

impl TraceEvents for RecordingTraceEvents {
    fn operator_start(&self, point: &TracePoint<'_>) {
        self.push("start", point);
    }

    fn operator_done(&self, point: &TracePoint<'_>) {
        self.push("done", point);
    }
}

/// Collects the plain text output of a `tracing` subscriber, to assert on log lines.
#[derive(Clone, Debug, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Subscriber writing every event, down to `TRACE`, into this capture.
    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync {
        let capture = self.clone();
        tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(move || capture.clone())
            .finish()
    }

    pub fn contents(&self) -> String {
        let bytes = match self.0.lock() {
            Ok(bytes) => bytes.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.lock() {
            Ok(mut out) => out.extend_from_slice(buf),
            Err(poisoned) => poisoned.into_inner().extend_from_slice(buf),
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
