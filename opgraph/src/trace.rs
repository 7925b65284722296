//! Tracing hooks driven by the execution engine: colored profiler ranges around each
//! operator run and paired lightweight start/done events.
//!
//! Both are capability traits with no-op defaults, so the engine never depends on a specific
//! profiler. [`SpanProfiler`] and [`LogTraceEvents`] forward to `tracing`.

use std::cell::{Cell, RefCell};

use tracing::{span::EnteredSpan, trace};

/// Target of the events emitted by [`LogTraceEvents`].
pub const TRACE_TARGET: &str = "opgraph::trace";

/// ARGB color of a profiler range, one per execution phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Color {
    /// blue
    Run = 0x0000_CCFF,
    /// red
    Record = 0x00FF_3300,
    /// green
    Wait = 0x0066_FF33,
}

impl Color {
    pub fn argb(self) -> u32 {
        self as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RangeId(pub u64);

/// Backend for named, colored profiler ranges. Ranges are strictly nested.
pub trait RangeProfiler {
    fn start_range(&self, label: &str, color: Color) -> RangeId;
    fn end_range(&self, id: RangeId);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProfiler;

impl RangeProfiler for NoopProfiler {
    fn start_range(&self, _label: &str, _color: Color) -> RangeId {
        RangeId(0)
    }

    fn end_range(&self, _id: RangeId) {}
}

/// Maps every range onto an entered `tracing` span named `range`.
#[derive(Debug, Default)]
pub struct SpanProfiler {
    next_id: Cell<u64>,
    open: RefCell<Vec<(RangeId, EnteredSpan)>>,
}

impl SpanProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_ranges(&self) -> usize {
        self.open.borrow().len()
    }
}

impl RangeProfiler for SpanProfiler {
    fn start_range(&self, label: &str, color: Color) -> RangeId {
        let id = RangeId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        let span = tracing::debug_span!("range", label, color = color.argb());
        self.open.borrow_mut().push((id, span.entered()));
        id
    }

    fn end_range(&self, id: RangeId) {
        let mut open = self.open.borrow_mut();
        if let Some(pos) = open.iter().rposition(|(open_id, _)| *open_id == id) {
            // dropping the entered span exits it
            open.remove(pos);
        }
    }
}

/// Guard keeping a profiler range open for its lifetime. Inert when ranges are disabled.
pub struct ProfiledRange<'a> {
    profiler: &'a dyn RangeProfiler,
    id: Option<RangeId>,
}

impl<'a> ProfiledRange<'a> {
    pub fn new(profiler: &'a dyn RangeProfiler, enabled: bool, label: &str, color: Color) -> Self {
        let id = enabled.then(|| profiler.start_range(label, color));
        Self { profiler, id }
    }
}

impl Drop for ProfiledRange<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.profiler.end_range(id);
        }
    }
}

/// Payload of an operator start/done event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TracePoint<'a> {
    pub net_name: &'a str,
    pub op_name: &'a str,
    pub op_type: &'a str,
    /// Stable identity of the operator instance for the lifetime of its net.
    pub op_id: usize,
}

/// Sink for the paired events emitted around every operator run.
pub trait TraceEvents {
    fn operator_start(&self, point: &TracePoint<'_>);
    fn operator_done(&self, point: &TracePoint<'_>);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopTraceEvents;

impl TraceEvents for NoopTraceEvents {
    fn operator_start(&self, _point: &TracePoint<'_>) {}
    fn operator_done(&self, _point: &TracePoint<'_>) {}
}

/// Emits every event as a `trace` level event on [`TRACE_TARGET`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LogTraceEvents;

impl TraceEvents for LogTraceEvents {
    fn operator_start(&self, point: &TracePoint<'_>) {
        trace!(
            target: TRACE_TARGET,
            net = point.net_name,
            op = point.op_name,
            op_type = point.op_type,
            op_id = point.op_id,
            "operator_start"
        );
    }

    fn operator_done(&self, point: &TracePoint<'_>) {
        trace!(
            target: TRACE_TARGET,
            net = point.net_name,
            op = point.op_name,
            op_type = point.op_type,
            op_id = point.op_id,
            "operator_done"
        );
    }
}
