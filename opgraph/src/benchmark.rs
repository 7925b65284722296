//! Benchmark harness of a [`SimpleNet`].
//!
//! A benchmark runs the whole net `warmup_runs` times, then `main_runs` times under a single
//! timer. Optionally it then times every operator on its own for `main_runs` more iterations
//! and, on the first of those, asks the [`SchemaRegistry`] for a cost estimate of each
//! operator. The results are aggregated per operator and per operator type.

use std::{cmp::Ordering, collections::BTreeMap, iter};

use itertools::Itertools;
use tracing::{debug, info};
use utils::{Timer, human_count};

use crate::{
    error::{NetError, RunKind},
    net::SimpleNet,
    schema::{Cost, SchemaRegistry},
};

/// Quantity aggregated per operator type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Time,
    Flop,
    FeatureMemory,
    ParameterMemory,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::Time,
        Metric::Flop,
        Metric::FeatureMemory,
        Metric::ParameterMemory,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Metric::Time => "Time",
            Metric::Flop => "FLOP",
            Metric::FeatureMemory => "Feature Memory",
            Metric::ParameterMemory => "Parameter Memory",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Metric::Time => "ms",
            Metric::Flop => "GFLOP",
            Metric::FeatureMemory | Metric::ParameterMemory => "MB",
        }
    }

    /// Factor turning an accumulated per type value into the reported one: time is averaged
    /// over the main runs, flops and bytes are scaled to GFLOP and MB.
    pub fn normalizer(self, main_runs: i32) -> f64 {
        match self {
            Metric::Time => 1.0 / main_runs as f64,
            Metric::Flop => 1.0e-9,
            Metric::FeatureMemory | Metric::ParameterMemory => 1.0e-6,
        }
    }
}

/// Individual timing and cost of one operator.
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorReport {
    pub index: usize,
    /// Operator name, falling back to its first output.
    pub name: String,
    pub op_type: String,
    pub millis_per_iter: f32,
    /// Cost estimate, when the operator type has a cost inference function.
    pub cost: Option<Cost>,
}

impl OperatorReport {
    /// Estimated throughput in GFLOP per second.
    pub fn gflops(&self) -> Option<f64> {
        let flops = self.cost?.flops;
        (flops > 0 && self.millis_per_iter > 0.0)
            .then(|| 1.0e-6 * flops as f64 / self.millis_per_iter as f64)
    }

    fn describe(&self) -> String {
        let mut line = format!(
            "Operator #{} ({}, {}) {} ms/iter",
            self.index, self.name, self.op_type, self.millis_per_iter
        );
        if let Some(cost) = self.cost {
            if cost.flops > 0 {
                line.push_str(&format!(
                    " ({:.6} GFLOP, {:.6} GFLOPS)",
                    1.0e-9 * cost.flops as f64,
                    self.gflops().unwrap_or_default()
                ));
            }
            if cost.bytes_moved > 0 {
                line.push_str(&format!(" ({:.6} MB)", 1.0e-6 * cost.bytes_moved as f64));
            }
            if cost.params_bytes > 0 {
                line.push_str(&format!(
                    " ({:.6} MB params)",
                    1.0e-6 * cost.params_bytes as f64
                ));
            }
        }
        line
    }
}

/// Share of a metric attributed to one operator type.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeShare {
    pub op_type: String,
    pub value: f64,
    pub percent: f64,
}

/// One metric broken down per operator type, largest first.
#[derive(Clone, Debug, PartialEq)]
pub struct MetricBreakdown {
    pub metric: Metric,
    pub entries: Vec<TypeShare>,
    pub total: f64,
}

impl MetricBreakdown {
    fn new(metric: Metric, per_type: &BTreeMap<String, f64>, normalizer: f64) -> Self {
        let values = per_type
            .iter()
            .map(|(op_type, value)| (op_type, value * normalizer))
            // stable: equal values keep the operator type order
            .sorted_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal))
            .collect_vec();
        let total = values.iter().map(|(_, value)| value).sum::<f64>();
        let entries = values
            .into_iter()
            .map(|(op_type, value)| TypeShare {
                op_type: op_type.clone(),
                value,
                percent: if total > 0.0 {
                    100.0 * value / total
                } else {
                    0.0
                },
            })
            .collect();
        Self {
            metric,
            entries,
            total,
        }
    }

    pub fn share(&self, op_type: &str) -> Option<&TypeShare> {
        self.entries.iter().find(|entry| entry.op_type == op_type)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BenchmarkReport {
    pub main_runs: i32,
    /// Wall clock milliseconds per main run of the whole net.
    pub millis_per_iter: f32,
    pub iters_per_second: f32,
    /// Empty unless operators were timed individually.
    pub operators: Vec<OperatorReport>,
    /// Empty unless operators were timed individually.
    pub breakdowns: Vec<MetricBreakdown>,
}

impl BenchmarkReport {
    /// The milliseconds per main run followed by the average milliseconds of each operator.
    pub fn timings(&self) -> Vec<f32> {
        iter::once(self.millis_per_iter)
            .chain(self.operators.iter().map(|op| op.millis_per_iter))
            .collect()
    }

    pub fn breakdown(&self, metric: Metric) -> Option<&MetricBreakdown> {
        self.breakdowns.iter().find(|b| b.metric == metric)
    }

    /// Logs the per operator lines and the per type breakdowns.
    pub fn log(&self) {
        for op in &self.operators {
            info!("{}", op.describe());
        }
        for breakdown in &self.breakdowns {
            let unit = breakdown.metric.unit();
            info!("{} per operator type:", breakdown.metric.label());
            for entry in &breakdown.entries {
                info!(
                    "{:>15.6} {}. {:>10.4}%. {}",
                    entry.value, unit, entry.percent, entry.op_type
                );
            }
            info!("{:>15.6} {} in Total", breakdown.total, unit);
        }
    }
}

/// Raw sums gathered while timing operators individually.
struct Accumulators {
    time_per_op: Vec<f32>,
    /// One slot per operator, `None` for operators that could not be costed.
    cost_per_op: Vec<Option<Cost>>,
    per_type: BTreeMap<Metric, BTreeMap<String, f64>>,
}

impl Accumulators {
    fn new(num_operators: usize) -> Self {
        Self {
            time_per_op: vec![0.0; num_operators],
            cost_per_op: vec![None; num_operators],
            per_type: Metric::ALL
                .into_iter()
                .map(|metric| (metric, BTreeMap::new()))
                .collect(),
        }
    }

    fn add(&mut self, metric: Metric, op_type: &str, value: f64) {
        *self
            .per_type
            .entry(metric)
            .or_default()
            .entry(op_type.to_string())
            .or_default() += value;
    }

    /// Accumulated time of each operator divided by the number of runs.
    fn average_times(&self, main_runs: i32) -> Vec<f32> {
        self.time_per_op
            .iter()
            .map(|total| total / main_runs as f32)
            .collect()
    }

    fn add_cost(&mut self, index: usize, op_type: &str, cost: Cost) {
        self.cost_per_op[index] = Some(cost);
        self.add(Metric::Flop, op_type, cost.flops as f64);
        self.add(Metric::FeatureMemory, op_type, cost.bytes_moved as f64);
        self.add(Metric::ParameterMemory, op_type, cost.params_bytes as f64);
    }
}

fn check_run_count(kind: RunKind, value: i32) -> Result<(), NetError> {
    if value < 0 {
        return Err(NetError::InvalidRunCount { kind, value });
    }
    Ok(())
}

impl SimpleNet {
    /// Benchmarks the net and returns the full report.
    ///
    /// Both run counts must be non negative, this is checked before anything runs. Any
    /// operator failure aborts the whole benchmark. With `main_runs == 0` the averages are
    /// not defined and come out as NaN.
    pub fn benchmark_report(
        &mut self,
        schemas: &SchemaRegistry,
        warmup_runs: i32,
        main_runs: i32,
        run_individual: bool,
    ) -> Result<BenchmarkReport, NetError> {
        info!("Starting benchmark.");
        check_run_count(RunKind::Warmup, warmup_runs)?;
        check_run_count(RunKind::Main, main_runs)?;

        info!("Running warmup runs.");
        for iteration in 0..warmup_runs {
            self.run().map_err(|e| NetError::WarmupFailed {
                iteration,
                source: Box::new(e),
            })?;
        }

        info!("Main runs.");
        let timer = Timer::new();
        for iteration in 0..main_runs {
            self.run().map_err(|e| NetError::MainRunFailed {
                iteration,
                source: Box::new(e),
            })?;
        }
        let millis = timer.milliseconds();
        let millis_per_iter = millis / main_runs as f32;
        let iters_per_second = 1000.0 * main_runs as f32 / millis;
        info!(
            "Main run finished. Milliseconds per iter: {millis_per_iter}. \
             Iters per second: {iters_per_second}"
        );

        let mut report = BenchmarkReport {
            main_runs,
            millis_per_iter,
            iters_per_second,
            operators: Vec::new(),
            breakdowns: Vec::new(),
        };
        if run_individual {
            let acc = self.time_operators(schemas, main_runs)?;
            let averages = acc.average_times(main_runs);
            report.operators = self
                .operators
                .iter()
                .enumerate()
                .map(|(index, op)| OperatorReport {
                    index,
                    name: op.def.display_name().to_string(),
                    op_type: op.def.op_type.clone(),
                    millis_per_iter: averages[index],
                    cost: acc.cost_per_op[index],
                })
                .collect();
            report.breakdowns = acc
                .per_type
                .iter()
                .map(|(metric, per_type)| {
                    MetricBreakdown::new(*metric, per_type, metric.normalizer(main_runs))
                })
                .collect();
            report.log();
        }
        Ok(report)
    }

    /// Runs every operator on its own, `main_runs` times, timing each run. Costs are
    /// gathered on the first iteration only.
    fn time_operators(
        &mut self,
        schemas: &SchemaRegistry,
        main_runs: i32,
    ) -> Result<Accumulators, NetError> {
        let mut acc = Accumulators::new(self.operators.len());
        let mut timer = Timer::new();
        for iteration in 0..main_runs {
            for op in self.operators.iter_mut() {
                op.op.reset_event();
            }
            for (index, op) in self.operators.iter_mut().enumerate() {
                let op_type = op.def.op_type.as_str();
                if iteration == 0 {
                    if let Some(schema) = schemas
                        .schema(op_type)
                        .filter(|schema| schema.has_cost_inference())
                    {
                        let shapes = op.op.input_tensor_shapes();
                        if shapes.len() != op.def.inputs.len() {
                            debug!("Operator #{index} ({op_type}): unknown input shapes");
                        } else if let Some(cost) = schema.infer_cost(&op.def, &shapes) {
                            debug!(
                                "Operator #{index} ({op_type}): {} flops, {} bytes moved, \
                                 {} parameter bytes",
                                human_count(cost.flops),
                                human_count(cost.bytes_moved),
                                human_count(cost.params_bytes)
                            );
                            acc.add_cost(index, op_type, cost);
                        }
                    }
                }
                timer.start();
                op.op.run().map_err(|cause| NetError::OperatorFailed {
                    position: index,
                    name: op.def.name.clone(),
                    op_type: op_type.to_string(),
                    cause,
                })?;
                let spent = timer.milliseconds();
                acc.time_per_op[index] += spent;
                acc.add(Metric::Time, op_type, spent as f64);
            }
        }
        Ok(acc)
    }
}
