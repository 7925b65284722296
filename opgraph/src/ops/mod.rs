//! Reference CPU operators working on a shared [`TensorWorkspace`].
//!
//! These give the engine something real to run and benchmark: a fully connected layer, a
//! couple of pointwise operators and a copy. All but `Copy` come with a cost inference
//! function, see [`reference_schemas`].

mod copy;
mod elementwise;
mod fc;

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use anyhow::{Context, bail, ensure};
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use copy::CopyTensor;
pub use elementwise::{Add, Relu};
pub use fc::FullyConnected;

use crate::{
    operator::{Operator, OperatorFactory},
    schema::{OpSchema, SchemaRegistry, TensorShape},
    spec::{DeviceType, OperatorSpec},
};

pub const FC: &str = "FC";
pub const RELU: &str = "Relu";
pub const ADD: &str = "Add";
pub const COPY: &str = "Copy";

/// Dense `f32` tensor, row major. The number of elements of the shape always matches the
/// length of the data, deserialization included.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: TensorShape,
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct RawTensor {
    shape: TensorShape,
    data: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = anyhow::Error;

    fn try_from(raw: RawTensor) -> anyhow::Result<Self> {
        Tensor::new(raw.shape, raw.data)
    }
}

impl Tensor {
    pub fn new(shape: TensorShape, data: Vec<f32>) -> anyhow::Result<Self> {
        ensure!(
            shape.numel() == data.len(),
            "shape {shape} holds {} elements but {} were given",
            shape.numel(),
            data.len()
        );
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: TensorShape) -> Self {
        let data = vec![0.0; shape.numel()];
        Self { shape, data }
    }

    /// Tensor filled with values drawn uniformly in `[-1, 1)`, reproducible from `seed`.
    pub fn random(shape: TensorShape, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..shape.numel()).map(|_| rng.gen_range(-1.0..1.0)).collect();
        Self { shape, data }
    }

    pub fn get_shape(&self) -> &TensorShape {
        &self.shape
    }

    pub fn get_data(&self) -> &[f32] {
        &self.data
    }
}

/// Tensors shared by every operator of a net, keyed by name. Cloning gives another handle
/// on the same storage.
#[derive(Clone, Debug, Default)]
pub struct TensorWorkspace {
    tensors: Rc<RefCell<HashMap<String, Tensor>>>,
}

impl TensorWorkspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `tensor` under `name`, replacing any previous value.
    pub fn feed<S: Into<String>>(&self, name: S, tensor: Tensor) {
        self.tensors.borrow_mut().insert(name.into(), tensor);
    }

    pub fn fetch(&self, name: &str) -> anyhow::Result<Tensor> {
        self.tensors
            .borrow()
            .get(name)
            .cloned()
            .with_context(|| format!("tensor {name:?} not found in workspace"))
    }

    pub fn shape(&self, name: &str) -> Option<TensorShape> {
        self.tensors.borrow().get(name).map(|t| t.shape.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tensors.borrow().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tensors.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.borrow().is_empty()
    }

    /// Shapes of `names`, `None` if any of them was not produced yet.
    pub fn shapes(&self, names: &[String]) -> Option<Vec<TensorShape>> {
        names.iter().map(|name| self.shape(name)).collect()
    }
}

/// Input and output names of an operator, checked against the expected arity.
#[derive(Clone, Debug)]
pub(crate) struct Io {
    pub(crate) ws: TensorWorkspace,
    pub(crate) inputs: Vec<String>,
    pub(crate) outputs: Vec<String>,
}

impl Io {
    fn new(
        spec: &OperatorSpec,
        ws: &TensorWorkspace,
        num_inputs: usize,
        num_outputs: usize,
    ) -> anyhow::Result<Self> {
        ensure!(
            spec.inputs.len() == num_inputs,
            "{} expects {num_inputs} inputs, got {}",
            spec.op_type,
            spec.inputs.len()
        );
        ensure!(
            spec.outputs.len() == num_outputs,
            "{} expects {num_outputs} outputs, got {}",
            spec.op_type,
            spec.outputs.len()
        );
        Ok(Self {
            ws: ws.clone(),
            inputs: spec.inputs.clone(),
            outputs: spec.outputs.clone(),
        })
    }

    pub(crate) fn input(&self, index: usize) -> anyhow::Result<Tensor> {
        self.ws.fetch(&self.inputs[index])
    }

    pub(crate) fn set_output(&self, index: usize, tensor: Tensor) {
        self.ws.feed(self.outputs[index].clone(), tensor);
    }

    /// Empty until every input is in the workspace.
    pub(crate) fn input_shapes(&self) -> Vec<TensorShape> {
        self.ws.shapes(&self.inputs).unwrap_or_default()
    }
}

/// Creates the reference operators: `FC`, `Relu`, `Add` and `Copy`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReferenceFactory;

impl OperatorFactory<TensorWorkspace> for ReferenceFactory {
    fn create_operator(
        &self,
        spec: &OperatorSpec,
        ws: &TensorWorkspace,
        position: usize,
    ) -> anyhow::Result<Box<dyn Operator>> {
        if let Some(device) = &spec.device_option {
            if device.device_type != DeviceType::Cpu {
                warn!(
                    "operator #{position} ({}) requests device {}, running on cpu",
                    spec.display_name(),
                    device.device_type
                );
            }
        }
        let op: Box<dyn Operator> = match spec.op_type.as_str() {
            FC => Box::new(FullyConnected::new(Io::new(spec, ws, 3, 1)?)),
            RELU => Box::new(Relu::new(Io::new(spec, ws, 1, 1)?)),
            ADD => Box::new(Add::new(Io::new(spec, ws, 2, 1)?)),
            COPY => Box::new(CopyTensor::new(Io::new(spec, ws, 1, 1)?)),
            other => bail!("Unknown operator type {other:?}"),
        };
        Ok(op)
    }
}

/// Schemas of the reference operators. `Copy` is registered without cost inference.
pub fn reference_schemas() -> SchemaRegistry {
    SchemaRegistry::new()
        .with(OpSchema::new(FC).with_cost_inference(fc::cost))
        .with(OpSchema::new(RELU).with_cost_inference(elementwise::pointwise_cost))
        .with(OpSchema::new(ADD).with_cost_inference(elementwise::pointwise_cost))
        .with(OpSchema::new(COPY))
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::{
        benchmark::Metric,
        net::SimpleNet,
        spec::{DeviceOption, NetSpec},
    };

    fn mlp() -> NetSpec {
        NetSpec::new("mlp")
            .with_external_inputs(["x", "w", "b"])
            .with_op(
                OperatorSpec::new(FC, "fc")
                    .with_inputs(["x", "w", "b"])
                    .with_outputs(["h"]),
            )
            .with_op(OperatorSpec::new(RELU, "relu").with_inputs(["h"]).with_outputs(["a"]))
            .with_op(OperatorSpec::new(ADD, "").with_inputs(["a", "h"]).with_outputs(["s"]))
            .with_op(OperatorSpec::new(COPY, "copy").with_inputs(["s"]).with_outputs(["y"]))
    }

    fn feed(ws: &TensorWorkspace) -> anyhow::Result<()> {
        ws.feed("x", Tensor::new(vec![2, 3].into(), vec![1.0, -2.0, 3.0, 0.5, 0.0, -1.0])?);
        ws.feed("w", Tensor::new(vec![2, 3].into(), vec![1.0, 1.0, 1.0, -1.0, 0.0, 2.0])?);
        ws.feed("b", Tensor::new(vec![2].into(), vec![0.5, -0.5])?);
        Ok(())
    }

    #[test]
    fn test_tensor_new() {
        assert!(Tensor::new(vec![2, 2].into(), vec![1.0; 3]).is_err());
        let t = Tensor::random(vec![3, 4].into(), 7);
        assert_eq!(t.get_data().len(), 12);
        assert!(t.get_data().iter().all(|v| (-1.0..1.0).contains(v)));
        assert_eq!(t, Tensor::random(vec![3, 4].into(), 7));
    }

    #[test]
    fn test_deserialize_checks_shape() -> anyhow::Result<()> {
        let t: Tensor = serde_json::from_str(r#"{"shape":[2,3],"data":[1,2,3,4,5,6]}"#)?;
        assert_eq!(t.get_shape().dims(), &[2, 3]);
        assert_eq!(serde_json::from_str::<Tensor>(&serde_json::to_string(&t)?)?, t);
        let err = serde_json::from_str::<Tensor>(r#"{"shape":[2,3],"data":[1.0]}"#).unwrap_err();
        assert!(err.to_string().contains("holds 6 elements but 1 were given"));
        Ok(())
    }

    #[test]
    fn test_run_mlp() -> anyhow::Result<()> {
        let ws = TensorWorkspace::new();
        feed(&ws)?;
        let mut net = SimpleNet::new(Arc::new(mlp()), &ws, &ReferenceFactory)?;
        net.run()?;
        // h = x w^T + b
        let h = ws.fetch("h")?;
        assert_eq!(h.get_shape().dims(), &[2, 2]);
        assert_eq!(h.get_data(), &[2.5, 4.5, 0.0, -3.0]);
        let y = ws.fetch("y")?;
        // relu(h) + h
        assert_eq!(y.get_data(), &[5.0, 9.0, 0.0, -3.0]);
        Ok(())
    }

    #[test]
    fn test_missing_input_fails_run() -> anyhow::Result<()> {
        let ws = TensorWorkspace::new();
        let mut net = SimpleNet::new(Arc::new(mlp()), &ws, &ReferenceFactory)?;
        assert!(net.run().is_err());
        assert!(!ws.contains("h"));
        Ok(())
    }

    #[test]
    fn test_shapes_of_missing_tensors() -> anyhow::Result<()> {
        let ws = TensorWorkspace::new();
        feed(&ws)?;
        let names = ["x".to_string(), "b".to_string()];
        assert_eq!(
            ws.shapes(&names),
            Some(vec![TensorShape::from(vec![2, 3]), TensorShape::from(vec![2])])
        );
        assert_eq!(ws.shapes(&["x".to_string(), "h".to_string()]), None);

        // the FC output does not exist yet, so Relu cannot report its input shape
        let net = SimpleNet::new(Arc::new(mlp()), &ws, &ReferenceFactory)?;
        assert_eq!(net.operators()[0].op.input_tensor_shapes().len(), 3);
        assert!(net.operators()[1].op.input_tensor_shapes().is_empty());
        Ok(())
    }

    #[test]
    fn test_factory_rejects() {
        let ws = TensorWorkspace::new();
        let unknown = NetSpec::new("bad").with_op(OperatorSpec::new("Conv", "c"));
        assert!(SimpleNet::new(Arc::new(unknown), &ws, &ReferenceFactory).is_err());
        let bad_arity = NetSpec::new("bad")
            .with_op(OperatorSpec::new(RELU, "r").with_inputs(["a", "b"]).with_outputs(["c"]));
        assert!(SimpleNet::new(Arc::new(bad_arity), &ws, &ReferenceFactory).is_err());
    }

    #[test]
    fn test_device_option_is_accepted() -> anyhow::Result<()> {
        let ws = TensorWorkspace::new();
        feed(&ws)?;
        let net_def = mlp().with_device_option(DeviceOption::cuda(0));
        let mut net = SimpleNet::new(Arc::new(net_def), &ws, &ReferenceFactory)?;
        net.run()?;
        Ok(())
    }

    #[test]
    fn test_benchmark_mlp() -> anyhow::Result<()> {
        let ws = TensorWorkspace::new();
        feed(&ws)?;
        let mut net = SimpleNet::new(Arc::new(mlp()), &ws, &ReferenceFactory)?;
        let report = net.benchmark_report(&reference_schemas(), 1, 3, true)?;
        assert_eq!(report.operators.len(), 4);
        assert_eq!(report.operators[2].name, "s");
        // FC: 2 * M * K * N
        assert_eq!(report.operators[0].cost.unwrap().flops, 2 * 2 * 3 * 2);
        assert_eq!(report.operators[1].cost.unwrap().flops, 4);
        assert_eq!(report.operators[3].cost, None);
        let flop = report.breakdown(Metric::Flop).unwrap();
        assert_eq!(flop.entries[0].op_type, FC);
        assert!(flop.share(COPY).is_none());
        let time = report.breakdown(Metric::Time).unwrap();
        assert_eq!(time.entries.len(), 4);
        Ok(())
    }
}
