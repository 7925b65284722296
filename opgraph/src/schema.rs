//! Operator schemas. A schema may carry a cost inference function, used by the benchmark
//! harness to estimate the compute and memory traffic of an operator. Operator types
//! without a schema, or with a schema lacking such a function, are simply not costed.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::spec::OperatorSpec;

/// Shape of a tensor, outermost dimension first.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::From,
    derive_more::Deref,
)]
pub struct TensorShape(Vec<usize>);

impl TensorShape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of elements. A rank 0 shape holds a single scalar.
    pub fn numel(&self) -> usize {
        self.0.iter().product()
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "x")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")
    }
}

/// Estimated cost of a single execution of an operator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cost {
    pub flops: u64,
    pub bytes_moved: u64,
    pub params_bytes: u64,
}

/// Estimates the cost of an operator from its spec and the shapes of its inputs.
pub type CostInferenceFn = fn(&OperatorSpec, &[TensorShape]) -> Cost;

#[derive(Clone, Debug)]
pub struct OpSchema {
    op_type: String,
    cost_inference: Option<CostInferenceFn>,
}

impl OpSchema {
    pub fn new<S: Into<String>>(op_type: S) -> Self {
        Self {
            op_type: op_type.into(),
            cost_inference: None,
        }
    }

    pub fn with_cost_inference(self, f: CostInferenceFn) -> Self {
        Self {
            cost_inference: Some(f),
            ..self
        }
    }

    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    pub fn has_cost_inference(&self) -> bool {
        self.cost_inference.is_some()
    }

    /// Returns `None` when the schema carries no cost inference function.
    pub fn infer_cost(&self, spec: &OperatorSpec, input_shapes: &[TensorShape]) -> Option<Cost> {
        self.cost_inference.map(|f| f(spec, input_shapes))
    }
}

/// Schemas keyed by operator type.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, OpSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `schema`, replacing any previous schema for the same operator type.
    pub fn register(&mut self, schema: OpSchema) -> &mut Self {
        self.schemas.insert(schema.op_type.clone(), schema);
        self
    }

    pub fn with(mut self, schema: OpSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn schema(&self, op_type: &str) -> Option<&OpSchema> {
        self.schemas.get(op_type)
    }

    /// Cost of `spec`, if its type is registered with a cost inference function.
    pub fn infer_cost(&self, spec: &OperatorSpec, input_shapes: &[TensorShape]) -> Option<Cost> {
        self.schema(&spec.op_type)?.infer_cost(spec, input_shapes)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
