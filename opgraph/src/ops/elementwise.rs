use anyhow::ensure;

use super::{Io, Tensor};
use crate::{
    operator::Operator,
    schema::{Cost, TensorShape},
    spec::OperatorSpec,
};

#[derive(Debug)]
pub struct Relu {
    io: Io,
}

impl Relu {
    pub(crate) fn new(io: Io) -> Self {
        Self { io }
    }

    pub fn op(input: &Tensor) -> Tensor {
        let data = input.get_data().iter().map(|v| v.max(0.0)).collect();
        Tensor {
            shape: input.get_shape().clone(),
            data,
        }
    }
}

impl Operator for Relu {
    fn run(&mut self) -> anyhow::Result<()> {
        let output = Self::op(&self.io.input(0)?);
        self.io.set_output(0, output);
        Ok(())
    }

    fn input_tensor_shapes(&self) -> Vec<TensorShape> {
        self.io.input_shapes()
    }
}

/// Elementwise sum of two tensors with the same number of elements. The output takes the
/// shape of the first input.
#[derive(Debug)]
pub struct Add {
    io: Io,
}

impl Add {
    pub(crate) fn new(io: Io) -> Self {
        Self { io }
    }

    pub fn op(left: &Tensor, right: &Tensor) -> anyhow::Result<Tensor> {
        ensure!(
            left.get_data().len() == right.get_data().len(),
            "Add expects inputs to have the same shape: {} vs {}",
            left.get_shape(),
            right.get_shape()
        );
        let data = left
            .get_data()
            .iter()
            .zip(right.get_data())
            .map(|(a, b)| a + b)
            .collect();
        Tensor::new(left.get_shape().clone(), data)
    }
}

impl Operator for Add {
    fn run(&mut self) -> anyhow::Result<()> {
        let output = Self::op(&self.io.input(0)?, &self.io.input(1)?)?;
        self.io.set_output(0, output);
        Ok(())
    }

    fn input_tensor_shapes(&self) -> Vec<TensorShape> {
        self.io.input_shapes()
    }
}

/// One flop per output element and the output moved, no parameters.
pub(crate) fn pointwise_cost(_spec: &OperatorSpec, shapes: &[TensorShape]) -> Cost {
    let numel = shapes.first().map(|s| s.numel() as u64).unwrap_or_default();
    Cost {
        flops: numel,
        bytes_moved: numel * std::mem::size_of::<f32>() as u64,
        params_bytes: 0,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_relu() -> anyhow::Result<()> {
        let x = Tensor::new(vec![4].into(), vec![-1.0, 0.0, 2.0, -0.5])?;
        assert_eq!(Relu::op(&x).get_data(), &[0.0, 0.0, 2.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_add() -> anyhow::Result<()> {
        let a = Tensor::new(vec![2, 2].into(), vec![1.0, 2.0, 3.0, 4.0])?;
        let b = Tensor::new(vec![4].into(), vec![1.0, 1.0, 1.0, 1.0])?;
        let sum = Add::op(&a, &b)?;
        assert_eq!(sum.get_shape().dims(), &[2, 2]);
        assert_eq!(sum.get_data(), &[2.0, 3.0, 4.0, 5.0]);
        assert!(Add::op(&a, &Tensor::zeros(vec![3].into())).is_err());
        Ok(())
    }

    #[test]
    fn test_pointwise_cost() {
        let spec = OperatorSpec::new("Relu", "r");
        let cost = pointwise_cost(&spec, &[TensorShape::from(vec![3, 5])]);
        assert_eq!(cost.flops, 15);
        assert_eq!(cost.bytes_moved, 60);
        assert_eq!(cost.params_bytes, 0);
        assert_eq!(pointwise_cost(&spec, &[]), Cost::default());
    }
}
