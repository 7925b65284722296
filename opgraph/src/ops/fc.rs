use anyhow::ensure;

use super::{Io, Tensor};
use crate::{
    operator::Operator,
    schema::{Cost, TensorShape},
    spec::OperatorSpec,
};

/// Fully connected layer, `Y = X * W^T + b`.
///
/// `X` is read as a `[M, K]` matrix whatever its rank (all but the last dimension are
/// flattened), `W` is `[N, K]` and `b` is `[N]`. `Y` is `[M, N]`.
#[derive(Debug)]
pub struct FullyConnected {
    io: Io,
}

impl FullyConnected {
    pub(crate) fn new(io: Io) -> Self {
        Self { io }
    }

    pub fn op(input: &Tensor, weight: &Tensor, bias: &Tensor) -> anyhow::Result<Tensor> {
        let w_dims = weight.get_shape().dims();
        ensure!(w_dims.len() == 2, "FC expects a 2D weight, got {}", weight.get_shape());
        let (n, k) = (w_dims[0], w_dims[1]);
        ensure!(
            weight.get_data().len() == n * k,
            "FC weight {} holds {} elements",
            weight.get_shape(),
            weight.get_data().len()
        );
        ensure!(
            k > 0 && input.get_data().len() % k == 0,
            "FC input {} does not match weight {}",
            input.get_shape(),
            weight.get_shape()
        );
        ensure!(
            bias.get_data().len() == n,
            "FC expects a bias of {n} elements, got {}",
            bias.get_shape()
        );
        let m = input.get_data().len() / k;
        let x = input.get_data();
        let w = weight.get_data();
        let b = bias.get_data();
        let data = (0..m)
            .flat_map(|row| {
                let x_row = &x[row * k..(row + 1) * k];
                (0..n).map(move |col| {
                    let w_row = &w[col * k..(col + 1) * k];
                    x_row.iter().zip(w_row).map(|(xi, wi)| xi * wi).sum::<f32>() + b[col]
                })
            })
            .collect();
        Tensor::new(TensorShape::new(vec![m, n]), data)
    }
}

impl Operator for FullyConnected {
    fn run(&mut self) -> anyhow::Result<()> {
        let output = Self::op(&self.io.input(0)?, &self.io.input(1)?, &self.io.input(2)?)?;
        self.io.set_output(0, output);
        Ok(())
    }

    fn input_tensor_shapes(&self) -> Vec<TensorShape> {
        self.io.input_shapes()
    }
}

/// `2 * M * K * N` flops, the `[M, N]` output moved and the weight and bias as parameters.
/// Shapes that cannot be read as a fully connected layer cost nothing.
pub(crate) fn cost(_spec: &OperatorSpec, shapes: &[TensorShape]) -> Cost {
    let [x, w, ..] = shapes else {
        return Cost::default();
    };
    let [n, k] = w.dims() else {
        return Cost::default();
    };
    let (n, k) = (*n as u64, *k as u64);
    if k == 0 {
        return Cost::default();
    }
    let m = x.numel() as u64 / k;
    let elem = std::mem::size_of::<f32>() as u64;
    Cost {
        flops: 2 * m * k * n,
        bytes_moved: m * n * elem,
        params_bytes: (k * n + n) * elem,
    }
}
