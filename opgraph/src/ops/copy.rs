use super::Io;
use crate::{operator::Operator, schema::TensorShape};

/// Copies its input into its output.
#[derive(Debug)]
pub struct CopyTensor {
    io: Io,
}

impl CopyTensor {
    pub(crate) fn new(io: Io) -> Self {
        Self { io }
    }
}

impl Operator for CopyTensor {
    fn run(&mut self) -> anyhow::Result<()> {
        let input = self.io.input(0)?;
        self.io.set_output(0, input);
        Ok(())
    }

    fn input_tensor_shapes(&self) -> Vec<TensorShape> {
        self.io.input_shapes()
    }
}
