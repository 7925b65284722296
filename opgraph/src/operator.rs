//! Runtime operators and the factory contract used to build them from their spec.

use std::fmt::Debug;

use crate::{schema::TensorShape, spec::OperatorSpec};

/// A runnable unit of work. Operators read and write tensors of a shared workspace they
/// obtained from the [`OperatorFactory`] at construction time.
pub trait Operator: Debug {
    /// Runs the operator once. An error stops the net it belongs to.
    fn run(&mut self) -> anyhow::Result<()>;

    /// Clears any completion state left by a previous run.
    fn reset_event(&mut self) {}

    /// Shapes of the inputs as currently found in the workspace, in input order. Empty when
    /// some input has no known shape, in which case the operator is not costed.
    fn input_tensor_shapes(&self) -> Vec<TensorShape>;
}

/// Instantiates operators from their resolved spec.
///
/// `W` is the workspace the operators share. `position` is the index of the operator in
/// its net.
pub trait OperatorFactory<W: ?Sized> {
    fn create_operator(
        &self,
        spec: &OperatorSpec,
        ws: &W,
        position: usize,
    ) -> anyhow::Result<Box<dyn Operator>>;
}

impl<W: ?Sized, F> OperatorFactory<W> for F
where
    F: Fn(&OperatorSpec, &W, usize) -> anyhow::Result<Box<dyn Operator>>,
{
    fn create_operator(
        &self,
        spec: &OperatorSpec,
        ws: &W,
        position: usize,
    ) -> anyhow::Result<Box<dyn Operator>> {
        self(spec, ws, position)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::{
        net::SimpleNet,
        spec::NetSpec,
        testing::{Journal, ScriptedFactory},
    };

    #[test]
    fn test_closure_factory() -> anyhow::Result<()> {
        let scripted = ScriptedFactory::new();
        let positions = std::cell::RefCell::new(Vec::new());
        let factory = |spec: &OperatorSpec, ws: &Journal, position: usize| {
            positions.borrow_mut().push(position);
            anyhow::ensure!(spec.op_type != "Unsupported", "unsupported operator");
            scripted.create_operator(spec, ws, position)
        };
        let journal = Journal::default();
        let net_def = NetSpec::new("closure")
            .with_op(OperatorSpec::new("A", "a"))
            .with_op(OperatorSpec::new("B", "b"));
        let mut net = SimpleNet::new(Arc::new(net_def), &journal, &factory)?;
        net.run()?;
        assert_eq!(journal.entries(), vec!["a", "b"]);
        assert_eq!(*positions.borrow(), vec![0, 1]);

        let net_def = NetSpec::new("closure").with_op(OperatorSpec::new("Unsupported", "u"));
        assert!(SimpleNet::new(Arc::new(net_def), &journal, &factory).is_err());
        Ok(())
    }
}
