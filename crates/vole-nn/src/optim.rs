// Sgd — Plain stochastic gradient descent
//
// step() writes value - lr * grad back into each parameter's storage in
// place, so every view and clone of the parameter sees the update. A
// parameter with no accumulated gradient means step() ran before any
// backward pass; that is reported, not skipped.

use vole_core::element::Element;
use vole_core::error::{Error, Result};
use vole_core::tensor::Tensor;

pub struct Sgd<T: Element> {
    params: Vec<Tensor<T>>,
    lr: f64,
}

impl<T: Element> Sgd<T> {
    pub fn new(params: Vec<Tensor<T>>, lr: f64) -> Self {
        Sgd { params, lr }
    }

    pub fn learning_rate(&self) -> f64 {
        self.lr
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }

    /// One descent step over every parameter.
    pub fn step(&self) -> Result<()> {
        for param in &self.params {
            let grad = param.grad().ok_or(Error::MissingGradient)?;
            let scaled = grad.mul_scalar(T::from_f64(self.lr))?;
            let next = param.detach().sub(&scaled)?;
            param.update_data(&next)?;
        }
        Ok(())
    }

    /// Clear every parameter's gradient before the next backward pass.
    pub fn zero_grad(&self) {
        for param in &self.params {
            param.zero_grad();
        }
    }
}
