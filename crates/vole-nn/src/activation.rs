// Stateless activation modules, thin wrappers over the tensor ops so they
// can sit inside a Sequential.

use vole_core::element::Element;
use vole_core::error::Result;
use vole_core::tensor::Tensor;

use crate::module::Module;

#[derive(Debug, Default, Clone, Copy)]
pub struct Relu;

impl<T: Element> Module<T> for Relu {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        x.relu()
    }

    fn parameters(&self) -> Vec<Tensor<T>> {
        Vec::new()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Sigmoid;

impl<T: Element> Module<T> for Sigmoid {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        x.sigmoid()
    }

    fn parameters(&self) -> Vec<Tensor<T>> {
        Vec::new()
    }
}

/// Softmax along a fixed dimension (usually the feature dim).
#[derive(Debug, Clone, Copy)]
pub struct Softmax {
    pub dim: usize,
}

impl Softmax {
    pub fn new(dim: usize) -> Self {
        Softmax { dim }
    }
}

impl<T: Element> Module<T> for Softmax {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        x.softmax(self.dim)
    }

    fn parameters(&self) -> Vec<Tensor<T>> {
        Vec::new()
    }
}
