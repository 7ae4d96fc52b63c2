// Module trait — The interface every layer implements
//
// Each layer is a plain struct with a forward() computing its output and a
// parameters() listing its trainable leaf tensors. Optimizers only ever
// see parameters(); gradient bookkeeping stays inside the tensors.

use vole_core::element::Element;
use vole_core::error::Result;
use vole_core::tensor::Tensor;

/// The fundamental trait for all layers.
pub trait Module<T: Element> {
    /// Compute the output tensor from the input tensor.
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>>;

    /// All trainable parameters of this module. The returned handles share
    /// storage and gradient slots with the module's own tensors.
    fn parameters(&self) -> Vec<Tensor<T>>;

    /// Clear every parameter's accumulated gradient.
    fn zero_grad(&self) {
        for p in self.parameters() {
            p.zero_grad();
        }
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.size()).sum()
    }
}
