// Sequential — A chain of modules applied one after another
//
// The output of each layer becomes the input to the next. Sequential
// itself implements Module, so it can be nested.

use vole_core::element::Element;
use vole_core::error::Result;
use vole_core::tensor::Tensor;

use crate::module::Module;

pub struct Sequential<T: Element> {
    layers: Vec<Box<dyn Module<T>>>,
}

impl<T: Element> Sequential<T> {
    pub fn new() -> Self {
        Sequential { layers: Vec::new() }
    }

    /// Add a layer to the end of the sequence. Returns self for chaining.
    #[allow(clippy::should_implement_trait)]
    pub fn add<M: Module<T> + 'static>(mut self, module: M) -> Self {
        self.layers.push(Box::new(module));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

impl<T: Element> Default for Sequential<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Module<T> for Sequential<T> {
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        let mut out = x.clone();
        for layer in &self.layers {
            out = layer.forward(&out)?;
        }
        Ok(out)
    }

    fn parameters(&self) -> Vec<Tensor<T>> {
        self.layers.iter().flat_map(|l| l.parameters()).collect()
    }
}
