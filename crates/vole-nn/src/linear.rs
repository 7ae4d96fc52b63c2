// Linear — Fully-connected (dense) layer: y = x @ W + b
//
// PARAMETER SHAPES:
//
//   weight: [in_features, out_features]
//   bias:   [out_features] — broadcast across the batch dimension
//
// Weights and bias are drawn from U(-k, k) with k = sqrt(1/in_features),
// which keeps activations from vanishing or exploding through stacked
// layers. The generator is passed in; callers own their seeding.
//
// The layer also supports pruning: prune_neuron deletes one output unit
// in place (a column of the weight and its bias entry), the storage-level
// slice removal doing the actual surgery.

use rand::Rng;

use vole_core::backend::Backend;
use vole_core::element::Element;
use vole_core::error::{Error, Result};
use vole_core::tensor::Tensor;

use crate::module::Module;

pub struct Linear<T: Element> {
    weight: Tensor<T>,
    bias: Option<Tensor<T>>,
    in_features: usize,
    out_features: usize,
}

impl<T: Element> Linear<T> {
    /// Create a Linear layer with uniform init in (-1/√in, 1/√in).
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        use_bias: bool,
        backend: Backend<T>,
        rng: &mut R,
    ) -> Result<Self> {
        let k = (1.0 / in_features as f64).sqrt();
        let weight = Tensor::rand_uniform(
            [in_features, out_features],
            -k,
            k,
            backend.clone(),
            rng,
        )?
        .set_requires_grad(true);
        let bias = if use_bias {
            Some(
                Tensor::rand_uniform([out_features], -k, k, backend, rng)?
                    .set_requires_grad(true),
            )
        } else {
            None
        };
        Ok(Linear {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Build a layer from existing tensors, e.g. pretrained weights.
    pub fn from_tensors(weight: Tensor<T>, bias: Option<Tensor<T>>) -> Result<Self> {
        let dims = weight.dims();
        if dims.len() != 2 {
            return Err(Error::msg(format!(
                "Linear weight must be 2-D, got shape {:?}",
                dims
            )));
        }
        let in_features = dims[0];
        let out_features = dims[1];
        Ok(Linear {
            weight: weight.set_requires_grad(true),
            bias: bias.map(|b| b.set_requires_grad(true)),
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn weight(&self) -> &Tensor<T> {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor<T>> {
        self.bias.as_ref()
    }

    /// Delete output unit `idx` in place: the weight column and the bias
    /// entry. Gradients on the edited parameters are cleared.
    pub fn prune_neuron(&mut self, idx: usize) -> Result<()> {
        if idx >= self.out_features {
            return Err(Error::IndexOutOfRange {
                index: idx,
                bound: self.out_features,
            });
        }
        self.weight.remove(1, idx)?;
        if let Some(bias) = self.bias.as_mut() {
            bias.remove(0, idx)?;
        }
        self.out_features -= 1;
        Ok(())
    }
}

impl<T: Element> Module<T> for Linear<T> {
    /// [batch, in_features] → [batch, out_features]
    fn forward(&self, x: &Tensor<T>) -> Result<Tensor<T>> {
        let out = x.matmul(&self.weight)?;
        match &self.bias {
            Some(bias) => out.add(bias),
            None => Ok(out),
        }
    }

    fn parameters(&self) -> Vec<Tensor<T>> {
        let mut params = vec![self.weight.clone()];
        if let Some(b) = &self.bias {
            params.push(b.clone());
        }
        params
    }
}
