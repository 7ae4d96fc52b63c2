use vole_core::element::Element;
use vole_core::error::{Error, Result};
use vole_core::tensor::Tensor;

/// Mean squared error: mean((target - pred)²), a single-element tensor.
///
/// Shapes must match exactly. A prediction/target size mismatch is a
/// modeling bug, so it is an error here rather than a silent broadcast.
pub fn mse<T: Element>(pred: &Tensor<T>, target: &Tensor<T>) -> Result<Tensor<T>> {
    if pred.shape() != target.shape() {
        return Err(Error::ShapeMismatch {
            lhs: pred.shape().clone(),
            rhs: target.shape().clone(),
        });
    }
    let diff = target.sub(pred)?;
    diff.mul(&diff)?.mean(None)
}
