// vole-nn — Layers, losses, optimizers, and quantization on top of
// vole-core's autodiff engine.
//
// Layers are plain structs implementing the Module trait; an optimizer
// only ever sees Module::parameters(). Quantization lives here too, as a
// consumer of the core's alternate element types (Tensor<u8>).

pub mod activation;
pub mod linear;
pub mod loss;
pub mod module;
pub mod optim;
pub mod quantize;
pub mod sequential;

pub use activation::{Relu, Sigmoid, Softmax};
pub use linear::Linear;
pub use loss::mse;
pub use module::Module;
pub use optim::Sgd;
pub use quantize::{calc_quant_params, QTensor, QuantParams};
pub use sequential::Sequential;
