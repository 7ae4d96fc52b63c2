// vole-core — A strided tensor library with reverse-mode autodiff
//
// The layering, bottom to top:
//
//   element   — the Element trait: scalar types the engine can store
//   shape     — shapes, strides, coordinate math, broadcasting
//   storage   — strided buffers (owned shared or borrowed static)
//   ops       — the five-kernel TensorOps strategy (SeqOps, ParOps)
//   backend   — the full operation vocabulary derived from the kernels
//   function  — differentiable operations and their tape Contexts
//   autodiff  — topological sort and the reverse gradient sweep
//   tensor    — the Tensor handle tying it all together

mod autodiff;
pub mod backend;
pub mod element;
pub mod error;
pub mod function;
pub mod ops;
pub mod shape;
pub mod storage;
pub mod tensor;

pub use backend::Backend;
pub use element::Element;
pub use error::{Error, Result};
pub use shape::Shape;
pub use storage::Storage;
pub use tensor::Tensor;
