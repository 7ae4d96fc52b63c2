use std::fmt;

use crate::element::Element;
use crate::error::{Error, Result};
use crate::shape::Shape;
use crate::storage::Storage;
use crate::tensor::{History, Tensor};

// Function — Differentiable operations and the tape they write
//
// Every differentiable tensor operation is a Function: a forward pass that
// computes the output from raw (history-free) inputs, and a backward pass
// that turns the output gradient into one gradient per input. The generic
// `apply` entry point wires the two together:
//
//   1. detach the inputs (forward never sees histories)
//   2. run forward, letting it stash whatever backward will need in a
//      Context
//   3. if any input tracks gradients, attach a History {func, ctx, inputs}
//      to the output — that History is the tape node backpropagation walks
//
// The Context stores a closed set of value kinds (Saved) rather than
// type-erased boxes, so backward passes read their saved state with plain
// pattern matches. When no input needs gradients the Context is created
// inert and save() is a no-op — the forward pass costs nothing extra on
// inference paths.

/// A value a forward pass can stash for its backward pass.
pub enum Saved<T: Element> {
    Tensor(Tensor<T>),
    Shape(Shape),
    Dim(usize),
}

impl<T: Element> fmt::Debug for Saved<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Saved::Tensor(t) => write!(f, "Tensor({})", t.shape()),
            Saved::Shape(s) => write!(f, "Shape({s})"),
            Saved::Dim(d) => write!(f, "Dim({d})"),
        }
    }
}

/// Scratch space a Function's forward pass hands to its backward pass.
pub struct Context<T: Element> {
    no_grad: bool,
    saved: Vec<Saved<T>>,
}

impl<T: Element> Context<T> {
    pub fn new(no_grad: bool) -> Self {
        Context {
            no_grad,
            saved: Vec::new(),
        }
    }

    /// Whether saving is disabled (no input tracks gradients).
    pub fn is_no_grad(&self) -> bool {
        self.no_grad
    }

    /// Record a value for the backward pass. Dropped silently when no
    /// gradient will ever be requested.
    pub fn save(&mut self, value: Saved<T>) {
        if !self.no_grad {
            self.saved.push(value);
        }
    }

    pub fn save_tensor(&mut self, t: &Tensor<T>) {
        self.save(Saved::Tensor(t.clone()));
    }

    pub fn save_shape(&mut self, shape: &Shape) {
        self.save(Saved::Shape(shape.clone()));
    }

    pub fn save_dim(&mut self, dim: usize) {
        self.save(Saved::Dim(dim));
    }

    pub fn saved(&self) -> &[Saved<T>] {
        &self.saved
    }

    // The typed accessors treat a wrong kind or position as a bug in the
    // Function that wrote the Context, not a user error.

    pub fn tensor_at(&self, i: usize) -> &Tensor<T> {
        match &self.saved[i] {
            Saved::Tensor(t) => t,
            other => panic!("saved slot {i} holds {other:?}, expected a tensor"),
        }
    }

    pub fn shape_at(&self, i: usize) -> &Shape {
        match &self.saved[i] {
            Saved::Shape(s) => s,
            other => panic!("saved slot {i} holds {other:?}, expected a shape"),
        }
    }

    pub fn dim_at(&self, i: usize) -> usize {
        match &self.saved[i] {
            Saved::Dim(d) => *d,
            other => panic!("saved slot {i} holds {other:?}, expected a dim"),
        }
    }
}

impl<T: Element> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("no_grad", &self.no_grad)
            .field("saved", &self.saved)
            .finish()
    }
}

/// A differentiable operation.
///
/// `forward` receives history-free inputs; `backward` must return exactly
/// one gradient per input, in input order. Gradients may still carry
/// broadcast shapes — reconciliation to each input's shape happens later,
/// in the backpropagation sweep.
pub trait Function<T: Element>: fmt::Debug + Send + Sync {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>>;
    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>>;
}

/// Run a Function on `inputs`, attaching a tape node to the output iff any
/// input tracks gradients.
pub fn apply<T: Element, F: Function<T> + 'static>(
    func: F,
    inputs: &[Tensor<T>],
) -> Result<Tensor<T>> {
    let need_grad = inputs.iter().any(|t| t.requires_grad());
    let mut ctx = Context::new(!need_grad);
    let raw: Vec<Tensor<T>> = inputs.iter().map(|t| t.detach()).collect();
    let out = func.forward(&mut ctx, &raw)?;
    if need_grad {
        Ok(out.with_history(History {
            func: Some(Box::new(func)),
            ctx,
            inputs: inputs.to_vec(),
        }))
    } else {
        Ok(out)
    }
}

fn single<'a, T: Element>(inputs: &'a [Tensor<T>], name: &str) -> &'a Tensor<T> {
    match inputs {
        [x] => x,
        _ => panic!("{name} expects exactly 1 input, got {}", inputs.len()),
    }
}

fn pair<'a, T: Element>(inputs: &'a [Tensor<T>], name: &str) -> (&'a Tensor<T>, &'a Tensor<T>) {
    match inputs {
        [a, b] => (a, b),
        _ => panic!("{name} expects exactly 2 inputs, got {}", inputs.len()),
    }
}

fn from_storage<T: Element>(storage: Storage<T>, like: &Tensor<T>) -> Tensor<T> {
    Tensor::from_parts(storage, like.backend().clone())
}

// ---- structural ops ----

/// Materialize the input in row-major layout.
#[derive(Debug)]
pub struct Contiguous;

impl<T: Element> Function<T> for Contiguous {
    fn forward(&self, _ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let x = single(inputs, "Contiguous");
        let out = x.backend().id_map(x.storage(), x.shape())?;
        Ok(from_storage(out, x))
    }

    fn backward(&self, _ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        Ok(vec![grad.clone()])
    }
}

/// Reinterpret a contiguous input under a new shape.
#[derive(Debug)]
pub struct View {
    pub shape: Shape,
}

impl<T: Element> Function<T> for View {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let x = single(inputs, "View");
        ctx.save_shape(x.shape());
        let out = x.storage().view(self.shape.clone())?;
        Ok(from_storage(out, x))
    }

    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        let original = ctx.shape_at(0);
        let flat = grad.backend().id_map(grad.storage(), grad.shape())?;
        Ok(vec![from_storage(flat.view(original)?, grad)])
    }
}

/// Drop a size-1 dimension.
#[derive(Debug)]
pub struct Squeeze {
    pub dim: usize,
}

impl<T: Element> Function<T> for Squeeze {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let x = single(inputs, "Squeeze");
        let size = x.shape().dim(self.dim)?;
        if size != 1 {
            crate::bail!(
                "cannot squeeze dim {} of size {} in shape {}",
                self.dim,
                size,
                x.shape()
            );
        }
        ctx.save_dim(self.dim);
        let mut dims = x.shape().dims().to_vec();
        dims.remove(self.dim);
        let out = x.storage().view(dims)?;
        Ok(from_storage(out, x))
    }

    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        let dim = ctx.dim_at(0);
        let mut dims = grad.shape().dims().to_vec();
        dims.insert(dim, 1);
        let flat = grad.backend().id_map(grad.storage(), grad.shape())?;
        Ok(vec![from_storage(flat.view(dims)?, grad)])
    }
}

/// Insert a size-1 dimension.
#[derive(Debug)]
pub struct Unsqueeze {
    pub dim: usize,
}

impl<T: Element> Function<T> for Unsqueeze {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let x = single(inputs, "Unsqueeze");
        if self.dim > x.shape().rank() {
            return Err(Error::DimOutOfRange {
                dim: self.dim,
                rank: x.shape().rank(),
            });
        }
        ctx.save_dim(self.dim);
        let mut dims = x.shape().dims().to_vec();
        dims.insert(self.dim, 1);
        let out = x.storage().view(dims)?;
        Ok(from_storage(out, x))
    }

    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        let dim = ctx.dim_at(0);
        let mut dims = grad.shape().dims().to_vec();
        dims.remove(dim);
        let flat = grad.backend().id_map(grad.storage(), grad.shape())?;
        Ok(vec![from_storage(flat.view(dims)?, grad)])
    }
}

// ---- unary math ----

#[derive(Debug)]
pub struct Neg;

impl<T: Element> Function<T> for Neg {
    fn forward(&self, _ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let x = single(inputs, "Neg");
        Ok(from_storage(x.backend().neg_map(x.storage())?, x))
    }

    fn backward(&self, _ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        Ok(vec![from_storage(
            grad.backend().neg_map(grad.storage())?,
            grad,
        )])
    }
}

#[derive(Debug)]
pub struct Inv;

impl<T: Element> Function<T> for Inv {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let x = single(inputs, "Inv");
        ctx.save_tensor(x);
        Ok(from_storage(x.backend().inv_map(x.storage())?, x))
    }

    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        let x = ctx.tensor_at(0);
        let out = grad.backend().inv_back_zip(x.storage(), grad.storage())?;
        Ok(vec![from_storage(out, grad)])
    }
}

#[derive(Debug)]
pub struct Relu;

impl<T: Element> Function<T> for Relu {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let x = single(inputs, "Relu");
        let out = from_storage(x.backend().relu_map(x.storage())?, x);
        ctx.save_tensor(x);
        ctx.save_tensor(&out);
        Ok(out)
    }

    // Pass the gradient where the input survived the clamp. The mask is
    // input == output, which is 1 exactly on the non-negative side.
    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        let x = ctx.tensor_at(0);
        let out = ctx.tensor_at(1);
        let mask = grad.backend().eq_zip(x.storage(), out.storage())?;
        let masked = grad.backend().mul_zip(&mask, grad.storage())?;
        Ok(vec![from_storage(masked, grad)])
    }
}

#[derive(Debug)]
pub struct Exp;

impl<T: Element> Function<T> for Exp {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let x = single(inputs, "Exp");
        let out = from_storage(x.backend().exp_map(x.storage())?, x);
        ctx.save_tensor(&out);
        Ok(out)
    }

    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        let out = ctx.tensor_at(0);
        let scaled = grad.backend().mul_zip(out.storage(), grad.storage())?;
        Ok(vec![from_storage(scaled, grad)])
    }
}

#[derive(Debug)]
pub struct Sigmoid;

impl<T: Element> Function<T> for Sigmoid {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let x = single(inputs, "Sigmoid");
        let out = from_storage(x.backend().sigmoid_map(x.storage())?, x);
        ctx.save_tensor(&out);
        Ok(out)
    }

    // d/dx sigmoid = s * (1 - s)
    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        let s = ctx.tensor_at(0);
        let local = grad.backend().sigmoid_back_map(s.storage())?;
        let scaled = grad.backend().mul_zip(&local, grad.storage())?;
        Ok(vec![from_storage(scaled, grad)])
    }
}

// ---- binary math ----

#[derive(Debug)]
pub struct Add;

impl<T: Element> Function<T> for Add {
    fn forward(&self, _ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let (a, b) = pair(inputs, "Add");
        Ok(from_storage(
            a.backend().add_zip(a.storage(), b.storage())?,
            a,
        ))
    }

    // Both gradients are the output gradient; broadcast reconciliation
    // brings each back to its operand's shape.
    fn backward(&self, _ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        Ok(vec![grad.clone(), grad.clone()])
    }
}

#[derive(Debug)]
pub struct Mul;

impl<T: Element> Function<T> for Mul {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let (a, b) = pair(inputs, "Mul");
        ctx.save_tensor(a);
        ctx.save_tensor(b);
        Ok(from_storage(
            a.backend().mul_zip(a.storage(), b.storage())?,
            a,
        ))
    }

    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        let a = ctx.tensor_at(0);
        let b = ctx.tensor_at(1);
        let da = grad.backend().mul_zip(b.storage(), grad.storage())?;
        let db = grad.backend().mul_zip(a.storage(), grad.storage())?;
        Ok(vec![from_storage(da, grad), from_storage(db, grad)])
    }
}

// ---- reductions ----

#[derive(Debug)]
pub struct Sum {
    pub dim: usize,
}

impl<T: Element> Function<T> for Sum {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let x = single(inputs, "Sum");
        ctx.save_shape(x.shape());
        Ok(from_storage(
            x.backend().add_reduce(x.storage(), self.dim)?,
            x,
        ))
    }

    // Every input element contributed once, so the gradient broadcasts
    // straight back up to the input shape.
    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        let input_shape = ctx.shape_at(0);
        let up = grad.backend().id_map(grad.storage(), input_shape)?;
        Ok(vec![from_storage(up, grad)])
    }
}

// ---- matmul ----

#[derive(Debug)]
pub struct MatMul;

impl<T: Element> Function<T> for MatMul {
    fn forward(&self, ctx: &mut Context<T>, inputs: &[Tensor<T>]) -> Result<Tensor<T>> {
        let (a, b) = pair(inputs, "MatMul");
        ctx.save_tensor(a);
        ctx.save_tensor(b);
        Ok(from_storage(
            a.backend().matrix_multiply(a.storage(), b.storage())?,
            a,
        ))
    }

    // dA = G @ Bᵀ, dB = Aᵀ @ G, with the transpose on the last two dims.
    fn backward(&self, ctx: &Context<T>, grad: &Tensor<T>) -> Result<Vec<Tensor<T>>> {
        let a = ctx.tensor_at(0);
        let b = ctx.tensor_at(1);
        let bt = transpose_last_two(b.storage())?;
        let at = transpose_last_two(a.storage())?;
        let da = grad.backend().matrix_multiply(grad.storage(), &bt)?;
        let db = grad.backend().matrix_multiply(&at, grad.storage())?;
        Ok(vec![from_storage(da, grad), from_storage(db, grad)])
    }
}

fn transpose_last_two<T: Element>(storage: &Storage<T>) -> Result<Storage<T>> {
    let rank = storage.rank();
    if rank < 2 {
        return Err(Error::DimOutOfRange { dim: 1, rank });
    }
    let mut order: Vec<usize> = (0..rank).collect();
    order.swap(rank - 2, rank - 1);
    storage.permute(&order)
}
