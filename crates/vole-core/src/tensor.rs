use std::fmt;
use std::sync::{Arc, RwLock};

use rand::distributions::{Distribution, Uniform};
use rand::Rng;

use crate::autodiff::backpropagate;
use crate::backend::Backend;
use crate::element::Element;
use crate::error::{Error, Result};
use crate::function::{
    self, Add, Context, Contiguous, Exp, Function, Inv, MatMul, Mul, Neg, Relu, Sigmoid, Squeeze,
    Sum, Unsqueeze, View,
};
use crate::shape::Shape;
use crate::storage::Storage;

// Tensor — The user-facing handle
//
// A Tensor is four fields, all cheap to clone:
//
//   storage — strided data, shared between clones and views
//   backend — the kernel strategy every operation on this tensor uses
//   history — None for a constant; Some for a tracked tensor. A leaf has
//             an empty History (no func); an internal node records the
//             Function and inputs that produced it
//   grad    — a shared slot the backward sweep deposits into; every clone
//             of a leaf sees the same gradient
//
// The handle's gradient state machine:
//
//   constant --set_requires_grad(true)--> leaf
//   leaf     --set_requires_grad(false)-> constant
//   any op on a tracked tensor ---------> internal node
//   internal --detach()-----------------> constant (shares storage)
//
// set_requires_grad(true) on a tensor that already tracks gradients is a
// no-op: silently severing an internal node from its producer would
// corrupt the tape.
//
// Operation outputs inherit the backend of their first operand.

pub struct History<T: Element> {
    pub(crate) func: Option<Box<dyn Function<T>>>,
    pub(crate) ctx: Context<T>,
    pub(crate) inputs: Vec<Tensor<T>>,
}

impl<T: Element> History<T> {
    fn leaf() -> Self {
        History {
            func: None,
            ctx: Context::new(true),
            inputs: Vec::new(),
        }
    }
}

pub struct Tensor<T: Element> {
    storage: Storage<T>,
    backend: Backend<T>,
    history: Option<Arc<History<T>>>,
    grad: Arc<RwLock<Option<Tensor<T>>>>,
}

impl<T: Element> Clone for Tensor<T> {
    fn clone(&self) -> Self {
        Tensor {
            storage: self.storage.clone(),
            backend: self.backend.clone(),
            history: self.history.clone(),
            grad: Arc::clone(&self.grad),
        }
    }
}

impl<T: Element> fmt::Debug for Tensor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("constant", &self.is_constant())
            .field("leaf", &self.is_leaf())
            .finish()
    }
}

// ---- construction ----

impl<T: Element> Tensor<T> {
    /// Wrap existing storage as a constant tensor.
    pub fn from_parts(storage: Storage<T>, backend: Backend<T>) -> Self {
        Tensor {
            storage,
            backend,
            history: None,
            grad: Arc::new(RwLock::new(None)),
        }
    }

    /// Build a tensor from a flat row-major vector.
    pub fn from_vec(
        data: Vec<T>,
        shape: impl Into<Shape>,
        backend: Backend<T>,
    ) -> Result<Self> {
        Ok(Self::from_parts(Storage::new(data, shape)?, backend))
    }

    /// Build a read-only tensor over a static data region (e.g. weights
    /// embedded in the binary).
    pub fn from_static(
        data: &'static [T],
        shape: impl Into<Shape>,
        backend: Backend<T>,
    ) -> Result<Self> {
        Ok(Self::from_parts(Storage::from_static(data, shape)?, backend))
    }

    /// A single-element tensor of shape [1].
    pub fn scalar(value: T, backend: Backend<T>) -> Self {
        Self::from_parts(Storage::full(value, 1), backend)
    }

    pub fn full(value: T, shape: impl Into<Shape>, backend: Backend<T>) -> Self {
        Self::from_parts(Storage::full(value, shape), backend)
    }

    pub fn zeros(shape: impl Into<Shape>, backend: Backend<T>) -> Self {
        Self::full(T::ZERO, shape, backend)
    }

    pub fn ones(shape: impl Into<Shape>, backend: Backend<T>) -> Self {
        Self::full(T::ONE, shape, backend)
    }

    /// The n-by-n identity matrix.
    pub fn eye(n: usize, backend: Backend<T>) -> Result<Self> {
        let mut data = vec![T::ZERO; n * n];
        for i in 0..n {
            data[i * (n + 1)] = T::ONE;
        }
        Self::from_vec(data, [n, n], backend)
    }

    /// Uniform samples in [0, 1). The generator is always passed in;
    /// callers own their seeding.
    pub fn rand<R: Rng + ?Sized>(
        shape: impl Into<Shape>,
        backend: Backend<T>,
        rng: &mut R,
    ) -> Result<Self> {
        let shape = shape.into();
        let data = (0..shape.elem_count())
            .map(|_| T::from_f64(rng.gen::<f64>()))
            .collect();
        Self::from_vec(data, shape, backend)
    }

    /// Uniform samples in [low, high).
    pub fn rand_uniform<R: Rng + ?Sized>(
        shape: impl Into<Shape>,
        low: f64,
        high: f64,
        backend: Backend<T>,
        rng: &mut R,
    ) -> Result<Self> {
        let shape = shape.into();
        let dist = Uniform::new(low, high);
        let data = (0..shape.elem_count())
            .map(|_| T::from_f64(dist.sample(rng)))
            .collect();
        Self::from_vec(data, shape, backend)
    }
}

// ---- inspection ----

impl<T: Element> Tensor<T> {
    pub fn storage(&self) -> &Storage<T> {
        &self.storage
    }

    pub fn backend(&self) -> &Backend<T> {
        &self.backend
    }

    pub fn shape(&self) -> &Shape {
        self.storage.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.storage.shape().dims()
    }

    pub fn rank(&self) -> usize {
        self.storage.rank()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.storage.size()
    }

    pub fn is_contiguous(&self) -> bool {
        self.storage.is_contiguous()
    }

    /// The elements in logical row-major order.
    pub fn to_vec(&self) -> Vec<T> {
        self.storage.to_vec()
    }

    pub fn get(&self, index: &[usize]) -> Result<T> {
        self.storage.get(index)
    }

    /// The value of a single-element tensor.
    pub fn item(&self) -> Result<T> {
        if self.size() != 1 {
            return Err(Error::NotAScalar {
                shape: self.shape().clone(),
            });
        }
        self.storage.at(0)
    }
}

// ---- gradient state ----

impl<T: Element> Tensor<T> {
    /// Whether this tensor participates in gradient tracking.
    pub fn requires_grad(&self) -> bool {
        self.history.is_some()
    }

    /// A constant has no history and is pruned from backward traversals.
    pub fn is_constant(&self) -> bool {
        self.history.is_none()
    }

    /// A leaf is tracked but was not produced by an operation; gradients
    /// come to rest here.
    pub fn is_leaf(&self) -> bool {
        match &self.history {
            Some(h) => h.func.is_none(),
            None => false,
        }
    }

    /// The inputs recorded by the operation that produced this tensor.
    /// Constants and leaves have none.
    pub fn parents(&self) -> Vec<Tensor<T>> {
        match &self.history {
            Some(h) => h.inputs.clone(),
            None => Vec::new(),
        }
    }

    /// Turn gradient tracking on or off. Turning it on is a no-op when the
    /// tensor already tracks gradients; turning it off detaches in place.
    pub fn set_requires_grad(mut self, requires: bool) -> Self {
        if requires {
            if self.history.is_none() {
                self.history = Some(Arc::new(History::leaf()));
            }
        } else {
            self.history = None;
        }
        self
    }

    /// A constant handle over the same storage, with a fresh gradient slot.
    pub fn detach(&self) -> Tensor<T> {
        Tensor {
            storage: self.storage.clone(),
            backend: self.backend.clone(),
            history: None,
            grad: Arc::new(RwLock::new(None)),
        }
    }

    pub(crate) fn with_history(mut self, history: History<T>) -> Tensor<T> {
        self.history = Some(Arc::new(history));
        self
    }

    pub(crate) fn history(&self) -> Option<&History<T>> {
        self.history.as_deref()
    }

    /// Graph-node identity: the address of the shared History. All clones
    /// of one tracked tensor share it. Constants are identity-free.
    pub(crate) fn id(&self) -> usize {
        match &self.history {
            Some(h) => Arc::as_ptr(h) as usize,
            None => 0,
        }
    }

    /// The accumulated gradient, if a backward pass has produced one.
    pub fn grad(&self) -> Option<Tensor<T>> {
        self.grad.read().expect("grad lock poisoned").clone()
    }

    /// Clear the accumulated gradient.
    pub fn zero_grad(&self) {
        *self.grad.write().expect("grad lock poisoned") = None;
    }

    /// Fold a finished gradient into the slot. Only leaves accumulate;
    /// anything else is a bug in the sweep.
    pub(crate) fn add_grad(&self, update: &Tensor<T>) {
        assert!(self.is_leaf(), "add_grad called on a non-leaf tensor");
        assert_eq!(
            self.shape(),
            update.shape(),
            "gradient shape does not match tensor shape"
        );
        let mut slot = self.grad.write().expect("grad lock poisoned");
        let next = match slot.as_ref() {
            Some(existing) => match existing.add_raw(update) {
                Ok(sum) => sum,
                Err(e) => panic!("gradient accumulation failed: {e}"),
            },
            None => update.detach(),
        };
        *slot = Some(next);
    }

    /// Untracked elementwise add, used by gradient accumulation.
    pub(crate) fn add_raw(&self, other: &Tensor<T>) -> Result<Tensor<T>> {
        Ok(Tensor::from_parts(
            self.backend.add_zip(&self.storage, &other.storage)?,
            self.backend.clone(),
        ))
    }

    /// Reconcile a gradient produced under broadcasting back to this
    /// tensor's shape: broadcast it up to the joint shape, sum out every
    /// axis this tensor did not actually have, and view the result back to
    /// the exact shape.
    pub fn expand(&self, grad: &Tensor<T>) -> Result<Tensor<T>> {
        if self.shape() == grad.shape() {
            return Ok(grad.clone());
        }
        let true_shape = self.shape().broadcast(grad.shape())?;
        let mut storage = self.backend.id_map(&grad.storage, &true_shape)?;
        if *self.shape() != true_shape {
            let pad = true_shape.rank() - self.rank();
            let mut padded = vec![1; pad];
            padded.extend_from_slice(self.dims());
            for (dim, &size) in true_shape.dims().iter().enumerate() {
                if padded[dim] == 1 && size != 1 {
                    storage = self.backend.add_reduce(&storage, dim)?;
                }
            }
        }
        assert_eq!(
            storage.size(),
            self.size(),
            "gradient element count mismatch after reconciliation"
        );
        Ok(Tensor::from_parts(
            storage.view(self.shape().clone())?,
            self.backend.clone(),
        ))
    }

    /// Run the reverse sweep from a single-element tensor, seeding with 1.
    pub fn backward(&self) -> Result<()> {
        if self.is_constant() {
            return Err(Error::UnsupportedOperation(
                "backward on a tensor without gradient tracking".to_string(),
            ));
        }
        if self.size() != 1 {
            return Err(Error::NotAScalar {
                shape: self.shape().clone(),
            });
        }
        let seed = Tensor::from_parts(
            Storage::full(T::ONE, self.shape().clone()),
            self.backend.clone(),
        );
        backpropagate(self, seed)
    }

    /// Run the reverse sweep with an explicit output gradient.
    pub fn backward_with(&self, seed: &Tensor<T>) -> Result<()> {
        if self.is_constant() {
            return Err(Error::UnsupportedOperation(
                "backward on a tensor without gradient tracking".to_string(),
            ));
        }
        if seed.shape() != self.shape() {
            return Err(Error::ShapeMismatch {
                lhs: self.shape().clone(),
                rhs: seed.shape().clone(),
            });
        }
        backpropagate(self, seed.detach())
    }
}

// ---- differentiable operations ----

impl<T: Element> Tensor<T> {
    fn unary<F: Function<T> + 'static>(&self, func: F) -> Result<Tensor<T>> {
        function::apply(func, std::slice::from_ref(self))
    }

    fn binary<F: Function<T> + 'static>(&self, func: F, other: &Tensor<T>) -> Result<Tensor<T>> {
        function::apply(func, &[self.clone(), other.clone()])
    }

    /// Materialize in row-major layout (a tracked copy).
    pub fn contiguous(&self) -> Result<Tensor<T>> {
        self.unary(Contiguous)
    }

    /// Reinterpret under a new shape with the same element count.
    pub fn view(&self, shape: impl Into<Shape>) -> Result<Tensor<T>> {
        let shape = shape.into();
        if self.is_contiguous() {
            self.unary(View { shape })
        } else {
            let c = self.contiguous()?;
            c.unary(View { shape })
        }
    }

    /// Drop a size-1 dimension.
    pub fn squeeze(&self, dim: usize) -> Result<Tensor<T>> {
        if self.is_contiguous() {
            self.unary(Squeeze { dim })
        } else {
            self.contiguous()?.unary(Squeeze { dim })
        }
    }

    /// Insert a size-1 dimension.
    pub fn unsqueeze(&self, dim: usize) -> Result<Tensor<T>> {
        if self.is_contiguous() {
            self.unary(Unsqueeze { dim })
        } else {
            self.contiguous()?.unary(Unsqueeze { dim })
        }
    }

    pub fn neg(&self) -> Result<Tensor<T>> {
        self.unary(Neg)
    }

    /// Elementwise reciprocal.
    pub fn inv(&self) -> Result<Tensor<T>> {
        self.unary(Inv)
    }

    pub fn relu(&self) -> Result<Tensor<T>> {
        self.unary(Relu)
    }

    pub fn exp(&self) -> Result<Tensor<T>> {
        self.unary(Exp)
    }

    pub fn sigmoid(&self) -> Result<Tensor<T>> {
        self.unary(Sigmoid)
    }

    pub fn add(&self, other: &Tensor<T>) -> Result<Tensor<T>> {
        self.binary(Add, other)
    }

    pub fn sub(&self, other: &Tensor<T>) -> Result<Tensor<T>> {
        self.binary(Add, &other.neg()?)
    }

    pub fn mul(&self, other: &Tensor<T>) -> Result<Tensor<T>> {
        self.binary(Mul, other)
    }

    pub fn div(&self, other: &Tensor<T>) -> Result<Tensor<T>> {
        self.binary(Mul, &other.inv()?)
    }

    pub fn add_scalar(&self, value: T) -> Result<Tensor<T>> {
        self.add(&Tensor::scalar(value, self.backend.clone()))
    }

    pub fn mul_scalar(&self, value: T) -> Result<Tensor<T>> {
        self.mul(&Tensor::scalar(value, self.backend.clone()))
    }

    /// Sum over one dimension (keeping it as size 1), or over everything
    /// down to a single element.
    pub fn sum(&self, dim: Option<usize>) -> Result<Tensor<T>> {
        match dim {
            Some(dim) => self.unary(Sum { dim }),
            None => self.view([self.size()])?.unary(Sum { dim: 0 }),
        }
    }

    pub fn mean(&self, dim: Option<usize>) -> Result<Tensor<T>> {
        let count = match dim {
            Some(dim) => self.shape().dim(dim)?,
            None => self.size(),
        };
        self.sum(dim)?
            .mul_scalar(T::from_f64(1.0 / count as f64))
    }

    /// Batched matrix multiplication with broadcast batch dimensions.
    pub fn matmul(&self, other: &Tensor<T>) -> Result<Tensor<T>> {
        self.binary(MatMul, other)
    }

    /// Softmax along one dimension, as exp normalized by its sum.
    pub fn softmax(&self, dim: usize) -> Result<Tensor<T>> {
        let e = self.exp()?;
        let total = e.sum(Some(dim))?;
        e.div(&total)
    }
}

// ---- non-differentiable operations ----

impl<T: Element> Tensor<T> {
    /// Exact elementwise equality (1/0). Constant output.
    pub fn eq(&self, other: &Tensor<T>) -> Result<Tensor<T>> {
        Ok(Tensor::from_parts(
            self.backend.eq_zip(&self.storage, &other.storage)?,
            self.backend.clone(),
        ))
    }

    /// Approximate elementwise equality (1/0). Constant output.
    pub fn is_close(&self, other: &Tensor<T>, atol: f64, rtol: f64) -> Result<Tensor<T>> {
        Ok(Tensor::from_parts(
            self.backend
                .is_close_zip(&self.storage, &other.storage, atol, rtol)?,
            self.backend.clone(),
        ))
    }

    /// 1 iff every element along `dim` (or everywhere) is nonzero.
    pub fn all(&self, dim: Option<usize>) -> Result<Tensor<T>> {
        let storage = match dim {
            Some(dim) => self.backend.all_reduce(&self.storage, dim)?,
            None => {
                let flat = if self.is_contiguous() {
                    self.storage.view(self.size())?
                } else {
                    self.backend
                        .id_map(&self.storage, self.shape())?
                        .view(self.size())?
                };
                self.backend.all_reduce(&flat, 0)?
            }
        };
        Ok(Tensor::from_parts(storage, self.backend.clone()))
    }

    /// Maximum along one dimension. Constant output.
    pub fn max(&self, dim: usize) -> Result<Tensor<T>> {
        Ok(Tensor::from_parts(
            self.backend.max_reduce(&self.storage, dim)?,
            self.backend.clone(),
        ))
    }

    /// Minimum along one dimension. Constant output.
    pub fn min(&self, dim: usize) -> Result<Tensor<T>> {
        Ok(Tensor::from_parts(
            self.backend.min_reduce(&self.storage, dim)?,
            self.backend.clone(),
        ))
    }

    /// Position of the maximum along `dim`; ties keep the earlier one.
    pub fn argmax(&self, dim: usize) -> Result<Tensor<T>> {
        Ok(Tensor::from_parts(
            self.backend.argmax_reduce(&self.storage, dim)?,
            self.backend.clone(),
        ))
    }

    /// Position of the minimum along `dim`; ties keep the earlier one.
    pub fn argmin(&self, dim: usize) -> Result<Tensor<T>> {
        Ok(Tensor::from_parts(
            self.backend.argmin_reduce(&self.storage, dim)?,
            self.backend.clone(),
        ))
    }
}

// ---- in-place data management ----

impl<T: Element> Tensor<T> {
    /// Overwrite the elements with those of `src` (shapes must match).
    /// The write is visible through every handle sharing this storage;
    /// used for optimizer parameter updates.
    pub fn update_data(&self, src: &Tensor<T>) -> Result<()> {
        self.storage.copy_from(&src.storage)
    }

    /// Delete the slice at `idx` along `dim`, shrinking the tensor in
    /// place. Any accumulated gradient no longer matches and is cleared.
    pub fn remove(&mut self, dim: usize, idx: usize) -> Result<()> {
        self.storage.remove(dim, idx)?;
        self.zero_grad();
        Ok(())
    }
}
