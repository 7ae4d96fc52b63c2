use std::fmt;
use std::sync::Arc;

use crate::element::Element;
use crate::error::Result;
use crate::ops::{ParOps, SeqOps, TensorOps};
use crate::shape::Shape;
use crate::storage::Storage;

// Backend — The operation vocabulary derived from five kernels
//
// A Backend is a cheap handle (an Arc around a kernel strategy) that every
// tensor carries. All tensor math is phrased here as map/zip/reduce calls
// with concrete scalar closures, so a new strategy only has to implement
// the TensorOps trait to get the full operation set.
//
// Results of binary helpers take the broadcast of the operand shapes;
// unary helpers keep the input shape except id_map, which is the
// broadcast-up primitive the gradient machinery uses.

pub struct Backend<T: Element> {
    ops: Arc<dyn TensorOps<T>>,
}

impl<T: Element> Clone for Backend<T> {
    fn clone(&self) -> Self {
        Backend {
            ops: Arc::clone(&self.ops),
        }
    }
}

impl<T: Element> fmt::Debug for Backend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Backend({:?})", self.ops)
    }
}

impl<T: Element> Default for Backend<T> {
    fn default() -> Self {
        Self::seq()
    }
}

impl<T: Element> Backend<T> {
    pub fn new(ops: Arc<dyn TensorOps<T>>) -> Self {
        Backend { ops }
    }

    /// The single-threaded reference strategy.
    pub fn seq() -> Self {
        Backend {
            ops: Arc::new(SeqOps),
        }
    }

    /// The multi-threaded strategy (parallel matmul).
    pub fn par() -> Self {
        Backend {
            ops: Arc::new(ParOps),
        }
    }

    /// Two backends are interchangeable handles iff they share a strategy.
    pub fn same_strategy(&self, other: &Backend<T>) -> bool {
        Arc::ptr_eq(&self.ops, &other.ops)
    }

    // ---- unary maps ----

    pub fn neg_map(&self, input: &Storage<T>) -> Result<Storage<T>> {
        self.ops.map(input, input.shape(), &|v: T| v.neg())
    }

    /// Identity, broadcast up to `out_shape`. The gradient reconciliation
    /// path uses this to expand a small gradient to a bigger shape.
    pub fn id_map(&self, input: &Storage<T>, out_shape: &Shape) -> Result<Storage<T>> {
        self.ops.map(input, out_shape, &|v: T| v)
    }

    pub fn inv_map(&self, input: &Storage<T>) -> Result<Storage<T>> {
        self.ops.map(input, input.shape(), &|v: T| T::ONE.div(v))
    }

    pub fn relu_map(&self, input: &Storage<T>) -> Result<Storage<T>> {
        self.ops
            .map(input, input.shape(), &|v: T| if v > T::ZERO { v } else { T::ZERO })
    }

    pub fn exp_map(&self, input: &Storage<T>) -> Result<Storage<T>> {
        self.ops.map(input, input.shape(), &|v: T| v.exp())
    }

    /// Numerically stable logistic: the two branches avoid exp overflow
    /// for large |x|.
    pub fn sigmoid_map(&self, input: &Storage<T>) -> Result<Storage<T>> {
        self.ops.map(input, input.shape(), &|v: T| {
            let x = v.to_f64();
            let s = if x >= 0.0 {
                1.0 / (1.0 + (-x).exp())
            } else {
                let e = x.exp();
                e / (1.0 + e)
            };
            T::from_f64(s)
        })
    }

    /// Local derivative of the logistic, evaluated on its output:
    /// s * (1 - s).
    pub fn sigmoid_back_map(&self, output: &Storage<T>) -> Result<Storage<T>> {
        self.ops
            .map(output, output.shape(), &|s: T| s.mul(T::ONE.sub(s)))
    }

    // ---- binary zips ----

    fn zip_broadcast(
        &self,
        lhs: &Storage<T>,
        rhs: &Storage<T>,
        f: &(dyn Fn(T, T) -> T + Sync),
    ) -> Result<Storage<T>> {
        let out_shape = lhs.shape().broadcast(rhs.shape())?;
        self.ops.zip(lhs, rhs, &out_shape, f)
    }

    pub fn add_zip(&self, lhs: &Storage<T>, rhs: &Storage<T>) -> Result<Storage<T>> {
        self.zip_broadcast(lhs, rhs, &|l: T, r: T| l.add(r))
    }

    pub fn mul_zip(&self, lhs: &Storage<T>, rhs: &Storage<T>) -> Result<Storage<T>> {
        self.zip_broadcast(lhs, rhs, &|l: T, r: T| l.mul(r))
    }

    /// Exact equality, producing 1 or 0.
    pub fn eq_zip(&self, lhs: &Storage<T>, rhs: &Storage<T>) -> Result<Storage<T>> {
        self.zip_broadcast(lhs, rhs, &|l: T, r: T| if l == r { T::ONE } else { T::ZERO })
    }

    /// Approximate equality: |l - r| <= atol + rtol * |r|.
    pub fn is_close_zip(
        &self,
        lhs: &Storage<T>,
        rhs: &Storage<T>,
        atol: f64,
        rtol: f64,
    ) -> Result<Storage<T>> {
        self.zip_broadcast(lhs, rhs, &move |l: T, r: T| {
            let close = (l.to_f64() - r.to_f64()).abs() <= atol + rtol * r.to_f64().abs();
            if close {
                T::ONE
            } else {
                T::ZERO
            }
        })
    }

    /// Backward of the reciprocal: d(1/x) pulled back through `grad`,
    /// i.e. -grad / x².
    pub fn inv_back_zip(&self, input: &Storage<T>, grad: &Storage<T>) -> Result<Storage<T>> {
        self.zip_broadcast(input, grad, &|x: T, d: T| d.neg().div(x.mul(x)))
    }

    // ---- reductions ----

    pub fn add_reduce(&self, input: &Storage<T>, dim: usize) -> Result<Storage<T>> {
        self.ops.reduce(input, dim, T::ZERO, &|a: T, b: T| a.add(b))
    }

    pub fn mul_reduce(&self, input: &Storage<T>, dim: usize) -> Result<Storage<T>> {
        self.ops.reduce(input, dim, T::ONE, &|a: T, b: T| a.mul(b))
    }

    /// Logical all over one dimension: 1 iff every element is nonzero.
    pub fn all_reduce(&self, input: &Storage<T>, dim: usize) -> Result<Storage<T>> {
        self.ops.reduce(input, dim, T::ONE, &|a: T, b: T| {
            if a != T::ZERO && b != T::ZERO {
                T::ONE
            } else {
                T::ZERO
            }
        })
    }

    pub fn max_reduce(&self, input: &Storage<T>, dim: usize) -> Result<Storage<T>> {
        self.ops.reduce(input, dim, T::MIN, &|a: T, b: T| if a >= b { a } else { b })
    }

    pub fn min_reduce(&self, input: &Storage<T>, dim: usize) -> Result<Storage<T>> {
        self.ops.reduce(input, dim, T::MAX, &|a: T, b: T| if a <= b { a } else { b })
    }

    /// Position of the maximum along `dim`; ties keep the earlier position.
    pub fn argmax_reduce(&self, input: &Storage<T>, dim: usize) -> Result<Storage<T>> {
        self.ops.reduce_index(
            input,
            dim,
            T::MIN,
            &|acc: T, pos: usize, v: T, j: usize| if acc >= v { (acc, pos) } else { (v, j) },
        )
    }

    /// Position of the minimum along `dim`; ties keep the earlier position.
    pub fn argmin_reduce(&self, input: &Storage<T>, dim: usize) -> Result<Storage<T>> {
        self.ops.reduce_index(
            input,
            dim,
            T::MAX,
            &|acc: T, pos: usize, v: T, j: usize| if acc <= v { (acc, pos) } else { (v, j) },
        )
    }

    // ---- matmul ----

    /// Batched matrix multiplication; validates the inner dimensions and
    /// batch broadcast before handing off to the kernel.
    pub fn matrix_multiply(&self, lhs: &Storage<T>, rhs: &Storage<T>) -> Result<Storage<T>> {
        let out_shape = lhs.shape().broadcast_matmul(rhs.shape())?;
        self.ops.matrix_multiply(lhs, rhs, &out_shape)
    }
}
