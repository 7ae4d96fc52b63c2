use std::fmt;

use crate::element::Element;
use crate::error::{Error, Result};
use crate::shape::{broadcast_index, index_to_offset, Shape};
use crate::storage::Storage;

// TensorOps — The kernel strategy behind every tensor operation
//
// All numeric work in the engine funnels through five kernels:
//
//   map             — elementwise unary, input broadcast to the output shape
//   zip             — elementwise binary, both inputs broadcast
//   reduce          — fold one dimension down to size 1
//   reduce_index    — fold one dimension, tracking the winning position
//                     (argmax/argmin); the output stores the position
//   matrix_multiply — batched matmul with broadcast batch dimensions
//
// A Backend picks one TensorOps implementation and derives every tensor
// operation from these five. SeqOps runs plain loops; ParOps splits the
// matmul output across threads. Kernels always produce fresh contiguous
// owned storage, so they never write through a shared buffer.
//
// Kernels read input buffers under a single lock per call (with_data) and
// address elements by strides directly, which keeps broadcast reads cheap
// and works identically for owned and borrowed storage.

pub mod par;
pub mod seq;

pub use par::ParOps;
pub use seq::SeqOps;

/// Strategy trait for the low-level kernels.
pub trait TensorOps<T: Element>: fmt::Debug + Send + Sync {
    /// Elementwise unary operation. `input` must broadcast to `out_shape`.
    fn map(
        &self,
        input: &Storage<T>,
        out_shape: &Shape,
        f: &(dyn Fn(T) -> T + Sync),
    ) -> Result<Storage<T>>;

    /// Elementwise binary operation. Both inputs must broadcast to
    /// `out_shape`.
    fn zip(
        &self,
        lhs: &Storage<T>,
        rhs: &Storage<T>,
        out_shape: &Shape,
        f: &(dyn Fn(T, T) -> T + Sync),
    ) -> Result<Storage<T>>;

    /// Fold dimension `dim` down to size 1 with `f`, seeded with `start`.
    fn reduce(
        &self,
        input: &Storage<T>,
        dim: usize,
        start: T,
        f: &(dyn Fn(T, T) -> T + Sync),
    ) -> Result<Storage<T>>;

    /// Like `reduce`, but `f` carries the position of the current winner:
    /// `(acc, acc_pos, value, pos) -> (acc, pos)`. The output stores the
    /// winning position, converted to `T`.
    fn reduce_index(
        &self,
        input: &Storage<T>,
        dim: usize,
        start: T,
        f: &(dyn Fn(T, usize, T, usize) -> (T, usize) + Sync),
    ) -> Result<Storage<T>>;

    /// Batched matrix multiplication `[.., m, k] @ [.., k, n] → [.., m, n]`.
    /// `out_shape` is the already-validated broadcast result.
    fn matrix_multiply(
        &self,
        lhs: &Storage<T>,
        rhs: &Storage<T>,
        out_shape: &Shape,
    ) -> Result<Storage<T>>;
}

fn check_broadcasts_to<T: Element>(input: &Storage<T>, out_shape: &Shape) -> Result<()> {
    let joined = input.shape().broadcast(out_shape)?;
    if joined != *out_shape {
        return Err(Error::ShapeMismatch {
            lhs: input.shape().clone(),
            rhs: out_shape.clone(),
        });
    }
    Ok(())
}

pub(crate) fn map_kernel<T: Element>(
    input: &Storage<T>,
    out_shape: &Shape,
    f: &(dyn Fn(T) -> T + Sync),
) -> Result<Storage<T>> {
    check_broadcasts_to(input, out_shape)?;
    let values = input.with_data(|data| {
        out_shape
            .indices()
            .map(|index| {
                let src = broadcast_index(&index, out_shape, input.shape());
                f(data[index_to_offset(&src, input.strides())])
            })
            .collect::<Vec<T>>()
    });
    Storage::new(values, out_shape.clone())
}

pub(crate) fn zip_kernel<T: Element>(
    lhs: &Storage<T>,
    rhs: &Storage<T>,
    out_shape: &Shape,
    f: &(dyn Fn(T, T) -> T + Sync),
) -> Result<Storage<T>> {
    check_broadcasts_to(lhs, out_shape)?;
    check_broadcasts_to(rhs, out_shape)?;
    let values = lhs.with_data(|lhs_data| {
        rhs.with_data(|rhs_data| {
            out_shape
                .indices()
                .map(|index| {
                    let li = broadcast_index(&index, out_shape, lhs.shape());
                    let ri = broadcast_index(&index, out_shape, rhs.shape());
                    f(
                        lhs_data[index_to_offset(&li, lhs.strides())],
                        rhs_data[index_to_offset(&ri, rhs.strides())],
                    )
                })
                .collect::<Vec<T>>()
        })
    });
    Storage::new(values, out_shape.clone())
}

pub(crate) fn reduce_kernel<T: Element>(
    input: &Storage<T>,
    dim: usize,
    start: T,
    f: &(dyn Fn(T, T) -> T + Sync),
) -> Result<Storage<T>> {
    let dim_size = input.shape().dim(dim)?;
    let mut dims = input.shape().dims().to_vec();
    dims[dim] = 1;
    let out_shape = Shape::new(dims);
    let values = input.with_data(|data| {
        out_shape
            .indices()
            .map(|mut index| {
                let mut acc = start;
                for j in 0..dim_size {
                    index[dim] = j;
                    acc = f(acc, data[index_to_offset(&index, input.strides())]);
                }
                acc
            })
            .collect::<Vec<T>>()
    });
    Storage::new(values, out_shape)
}

pub(crate) fn reduce_index_kernel<T: Element>(
    input: &Storage<T>,
    dim: usize,
    start: T,
    f: &(dyn Fn(T, usize, T, usize) -> (T, usize) + Sync),
) -> Result<Storage<T>> {
    let dim_size = input.shape().dim(dim)?;
    let mut dims = input.shape().dims().to_vec();
    dims[dim] = 1;
    let out_shape = Shape::new(dims);
    let values = input.with_data(|data| {
        out_shape
            .indices()
            .map(|mut index| {
                let mut acc = start;
                let mut pos = 0;
                for j in 0..dim_size {
                    index[dim] = j;
                    let value = data[index_to_offset(&index, input.strides())];
                    (acc, pos) = f(acc, pos, value, j);
                }
                T::from_f64(pos as f64)
            })
            .collect::<Vec<T>>()
    });
    Storage::new(values, out_shape)
}

/// One output cell of a batched matmul. `out_index` addresses a cell of
/// `out_shape`; batch dimensions broadcast into each operand, the matrix
/// dimensions address it directly.
pub(crate) fn matmul_cell<T: Element>(
    lhs_data: &[T],
    lhs: &Storage<T>,
    rhs_data: &[T],
    rhs: &Storage<T>,
    out_shape: &Shape,
    out_index: &[usize],
) -> T {
    let rank = out_shape.rank();
    let k = lhs.shape().dims()[lhs.rank() - 1];

    // Pseudo-shapes the operand coordinates live in: the output's batch
    // dims with [m, k] and [k, n] appended.
    let mut lhs_big = out_shape.dims().to_vec();
    lhs_big[rank - 1] = k;
    let lhs_big = Shape::new(lhs_big);
    let mut rhs_big = out_shape.dims().to_vec();
    rhs_big[rank - 2] = k;
    let rhs_big = Shape::new(rhs_big);

    let mut lhs_index = out_index.to_vec(); // [batch.., i, t]
    let mut rhs_index = out_index.to_vec(); // [batch.., t, j]
    let mut acc = T::ZERO;
    for t in 0..k {
        lhs_index[rank - 1] = t;
        rhs_index[rank - 2] = t;
        let li = broadcast_index(&lhs_index, &lhs_big, lhs.shape());
        let ri = broadcast_index(&rhs_index, &rhs_big, rhs.shape());
        let l = lhs_data[index_to_offset(&li, lhs.strides())];
        let r = rhs_data[index_to_offset(&ri, rhs.strides())];
        acc = acc.add(l.mul(r));
    }
    acc
}

pub(crate) fn matmul_kernel<T: Element>(
    lhs: &Storage<T>,
    rhs: &Storage<T>,
    out_shape: &Shape,
) -> Result<Storage<T>> {
    let values = lhs.with_data(|lhs_data| {
        rhs.with_data(|rhs_data| {
            out_shape
                .indices()
                .map(|index| matmul_cell(lhs_data, lhs, rhs_data, rhs, out_shape, &index))
                .collect::<Vec<T>>()
        })
    });
    Storage::new(values, out_shape.clone())
}
