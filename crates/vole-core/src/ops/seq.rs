use crate::element::Element;
use crate::error::Result;
use crate::shape::Shape;
use crate::storage::Storage;

use super::{
    map_kernel, matmul_kernel, reduce_index_kernel, reduce_kernel, zip_kernel, TensorOps,
};

/// Single-threaded kernels: plain loops over the output coordinates.
///
/// This is the reference implementation; every other strategy must agree
/// with it bit for bit.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeqOps;

impl<T: Element> TensorOps<T> for SeqOps {
    fn map(
        &self,
        input: &Storage<T>,
        out_shape: &Shape,
        f: &(dyn Fn(T) -> T + Sync),
    ) -> Result<Storage<T>> {
        map_kernel(input, out_shape, f)
    }

    fn zip(
        &self,
        lhs: &Storage<T>,
        rhs: &Storage<T>,
        out_shape: &Shape,
        f: &(dyn Fn(T, T) -> T + Sync),
    ) -> Result<Storage<T>> {
        zip_kernel(lhs, rhs, out_shape, f)
    }

    fn reduce(
        &self,
        input: &Storage<T>,
        dim: usize,
        start: T,
        f: &(dyn Fn(T, T) -> T + Sync),
    ) -> Result<Storage<T>> {
        reduce_kernel(input, dim, start, f)
    }

    fn reduce_index(
        &self,
        input: &Storage<T>,
        dim: usize,
        start: T,
        f: &(dyn Fn(T, usize, T, usize) -> (T, usize) + Sync),
    ) -> Result<Storage<T>> {
        reduce_index_kernel(input, dim, start, f)
    }

    fn matrix_multiply(
        &self,
        lhs: &Storage<T>,
        rhs: &Storage<T>,
        out_shape: &Shape,
    ) -> Result<Storage<T>> {
        matmul_kernel(lhs, rhs, out_shape)
    }
}
