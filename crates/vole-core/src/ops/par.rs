use rayon::prelude::*;

use crate::element::Element;
use crate::error::Result;
use crate::shape::{to_index, Shape};
use crate::storage::Storage;

use super::{
    map_kernel, matmul_cell, reduce_index_kernel, reduce_kernel, zip_kernel, TensorOps,
};

/// How many output cells one worker computes before handing off. Matmul
/// cells are heavy (a length-k dot product each), so a modest chunk keeps
/// every core busy without drowning in scheduling overhead.
const MATMUL_CHUNK: usize = 500;

/// Multi-threaded kernels. Only the matmul is parallelized: its per-cell
/// cost dominates everything else, and the elementwise kernels are cheap
/// enough that the reference loops win below realistic sizes.
///
/// The flat output range is split into fixed-size chunks of ordinals, each
/// chunk computed independently, and the chunks reassembled in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParOps;

impl<T: Element> TensorOps<T> for ParOps {
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
        let total = out_shape.elem_count();
        let starts: Vec<usize> = (0..total).step_by(MATMUL_CHUNK).collect();
        let chunks = lhs.with_data(|lhs_data| {
            rhs.with_data(|rhs_data| {
                starts
                    .into_par_iter()
                    .map(|start| {
                        let end = (start + MATMUL_CHUNK).min(total);
                        let mut chunk = Vec::with_capacity(end - start);
                        for ordinal in start..end {
                            let index = to_index(ordinal, out_shape)?;
                            chunk.push(matmul_cell(
                                lhs_data, lhs, rhs_data, rhs, out_shape, &index,
                            ));
                        }
                        Ok(chunk)
                    })
                    .collect::<Result<Vec<Vec<T>>>>()
            })
        })?;
        let values = chunks.into_iter().flatten().collect();
        Storage::new(values, out_shape.clone())
    }
}
