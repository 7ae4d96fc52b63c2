use std::fmt;

use crate::error::{Error, Result};

// Shape — Dimension bookkeeping for strided tensors
//
// A tensor is a flat buffer plus a Shape and Strides. Everything the engine
// does with coordinates lives here:
//
//   shape_to_strides  — row-major (last dim contiguous) stride layout
//   to_index          — flat ordinal → multi-dimensional coordinates
//   index_to_offset   — coordinates · strides → buffer offset
//   broadcast_index   — coordinates in a large shape → coordinates in a
//                       smaller shape that broadcasts to it
//   Shape::broadcast  — the NumPy broadcasting rule, aligned from the right
//
// IndicesIter walks every coordinate of a shape in row-major order as an
// odometer: increment the last digit, carry left on overflow. Kernels
// iterate output coordinates with it instead of materializing an index list.

/// Multi-dimensional coordinates, e.g. `[1, 0, 2]`.
pub type Indices = Vec<usize>;

/// Per-dimension buffer step sizes.
pub type Strides = Vec<usize>;

/// The dimensions of a tensor.
#[derive(Clone, PartialEq, Eq)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The raw dimension sizes.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements (product of dims).
    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }

    /// The size of one dimension, checked against the rank.
    pub fn dim(&self, dim: usize) -> Result<usize> {
        self.0
            .get(dim)
            .copied()
            .ok_or(Error::DimOutOfRange { dim, rank: self.rank() })
    }

    /// Broadcast two shapes together (NumPy rule): align from the right,
    /// each dimension pair must be equal or contain a 1.
    pub fn broadcast(&self, rhs: &Shape) -> Result<Shape> {
        let lhs = self;
        let rank = lhs.rank().max(rhs.rank());
        let mut dims = vec![0; rank];
        for i in 0..rank {
            let l = if i < lhs.rank() { lhs.0[lhs.rank() - 1 - i] } else { 1 };
            let r = if i < rhs.rank() { rhs.0[rhs.rank() - 1 - i] } else { 1 };
            if l != r && l != 1 && r != 1 {
                return Err(Error::ShapeMismatch {
                    lhs: lhs.clone(),
                    rhs: rhs.clone(),
                });
            }
            dims[rank - 1 - i] = l.max(r);
        }
        Ok(Shape(dims))
    }

    /// Broadcast two shapes for batched matrix multiplication: the last two
    /// dimensions are the matrix dims ([.., m, k] @ [.., k, n] → [.., m, n]),
    /// everything before them broadcasts as batch dimensions.
    pub fn broadcast_matmul(&self, rhs: &Shape) -> Result<Shape> {
        let lhs = self;
        if lhs.rank() < 2 || rhs.rank() < 2 {
            return Err(Error::ShapeMismatch {
                lhs: lhs.clone(),
                rhs: rhs.clone(),
            });
        }
        let (m, k1) = (lhs.0[lhs.rank() - 2], lhs.0[lhs.rank() - 1]);
        let (k2, n) = (rhs.0[rhs.rank() - 2], rhs.0[rhs.rank() - 1]);
        if k1 != k2 {
            return Err(Error::MatmulShapeMismatch { m, k1, k2, n });
        }
        let lhs_batch = Shape(lhs.0[..lhs.rank() - 2].to_vec());
        let rhs_batch = Shape(rhs.0[..rhs.rank() - 2].to_vec());
        let mut dims = lhs_batch.broadcast(&rhs_batch)?.0;
        dims.push(m);
        dims.push(n);
        Ok(Shape(dims))
    }

    /// Row-major order iterator over every coordinate of this shape.
    pub fn indices(&self) -> IndicesIter<'_> {
        IndicesIter {
            shape: self,
            next: if self.elem_count() == 0 { None } else { Some(vec![0; self.rank()]) },
        }
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Shape(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Shape(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Shape(dims.to_vec())
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<&Shape> for Shape {
    fn from(s: &Shape) -> Self {
        s.clone()
    }
}

/// Row-major strides for a shape: the last dimension is contiguous, and
/// each earlier stride is the product of all later dimension sizes.
pub fn shape_to_strides(shape: &Shape) -> Strides {
    let dims = shape.dims();
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// Convert a flat ordinal (position in row-major enumeration order) into
/// multi-dimensional coordinates for `shape`.
///
/// Ordinals at or beyond the element count are rejected rather than
/// silently wrapped.
pub fn to_index(ordinal: usize, shape: &Shape) -> Result<Indices> {
    let bound = shape.elem_count();
    if ordinal >= bound {
        return Err(Error::IndexOutOfRange { index: ordinal, bound });
    }
    let dims = shape.dims();
    let mut index = vec![0; dims.len()];
    let mut remaining = ordinal;
    for i in (0..dims.len()).rev() {
        index[i] = remaining % dims[i];
        remaining /= dims[i];
    }
    Ok(index)
}

/// Dot product of coordinates and strides: the buffer offset of an element.
pub fn index_to_offset(index: &[usize], strides: &[usize]) -> usize {
    index.iter().zip(strides.iter()).map(|(i, s)| i * s).sum()
}

/// Map coordinates in `big_shape` to coordinates in `shape`, where `shape`
/// broadcasts to `big_shape`. Alignment is from the right; dimensions of
/// size 1 in `shape` pin their coordinate to 0.
pub fn broadcast_index(big_index: &[usize], big_shape: &Shape, shape: &Shape) -> Indices {
    let offset = big_shape.rank() - shape.rank();
    shape
        .dims()
        .iter()
        .enumerate()
        .map(|(i, &d)| if d == 1 { 0 } else { big_index[i + offset] })
        .collect()
}

/// Odometer iterator over the coordinates of a shape, row-major order.
pub struct IndicesIter<'a> {
    shape: &'a Shape,
    next: Option<Indices>,
}

impl<'a> Iterator for IndicesIter<'a> {
    type Item = Indices;

    fn next(&mut self) -> Option<Indices> {
        let current = self.next.take()?;
        let dims = self.shape.dims();
        let mut next = current.clone();
        for i in (0..dims.len()).rev() {
            next[i] += 1;
            if next[i] < dims[i] {
                self.next = Some(next);
                break;
            }
            next[i] = 0;
        }
        // rank-0 shapes yield exactly one (empty) coordinate
        if dims.is_empty() {
            self.next = None;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_are_row_major() {
        let shape = Shape::from([2, 3, 4]);
        assert_eq!(shape_to_strides(&shape), vec![12, 4, 1]);
        assert_eq!(shape_to_strides(&Shape::from(5)), vec![1]);
    }

    #[test]
    fn ordinal_round_trip() {
        let shape = Shape::from([3, 4]);
        let strides = shape_to_strides(&shape);
        for ordinal in 0..shape.elem_count() {
            let index = to_index(ordinal, &shape).unwrap();
            assert_eq!(index_to_offset(&index, &strides), ordinal);
        }
    }

    #[test]
    fn ordinal_out_of_range_is_rejected() {
        let shape = Shape::from([3, 4]);
        assert!(matches!(
            to_index(12, &shape),
            Err(Error::IndexOutOfRange { index: 12, bound: 12 })
        ));
    }

    #[test]
    fn broadcast_shapes() {
        let a = Shape::from([2, 1, 3]);
        let b = Shape::from([5, 3]);
        assert_eq!(a.broadcast(&b).unwrap(), Shape::from([2, 5, 3]));

        let a = Shape::from([4, 1]);
        let b = Shape::from([1, 4]);
        assert_eq!(a.broadcast(&b).unwrap(), Shape::from([4, 4]));

        let a = Shape::from([2, 3]);
        let b = Shape::from([4, 3]);
        assert!(a.broadcast(&b).is_err());
    }

    #[test]
    fn broadcast_matmul_shapes() {
        let a = Shape::from([7, 2, 3]);
        let b = Shape::from([3, 5]);
        assert_eq!(a.broadcast_matmul(&b).unwrap(), Shape::from([7, 2, 5]));

        let a = Shape::from([2, 3]);
        let b = Shape::from([4, 5]);
        assert!(a.broadcast_matmul(&b).is_err());
    }

    #[test]
    fn broadcast_index_pins_unit_dims() {
        let big = Shape::from([2, 5, 3]);
        let small = Shape::from([5, 1]);
        assert_eq!(broadcast_index(&[1, 4, 2], &big, &small), vec![4, 0]);
        let scalar = Shape::from(1);
        assert_eq!(broadcast_index(&[1, 4, 2], &big, &scalar), vec![0]);
    }

    #[test]
    fn indices_iter_visits_all_in_order() {
        let shape = Shape::from([2, 2]);
        let all: Vec<Indices> = shape.indices().collect();
        assert_eq!(all, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
        let empty = Shape::from([2, 0]);
        assert_eq!(empty.indices().count(), 0);
    }
}
