use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::element::Element;
use crate::shape::{broadcast_index, index_to_offset, shape_to_strides, to_index, Shape, Strides};

// Storage — A strided view over a flat buffer
//
// Storage pairs a shape and strides with the raw element buffer. The buffer
// comes in two flavors:
//
//   Owned    — Arc<RwLock<Vec<T>>>, shared between clones and views. Views
//              (permute, view) produce new Storage values with different
//              shape/strides over the same Arc, so writes through one handle
//              are visible through all of them.
//   Borrowed — a &'static [T] region, e.g. weights embedded in the binary.
//              Reads work exactly like the owned case; any mutation is an
//              UnsupportedOperation error.
//
// Cloning a Storage never copies elements. `to_vec` materializes the
// logical row-major order and is the only sanctioned way to walk a
// non-contiguous storage element by element.

enum Buffer<T: 'static> {
    Owned(Arc<RwLock<Vec<T>>>),
    Borrowed(&'static [T]),
}

impl<T> Clone for Buffer<T> {
    fn clone(&self) -> Self {
        match self {
            Buffer::Owned(data) => Buffer::Owned(Arc::clone(data)),
            Buffer::Borrowed(data) => Buffer::Borrowed(*data),
        }
    }
}

pub struct Storage<T: Element> {
    buffer: Buffer<T>,
    shape: Shape,
    strides: Strides,
}

impl<T: Element> Clone for Storage<T> {
    fn clone(&self) -> Self {
        Storage {
            buffer: self.buffer.clone(),
            shape: self.shape.clone(),
            strides: self.strides.clone(),
        }
    }
}

impl<T: Element> Storage<T> {
    /// Build an owned storage from a flat row-major vector.
    pub fn new(data: Vec<T>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        let strides = shape_to_strides(&shape);
        Ok(Storage {
            buffer: Buffer::Owned(Arc::new(RwLock::new(data))),
            shape,
            strides,
        })
    }

    /// Build a read-only storage over a static region, e.g. weights baked
    /// into the binary. Mutating methods return an error.
    pub fn from_static(data: &'static [T], shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        let strides = shape_to_strides(&shape);
        Ok(Storage {
            buffer: Buffer::Borrowed(data),
            shape,
            strides,
        })
    }

    pub fn full(value: T, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let strides = shape_to_strides(&shape);
        let data = vec![value; shape.elem_count()];
        Storage {
            buffer: Buffer::Owned(Arc::new(RwLock::new(data))),
            shape,
            strides,
        }
    }

    pub fn zeros(shape: impl Into<Shape>) -> Self {
        Self::full(T::ZERO, shape)
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Number of addressable elements (product of the shape).
    pub fn size(&self) -> usize {
        self.shape.elem_count()
    }

    /// A storage is contiguous when its strides are non-increasing, i.e.
    /// the layout matches row-major enumeration order.
    pub fn is_contiguous(&self) -> bool {
        self.strides.windows(2).all(|w| w[0] >= w[1])
    }

    /// Whether any mutation (set, remove, copy_from) is possible.
    pub fn is_mutable(&self) -> bool {
        matches!(self.buffer, Buffer::Owned(_))
    }

    /// Run `f` over the raw buffer. Owned buffers hold the read lock for
    /// the duration of the call.
    pub fn with_data<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        match &self.buffer {
            Buffer::Owned(data) => f(&data.read().expect("storage lock poisoned")),
            Buffer::Borrowed(data) => f(data),
        }
    }

    /// Read the element at multi-dimensional coordinates. The offset is
    /// also checked against the live buffer, which a stale handle's shape
    /// can outrun after a `remove` through another handle.
    pub fn get(&self, index: &[usize]) -> Result<T> {
        let offset = self.checked_offset(index)?;
        self.with_data(|data| {
            data.get(offset).copied().ok_or(Error::IndexOutOfRange {
                index: offset,
                bound: data.len(),
            })
        })
    }

    /// Read the element at a flat ordinal in row-major enumeration order.
    pub fn at(&self, ordinal: usize) -> Result<T> {
        let index = to_index(ordinal, &self.shape)?;
        self.get(&index)
    }

    /// Write the element at multi-dimensional coordinates.
    pub fn set(&self, index: &[usize], value: T) -> Result<()> {
        let offset = self.checked_offset(index)?;
        match &self.buffer {
            Buffer::Owned(data) => {
                let mut buf = data.write().expect("storage lock poisoned");
                let len = buf.len();
                match buf.get_mut(offset) {
                    Some(slot) => {
                        *slot = value;
                        Ok(())
                    }
                    None => Err(Error::IndexOutOfRange {
                        index: offset,
                        bound: len,
                    }),
                }
            }
            Buffer::Borrowed(_) => Err(Error::UnsupportedOperation(
                "set on borrowed storage".to_string(),
            )),
        }
    }

    fn checked_offset(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.rank() {
            return Err(Error::DimOutOfRange {
                dim: index.len(),
                rank: self.rank(),
            });
        }
        for (&coord, &dim) in index.iter().zip(self.shape.dims().iter()) {
            if coord >= dim {
                return Err(Error::IndexOutOfRange { index: coord, bound: dim });
            }
        }
        Ok(index_to_offset(index, &self.strides))
    }

    /// Materialize the elements in logical row-major order.
    pub fn to_vec(&self) -> Vec<T> {
        if self.is_contiguous() {
            return self.with_data(|data| data[..self.size()].to_vec());
        }
        self.with_data(|data| {
            self.shape
                .indices()
                .map(|index| data[index_to_offset(&index, &self.strides)])
                .collect()
        })
    }

    /// A view with the dimensions rearranged. Shares the buffer; no
    /// elements move.
    pub fn permute(&self, order: &[usize]) -> Result<Storage<T>> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        let valid = order.len() == rank
            && order.iter().all(|&d| {
                if d >= rank || seen[d] {
                    false
                } else {
                    seen[d] = true;
                    true
                }
            });
        if !valid {
            return Err(Error::InvalidPermutation {
                order: order.to_vec(),
                rank,
            });
        }
        let dims = self.shape.dims();
        let shape = Shape::new(order.iter().map(|&d| dims[d]).collect());
        let strides = order.iter().map(|&d| self.strides[d]).collect();
        Ok(Storage {
            buffer: self.buffer.clone(),
            shape,
            strides,
        })
    }

    /// Reinterpret a contiguous storage under a new shape with the same
    /// element count. Shares the buffer.
    pub fn view(&self, shape: impl Into<Shape>) -> Result<Storage<T>> {
        let shape = shape.into();
        if !self.is_contiguous() {
            return Err(Error::UnsupportedOperation(
                "view of non-contiguous storage".to_string(),
            ));
        }
        if shape.elem_count() != self.size() {
            return Err(Error::ElementCountMismatch {
                expected: self.size(),
                got: shape.elem_count(),
                shape,
            });
        }
        let strides = shape_to_strides(&shape);
        Ok(Storage {
            buffer: self.buffer.clone(),
            shape,
            strides,
        })
    }

    /// Delete the slice at position `idx` along dimension `dim`, shrinking
    /// the buffer in place. The shape loses one entry in that dimension and
    /// the strides are recomputed.
    ///
    /// Other handles cloned before the removal still carry the old shape
    /// over the shrunken buffer; a `get` past the new end returns
    /// `IndexOutOfRange` instead of reading stale data.
    ///
    /// The buffer is edited block by block: within each run of
    /// `strides[dim - 1]` elements (the whole buffer when `dim` is 0), the
    /// `strides[dim]`-wide window belonging to `idx` is dropped.
    pub fn remove(&mut self, dim: usize, idx: usize) -> Result<()> {
        let dim_size = self.shape.dim(dim)?;
        if idx >= dim_size {
            return Err(Error::IndexOutOfRange { index: idx, bound: dim_size });
        }
        if !self.is_contiguous() {
            return Err(Error::UnsupportedOperation(
                "remove on non-contiguous storage".to_string(),
            ));
        }
        let data = match &self.buffer {
            Buffer::Owned(data) => data,
            Buffer::Borrowed(_) => {
                return Err(Error::UnsupportedOperation(
                    "remove on borrowed storage".to_string(),
                ))
            }
        };

        let stride = self.strides[dim];
        let step = if dim == 0 { self.size() } else { self.strides[dim - 1] };
        let size = self.size();
        {
            let mut buf = data.write().expect("storage lock poisoned");
            let mut kept = Vec::with_capacity(size - size / dim_size);
            for block in (0..size).step_by(step) {
                let cut = block + idx * stride;
                kept.extend_from_slice(&buf[block..cut]);
                kept.extend_from_slice(&buf[cut + stride..block + step]);
            }
            *buf = kept;
        }

        let mut dims = self.shape.dims().to_vec();
        dims[dim] -= 1;
        self.shape = Shape::new(dims);
        self.strides = shape_to_strides(&self.shape);
        Ok(())
    }

    /// Overwrite every element with the corresponding element of `src`.
    /// Shapes must match exactly; the write is visible through every view
    /// sharing this buffer.
    pub fn copy_from(&self, src: &Storage<T>) -> Result<()> {
        if self.shape != src.shape {
            return Err(Error::ShapeMismatch {
                lhs: self.shape.clone(),
                rhs: src.shape.clone(),
            });
        }
        let data = match &self.buffer {
            Buffer::Owned(data) => data,
            Buffer::Borrowed(_) => {
                return Err(Error::UnsupportedOperation(
                    "copy_from on borrowed storage".to_string(),
                ))
            }
        };
        // Materialize first: src may be a view over this very buffer.
        let values = src.to_vec();
        let mut buf = data.write().expect("storage lock poisoned");
        for (index, value) in self.shape.indices().zip(values) {
            buf[index_to_offset(&index, &self.strides)] = value;
        }
        Ok(())
    }

    /// Read the element of `self` that a coordinate in `big_shape` maps to
    /// under broadcasting.
    pub fn get_broadcast(&self, big_index: &[usize], big_shape: &Shape) -> Result<T> {
        let index = broadcast_index(big_index, big_shape, &self.shape);
        self.get(&index)
    }
}

impl<T: Element> std::fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("shape", &self.shape)
            .field("strides", &self.strides)
            .field("mutable", &self.is_mutable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_follows_strides() {
        let s = Storage::new(vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        assert_eq!(s.get(&[0, 0]).unwrap(), 1.0);
        assert_eq!(s.get(&[1, 2]).unwrap(), 6.0);
        assert!(s.get(&[2, 0]).is_err());
    }

    #[test]
    fn clone_shares_the_buffer() {
        let a = Storage::new(vec![0.0f32; 4], [2, 2]).unwrap();
        let b = a.clone();
        a.set(&[1, 1], 9.0).unwrap();
        assert_eq!(b.get(&[1, 1]).unwrap(), 9.0);
    }

    #[test]
    fn permute_is_a_view() {
        let s = Storage::new(vec![1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0], [2, 3]).unwrap();
        let t = s.permute(&[1, 0]).unwrap();
        assert_eq!(t.shape().dims(), &[3, 2]);
        assert_eq!(t.get(&[2, 1]).unwrap(), 6.0);
        assert!(!t.is_contiguous());
        // permute twice restores the original layout
        let back = t.permute(&[1, 0]).unwrap();
        assert_eq!(back.to_vec(), s.to_vec());
        assert!(s.permute(&[0, 0]).is_err());
    }

    #[test]
    fn view_requires_contiguity_and_count() {
        let s = Storage::new((0..6).map(|v| v as f32).collect(), [2, 3]).unwrap();
        let v = s.view([3, 2]).unwrap();
        assert_eq!(v.get(&[2, 1]).unwrap(), 5.0);
        assert!(s.view([4, 2]).is_err());
        assert!(s.permute(&[1, 0]).unwrap().view([6]).is_err());
    }

    #[test]
    fn remove_deletes_a_slice() {
        // rows
        let mut s = Storage::new((0..6).map(|v| v as f64).collect(), [3, 2]).unwrap();
        s.remove(0, 1).unwrap();
        assert_eq!(s.shape().dims(), &[2, 2]);
        assert_eq!(s.to_vec(), vec![0.0, 1.0, 4.0, 5.0]);
        // columns
        let mut s = Storage::new((0..6).map(|v| v as f64).collect(), [2, 3]).unwrap();
        s.remove(1, 0).unwrap();
        assert_eq!(s.shape().dims(), &[2, 2]);
        assert_eq!(s.to_vec(), vec![1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn stale_handle_reads_fail_after_remove() {
        let mut s = Storage::new((0..6).map(|v| v as f64).collect(), [3, 2]).unwrap();
        let stale = s.clone();
        s.remove(0, 0).unwrap();
        // the stale handle still claims [3, 2] over 4 remaining elements
        assert_eq!(stale.shape().dims(), &[3, 2]);
        assert!(matches!(
            stale.get(&[2, 1]),
            Err(Error::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            stale.set(&[2, 1], 9.0),
            Err(Error::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn borrowed_storage_rejects_mutation() {
        static WEIGHTS: [f32; 4] = [1.0, 2.0, 3.0, 4.0];
        let mut s = Storage::from_static(&WEIGHTS, [2, 2]).unwrap();
        assert_eq!(s.get(&[1, 0]).unwrap(), 3.0);
        assert!(!s.is_mutable());
        assert!(s.set(&[0, 0], 7.0).is_err());
        assert!(s.remove(0, 0).is_err());
        let src = Storage::new(vec![0.0f32; 4], [2, 2]).unwrap();
        assert!(s.copy_from(&src).is_err());
    }

    #[test]
    fn copy_from_updates_shared_views() {
        let base = Storage::new(vec![0.0f64; 4], [2, 2]).unwrap();
        let flat = base.view([4]).unwrap();
        let src = Storage::new(vec![1.0f64, 2.0, 3.0, 4.0], [2, 2]).unwrap();
        base.copy_from(&src).unwrap();
        assert_eq!(flat.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }
}
