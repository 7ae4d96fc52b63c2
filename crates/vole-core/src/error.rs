use crate::shape::Shape;

/// All errors that can occur within vole.
///
/// One enum covers every recoverable failure mode: shape mismatches,
/// out-of-bounds indexing, illegal mutations, and malformed views. Internal
/// invariant violations (a missing derivative during backprop, a backward
/// pass returning the wrong number of gradients) are not represented here;
/// those are bugs in the engine and fail fast with a panic instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Shape mismatch between two tensors (e.g., trying to add [2,3] + [4,5]).
    #[error("shape mismatch: {lhs} incompatible with {rhs}")]
    ShapeMismatch { lhs: Shape, rhs: Shape },

    /// Flat ordinal or coordinate outside the addressable range.
    #[error("index out of range: {index} for bound {bound}")]
    IndexOutOfRange { index: usize, bound: usize },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Permutation order is not a rearrangement of 0..rank.
    #[error("invalid permutation {order:?} for tensor with {rank} dimensions")]
    InvalidPermutation { order: Vec<usize>, rank: usize },

    /// Element count mismatch when creating from a vec or viewing.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Matrix multiplication inner-dimension mismatch.
    #[error("matmul shape mismatch: [..,{m},{k1}] @ [..,{k2},{n}], inner dims must match")]
    MatmulShapeMismatch {
        m: usize,
        k1: usize,
        k2: usize,
        n: usize,
    },

    /// Tried to seed backward from a non-scalar tensor without a gradient.
    #[error("not a scalar: tensor has shape {shape}")]
    NotAScalar { shape: Shape },

    /// Gradient was required but never produced (e.g. optimizer step
    /// before any backward pass).
    #[error("missing gradient: no backward pass has populated this tensor's grad")]
    MissingGradient,

    /// Operation is not supported by this storage or tensor variant.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout vole.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
