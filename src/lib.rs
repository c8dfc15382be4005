//! Rank-specialized strided traversal over lazily allocated storage.
//!
//! This crate is the element-wise engine underneath a strided N-dimensional array
//! type. A [`View`] pairs a [`Shape`] (per-dimension lengths and strides plus a base
//! offset) with a shared [`Accessor`]; the entry points in this crate visit every
//! coordinate of a view exactly once, in the declared (row-major, outermost first)
//! dimension order, and read/write the corresponding flat buffer index.
//!
//! # Core Types
//!
//! - [`Shape`] / [`Dim`]: strided layout metadata
//! - [`View`]: a shape bound to a reference-counted accessor
//! - [`Accessor`]: indexed read/write plus an optional scoped [`RawHandle`]
//! - [`Storage`]: dense accessor that allocates on first touch
//! - [`SparseStorage`]: materialize-on-demand accessor without a raw handle
//!
//! # Operations
//!
//! - [`apply`], [`try_apply`], [`fill`]: nullary generators
//! - [`map_into`], [`copy_into`]: unary element-wise operations
//! - [`zip_map2_into`]: binary element-wise operations
//! - [`reduce`]: folds in traversal order
//! - [`for_each_index`]: visits flat indices of a bare shape
//!
//! # Example
//!
//! ```rust
//! use strided_walk::{apply, Shape, Storage, View};
//!
//! // A reversed rank-1 view: offset 4, stride -1.
//! let shape = Shape::new(&[5], &[-1], 4).unwrap();
//! let mut view = View::from_accessor(Storage::<i32>::new(5), shape).unwrap();
//!
//! let mut next = 0;
//! apply(&mut view, || {
//!     next += 1;
//!     next - 1
//! })
//! .unwrap();
//!
//! let data = view.accessor().borrow_mut().allocate().unwrap().to_vec();
//! assert_eq!(data, vec![4, 3, 2, 1, 0]);
//! ```
//!
//! # Traversal
//!
//! Before walking, length-1 dimensions are dropped and adjacent dimensions whose
//! strides chain are merged. The walk then dispatches on the remaining rank: rank 1
//! and rank 2 use dedicated loops, rank >= 3 enumerates the outer dimensions with a
//! ripple-carry counter and walks the innermost three with carry-adjusted loops.

mod counter;
mod element;
mod kernel;
mod map;
mod shape;
mod storage;
#[cfg(feature = "parallel")]
mod threading;
mod view;

// ============================================================================
// Layout metadata
// ============================================================================
pub use shape::{col_major_strides, row_major_strides, Dim, Shape};

// ============================================================================
// Storage
// ============================================================================
pub use element::Element;
pub use storage::{Accessor, RawHandle, SparseStorage, Storage};

// ============================================================================
// Views and traversal
// ============================================================================
pub use map::{
    apply, copy_into, fill, for_each_index, map_into, reduce, try_apply, zip_map2_into,
};
pub use view::View;

#[cfg(feature = "parallel")]
pub use threading::{par_apply_indexed, MIN_PARALLEL_LEN};

// ============================================================================
// Error types
// ============================================================================

/// Errors that can occur during strided traversal and storage access.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StridedError {
    /// Ranks do not match.
    #[error("rank mismatch: {0} vs {1}")]
    RankMismatch(usize, usize),

    /// Shapes are incompatible for the operation.
    #[error("shape mismatch: {0:?} vs {1:?}")]
    ShapeMismatch(Vec<usize>, Vec<usize>),

    /// Invalid axis index for the given rank.
    #[error("invalid axis {axis} for rank {rank}")]
    InvalidAxis { axis: usize, rank: usize },

    /// Stride array length doesn't match dimensions.
    #[error("stride and dims length mismatch")]
    StrideLengthMismatch,

    /// Integer overflow while computing a flat index.
    #[error("offset overflow while computing flat index")]
    OffsetOverflow,

    /// A shape addresses flat indices outside of its backing buffer.
    #[error("shape addresses [{min}, {max}] outside of buffer of length {len}")]
    ShapeOutOfBounds { min: isize, max: isize, len: usize },

    /// A coordinate exceeds the length of its dimension.
    #[error("coordinate {index} out of range for dim {dim} of length {len}")]
    CoordinateOutOfRange { dim: usize, index: usize, len: usize },

    /// Flat index outside of `[0, len)` on indexed read/write.
    #[error("index {index} out of range for storage of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// The backing buffer could not be allocated.
    #[error("failed to allocate storage of {len} elements")]
    Allocation { len: usize },

    /// The accessor is already borrowed by another operation.
    #[error("accessor is busy")]
    AccessorBusy,

    /// The destination may map two coordinates to one flat index.
    #[error("destination view may overlap itself: dims {dims:?}, strides {strides:?}")]
    OverlappingDestination { dims: Vec<usize>, strides: Vec<isize> },
}

/// Result type for strided traversal and storage access.
pub type Result<T> = std::result::Result<T, StridedError>;
