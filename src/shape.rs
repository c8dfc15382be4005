//! Strided layout metadata: per-dimension lengths and strides plus a base offset.

use std::sync::Arc;

use crate::{Result, StridedError};

/// One dimension of a [`Shape`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim {
    pub len: usize,
    pub stride: isize,
}

impl Dim {
    #[inline]
    pub fn new(len: usize, stride: isize) -> Self {
        Self { len, stride }
    }
}

/// Compute row-major strides (last index varies fastest).
pub fn row_major_strides(dims: &[usize]) -> Vec<isize> {
    let rank = dims.len();
    if rank == 0 {
        return vec![];
    }
    let mut strides = vec![1isize; rank];
    for i in (0..rank - 1).rev() {
        strides[i] = strides[i + 1] * dims[i + 1] as isize;
    }
    strides
}

/// Compute column-major strides (first index varies fastest).
pub fn col_major_strides(dims: &[usize]) -> Vec<isize> {
    let rank = dims.len();
    if rank == 0 {
        return vec![];
    }
    let mut strides = vec![1isize; rank];
    for i in 1..rank {
        strides[i] = strides[i - 1] * dims[i - 1] as isize;
    }
    strides
}

/// Ordered dimensions (outermost first) plus the flat index of coordinate zero.
///
/// Dims and strides are reference-counted, so cloning a shape for a sibling view is
/// cheap. A shape of rank 0 denotes a single element at `offset`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Arc<[usize]>,
    strides: Arc<[isize]>,
    offset: isize,
}

impl std::fmt::Debug for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shape")
            .field("dims", &self.dims)
            .field("strides", &self.strides)
            .field("offset", &self.offset)
            .finish()
    }
}

impl Shape {
    /// Create a shape from parallel dims/strides arrays.
    pub fn new(dims: &[usize], strides: &[isize], offset: isize) -> Result<Self> {
        if dims.len() != strides.len() {
            return Err(StridedError::StrideLengthMismatch);
        }
        Ok(Self {
            dims: Arc::from(dims),
            strides: Arc::from(strides),
            offset,
        })
    }

    /// Create a shape from a sequence of [`Dim`]s.
    pub fn from_dims(dims: impl IntoIterator<Item = Dim>, offset: isize) -> Self {
        let (dims, strides): (Vec<usize>, Vec<isize>) =
            dims.into_iter().map(|d| (d.len, d.stride)).unzip();
        Self {
            dims: Arc::from(dims),
            strides: Arc::from(strides),
            offset,
        }
    }

    /// A rank-0 shape addressing the single element at `offset`.
    pub fn scalar(offset: isize) -> Self {
        Self {
            dims: Arc::new([]),
            strides: Arc::new([]),
            offset,
        }
    }

    /// Dense row-major layout starting at offset 0.
    pub fn row_major(dims: &[usize]) -> Self {
        let strides = row_major_strides(dims);
        Self {
            dims: Arc::from(dims),
            strides: Arc::from(strides),
            offset: 0,
        }
    }

    /// Dense column-major layout starting at offset 0.
    ///
    /// Traversal still follows the declared dimension order, so walking a
    /// column-major shape visits the buffer in strided order.
    pub fn col_major(dims: &[usize]) -> Self {
        let strides = col_major_strides(dims);
        Self {
            dims: Arc::from(dims),
            strides: Arc::from(strides),
            offset: 0,
        }
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        &self.strides
    }

    #[inline]
    pub fn offset(&self) -> isize {
        self.offset
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements (1 for rank 0).
    #[inline]
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    /// The `i`-th dimension.
    ///
    /// # Panics
    /// Panics if `i >= self.rank()`.
    #[inline]
    pub fn dim(&self, i: usize) -> Dim {
        Dim::new(self.dims[i], self.strides[i])
    }

    pub fn iter_dims(&self) -> impl Iterator<Item = Dim> + '_ {
        self.dims
            .iter()
            .zip(self.strides.iter())
            .map(|(&len, &stride)| Dim::new(len, stride))
    }

    /// Flat index of an explicit coordinate: `offset + sum(coords[i] * strides[i])`.
    pub fn index_of(&self, coords: &[usize]) -> Result<isize> {
        if coords.len() != self.rank() {
            return Err(StridedError::RankMismatch(coords.len(), self.rank()));
        }
        let mut idx = self.offset;
        for (dim, (&index, d)) in coords.iter().zip(self.iter_dims()).enumerate() {
            if index >= d.len {
                return Err(StridedError::CoordinateOutOfRange {
                    dim,
                    index,
                    len: d.len,
                });
            }
            idx = (index as isize)
                .checked_mul(d.stride)
                .and_then(|step| idx.checked_add(step))
                .ok_or(StridedError::OffsetOverflow)?;
        }
        Ok(idx)
    }

    /// Smallest and largest flat index addressed by this shape.
    ///
    /// Returns `Ok(None)` for an empty shape.
    pub fn extent(&self) -> Result<Option<(isize, isize)>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut min = self.offset;
        let mut max = self.offset;
        for d in self.iter_dims().filter(|d| d.len > 1) {
            let end = d
                .stride
                .checked_mul(d.len as isize - 1)
                .ok_or(StridedError::OffsetOverflow)?;
            if end >= 0 {
                max = max.checked_add(end).ok_or(StridedError::OffsetOverflow)?;
            } else {
                min = min.checked_add(end).ok_or(StridedError::OffsetOverflow)?;
            }
        }
        Ok(Some((min, max)))
    }

    /// Check that every addressed flat index lies in `[0, len)`.
    pub fn validate(&self, len: usize) -> Result<()> {
        let Some((min, max)) = self.extent()? else {
            return Ok(());
        };
        if min < 0 || max < 0 || max as usize >= len {
            return Err(StridedError::ShapeOutOfBounds { min, max, len });
        }
        Ok(())
    }

    /// Reorder dimensions. `perm[i]` names the source axis of new axis `i`.
    pub fn permute(&self, perm: &[usize]) -> Result<Shape> {
        let rank = self.rank();
        if perm.len() != rank {
            return Err(StridedError::RankMismatch(perm.len(), rank));
        }
        let mut seen = vec![false; rank];
        for &p in perm {
            if p >= rank || seen[p] {
                return Err(StridedError::InvalidAxis { axis: p, rank });
            }
            seen[p] = true;
        }
        let dims: Vec<usize> = perm.iter().map(|&p| self.dims[p]).collect();
        let strides: Vec<isize> = perm.iter().map(|&p| self.strides[p]).collect();
        Ok(Shape {
            dims: Arc::from(dims),
            strides: Arc::from(strides),
            offset: self.offset,
        })
    }

    /// Reverse one axis: the offset moves to the last element along `axis` and the
    /// stride is negated.
    pub fn reverse_axis(&self, axis: usize) -> Result<Shape> {
        let rank = self.rank();
        if axis >= rank {
            return Err(StridedError::InvalidAxis { axis, rank });
        }
        let d = self.dim(axis);
        let mut strides = self.strides.to_vec();
        strides[axis] = -d.stride;
        let shift = (d.len.saturating_sub(1) as isize)
            .checked_mul(d.stride)
            .ok_or(StridedError::OffsetOverflow)?;
        let offset = self
            .offset
            .checked_add(shift)
            .ok_or(StridedError::OffsetOverflow)?;
        Ok(Shape {
            dims: self.dims.clone(),
            strides: Arc::from(strides),
            offset,
        })
    }

    /// Whether the shape is dense row-major (length-1 dims are ignored).
    pub fn is_contiguous(&self) -> bool {
        let mut expected = 1isize;
        for (&dim, &stride) in self.dims.iter().rev().zip(self.strides.iter().rev()) {
            if dim <= 1 {
                continue;
            }
            if stride != expected {
                return false;
            }
            expected = expected.saturating_mul(dim as isize);
        }
        true
    }

    /// Sufficient check that no two coordinates share a flat index.
    ///
    /// Dimensions are sorted by stride magnitude; each stride must step past the
    /// whole extent spanned by the smaller ones.
    pub fn is_non_overlapping(&self) -> bool {
        if self.is_empty() {
            return true;
        }
        let mut dims: Vec<Dim> = self.iter_dims().filter(|d| d.len > 1).collect();
        dims.sort_by_key(|d| d.stride.unsigned_abs());
        let mut span = 0usize;
        for d in dims {
            let stride = d.stride.unsigned_abs();
            if stride <= span {
                return false;
            }
            span = match stride
                .checked_mul(d.len - 1)
                .and_then(|step| span.checked_add(step))
            {
                Some(span) => span,
                None => return false,
            };
        }
        true
    }
}

/// Flattened walk layout shared by every operand of one traversal.
///
/// Length-1 dimensions are dropped and adjacent dimensions `(outer, inner)` are
/// merged when `stride[outer] == stride[inner] * len[inner]` holds for all operands.
/// The sequence of visited flat indices is unchanged.
pub(crate) fn flatten<const N: usize>(
    dims: &[usize],
    strides: [&[isize]; N],
) -> (Vec<usize>, [Vec<isize>; N]) {
    let mut out_dims: Vec<usize> = Vec::with_capacity(dims.len());
    let mut out_strides: [Vec<isize>; N] =
        std::array::from_fn(|_| Vec::with_capacity(dims.len()));

    for (i, &len) in dims.iter().enumerate() {
        if len == 1 {
            continue;
        }
        // Overflow in either product means the dims cannot be merged.
        let mergeable = match out_dims.last() {
            Some(&last) => {
                last.checked_mul(len).is_some()
                    && (0..N).all(|k| {
                        let outer = out_strides[k].last().copied();
                        let chained = isize::try_from(len)
                            .ok()
                            .and_then(|l| strides[k][i].checked_mul(l));
                        outer.is_some() && outer == chained
                    })
            }
            None => false,
        };
        if mergeable {
            if let Some(last) = out_dims.last_mut() {
                *last *= len;
            }
            for k in 0..N {
                if let Some(last) = out_strides[k].last_mut() {
                    *last = strides[k][i];
                }
            }
        } else {
            out_dims.push(len);
            for k in 0..N {
                out_strides[k].push(strides[k][i]);
            }
        }
    }

    (out_dims, out_strides)
}
