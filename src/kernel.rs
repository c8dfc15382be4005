//! Strided walk engine.
//!
//! Visits every coordinate of a set of equally shaped operands in row-major order
//! and hands the callback one running flat index per operand. The running indices
//! are only ever advanced by additions: rank 1 and rank 2 have dedicated loops,
//! rank >= 3 enumerates the outer dimensions with a [`RippleCounter`] and walks
//! the innermost three with carry-adjusted loops.

use crate::counter::RippleCounter;
use crate::shape::{flatten, Shape};
use crate::{Result, StridedError};

/// Flattened walk over `N` operands sharing the same dims.
#[derive(Debug, Clone)]
pub(crate) struct WalkPlan<const N: usize> {
    dims: Vec<usize>,
    strides: [Vec<isize>; N],
    offsets: [isize; N],
    empty: bool,
}

impl<const N: usize> WalkPlan<N> {
    /// Build a plan from operand shapes. All shapes must have the dims of the first.
    pub(crate) fn new(shapes: [&Shape; N]) -> Result<Self> {
        let Some(first) = shapes.first() else {
            return Ok(Self::empty([0; N]));
        };
        for shape in &shapes[1..] {
            ensure_same_shape(first.dims(), shape.dims())?;
        }
        let offsets = shapes.map(|s| s.offset());
        // Strides of an empty shape are never walked and need not be sane.
        if first.is_empty() {
            return Ok(Self::empty(offsets));
        }
        let (dims, strides) = flatten(first.dims(), shapes.map(|s| s.strides()));
        Ok(Self {
            dims,
            strides,
            offsets,
            empty: false,
        })
    }

    fn empty(offsets: [isize; N]) -> Self {
        Self {
            dims: Vec::new(),
            strides: std::array::from_fn(|_| Vec::new()),
            offsets,
            empty: true,
        }
    }

    /// Whether the walk visits nothing.
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.empty
    }

    /// Rank after flattening.
    #[inline]
    pub(crate) fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of visited coordinates.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        if self.empty {
            0
        } else {
            self.dims.iter().product()
        }
    }

    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    #[inline]
    pub(crate) fn dims(&self) -> &[usize] {
        &self.dims
    }

    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    #[inline]
    pub(crate) fn strides(&self, operand: usize) -> &[isize] {
        &self.strides[operand]
    }

    #[cfg_attr(not(feature = "parallel"), allow(dead_code))]
    #[inline]
    pub(crate) fn offsets(&self) -> [isize; N] {
        self.offsets
    }

    /// Visit every coordinate, calling `f` with the flat index of each operand.
    ///
    /// The first error returned by `f` aborts the walk and is returned unchanged.
    pub(crate) fn for_each<E, F>(&self, f: F) -> std::result::Result<(), E>
    where
        F: FnMut([isize; N]) -> std::result::Result<(), E>,
    {
        if self.empty {
            return Ok(());
        }
        let strides: [&[isize]; N] = std::array::from_fn(|k| self.strides[k].as_slice());
        log::trace!(
            "walking {} elements at rank {} over {} operand(s)",
            self.len(),
            self.rank(),
            N
        );
        walk(&self.dims, strides, self.offsets, f)
    }
}

/// Dispatch on rank. `dims` must be non-empty in every dimension.
#[inline]
pub(crate) fn walk<const N: usize, E, F>(
    dims: &[usize],
    strides: [&[isize]; N],
    offsets: [isize; N],
    mut f: F,
) -> std::result::Result<(), E>
where
    F: FnMut([isize; N]) -> std::result::Result<(), E>,
{
    match dims.len() {
        0 => f(offsets),
        1 => walk_1d(dims, strides, offsets, &mut f),
        2 => walk_2d(dims, strides, offsets, &mut f),
        _ => walk_nd(dims, strides, offsets, &mut f),
    }
}

/// Index arithmetic wraps: every index handed to the callback is exact, while
/// the one-past-the-end value after a loop may leave the `isize` range.
#[inline(always)]
fn step<const N: usize>(offsets: &mut [isize; N], delta: &[isize; N]) {
    for (offset, &d) in offsets.iter_mut().zip(delta.iter()) {
        *offset = offset.wrapping_add(d);
    }
}

/// `outer - inner * len`, the step from the end of an inner run to the start of
/// the next one.
#[inline(always)]
fn carry(outer: isize, inner: isize, len: usize) -> isize {
    outer.wrapping_sub(inner.wrapping_mul(len as isize))
}

/// Single loop advancing by `strides[k][0]`.
#[inline]
fn walk_1d<const N: usize, E, F>(
    dims: &[usize],
    strides: [&[isize]; N],
    mut offsets: [isize; N],
    f: &mut F,
) -> std::result::Result<(), E>
where
    F: FnMut([isize; N]) -> std::result::Result<(), E>,
{
    let d0 = dims[0];
    let s0: [isize; N] = std::array::from_fn(|k| strides[k][0]);

    for _ in 0..d0 {
        f(offsets)?;
        step(&mut offsets, &s0);
    }
    Ok(())
}

/// Outer/inner loops. The outer step applies the carry adjustment
/// `outer_stride - inner_stride * inner_len`.
#[inline]
fn walk_2d<const N: usize, E, F>(
    dims: &[usize],
    strides: [&[isize]; N],
    mut offsets: [isize; N],
    f: &mut F,
) -> std::result::Result<(), E>
where
    F: FnMut([isize; N]) -> std::result::Result<(), E>,
{
    let d0 = dims[0];
    let d1 = dims[1];
    let s1: [isize; N] = std::array::from_fn(|k| strides[k][1]);
    let carry0: [isize; N] = std::array::from_fn(|k| carry(strides[k][0], strides[k][1], d1));

    for _ in 0..d0 {
        for _ in 0..d1 {
            f(offsets)?;
            step(&mut offsets, &s1);
        }
        step(&mut offsets, &carry0);
    }
    Ok(())
}

/// General path for rank >= 3.
///
/// The outer `rank - 3` dimensions are enumerated by a ripple-carry counter and
/// the base index of each inner block is computed directly from the coordinate
/// formula. The innermost three dimensions are walked with carry adjustments.
#[inline]
fn walk_nd<const N: usize, E, F>(
    dims: &[usize],
    strides: [&[isize]; N],
    offsets: [isize; N],
    f: &mut F,
) -> std::result::Result<(), E>
where
    F: FnMut([isize; N]) -> std::result::Result<(), E>,
{
    let split = dims.len() - 3;
    let (outer, inner) = dims.split_at(split);
    let (da, db, dc) = (inner[0], inner[1], inner[2]);

    let sc: [isize; N] = std::array::from_fn(|k| strides[k][split + 2]);
    let carry_b: [isize; N] =
        std::array::from_fn(|k| carry(strides[k][split + 1], strides[k][split + 2], dc));
    let carry_a: [isize; N] =
        std::array::from_fn(|k| carry(strides[k][split], strides[k][split + 1], db));

    let mut counter = RippleCounter::new(outer);
    loop {
        let mut index: [isize; N] = std::array::from_fn(|k| {
            counter
                .digits()
                .iter()
                .zip(strides[k].iter())
                .fold(offsets[k], |acc, (&i, &s)| {
                    acc.wrapping_add((i as isize).wrapping_mul(s))
                })
        });

        for _ in 0..da {
            for _ in 0..db {
                for _ in 0..dc {
                    f(index)?;
                    step(&mut index, &sc);
                }
                step(&mut index, &carry_b);
            }
            step(&mut index, &carry_a);
        }

        if !counter.advance() {
            break;
        }
    }
    Ok(())
}

pub(crate) fn ensure_same_shape(a: &[usize], b: &[usize]) -> Result<()> {
    if a.len() != b.len() {
        return Err(StridedError::RankMismatch(a.len(), b.len()));
    }
    if a != b {
        return Err(StridedError::ShapeMismatch(a.to_vec(), b.to_vec()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<const N: usize>(
        dims: &[usize],
        strides: [&[isize]; N],
        offsets: [isize; N],
    ) -> Vec<[isize; N]> {
        let mut out = Vec::new();
        walk::<N, (), _>(dims, strides, offsets, |idx| {
            out.push(idx);
            Ok(())
        })
        .unwrap();
        out
    }

    /// Direct per-coordinate computation, no incremental state.
    fn reference(dims: &[usize], strides: &[isize], offset: isize) -> Vec<isize> {
        let total: usize = dims.iter().product();
        let mut coords = vec![0usize; dims.len()];
        let mut out = Vec::with_capacity(total);
        for _ in 0..total {
            out.push(
                coords
                    .iter()
                    .zip(strides)
                    .fold(offset, |acc, (&c, &s)| acc + c as isize * s),
            );
            for d in (0..dims.len()).rev() {
                coords[d] += 1;
                if coords[d] < dims[d] {
                    break;
                }
                coords[d] = 0;
            }
        }
        out
    }

    #[test]
    fn test_walk_rank0() {
        assert_eq!(collect::<1>(&[], [&[][..]], [9]), vec![[9]]);
    }

    #[test]
    fn test_walk_1d_negative_stride() {
        let got: Vec<isize> = collect(&[5], [&[-1][..]], [4]).into_iter().map(|[i]| i).collect();
        assert_eq!(got, vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_walk_2d_carry() {
        let got: Vec<isize> = collect(&[3, 2], [&[4, 1][..]], [0])
            .into_iter()
            .map(|[i]| i)
            .collect();
        assert_eq!(got, vec![0, 1, 4, 5, 8, 9]);
    }

    #[test]
    fn test_walk_2d_two_operands() {
        // dest row-major, src column-major (transposed read).
        let got = collect(&[2, 3], [&[3, 1][..], &[1, 2][..]], [0, 0]);
        assert_eq!(
            got,
            vec![[0, 0], [1, 2], [2, 4], [3, 1], [4, 3], [5, 5]]
        );
    }

    #[test]
    fn test_walk_rank3_matches_reference() {
        let dims = [2, 3, 4];
        let strides = [-13, 5, 1];
        let got: Vec<isize> = collect(&dims, [&strides[..]], [40])
            .into_iter()
            .map(|[i]| i)
            .collect();
        assert_eq!(got, reference(&dims, &strides, 40));
    }

    #[test]
    fn test_walk_rank5_matches_reference() {
        let dims = [2, 3, 2, 3, 2];
        let strides = [100, -30, 7, 0, 2];
        let got: Vec<isize> = collect(&dims, [&strides[..]], [200])
            .into_iter()
            .map(|[i]| i)
            .collect();
        assert_eq!(got, reference(&dims, &strides, 200));
    }

    #[test]
    fn test_walk_extreme_stride() {
        // The step past the last element leaves the isize range.
        let got: Vec<isize> = collect(&[2], [&[isize::MAX][..]], [0])
            .into_iter()
            .map(|[i]| i)
            .collect();
        assert_eq!(got, vec![0, isize::MAX]);

        let got: Vec<isize> = collect(&[2, 2, 2], [&[isize::MAX - 3, 2, 1][..]], [0])
            .into_iter()
            .map(|[i]| i)
            .collect();
        let top = isize::MAX - 3;
        assert_eq!(got, vec![0, 1, 2, 3, top, top + 1, top + 2, top + 3]);
    }

    #[test]
    fn test_walk_stops_on_error() {
        let mut calls = 0;
        let result = walk(&[4, 4], [&[4, 1][..]], [0], |_| {
            calls += 1;
            if calls == 6 {
                Err("stop")
            } else {
                Ok(())
            }
        });
        assert_eq!(result, Err("stop"));
        assert_eq!(calls, 6);
    }

    #[test]
    fn test_plan_empty() {
        let shape = Shape::new(&[3, 0, 2], &[0, 0, 0], 0).unwrap();
        let plan = WalkPlan::new([&shape]).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.len(), 0);
        let mut calls = 0;
        plan.for_each::<(), _>(|_| {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_plan_empty_skips_flattening() {
        // `0 * isize::MAX` chains, so merging would compute `isize::MAX * 3`.
        let shape = Shape::new(&[0, 3], &[0, isize::MAX], 0).unwrap();
        let plan = WalkPlan::new([&shape, &shape]).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.rank(), 0);
        assert_eq!(plan.len(), 0);
    }

    #[test]
    fn test_plan_flattens() {
        let shape = Shape::row_major(&[2, 3, 4]);
        let plan = WalkPlan::new([&shape]).unwrap();
        assert_eq!(plan.dims(), &[24]);
        assert_eq!(plan.strides(0), &[1]);
        assert_eq!(plan.offsets(), [0]);
    }

    #[test]
    fn test_plan_shape_mismatch() {
        let a = Shape::row_major(&[2, 3]);
        let b = Shape::row_major(&[3, 2]);
        let c = Shape::row_major(&[6]);
        assert_eq!(
            WalkPlan::new([&a, &b]).unwrap_err(),
            StridedError::ShapeMismatch(vec![2, 3], vec![3, 2])
        );
        assert_eq!(
            WalkPlan::new([&a, &c]).unwrap_err(),
            StridedError::RankMismatch(2, 1)
        );
    }

    #[test]
    fn test_ensure_same_shape() {
        assert!(ensure_same_shape(&[2, 3], &[2, 3]).is_ok());
        assert!(ensure_same_shape(&[2, 3], &[3, 2]).is_err());
    }
}
