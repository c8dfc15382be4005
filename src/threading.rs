//! Rayon-based parallel fill.
//!
//! The outermost flattened dimension is split across rayon tasks. Each task owns a
//! disjoint range of outer coordinates and walks its inner block with the same
//! kernel as the sequential path, so a destination that passes
//! [`Shape::is_non_overlapping`] is never written by two tasks at once.

use rayon::prelude::*;

use crate::element::Element;
use crate::kernel::{walk, WalkPlan};
use crate::shape::Shape;
use crate::storage::Accessor;
use crate::view::View;
use crate::{Result, StridedError};

/// A raw pointer wrapper that is `Send` + `Sync`.
///
/// # Safety
/// The caller must guarantee that the pointed-to data outlives the parallel
/// operation and that different tasks write to disjoint elements.
pub(crate) struct SendPtr<T>(pub(crate) *mut T);

impl<T> Clone for SendPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for SendPtr<T> {}

unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    pub(crate) fn as_ptr(self) -> *mut T {
        self.0
    }
}

/// Minimum number of elements to justify multi-threaded execution.
pub const MIN_PARALLEL_LEN: usize = 1 << 15;

/// Write `op(ordinal)` to every element of `dest`, where `ordinal` is the
/// element's position in sequential traversal order.
///
/// The result is identical to the sequential walk regardless of how work is
/// split. Fails with `OverlappingDestination` if two coordinates of `dest` may
/// map to the same flat index.
pub fn par_apply_indexed<T, A, F>(dest: &mut View<T, A>, op: F) -> Result<()>
where
    T: Element,
    A: Accessor<T>,
    F: Fn(usize) -> T + Sync,
{
    let plan = WalkPlan::new([dest.shape()])?;
    if plan.is_empty() {
        return Ok(());
    }
    ensure_non_overlapping(dest.shape())?;

    let mut accessor = dest.borrow_mut()?;
    let total = plan.len();

    if let Some(mut handle) = accessor.raw_handle()? {
        let len = handle.len();
        dest.shape().validate(len)?;
        let base = SendPtr(handle.as_mut_ptr());

        if total < MIN_PARALLEL_LEN || plan.rank() == 0 {
            let mut ordinal = 0;
            return plan.for_each(|[i]| {
                debug_assert!(i >= 0 && (i as usize) < len);
                // SAFETY: the shape was validated against the handle length.
                unsafe { *base.as_ptr().offset(i) = op(ordinal) };
                ordinal += 1;
                Ok(())
            });
        }

        let dims = plan.dims();
        let strides = plan.strides(0);
        let [offset] = plan.offsets();
        let (outer, inner_dims) = (dims[0], &dims[1..]);
        let inner_strides = &strides[1..];
        let inner_len: usize = inner_dims.iter().product();
        log::debug!(
            "parallel fill of {} elements: {} outer x {} inner",
            total,
            outer,
            inner_len
        );

        return (0..outer).into_par_iter().try_for_each(|i| {
            let start = offset + i as isize * strides[0];
            let mut ordinal = i * inner_len;
            walk(inner_dims, [inner_strides], [start], |[j]| {
                debug_assert!(j >= 0 && (j as usize) < len);
                // SAFETY: in bounds as above; distinct outer coordinates of a
                // non-overlapping shape never share a flat index.
                unsafe { *base.as_ptr().offset(j) = op(ordinal) };
                ordinal += 1;
                Ok(())
            })
        });
    }

    log::trace!("no raw handle, parallel fill runs sequentially");
    let mut ordinal = 0;
    plan.for_each(|[i]| {
        accessor.write(i as usize, op(ordinal))?;
        ordinal += 1;
        Ok(())
    })
}

fn ensure_non_overlapping(shape: &Shape) -> Result<()> {
    if shape.is_non_overlapping() {
        return Ok(());
    }
    Err(StridedError::OverlappingDestination {
        dims: shape.dims().to_vec(),
        strides: shape.strides().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::apply;
    use crate::storage::SparseStorage;

    fn sequential(view: &mut View<u64>) -> Vec<u64> {
        let mut next = 0u64;
        apply(view, || {
            next += 1;
            next * 3
        })
        .unwrap();
        view.borrow().unwrap().clone().into_vec().unwrap()
    }

    #[test]
    fn test_par_matches_sequential_large() {
        let dims = [64, 33, 17];
        let shape = Shape::row_major(&dims).permute(&[2, 0, 1]).unwrap();
        let mut seq = View::from_vec(vec![0u64; shape.len()], shape.clone()).unwrap();
        let mut par = View::from_vec(vec![0u64; shape.len()], shape).unwrap();
        assert!(par.len() >= MIN_PARALLEL_LEN);

        let expected = sequential(&mut seq);
        par_apply_indexed(&mut par, |k| (k as u64 + 1) * 3).unwrap();
        assert_eq!(par.borrow().unwrap().clone().into_vec().unwrap(), expected);
    }

    #[test]
    fn test_par_small_runs_sequentially() {
        let shape = Shape::new(&[5], &[-1], 4).unwrap();
        let mut view = View::from_accessor(crate::Storage::<usize>::new(5), shape).unwrap();
        par_apply_indexed(&mut view, |k| k).unwrap();
        assert_eq!(
            view.borrow().unwrap().clone().into_vec().unwrap(),
            vec![4, 3, 2, 1, 0]
        );
    }

    #[test]
    fn test_par_rejects_overlap() {
        let base = View::<f64>::row_major(&[8]);
        let mut overlapping = base.share(Shape::new(&[4, 2], &[1, 1], 0).unwrap()).unwrap();
        assert_eq!(
            par_apply_indexed(&mut overlapping, |_| 1.0),
            Err(StridedError::OverlappingDestination {
                dims: vec![4, 2],
                strides: vec![1, 1],
            })
        );
    }

    #[test]
    fn test_par_rejects_replaced_storage() {
        let mut view = View::<u32>::row_major(&[256, 256]);
        *view.accessor().borrow_mut() = crate::Storage::new(16);
        assert_eq!(
            par_apply_indexed(&mut view, |k| k as u32),
            Err(StridedError::ShapeOutOfBounds {
                min: 0,
                max: 65535,
                len: 16
            })
        );
        assert_eq!(view.borrow().unwrap().clone().into_vec().unwrap(), vec![0; 16]);
    }

    #[test]
    fn test_par_sparse_fallback() {
        let shape = Shape::row_major(&[3, 4]);
        let mut view = View::from_accessor(SparseStorage::<i32>::new(12), shape).unwrap();
        par_apply_indexed(&mut view, |k| k as i32).unwrap();
        assert_eq!(view.to_vec().unwrap(), (0..12).collect::<Vec<i32>>());
    }
}
