//! Element-wise entry points over views.
//!
//! Every entry point builds a [`WalkPlan`] for its operands, borrows each distinct
//! accessor once, and then takes one of two paths for the whole call:
//!
//! - raw path: every accessor yields a [`RawHandle`]; the walk reads and writes
//!   through base pointers with no per-element bounds check;
//! - indexed path: some accessor has no contiguous backing; the walk goes through
//!   [`Accessor::read`]/[`Accessor::write`].
//!
//! Operands backed by the same accessor share one borrow and one handle, so
//! in-place and overlapping operations are allowed.

use std::cell::RefMut;
use std::convert::Infallible;
use std::marker::PhantomData;

use smallvec::SmallVec;

use crate::element::Element;
use crate::kernel::WalkPlan;
use crate::shape::Shape;
use crate::storage::{Accessor, RawHandle};
use crate::view::View;
use crate::{Result, StridedError};

/// One entry per distinct accessor; four covers every arity in this module.
type Slots<X> = SmallVec<[X; 4]>;

#[inline(always)]
fn in_bounds(index: isize, len: usize) -> bool {
    index >= 0 && (index as usize) < len
}

/// Mutable borrows of the distinct accessors behind `N` operands.
struct Operands<'v, T, A, const N: usize> {
    slots: Slots<RefMut<'v, A>>,
    slot_of: [usize; N],
    _elem: PhantomData<T>,
}

impl<'v, T: Element, A: Accessor<T>, const N: usize> Operands<'v, T, A, N> {
    /// Borrow every distinct accessor once. Fails with `AccessorBusy` if one is
    /// already borrowed elsewhere.
    fn borrow(views: [&'v View<T, A>; N]) -> Result<Self> {
        let mut slots: Slots<RefMut<'v, A>> = SmallVec::new();
        let mut slot_of = [0usize; N];
        for (k, &view) in views.iter().enumerate() {
            match views[..k].iter().position(|v| v.shares_accessor(view)) {
                Some(j) => slot_of[k] = slot_of[j],
                None => {
                    slot_of[k] = slots.len();
                    slots.push(view.borrow_mut()?);
                }
            }
        }
        Ok(Self {
            slots,
            slot_of,
            _elem: PhantomData,
        })
    }

    /// Raw handles for every slot, or `None` if some accessor has no raw backing.
    fn raw_handles(&mut self) -> Result<Option<Slots<RawHandle<'_, T>>>> {
        let mut handles = SmallVec::new();
        for slot in self.slots.iter_mut() {
            match slot.raw_handle()? {
                Some(handle) => handles.push(handle),
                None => {
                    log::trace!("accessor has no raw handle, using indexed path");
                    return Ok(None);
                }
            }
        }
        Ok(Some(handles))
    }

    #[inline]
    fn read(&mut self, operand: usize, index: isize) -> Result<T> {
        debug_assert!(index >= 0);
        self.slots[self.slot_of[operand]].read(index as usize)
    }

    #[inline]
    fn write(&mut self, operand: usize, index: isize, value: T) -> Result<()> {
        debug_assert!(index >= 0);
        self.slots[self.slot_of[operand]].write(index as usize, value)
    }
}

/// Base pointer and length of each operand's buffer.
///
/// Every operand's shape is checked against the handle it is walked through. The
/// check runs once per call and covers accessors replaced after the view was
/// built and handles shorter than [`Accessor::len`].
#[inline]
fn bases<T, const N: usize>(
    handles: &mut [RawHandle<'_, T>],
    slot_of: [usize; N],
    shapes: [&Shape; N],
) -> Result<([*mut T; N], [usize; N])> {
    let lens: [usize; N] = std::array::from_fn(|k| handles[slot_of[k]].len());
    for (shape, &len) in shapes.iter().zip(lens.iter()) {
        shape.validate(len)?;
    }
    let ptrs: Slots<*mut T> = handles.iter_mut().map(|h| h.as_mut_ptr()).collect();
    Ok((std::array::from_fn(|k| ptrs[slot_of[k]]), lens))
}

// ============================================================================
// Nullary
// ============================================================================

/// Write `op()` to every element of `dest` in traversal order.
///
/// The operation is invoked exactly once per element. An error from `op` aborts
/// the traversal and is returned unchanged; elements written before it keep
/// their new values.
pub fn try_apply<T, A, E, F>(dest: &mut View<T, A>, mut op: F) -> std::result::Result<(), E>
where
    T: Element,
    A: Accessor<T>,
    E: From<StridedError>,
    F: FnMut() -> std::result::Result<T, E>,
{
    let plan = WalkPlan::new([dest.shape()])?;
    if plan.is_empty() {
        return Ok(());
    }
    let mut ops = Operands::borrow([&*dest])?;
    let slot_of = ops.slot_of;

    if let Some(mut handles) = ops.raw_handles()? {
        let ([dp], [dlen]) = bases(handles.as_mut_slice(), slot_of, [dest.shape()])?;
        return plan.for_each(|[d]| {
            debug_assert!(in_bounds(d, dlen));
            let value = op()?;
            // SAFETY: `bases` validated the shape against this handle, so every
            // index of the walk lies inside the borrowed buffer.
            unsafe { *dp.offset(d) = value };
            Ok(())
        });
    }

    plan.for_each(|[d]| {
        let value = op()?;
        ops.write(0, d, value).map_err(E::from)
    })
}

/// Write `op()` to every element of `dest` in traversal order.
pub fn apply<T, A, F>(dest: &mut View<T, A>, mut op: F) -> Result<()>
where
    T: Element,
    A: Accessor<T>,
    F: FnMut() -> T,
{
    try_apply(dest, || Ok(op()))
}

/// Set every element of `dest` to `value`.
pub fn fill<T, A>(dest: &mut View<T, A>, value: T) -> Result<()>
where
    T: Element,
    A: Accessor<T>,
{
    apply(dest, || value)
}

// ============================================================================
// Unary / binary
// ============================================================================

/// `dest[i] = f(src[i])` for every coordinate `i`.
///
/// `dest` and `src` may share an accessor; each element is read before the
/// element at the same coordinate is written.
pub fn map_into<T, A, F>(dest: &mut View<T, A>, src: &View<T, A>, mut f: F) -> Result<()>
where
    T: Element,
    A: Accessor<T>,
    F: FnMut(T) -> T,
{
    let plan = WalkPlan::new([dest.shape(), src.shape()])?;
    if plan.is_empty() {
        return Ok(());
    }
    let mut ops = Operands::borrow([&*dest, src])?;
    let slot_of = ops.slot_of;

    if let Some(mut handles) = ops.raw_handles()? {
        let ([dp, sp], [dlen, slen]) =
            bases(handles.as_mut_slice(), slot_of, [dest.shape(), src.shape()])?;
        return plan.for_each(|[d, s]| {
            debug_assert!(in_bounds(d, dlen) && in_bounds(s, slen));
            // SAFETY: both shapes were validated against their handles.
            let x = unsafe { *sp.offset(s) };
            let out = f(x);
            unsafe { *dp.offset(d) = out };
            Ok(())
        });
    }

    plan.for_each(|[d, s]| {
        let x = ops.read(1, s)?;
        ops.write(0, d, f(x))
    })
}

/// Copy `src` into `dest` element by element.
pub fn copy_into<T, A>(dest: &mut View<T, A>, src: &View<T, A>) -> Result<()>
where
    T: Element,
    A: Accessor<T>,
{
    map_into(dest, src, |x| x)
}

/// `dest[i] = f(a[i], b[i])` for every coordinate `i`.
pub fn zip_map2_into<T, A, F>(
    dest: &mut View<T, A>,
    a: &View<T, A>,
    b: &View<T, A>,
    mut f: F,
) -> Result<()>
where
    T: Element,
    A: Accessor<T>,
    F: FnMut(T, T) -> T,
{
    let plan = WalkPlan::new([dest.shape(), a.shape(), b.shape()])?;
    if plan.is_empty() {
        return Ok(());
    }
    let mut ops = Operands::borrow([&*dest, a, b])?;
    let slot_of = ops.slot_of;

    if let Some(mut handles) = ops.raw_handles()? {
        let ([dp, ap, bp], [dlen, alen, blen]) =
            bases(handles.as_mut_slice(), slot_of, [dest.shape(), a.shape(), b.shape()])?;
        return plan.for_each(|[d, ia, ib]| {
            debug_assert!(in_bounds(d, dlen) && in_bounds(ia, alen) && in_bounds(ib, blen));
            // SAFETY: all three shapes were validated against their handles.
            let (x, y) = unsafe { (*ap.offset(ia), *bp.offset(ib)) };
            let out = f(x, y);
            unsafe { *dp.offset(d) = out };
            Ok(())
        });
    }

    plan.for_each(|[d, ia, ib]| {
        let x = ops.read(1, ia)?;
        let y = ops.read(2, ib)?;
        ops.write(0, d, f(x, y))
    })
}

// ============================================================================
// Reduction
// ============================================================================

/// Fold every element of `src` into `init` in traversal order.
///
/// ```rust
/// use strided_walk::{reduce, Shape, View};
///
/// let view = View::from_vec((1..=6).collect::<Vec<i64>>(), Shape::row_major(&[2, 3])).unwrap();
/// let total = reduce(&view, 0, |acc, x| *acc += x).unwrap();
/// assert_eq!(total, 21);
/// ```
pub fn reduce<T, A, Acc, F>(src: &View<T, A>, init: Acc, mut f: F) -> Result<Acc>
where
    T: Element,
    A: Accessor<T>,
    F: FnMut(&mut Acc, T),
{
    let mut acc = init;
    let plan = WalkPlan::new([src.shape()])?;
    if plan.is_empty() {
        return Ok(acc);
    }
    let mut ops = Operands::borrow([src])?;
    let slot_of = ops.slot_of;

    if let Some(mut handles) = ops.raw_handles()? {
        let ([sp], [slen]) = bases(handles.as_mut_slice(), slot_of, [src.shape()])?;
        plan.for_each(|[s]| {
            debug_assert!(in_bounds(s, slen));
            // SAFETY: the shape was validated against the handle.
            f(&mut acc, unsafe { *sp.offset(s) });
            Ok::<(), StridedError>(())
        })?;
        return Ok(acc);
    }

    plan.for_each(|[s]| {
        f(&mut acc, ops.read(0, s)?);
        Ok::<(), StridedError>(())
    })?;
    Ok(acc)
}

// ============================================================================
// Index-only traversal
// ============================================================================

/// Call `f` with every flat index of `shape` in traversal order.
///
/// Fails with `OffsetOverflow`, before any call, if some index of the shape does
/// not fit in `isize`.
///
/// ```rust
/// use strided_walk::{for_each_index, Shape};
///
/// let shape = Shape::new(&[3, 2], &[4, 1], 0).unwrap();
/// let mut visited = Vec::new();
/// for_each_index(&shape, |i| visited.push(i)).unwrap();
/// assert_eq!(visited, vec![0, 1, 4, 5, 8, 9]);
/// ```
pub fn for_each_index<F>(shape: &Shape, mut f: F) -> Result<()>
where
    F: FnMut(isize),
{
    let plan = WalkPlan::new([shape])?;
    if plan.is_empty() {
        return Ok(());
    }
    shape.extent()?;
    let Ok(()) = plan.for_each::<Infallible, _>(|[i]| {
        f(i);
        Ok(())
    });
    Ok(())
}
