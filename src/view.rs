//! Views: a [`Shape`] bound to a shared accessor.
//!
//! Several views may share one accessor (sub-views, permuted or reversed views
//! of the same buffer). The accessor is dropped with its last owner.

use std::cell::{Ref, RefCell, RefMut};
use std::marker::PhantomData;
use std::rc::Rc;

use crate::element::Element;
use crate::shape::Shape;
use crate::storage::{Accessor, Storage};
use crate::{Result, StridedError};

/// Strided view over an accessor of element type `T`.
pub struct View<T, A = Storage<T>> {
    shape: Shape,
    accessor: Rc<RefCell<A>>,
    _elem: PhantomData<T>,
}

impl<T, A> Clone for View<T, A> {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            accessor: self.accessor.clone(),
            _elem: PhantomData,
        }
    }
}

impl<T, A> std::fmt::Debug for View<T, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("dims", &self.shape.dims())
            .field("strides", &self.shape.strides())
            .field("offset", &self.shape.offset())
            .finish()
    }
}

impl<T: Element, A: Accessor<T>> View<T, A> {
    /// Bind `shape` to a shared accessor, validating it against the accessor length.
    pub fn new(accessor: Rc<RefCell<A>>, shape: Shape) -> Result<Self> {
        let len = accessor
            .try_borrow()
            .map_err(|_| StridedError::AccessorBusy)?
            .len();
        shape.validate(len)?;
        Ok(Self {
            shape,
            accessor,
            _elem: PhantomData,
        })
    }

    /// Take ownership of `accessor` and bind `shape` to it.
    pub fn from_accessor(accessor: A, shape: Shape) -> Result<Self> {
        Self::new(Rc::new(RefCell::new(accessor)), shape)
    }

    /// Another view over the same accessor.
    pub fn share(&self, shape: Shape) -> Result<Self> {
        Self::new(self.accessor.clone(), shape)
    }

    /// Same accessor, permuted dimensions.
    pub fn permute(&self, perm: &[usize]) -> Result<Self> {
        self.share(self.shape.permute(perm)?)
    }

    /// Same accessor, one axis reversed.
    pub fn reverse_axis(&self, axis: usize) -> Result<Self> {
        self.share(self.shape.reverse_axis(axis)?)
    }

    /// Read the element at `coords` through the indexed path.
    pub fn get(&self, coords: &[usize]) -> Result<T> {
        let index = self.flat_index(coords)?;
        self.borrow_mut()?.read(index)
    }

    /// Write the element at `coords` through the indexed path.
    pub fn set(&mut self, coords: &[usize], value: T) -> Result<()> {
        let index = self.flat_index(coords)?;
        self.borrow_mut()?.write(index, value)
    }

    /// Elements in traversal order.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        crate::map::reduce(self, Vec::with_capacity(self.len()), |out, x| out.push(x))
    }

    fn flat_index(&self, coords: &[usize]) -> Result<usize> {
        let index = self.shape.index_of(coords)?;
        usize::try_from(index).map_err(|_| StridedError::OffsetOverflow)
    }

    /// Borrow the accessor mutably for the duration of one operation.
    pub(crate) fn borrow_mut(&self) -> Result<RefMut<'_, A>> {
        self.accessor
            .try_borrow_mut()
            .map_err(|_| StridedError::AccessorBusy)
    }
}

impl<T, A> View<T, A> {
    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.shape.strides()
    }

    #[inline]
    pub fn offset(&self) -> isize {
        self.shape.offset()
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shape.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shape.is_empty()
    }

    /// The shared accessor.
    #[inline]
    pub fn accessor(&self) -> &Rc<RefCell<A>> {
        &self.accessor
    }

    /// Immutable borrow of the accessor, for inspection.
    pub fn borrow(&self) -> Result<Ref<'_, A>> {
        self.accessor
            .try_borrow()
            .map_err(|_| StridedError::AccessorBusy)
    }

    /// Whether `other` is backed by the same accessor instance.
    #[inline]
    pub fn shares_accessor<U, B>(&self, other: &View<U, B>) -> bool {
        std::ptr::eq(
            Rc::as_ptr(&self.accessor) as *const (),
            Rc::as_ptr(&other.accessor) as *const (),
        )
    }
}

impl<T: Element> View<T, Storage<T>> {
    /// Row-major view over fresh, not yet allocated storage.
    pub fn row_major(dims: &[usize]) -> Self {
        let shape = Shape::row_major(dims);
        Self {
            accessor: Rc::new(RefCell::new(Storage::new(shape.len()))),
            shape,
            _elem: PhantomData,
        }
    }

    /// View over existing data.
    pub fn from_vec(data: Vec<T>, shape: Shape) -> Result<Self> {
        Self::from_accessor(Storage::from_vec(data), shape)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SparseStorage;

    #[test]
    fn test_new_validates_shape() {
        let storage = Storage::<f64>::new(5);
        let err = View::from_accessor(storage, Shape::row_major(&[2, 3])).unwrap_err();
        assert_eq!(
            err,
            StridedError::ShapeOutOfBounds {
                min: 0,
                max: 5,
                len: 5
            }
        );
    }

    #[test]
    fn test_row_major_is_lazy() {
        let view = View::<f32>::row_major(&[2, 3]);
        assert_eq!(view.dims(), &[2, 3]);
        assert_eq!(view.strides(), &[3, 1]);
        assert!(!view.borrow().unwrap().is_allocated());
        assert_eq!(view.get(&[1, 2]).unwrap(), 0.0);
        assert!(view.borrow().unwrap().is_allocated());
    }

    #[test]
    fn test_get_set() {
        let mut view = View::from_vec(vec![0i32; 6], Shape::row_major(&[2, 3])).unwrap();
        view.set(&[1, 0], 5).unwrap();
        assert_eq!(view.get(&[1, 0]).unwrap(), 5);
        assert_eq!(view.borrow().unwrap().clone().into_vec().unwrap()[3], 5);
        assert!(view.get(&[2, 0]).is_err());
        assert!(view.get(&[0]).is_err());
    }

    #[test]
    fn test_shared_views_see_same_data() {
        let mut a = View::<i32>::row_major(&[2, 3]);
        let b = a.permute(&[1, 0]).unwrap();
        assert!(a.shares_accessor(&b));
        a.set(&[0, 2], 9).unwrap();
        assert_eq!(b.get(&[2, 0]).unwrap(), 9);
        assert_eq!(Rc::strong_count(a.accessor()), 2);
        drop(b);
        assert_eq!(Rc::strong_count(a.accessor()), 1);
    }

    #[test]
    fn test_reverse_axis_view() {
        let data: Vec<i32> = (0..5).collect();
        let view = View::from_vec(data, Shape::row_major(&[5])).unwrap();
        let rev = view.reverse_axis(0).unwrap();
        assert_eq!(rev.to_vec().unwrap(), vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_share_rejects_out_of_bounds() {
        let view = View::<u8>::row_major(&[4]);
        assert!(view.share(Shape::new(&[3], &[2], 0).unwrap()).is_err());
        assert!(view.share(Shape::new(&[2], &[2], 1).unwrap()).is_ok());
    }

    #[test]
    fn test_busy_accessor() {
        let view = View::<f64>::row_major(&[3]);
        let _guard = view.accessor().borrow_mut();
        assert_eq!(view.get(&[0]), Err(StridedError::AccessorBusy));
    }

    #[test]
    fn test_sparse_view() {
        let mut view =
            View::from_accessor(SparseStorage::<i64>::new(100), Shape::new(&[10], &[10], 0).unwrap())
                .unwrap();
        view.set(&[3], 8).unwrap();
        assert_eq!(view.get(&[3]).unwrap(), 8);
        assert_eq!(view.borrow().unwrap().materialized(), 1);
    }
}
