//! Storage accessors: indexed read/write plus a scoped raw-memory escape hatch.
//!
//! [`Storage`] is the dense accessor. It is created either from a requested length,
//! in which case no buffer exists until the first read, write or raw-handle request,
//! or from existing data, which counts as allocated immediately. Once allocated the
//! buffer lives as long as the storage.
//!
//! [`SparseStorage`] materializes elements on demand and never exposes contiguous
//! memory, so traversals over it go through the indexed path.

use rustc_hash::FxHashMap as HashMap;

use crate::element::Element;
use crate::{Result, StridedError};

/// Element access by flat index.
///
/// Traversals prefer [`raw_handle`](Accessor::raw_handle) and fall back to
/// [`read`](Accessor::read)/[`write`](Accessor::write) when it yields `None`.
/// Both paths must observe the same element values.
pub trait Accessor<T: Element> {
    /// Logical number of elements.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the element at `index`, allocating on first touch.
    fn read(&mut self, index: usize) -> Result<T>;

    /// Write the element at `index`, allocating on first touch.
    fn write(&mut self, index: usize, value: T) -> Result<()>;

    /// Borrow the backing buffer for the duration of a bulk operation.
    ///
    /// Returns `Ok(None)` if the accessor has no contiguous backing. The handle
    /// should cover all [`len`](Accessor::len) elements; traversals validate
    /// their shapes against the handle's own length and reject anything larger.
    fn raw_handle(&mut self) -> Result<Option<RawHandle<'_, T>>> {
        Ok(None)
    }
}

#[inline]
fn check_index(index: usize, len: usize) -> Result<()> {
    if index >= len {
        return Err(StridedError::IndexOutOfRange { index, len });
    }
    Ok(())
}

// ============================================================================
// RawHandle
// ============================================================================

/// Exclusive, fixed-address view over an accessor's buffer.
///
/// The handle borrows its accessor mutably, so the address stays valid and no
/// other access can happen until it is dropped. Dropping it releases the
/// accessor on every exit path.
pub struct RawHandle<'a, T> {
    data: &'a mut [T],
}

impl<'a, T> RawHandle<'a, T> {
    /// Wrap a buffer. Accessor implementations call this from
    /// [`Accessor::raw_handle`].
    pub fn new(data: &'a mut [T]) -> Self {
        log::trace!(
            "acquired raw handle over {} elements at {:p}",
            data.len(),
            data.as_ptr()
        );
        Self { data }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &*self.data
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut *self.data
    }

    /// Raw const pointer to element 0.
    #[inline]
    pub fn as_ptr(&self) -> *const T {
        self.data.as_ptr()
    }

    /// Raw mutable pointer to element 0.
    #[inline]
    pub fn as_mut_ptr(&mut self) -> *mut T {
        self.data.as_mut_ptr()
    }
}

impl<T> Drop for RawHandle<'_, T> {
    fn drop(&mut self) {
        log::trace!("released raw handle at {:p}", self.data.as_ptr());
    }
}

impl<T> std::fmt::Debug for RawHandle<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawHandle")
            .field("ptr", &self.data.as_ptr())
            .field("len", &self.data.len())
            .finish()
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Dense accessor over a contiguous buffer with allocate-on-touch semantics.
///
/// `buffer` is `None` until the first read, write or raw-handle request and is
/// never released afterwards.
#[derive(Clone)]
pub struct Storage<T> {
    len: usize,
    buffer: Option<Vec<T>>,
}

impl<T> std::fmt::Debug for Storage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("len", &self.len)
            .field("allocated", &self.is_allocated())
            .finish()
    }
}

impl<T> Storage<T> {
    /// Storage logically holding `len` elements. Nothing is allocated yet.
    pub fn new(len: usize) -> Self {
        Self { len, buffer: None }
    }

    /// Wrap existing data. Counts as allocated.
    pub fn from_vec(data: Vec<T>) -> Self {
        Self {
            len: data.len(),
            buffer: Some(data),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.buffer.is_some()
    }
}

/// Zero-initialized buffer of `len` elements.
fn zeroed<T: Element>(len: usize) -> Result<Vec<T>> {
    let data = bytemuck::allocation::try_zeroed_vec::<T>(len)
        .map_err(|()| StridedError::Allocation { len })?;
    log::debug!("allocated storage of {} x {}", len, std::any::type_name::<T>());
    Ok(data)
}

impl<T: Element> Storage<T> {
    /// Allocate the buffer if it does not exist yet and return it.
    ///
    /// The buffer comes from a zeroed allocation, so no separate fill pass runs.
    /// On failure the storage stays unallocated and the call may be retried.
    pub fn allocate(&mut self) -> Result<&mut [T]> {
        let data = match self.buffer.take() {
            Some(data) => data,
            None => zeroed(self.len)?,
        };
        Ok(self.buffer.insert(data).as_mut_slice())
    }

    /// Consume the storage, allocating it first if needed.
    pub fn into_vec(self) -> Result<Vec<T>> {
        match self.buffer {
            Some(data) => Ok(data),
            None => zeroed(self.len),
        }
    }
}

impl<T> From<Vec<T>> for Storage<T> {
    fn from(data: Vec<T>) -> Self {
        Self::from_vec(data)
    }
}

impl<T: Element> Accessor<T> for Storage<T> {
    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    fn read(&mut self, index: usize) -> Result<T> {
        check_index(index, self.len)?;
        Ok(self.allocate()?[index])
    }

    fn write(&mut self, index: usize, value: T) -> Result<()> {
        check_index(index, self.len)?;
        self.allocate()?[index] = value;
        Ok(())
    }

    fn raw_handle(&mut self) -> Result<Option<RawHandle<'_, T>>> {
        Ok(Some(RawHandle::new(self.allocate()?)))
    }
}

// ============================================================================
// SparseStorage
// ============================================================================

/// Accessor that stores only written elements; unwritten ones read as `fill`.
#[derive(Debug, Clone)]
pub struct SparseStorage<T> {
    len: usize,
    fill: T,
    entries: HashMap<usize, T>,
}

impl<T: Element> SparseStorage<T> {
    /// Sparse storage of `len` elements reading as zero until written.
    pub fn new(len: usize) -> Self {
        Self::with_fill(len, T::zero())
    }

    pub fn with_fill(len: usize, fill: T) -> Self {
        Self {
            len,
            fill,
            entries: HashMap::default(),
        }
    }

    /// Number of materialized elements.
    #[inline]
    pub fn materialized(&self) -> usize {
        self.entries.len()
    }
}

impl<T: Element> Accessor<T> for SparseStorage<T> {
    #[inline]
    fn len(&self) -> usize {
        self.len
    }

    fn read(&mut self, index: usize) -> Result<T> {
        check_index(index, self.len)?;
        Ok(self.entries.get(&index).copied().unwrap_or(self.fill))
    }

    fn write(&mut self, index: usize, value: T) -> Result<()> {
        check_index(index, self.len)?;
        self.entries.insert(index, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_lazy() {
        let mut s = Storage::<f64>::new(4);
        assert_eq!(s.len(), 4);
        assert!(!s.is_allocated());
        assert_eq!(s.read(2).unwrap(), 0.0);
        assert!(s.is_allocated());
    }

    #[test]
    fn test_write_allocates() {
        let mut s = Storage::<i32>::new(3);
        s.write(1, 7).unwrap();
        assert!(s.is_allocated());
        assert_eq!(s.into_vec().unwrap(), vec![0, 7, 0]);
    }

    #[test]
    fn test_raw_handle_allocates() {
        let mut s = Storage::<u8>::new(5);
        {
            let handle = s.raw_handle().unwrap().unwrap();
            assert_eq!(handle.len(), 5);
        }
        assert!(s.is_allocated());
    }

    #[test]
    fn test_allocate_keeps_buffer() {
        let mut s = Storage::<i16>::new(3);
        s.allocate().unwrap()[1] = 5;
        let ptr = s.allocate().unwrap().as_ptr();
        assert_eq!(s.allocate().unwrap(), &[0, 5, 0]);
        assert_eq!(s.allocate().unwrap().as_ptr(), ptr);
    }

    #[test]
    fn test_into_vec_unallocated() {
        let s = Storage::<u32>::new(4);
        assert!(!s.is_allocated());
        assert_eq!(s.into_vec().unwrap(), vec![0; 4]);
        assert!(Storage::<u64>::new(usize::MAX).into_vec().is_err());
    }

    #[test]
    fn test_from_vec_is_allocated() {
        let mut s = Storage::from_vec(vec![1.0f32, 2.0, 3.0]);
        assert!(s.is_allocated());
        assert_eq!(s.read(2).unwrap(), 3.0);
    }

    #[test]
    fn test_out_of_range() {
        let mut s = Storage::<i64>::new(3);
        assert_eq!(
            s.read(3),
            Err(StridedError::IndexOutOfRange { index: 3, len: 3 })
        );
        assert_eq!(
            s.write(10, 1),
            Err(StridedError::IndexOutOfRange { index: 10, len: 3 })
        );
        // Rejected accesses do not touch the buffer.
        assert!(!s.is_allocated());
    }

    #[test]
    fn test_raw_write_indexed_read() {
        let mut s = Storage::<i32>::new(4);
        {
            let mut handle = s.raw_handle().unwrap().unwrap();
            handle.as_mut_slice()[3] = 42;
        }
        assert_eq!(s.read(3).unwrap(), 42);
    }

    #[test]
    fn test_indexed_write_raw_read() {
        let mut s = Storage::<f64>::new(4);
        s.write(0, 1.5).unwrap();
        let handle = s.raw_handle().unwrap().unwrap();
        assert_eq!(handle.as_slice()[0], 1.5);
    }

    #[test]
    fn test_allocation_failure_is_retryable() {
        let mut s = Storage::<u64>::new(usize::MAX);
        assert_eq!(
            s.allocate().unwrap_err(),
            StridedError::Allocation { len: usize::MAX }
        );
        assert!(!s.is_allocated());
        assert!(s.raw_handle().is_err());
        assert!(!s.is_allocated());
    }

    #[test]
    fn test_zero_len_storage() {
        let mut s = Storage::<f32>::new(0);
        assert!(s.is_empty());
        assert!(s.allocate().unwrap().is_empty());
        assert!(s.read(0).is_err());
    }

    #[test]
    fn test_sparse_storage() {
        let mut s = SparseStorage::<i32>::with_fill(10, -1);
        assert_eq!(s.read(4).unwrap(), -1);
        s.write(4, 9).unwrap();
        assert_eq!(s.read(4).unwrap(), 9);
        assert_eq!(s.materialized(), 1);
        assert!(s.raw_handle().unwrap().is_none());
        assert!(s.read(10).is_err());
    }
}
