//! Row-major multidimensional windows over typed element slices.

use std::ops::{Index, IndexMut};

/// Number of elements described by `shape`, or `None` on overflow.
///
/// The empty shape describes zero elements.
pub fn shape_size(shape: &[usize]) -> Option<usize> {
    if shape.is_empty() {
        return Some(0);
    }
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// Row-major flat offset of `index` within `shape`.
///
/// Returns `None` when the index has the wrong rank or any coordinate is out
/// of range.
pub fn flat_offset(shape: &[usize], index: &[usize]) -> Option<usize> {
    if index.len() != shape.len() {
        return None;
    }
    let mut offset = 0usize;
    for (&i, &extent) in index.iter().zip(shape) {
        if i >= extent {
            return None;
        }
        offset = offset * extent + i;
    }
    Some(offset)
}

/// Read-only typed view.
#[derive(Debug)]
pub struct ArrayView<'a, T> {
    data: &'a [T],
    shape: Vec<usize>,
}

impl<'a, T> ArrayView<'a, T> {
    /// Wrap `data`, which must hold exactly `shape_size(shape)` elements
    /// (or any length for the empty shape).
    pub(crate) fn new(data: &'a [T], shape: Vec<usize>) -> Self {
        Self { data, shape }
    }

    /// Build a view over caller-owned memory.
    ///
    /// Returns `None` when `data.len()` does not match `shape`.
    pub fn from_slice(data: &'a [T], shape: &[usize]) -> Option<Self> {
        (shape_size(shape)? == data.len()).then(|| Self::new(data, shape.to_vec()))
    }

    /// Extents of the view.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements in the window.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the window holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Elements in row-major order.
    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }

    /// Element at a multidimensional index.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        flat_offset(&self.shape, index).map(|o| &self.data[o])
    }
}

impl<T> Index<usize> for ArrayView<'_, T> {
    type Output = T;

    fn index(&self, offset: usize) -> &T {
        &self.data[offset]
    }
}

/// Mutable typed view.
#[derive(Debug)]
pub struct ArrayViewMut<'a, T> {
    data: &'a mut [T],
    shape: Vec<usize>,
}

impl<'a, T> ArrayViewMut<'a, T> {
    pub(crate) fn new(data: &'a mut [T], shape: Vec<usize>) -> Self {
        Self { data, shape }
    }

    /// Build a mutable view over caller-owned memory.
    pub fn from_slice(data: &'a mut [T], shape: &[usize]) -> Option<Self> {
        if shape_size(shape)? != data.len() {
            return None;
        }
        Some(Self::new(data, shape.to_vec()))
    }

    /// Extents of the view.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements in the window.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the window holds no elements.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Elements in row-major order.
    pub fn as_slice(&self) -> &[T] {
        &*self.data
    }

    /// Mutable elements in row-major order.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut *self.data
    }

    /// Give up the view, keeping the mutable borrow of the elements.
    pub fn into_mut_slice(self) -> &'a mut [T] {
        self.data
    }

    /// Element at a multidimensional index.
    pub fn get(&self, index: &[usize]) -> Option<&T> {
        flat_offset(&self.shape, index).map(|o| &self.data[o])
    }

    /// Mutable element at a multidimensional index.
    pub fn get_mut(&mut self, index: &[usize]) -> Option<&mut T> {
        flat_offset(&self.shape, index).map(|o| &mut self.data[o])
    }

    /// Reborrow as a read-only view.
    pub fn view(&self) -> ArrayView<'_, T> {
        ArrayView::new(&*self.data, self.shape.clone())
    }
}

impl<T: Copy> ArrayViewMut<'_, T> {
    /// Set every element of the window.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }

    /// Copy `src` into the window; lengths must match.
    pub fn copy_from_slice(&mut self, src: &[T]) {
        self.data.copy_from_slice(src);
    }
}

impl<T> Index<usize> for ArrayViewMut<'_, T> {
    type Output = T;

    fn index(&self, offset: usize) -> &T {
        &self.data[offset]
    }
}

impl<T> IndexMut<usize> for ArrayViewMut<'_, T> {
    fn index_mut(&mut self, offset: usize) -> &mut T {
        &mut self.data[offset]
    }
}
