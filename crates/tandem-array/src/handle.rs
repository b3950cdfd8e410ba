//! User-facing shared array handle.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tandem_shm::{ArrayView, ArrayViewMut, DType, flat_offset};
use tracing::warn;

use crate::container::{ArrayContainer, ArrayState};
use crate::exec::{ExecutionChannel, WorkerPool};
use crate::host::{HostArray, HostElement};
use crate::master::Coordinator;
use crate::{ArrayError, ArrayId, Result};

/// A growable shared array of `T`, held by the master.
///
/// Every size change goes through the group's coordinator and returns only
/// after all workers have followed. Element reads and writes go straight to
/// shared memory and are not signalled. Dropping the handle frees the
/// array on every worker as [`Data::free_memory`] does.
pub struct Data<T: HostElement, C: ExecutionChannel = WorkerPool> {
    coordinator: Arc<Mutex<Coordinator<C>>>,
    array: ArrayContainer,
    name: Option<String>,
    minibatch: bool,
    _element: PhantomData<T>,
}

impl<T: HostElement, C: ExecutionChannel> Data<T, C> {
    pub(crate) fn new(
        coordinator: Arc<Mutex<Coordinator<C>>>,
        array: ArrayContainer,
        name: Option<String>,
        minibatch: bool,
    ) -> Self {
        Self {
            coordinator,
            array,
            name,
            minibatch,
            _element: PhantomData,
        }
    }

    /// Replace the contents with `input`, resizing as needed.
    ///
    /// The input is conditioned first (see [`Self::condition_data`]); the
    /// array then takes the input's shape, reallocating with `oversize`
    /// headroom if it does not fit.
    pub fn set_value(&mut self, input: &HostArray, force_cast: bool, oversize: f64) -> Result<()> {
        let conditioned = self.condition_data(input, force_cast)?;
        self.update(conditioned.shape(), oversize)?;
        self.array.copy_from_host(&conditioned)
    }

    /// [`Self::set_value`] without forced casting and with the group's
    /// default oversize.
    pub fn assign(&mut self, input: &HostArray) -> Result<()> {
        let oversize = self.coordinator.lock().config().default_oversize;
        self.set_value(input, false, oversize)
    }

    /// Change the extent of dimension 0 only.
    pub fn set_length(&mut self, length: usize, oversize: f64) -> Result<()> {
        if length == 0 {
            return Err(ArrayError::InvalidParameter(
                "length must be a positive integer".to_string(),
            ));
        }
        let mut shape = self.array.shape().to_vec();
        if let Some(first) = shape.first_mut() {
            *first = length;
        }
        self.update(&shape, oversize)
    }

    /// Change every extent; the rank is fixed.
    pub fn set_shape(&mut self, shape: &[usize], oversize: f64) -> Result<()> {
        if shape.len() != self.array.ndim() {
            return Err(ArrayError::RankMismatch {
                index: None,
                expected: self.array.ndim(),
                received: shape.len(),
            });
        }
        self.update(shape, oversize)
    }

    fn update(&mut self, shape: &[usize], oversize: f64) -> Result<()> {
        self.coordinator
            .lock()
            .update_array(&mut self.array, shape, oversize)
    }

    /// The host array [`Self::set_value`] would copy in, without touching
    /// shared memory.
    ///
    /// With `force_cast` the input is converted unconditionally. Otherwise a
    /// different element type is only accepted when it up-casts safely to
    /// this array's type. The rank must match either way.
    pub fn condition_data(&self, input: &HostArray, force_cast: bool) -> Result<HostArray> {
        let expected = self.dtype();
        let received = input.dtype();
        let conditioned = if received == expected {
            input.clone()
        } else if force_cast || DType::common_type(received, expected) == expected {
            input.cast(expected)
        } else {
            return Err(ArrayError::IncompatibleType { received, expected });
        };
        if conditioned.ndim() != self.ndim() {
            return Err(ArrayError::RankMismatch {
                index: None,
                expected: self.ndim(),
                received: conditioned.ndim(),
            });
        }
        Ok(conditioned)
    }

    /// Release the shared memory on the master and every worker.
    ///
    /// This is the only way to shrink the allocation. The array stays
    /// usable; the next resize allocates a fresh segment.
    pub fn free_memory(&mut self) -> Result<()> {
        self.coordinator.lock().free(&mut self.array)
    }

    /// Group-wide identifier.
    pub const fn id(&self) -> ArrayId {
        self.array.id()
    }

    /// Element type.
    pub const fn dtype(&self) -> DType {
        self.array.dtype()
    }

    /// Rank.
    pub const fn ndim(&self) -> usize {
        self.array.ndim()
    }

    /// Logical extents.
    pub fn shape(&self) -> &[usize] {
        self.array.shape()
    }

    /// Elements in the logical window.
    pub fn size(&self) -> usize {
        self.array.size()
    }

    /// Extent of dimension 0.
    pub fn len(&self) -> usize {
        self.array.shape().first().copied().unwrap_or(0)
    }

    /// Whether the logical window holds no elements.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Elements backing the current segment.
    pub const fn alloc_size(&self) -> usize {
        self.array.capacity()
    }

    /// Current segment version.
    pub const fn tag(&self) -> u64 {
        self.array.tag()
    }

    /// Display name given at creation.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the array was created as minibatch input.
    pub const fn minibatch(&self) -> bool {
        self.minibatch
    }

    /// Comparable summary.
    pub fn state(&self) -> ArrayState {
        self.array.state()
    }

    /// Underlying container.
    pub const fn container(&self) -> &ArrayContainer {
        &self.array
    }

    /// Typed view of the logical window.
    pub fn data(&self) -> Result<ArrayView<'_, T>> {
        self.array.view::<T>()
    }

    /// Mutable typed view of the logical window.
    pub fn data_mut(&mut self) -> Result<ArrayViewMut<'_, T>> {
        self.array.view_mut::<T>()
    }

    /// Elements in row-major order.
    pub fn as_slice(&self) -> &[T] {
        match self.array.view::<T>() {
            Ok(view) => view.as_slice(),
            Err(_) => &[],
        }
    }

    /// Mutable elements in row-major order.
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        match self.array.view_mut::<T>() {
            Ok(view) => view.into_mut_slice(),
            Err(_) => &mut [],
        }
    }

    /// Element at a multidimensional index.
    pub fn get(&self, index: &[usize]) -> Option<T> {
        let offset = flat_offset(self.shape(), index)?;
        self.as_slice().get(offset).copied()
    }

    /// Write one element at a multidimensional index.
    pub fn set(&mut self, index: &[usize], value: T) -> Result<()> {
        let offset = flat_offset(self.shape(), index).ok_or_else(|| {
            ArrayError::InvalidParameter(format!(
                "index {index:?} is outside shape {:?}",
                self.shape()
            ))
        })?;
        if let Some(slot) = self.as_mut_slice().get_mut(offset) {
            *slot = value;
        }
        Ok(())
    }

    /// Copy the logical window into process-local memory.
    pub fn to_host(&self) -> Result<HostArray> {
        self.array.to_host()
    }
}

impl<T: HostElement, C: ExecutionChannel> Index<usize> for Data<T, C> {
    type Output = T;

    fn index(&self, offset: usize) -> &T {
        &self.as_slice()[offset]
    }
}

impl<T: HostElement, C: ExecutionChannel> IndexMut<usize> for Data<T, C> {
    fn index_mut(&mut self, offset: usize) -> &mut T {
        &mut self.as_mut_slice()[offset]
    }
}

impl<T: HostElement, C: ExecutionChannel> Drop for Data<T, C> {
    fn drop(&mut self) {
        if !self.array.is_allocated() {
            return;
        }
        let mut coordinator = self.coordinator.lock();
        if coordinator.is_failed() {
            return;
        }
        if let Err(e) = coordinator.free(&mut self.array) {
            warn!("Failed to free dropped array {}: {e}", self.array.id());
        }
    }
}

impl<T: HostElement, C: ExecutionChannel> std::fmt::Debug for Data<T, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("id", &self.id())
            .field("dtype", &self.dtype())
            .field("shape", &self.shape())
            .field("alloc_size", &self.alloc_size())
            .field("tag", &self.tag())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
