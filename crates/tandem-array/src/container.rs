//! Base array container shared by the master and the workers.
//!
//! An [`ArrayContainer`] pairs an immutable [`ArrayIdentity`] with the
//! mutable allocation state: the segment version `tag`, the `capacity` in
//! elements, and the logical shape, whose product never exceeds the
//! capacity. Re-windowing here is purely local; signalling other processes
//! is the master controller's job.

use tandem_shm::{ArrayView, ArrayViewMut, DType, Element, MAX_NDIM, TypedSegment, allocate};
use tandem_shm::{segment_name, shape_size};
use tracing::{debug, info};

use crate::host::{HostArray, HostData};
use crate::{ArrayError, ArrayId, Result};

/// The immutable part of an array: who it is and what it holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayIdentity {
    id: ArrayId,
    dtype: DType,
    ndim: usize,
}

impl ArrayIdentity {
    /// Validate and build an identity.
    ///
    /// The rank must be between 1 and [`MAX_NDIM`].
    pub fn new(id: ArrayId, dtype: DType, ndim: usize) -> Result<Self> {
        if ndim == 0 || ndim > MAX_NDIM {
            return Err(ArrayError::InvalidParameter(format!(
                "rank must be within 1..={MAX_NDIM}, got {ndim}"
            )));
        }
        Ok(Self { id, dtype, ndim })
    }

    /// Group-wide identifier.
    pub const fn id(&self) -> ArrayId {
        self.id
    }

    /// Element type.
    pub const fn dtype(&self) -> DType {
        self.dtype
    }

    /// Fixed rank.
    pub const fn ndim(&self) -> usize {
        self.ndim
    }
}

/// Comparable summary of an array as one process sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayState {
    /// Element type.
    pub dtype: DType,
    /// Rank.
    pub ndim: usize,
    /// Logical extents.
    pub shape: Vec<usize>,
    /// Segment version.
    pub tag: u64,
    /// Capacity in elements.
    pub capacity: usize,
}

/// Identity plus allocation state plus the current segment.
#[derive(Debug)]
pub struct ArrayContainer {
    identity: ArrayIdentity,
    tag: u64,
    capacity: usize,
    shape: Vec<usize>,
    segment: Option<TypedSegment>,
}

impl ArrayContainer {
    /// A registered array with no segment and an all-zero shape.
    pub fn new(identity: ArrayIdentity) -> Self {
        Self {
            identity,
            tag: 0,
            capacity: 0,
            shape: vec![0; identity.ndim],
            segment: None,
        }
    }

    /// Replace the current segment with the one named by `(id, tag)`.
    ///
    /// `create` is true only on the master. The old segment is released
    /// after the new one is in place, so a failure leaves the container
    /// untouched. The logical shape is not changed.
    pub fn alloc_segment(
        &mut self,
        prefix: &str,
        capacity: usize,
        tag: u64,
        create: bool,
    ) -> Result<()> {
        let name = segment_name(prefix, self.identity.id.0, tag);
        let segment = allocate(self.identity.dtype, capacity, &name, create)?;
        self.segment = Some(segment);
        self.capacity = capacity;
        self.tag = tag;
        if create {
            info!(
                "Allocated {name}: {capacity} x {} for array {}",
                self.identity.dtype, self.identity.id
            );
        } else {
            debug!("Attached {name}: {capacity} x {}", self.identity.dtype);
        }
        Ok(())
    }

    /// Re-window the existing segment; no allocation, no signal.
    pub fn reshape_view(&mut self, shape: &[usize]) -> Result<()> {
        if shape.len() != self.identity.ndim {
            return Err(ArrayError::RankMismatch {
                index: None,
                expected: self.identity.ndim,
                received: shape.len(),
            });
        }
        let requested = shape_size(shape).ok_or_else(|| {
            ArrayError::InvalidParameter(format!("shape {shape:?} overflows usize"))
        })?;
        if requested > self.capacity {
            return Err(ArrayError::CapacityExceeded {
                requested,
                capacity: self.capacity,
            });
        }
        self.shape.clear();
        self.shape.extend_from_slice(shape);
        Ok(())
    }

    /// Drop the view and release the segment.
    ///
    /// A master-created segment is unlinked; an attached one is only
    /// unmapped. The tag is kept so the next allocation moves past it.
    pub fn free_view(&mut self) {
        if let Some(segment) = self.segment.take() {
            debug!("Releasing {}", segment.segment().name());
        }
        self.capacity = 0;
        self.shape = vec![0; self.identity.ndim];
    }

    /// Immutable identity.
    pub const fn identity(&self) -> &ArrayIdentity {
        &self.identity
    }

    /// Group-wide identifier.
    pub const fn id(&self) -> ArrayId {
        self.identity.id
    }

    /// Element type.
    pub const fn dtype(&self) -> DType {
        self.identity.dtype
    }

    /// Rank.
    pub const fn ndim(&self) -> usize {
        self.identity.ndim
    }

    /// Logical extents.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Elements in the logical window.
    pub fn size(&self) -> usize {
        shape_size(&self.shape).unwrap_or(0)
    }

    /// Elements backing the current segment.
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current segment version.
    pub const fn tag(&self) -> u64 {
        self.tag
    }

    /// Whether a segment is attached.
    pub const fn is_allocated(&self) -> bool {
        self.segment.is_some()
    }

    /// Name of the current segment, if any.
    pub fn segment_name(&self) -> Option<&str> {
        self.segment.as_ref().map(|s| s.segment().name())
    }

    /// Comparable summary.
    pub fn state(&self) -> ArrayState {
        ArrayState {
            dtype: self.identity.dtype,
            ndim: self.identity.ndim,
            shape: self.shape.clone(),
            tag: self.tag,
            capacity: self.capacity,
        }
    }

    fn check_type<T: Element>(&self) -> Result<()> {
        if T::DTYPE != self.identity.dtype {
            return Err(ArrayError::IncompatibleType {
                received: T::DTYPE,
                expected: self.identity.dtype,
            });
        }
        Ok(())
    }

    /// Typed view of the logical window.
    pub fn view<T: Element>(&self) -> Result<ArrayView<'_, T>> {
        self.check_type::<T>()?;
        match &self.segment {
            Some(segment) => Ok(segment.view_as::<T>(&self.shape)?),
            None => ArrayView::from_slice(&[], &self.shape)
                .ok_or_else(|| ArrayError::CapacityExceeded {
                    requested: self.size(),
                    capacity: 0,
                }),
        }
    }

    /// Mutable typed view of the logical window.
    pub fn view_mut<T: Element>(&mut self) -> Result<ArrayViewMut<'_, T>> {
        self.check_type::<T>()?;
        let requested = self.size();
        match &mut self.segment {
            Some(segment) => Ok(segment.view_as_mut::<T>(&self.shape)?),
            None => ArrayViewMut::from_slice(&mut [], &self.shape).ok_or(
                ArrayError::CapacityExceeded {
                    requested,
                    capacity: 0,
                },
            ),
        }
    }

    /// Copy the logical window into process-local memory.
    pub fn to_host(&self) -> Result<HostArray> {
        let len = self.size() * self.identity.dtype.size_of();
        let window: &[u8] = match &self.segment {
            Some(segment) => &segment.as_bytes()[..len],
            None => &[],
        };
        let data = HostData::from_bytes(self.identity.dtype, window);
        HostArray::from_data(&self.shape, data)
    }

    /// Overwrite the logical window with `input`, which must already have
    /// this array's element type and shape.
    pub fn copy_from_host(&mut self, input: &HostArray) -> Result<()> {
        if input.dtype() != self.identity.dtype {
            return Err(ArrayError::IncompatibleType {
                received: input.dtype(),
                expected: self.identity.dtype,
            });
        }
        if input.shape() != self.shape.as_slice() {
            return Err(ArrayError::InvalidParameter(format!(
                "input shape {:?} does not match array shape {:?}",
                input.shape(),
                self.shape
            )));
        }
        let src = input.data().as_bytes();
        if let Some(segment) = &mut self.segment {
            segment.as_bytes_mut()[..src.len()].copy_from_slice(src);
        }
        Ok(())
    }
}
