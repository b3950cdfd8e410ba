//! Worker-side mirror of the master's arrays.
//!
//! A [`WorkerMirror`] keeps one [`ArrayContainer`] per array the master has
//! created and updates it by reading the control block whenever a directive
//! arrives. Workers never choose shapes, tags or capacities; they copy them.

use std::collections::HashMap;

use tandem_shm::{ArrayView, ArrayViewMut, ControlBlock, Element};
use tracing::{debug, trace};

use crate::container::{ArrayContainer, ArrayIdentity};
use crate::exec::{DataDirective, Directive};
use crate::{ArrayError, ArrayId, Result};

/// One worker's registry of mirrored arrays.
#[derive(Debug)]
pub struct WorkerMirror {
    rank: usize,
    prefix: String,
    control: ControlBlock,
    arrays: HashMap<ArrayId, ArrayContainer>,
}

impl WorkerMirror {
    /// Attach to the control block of the group named by `prefix`.
    pub fn attach(rank: usize, prefix: &str) -> Result<Self> {
        let control = ControlBlock::attach(prefix)?;
        debug!("Worker {rank} attached to {}", control.name());
        Ok(Self {
            rank,
            prefix: prefix.to_string(),
            control,
            arrays: HashMap::new(),
        })
    }

    /// Run the handler for `directive` against the current control block.
    pub fn apply(&mut self, directive: Directive) -> Result<()> {
        trace!("Worker {} applying {directive}", self.rank);
        match directive {
            Directive::Data(DataDirective::Create) => self.create(),
            Directive::Data(DataDirective::Alloc) => self.alloc(),
            Directive::Data(DataDirective::Reshape) => self.reshape(),
            Directive::Data(DataDirective::Free) => self.free(),
        }
    }

    fn create(&mut self) -> Result<()> {
        let id = ArrayId(self.control.id());
        let identity = ArrayIdentity::new(id, self.control.dtype()?, self.control.ndim())?;
        self.arrays.insert(id, ArrayContainer::new(identity));
        Ok(())
    }

    fn alloc(&mut self) -> Result<()> {
        let id = ArrayId(self.control.id());
        let tag = self.control.tag();
        let capacity = self.control.alloc_size();
        let shape = self.control.shape();
        let array = self.arrays.get_mut(&id).ok_or(ArrayError::UnknownArray(id))?;
        array.alloc_segment(&self.prefix, capacity, tag, false)?;
        array.reshape_view(&shape)
    }

    fn reshape(&mut self) -> Result<()> {
        let id = ArrayId(self.control.id());
        let shape = self.control.shape();
        self.arrays
            .get_mut(&id)
            .ok_or(ArrayError::UnknownArray(id))?
            .reshape_view(&shape)
    }

    fn free(&mut self) -> Result<()> {
        let id = ArrayId(self.control.id());
        self.arrays
            .get_mut(&id)
            .ok_or(ArrayError::UnknownArray(id))?
            .free_view();
        Ok(())
    }

    /// This worker's rank.
    pub const fn rank(&self) -> usize {
        self.rank
    }

    /// Mirrored array `id`, if registered.
    pub fn array(&self, id: ArrayId) -> Option<&ArrayContainer> {
        self.arrays.get(&id)
    }

    /// Ids of every registered array, in ascending order.
    pub fn ids(&self) -> Vec<ArrayId> {
        let mut ids: Vec<_> = self.arrays.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered arrays.
    pub fn len(&self) -> usize {
        self.arrays.len()
    }

    /// Whether no arrays are registered.
    pub fn is_empty(&self) -> bool {
        self.arrays.is_empty()
    }

    /// Typed view of array `id` as this worker sees it.
    pub fn view<T: Element>(&self, id: ArrayId) -> Result<ArrayView<'_, T>> {
        self.arrays
            .get(&id)
            .ok_or(ArrayError::UnknownArray(id))?
            .view::<T>()
    }

    /// Mutable typed view of array `id`; writes are visible to the master
    /// and every other worker attached to the same segment.
    pub fn view_mut<T: Element>(&mut self, id: ArrayId) -> Result<ArrayViewMut<'_, T>> {
        self.arrays
            .get_mut(&id)
            .ok_or(ArrayError::UnknownArray(id))?
            .view_mut::<T>()
    }
}
