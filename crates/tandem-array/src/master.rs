//! Master controller.
//!
//! The [`Coordinator`] is the only place shapes, capacities and tags are
//! decided. Every change follows the same sequence: update the local
//! container, publish the parameters in the control block, launch the
//! matching directive and join. The caller never returns before every
//! worker has applied the change.

use std::sync::Arc;

use parking_lot::Mutex;
use tandem_shm::{ControlBlock, DType, control_name, shape_size};
use tracing::{info, warn};

use crate::container::{ArrayContainer, ArrayIdentity};
use crate::exec::{DataDirective, ExecutionChannel, WorkerPool};
use crate::handle::Data;
use crate::host::HostElement;
use crate::{ArrayError, ArrayId, GroupConfig, Result};

/// Smallest accepted oversize factor.
pub const MIN_OVERSIZE: f64 = 1.0;

/// Largest accepted oversize factor.
pub const MAX_OVERSIZE: f64 = 2.0;

/// Reject oversize factors outside [1, 2] (NaN included).
pub(crate) fn check_oversize(oversize: f64) -> Result<()> {
    if (MIN_OVERSIZE..=MAX_OVERSIZE).contains(&oversize) {
        Ok(())
    } else {
        Err(ArrayError::InvalidParameter(format!(
            "oversize must be within [{MIN_OVERSIZE}, {MAX_OVERSIZE}], got {oversize}"
        )))
    }
}

/// Capacity for `required` elements grown by `oversize`, never less than
/// `required`.
fn grown_capacity(required: usize, oversize: f64) -> usize {
    ((required as f64 * oversize).floor() as usize).max(required)
}

/// Owns the control block and the execution channel, and drives every
/// array through its lifecycle.
#[derive(Debug)]
pub struct Coordinator<C: ExecutionChannel> {
    channel: C,
    control: ControlBlock,
    config: GroupConfig,
    next_id: u64,
    failure: Option<String>,
}

impl<C: ExecutionChannel> Coordinator<C> {
    /// Assemble a coordinator from an initialized control block and a
    /// channel whose workers are attached to it.
    pub fn new(config: GroupConfig, control: ControlBlock, channel: C) -> Self {
        Self {
            channel,
            control,
            config,
            next_id: 0,
            failure: None,
        }
    }

    /// Group configuration.
    pub const fn config(&self) -> &GroupConfig {
        &self.config
    }

    /// The execution channel.
    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    /// Whether an earlier join failed. A failed group refuses further
    /// directives.
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    fn check_healthy(&self) -> Result<()> {
        match &self.failure {
            Some(reason) => Err(ArrayError::GroupFailure(reason.clone())),
            None => Ok(()),
        }
    }

    /// Register a new array with a fresh id on the master and every worker.
    ///
    /// The array starts with an all-zero shape and no segment.
    pub fn create_array(&mut self, dtype: DType, ndim: usize) -> Result<ArrayContainer> {
        self.check_healthy()?;
        let id = ArrayId(self.next_id);
        let identity = ArrayIdentity::new(id, dtype, ndim)?;
        self.next_id += 1;

        self.control.set_id(id.0);
        self.control.set_dtype(dtype);
        self.control.set_ndim(ndim)?;
        self.signal(DataDirective::Create)?;

        info!("Created array {id}: {dtype}, {ndim} dimensions");
        Ok(ArrayContainer::new(identity))
    }

    /// Bring `array` to `shape`, reallocating with `oversize` headroom only
    /// when the current capacity is too small.
    ///
    /// Requesting the current shape is a no-op that sends nothing.
    pub fn update_array(
        &mut self,
        array: &mut ArrayContainer,
        shape: &[usize],
        oversize: f64,
    ) -> Result<()> {
        if shape.len() != array.ndim() {
            return Err(ArrayError::RankMismatch {
                index: None,
                expected: array.ndim(),
                received: shape.len(),
            });
        }
        if shape == array.shape() {
            return Ok(());
        }
        let required = required_size(shape)?;
        if required > array.capacity() {
            self.alloc_and_signal(array, shape, oversize)
        } else {
            self.reshape_and_signal(array, shape)
        }
    }

    /// Replace the segment of `array` with a new one of
    /// `floor(size(shape) * oversize)` elements under the next tag.
    ///
    /// Old contents are not carried over.
    pub fn alloc_and_signal(
        &mut self,
        array: &mut ArrayContainer,
        shape: &[usize],
        oversize: f64,
    ) -> Result<()> {
        self.check_healthy()?;
        check_oversize(oversize)?;
        if shape.len() != array.ndim() {
            return Err(ArrayError::RankMismatch {
                index: None,
                expected: array.ndim(),
                received: shape.len(),
            });
        }
        let required = required_size(shape)?;
        let capacity = grown_capacity(required, oversize);
        let tag = array.tag() + 1;

        array.alloc_segment(&self.config.segment_prefix, capacity, tag, true)?;
        array.reshape_view(shape)?;

        self.publish(array)?;
        self.control.set_tag(tag);
        self.control.set_alloc_size(capacity);
        self.signal(DataDirective::Alloc)
    }

    /// Re-window `array` within its current capacity on the master and
    /// every worker.
    pub fn reshape_and_signal(
        &mut self,
        array: &mut ArrayContainer,
        shape: &[usize],
    ) -> Result<()> {
        self.check_healthy()?;
        array.reshape_view(shape)?;
        self.publish(array)?;
        self.signal(DataDirective::Reshape)
    }

    /// Release the segment of `array` everywhere. The tag is kept, so a
    /// later allocation still moves to a new segment name.
    pub fn free(&mut self, array: &mut ArrayContainer) -> Result<()> {
        self.check_healthy()?;
        array.free_view();
        self.publish(array)?;
        self.signal(DataDirective::Free)?;
        info!("Freed array {}", array.id());
        Ok(())
    }

    fn publish(&mut self, array: &ArrayContainer) -> Result<()> {
        self.control.set_id(array.id().0);
        self.control.set_dtype(array.dtype());
        self.control.set_ndim(array.ndim())?;
        self.control.set_shape(array.shape())?;
        Ok(())
    }

    fn signal(&mut self, directive: DataDirective) -> Result<()> {
        let result = self
            .channel
            .launch(directive.into())
            .and_then(|()| self.channel.join());
        if let Err(e) = &result {
            warn!("Directive {directive:?} failed, group is no longer usable: {e}");
            self.failure = Some(e.to_string());
        }
        result
    }
}

fn required_size(shape: &[usize]) -> Result<usize> {
    shape_size(shape)
        .ok_or_else(|| ArrayError::InvalidParameter(format!("shape {shape:?} overflows usize")))
}

/// Cloneable handle to a master and its workers; the entry point for
/// creating shared arrays.
pub struct Group<C: ExecutionChannel = WorkerPool> {
    coordinator: Arc<Mutex<Coordinator<C>>>,
}

impl Group<WorkerPool> {
    /// Create the control block and start an in-process worker pool.
    pub fn spawn(config: GroupConfig) -> Result<Self> {
        config.validate()?;
        let control = ControlBlock::create(&config.segment_prefix)?;
        let pool = WorkerPool::spawn(&config)?;
        Ok(Self::from_coordinator(Coordinator::new(config, control, pool)))
    }

    /// Remove a control block left under `config.segment_prefix` by a group
    /// that did not shut down. Returns whether one was found.
    ///
    /// Only call this when no live group uses the prefix: a running group
    /// loses its name and new workers can no longer attach to it.
    pub fn remove_stale(config: &GroupConfig) -> Result<bool> {
        config.validate()?;
        let removed = tandem_shm::segment::remove(&control_name(&config.segment_prefix))?;
        Ok(removed)
    }
}

impl<C: ExecutionChannel> Group<C> {
    /// Create the control block and drive `channel`, whose workers attach
    /// to it on their own.
    pub fn with_channel(config: GroupConfig, channel: C) -> Result<Self> {
        config.validate()?;
        let control = ControlBlock::create(&config.segment_prefix)?;
        Ok(Self::from_coordinator(Coordinator::new(config, control, channel)))
    }

    fn from_coordinator(coordinator: Coordinator<C>) -> Self {
        Self {
            coordinator: Arc::new(Mutex::new(coordinator)),
        }
    }

    /// New shared array of element type `T` and rank `ndim`.
    pub fn create_data<T: HostElement>(&self, ndim: usize) -> Result<Data<T, C>> {
        self.create_data_with(ndim, None, false)
    }

    /// New shared array with a display name and a minibatch marker.
    pub fn create_data_with<T: HostElement>(
        &self,
        ndim: usize,
        name: Option<String>,
        minibatch: bool,
    ) -> Result<Data<T, C>> {
        let array = self.coordinator.lock().create_array(T::DTYPE, ndim)?;
        Ok(Data::new(
            Arc::clone(&self.coordinator),
            array,
            name,
            minibatch,
        ))
    }

    /// Run `f` with exclusive access to the execution channel.
    pub fn channel<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(self.coordinator.lock().channel_mut())
    }

    /// Copy of the group configuration.
    pub fn config(&self) -> GroupConfig {
        self.coordinator.lock().config().clone()
    }

    /// Whether a worker failure has disabled the group.
    pub fn is_failed(&self) -> bool {
        self.coordinator.lock().is_failed()
    }
}

impl<C: ExecutionChannel> Clone for Group<C> {
    fn clone(&self) -> Self {
        Self {
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

impl<C: ExecutionChannel> std::fmt::Debug for Group<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("handles", &Arc::strong_count(&self.coordinator))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::exec::Directive;
    use std::sync::atomic::{AtomicU32, Ordering};

    static COUNTER: AtomicU32 = AtomicU32::new(0);

    #[derive(Debug, Default)]
    struct Recorder {
        launched: Vec<Directive>,
        fail_join: bool,
    }

    impl ExecutionChannel for Recorder {
        fn launch(&mut self, directive: Directive) -> Result<()> {
            self.launched.push(directive);
            Ok(())
        }

        fn join(&mut self) -> Result<()> {
            if self.fail_join {
                Err(ArrayError::GroupFailure("worker 0: gone".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn coordinator() -> Option<Coordinator<Recorder>> {
        let prefix = format!(
            "tmst{}x{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        );
        match ControlBlock::create(&prefix) {
            Ok(control) => Some(Coordinator::new(
                GroupConfig::new(prefix),
                control,
                Recorder::default(),
            )),
            Err(e) => {
                eprintln!("skipping shmem test (not available): {e}");
                None
            }
        }
    }

    #[test]
    fn test_check_oversize() {
        assert!(check_oversize(1.0).is_ok());
        assert!(check_oversize(2.0).is_ok());
        assert!(check_oversize(0.99).is_err());
        assert!(check_oversize(2.01).is_err());
        assert!(check_oversize(f64::NAN).is_err());
    }

    #[test]
    fn test_grown_capacity() {
        assert_eq!(grown_capacity(6, 1.5), 9);
        assert_eq!(grown_capacity(7, 1.1), 7);
        assert_eq!(grown_capacity(10, 2.0), 20);
        assert_eq!(grown_capacity(0, 2.0), 0);
    }

    #[test]
    fn test_alloc_then_reshape() {
        let Some(mut master) = coordinator() else {
            return;
        };
        let mut array = master.create_array(DType::Int32, 2).expect("create");
        assert_eq!(array.id(), ArrayId(0));

        master.update_array(&mut array, &[2, 3], 1.5).expect("grow");
        assert_eq!(array.capacity(), 9);
        assert_eq!(array.tag(), 1);

        master.update_array(&mut array, &[3, 3], 1.5).expect("fits");
        assert_eq!(array.tag(), 1);

        master.update_array(&mut array, &[3, 3], 1.5).expect("same");
        assert_eq!(
            master.channel.launched,
            vec![
                Directive::Data(DataDirective::Create),
                Directive::Data(DataDirective::Alloc),
                Directive::Data(DataDirective::Reshape),
            ]
        );
    }

    #[test]
    fn test_invalid_oversize_leaves_state_untouched() {
        let Some(mut master) = coordinator() else {
            return;
        };
        let mut array = master.create_array(DType::Float32, 1).expect("create");
        let before = array.state();
        assert!(matches!(
            master.update_array(&mut array, &[4], 3.0),
            Err(ArrayError::InvalidParameter(_))
        ));
        assert_eq!(array.state(), before);
        assert_eq!(master.channel.launched.len(), 1);
    }

    #[test]
    fn test_join_failure_disables_group() {
        let Some(mut master) = coordinator() else {
            return;
        };
        let mut array = master.create_array(DType::UInt8, 1).expect("create");
        master.channel.fail_join = true;
        assert!(matches!(
            master.update_array(&mut array, &[4], 1.0),
            Err(ArrayError::GroupFailure(_))
        ));
        assert!(master.is_failed());

        master.channel.fail_join = false;
        assert!(matches!(
            master.create_array(DType::UInt8, 1),
            Err(ArrayError::GroupFailure(_))
        ));
    }
}
