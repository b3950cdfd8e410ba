//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;
use tandem_array::{
    ArrayError, Directive, ExecutionChannel, Group, GroupConfig, Result, WorkerPool,
};

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Segment prefix unique to this process and call, so tests can run in
/// parallel without colliding in /dev/shm.
pub fn unique_prefix(test: &str) -> String {
    format!(
        "t{test}{}x{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Route test logs through `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A group backed by real worker threads, or `None` when shared memory is
/// not available on this machine.
pub fn spawn_group(test: &str, workers: usize) -> Option<Group> {
    init_tracing();
    let config = GroupConfig::new(unique_prefix(test)).with_workers(workers);
    match Group::spawn(config) {
        Ok(group) => Some(group),
        Err(ArrayError::Allocation(e) | ArrayError::GroupFailure(e)) => {
            eprintln!("skipping shmem test (not available): {e}");
            None
        }
        Err(e) => panic!("unexpected error spawning group: {e}"),
    }
}

/// Channel with no workers that records every launched directive.
#[derive(Debug, Clone, Default)]
pub struct RecordingChannel {
    log: Arc<Mutex<Vec<Directive>>>,
}

impl RecordingChannel {
    /// Directives launched so far.
    pub fn launched(&self) -> Vec<Directive> {
        self.log.lock().clone()
    }

    /// Forget everything launched so far.
    pub fn clear(&self) {
        self.log.lock().clear();
    }
}

impl ExecutionChannel for RecordingChannel {
    fn launch(&mut self, directive: Directive) -> Result<()> {
        self.log.lock().push(directive);
        Ok(())
    }

    fn join(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A master with no workers, plus a handle on its launch log.
pub fn recording_group(test: &str) -> Option<(Group<RecordingChannel>, RecordingChannel)> {
    let channel = RecordingChannel::default();
    let config = GroupConfig::new(unique_prefix(test));
    match Group::with_channel(config, channel.clone()) {
        Ok(group) => Some((group, channel)),
        Err(e) => {
            eprintln!("skipping shmem test (not available): {e}");
            None
        }
    }
}

/// Every worker's state for `id` equals the master's.
pub fn assert_converged<T: tandem_array::HostElement>(
    group: &Group<WorkerPool>,
    data: &tandem_array::Data<T>,
) {
    let id = data.id();
    let states = group
        .channel(|pool| pool.snapshots(id))
        .expect("snapshots");
    let expected = data.state();
    for (rank, state) in states.iter().enumerate() {
        assert_eq!(state.as_ref(), Some(&expected), "worker {rank} diverged");
    }
}
