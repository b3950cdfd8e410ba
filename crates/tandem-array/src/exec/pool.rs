//! In-process worker pool.
//!
//! Each worker is a thread owning one [`WorkerMirror`]. The pool fans every
//! launched directive out over per-worker channels and counts completions on
//! a shared reply channel; `join` returns once every worker has reported.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{Directive, ExecutionChannel};
use crate::container::ArrayState;
use crate::worker::WorkerMirror;
use crate::{ArrayError, ArrayId, GroupConfig, Result};

/// Closure run on every worker by [`WorkerPool::visit`].
pub type WorkerVisit = Arc<dyn Fn(usize, &mut WorkerMirror) -> Result<()> + Send + Sync>;

enum WorkerMessage {
    Directive(Directive),
    Visit(WorkerVisit),
    Shutdown,
}

struct Completion {
    rank: usize,
    outcome: std::result::Result<(), String>,
}

/// Reference [`ExecutionChannel`]: one thread per worker.
pub struct WorkerPool {
    senders: Vec<Sender<WorkerMessage>>,
    completions: Receiver<Completion>,
    handles: Vec<JoinHandle<()>>,
    pending: usize,
}

impl WorkerPool {
    /// Attach one mirror per worker to the group's control block and start
    /// the worker threads.
    ///
    /// The control block must already exist.
    pub fn spawn(config: &GroupConfig) -> Result<Self> {
        let (done_tx, done_rx) = crossbeam_channel::unbounded();
        let mut senders = Vec::with_capacity(config.workers);
        let mut handles = Vec::with_capacity(config.workers);

        for rank in 0..config.workers {
            let mirror = WorkerMirror::attach(rank, &config.segment_prefix)?;
            let (tx, rx) = crossbeam_channel::unbounded();
            let done = done_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("tandem-worker-{rank}"))
                .spawn(move || worker_loop(mirror, &rx, &done))
                .map_err(|e| {
                    ArrayError::GroupFailure(format!("failed to spawn worker {rank}: {e}"))
                })?;
            senders.push(tx);
            handles.push(handle);
        }

        info!(
            "Started {} workers on {}",
            config.workers, config.segment_prefix
        );
        Ok(Self {
            senders,
            completions: done_rx,
            handles,
            pending: 0,
        })
    }

    /// Number of workers.
    pub fn workers(&self) -> usize {
        self.senders.len()
    }

    /// Run `f` on every worker's mirror and wait for all of them.
    ///
    /// Panics inside `f` are caught and reported as a group failure.
    pub fn visit<F>(&mut self, f: F) -> Result<()>
    where
        F: Fn(usize, &mut WorkerMirror) -> Result<()> + Send + Sync + 'static,
    {
        let visit: WorkerVisit = Arc::new(f);
        self.broadcast(|| WorkerMessage::Visit(Arc::clone(&visit)))?;
        self.join()
    }

    /// Each worker's view of array `id`, indexed by rank. `None` means the
    /// worker has not registered the array.
    pub fn snapshots(&mut self, id: ArrayId) -> Result<Vec<Option<ArrayState>>> {
        let states = Arc::new(Mutex::new(vec![None; self.workers()]));
        let sink = Arc::clone(&states);
        self.visit(move |rank, mirror| {
            sink.lock()[rank] = mirror.array(id).map(crate::ArrayContainer::state);
            Ok(())
        })?;
        let collected = std::mem::take(&mut *states.lock());
        Ok(collected)
    }

    /// Stop every worker thread. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.senders.is_empty() && self.handles.is_empty() {
            return;
        }
        for tx in self.senders.drain(..) {
            let _ = tx.send(WorkerMessage::Shutdown);
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("Worker thread panicked during shutdown");
            }
        }
        self.pending = 0;
        debug!("Worker pool shut down");
    }

    fn broadcast(&mut self, mut message: impl FnMut() -> WorkerMessage) -> Result<()> {
        if self.pending > 0 {
            return Err(ArrayError::GroupFailure(format!(
                "{} completions outstanding from the previous directive",
                self.pending
            )));
        }
        for (rank, tx) in self.senders.iter().enumerate() {
            if tx.send(message()).is_err() {
                return Err(ArrayError::GroupFailure(format!("worker {rank} is gone")));
            }
            self.pending += 1;
        }
        Ok(())
    }
}

impl ExecutionChannel for WorkerPool {
    fn launch(&mut self, directive: Directive) -> Result<()> {
        debug!("Launching {directive} on {} workers", self.workers());
        self.broadcast(|| WorkerMessage::Directive(directive))
    }

    fn join(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        while self.pending > 0 {
            let Ok(completion) = self.completions.recv() else {
                self.pending = 0;
                return Err(ArrayError::GroupFailure(
                    "workers exited before reporting".to_string(),
                ));
            };
            self.pending -= 1;
            if let Err(reason) = completion.outcome {
                failures.push(format!("worker {}: {reason}", completion.rank));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ArrayError::GroupFailure(failures.join("; ")))
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.senders.len())
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

fn worker_loop(mut mirror: WorkerMirror, rx: &Receiver<WorkerMessage>, done: &Sender<Completion>) {
    let rank = mirror.rank();
    while let Ok(message) = rx.recv() {
        let outcome = match message {
            WorkerMessage::Directive(directive) => guarded(|| mirror.apply(directive)),
            WorkerMessage::Visit(visit) => guarded(|| visit(rank, &mut mirror)),
            WorkerMessage::Shutdown => break,
        };
        if let Err(reason) = &outcome {
            warn!("Worker {rank} failed: {reason}");
        }
        if done.send(Completion { rank, outcome }).is_err() {
            break;
        }
    }
    debug!("Worker {rank} exiting");
}

fn guarded(f: impl FnOnce() -> Result<()>) -> std::result::Result<(), String> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(payload) => Err(payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panicked".to_string())),
    }
}
