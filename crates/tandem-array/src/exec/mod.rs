//! Directives and the master-to-worker execution channel.
//!
//! The master publishes the parameters of a directive in the control block,
//! then calls [`ExecutionChannel::launch`] so that every worker runs the
//! matching [`WorkerMirror`](crate::WorkerMirror) handler, and finally
//! [`ExecutionChannel::join`] to wait until all of them have finished.

mod directive;
mod pool;

pub use directive::{DataDirective, Directive, Domain};
pub use pool::{WorkerPool, WorkerVisit};

use crate::Result;

/// Broadcast of directives from the master to every worker.
///
/// Implementations must deliver each launched directive to every worker in
/// launch order. At most one directive is outstanding at a time: the master
/// always joins before touching the control block again.
pub trait ExecutionChannel: Send {
    /// Ask every worker to run `directive` against the current control
    /// block contents.
    fn launch(&mut self, directive: Directive) -> Result<()>;

    /// Block until every worker has finished the outstanding directive.
    ///
    /// Fails with [`ArrayError::GroupFailure`](crate::ArrayError::GroupFailure)
    /// if any worker failed or is gone.
    fn join(&mut self) -> Result<()>;
}

impl<C: ExecutionChannel + ?Sized> ExecutionChannel for Box<C> {
    fn launch(&mut self, directive: Directive) -> Result<()> {
        (**self).launch(directive)
    }

    fn join(&mut self) -> Result<()> {
        (**self).join()
    }
}
