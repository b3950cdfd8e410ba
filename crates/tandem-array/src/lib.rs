//! Growable arrays shared between one master and a group of workers.
//!
//! The master owns every shape and capacity decision. Each array lives in a
//! named shared-memory segment; workers attach to the same segment and
//! re-window their view whenever the master tells them to. The moving parts:
//!
//! - **Container**: identity, allocation state and the typed window over
//!   the current segment ([`container`])
//! - **Master Controller**: decides between a cheap reshape and a
//!   reallocation, publishes the decision and waits for every worker
//!   ([`master`])
//! - **Worker Mirror**: applies `Create`/`Alloc`/`Reshape`/`Free`
//!   directives read from the control block ([`worker`])
//! - **Execution channel**: `launch`/`join` message passing, with a thread
//!   pool reference implementation ([`exec`])
//! - **Handle**: the typed user-facing [`Data`] with input conditioning, and
//!   the cross-array [`check_compatibility`] validator
//!
//! # Example
//!
//! ```rust,ignore
//! use tandem_array::{Group, GroupConfig, HostArray};
//!
//! let group = Group::spawn(GroupConfig::default().with_workers(4))?;
//! let mut data = group.create_data::<f64>(2)?;
//! let input = HostArray::new(&[2, 3], vec![1i32, 2, 3, 4, 5, 6])?;
//! data.set_value(&input, false, 1.5)?;
//! assert_eq!(data.alloc_size(), 9);
//! # Ok::<(), tandem_array::ArrayError>(())
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use std::fmt;

use serde::{Deserialize, Serialize};
use tandem_shm::{DType, ShmError};
use thiserror::Error;

// Group configuration
pub mod config;

// Host-side input arrays and conversions
pub mod host;

// Base array container
pub mod container;

// Directives and the execution channel
pub mod exec;

// Master controller
pub mod master;

// Worker mirror
pub mod worker;

// User-facing handle
pub mod handle;

// Cross-array dtype/rank validation
pub mod validate;

pub use config::GroupConfig;
pub use container::{ArrayContainer, ArrayIdentity, ArrayState};
pub use exec::{DataDirective, Directive, Domain, ExecutionChannel, WorkerPool, WorkerVisit};
pub use handle::Data;
pub use host::{HostArray, HostData, HostElement};
pub use master::{Coordinator, Group, MAX_OVERSIZE, MIN_OVERSIZE};
pub use validate::{ArrayInfo, ArraySpec, check_compatibility};
pub use worker::WorkerMirror;

pub use tandem_shm::{ArrayView, ArrayViewMut};

/// Result type for array operations.
pub type Result<T> = std::result::Result<T, ArrayError>;

/// Identity of one logical array across the whole group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArrayId(pub u64);

impl fmt::Display for ArrayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Errors that can occur during array operations.
///
/// Every error is raised synchronously in the caller's context; nothing is
/// retried.
#[derive(Debug, Error)]
pub enum ArrayError {
    /// Element type outside the supported numeric set.
    #[error("Unsupported element type: {0}")]
    UnsupportedType(String),

    /// The OS could not provide a shared segment.
    #[error("Shared memory allocation failed: {0}")]
    Allocation(String),

    /// A parameter is out of its valid range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Dimensionality differs from the expected rank.
    #[error(
        "Wrong number of dimensions{}: received {received}, expected {expected}",
        at_position(.index)
    )]
    RankMismatch {
        /// Position in a checked list, when the rank came from one.
        index: Option<usize>,
        /// Expected rank.
        expected: usize,
        /// Rank actually seen.
        received: usize,
    },

    /// Input element type does not safely up-cast to the array's type.
    #[error(
        "Non up-castable element type: received {received}, expected {expected}; \
         use force_cast to convert anyway"
    )]
    IncompatibleType {
        /// Element type of the input.
        received: DType,
        /// Element type of the array.
        expected: DType,
    },

    /// Cross-array validation found the wrong element type.
    #[error("Incorrect element type at position {index}: expected {expected}, received {received}")]
    TypeMismatch {
        /// Position in the checked list.
        index: usize,
        /// Expected element type.
        expected: DType,
        /// Element type of the array at `index`.
        received: DType,
    },

    /// A window would not fit the allocated capacity.
    #[error("Shape of {requested} elements exceeds capacity {capacity}")]
    CapacityExceeded {
        /// Elements the shape covers.
        requested: usize,
        /// Elements backing the segment.
        capacity: usize,
    },

    /// A directive named an array this process never registered.
    #[error("Unknown array {0}")]
    UnknownArray(ArrayId),

    /// A worker failed or vanished; the group cannot continue.
    #[error("Worker group failure: {0}")]
    GroupFailure(String),

    /// Other shared-memory layer error.
    #[error("Shared memory error: {0}")]
    Shm(ShmError),
}

fn at_position(index: &Option<usize>) -> String {
    index.map_or_else(String::new, |i| format!(" at position {i}"))
}

impl From<ShmError> for ArrayError {
    fn from(err: ShmError) -> Self {
        match err {
            ShmError::UnsupportedType(name) => Self::UnsupportedType(name),
            ShmError::Allocation(msg) => Self::Allocation(msg),
            ShmError::ViewOutOfBounds {
                requested,
                capacity,
            } => Self::CapacityExceeded {
                requested,
                capacity,
            },
            other => Self::Shm(other),
        }
    }
}

/// Version information for the array layer.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
