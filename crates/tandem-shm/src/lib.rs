//! Named shared-memory segments for master/worker array sharing.
//!
//! This crate is the allocation layer underneath `tandem-array`. It knows
//! nothing about directives or workers; it provides:
//!
//! - **Element types**: the closed [`DType`] set and the [`Element`] trait
//!   tying each one to its native Rust type, plus the explicit promotion
//!   lattice used for safe up-casting
//! - **Segments**: POSIX `shm_open` regions mapped with `memmap2`, named
//!   deterministically from a prefix, an array ID and a version tag
//! - **Typed views**: row-major multidimensional windows over a prefix of a
//!   segment
//! - **Control block**: the small fixed-layout shared record the master uses
//!   to publish allocation and shape decisions to workers
//!
//! # Ownership
//!
//! Only the process that created a segment unlinks its name, and only when
//! the segment is dropped. Attached segments merely unmap.
//!
//! # Example
//!
//! ```rust,ignore
//! use tandem_shm::{DType, allocate, segment_name};
//!
//! let name = segment_name("demo", 0, 1);
//! let mut seg = allocate(DType::Float32, 12, &name, true)?;
//! let mut view = seg.view_as_mut::<f32>(&[3, 4])?;
//! view.fill(1.0);
//! # Ok::<(), tandem_shm::ShmError>(())
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use thiserror::Error;

// Element type table and promotion lattice
pub mod dtype;

// Named OS segments
#[cfg(unix)]
pub mod segment;

// Typed multidimensional windows
pub mod view;

// Master -> worker control record
#[cfg(unix)]
pub mod control;

#[cfg(unix)]
pub use control::{ControlBlock, ControlRecord, MAX_NDIM};
pub use dtype::{DType, DTypeKind, Element, Scalar};
#[cfg(unix)]
pub use segment::{Segment, TypedSegment, allocate, control_name, segment_name};
pub use view::{ArrayView, ArrayViewMut, flat_offset, shape_size};

/// Result type for shared-memory operations.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Errors that can occur while allocating, attaching or viewing segments.
#[derive(Debug, Error)]
pub enum ShmError {
    /// Element type name outside the supported set.
    #[error("Unsupported element type: {0}")]
    UnsupportedType(String),

    /// The OS could not provide the segment.
    #[error("Shared memory allocation failed: {0}")]
    Allocation(String),

    /// A segment or control block does not have the expected layout.
    #[error("Invalid layout: {0}")]
    InvalidLayout(String),

    /// A view asked for more elements than the segment holds.
    #[error("View of {requested} elements exceeds capacity {capacity}")]
    ViewOutOfBounds {
        /// Elements the view would cover.
        requested: usize,
        /// Elements backing the segment.
        capacity: usize,
    },

    /// A typed view was requested with the wrong element type.
    #[error("Element type mismatch: segment holds {expected}, view requested {received}")]
    DTypeMismatch {
        /// Element type of the segment.
        expected: DType,
        /// Element type of the requested view.
        received: DType,
    },

    /// More dimensions than the control block can carry.
    #[error("Rank {ndim} exceeds the supported maximum of {max}")]
    RankTooLarge {
        /// Requested rank.
        ndim: usize,
        /// Largest supported rank.
        max: usize,
    },
}

/// Version information for the shared-memory layer.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
