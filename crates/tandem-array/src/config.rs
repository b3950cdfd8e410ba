//! Configuration for a master/worker group

use serde::{Deserialize, Serialize};

use crate::master::check_oversize;
use crate::{ArrayError, Result};

/// Longest accepted segment prefix; leaves room for the
/// `/{prefix}_data_{id}_{tag}` suffix within the POSIX name limit.
pub const MAX_PREFIX_LEN: usize = 200;

/// Configuration for a master/worker group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Namespace for every segment name the group creates
    pub segment_prefix: String,

    /// Number of workers in the reference worker pool
    pub workers: usize,

    /// Oversize factor used by [`Data::assign`](crate::Data::assign)
    pub default_oversize: f64,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            segment_prefix: format!("tandem{}", std::process::id()),
            workers: 2,
            default_oversize: 1.0,
        }
    }
}

impl GroupConfig {
    /// Create a new configuration with the specified segment prefix
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            segment_prefix: prefix.into(),
            ..Default::default()
        }
    }

    /// Set the segment prefix
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.segment_prefix = prefix.into();
        self
    }

    /// Set the number of workers
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the default oversize factor
    #[must_use]
    pub const fn with_default_oversize(mut self, oversize: f64) -> Self {
        self.default_oversize = oversize;
        self
    }

    /// Check the prefix is a valid name component and the oversize factor is
    /// within [1, 2].
    pub fn validate(&self) -> Result<()> {
        let prefix = &self.segment_prefix;
        if prefix.is_empty() || prefix.len() > MAX_PREFIX_LEN {
            return Err(ArrayError::InvalidParameter(format!(
                "segment prefix must be 1..={MAX_PREFIX_LEN} bytes, got {}",
                prefix.len()
            )));
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ArrayError::InvalidParameter(format!(
                "segment prefix {prefix:?} may only contain ASCII letters, digits, '_' and '-'"
            )));
        }
        check_oversize(self.default_oversize)
    }
}
