//! Directive codes broadcast from the master to its workers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Family a directive belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Shared array lifecycle.
    Data,
}

/// Array lifecycle directives.
///
/// Parameters travel through the control block, so the directive itself is
/// only a code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataDirective {
    /// Register a new array (`id`, `dtype`, `ndim`).
    Create,
    /// Attach to a new segment (`id`, `tag`, `alloc_size`, `shape`).
    Alloc,
    /// Re-window the current segment (`id`, `shape`).
    Reshape,
    /// Release the current segment (`id`).
    Free,
}

/// A message the master broadcasts to all workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "domain", content = "code", rename_all = "lowercase")]
pub enum Directive {
    /// Array lifecycle.
    Data(DataDirective),
}

impl Directive {
    /// Family of this directive.
    pub const fn domain(self) -> Domain {
        match self {
            Self::Data(_) => Domain::Data,
        }
    }
}

impl From<DataDirective> for Directive {
    fn from(directive: DataDirective) -> Self {
        Self::Data(directive)
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(code) => write!(f, "data/{}", format!("{code:?}").to_lowercase()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_and_display() {
        let directive = Directive::from(DataDirective::Reshape);
        assert_eq!(directive.domain(), Domain::Data);
        assert_eq!(directive.to_string(), "data/reshape");
    }

    #[test]
    fn test_serde_shape() {
        let json = serde_json::to_string(&Directive::Data(DataDirective::Alloc)).expect("ser");
        assert_eq!(json, r#"{"domain":"data","code":"alloc"}"#);
        let back: Directive = serde_json::from_str(&json).expect("de");
        assert_eq!(back, Directive::Data(DataDirective::Alloc));
    }
}
