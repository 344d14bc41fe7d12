//! Caller-chosen relay paths
//!
//! A `RelayPath` is the ordered hop sequence a routed connection must
//! traverse. The caller supplies one per fetch; it is never mutated after
//! construction.

use std::fmt;

use thiserror::Error;

/// Error returned when a path is constructed with no hops.
#[derive(Debug, Error)]
#[error("relay path must contain at least one hop")]
pub struct EmptyPath;

/// An ordered, non-empty sequence of relay identifiers.
///
/// Hop order defines the circuit; equality is by hop contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayPath {
    hops: Vec<String>,
}

impl RelayPath {
    /// Build a path from relay identifiers (fingerprints or nicknames).
    pub fn new(hops: Vec<String>) -> Result<Self, EmptyPath> {
        if hops.is_empty() {
            return Err(EmptyPath);
        }
        Ok(Self { hops })
    }

    /// The hops in circuit order.
    pub fn hops(&self) -> &[String] {
        &self.hops
    }

    /// Number of hops.
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    /// Whether the path has no hops.
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

impl fmt::Display for RelayPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.hops.join(","))
    }
}
