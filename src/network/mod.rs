//! Network namespace module
//!
//! Runs work with the calling thread switched into a container's network
//! namespace

use crate::error::NetworkError;
use std::fmt;

pub mod namespace;

pub use namespace::NetNsExecutor;

/// Network namespace reference
///
/// `path` is either a name under `/var/run/netns` or an absolute path such
/// as `/proc/<pid>/ns/net`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkNamespace {
    pub path: String,
}

impl NetworkNamespace {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Namespace of the calling thread
    pub fn current() -> Self {
        Self::new("/proc/thread-self/ns/net")
    }
}

impl fmt::Display for NetworkNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Runs a closure inside a network namespace
///
/// The calling thread's original namespace is restored on every exit path.
pub trait NamespaceExecutor {
    fn execute<F, R>(&self, namespace: &NetworkNamespace, func: F) -> Result<R, NetworkError>
    where
        F: FnOnce() -> Result<R, NetworkError>;
}
