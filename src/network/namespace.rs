//! Network namespace switching

use netns_rs::NetNs;
use tracing::{debug, error};

use crate::error::NetworkError;
use crate::network::{NamespaceExecutor, NetworkNamespace};

/// Namespace executor backed by `setns(2)` on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct NetNsExecutor;

impl NetNsExecutor {
    pub fn new() -> Self {
        Self
    }
}

/// Puts the calling thread back into `original` when dropped, so a
/// panicking closure cannot leave it in the target namespace
struct RestoreGuard {
    original: Option<NetNs>,
}

impl RestoreGuard {
    fn restore(mut self) -> Result<(), NetworkError> {
        match self.original.take() {
            Some(ns) => ns
                .enter()
                .map_err(|e| NetworkError::NamespaceAccess(format!("restore: {}", e))),
            None => Ok(()),
        }
    }
}

impl Drop for RestoreGuard {
    fn drop(&mut self) {
        if let Some(ns) = self.original.take() {
            if let Err(e) = ns.enter() {
                error!(error = %e, "failed to restore original network namespace");
            }
        }
    }
}

impl NamespaceExecutor for NetNsExecutor {
    fn execute<F, R>(&self, namespace: &NetworkNamespace, func: F) -> Result<R, NetworkError>
    where
        F: FnOnce() -> Result<R, NetworkError>,
    {
        let ns = NetNs::get(&namespace.path).map_err(|e| {
            error!(namespace = %namespace, error = %e, "failed to open network namespace");
            NetworkError::NamespaceAccess(format!("{}: {}", namespace, e))
        })?;
        let original = netns_rs::get_from_current_thread()
            .map_err(|e| NetworkError::NamespaceAccess(format!("current namespace: {}", e)))?;

        debug!(namespace = %namespace, "entering network namespace");
        ns.enter()
            .map_err(|e| NetworkError::NamespaceAccess(format!("{}: {}", namespace, e)))?;
        let guard = RestoreGuard {
            original: Some(original),
        };

        let result = func();
        guard.restore()?;
        debug!(namespace = %namespace, "left network namespace");

        result
    }
}
