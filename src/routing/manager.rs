//! Policy router facade over a kernel routing handle

use crate::error::RouteError;
use crate::routing::{Link, MigrationPolicy, RouteNetlink, DEFAULT_RULE_PRIORITY};
use tracing::error;

/// Rule, route and migration operations against one namespace
///
/// Every mutation acts on the namespace `kernel` was opened in. Callers
/// serialize mutations per namespace; nothing here locks.
pub struct PolicyRouter<K> {
    kernel: K,
    mark_rule_priority: u32,
    policy: MigrationPolicy,
}

impl<K: RouteNetlink> PolicyRouter<K> {
    pub fn new(kernel: K) -> Self {
        Self {
            kernel,
            mark_rule_priority: DEFAULT_RULE_PRIORITY,
            policy: MigrationPolicy::default(),
        }
    }

    /// Override the priority mark rules are installed with
    pub fn with_mark_rule_priority(mut self, priority: u32) -> Self {
        self.mark_rule_priority = priority;
        self
    }

    pub fn with_migration_policy(mut self, policy: MigrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn mark_rule_priority(&self) -> u32 {
        self.mark_rule_priority
    }

    pub fn migration_policy(&self) -> &MigrationPolicy {
        &self.policy
    }

    pub(crate) async fn resolve_link(&self, name: &str) -> Result<Link, RouteError> {
        self.kernel.link_by_name(name).await.map_err(|source| {
            error!(interface = name, error = %source, "failed to resolve interface");
            RouteError::InterfaceNotFound {
                name: name.to_string(),
                source,
            }
        })
    }
}
