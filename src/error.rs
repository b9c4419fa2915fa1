//! Centralized error types and handling

use thiserror::Error;

/// Main application error type
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network namespace error: {0}")]
    Network(#[from] NetworkError),

    #[error("Route management error: {0}")]
    Route(#[from] RouteError),

    #[error("Netlink error: {0}")]
    Netlink(#[from] NetlinkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Network namespace errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to access network namespace: {0}")]
    NamespaceAccess(String),

    #[error("Operation inside network namespace {namespace} failed: {reason}")]
    OperationFailed { namespace: String, reason: String },
}

/// Raw failures reported by the kernel routing interface
#[derive(Debug, Error)]
pub enum NetlinkError {
    #[error("Failed to open netlink connection: {0}")]
    Connection(#[source] std::io::Error),

    #[error("Kernel rejected request (errno {errno}): {message}")]
    Kernel { errno: i32, message: String },

    #[error("Netlink request failed: {0}")]
    Request(String),

    #[error("Link not found: {0}")]
    LinkNotFound(String),
}

impl NetlinkError {
    /// Positive errno carried by a kernel rejection, if any
    pub fn errno(&self) -> Option<i32> {
        match self {
            NetlinkError::Kernel { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    /// The kernel refused the request because the object already exists
    pub fn is_exist(&self) -> bool {
        self.errno() == Some(libc::EEXIST)
    }

    #[cfg(test)]
    pub(crate) fn from_errno(errno: i32) -> Self {
        NetlinkError::Kernel {
            errno,
            message: std::io::Error::from_raw_os_error(errno).to_string(),
        }
    }
}

impl From<rtnetlink::Error> for NetlinkError {
    fn from(err: rtnetlink::Error) -> Self {
        let message = err.to_string();
        match err {
            rtnetlink::Error::NetlinkError(msg) => match msg.code {
                Some(code) => NetlinkError::Kernel {
                    errno: -code.get(),
                    message,
                },
                None => NetlinkError::Request(message),
            },
            _ => NetlinkError::Request(message),
        }
    }
}

/// Which side of a symmetric rule operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleOp {
    Add,
    Delete,
}

impl std::fmt::Display for RuleOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleOp::Add => f.write_str("add"),
            RuleOp::Delete => f.write_str("delete"),
        }
    }
}

/// Policy routing errors
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("Interface {name} not found: {source}")]
    InterfaceNotFound {
        name: String,
        #[source]
        source: NetlinkError,
    },

    #[error("Unsupported address family: {0}")]
    UnsupportedFamily(String),

    #[error("Failed to add route ({route}): {source}")]
    RouteAddFailed {
        route: String,
        #[source]
        source: NetlinkError,
    },

    #[error("Failed to delete route ({route}): {source}")]
    RouteDeleteFailed {
        route: String,
        #[source]
        source: NetlinkError,
    },

    #[error("Failed to {op} rule ({rule}): {source}")]
    RuleOperationFailed {
        op: RuleOp,
        rule: String,
        #[source]
        source: NetlinkError,
    },

    #[error("Kernel query failed: {0}")]
    Query(#[source] NetlinkError),

    #[error("Invalid route configuration: {0}")]
    InvalidRoute(String),

    #[error(transparent)]
    Namespace(#[from] NetworkError),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid configuration format: {0}")]
    InvalidFormat(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
