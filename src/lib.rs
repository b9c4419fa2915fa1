//! Netns Policy Routing - per-interface policy routing for container namespaces
//!
//! This library inspects and rewrites the routing state of a Linux network
//! namespace so that traffic belonging to each interface of a multi-homed
//! container is steered through that interface's own routing table.

pub mod config;
pub mod network;
pub mod routing;
pub mod error;

pub use error::AppError;
