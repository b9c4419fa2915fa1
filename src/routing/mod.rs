//! Policy routing management module
//!
//! Moves per-interface traffic into dedicated routing tables inside a
//! container network namespace. The kernel is reached through the
//! [`RouteNetlink`] capability so the managers can run against a fake.

use crate::error::{NetlinkError, RouteError};
use ipnetwork::IpNetwork;
use std::fmt;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

pub mod inspector;
pub mod locator;
pub mod manager;
pub mod migrate;
pub mod netlink;
pub mod rules;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use locator::DefaultInterfaceLocator;
pub use manager::PolicyRouter;
pub use migrate::MigrationPolicy;
pub use netlink::{RtNetlink, RtNetlinkConnector};

/// Identifier of the kernel's main routing table
pub const MAIN_TABLE: u32 = 254;

/// Priority given to mark rules unless the caller overrides it
pub const DEFAULT_RULE_PRIORITY: u32 = 1000;

/// Address family selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpFamily {
    All,
    V4,
    V6,
}

impl IpFamily {
    pub const FAMILY_ALL: i32 = 0;
    pub const FAMILY_V4: i32 = libc::AF_INET;
    pub const FAMILY_V6: i32 = libc::AF_INET6;

    /// Family of a concrete address
    pub fn of(ip: &IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }

    /// Whether `other` falls under this selector
    #[cfg(test)]
    pub(crate) fn covers(&self, other: IpFamily) -> bool {
        *self == IpFamily::All || *self == other
    }

    /// Concrete families this selector expands to
    pub fn concrete(&self) -> &'static [IpFamily] {
        match self {
            IpFamily::All => &[IpFamily::V4, IpFamily::V6],
            IpFamily::V4 => &[IpFamily::V4],
            IpFamily::V6 => &[IpFamily::V6],
        }
    }
}

impl TryFrom<i32> for IpFamily {
    type Error = RouteError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            IpFamily::FAMILY_ALL => Ok(IpFamily::All),
            IpFamily::FAMILY_V4 => Ok(IpFamily::V4),
            IpFamily::FAMILY_V6 => Ok(IpFamily::V6),
            other => Err(RouteError::UnsupportedFamily(other.to_string())),
        }
    }
}

impl FromStr for IpFamily {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "both" | "any" => Ok(IpFamily::All),
            "4" | "v4" | "ipv4" | "inet" => Ok(IpFamily::V4),
            "6" | "v6" | "ipv6" | "inet6" => Ok(IpFamily::V6),
            _ => Err(RouteError::UnsupportedFamily(s.to_string())),
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::All => f.write_str("all"),
            IpFamily::V4 => f.write_str("inet"),
            IpFamily::V6 => f.write_str("inet6"),
        }
    }
}

/// Route scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Universe,
    Site,
    Link,
    Host,
    Nowhere,
}

impl FromStr for Scope {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "global" | "universe" => Ok(Scope::Universe),
            "site" => Ok(Scope::Site),
            "link" => Ok(Scope::Link),
            "host" => Ok(Scope::Host),
            "nowhere" => Ok(Scope::Nowhere),
            _ => Err(RouteError::InvalidRoute(format!("unknown scope '{}'", s))),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Universe => f.write_str("global"),
            Scope::Site => f.write_str("site"),
            Scope::Link => f.write_str("link"),
            Scope::Host => f.write_str("host"),
            Scope::Nowhere => f.write_str("nowhere"),
        }
    }
}

/// A kernel network link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub index: u32,
    pub name: String,
}

/// One segment of a multipath route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nexthop {
    pub link_index: u32,
    pub gateway: Option<IpAddr>,
}

/// A kernel forwarding entry
///
/// A route with multipath segments has no top-level `link_index`; which
/// interface it belongs to has to be answered per segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub link_index: Option<u32>,
    pub family: IpFamily,
    /// `None` is the default destination
    pub destination: Option<IpNetwork>,
    pub gateway: Option<IpAddr>,
    pub preferred_source: Option<IpAddr>,
    pub table: u32,
    pub scope: Scope,
    /// Raw `rtm_protocol`, 0 when unspecified
    pub protocol: u8,
    pub metric: Option<u32>,
    pub mtu: Option<u32>,
    pub multipath: Vec<Nexthop>,
}

impl Route {
    /// Empty route in the main table
    pub fn new(family: IpFamily) -> Self {
        Self {
            link_index: None,
            family,
            destination: None,
            gateway: None,
            preferred_source: None,
            table: MAIN_TABLE,
            scope: Scope::Universe,
            protocol: 0,
            metric: None,
            mtu: None,
            multipath: Vec::new(),
        }
    }

    /// Covers "anywhere": no destination, or the all-zeros IPv4 address
    pub fn is_default(&self) -> bool {
        match self.destination {
            None => true,
            Some(dst) => dst.ip() == IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        }
    }

    pub fn is_multipath(&self) -> bool {
        !self.multipath.is_empty()
    }

    /// First multipath segment leaving through `link_index`
    pub fn nexthop_via(&self, link_index: u32) -> Option<&Nexthop> {
        self.multipath.iter().find(|nh| nh.link_index == link_index)
    }

    /// Concrete family the route is submitted with
    pub fn address_family(&self) -> IpFamily {
        match self.family {
            IpFamily::All => self
                .destination
                .map(|dst| IpFamily::of(&dst.ip()))
                .or_else(|| self.gateway.as_ref().map(IpFamily::of))
                .or_else(|| {
                    self.multipath
                        .iter()
                        .find_map(|nh| nh.gateway.as_ref().map(IpFamily::of))
                })
                .unwrap_or(IpFamily::V4),
            family => family,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.destination {
            Some(dst) => write!(f, "{}", dst)?,
            None => f.write_str("default")?,
        }
        if let Some(gw) = self.gateway {
            write!(f, " via {}", gw)?;
        }
        if let Some(index) = self.link_index {
            write!(f, " dev #{}", index)?;
        }
        write!(f, " table {} scope {}", self.table, self.scope)?;
        if let Some(src) = self.preferred_source {
            write!(f, " src {}", src)?;
        }
        if let Some(metric) = self.metric {
            write!(f, " metric {}", metric)?;
        }
        if let Some(mtu) = self.mtu {
            write!(f, " mtu {}", mtu)?;
        }
        for nh in &self.multipath {
            f.write_str(" nexthop")?;
            if let Some(gw) = nh.gateway {
                write!(f, " via {}", gw)?;
            }
            write!(f, " dev #{}", nh.link_index)?;
        }
        Ok(())
    }
}

/// What a policy rule matches on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSelector {
    Destination(IpNetwork),
    Source(IpNetwork),
    Mark(u32),
}

/// A policy routing lookup entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub family: IpFamily,
    pub selector: RuleSelector,
    pub table: u32,
    /// `None` leaves ordering to the kernel
    pub priority: Option<u32>,
}

impl Rule {
    /// `ip rule add to <dst> lookup <table>`
    pub fn destination(dst: IpNetwork, table: u32) -> Self {
        Self {
            family: IpFamily::of(&dst.ip()),
            selector: RuleSelector::Destination(dst),
            table,
            priority: None,
        }
    }

    /// `ip rule add from <src> lookup <table>`
    pub fn source(src: IpNetwork, table: u32) -> Self {
        Self {
            family: IpFamily::of(&src.ip()),
            selector: RuleSelector::Source(src),
            table,
            priority: None,
        }
    }

    /// `ip rule add fwmark <mark> lookup <table> pref <priority>`
    pub fn mark(mark: u32, table: u32, family: IpFamily, priority: u32) -> Self {
        Self {
            family,
            selector: RuleSelector::Mark(mark),
            table,
            priority: Some(priority),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.family)?;
        if let Some(priority) = self.priority {
            write!(f, "pref {} ", priority)?;
        }
        match self.selector {
            RuleSelector::Destination(dst) => write!(f, "to {}", dst)?,
            RuleSelector::Source(src) => write!(f, "from {}", src)?,
            RuleSelector::Mark(mark) => write!(f, "fwmark {:#x}", mark)?,
        }
        write!(f, " lookup {}", self.table)
    }
}

/// Widen a single address into a host network (/32 or /128)
pub fn host_network(ip: IpAddr) -> IpNetwork {
    match ip {
        IpAddr::V4(v4) => IpNetwork::V4(v4.into()),
        IpAddr::V6(v6) => IpNetwork::V6(v6.into()),
    }
}

/// Parse a CIDR, accepting a bare address as a host network
pub fn parse_network(s: &str) -> Result<IpNetwork, RouteError> {
    let s = s.trim();
    if s.contains('/') {
        s.parse::<IpNetwork>()
            .map_err(|e| RouteError::InvalidRoute(format!("invalid network '{}': {}", s, e)))
    } else {
        s.parse::<IpAddr>()
            .map(host_network)
            .map_err(|e| RouteError::InvalidRoute(format!("invalid address '{}': {}", s, e)))
    }
}

/// Kernel routing interface of the namespace the handle was opened in
pub trait RouteNetlink: Send + Sync {
    fn link_by_name(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Link, NetlinkError>> + Send;

    fn link_by_index(
        &self,
        index: u32,
    ) -> impl Future<Output = Result<Link, NetlinkError>> + Send;

    /// Routes of every table, optionally restricted to routes whose
    /// top-level link is `link`
    fn route_list(
        &self,
        link: Option<&Link>,
        family: IpFamily,
    ) -> impl Future<Output = Result<Vec<Route>, NetlinkError>> + Send;

    fn route_add(&self, route: &Route) -> impl Future<Output = Result<(), NetlinkError>> + Send;

    fn route_del(&self, route: &Route) -> impl Future<Output = Result<(), NetlinkError>> + Send;

    fn rule_list(
        &self,
        family: IpFamily,
    ) -> impl Future<Output = Result<Vec<Rule>, NetlinkError>> + Send;

    fn rule_add(&self, rule: &Rule) -> impl Future<Output = Result<(), NetlinkError>> + Send;

    fn rule_del(&self, rule: &Rule) -> impl Future<Output = Result<(), NetlinkError>> + Send;
}

/// Opens a [`RouteNetlink`] handle bound to the calling thread's namespace
pub trait NetlinkConnector {
    type Handle: RouteNetlink;

    fn connect(&self) -> Result<Self::Handle, NetlinkError>;
}
