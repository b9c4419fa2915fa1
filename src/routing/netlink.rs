//! Kernel routing interface using rtnetlink

use futures_util::TryStreamExt;
use ipnetwork::IpNetwork;
use rtnetlink::packet_route::link::{LinkAttribute, LinkMessage};
use rtnetlink::packet_route::route::{
    RouteAddress, RouteAttribute, RouteMessage, RouteMetric, RouteNextHop, RouteProtocol,
    RouteScope, RouteType,
};
use rtnetlink::packet_route::rule::{RuleAction, RuleAttribute, RuleMessage};
use rtnetlink::packet_route::AddressFamily;
use rtnetlink::{new_connection, Handle, IpVersion};
use std::net::IpAddr;
use tracing::debug;

use crate::error::{NetlinkError, NetworkError};
use crate::network::{NamespaceExecutor, NetworkNamespace};
use crate::routing::{
    IpFamily, Link, NetlinkConnector, Nexthop, Route, RouteNetlink, Rule, RuleSelector, Scope,
};

/// Header table value when the real id lives in the table attribute
const TABLE_UNSPEC: u8 = 0;

/// rtnetlink handle bound to the namespace it was opened in
#[derive(Clone)]
pub struct RtNetlink {
    handle: Handle,
}

impl RtNetlink {
    /// Open a connection in the calling thread's namespace
    ///
    /// Must be called from within a Tokio runtime; the connection task is
    /// spawned onto it.
    pub fn connect() -> Result<Self, NetlinkError> {
        let (connection, handle, _) = new_connection().map_err(NetlinkError::Connection)?;
        tokio::spawn(connection);
        Ok(Self { handle })
    }

    /// Open a connection inside `namespace`
    ///
    /// The socket stays bound to `namespace` after the thread switches back,
    /// so the handle can be used from any task.
    pub fn connect_in<E: NamespaceExecutor>(
        executor: &E,
        namespace: &NetworkNamespace,
    ) -> Result<Self, NetworkError> {
        executor.execute(namespace, || {
            Self::connect().map_err(|e| NetworkError::OperationFailed {
                namespace: namespace.to_string(),
                reason: e.to_string(),
            })
        })
    }
}

/// Connector opening [`RtNetlink`] handles
#[derive(Debug, Clone, Copy, Default)]
pub struct RtNetlinkConnector;

impl NetlinkConnector for RtNetlinkConnector {
    type Handle = RtNetlink;

    fn connect(&self) -> Result<RtNetlink, NetlinkError> {
        RtNetlink::connect()
    }
}

impl RouteNetlink for RtNetlink {
    async fn link_by_name(&self, name: &str) -> Result<Link, NetlinkError> {
        let mut links = self
            .handle
            .link()
            .get()
            .match_name(name.to_string())
            .execute();
        match links.try_next().await {
            Ok(Some(msg)) => Ok(link_from_message(&msg)),
            Ok(None) => Err(NetlinkError::LinkNotFound(name.to_string())),
            Err(e) => Err(not_found_or(e, name.to_string())),
        }
    }

    async fn link_by_index(&self, index: u32) -> Result<Link, NetlinkError> {
        let mut links = self.handle.link().get().match_index(index).execute();
        match links.try_next().await {
            Ok(Some(msg)) => Ok(link_from_message(&msg)),
            Ok(None) => Err(NetlinkError::LinkNotFound(format!("#{}", index))),
            Err(e) => Err(not_found_or(e, format!("#{}", index))),
        }
    }

    async fn route_list(
        &self,
        link: Option<&Link>,
        family: IpFamily,
    ) -> Result<Vec<Route>, NetlinkError> {
        let mut routes = Vec::new();
        for family in family.concrete() {
            let mut request = RouteMessage::default();
            request.header.address_family = address_family(*family);

            let mut stream = self.handle.route().get(request).execute();
            while let Some(msg) = stream.try_next().await? {
                let route = route_from_message(&msg);
                if link.is_some_and(|l| route.link_index != Some(l.index)) {
                    continue;
                }
                routes.push(route);
            }
        }
        debug!(count = routes.len(), %family, "listed routes");
        Ok(routes)
    }

    async fn route_add(&self, route: &Route) -> Result<(), NetlinkError> {
        self.handle
            .route()
            .add(route_message(route))
            .execute()
            .await
            .map_err(NetlinkError::from)
    }

    async fn route_del(&self, route: &Route) -> Result<(), NetlinkError> {
        self.handle
            .route()
            .del(route_del_message(route))
            .execute()
            .await
            .map_err(NetlinkError::from)
    }

    /// Rules without a destination, source or mark selector (such as the
    /// built-in `from all lookup main`) are not reported
    async fn rule_list(&self, family: IpFamily) -> Result<Vec<Rule>, NetlinkError> {
        let mut rules = Vec::new();
        for family in family.concrete() {
            let version = match family {
                IpFamily::V6 => IpVersion::V6,
                _ => IpVersion::V4,
            };
            let mut stream = self.handle.rule().get(version).execute();
            while let Some(msg) = stream.try_next().await? {
                if let Some(rule) = rule_from_message(&msg) {
                    rules.push(rule);
                }
            }
        }
        Ok(rules)
    }

    async fn rule_add(&self, rule: &Rule) -> Result<(), NetlinkError> {
        let mut request = self.handle.rule().add();
        *request.message_mut() = rule_message(rule);
        request.execute().await.map_err(NetlinkError::from)
    }

    async fn rule_del(&self, rule: &Rule) -> Result<(), NetlinkError> {
        self.handle
            .rule()
            .del(rule_message(rule))
            .execute()
            .await
            .map_err(NetlinkError::from)
    }
}

fn not_found_or(err: rtnetlink::Error, name: String) -> NetlinkError {
    let err = NetlinkError::from(err);
    if err.errno() == Some(libc::ENODEV) {
        NetlinkError::LinkNotFound(name)
    } else {
        err
    }
}

fn link_from_message(msg: &LinkMessage) -> Link {
    let name = msg
        .attributes
        .iter()
        .find_map(|attr| match attr {
            LinkAttribute::IfName(name) => Some(name.clone()),
            _ => None,
        })
        .unwrap_or_default();
    Link {
        index: msg.header.index,
        name,
    }
}

fn address_family(family: IpFamily) -> AddressFamily {
    match family {
        IpFamily::V4 => AddressFamily::Inet,
        IpFamily::V6 => AddressFamily::Inet6,
        IpFamily::All => AddressFamily::Unspec,
    }
}

fn family_of(family: AddressFamily) -> IpFamily {
    match family {
        AddressFamily::Inet => IpFamily::V4,
        AddressFamily::Inet6 => IpFamily::V6,
        _ => IpFamily::All,
    }
}

fn ip_of(addr: &RouteAddress) -> Option<IpAddr> {
    match addr {
        RouteAddress::Inet(v4) => Some(IpAddr::V4(*v4)),
        RouteAddress::Inet6(v6) => Some(IpAddr::V6(*v6)),
        _ => None,
    }
}

fn route_address(ip: IpAddr) -> RouteAddress {
    match ip {
        IpAddr::V4(v4) => RouteAddress::Inet(v4),
        IpAddr::V6(v6) => RouteAddress::Inet6(v6),
    }
}

fn scope_of(scope: RouteScope) -> Scope {
    match scope {
        RouteScope::Site => Scope::Site,
        RouteScope::Link => Scope::Link,
        RouteScope::Host => Scope::Host,
        RouteScope::NoWhere => Scope::Nowhere,
        _ => Scope::Universe,
    }
}

fn route_scope(scope: Scope) -> RouteScope {
    match scope {
        Scope::Universe => RouteScope::Universe,
        Scope::Site => RouteScope::Site,
        Scope::Link => RouteScope::Link,
        Scope::Host => RouteScope::Host,
        Scope::Nowhere => RouteScope::NoWhere,
    }
}

fn gateway_of(attributes: &[RouteAttribute]) -> Option<IpAddr> {
    attributes.iter().find_map(|attr| match attr {
        RouteAttribute::Gateway(addr) => ip_of(addr),
        _ => None,
    })
}

pub(crate) fn route_from_message(msg: &RouteMessage) -> Route {
    let mut route = Route::new(family_of(msg.header.address_family));
    route.table = u32::from(msg.header.table);
    route.scope = scope_of(msg.header.scope);
    route.protocol = msg.header.protocol.into();

    for attr in &msg.attributes {
        match attr {
            RouteAttribute::Destination(addr) => {
                route.destination = ip_of(addr)
                    .and_then(|ip| IpNetwork::new(ip, msg.header.destination_prefix_length).ok());
            }
            RouteAttribute::Gateway(addr) => route.gateway = ip_of(addr),
            RouteAttribute::PrefSource(addr) => route.preferred_source = ip_of(addr),
            RouteAttribute::Oif(index) => route.link_index = Some(*index),
            RouteAttribute::Table(table) => route.table = *table,
            RouteAttribute::Priority(metric) => route.metric = Some(*metric),
            RouteAttribute::Metrics(metrics) => {
                route.mtu = metrics.iter().find_map(|m| match m {
                    RouteMetric::Mtu(mtu) => Some(*mtu),
                    _ => None,
                });
            }
            RouteAttribute::MultiPath(hops) => {
                route.multipath = hops
                    .iter()
                    .map(|hop| Nexthop {
                        link_index: hop.interface_index,
                        gateway: gateway_of(&hop.attributes),
                    })
                    .collect();
            }
            _ => {}
        }
    }
    route
}

pub(crate) fn route_message(route: &Route) -> RouteMessage {
    let mut msg = RouteMessage::default();
    msg.header.address_family = address_family(route.address_family());
    msg.header.scope = route_scope(route.scope);
    msg.header.kind = RouteType::Unicast;
    msg.header.protocol = match route.protocol {
        0 => RouteProtocol::Boot,
        proto => RouteProtocol::from(proto),
    };
    msg.header.table = u8::try_from(route.table).unwrap_or(TABLE_UNSPEC);
    msg.attributes.push(RouteAttribute::Table(route.table));

    if let Some(dst) = route.destination {
        msg.header.destination_prefix_length = dst.prefix();
        msg.attributes
            .push(RouteAttribute::Destination(route_address(dst.ip())));
    }
    if let Some(gw) = route.gateway {
        msg.attributes.push(RouteAttribute::Gateway(route_address(gw)));
    }
    if let Some(index) = route.link_index {
        msg.attributes.push(RouteAttribute::Oif(index));
    }
    if let Some(src) = route.preferred_source {
        msg.attributes
            .push(RouteAttribute::PrefSource(route_address(src)));
    }
    if let Some(metric) = route.metric {
        msg.attributes.push(RouteAttribute::Priority(metric));
    }
    if let Some(mtu) = route.mtu {
        msg.attributes
            .push(RouteAttribute::Metrics(vec![RouteMetric::Mtu(mtu)]));
    }
    if route.is_multipath() {
        let hops = route
            .multipath
            .iter()
            .map(|nh| {
                let mut hop = RouteNextHop::default();
                hop.interface_index = nh.link_index;
                if let Some(gw) = nh.gateway {
                    hop.attributes
                        .push(RouteAttribute::Gateway(route_address(gw)));
                }
                hop
            })
            .collect();
        msg.attributes.push(RouteAttribute::MultiPath(hops));
    }
    msg
}

/// Delete request for `route`; the kernel matches any scope, protocol
/// and type
pub(crate) fn route_del_message(route: &Route) -> RouteMessage {
    let mut msg = route_message(route);
    msg.header.scope = RouteScope::NoWhere;
    msg.header.protocol = RouteProtocol::Unspec;
    msg.header.kind = RouteType::Unspec;
    msg
}

pub(crate) fn rule_message(rule: &Rule) -> RuleMessage {
    let mut msg = RuleMessage::default();
    msg.header.family = address_family(rule.family);
    msg.header.action = RuleAction::ToTable;
    msg.header.table = u8::try_from(rule.table).unwrap_or(TABLE_UNSPEC);
    msg.attributes.push(RuleAttribute::Table(rule.table));

    if let Some(priority) = rule.priority {
        msg.attributes.push(RuleAttribute::Priority(priority));
    }
    match rule.selector {
        RuleSelector::Destination(dst) => {
            msg.header.dst_len = dst.prefix();
            msg.attributes.push(RuleAttribute::Destination(dst.ip()));
        }
        RuleSelector::Source(src) => {
            msg.header.src_len = src.prefix();
            msg.attributes.push(RuleAttribute::Source(src.ip()));
        }
        RuleSelector::Mark(mark) => msg.attributes.push(RuleAttribute::FwMark(mark)),
    }
    msg
}

pub(crate) fn rule_from_message(msg: &RuleMessage) -> Option<Rule> {
    let mut table = u32::from(msg.header.table);
    let mut priority = None;
    let mut selector = None;

    for attr in &msg.attributes {
        match attr {
            RuleAttribute::Table(t) => table = *t,
            RuleAttribute::Priority(p) => priority = Some(*p),
            RuleAttribute::Destination(ip) => {
                selector = IpNetwork::new(*ip, msg.header.dst_len)
                    .ok()
                    .map(RuleSelector::Destination);
            }
            RuleAttribute::Source(ip) => {
                selector = IpNetwork::new(*ip, msg.header.src_len)
                    .ok()
                    .map(RuleSelector::Source);
            }
            RuleAttribute::FwMark(mark) => selector = Some(RuleSelector::Mark(*mark)),
            _ => {}
        }
    }

    Some(Rule {
        family: family_of(msg.header.family),
        selector: selector?,
        table,
        priority,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::MAIN_TABLE;
    use std::net::Ipv6Addr;

    #[test]
    fn test_multipath_message_to_route() {
        let gw: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let mut msg = RouteMessage::default();
        msg.header.address_family = AddressFamily::Inet6;
        msg.header.table = 254;
        msg.attributes.push(RouteAttribute::Table(MAIN_TABLE));
        msg.attributes
            .push(RouteAttribute::Metrics(vec![RouteMetric::Mtu(1450)]));
        let mut hop = RouteNextHop::default();
        hop.interface_index = 3;
        hop.attributes
            .push(RouteAttribute::Gateway(RouteAddress::Inet6(gw)));
        msg.attributes.push(RouteAttribute::MultiPath(vec![hop]));

        let route = route_from_message(&msg);
        assert_eq!(route.family, IpFamily::V6);
        assert!(route.is_default());
        assert_eq!(route.link_index, None);
        assert_eq!(route.mtu, Some(1450));
        assert_eq!(
            route.nexthop_via(3).and_then(|nh| nh.gateway),
            Some(IpAddr::V6(gw))
        );
    }

    #[test]
    fn test_large_table_uses_attribute() {
        let mut route = Route::new(IpFamily::V4);
        route.table = 1000;
        route.link_index = Some(3);
        route.destination = Some("10.96.0.0/12".parse().unwrap());

        let msg = route_message(&route);
        assert_eq!(msg.header.table, TABLE_UNSPEC);
        assert_eq!(msg.header.destination_prefix_length, 12);
        assert!(msg.attributes.contains(&RouteAttribute::Table(1000)));

        let parsed = route_from_message(&msg);
        assert_eq!(parsed.table, 1000);
        assert_eq!(parsed.destination, route.destination);
        assert_eq!(parsed.link_index, Some(3));
    }

    #[test]
    fn test_mark_rule_message() {
        let rule = Rule::mark(100, 100, IpFamily::V4, 1000);
        let msg = rule_message(&rule);

        assert_eq!(msg.header.family, AddressFamily::Inet);
        assert_eq!(msg.header.action, RuleAction::ToTable);
        assert!(msg.attributes.contains(&RuleAttribute::FwMark(100)));
        assert!(msg.attributes.contains(&RuleAttribute::Priority(1000)));
        assert_eq!(rule_from_message(&msg), Some(rule));
    }

    #[test]
    fn test_destination_rule_message() {
        let rule = Rule::destination("10.96.0.0/12".parse().unwrap(), 100);
        let msg = rule_message(&rule);

        assert_eq!(msg.header.family, AddressFamily::Inet);
        assert_eq!(msg.header.dst_len, 12);
        assert_eq!(msg.header.src_len, 0);
        assert_eq!(msg.header.table, 100);
        assert!(msg
            .attributes
            .contains(&RuleAttribute::Destination("10.96.0.0".parse().unwrap())));
        assert!(!msg.attributes.iter().any(|attr| matches!(
            attr,
            RuleAttribute::Priority(_) | RuleAttribute::Source(_)
        )));
        assert_eq!(rule_from_message(&msg), Some(rule));
    }

    #[test]
    fn test_source_rule_message() {
        let rule = Rule::source("fd00:10::5/128".parse().unwrap(), 1000);
        let msg = rule_message(&rule);

        assert_eq!(msg.header.family, AddressFamily::Inet6);
        assert_eq!(msg.header.src_len, 128);
        assert_eq!(msg.header.dst_len, 0);
        assert_eq!(msg.header.table, TABLE_UNSPEC);
        assert!(msg.attributes.contains(&RuleAttribute::Table(1000)));
        assert!(msg
            .attributes
            .contains(&RuleAttribute::Source("fd00:10::5".parse().unwrap())));
        assert!(!msg
            .attributes
            .iter()
            .any(|attr| matches!(attr, RuleAttribute::Priority(_))));
        assert_eq!(rule_from_message(&msg), Some(rule));
    }

    #[test]
    fn test_route_del_message_matches_any_scope() {
        let mut route = Route::new(IpFamily::V4);
        route.table = 1000;
        route.link_index = Some(3);
        route.scope = Scope::Link;
        route.protocol = 3;
        route.destination = Some("10.1.1.0/24".parse().unwrap());
        route.gateway = Some("10.1.1.1".parse().unwrap());

        let msg = route_del_message(&route);
        assert_eq!(msg.header.scope, RouteScope::NoWhere);
        assert_eq!(msg.header.protocol, RouteProtocol::Unspec);
        assert_eq!(msg.header.kind, RouteType::Unspec);
        assert_eq!(msg.header.table, TABLE_UNSPEC);
        assert_eq!(msg.header.destination_prefix_length, 24);
        assert!(msg.attributes.contains(&RouteAttribute::Table(1000)));
        assert!(msg.attributes.contains(&RouteAttribute::Oif(3)));

        // the add message for the same route keeps its own header
        let add = route_message(&route);
        assert_eq!(add.header.scope, RouteScope::Link);
        assert_eq!(add.header.kind, RouteType::Unicast);
    }

    #[test]
    fn test_selectorless_rule_is_skipped() {
        let mut msg = RuleMessage::default();
        msg.header.family = AddressFamily::Inet;
        msg.header.table = 254;
        msg.attributes.push(RuleAttribute::Priority(32766));
        assert_eq!(rule_from_message(&msg), None);
    }
}
