//! In-memory kernel routing interface for unit tests

use crate::error::NetlinkError;
use crate::routing::{IpFamily, Link, NetlinkConnector, Route, RouteNetlink, Rule, Scope};
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub links: Vec<Link>,
    pub routes: Vec<Route>,
    pub rules: Vec<Rule>,
    /// Errno to return from the next `route_add` regardless of state
    pub fail_route_add: Option<i32>,
    pub fail_route_del: Option<i32>,
    pub fail_route_list: Option<i32>,
}

/// Shared fake; clones observe the same state
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeKernel {
    pub state: Arc<Mutex<FakeState>>,
}

fn same_route(a: &Route, b: &Route) -> bool {
    a.table == b.table
        && a.address_family() == b.address_family()
        && a.destination == b.destination
        && a.link_index == b.link_index
        && a.gateway == b.gateway
        && a.multipath == b.multipath
}

impl FakeKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(self, index: u32, name: &str) -> Self {
        self.state.lock().unwrap().links.push(Link {
            index,
            name: name.to_string(),
        });
        self
    }

    pub fn with_route(self, route: Route) -> Self {
        self.state.lock().unwrap().routes.push(route);
        self
    }

    pub fn routes(&self) -> Vec<Route> {
        self.state.lock().unwrap().routes.clone()
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.state.lock().unwrap().rules.clone()
    }

    pub fn routes_in(&self, table: u32) -> Vec<Route> {
        self.routes().into_iter().filter(|r| r.table == table).collect()
    }
}

impl RouteNetlink for FakeKernel {
    async fn link_by_name(&self, name: &str) -> Result<Link, NetlinkError> {
        let state = self.state.lock().unwrap();
        state
            .links
            .iter()
            .find(|l| l.name == name)
            .cloned()
            .ok_or_else(|| NetlinkError::LinkNotFound(name.to_string()))
    }

    async fn link_by_index(&self, index: u32) -> Result<Link, NetlinkError> {
        let state = self.state.lock().unwrap();
        state
            .links
            .iter()
            .find(|l| l.index == index)
            .cloned()
            .ok_or_else(|| NetlinkError::LinkNotFound(format!("#{}", index)))
    }

    async fn route_list(
        &self,
        link: Option<&Link>,
        family: IpFamily,
    ) -> Result<Vec<Route>, NetlinkError> {
        let state = self.state.lock().unwrap();
        if let Some(errno) = state.fail_route_list {
            return Err(NetlinkError::from_errno(errno));
        }
        Ok(state
            .routes
            .iter()
            .filter(|r| family.covers(r.address_family()))
            .filter(|r| link.map_or(true, |l| r.link_index == Some(l.index)))
            .cloned()
            .collect())
    }

    async fn route_add(&self, route: &Route) -> Result<(), NetlinkError> {
        let mut state = self.state.lock().unwrap();
        if let Some(errno) = state.fail_route_add.take() {
            return Err(NetlinkError::from_errno(errno));
        }
        if state.routes.iter().any(|r| same_route(r, route)) {
            return Err(NetlinkError::from_errno(libc::EEXIST));
        }
        let mut stored = route.clone();
        stored.family = route.address_family();
        state.routes.push(stored);
        Ok(())
    }

    /// Exact match removes the route; a single-nexthop descriptor matching
    /// one segment of a default multipath route removes that segment
    async fn route_del(&self, route: &Route) -> Result<(), NetlinkError> {
        let mut state = self.state.lock().unwrap();
        if let Some(errno) = state.fail_route_del.take() {
            return Err(NetlinkError::from_errno(errno));
        }
        if let Some(pos) = state.routes.iter().position(|r| same_route(r, route)) {
            state.routes.remove(pos);
            return Ok(());
        }

        let (Some(link_index), true) = (route.link_index, route.multipath.is_empty()) else {
            return Err(NetlinkError::from_errno(libc::ESRCH));
        };
        let family = route.address_family();
        let owner = state.routes.iter().position(|r| {
            r.table == route.table
                && r.destination == route.destination
                && r.address_family() == family
                && r
                    .multipath
                    .iter()
                    .any(|nh| nh.link_index == link_index && nh.gateway == route.gateway)
        });
        let Some(pos) = owner else {
            return Err(NetlinkError::from_errno(libc::ESRCH));
        };
        let owner = &mut state.routes[pos];
        owner
            .multipath
            .retain(|nh| !(nh.link_index == link_index && nh.gateway == route.gateway));
        if owner.multipath.is_empty() {
            state.routes.remove(pos);
        }
        Ok(())
    }

    async fn rule_list(&self, family: IpFamily) -> Result<Vec<Rule>, NetlinkError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rules
            .iter()
            .filter(|r| family.covers(r.family))
            .cloned()
            .collect())
    }

    async fn rule_add(&self, rule: &Rule) -> Result<(), NetlinkError> {
        let mut state = self.state.lock().unwrap();
        if state.rules.contains(rule) {
            return Err(NetlinkError::from_errno(libc::EEXIST));
        }
        state.rules.push(rule.clone());
        Ok(())
    }

    async fn rule_del(&self, rule: &Rule) -> Result<(), NetlinkError> {
        let mut state = self.state.lock().unwrap();
        let pos = state
            .rules
            .iter()
            .position(|r| {
                r.family == rule.family
                    && r.selector == rule.selector
                    && r.table == rule.table
                    && (rule.priority.is_none() || r.priority == rule.priority)
            })
            .ok_or_else(|| NetlinkError::from_errno(libc::ENOENT))?;
        state.rules.remove(pos);
        Ok(())
    }
}

/// Hands out clones of one fake, counting connections
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeConnector {
    pub kernel: FakeKernel,
    pub connections: Arc<Mutex<usize>>,
}

impl NetlinkConnector for FakeConnector {
    type Handle = FakeKernel;

    fn connect(&self) -> Result<FakeKernel, NetlinkError> {
        *self.connections.lock().unwrap() += 1;
        Ok(self.kernel.clone())
    }
}

/// Plain single-nexthop route bound to a link
pub(crate) fn route_via(
    link_index: u32,
    destination: Option<&str>,
    gateway: Option<&str>,
    table: u32,
) -> Route {
    let destination: Option<IpNetwork> = destination.map(|d| d.parse().unwrap());
    let gateway: Option<IpAddr> = gateway.map(|g| g.parse().unwrap());
    let family = destination
        .map(|d| IpFamily::of(&d.ip()))
        .or_else(|| gateway.as_ref().map(IpFamily::of))
        .unwrap_or(IpFamily::V4);
    let mut route = Route::new(family);
    route.link_index = Some(link_index);
    route.destination = destination;
    route.gateway = gateway;
    route.table = table;
    if gateway.is_none() {
        route.scope = Scope::Link;
    }
    route
}
