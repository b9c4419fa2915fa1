//! Migration of an interface's routes between routing tables
//!
//! Migration is a sequence of delete-then-add steps with no rollback. A
//! failure leaves the routes handled so far in the destination table and
//! the rest in the source; running the same migration again picks up the
//! remainder, since adds tolerate existing routes. A route whose delete
//! succeeded but whose re-add failed is gone from both tables.

use crate::error::RouteError;
use crate::routing::{IpFamily, PolicyRouter, Route, RouteNetlink};
use ipnetwork::{IpNetwork, Ipv6Network};
use std::net::Ipv6Addr;
use tracing::{debug, error};

/// IPv6 link-local prefix; needed for neighbour resolution on every link
pub const LINK_LOCAL_V6: Ipv6Addr = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0);
pub const LINK_LOCAL_V6_PREFIX: u8 = 64;

/// Destinations whose routes stay in the source table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPolicy {
    pinned: Vec<IpNetwork>,
}

impl MigrationPolicy {
    pub fn new(pinned: Vec<IpNetwork>) -> Self {
        Self { pinned }
    }

    pub fn pinned(&self) -> &[IpNetwork] {
        &self.pinned
    }

    /// Exact network match; more specific prefixes are not pinned
    pub fn is_pinned(&self, dst: &IpNetwork) -> bool {
        self.pinned
            .iter()
            .any(|p| p.ip() == dst.ip() && p.prefix() == dst.prefix())
    }

    fn skips(&self, route: &Route) -> bool {
        route.destination.as_ref().is_some_and(|dst| self.is_pinned(dst))
    }
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        let link_local = Ipv6Network::new(LINK_LOCAL_V6, LINK_LOCAL_V6_PREFIX)
            .map(IpNetwork::V6)
            .into_iter()
            .collect();
        Self::new(link_local)
    }
}

impl<K: RouteNetlink> PolicyRouter<K> {
    /// Move every route of `interface` in `src_table` into `dst_table`
    ///
    /// Routes are taken in kernel order. For a multipath route, only the
    /// segment leaving through `interface` moves, as a single-nexthop route.
    pub async fn move_routes(
        &self,
        interface: &str,
        src_table: u32,
        dst_table: u32,
        family: IpFamily,
    ) -> Result<(), RouteError> {
        debug!(interface, src_table, dst_table, %family, "moving routes");
        let link = self.resolve_link(interface).await?;

        let routes = self
            .kernel()
            .route_list(None, family)
            .await
            .map_err(|e| {
                error!(interface, error = %e, "failed to list routes");
                RouteError::Query(e)
            })?;

        for route in routes {
            if route.table != src_table || self.migration_policy().skips(&route) {
                continue;
            }

            if route.link_index == Some(link.index) {
                self.remove_route(&route).await?;

                let mut moved = route;
                moved.table = dst_table;
                self.install_route(&moved).await?;
                debug!(route = %moved, "moved route");
                continue;
            }

            let Some((generated, deleted)) = split_nexthop(&route, link.index, dst_table) else {
                continue;
            };
            debug!(route = %route, deleted = %deleted, "splitting multipath route");

            self.remove_route(&deleted).await?;
            self.install_route(&generated).await?;
            debug!(route = %generated, "moved multipath segment");
        }

        Ok(())
    }

    async fn remove_route(&self, route: &Route) -> Result<(), RouteError> {
        self.kernel().route_del(route).await.map_err(|source| {
            error!(route = %route, error = %source, "failed to delete route");
            RouteError::RouteDeleteFailed {
                route: route.to_string(),
                source,
            }
        })
    }
}

/// Single-nexthop route for `dst_table` built from the segment of `route`
/// leaving through `link_index`, and the descriptor that removes that
/// segment from the source table
fn split_nexthop(route: &Route, link_index: u32, dst_table: u32) -> Option<(Route, Route)> {
    let nh = route.nexthop_via(link_index)?;

    let mut deleted = Route::new(route.address_family());
    deleted.destination = route.destination;
    deleted.link_index = Some(nh.link_index);
    deleted.gateway = nh.gateway;
    deleted.table = route.table;

    let mut generated = deleted.clone();
    generated.table = dst_table;
    generated.mtu = route.mtu;

    Some((generated, deleted))
}
