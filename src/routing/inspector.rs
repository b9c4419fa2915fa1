//! Route and default gateway inspection

use crate::error::RouteError;
use crate::routing::{IpFamily, PolicyRouter, Route, RouteNetlink};
use std::net::IpAddr;
use tracing::debug;

impl<K: RouteNetlink> PolicyRouter<K> {
    /// Routes of every table for `family`, restricted to `interface` when
    /// one is named
    pub async fn list_routes(
        &self,
        interface: Option<&str>,
        family: IpFamily,
    ) -> Result<Vec<Route>, RouteError> {
        let link = match interface {
            Some(name) => Some(self.resolve_link(name).await?),
            None => None,
        };

        self.kernel()
            .route_list(link.as_ref(), family)
            .await
            .map_err(RouteError::Query)
    }

    /// Gateways through which `interface` reaches the default destination
    ///
    /// A default route may be a plain route on the interface or one
    /// segment of a multipath default shared with other interfaces; both
    /// forms are reported, one entry per occurrence.
    pub async fn default_gateways(
        &self,
        interface: &str,
        family: IpFamily,
    ) -> Result<Vec<IpAddr>, RouteError> {
        let routes = self.list_routes(None, family).await?;
        let link = self.resolve_link(interface).await?;

        let mut gateways = Vec::new();
        for route in &routes {
            if route.link_index == Some(link.index) {
                if route.is_default() {
                    if let Some(gw) = route.gateway {
                        gateways.push(gw);
                    }
                }
            } else if let Some(nh) = route.nexthop_via(link.index) {
                if let Some(gw) = nh.gateway {
                    gateways.push(gw);
                }
            }
        }

        debug!(interface, ?gateways, "resolved default gateways");
        Ok(gateways)
    }
}
