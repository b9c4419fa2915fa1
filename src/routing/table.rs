//! Static route installation into a routing table

use crate::error::RouteError;
use crate::routing::{IpFamily, PolicyRouter, Route, RouteNetlink, Scope};
use ipnetwork::IpNetwork;
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, error};

impl<K: RouteNetlink> PolicyRouter<K> {
    /// Install one route through `interface` into `table`
    ///
    /// The gateway is picked by family; for `IpFamily::All` the destination
    /// decides which of the two applies, and a route without destination
    /// gets no gateway. A route that already exists counts
    /// as installed.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_route(
        &self,
        table: u32,
        family: IpFamily,
        scope: Scope,
        interface: &str,
        dst: Option<IpNetwork>,
        v4_gw: Option<Ipv4Addr>,
        v6_gw: Option<Ipv6Addr>,
    ) -> Result<(), RouteError> {
        let link = self.resolve_link(interface).await?;

        let mut route = Route::new(family);
        route.link_index = Some(link.index);
        route.scope = scope;
        route.destination = dst;
        route.table = table;

        route.gateway = match family {
            IpFamily::V4 => v4_gw.map(Into::into),
            IpFamily::V6 => v6_gw.map(Into::into),
            IpFamily::All => match dst {
                Some(IpNetwork::V4(_)) => v4_gw.map(Into::into),
                Some(IpNetwork::V6(_)) => v6_gw.map(Into::into),
                None => None,
            },
        };

        self.install_route(&route).await
    }

    /// Submit `route`, treating EEXIST as success
    pub(crate) async fn install_route(&self, route: &Route) -> Result<(), RouteError> {
        match self.kernel().route_add(route).await {
            Ok(()) => {
                debug!(route = %route, "route added");
                Ok(())
            }
            Err(e) if e.is_exist() => {
                debug!(route = %route, "route already present");
                Ok(())
            }
            Err(source) => {
                error!(route = %route, error = %source, "failed to add route");
                Err(RouteError::RouteAddFailed {
                    route: route.to_string(),
                    source,
                })
            }
        }
    }
}
