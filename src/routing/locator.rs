//! Default route interface discovery inside a target namespace

use crate::error::{NetworkError, RouteError};
use crate::network::{NamespaceExecutor, NetworkNamespace};
use crate::routing::{IpFamily, NetlinkConnector, RouteNetlink};
use tracing::debug;

/// Finds the interface carrying a namespace's default route
pub struct DefaultInterfaceLocator<E, C> {
    executor: E,
    connector: C,
}

impl<E, C> DefaultInterfaceLocator<E, C>
where
    E: NamespaceExecutor,
    C: NetlinkConnector,
{
    pub fn new(executor: E, connector: C) -> Self {
        Self {
            executor,
            connector,
        }
    }

    /// Name of the first interface with a default route for `family`,
    /// skipping `exclude`; empty when there is none
    ///
    /// The kernel handle is opened inside `namespace`, so every lookup sees
    /// that namespace's routes and links.
    pub async fn find_default_interface(
        &self,
        family: IpFamily,
        exclude: Option<&str>,
        namespace: &NetworkNamespace,
    ) -> Result<String, RouteError> {
        let kernel = self.executor.execute(namespace, || {
            self.connector
                .connect()
                .map_err(|e| NetworkError::OperationFailed {
                    namespace: namespace.to_string(),
                    reason: e.to_string(),
                })
        })?;

        let name = default_interface(&kernel, family, exclude).await?;
        debug!(%namespace, %family, interface = %name, "located default route interface");
        Ok(name)
    }
}

/// IPv6 defaults are expected as multipath routes and only their segments
/// are considered; IPv4 looks at plain default routes.
pub(crate) async fn default_interface<K: RouteNetlink>(
    kernel: &K,
    family: IpFamily,
    exclude: Option<&str>,
) -> Result<String, RouteError> {
    let routes = kernel
        .route_list(None, family)
        .await
        .map_err(RouteError::Query)?;

    if family == IpFamily::V6 {
        for route in &routes {
            for nh in &route.multipath {
                if let Some(name) = eligible_link(kernel, nh.link_index, exclude).await? {
                    return Ok(name);
                }
            }
        }
        return Ok(String::new());
    }

    for route in &routes {
        if route.family != IpFamily::V4 || !route.is_default() {
            continue;
        }
        let Some(index) = route.link_index else {
            continue;
        };
        if let Some(name) = eligible_link(kernel, index, exclude).await? {
            return Ok(name);
        }
    }
    Ok(String::new())
}

async fn eligible_link<K: RouteNetlink>(
    kernel: &K,
    index: u32,
    exclude: Option<&str>,
) -> Result<Option<String>, RouteError> {
    let link = kernel
        .link_by_index(index)
        .await
        .map_err(RouteError::Query)?;

    if link.name.is_empty() || exclude.is_some_and(|name| !name.is_empty() && name == link.name) {
        return Ok(None);
    }
    Ok(Some(link.name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::testing::{route_via, FakeConnector, FakeKernel};
    use crate::routing::{Nexthop, Route, MAIN_TABLE};
    use std::sync::Mutex;

    /// Runs the closure in place, remembering which namespace was asked for
    #[derive(Default)]
    struct RecordingExecutor {
        entered: Mutex<Vec<String>>,
    }

    impl NamespaceExecutor for RecordingExecutor {
        fn execute<F, R>(&self, namespace: &NetworkNamespace, func: F) -> Result<R, NetworkError>
        where
            F: FnOnce() -> Result<R, NetworkError>,
        {
            self.entered.lock().unwrap().push(namespace.path.clone());
            func()
        }
    }

    struct DeniedExecutor;

    impl NamespaceExecutor for DeniedExecutor {
        fn execute<F, R>(&self, namespace: &NetworkNamespace, _func: F) -> Result<R, NetworkError>
        where
            F: FnOnce() -> Result<R, NetworkError>,
        {
            Err(NetworkError::NamespaceAccess(namespace.to_string()))
        }
    }

    fn v4_kernel() -> FakeKernel {
        FakeKernel::new()
            .with_link(2, "eth0")
            .with_link(3, "net1")
            .with_route(route_via(2, None, Some("10.0.0.1"), MAIN_TABLE))
            .with_route(route_via(3, Some("10.1.1.0/24"), None, MAIN_TABLE))
            .with_route(route_via(3, Some("0.0.0.0/0"), Some("10.1.1.1"), MAIN_TABLE))
    }

    fn locator(kernel: FakeKernel) -> DefaultInterfaceLocator<RecordingExecutor, FakeConnector> {
        DefaultInterfaceLocator::new(
            RecordingExecutor::default(),
            FakeConnector {
                kernel,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_v4_first_default() {
        let locator = locator(v4_kernel());
        let ns = NetworkNamespace::new("/var/run/netns/pod1");

        let name = locator
            .find_default_interface(IpFamily::V4, None, &ns)
            .await
            .unwrap();
        assert_eq!(name, "eth0");
        assert_eq!(
            *locator.executor.entered.lock().unwrap(),
            vec!["/var/run/netns/pod1".to_string()]
        );
        assert_eq!(*locator.connector.connections.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_v4_excluded_interface_is_skipped() {
        let locator = locator(v4_kernel());
        let ns = NetworkNamespace::new("pod1");

        let name = locator
            .find_default_interface(IpFamily::V4, Some("eth0"), &ns)
            .await
            .unwrap();
        assert_eq!(name, "net1");
    }

    #[tokio::test]
    async fn test_v4_nothing_left_after_exclude() {
        let kernel = FakeKernel::new()
            .with_link(2, "eth0")
            .with_route(route_via(2, None, Some("10.0.0.1"), MAIN_TABLE));
        let locator = locator(kernel);

        let name = locator
            .find_default_interface(IpFamily::V4, Some("eth0"), &NetworkNamespace::new("pod1"))
            .await
            .unwrap();
        assert_eq!(name, "");
    }

    #[tokio::test]
    async fn test_v6_uses_multipath_segments() {
        let mut multipath = Route::new(IpFamily::V6);
        multipath.multipath = vec![
            Nexthop {
                link_index: 2,
                gateway: Some("fd00::1".parse().unwrap()),
            },
            Nexthop {
                link_index: 3,
                gateway: Some("fd01::1".parse().unwrap()),
            },
        ];
        let kernel = FakeKernel::new()
            .with_link(2, "eth0")
            .with_link(3, "net1")
            .with_link(4, "net2")
            // plain v6 default routes are not considered
            .with_route(route_via(4, None, Some("fd02::1"), MAIN_TABLE))
            .with_route(multipath);
        let locator = locator(kernel);
        let ns = NetworkNamespace::new("pod1");

        let name = locator
            .find_default_interface(IpFamily::V6, None, &ns)
            .await
            .unwrap();
        assert_eq!(name, "eth0");

        let name = locator
            .find_default_interface(IpFamily::V6, Some("eth0"), &ns)
            .await
            .unwrap();
        assert_eq!(name, "net1");
    }

    #[tokio::test]
    async fn test_no_default_route() {
        let kernel = FakeKernel::new()
            .with_link(3, "net1")
            .with_route(route_via(3, Some("10.1.1.0/24"), None, MAIN_TABLE));
        let locator = locator(kernel);

        let name = locator
            .find_default_interface(IpFamily::V4, None, &NetworkNamespace::new("pod1"))
            .await
            .unwrap();
        assert!(name.is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_link_index() {
        let kernel =
            FakeKernel::new().with_route(route_via(9, None, Some("10.0.0.1"), MAIN_TABLE));
        let locator = locator(kernel);

        let err = locator
            .find_default_interface(IpFamily::V4, None, &NetworkNamespace::new("pod1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::Query(_)));
    }

    #[test]
    fn test_namespace_failure_propagates() {
        let locator = DefaultInterfaceLocator::new(DeniedExecutor, FakeConnector::default());
        let err = tokio_test::block_on(locator.find_default_interface(
            IpFamily::V4,
            None,
            &NetworkNamespace::new("gone"),
        ))
        .unwrap_err();
        assert!(matches!(err, RouteError::Namespace(NetworkError::NamespaceAccess(_))));
    }
}
