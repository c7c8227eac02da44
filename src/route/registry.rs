//! Registry of compiled routes.
//!
//! An explicit object with a defined lifecycle: constructed at engine
//! start, populated as routes are compiled, queried and mutated only
//! through these operations. The registry is the engine's management
//! surface: per-route id, lifecycle state, and in-flight count.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

use crate::error::RouteError;

use super::{Route, ServiceState};

/// Management snapshot of one route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteStatus {
    /// Route id.
    pub id: String,

    /// Current lifecycle state.
    pub state: ServiceState,

    /// Exchanges currently inside the route.
    pub in_flight: usize,
}

/// Concurrent registry of routes keyed by id.
#[derive(Default)]
pub struct RouteRegistry {
    routes: DashMap<String, Arc<Route>>,
}

impl RouteRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled route. Ids must be unique.
    pub fn add(&self, route: Route) -> Result<Arc<Route>, RouteError> {
        let id = route.id().to_string();
        let entry = Arc::new(route);
        match self.routes.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(RouteError::DuplicateRoute { route_id: id })
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&entry));
                info!(route_id = %id, "route registered");
                Ok(entry)
            }
        }
    }

    /// Remove a route. Only stopped (or shut down) routes may be removed.
    pub fn remove(&self, id: &str) -> Result<(), RouteError> {
        let Some(route) = self.routes.get(id).map(|r| r.value().clone()) else {
            return Err(RouteError::UnknownRoute {
                route_id: id.to_string(),
            });
        };

        let state = route.state();
        if state != ServiceState::Stopped && state != ServiceState::Shutdown {
            return Err(RouteError::NotStopped {
                route_id: id.to_string(),
                state: state.to_string(),
            });
        }

        self.routes.remove(id);
        info!(route_id = %id, "route removed");
        Ok(())
    }

    /// Look up a route by id.
    pub fn route(&self, id: &str) -> Option<Arc<Route>> {
        self.routes.get(id).map(|r| r.value().clone())
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Start every registered route, stopping at the first failure.
    pub fn start_all(&self) -> Result<(), RouteError> {
        for route in self.routes.iter() {
            route.start()?;
        }
        Ok(())
    }

    /// Stop every registered route gracefully, each with the same drain
    /// bound. The first drain failure is returned after all routes have
    /// been asked to stop.
    pub async fn stop_all(&self, drain_timeout: Duration) -> Result<(), RouteError> {
        let routes: Vec<Arc<Route>> = self.routes.iter().map(|r| r.value().clone()).collect();

        let mut first_error = None;
        for route in routes {
            if route.state() != ServiceState::Started {
                continue;
            }
            if let Err(e) = route.stop(drain_timeout).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Management snapshot of all routes.
    pub fn statuses(&self) -> Vec<RouteStatus> {
        let mut statuses: Vec<RouteStatus> = self
            .routes
            .iter()
            .map(|route| RouteStatus {
                id: route.id().to_string(),
                state: route.state(),
                in_flight: route.in_flight(),
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::Noop;

    fn route(id: &str) -> Route {
        Route::new(id, Arc::new(Noop))
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let registry = RouteRegistry::new();
        registry.add(route("r1")).unwrap();

        let result = registry.add(route("r1"));
        assert!(matches!(result, Err(RouteError::DuplicateRoute { .. })));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_requires_stopped() {
        let registry = RouteRegistry::new();
        let r1 = registry.add(route("r1")).unwrap();
        r1.start().unwrap();

        assert!(matches!(
            registry.remove("r1"),
            Err(RouteError::NotStopped { .. })
        ));

        r1.stop(Duration::from_secs(1)).await.unwrap();
        registry.remove("r1").unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_start_all_and_statuses() {
        let registry = RouteRegistry::new();
        registry.add(route("b")).unwrap();
        registry.add(route("a")).unwrap();

        registry.start_all().unwrap();

        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 2);
        // Sorted by id for a stable management view.
        assert_eq!(statuses[0].id, "a");
        assert_eq!(statuses[0].state, ServiceState::Started);
        assert_eq!(statuses[0].in_flight, 0);

        registry.stop_all(Duration::from_secs(1)).await.unwrap();
        assert!(registry
            .statuses()
            .iter()
            .all(|s| s.state == ServiceState::Stopped));
    }

    #[tokio::test]
    async fn test_unknown_route_lookup() {
        let registry = RouteRegistry::new();
        assert!(registry.route("missing").is_none());
        assert!(matches!(
            registry.remove("missing"),
            Err(RouteError::UnknownRoute { .. })
        ));
    }
}
