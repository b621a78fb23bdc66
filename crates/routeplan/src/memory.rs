use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Error, Result};
use crate::models::{
    NewRoute, NewStop, Route, RouteId, RouteSnapshot, RouteStop, Stop, StopId,
};
use crate::store::{PlannerStore, StoreTx};

/// In-process planner store.
///
/// A transaction takes the whole-state lock for its lifetime and mutates a
/// staged copy; commit writes the copy back, and dropping the transaction
/// discards it. Writers are therefore globally serialized, which is stricter
/// than the per-route serialization the engine needs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    stops: BTreeMap<StopId, Stop>,
    routes: BTreeMap<RouteId, Route>,
    segments: Vec<RouteStop>,
    history: BTreeMap<RouteId, RouteSnapshot>,
    next_stop_id: StopId,
    next_route_id: RouteId,
}

#[async_trait]
impl PlannerStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(MemoryTx { staged, guard })
    }
}

/// A staged copy of the store state plus the lock that keeps other
/// transactions out until this one resolves.
pub struct MemoryTx {
    staged: State,
    guard: OwnedMutexGuard<State>,
}

impl MemoryTx {
    fn ordered_segments(&self, route_id: RouteId) -> Vec<RouteStop> {
        let mut segments: Vec<RouteStop> =
            self.staged.segments.iter().filter(|s| s.route_id == route_id).cloned().collect();
        segments.sort_by_key(|s| s.order);
        segments
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn stop(&mut self, id: StopId) -> Result<Option<Stop>> {
        Ok(self.staged.stops.get(&id).cloned())
    }

    async fn insert_stop(&mut self, stop: NewStop) -> Result<Stop> {
        self.staged.next_stop_id += 1;
        let stop = Stop {
            id: self.staged.next_stop_id,
            name: stop.name,
            description: stop.description,
            latitude: stop.latitude,
            longitude: stop.longitude,
        };
        self.staged.stops.insert(stop.id, stop.clone());
        Ok(stop)
    }

    async fn update_stop(&mut self, stop: Stop) -> Result<Stop> {
        if !self.staged.stops.contains_key(&stop.id) {
            return Err(Error::NotFound(format!("stop {} not found", stop.id)));
        }
        self.staged.stops.insert(stop.id, stop.clone());
        Ok(stop)
    }

    async fn delete_stop(&mut self, id: StopId) -> Result<()> {
        if self.staged.stops.remove(&id).is_none() {
            return Err(Error::NotFound(format!("stop {id} not found")));
        }
        Ok(())
    }

    async fn list_stops(&mut self, name: Option<&str>) -> Result<Vec<Stop>> {
        let mut stops: Vec<Stop> = self
            .staged
            .stops
            .values()
            .filter(|stop| name.is_none_or(|needle| stop.name.contains(needle)))
            .cloned()
            .collect();
        stops.sort_by_key(|stop| std::cmp::Reverse(stop.id));
        Ok(stops)
    }

    async fn route(&mut self, id: RouteId) -> Result<Option<Route>> {
        Ok(self.staged.routes.get(&id).cloned())
    }

    async fn insert_route(&mut self, route: NewRoute) -> Result<Route> {
        self.staged.next_route_id += 1;
        let route = Route { id: self.staged.next_route_id, name: route.name };
        self.staged.routes.insert(route.id, route.clone());
        Ok(route)
    }

    async fn update_route(&mut self, route: Route) -> Result<Route> {
        if !self.staged.routes.contains_key(&route.id) {
            return Err(Error::NotFound(format!("route {} not found", route.id)));
        }
        self.staged.routes.insert(route.id, route.clone());
        Ok(route)
    }

    async fn delete_route(&mut self, id: RouteId) -> Result<()> {
        if self.staged.routes.remove(&id).is_none() {
            return Err(Error::NotFound(format!("route {id} not found")));
        }
        Ok(())
    }

    async fn list_routes(&mut self) -> Result<Vec<Route>> {
        let mut routes: Vec<Route> = self.staged.routes.values().cloned().collect();
        routes.sort_by_key(|route| std::cmp::Reverse(route.id));
        Ok(routes)
    }

    async fn segments(&mut self, route_id: RouteId) -> Result<Vec<RouteStop>> {
        Ok(self.ordered_segments(route_id))
    }

    async fn insert_segment(&mut self, segment: RouteStop) -> Result<()> {
        self.staged.segments.push(segment);
        Ok(())
    }

    async fn update_segment(&mut self, segment: RouteStop) -> Result<()> {
        let Some(slot) = self
            .staged
            .segments
            .iter_mut()
            .find(|s| s.route_id == segment.route_id && s.stop_id == segment.stop_id)
        else {
            return Err(Error::NotFound(format!(
                "stop {} has no link in route {}",
                segment.stop_id, segment.route_id
            )));
        };
        *slot = segment;
        Ok(())
    }

    async fn delete_segment(&mut self, route_id: RouteId, stop_id: StopId) -> Result<()> {
        let before = self.staged.segments.len();
        self.staged.segments.retain(|s| !(s.route_id == route_id && s.stop_id == stop_id));
        if self.staged.segments.len() == before {
            return Err(Error::NotFound(format!(
                "stop {stop_id} has no link in route {route_id}"
            )));
        }
        Ok(())
    }

    async fn delete_segments_by_stop(&mut self, stop_id: StopId) -> Result<()> {
        self.staged.segments.retain(|s| s.stop_id != stop_id);
        Ok(())
    }

    async fn delete_segments_by_route(&mut self, route_id: RouteId) -> Result<()> {
        self.staged.segments.retain(|s| s.route_id != route_id);
        Ok(())
    }

    async fn routes_containing_stop(&mut self, stop_id: StopId) -> Result<Vec<Route>> {
        let mut ids: Vec<RouteId> = self
            .staged
            .segments
            .iter()
            .filter(|s| s.stop_id == stop_id)
            .map(|s| s.route_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids.into_iter().filter_map(|id| self.staged.routes.get(&id).cloned()).collect())
    }

    async fn history(&mut self, route_id: RouteId) -> Result<Option<RouteSnapshot>> {
        Ok(self.staged.history.get(&route_id).cloned())
    }

    async fn put_history(&mut self, snapshot: RouteSnapshot) -> Result<()> {
        self.staged.history.insert(snapshot.route_id, snapshot);
        Ok(())
    }

    async fn delete_history(&mut self, route_id: RouteId) -> Result<()> {
        self.staged.history.remove(&route_id);
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let Self { staged, mut guard } = self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}
