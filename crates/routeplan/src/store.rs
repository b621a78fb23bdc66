use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    NewRoute, NewStop, Route, RouteId, RouteSnapshot, RouteStop, Stop, StopId,
};

/// Storage seam consumed by the segment engine.
///
/// The engine never assumes auto-commit semantics: every multi-write
/// operation opens one [`StoreTx`] and either commits it or lets it roll
/// back, so a structural edit and its metric writes land atomically or not
/// at all.
#[async_trait]
pub trait PlannerStore: Send + Sync + Clone + 'static {
    type Tx: StoreTx;

    async fn begin(&self) -> Result<Self::Tx>;
}

/// One transactional scope over the planner tables.
///
/// Dropping a transaction without calling [`StoreTx::commit`] discards every
/// staged write.
#[async_trait]
pub trait StoreTx: Send {
    async fn stop(&mut self, id: StopId) -> Result<Option<Stop>>;
    async fn insert_stop(&mut self, stop: NewStop) -> Result<Stop>;
    async fn update_stop(&mut self, stop: Stop) -> Result<Stop>;
    async fn delete_stop(&mut self, id: StopId) -> Result<()>;
    /// Stops ordered by id descending, optionally filtered by a name
    /// substring.
    async fn list_stops(&mut self, name: Option<&str>) -> Result<Vec<Stop>>;

    async fn route(&mut self, id: RouteId) -> Result<Option<Route>>;
    async fn insert_route(&mut self, route: NewRoute) -> Result<Route>;
    async fn update_route(&mut self, route: Route) -> Result<Route>;
    async fn delete_route(&mut self, id: RouteId) -> Result<()>;
    /// Routes ordered by id descending.
    async fn list_routes(&mut self) -> Result<Vec<Route>>;

    /// A route's links ordered by `order` ascending.
    async fn segments(&mut self, route_id: RouteId) -> Result<Vec<RouteStop>>;
    async fn insert_segment(&mut self, segment: RouteStop) -> Result<()>;
    /// Replaces the link identified by `(route_id, stop_id)`.
    async fn update_segment(&mut self, segment: RouteStop) -> Result<()>;
    async fn delete_segment(&mut self, route_id: RouteId, stop_id: StopId) -> Result<()>;
    async fn delete_segments_by_stop(&mut self, stop_id: StopId) -> Result<()>;
    async fn delete_segments_by_route(&mut self, route_id: RouteId) -> Result<()>;
    /// Routes that contain the stop, ordered by id ascending.
    async fn routes_containing_stop(&mut self, stop_id: StopId) -> Result<Vec<Route>>;

    async fn history(&mut self, route_id: RouteId) -> Result<Option<RouteSnapshot>>;
    /// Overwrites the route's single history slot.
    async fn put_history(&mut self, snapshot: RouteSnapshot) -> Result<()>;
    async fn delete_history(&mut self, route_id: RouteId) -> Result<()>;

    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;
}
