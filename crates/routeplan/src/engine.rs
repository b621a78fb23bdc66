use std::collections::HashSet;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::history;
use crate::locks::RouteLocker;
use crate::models::{
    Leg, LegMetrics, NewRoute, NewStop, Route, RouteId, RouteSnapshot, RouteStop, RouteWithStops,
    Stop, StopId,
};
use crate::provider::RouteProvider;
use crate::store::{PlannerStore, StoreTx};

/// Maintains each route's ordered stop sequence and per-leg metrics.
///
/// Every mutation follows the same shape: take the route's lock, open one
/// transaction, capture the history snapshot, apply the structural edit,
/// recompute exactly the legs whose predecessor changed, commit. A provider
/// or storage failure abandons the transaction, so the route never holds a
/// partially applied edit.
#[derive(Debug, Clone)]
pub struct SegmentEngine<S, P> {
    store: S,
    provider: P,
    locks: RouteLocker,
}

impl<S: PlannerStore, P: RouteProvider> SegmentEngine<S, P> {
    #[must_use]
    pub fn new(store: S, provider: P) -> Self {
        Self { store, provider, locks: RouteLocker::new() }
    }

    // ---- stops ----

    /// # Errors
    /// [`Error::Validation`] on bad input, [`Error::Storage`] on store failure.
    pub async fn create_stop(&self, stop: NewStop) -> Result<Stop> {
        stop.validate()?;
        let mut tx = self.store.begin().await?;
        let stop = tx.insert_stop(stop).await?;
        tx.commit().await?;
        info!(stop_id = stop.id, "stop created");
        Ok(stop)
    }

    /// Updates a stop record and, when its coordinates changed, propagates
    /// the relocation into every route that references it.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the stop does not exist;
    /// [`Error::RouteComputation`] when a leg recomputation fails (the
    /// affected route keeps its previous legs; the stop update itself
    /// stands, and callers may retry the propagation).
    pub async fn update_stop(&self, stop: Stop) -> Result<Stop> {
        stop.validate()?;
        let mut tx = self.store.begin().await?;
        let previous = require_stop(&mut tx, stop.id).await?;
        let updated = tx.update_stop(stop).await?;
        tx.commit().await?;

        let moved = previous.latitude != updated.latitude
            || previous.longitude != updated.longitude;
        if moved {
            info!(stop_id = updated.id, "stop relocated, recomputing adjacent legs");
            self.on_stop_relocated(updated.id).await?;
        }
        Ok(updated)
    }

    /// # Errors
    /// [`Error::NotFound`] when the stop does not exist.
    pub async fn get_stop(&self, stop_id: StopId) -> Result<Stop> {
        let mut tx = self.store.begin().await?;
        require_stop(&mut tx, stop_id).await
    }

    /// # Errors
    /// [`Error::Storage`] on store failure.
    pub async fn list_stops(&self, name: Option<&str>) -> Result<Vec<Stop>> {
        let mut tx = self.store.begin().await?;
        tx.list_stops(name).await
    }

    /// Deletes a stop, first detaching it from every route that references
    /// it and re-stitching each per the removal semantics.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the stop does not exist.
    pub async fn delete_stop(&self, stop_id: StopId) -> Result<()> {
        self.delete_stops(&[stop_id]).await
    }

    /// Bulk form of [`Self::delete_stop`]. Each affected route's history is
    /// captured once for the whole batch, so the stored snapshot is the
    /// pre-batch state.
    ///
    /// # Errors
    /// [`Error::NotFound`] when any stop does not exist.
    pub async fn delete_stops(&self, stop_ids: &[StopId]) -> Result<()> {
        let mut snapshotted: HashSet<RouteId> = HashSet::new();
        for &stop_id in stop_ids {
            let routes = {
                let mut tx = self.store.begin().await?;
                require_stop(&mut tx, stop_id).await?;
                tx.routes_containing_stop(stop_id).await?
            };

            // one route at a time; holding several route locks at once could
            // deadlock against concurrent route-local operations
            for route in routes {
                let _guard = self.locks.lock(route.id).await;
                let mut tx = self.store.begin().await?;
                if snapshotted.insert(route.id) {
                    history::capture(&mut tx, route.id).await?;
                }
                tx.delete_segment(route.id, stop_id).await?;
                self.restitch(&mut tx, route.id).await?;
                tx.commit().await?;
                info!(route_id = route.id, stop_id, "stop detached from route");
            }

            let mut tx = self.store.begin().await?;
            tx.delete_stop(stop_id).await?;
            tx.commit().await?;
            info!(stop_id, "stop deleted");
        }
        Ok(())
    }

    /// Routes that currently reference the stop.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the stop does not exist.
    pub async fn routes_containing_stop(&self, stop_id: StopId) -> Result<Vec<Route>> {
        let mut tx = self.store.begin().await?;
        require_stop(&mut tx, stop_id).await?;
        tx.routes_containing_stop(stop_id).await
    }

    // ---- routes ----

    /// # Errors
    /// [`Error::Validation`] on bad input.
    pub async fn create_route(&self, route: NewRoute) -> Result<Route> {
        route.validate()?;
        let mut tx = self.store.begin().await?;
        let route = tx.insert_route(route).await?;
        tx.commit().await?;
        info!(route_id = route.id, "route created");
        Ok(route)
    }

    /// # Errors
    /// [`Error::NotFound`] when the route does not exist.
    pub async fn update_route(&self, route: Route) -> Result<Route> {
        route.validate()?;
        let mut tx = self.store.begin().await?;
        let route = tx.update_route(route).await?;
        tx.commit().await?;
        Ok(route)
    }

    /// Deletes a route together with its links and history slot.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the route does not exist.
    pub async fn delete_route(&self, route_id: RouteId) -> Result<()> {
        let _guard = self.locks.lock(route_id).await;
        let mut tx = self.store.begin().await?;
        require_route(&mut tx, route_id).await?;
        tx.delete_segments_by_route(route_id).await?;
        tx.delete_history(route_id).await?;
        tx.delete_route(route_id).await?;
        tx.commit().await?;
        info!(route_id, "route deleted");
        Ok(())
    }

    /// All routes with their ordered stops and history, newest first.
    ///
    /// # Errors
    /// [`Error::Storage`] on store failure.
    pub async fn list_routes(&self) -> Result<Vec<RouteWithStops>> {
        let mut tx = self.store.begin().await?;
        let mut routes = Vec::new();
        for route in tx.list_routes().await? {
            let stops = history::route_views(&mut tx, route.id).await?;
            let history = tx.history(route.id).await?;
            routes.push(RouteWithStops { route, stops, history });
        }
        Ok(routes)
    }

    /// The route's single history snapshot, if any mutation captured one.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the route does not exist.
    pub async fn route_history(&self, route_id: RouteId) -> Result<Option<RouteSnapshot>> {
        let mut tx = self.store.begin().await?;
        require_route(&mut tx, route_id).await?;
        tx.history(route_id).await
    }

    // ---- segment maintenance ----

    /// Appends a stop at the end of a route.
    ///
    /// The new link's leg is computed from the previous last stop; appending
    /// to an empty route creates the starting link with no incoming leg.
    ///
    /// # Errors
    /// [`Error::Duplicate`] when the stop is already part of the route;
    /// [`Error::NotFound`] when the route or stop does not exist;
    /// [`Error::RouteComputation`] when the provider fails (nothing is
    /// persisted).
    pub async fn add_stop_to_route(&self, route_id: RouteId, stop_id: StopId) -> Result<RouteStop> {
        let _guard = self.locks.lock(route_id).await;
        let mut tx = self.store.begin().await?;
        require_route(&mut tx, route_id).await?;
        let stop = require_stop(&mut tx, stop_id).await?;

        let segments = tx.segments(route_id).await?;
        if segments.iter().any(|s| s.stop_id == stop_id) {
            return Err(Error::Duplicate(format!(
                "stop {stop_id} already added to route {route_id}"
            )));
        }

        history::capture(&mut tx, route_id).await?;

        let leg = match segments.last() {
            None => Leg::Start,
            Some(last) => {
                let last_stop = require_stop(&mut tx, last.stop_id).await?;
                self.computed_leg(&last_stop, &stop).await?
            }
        };
        let segment =
            RouteStop { route_id, stop_id, order: segments.len() as u32 + 1, leg };
        tx.insert_segment(segment.clone()).await?;
        tx.commit().await?;

        info!(route_id, stop_id, order = segment.order, "stop appended to route");
        Ok(segment)
    }

    /// Removes a stop from a route and closes the gap it leaves.
    ///
    /// Removing the first stop promotes its successor to the start with no
    /// provider call; removing an interior stop recomputes exactly the one
    /// leg adjacent to the deletion point; removing the last stop recomputes
    /// nothing.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the route or link does not exist;
    /// [`Error::RouteComputation`] when the provider fails (the route
    /// reverts to its pre-operation state).
    pub async fn remove_stop_from_route(&self, route_id: RouteId, stop_id: StopId) -> Result<()> {
        let _guard = self.locks.lock(route_id).await;
        let mut tx = self.store.begin().await?;
        require_route(&mut tx, route_id).await?;

        let segments = tx.segments(route_id).await?;
        if !segments.iter().any(|s| s.stop_id == stop_id) {
            return Err(Error::NotFound(format!(
                "stop {stop_id} has no link in route {route_id}"
            )));
        }

        history::capture(&mut tx, route_id).await?;
        tx.delete_segment(route_id, stop_id).await?;
        self.restitch(&mut tx, route_id).await?;
        tx.commit().await?;

        info!(route_id, stop_id, "stop removed from route");
        Ok(())
    }

    /// Removes several stops from a route in one operation.
    ///
    /// Missing links are skipped. History is captured once, so the
    /// snapshot holds the route as it was before the whole batch.
    ///
    /// # Errors
    /// [`Error::NotFound`] when the route does not exist;
    /// [`Error::RouteComputation`] when the provider fails.
    pub async fn remove_stops_from_route(
        &self, route_id: RouteId, stop_ids: &[StopId],
    ) -> Result<()> {
        let _guard = self.locks.lock(route_id).await;
        let mut tx = self.store.begin().await?;
        require_route(&mut tx, route_id).await?;

        history::capture(&mut tx, route_id).await?;

        let segments = tx.segments(route_id).await?;
        let mut removed = 0usize;
        for &stop_id in stop_ids {
            if segments.iter().any(|s| s.stop_id == stop_id) {
                tx.delete_segment(route_id, stop_id).await?;
                removed += 1;
            }
        }
        self.restitch(&mut tx, route_id).await?;
        tx.commit().await?;

        info!(route_id, removed, "stops removed from route");
        Ok(())
    }

    /// Swaps the stops at order positions `from` and `to`.
    ///
    /// After the transposition, the link now at position 1 (if either
    /// position was 1) loses its incoming leg, and every link whose
    /// predecessor stop changed is recomputed: the swapped positions and
    /// their immediate successors.
    ///
    /// # Errors
    /// [`Error::InvalidOrder`] when `from == to` or either position is
    /// unoccupied; [`Error::RouteComputation`] when the provider fails (the
    /// original order survives).
    pub async fn reorder_stops(&self, route_id: RouteId, from: u32, to: u32) -> Result<()> {
        if from == to {
            return Err(Error::InvalidOrder("new order cannot be the same".to_string()));
        }

        let _guard = self.locks.lock(route_id).await;
        let mut tx = self.store.begin().await?;
        require_route(&mut tx, route_id).await?;

        let mut segments = tx.segments(route_id).await?;
        let from_idx = segments
            .iter()
            .position(|s| s.order == from)
            .ok_or_else(|| Error::InvalidOrder(format!("no stop at position {from}")))?;
        let to_idx = segments
            .iter()
            .position(|s| s.order == to)
            .ok_or_else(|| Error::InvalidOrder(format!("no stop at position {to}")))?;

        history::capture(&mut tx, route_id).await?;

        segments[from_idx].order = to;
        segments[to_idx].order = from;
        tx.update_segment(segments[from_idx].clone()).await?;
        tx.update_segment(segments[to_idx].clone()).await?;
        segments.sort_by_key(|s| s.order);

        let count = segments.len() as u32;
        if from.min(to) == 1 {
            // the swapped-in link starts the route now
            segments[0].leg = Leg::Start;
            tx.update_segment(segments[0].clone()).await?;
        }

        let mut stale: Vec<u32> = Vec::new();
        for position in [from, to] {
            if position > 1 {
                stale.push(position);
            }
            if position < count {
                stale.push(position + 1);
            }
        }
        stale.sort_unstable();
        stale.dedup();

        for position in stale {
            let idx = (position - 1) as usize;
            let previous = require_stop(&mut tx, segments[idx - 1].stop_id).await?;
            let current = require_stop(&mut tx, segments[idx].stop_id).await?;
            segments[idx].leg = self.computed_leg(&previous, &current).await?;
            tx.update_segment(segments[idx].clone()).await?;
        }
        tx.commit().await?;

        info!(route_id, from, to, "stops reordered");
        Ok(())
    }

    /// Propagates a stop's new coordinates into every route that references
    /// it: the moved stop's own leg and its successor's leg are recomputed,
    /// at most two provider calls per affected route.
    ///
    /// # Errors
    /// [`Error::RouteComputation`] when the provider fails for a route (that
    /// route keeps its previous legs; earlier routes in the scan keep their
    /// recomputed ones).
    pub async fn on_stop_relocated(&self, stop_id: StopId) -> Result<()> {
        let routes = {
            let mut tx = self.store.begin().await?;
            tx.routes_containing_stop(stop_id).await?
        };
        for route in routes {
            self.relocate_within_route(route.id, stop_id).await?;
        }
        Ok(())
    }

    async fn relocate_within_route(&self, route_id: RouteId, stop_id: StopId) -> Result<()> {
        let _guard = self.locks.lock(route_id).await;
        let mut tx = self.store.begin().await?;

        let mut segments = tx.segments(route_id).await?;
        // the stop may have been detached between the scan and taking the lock
        let Some(at) = segments.iter().position(|s| s.stop_id == stop_id) else {
            return Ok(());
        };

        history::capture(&mut tx, route_id).await?;

        let moved = require_stop(&mut tx, stop_id).await?;
        if at > 0 {
            let previous = require_stop(&mut tx, segments[at - 1].stop_id).await?;
            segments[at].leg = self.computed_leg(&previous, &moved).await?;
            tx.update_segment(segments[at].clone()).await?;
        }
        if at + 1 < segments.len() {
            let next = require_stop(&mut tx, segments[at + 1].stop_id).await?;
            segments[at + 1].leg = self.computed_leg(&moved, &next).await?;
            tx.update_segment(segments[at + 1].clone()).await?;
        }
        tx.commit().await?;

        debug!(route_id, stop_id, "relocation propagated");
        Ok(())
    }

    /// Restores order density after one or more links were deleted.
    ///
    /// Walks the surviving links in order and renumbers them back to
    /// `1..=N`. A leg is recomputed only where a deletion sat between a link
    /// and its former predecessor; a link that merely slides down keeps its
    /// metrics, and a link promoted to the head loses its incoming leg
    /// without any provider call (the route simply starts later). A single
    /// removal therefore costs at most one provider call.
    async fn restitch(&self, tx: &mut S::Tx, route_id: RouteId) -> Result<()> {
        let segments = tx.segments(route_id).await?;
        let mut previous_old_order = 0u32;
        for (index, segment) in segments.iter().enumerate() {
            let target = index as u32 + 1;
            if target == 1 {
                if segment.order != 1 {
                    let promoted = RouteStop { order: 1, leg: Leg::Start, ..segment.clone() };
                    tx.update_segment(promoted).await?;
                }
            } else if segment.order - previous_old_order > 1 {
                // a deleted link sat between this one and its predecessor
                let origin = require_stop(tx, segments[index - 1].stop_id).await?;
                let destination = require_stop(tx, segment.stop_id).await?;
                let leg = self.computed_leg(&origin, &destination).await?;
                tx.update_segment(RouteStop { order: target, leg, ..segment.clone() }).await?;
            } else if segment.order != target {
                // same predecessor, just slides down
                tx.update_segment(RouteStop { order: target, ..segment.clone() }).await?;
            }
            previous_old_order = segment.order;
        }
        Ok(())
    }

    async fn computed_leg(&self, origin: &Stop, destination: &Stop) -> Result<Leg> {
        debug!(origin = origin.id, destination = destination.id, "computing leg");
        let computed = self
            .provider
            .compute_route(origin.position(), destination.position())
            .await
            .map_err(|err| {
                Error::RouteComputation(format!(
                    "leg {} -> {}: {err:#}",
                    origin.id, destination.id
                ))
            })?;
        Ok(Leg::Link(LegMetrics {
            distance_meters: computed.distance_meters,
            travel_time_secs: computed.travel_time_secs,
            geo_points: computed.geo_points,
        }))
    }
}

async fn require_stop<T: StoreTx>(tx: &mut T, stop_id: StopId) -> Result<Stop> {
    tx.stop(stop_id).await?.ok_or_else(|| Error::NotFound(format!("stop {stop_id} not found")))
}

async fn require_route<T: StoreTx>(tx: &mut T, route_id: RouteId) -> Result<Route> {
    tx.route(route_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("route {route_id} not found")))
}
