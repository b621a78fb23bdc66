use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use pretty_assertions::assert_eq;
use routeplan::{
    ComputedLeg, GeoPoint, LatLng, Leg, LegMetrics, MemoryStore, NewRoute, NewStop, PlannerStore,
    Route, RouteProvider, RouteStop, SegmentEngine, Stop, StoreTx,
};

/// Provider double: deterministic metrics per coordinate pair, records every
/// call, and can be switched into failure mode.
#[derive(Clone, Default)]
struct RecordingProvider {
    calls: Arc<Mutex<Vec<(LatLng, LatLng)>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingProvider {
    fn call_count(&self) -> usize {
        self.calls.lock().expect("lock").len()
    }

    fn reset(&self) {
        self.calls.lock().expect("lock").clear();
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl RouteProvider for RecordingProvider {
    async fn compute_route(
        &self, origin: LatLng, destination: LatLng,
    ) -> anyhow::Result<ComputedLeg> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("provider unavailable");
        }
        self.calls.lock().expect("lock").push((origin, destination));
        Ok(computed(origin, destination))
    }
}

fn computed(origin: LatLng, destination: LatLng) -> ComputedLeg {
    let span = (origin.latitude - destination.latitude).abs()
        + (origin.longitude - destination.longitude).abs();
    let distance_meters = (span * 111_000.0) as u32;
    ComputedLeg {
        distance_meters,
        travel_time_secs: distance_meters / 8,
        geo_points: vec![
            GeoPoint(origin.latitude, origin.longitude),
            GeoPoint(destination.latitude, destination.longitude),
        ],
    }
}

/// The leg the engine is expected to store for travel between two stops.
fn link(origin: &Stop, destination: &Stop) -> Leg {
    let leg = computed(origin.position(), destination.position());
    Leg::Link(LegMetrics {
        distance_meters: leg.distance_meters,
        travel_time_secs: leg.travel_time_secs,
        geo_points: leg.geo_points,
    })
}

struct Fixture {
    engine: SegmentEngine<MemoryStore, RecordingProvider>,
    store: MemoryStore,
    provider: RecordingProvider,
}

fn fixture() -> Fixture {
    let store = MemoryStore::new();
    let provider = RecordingProvider::default();
    Fixture { engine: SegmentEngine::new(store.clone(), provider.clone()), store, provider }
}

impl Fixture {
    async fn stop(&self, name: &str, latitude: f64, longitude: f64) -> Stop {
        self.engine
            .create_stop(NewStop {
                name: name.to_string(),
                description: format!("{name} stop"),
                latitude,
                longitude,
            })
            .await
            .expect("should create stop")
    }

    async fn route(&self, name: &str) -> Route {
        self.engine
            .create_route(NewRoute { name: name.to_string() })
            .await
            .expect("should create route")
    }

    /// A route populated with freshly created stops, provider counters reset.
    async fn route_of(&self, stops: &[(&str, f64, f64)]) -> (Route, Vec<Stop>) {
        let route = self.route("Test Line").await;
        let mut created = Vec::new();
        for &(name, latitude, longitude) in stops {
            let stop = self.stop(name, latitude, longitude).await;
            self.engine
                .add_stop_to_route(route.id, stop.id)
                .await
                .expect("should append stop");
            created.push(stop);
        }
        self.provider.reset();
        (route, created)
    }

    async fn segments(&self, route_id: i64) -> Vec<RouteStop> {
        let mut tx = self.store.begin().await.expect("begin");
        tx.segments(route_id).await.expect("segments")
    }

    async fn history_stop_ids(&self, route_id: i64) -> Option<Vec<i64>> {
        let snapshot = self.engine.route_history(route_id).await.expect("history");
        snapshot.map(|s| s.stops.iter().map(|v| v.stop_id).collect())
    }
}

fn assert_dense(segments: &[RouteStop]) {
    for (index, segment) in segments.iter().enumerate() {
        assert_eq!(segment.order, index as u32 + 1, "orders must form 1..=N");
    }
    if let Some(first) = segments.first() {
        assert_eq!(first.leg, Leg::Start, "first link must carry no incoming leg");
    }
}

#[tokio::test]
async fn append_to_empty_route_creates_start() {
    let fx = fixture();
    let route = fx.route("Inner Link").await;
    let stop = fx.stop("Civic", -36.852, 174.763).await;

    let segment = fx.engine.add_stop_to_route(route.id, stop.id).await.expect("should append");

    assert_eq!(segment.order, 1);
    assert_eq!(segment.leg, Leg::Start);
    assert_eq!(fx.provider.call_count(), 0);
}

#[tokio::test]
async fn append_computes_incoming_leg() {
    let fx = fixture();
    let (route, stops) = fx.route_of(&[("Civic", -36.852, 174.763)]).await;
    let britomart = fx.stop("Britomart", -36.844, 174.767).await;

    let segment =
        fx.engine.add_stop_to_route(route.id, britomart.id).await.expect("should append");

    assert_eq!(segment.order, 2);
    assert_eq!(segment.leg, link(&stops[0], &britomart));
    assert_eq!(fx.provider.call_count(), 1);
}

#[tokio::test]
async fn append_duplicate_is_rejected_before_mutation() {
    let fx = fixture();
    let (route, stops) =
        fx.route_of(&[("Civic", -36.852, 174.763), ("Britomart", -36.844, 174.767)]).await;
    let before = fx.segments(route.id).await;
    let history_before = fx.history_stop_ids(route.id).await;

    let err = fx
        .engine
        .add_stop_to_route(route.id, stops[0].id)
        .await
        .expect_err("duplicate should be rejected");

    assert_eq!(err.code(), "duplicate");
    assert_eq!(fx.segments(route.id).await, before);
    assert_eq!(fx.history_stop_ids(route.id).await, history_before);
}

#[tokio::test]
async fn remove_middle_stop_recomputes_one_leg() {
    let fx = fixture();
    let (route, stops) = fx
        .route_of(&[
            ("Alpha", -36.80, 174.70),
            ("Bravo", -36.82, 174.72),
            ("Charlie", -36.84, 174.74),
        ])
        .await;

    fx.engine.remove_stop_from_route(route.id, stops[1].id).await.expect("should remove");

    let segments = fx.segments(route.id).await;
    assert_dense(&segments);
    assert_eq!(
        segments.iter().map(|s| s.stop_id).collect::<Vec<_>>(),
        vec![stops[0].id, stops[2].id]
    );
    // the surviving successor now travels directly from Alpha
    assert_eq!(segments[1].leg, link(&stops[0], &stops[2]));
    assert_eq!(fx.provider.call_count(), 1);
}

#[tokio::test]
async fn remove_first_stop_promotes_without_provider() {
    let fx = fixture();
    let (route, stops) = fx
        .route_of(&[
            ("Alpha", -36.80, 174.70),
            ("Bravo", -36.82, 174.72),
            ("Charlie", -36.84, 174.74),
        ])
        .await;
    let charlie_leg = fx.segments(route.id).await[2].leg.clone();

    fx.engine.remove_stop_from_route(route.id, stops[0].id).await.expect("should remove");

    let segments = fx.segments(route.id).await;
    assert_dense(&segments);
    assert_eq!(segments[0].stop_id, stops[1].id);
    // Charlie's predecessor is still Bravo, so its leg survives untouched
    assert_eq!(segments[1].leg, charlie_leg);
    assert_eq!(fx.provider.call_count(), 0);
}

#[tokio::test]
async fn remove_last_stop_recomputes_nothing() {
    let fx = fixture();
    let (route, stops) =
        fx.route_of(&[("Alpha", -36.80, 174.70), ("Bravo", -36.82, 174.72)]).await;

    fx.engine.remove_stop_from_route(route.id, stops[1].id).await.expect("should remove");

    let segments = fx.segments(route.id).await;
    assert_dense(&segments);
    assert_eq!(segments.len(), 1);
    assert_eq!(fx.provider.call_count(), 0);
}

#[tokio::test]
async fn remove_missing_stop_is_not_found() {
    let fx = fixture();
    let (route, _) = fx.route_of(&[("Alpha", -36.80, 174.70)]).await;

    let err = fx
        .engine
        .remove_stop_from_route(route.id, 999)
        .await
        .expect_err("missing link should be rejected");
    assert_eq!(err.code(), "not_found");
}

#[tokio::test]
async fn append_then_remove_is_identity() {
    let fx = fixture();
    let (route, _) =
        fx.route_of(&[("Alpha", -36.80, 174.70), ("Bravo", -36.82, 174.72)]).await;
    let before = fx.segments(route.id).await;

    let extra = fx.stop("Delta", -36.86, 174.76).await;
    fx.engine.add_stop_to_route(route.id, extra.id).await.expect("should append");
    fx.engine.remove_stop_from_route(route.id, extra.id).await.expect("should remove");

    assert_eq!(fx.segments(route.id).await, before);
}

#[tokio::test]
async fn reorder_with_first_position_zeroes_and_recomputes_two() {
    let fx = fixture();
    let (route, stops) = fx
        .route_of(&[
            ("Alpha", -36.80, 174.70),
            ("Bravo", -36.82, 174.72),
            ("Charlie", -36.84, 174.74),
        ])
        .await;

    fx.engine.reorder_stops(route.id, 1, 3).await.expect("should reorder");

    let segments = fx.segments(route.id).await;
    assert_dense(&segments);
    assert_eq!(
        segments.iter().map(|s| s.stop_id).collect::<Vec<_>>(),
        vec![stops[2].id, stops[1].id, stops[0].id]
    );
    assert_eq!(segments[0].leg, Leg::Start);
    assert_eq!(segments[1].leg, link(&stops[2], &stops[1]));
    assert_eq!(segments[2].leg, link(&stops[1], &stops[0]));
    assert_eq!(fx.provider.call_count(), 2);
}

#[tokio::test]
async fn reorder_mid_route_recomputes_changed_predecessors() {
    let fx = fixture();
    let (route, stops) = fx
        .route_of(&[
            ("Alpha", -36.80, 174.70),
            ("Bravo", -36.82, 174.72),
            ("Charlie", -36.84, 174.74),
            ("Delta", -36.86, 174.76),
        ])
        .await;

    fx.engine.reorder_stops(route.id, 2, 3).await.expect("should reorder");

    let segments = fx.segments(route.id).await;
    assert_dense(&segments);
    assert_eq!(
        segments.iter().map(|s| s.stop_id).collect::<Vec<_>>(),
        vec![stops[0].id, stops[2].id, stops[1].id, stops[3].id]
    );
    assert_eq!(segments[1].leg, link(&stops[0], &stops[2]));
    assert_eq!(segments[2].leg, link(&stops[2], &stops[1]));
    assert_eq!(segments[3].leg, link(&stops[1], &stops[3]));
    assert_eq!(fx.provider.call_count(), 3);
}

#[tokio::test]
async fn reorder_round_trip_restores_route() {
    let fx = fixture();
    let (route, _) = fx
        .route_of(&[
            ("Alpha", -36.80, 174.70),
            ("Bravo", -36.82, 174.72),
            ("Charlie", -36.84, 174.74),
            ("Delta", -36.86, 174.76),
        ])
        .await;
    let before = fx.segments(route.id).await;

    fx.engine.reorder_stops(route.id, 2, 4).await.expect("should reorder");
    fx.engine.reorder_stops(route.id, 4, 2).await.expect("should reorder back");

    assert_eq!(fx.segments(route.id).await, before);
}

#[tokio::test]
async fn reorder_rejects_bad_positions() {
    let fx = fixture();
    let (route, _) =
        fx.route_of(&[("Alpha", -36.80, 174.70), ("Bravo", -36.82, 174.72)]).await;

    let same = fx.engine.reorder_stops(route.id, 2, 2).await.expect_err("same position");
    assert_eq!(same.code(), "invalid_order");

    let out_of_range = fx.engine.reorder_stops(route.id, 1, 5).await.expect_err("out of range");
    assert_eq!(out_of_range.code(), "invalid_order");

    assert_eq!(fx.provider.call_count(), 0);
}

#[tokio::test]
async fn history_snapshot_holds_pre_mutation_state() {
    let fx = fixture();
    let (route, stops) =
        fx.route_of(&[("Alpha", -36.80, 174.70), ("Bravo", -36.82, 174.72)]).await;

    let extra = fx.stop("Charlie", -36.84, 174.74).await;
    fx.engine.add_stop_to_route(route.id, extra.id).await.expect("should append");

    let history = fx.history_stop_ids(route.id).await.expect("snapshot should exist");
    assert_eq!(history, vec![stops[0].id, stops[1].id]);

    // single slot: the next mutation overwrites it
    fx.engine.remove_stop_from_route(route.id, extra.id).await.expect("should remove");
    let history = fx.history_stop_ids(route.id).await.expect("snapshot should exist");
    assert_eq!(history, vec![stops[0].id, stops[1].id, extra.id]);
}

#[tokio::test]
async fn history_is_none_before_any_mutation() {
    let fx = fixture();
    let route = fx.route("Fresh Line").await;

    assert_eq!(fx.engine.route_history(route.id).await.expect("history"), None);
}

#[tokio::test]
async fn provider_failure_aborts_append() {
    let fx = fixture();
    let (route, _) =
        fx.route_of(&[("Alpha", -36.80, 174.70), ("Bravo", -36.82, 174.72)]).await;
    let before = fx.segments(route.id).await;
    let history_before = fx.history_stop_ids(route.id).await;
    let extra = fx.stop("Charlie", -36.84, 174.74).await;

    fx.provider.set_failing(true);
    let err = fx
        .engine
        .add_stop_to_route(route.id, extra.id)
        .await
        .expect_err("provider failure should abort");

    assert_eq!(err.code(), "route_computation");
    assert_eq!(fx.segments(route.id).await, before);
    assert_eq!(fx.history_stop_ids(route.id).await, history_before);
}

#[tokio::test]
async fn provider_failure_aborts_reorder() {
    let fx = fixture();
    let (route, _) = fx
        .route_of(&[
            ("Alpha", -36.80, 174.70),
            ("Bravo", -36.82, 174.72),
            ("Charlie", -36.84, 174.74),
        ])
        .await;
    let before = fx.segments(route.id).await;

    fx.provider.set_failing(true);
    let err = fx
        .engine
        .reorder_stops(route.id, 2, 3)
        .await
        .expect_err("provider failure should abort");

    assert_eq!(err.code(), "route_computation");
    assert_eq!(fx.segments(route.id).await, before);
}

#[tokio::test]
async fn relocation_recomputes_adjacent_legs_only() {
    let fx = fixture();
    let shared = fx.stop("Shared", -36.82, 174.72).await;

    // middle of the first route
    let r1 = fx.route("Crosstown").await;
    let a = fx.stop("Alpha", -36.80, 174.70).await;
    let b = fx.stop("Bravo", -36.84, 174.74).await;
    for stop in [&a, &shared, &b] {
        fx.engine.add_stop_to_route(r1.id, stop.id).await.expect("should append");
    }

    // end of the second route
    let r2 = fx.route("Express").await;
    let c = fx.stop("Charlie", -36.86, 174.76).await;
    for stop in [&c, &shared] {
        fx.engine.add_stop_to_route(r2.id, stop.id).await.expect("should append");
    }
    fx.provider.reset();

    let moved = Stop { latitude: -36.90, longitude: 174.80, ..shared.clone() };
    let updated = fx.engine.update_stop(moved.clone()).await.expect("should update");
    assert_eq!(updated, moved);

    // two legs in the middle-of-route case, one in the tail case
    assert_eq!(fx.provider.call_count(), 3);

    let r1_segments = fx.segments(r1.id).await;
    assert_eq!(r1_segments[1].leg, link(&a, &moved));
    assert_eq!(r1_segments[2].leg, link(&moved, &b));

    let r2_segments = fx.segments(r2.id).await;
    assert_eq!(r2_segments[1].leg, link(&c, &moved));
}

#[tokio::test]
async fn unmoved_update_skips_recomputation() {
    let fx = fixture();
    let (route, stops) =
        fx.route_of(&[("Alpha", -36.80, 174.70), ("Bravo", -36.82, 174.72)]).await;

    let renamed = Stop { name: "Alpha Renamed".to_string(), ..stops[0].clone() };
    fx.engine.update_stop(renamed).await.expect("should update");

    assert_eq!(fx.provider.call_count(), 0);
    assert_eq!(fx.segments(route.id).await.len(), 2);
}

#[tokio::test]
async fn delete_stop_detaches_from_every_route() {
    let fx = fixture();
    let shared = fx.stop("Shared", -36.82, 174.72).await;

    let r1 = fx.route("Crosstown").await;
    let a = fx.stop("Alpha", -36.80, 174.70).await;
    let b = fx.stop("Bravo", -36.84, 174.74).await;
    for stop in [&a, &shared, &b] {
        fx.engine.add_stop_to_route(r1.id, stop.id).await.expect("should append");
    }

    let r2 = fx.route("Express").await;
    let c = fx.stop("Charlie", -36.86, 174.76).await;
    for stop in [&shared, &c] {
        fx.engine.add_stop_to_route(r2.id, stop.id).await.expect("should append");
    }
    fx.provider.reset();

    fx.engine.delete_stop(shared.id).await.expect("should delete");

    let r1_segments = fx.segments(r1.id).await;
    assert_dense(&r1_segments);
    assert_eq!(
        r1_segments.iter().map(|s| s.stop_id).collect::<Vec<_>>(),
        vec![a.id, b.id]
    );
    assert_eq!(r1_segments[1].leg, link(&a, &b));

    let r2_segments = fx.segments(r2.id).await;
    assert_dense(&r2_segments);
    assert_eq!(r2_segments.iter().map(|s| s.stop_id).collect::<Vec<_>>(), vec![c.id]);

    // one gap closure in the first route, a promotion in the second
    assert_eq!(fx.provider.call_count(), 1);

    let err = fx.engine.get_stop(shared.id).await.expect_err("stop record should be gone");
    assert_eq!(err.code(), "not_found");

    assert_eq!(fx.history_stop_ids(r1.id).await, Some(vec![a.id, shared.id, b.id]));
    assert_eq!(fx.history_stop_ids(r2.id).await, Some(vec![shared.id, c.id]));
}

#[tokio::test]
async fn bulk_remove_restores_density_with_one_pass() {
    let fx = fixture();
    let (route, stops) = fx
        .route_of(&[
            ("Alpha", -36.80, 174.70),
            ("Bravo", -36.82, 174.72),
            ("Charlie", -36.84, 174.74),
            ("Delta", -36.86, 174.76),
        ])
        .await;

    fx.engine
        .remove_stops_from_route(route.id, &[stops[1].id, stops[2].id])
        .await
        .expect("should remove");

    let segments = fx.segments(route.id).await;
    assert_dense(&segments);
    assert_eq!(
        segments.iter().map(|s| s.stop_id).collect::<Vec<_>>(),
        vec![stops[0].id, stops[3].id]
    );
    assert_eq!(segments[1].leg, link(&stops[0], &stops[3]));
    assert_eq!(fx.provider.call_count(), 1);

    // the snapshot holds the pre-batch route
    assert_eq!(
        fx.history_stop_ids(route.id).await,
        Some(vec![stops[0].id, stops[1].id, stops[2].id, stops[3].id])
    );
}

#[tokio::test]
async fn bulk_delete_stops_snapshots_each_route_once() {
    let fx = fixture();
    let (route, stops) = fx
        .route_of(&[
            ("Alpha", -36.80, 174.70),
            ("Bravo", -36.82, 174.72),
            ("Charlie", -36.84, 174.74),
        ])
        .await;

    fx.engine.delete_stops(&[stops[0].id, stops[1].id]).await.expect("should delete");

    let segments = fx.segments(route.id).await;
    assert_dense(&segments);
    assert_eq!(segments.iter().map(|s| s.stop_id).collect::<Vec<_>>(), vec![stops[2].id]);
    // both removals were head promotions
    assert_eq!(fx.provider.call_count(), 0);

    // pre-batch state, not the state between the two deletions
    assert_eq!(
        fx.history_stop_ids(route.id).await,
        Some(vec![stops[0].id, stops[1].id, stops[2].id])
    );
}

#[tokio::test]
async fn delete_route_removes_links_and_history() {
    let fx = fixture();
    let (route, stops) =
        fx.route_of(&[("Alpha", -36.80, 174.70), ("Bravo", -36.82, 174.72)]).await;

    fx.engine.delete_route(route.id).await.expect("should delete");

    assert_eq!(fx.segments(route.id).await, vec![]);
    let err = fx.engine.route_history(route.id).await.expect_err("route should be gone");
    assert_eq!(err.code(), "not_found");
    // the stops themselves survive
    fx.engine.get_stop(stops[0].id).await.expect("stop should remain");
}

#[tokio::test]
async fn listing_joins_stops_and_history() {
    let fx = fixture();
    let (route, stops) =
        fx.route_of(&[("Alpha", -36.80, 174.70), ("Bravo", -36.82, 174.72)]).await;

    let listed = fx.engine.list_routes().await.expect("should list");
    let found = listed.iter().find(|r| r.route.id == route.id).expect("route should be listed");

    assert_eq!(found.stops.len(), 2);
    assert_eq!(found.stops[0].stop, stops[0]);
    assert_eq!(found.stops[1].distance_meters, link(&stops[0], &stops[1]).metrics().distance_meters);
    assert!(found.history.is_some(), "mutations should have captured history");
}

#[tokio::test]
async fn invariants_hold_across_operation_sequences() {
    let fx = fixture();
    let (route, stops) = fx
        .route_of(&[
            ("Alpha", -36.80, 174.70),
            ("Bravo", -36.82, 174.72),
            ("Charlie", -36.84, 174.74),
            ("Delta", -36.86, 174.76),
        ])
        .await;

    fx.engine.reorder_stops(route.id, 1, 4).await.expect("reorder");
    assert_dense(&fx.segments(route.id).await);

    fx.engine.remove_stop_from_route(route.id, stops[2].id).await.expect("remove");
    assert_dense(&fx.segments(route.id).await);

    let extra = fx.stop("Echo", -36.88, 174.78).await;
    fx.engine.add_stop_to_route(route.id, extra.id).await.expect("append");
    assert_dense(&fx.segments(route.id).await);

    fx.engine.reorder_stops(route.id, 2, 3).await.expect("reorder");
    assert_dense(&fx.segments(route.id).await);

    fx.engine.remove_stop_from_route(route.id, stops[3].id).await.expect("remove first");
    assert_dense(&fx.segments(route.id).await);
}
