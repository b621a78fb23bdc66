//! HTTP surface of the planner.
//!
//! Thin handlers over [`SegmentEngine`]: extract, delegate, wrap in the
//! `{success, data}` envelope. All domain rules live in `routeplan`.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use http::StatusCode;
use routeplan::{
    Error, NewRoute, NewStop, PlannerStore, Route, RouteId, RouteProvider, RouteSnapshot,
    RouteStop, RouteWithStops, SegmentEngine, Stop, StopId,
};
use serde::{Deserialize, Serialize};

pub fn router<S, P>(engine: SegmentEngine<S, P>) -> Router
where
    S: PlannerStore,
    P: RouteProvider,
{
    use tower_http::cors::{Any, CorsLayer};

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route(
            "/api/bus-stop",
            post(create_stop::<S, P>).get(list_stops::<S, P>).delete(delete_stops::<S, P>),
        )
        .route(
            "/api/bus-stop/{id}",
            get(get_stop::<S, P>).put(update_stop::<S, P>).delete(delete_stop::<S, P>),
        )
        .route("/api/bus-stop/{id}/routes", get(stop_routes::<S, P>))
        .route("/api/route", post(create_route::<S, P>).get(list_routes::<S, P>))
        .route("/api/route/{route_id}", put(update_route::<S, P>).delete(delete_route::<S, P>))
        .route("/api/route/{route_id}/bus-stop", post(add_stop::<S, P>))
        .route(
            "/api/route/{route_id}/bus-stop/{stop_id}",
            delete(remove_stop::<S, P>).put(reorder_stops::<S, P>),
        )
        .route("/api/route/{route_id}/bus-stops", delete(remove_stops::<S, P>))
        .route("/api/route/{route_id}/history", get(route_history::<S, P>))
        .layer(cors)
        .with_state(engine)
}

/// Response envelope for successful calls.
#[derive(Debug, Serialize)]
struct Success<T> {
    success: bool,
    data: T,
}

fn success<T: Serialize>(data: T) -> Json<Success<T>> {
    Json(Success { success: true, data })
}

type ApiResult<T> = Result<Json<Success<T>>, HttpError>;

/// Domain error carried to the wire with its mapped status code.
pub struct HttpError {
    status: StatusCode,
    error: Error,
}

impl From<Error> for HttpError {
    fn from(error: Error) -> Self {
        let status = match &error {
            Error::Validation(_) | Error::Duplicate(_) | Error::InvalidOrder(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::RouteComputation(_) => StatusCode::BAD_GATEWAY,
            Error::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self { status, error }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "success": false,
            "code": self.error.code(),
            "message": self.error.description(),
        }));
        (self.status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct StopListQuery {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulkStopIds {
    bus_stop_ids: Vec<StopId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddStopBody {
    bus_stop_id: StopId,
}

#[derive(Debug, Deserialize)]
struct ReorderBody {
    from: u32,
    to: u32,
}

async fn create_stop<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Json(payload): Json<NewStop>,
) -> ApiResult<Stop> {
    Ok(success(engine.create_stop(payload).await?))
}

async fn list_stops<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Query(query): Query<StopListQuery>,
) -> ApiResult<Vec<Stop>> {
    let name = query.name.as_deref().filter(|needle| !needle.is_empty());
    Ok(success(engine.list_stops(name).await?))
}

async fn delete_stops<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Json(payload): Json<BulkStopIds>,
) -> ApiResult<()> {
    engine.delete_stops(&payload.bus_stop_ids).await?;
    Ok(success(()))
}

async fn get_stop<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Path(id): Path<StopId>,
) -> ApiResult<Stop> {
    Ok(success(engine.get_stop(id).await?))
}

async fn update_stop<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Path(id): Path<StopId>,
    Json(payload): Json<NewStop>,
) -> ApiResult<Stop> {
    let stop = Stop {
        id,
        name: payload.name,
        description: payload.description,
        latitude: payload.latitude,
        longitude: payload.longitude,
    };
    Ok(success(engine.update_stop(stop).await?))
}

async fn delete_stop<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Path(id): Path<StopId>,
) -> ApiResult<()> {
    engine.delete_stop(id).await?;
    Ok(success(()))
}

async fn stop_routes<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Path(id): Path<StopId>,
) -> ApiResult<Vec<Route>> {
    Ok(success(engine.routes_containing_stop(id).await?))
}

async fn create_route<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Json(payload): Json<NewRoute>,
) -> ApiResult<Route> {
    Ok(success(engine.create_route(payload).await?))
}

async fn list_routes<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>,
) -> ApiResult<Vec<RouteWithStops>> {
    Ok(success(engine.list_routes().await?))
}

async fn update_route<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Path(route_id): Path<RouteId>,
    Json(payload): Json<NewRoute>,
) -> ApiResult<Route> {
    Ok(success(engine.update_route(Route { id: route_id, name: payload.name }).await?))
}

async fn delete_route<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Path(route_id): Path<RouteId>,
) -> ApiResult<()> {
    engine.delete_route(route_id).await?;
    Ok(success(()))
}

async fn add_stop<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Path(route_id): Path<RouteId>,
    Json(payload): Json<AddStopBody>,
) -> ApiResult<RouteStop> {
    Ok(success(engine.add_stop_to_route(route_id, payload.bus_stop_id).await?))
}

async fn remove_stop<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>,
    Path((route_id, stop_id)): Path<(RouteId, StopId)>,
) -> ApiResult<()> {
    engine.remove_stop_from_route(route_id, stop_id).await?;
    Ok(success(()))
}

// the reorder payload addresses positions, not the stop in the path
async fn reorder_stops<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>,
    Path((route_id, _stop_id)): Path<(RouteId, StopId)>, Json(payload): Json<ReorderBody>,
) -> ApiResult<()> {
    engine.reorder_stops(route_id, payload.from, payload.to).await?;
    Ok(success(()))
}

async fn remove_stops<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Path(route_id): Path<RouteId>,
    Json(payload): Json<BulkStopIds>,
) -> ApiResult<()> {
    engine.remove_stops_from_route(route_id, &payload.bus_stop_ids).await?;
    Ok(success(()))
}

async fn route_history<S: PlannerStore, P: RouteProvider>(
    State(engine): State<SegmentEngine<S, P>>, Path(route_id): Path<RouteId>,
) -> ApiResult<Option<RouteSnapshot>> {
    Ok(success(engine.route_history(route_id).await?))
}
