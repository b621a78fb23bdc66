use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub type StopId = i64;
pub type RouteId = i64;

/// Minimum length accepted for stop and route names and descriptions.
const MIN_TEXT_LEN: usize = 3;

/// A geographic coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

/// One vertex of a leg's road geometry, serialized as `[latitude, longitude]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint(pub f64, pub f64);

impl GeoPoint {
    #[must_use]
    pub const fn latitude(&self) -> f64 {
        self.0
    }

    #[must_use]
    pub const fn longitude(&self) -> f64 {
        self.1
    }
}

/// A bus stop record. Stops exist independently of routes; routes reference
/// them through [`RouteStop`] links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub id: StopId,
    pub name: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Stop {
    #[must_use]
    pub const fn position(&self) -> LatLng {
        LatLng { latitude: self.latitude, longitude: self.longitude }
    }

    /// # Errors
    /// Returns [`Error::Validation`] when a field violates the input rules.
    pub fn validate(&self) -> Result<()> {
        if self.id < 1 {
            return Err(Error::Validation("id must be positive".to_string()));
        }
        validate_text("name", &self.name)?;
        validate_text("description", &self.description)
    }
}

/// Payload for creating a stop; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStop {
    pub name: String,
    pub description: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl NewStop {
    /// # Errors
    /// Returns [`Error::Validation`] when a field violates the input rules.
    pub fn validate(&self) -> Result<()> {
        validate_text("name", &self.name)?;
        validate_text("description", &self.description)
    }
}

/// A route record. The ordered stop membership lives in [`RouteStop`] links.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: RouteId,
    pub name: String,
}

impl Route {
    /// # Errors
    /// Returns [`Error::Validation`] when a field violates the input rules.
    pub fn validate(&self) -> Result<()> {
        if self.id < 1 {
            return Err(Error::Validation("id must be positive".to_string()));
        }
        validate_text("name", &self.name)
    }
}

/// Payload for creating a route; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoute {
    pub name: String,
}

impl NewRoute {
    /// # Errors
    /// Returns [`Error::Validation`] when a field violates the input rules.
    pub fn validate(&self) -> Result<()> {
        validate_text("name", &self.name)
    }
}

/// Metrics of the leg arriving at a stop from its predecessor in the route.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegMetrics {
    pub distance_meters: u32,
    pub travel_time_secs: u32,
    pub geo_points: Vec<GeoPoint>,
}

/// The incoming leg of a positioned stop.
///
/// The first stop of a route has no incoming leg, so "order 1 has zero
/// metrics" is a structural property rather than a convention on nullable
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Leg {
    /// The route starts here; there is nothing to travel from.
    Start,
    /// Travel from the stop at the previous order position.
    Link(LegMetrics),
}

impl Leg {
    /// Metrics of this leg; the start of a route reads as all zeroes.
    #[must_use]
    pub fn metrics(&self) -> LegMetrics {
        match self {
            Self::Start => LegMetrics::default(),
            Self::Link(metrics) => metrics.clone(),
        }
    }

    #[must_use]
    pub const fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }
}

/// One stop's positioned membership in one route.
///
/// `order` is 1-based and dense within a route: the orders of a route's links
/// always form exactly `1..=N`. A stop appears at most once per route, so
/// `(route_id, stop_id)` identifies a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStop {
    pub route_id: RouteId,
    pub stop_id: StopId,
    pub order: u32,
    pub leg: Leg,
}

impl RouteStop {
    #[must_use]
    pub fn with_stop(&self, stop: Stop) -> RouteStopView {
        let metrics = self.leg.metrics();
        RouteStopView {
            route_id: self.route_id,
            stop_id: self.stop_id,
            order: self.order,
            distance_meters: metrics.distance_meters,
            travel_time_secs: metrics.travel_time_secs,
            geo_points: metrics.geo_points,
            stop,
        }
    }
}

/// Read model of a positioned stop with the stop record joined in, as served
/// to clients and stored in history snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStopView {
    pub route_id: RouteId,
    pub stop_id: StopId,
    pub order: u32,
    pub distance_meters: u32,
    pub travel_time_secs: u32,
    pub geo_points: Vec<GeoPoint>,
    pub stop: Stop,
}

/// A route's single history slot: the full ordered link list as it existed
/// immediately before the last mutation. Overwritten on each capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSnapshot {
    pub route_id: RouteId,
    pub captured_at: DateTime<Utc>,
    pub stops: Vec<RouteStopView>,
}

/// Route with joined ordered stops and history, the shape returned by list
/// endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteWithStops {
    #[serde(flatten)]
    pub route: Route,
    pub stops: Vec<RouteStopView>,
    pub history: Option<RouteSnapshot>,
}

fn validate_text(field: &str, value: &str) -> Result<()> {
    if value.chars().count() < MIN_TEXT_LEN {
        return Err(Error::Validation(format!(
            "{field} must be at least {MIN_TEXT_LEN} characters"
        )));
    }
    Ok(())
}
