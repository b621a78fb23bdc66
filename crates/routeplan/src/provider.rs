use anyhow::Result;
use async_trait::async_trait;

use crate::models::{GeoPoint, LatLng};

/// Road path between two coordinates as computed by the external provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedLeg {
    pub distance_meters: u32,
    pub travel_time_secs: u32,
    pub geo_points: Vec<GeoPoint>,
}

/// External routing service: given two coordinates, computes the travel
/// distance, travel time, and road geometry between them.
///
/// Implementations are expected to bound each call with a timeout; the
/// engine treats any error as a failed operation, never a partial one.
#[async_trait]
pub trait RouteProvider: Send + Sync + Clone + 'static {
    async fn compute_route(&self, origin: LatLng, destination: LatLng) -> Result<ComputedLeg>;
}
