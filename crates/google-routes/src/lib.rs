//! Google Routes API connector.
//!
//! Implements the planner's [`RouteProvider`] seam against
//! `POST /directions/v2:computeRoutes`: API-key header auth, a response
//! field mask limited to what the planner stores, and precision-5 encoded
//! polyline decoding into (latitude, longitude) geometry.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use routeplan::{ComputedLeg, GeoPoint, LatLng, RouteProvider};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Production endpoint of the Routes API.
pub const DEFAULT_ENDPOINT: &str = "https://routes.googleapis.com/directions/v2:computeRoutes";

const FIELD_MASK: &str = "routes.duration,routes.distanceMeters,routes.polyline.encodedPolyline";

/// Encoded polylines use five decimal places of precision.
const POLYLINE_PRECISION: u32 = 5;

#[derive(Debug, Clone)]
pub struct GoogleRoutes {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl GoogleRoutes {
    /// Builds a connector with a bounded per-request timeout.
    ///
    /// # Errors
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration,
    ) -> Result<Self> {
        let client =
            reqwest::Client::builder().timeout(timeout).build().context("building http client")?;
        Ok(Self { client, endpoint: endpoint.into(), api_key: api_key.into() })
    }
}

#[async_trait]
impl RouteProvider for GoogleRoutes {
    async fn compute_route(&self, origin: LatLng, destination: LatLng) -> Result<ComputedLeg> {
        debug!(
            origin_lat = origin.latitude,
            origin_lng = origin.longitude,
            destination_lat = destination.latitude,
            destination_lng = destination.longitude,
            "requesting route"
        );

        let request = ComputeRoutesRequest {
            origin: Waypoint::from(origin),
            destination: Waypoint::from(destination),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", FIELD_MASK)
            .json(&request)
            .send()
            .await
            .context("sending computeRoutes request")?;

        let payload: ComputeRoutesResponse =
            response.json().await.context("decoding computeRoutes response")?;
        into_leg(payload)
    }
}

#[derive(Debug, Serialize)]
struct ComputeRoutesRequest {
    origin: Waypoint,
    destination: Waypoint,
}

#[derive(Debug, Serialize)]
struct Waypoint {
    location: WaypointLocation,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WaypointLocation {
    lat_lng: Coordinates,
}

#[derive(Debug, Serialize)]
struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl From<LatLng> for Waypoint {
    fn from(position: LatLng) -> Self {
        Self {
            location: WaypointLocation {
                lat_lng: Coordinates {
                    latitude: position.latitude,
                    longitude: position.longitude,
                },
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComputeRoutesResponse {
    #[serde(default)]
    routes: Vec<RoutePayload>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i64>,
    message: Option<String>,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoutePayload {
    #[serde(default)]
    distance_meters: u32,
    duration: String,
    polyline: PolylinePayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PolylinePayload {
    encoded_polyline: String,
}

fn into_leg(payload: ComputeRoutesResponse) -> Result<ComputedLeg> {
    if let Some(api_error) = payload.error {
        error!(?api_error, "computeRoutes rejected the request");
        bail!(
            "computeRoutes error: {}",
            api_error.message.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    let Some(route) = payload.routes.into_iter().next() else {
        bail!("computeRoutes returned no routes");
    };

    Ok(ComputedLeg {
        distance_meters: route.distance_meters,
        travel_time_secs: parse_duration_secs(&route.duration)?,
        geo_points: decode_geo_points(&route.polyline.encoded_polyline)?,
    })
}

/// Durations come back as protobuf JSON strings, e.g. `"165s"`.
fn parse_duration_secs(raw: &str) -> Result<u32> {
    let trimmed = raw.strip_suffix('s').unwrap_or(raw);
    let seconds: f64 =
        trimmed.parse().with_context(|| format!("unparseable duration {raw:?}"))?;
    if !seconds.is_finite() || seconds < 0.0 {
        bail!("unparseable duration {raw:?}");
    }
    Ok(seconds.round() as u32)
}

fn decode_geo_points(encoded: &str) -> Result<Vec<GeoPoint>> {
    let line = polyline::decode_polyline(encoded, POLYLINE_PRECISION)
        .map_err(|err| anyhow::anyhow!("failed to decode polyline: {err}"))?;
    // geo coords are (x = longitude, y = latitude)
    Ok(line.0.into_iter().map(|coord| GeoPoint(coord.y, coord.x)).collect())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_protobuf_durations() {
        assert_eq!(parse_duration_secs("165s").expect("should parse"), 165);
        assert_eq!(parse_duration_secs("0s").expect("should parse"), 0);
        assert_eq!(parse_duration_secs("12.4s").expect("should parse"), 12);
        parse_duration_secs("fast").expect_err("should reject");
        parse_duration_secs("-5s").expect_err("should reject");
    }

    #[test]
    fn decodes_polyline_geometry() {
        let points =
            decode_geo_points("_p~iF~ps|U_ulLnnqC_mqNvxq`@").expect("should decode");
        let expected = [(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)];
        assert_eq!(points.len(), expected.len());
        for (point, (latitude, longitude)) in points.iter().zip(expected) {
            assert!((point.latitude() - latitude).abs() < 1e-9);
            assert!((point.longitude() - longitude).abs() < 1e-9);
        }
    }

    #[test]
    fn successful_response_becomes_a_leg() {
        let payload: ComputeRoutesResponse = serde_json::from_str(
            r#"{
                "routes": [{
                    "distanceMeters": 1828,
                    "duration": "243s",
                    "polyline": {"encodedPolyline": "_p~iF~ps|U_ulLnnqC"}
                }]
            }"#,
        )
        .expect("should deserialize");

        let leg = into_leg(payload).expect("should convert");
        assert_eq!(leg.distance_meters, 1828);
        assert_eq!(leg.travel_time_secs, 243);
        assert_eq!(leg.geo_points.len(), 2);
    }

    #[test]
    fn api_error_payload_fails() {
        let payload: ComputeRoutesResponse = serde_json::from_str(
            r#"{"error": {"code": 403, "message": "The provided API key is invalid.", "status": "PERMISSION_DENIED"}}"#,
        )
        .expect("should deserialize");

        let err = into_leg(payload).expect_err("should fail");
        assert!(err.to_string().contains("API key"));
    }

    #[test]
    fn empty_route_list_fails() {
        let payload: ComputeRoutesResponse =
            serde_json::from_str(r#"{"routes": []}"#).expect("should deserialize");

        into_leg(payload).expect_err("should fail");
    }
}
