//! OSRM HTTP routing backend.
//!
//! Speaks the `route/v1/driving` API with `geometries=polyline`, which keeps
//! responses compact and exercises the shared polyline codec.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::Deserialize;

use crate::geo::Coordinate;

use super::{polyline, RouteError, RouteEstimate, RouteProvider};

impl From<reqwest::Error> for RouteError {
    fn from(err: reqwest::Error) -> Self {
        RouteError::Transport(err.to_string())
    }
}

/// Routes via an OSRM HTTP endpoint.
pub struct OsrmRouteProvider {
    client: Client,
    endpoint: String,
}

impl OsrmRouteProvider {
    pub fn new(endpoint: &str) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn route_url(&self, from: Coordinate, to: Coordinate) -> String {
        // OSRM takes lng,lat pairs
        format!(
            "{}/route/v1/driving/{},{};{},{}?overview=full&geometries=polyline",
            self.endpoint, from.longitude, from.latitude, to.longitude, to.latitude,
        )
    }
}

/// Minimal OSRM JSON response structures.
#[derive(Debug, Deserialize)]
struct OsrmResponse {
    code: String,
    message: Option<String>,
    routes: Option<Vec<OsrmRoute>>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    distance: f64, // metres
    duration: f64, // seconds
    geometry: String,
}

impl RouteProvider for OsrmRouteProvider {
    fn route(&self, from: Coordinate, to: Coordinate) -> Result<RouteEstimate, RouteError> {
        let url = self.route_url(from, to);
        let response: OsrmResponse = self.client.get(&url).send()?.json()?;
        extract_route(response)
    }
}

/// Turn a decoded OSRM payload into a [`RouteEstimate`].
fn extract_route(response: OsrmResponse) -> Result<RouteEstimate, RouteError> {
    if response.code != "Ok" {
        let detail = match response.message {
            Some(message) => message,
            None => response.code,
        };
        return Err(RouteError::Api(detail));
    }

    let route = response
        .routes
        .and_then(|routes| routes.into_iter().next())
        .ok_or(RouteError::NoRoute)?;

    let points =
        polyline::decode(&route.geometry).map_err(|err| RouteError::Api(err.to_string()))?;

    Ok(RouteEstimate {
        distance_m: route.distance,
        duration_secs: route.duration,
        polyline: points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded_geometry() -> String {
        let points = vec![
            Coordinate::new(13.6929, -89.2182).expect("valid"),
            Coordinate::new(13.6950, -89.2150).expect("valid"),
        ];
        polyline::encode(&points)
    }

    #[test]
    fn extracts_distance_duration_and_geometry() {
        let response = OsrmResponse {
            code: "Ok".to_string(),
            message: None,
            routes: Some(vec![OsrmRoute {
                distance: 1200.0,
                duration: 240.0,
                geometry: encoded_geometry(),
            }]),
        };

        let estimate = extract_route(response).expect("route");
        assert_eq!(estimate.distance_m, 1200.0);
        assert_eq!(estimate.duration_secs, 240.0);
        assert_eq!(estimate.polyline.len(), 2);
        assert!((estimate.polyline[0].latitude - 13.6929).abs() < 1e-9);
    }

    #[test]
    fn non_ok_code_maps_to_api_error() {
        let response = OsrmResponse {
            code: "NoSegment".to_string(),
            message: Some("Could not find a matching segment".to_string()),
            routes: None,
        };

        match extract_route(response) {
            Err(RouteError::Api(detail)) => {
                assert!(detail.contains("matching segment"));
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn ok_code_without_routes_is_no_route() {
        let response = OsrmResponse {
            code: "Ok".to_string(),
            message: None,
            routes: Some(Vec::new()),
        };
        assert!(matches!(extract_route(response), Err(RouteError::NoRoute)));
    }

    #[test]
    fn parses_the_wire_format() {
        let body = serde_json::json!({
            "code": "Ok",
            "routes": [
                {"distance": 1200.0, "duration": 240.0, "geometry": encoded_geometry()}
            ],
            "waypoints": []
        })
        .to_string();

        let response: OsrmResponse = serde_json::from_str(&body).expect("parse");
        assert_eq!(response.code, "Ok");
        let estimate = extract_route(response).expect("route");
        assert_eq!(estimate.distance_m, 1200.0);
    }

    #[test]
    fn url_puts_longitude_first() {
        let provider = OsrmRouteProvider::new("http://localhost:5000/");
        let from = Coordinate::new(13.6929, -89.2182).expect("valid");
        let to = Coordinate::new(13.70, -89.20).expect("valid");

        let url = provider.route_url(from, to);
        assert!(url.starts_with("http://localhost:5000/route/v1/driving/-89.2182,13.6929;-89.2,13.7?"));
        assert!(url.contains("geometries=polyline"));
    }
}
