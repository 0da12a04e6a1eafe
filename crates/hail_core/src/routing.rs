//! Pluggable route providers: trait abstraction for routing backends.
//!
//! Two implementations, selectable via [`RouteProviderKind`]:
//!
//! - **`StraightLineRouteProvider`**: Haversine distance with a fixed default
//!   duration. Zero dependencies; doubles as the local fallback.
//! - **`OsrmRouteProvider`** (feature `osrm`): Calls a local/remote OSRM HTTP
//!   endpoint and decodes its polyline geometry.
//!
//! The provider is carried as a `Box<dyn RouteProvider>`, constructed from
//! `RouteProviderKind` at the composition root. Estimates are recomputed per
//! request and never cached.

use serde::{Deserialize, Serialize};

use crate::geo::{haversine_m, Coordinate};

pub mod polyline;

#[cfg(feature = "osrm")]
pub mod osrm;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Result of a route query between two coordinates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteEstimate {
    /// Road-network distance in metres.
    pub distance_m: f64,
    /// Travel time in seconds.
    pub duration_secs: f64,
    /// Route geometry, ordered origin to destination.
    pub polyline: Vec<Coordinate>,
}

impl RouteEstimate {
    pub fn distance_km(&self) -> f64 {
        self.distance_m / 1000.0
    }
}

/// Why a provider failed to produce a route.
#[derive(Debug)]
pub enum RouteError {
    /// The provider answered but found no route between the points.
    NoRoute,
    /// The provider answered with an error payload.
    Api(String),
    /// The request never completed (connect, timeout, decode).
    Transport(String),
}

impl std::fmt::Display for RouteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteError::NoRoute => write!(f, "no route between the given points"),
            RouteError::Api(detail) => write!(f, "routing API error: {detail}"),
            RouteError::Transport(detail) => write!(f, "routing transport error: {detail}"),
        }
    }
}

impl std::error::Error for RouteError {}

/// Which routing backend to use. Serializes into scenario files.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub enum RouteProviderKind {
    /// Great-circle estimate, zero external dependencies.
    #[default]
    StraightLine,
    /// OSRM HTTP endpoint (e.g. `"http://localhost:5000"`).
    #[cfg(feature = "osrm")]
    Osrm { endpoint: String },
}

/// Trait for routing backends. Implementations must be `Send + Sync` so a
/// provider can be shared behind the estimator in a threaded host.
pub trait RouteProvider: Send + Sync {
    /// Compute a route between two coordinates.
    fn route(&self, from: Coordinate, to: Coordinate) -> Result<RouteEstimate, RouteError>;
}

impl<T: RouteProvider + ?Sized> RouteProvider for std::sync::Arc<T> {
    fn route(&self, from: Coordinate, to: Coordinate) -> Result<RouteEstimate, RouteError> {
        (**self).route(from, to)
    }
}

// ---------------------------------------------------------------------------
// Straight-line provider (always available)
// ---------------------------------------------------------------------------

/// Duration assumed when no road network was consulted: 30 minutes.
pub const FALLBACK_DURATION_SECS: f64 = 1800.0;

/// Great-circle estimate without going through the trait. Infallible, which
/// is what makes it usable as the fallback of last resort.
pub fn straight_line_estimate(from: Coordinate, to: Coordinate) -> RouteEstimate {
    RouteEstimate {
        distance_m: haversine_m(from, to),
        duration_secs: FALLBACK_DURATION_SECS,
        polyline: vec![from, to],
    }
}

/// Haversine distance, fixed duration, two-point geometry.
pub struct StraightLineRouteProvider;

impl RouteProvider for StraightLineRouteProvider {
    fn route(&self, from: Coordinate, to: Coordinate) -> Result<RouteEstimate, RouteError> {
        Ok(straight_line_estimate(from, to))
    }
}

// ---------------------------------------------------------------------------
// Factory: build a provider from RouteProviderKind
// ---------------------------------------------------------------------------

/// Construct a boxed [`RouteProvider`] from a [`RouteProviderKind`] descriptor.
pub fn build_route_provider(kind: &RouteProviderKind) -> Box<dyn RouteProvider> {
    match kind {
        RouteProviderKind::StraightLine => Box::new(StraightLineRouteProvider),

        #[cfg(feature = "osrm")]
        RouteProviderKind::Osrm { endpoint } => Box::new(osrm::OsrmRouteProvider::new(endpoint)),
    }
}
