//! Test helpers for common test setup and utilities.
//!
//! Shared fixtures (a San Salvador pickup point, driver rows) plus stub
//! implementations of the routing and transport seams.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::candidates::{DriverCandidate, DriverStatus, DriverUpdate};
use crate::connection::{
    ConnectionContext, RealtimeTransport, Role, SubscriptionHandle, TransportError,
};
use crate::geo::Coordinate;
use crate::routing::{RouteError, RouteEstimate, RouteProvider};

/// Latitude of the standard test pickup point, in central San Salvador.
pub const PICKUP_LAT: f64 = 13.6929;

/// Longitude of the standard test pickup point.
pub const PICKUP_LNG: f64 = -89.2182;

/// The standard pickup point used across test files.
///
/// # Panics
///
/// Panics if the constants are out of range (should never happen).
pub fn pickup_point() -> Coordinate {
    point(PICKUP_LAT, PICKUP_LNG)
}

/// Build a coordinate from raw degrees.
///
/// # Panics
///
/// Panics on out-of-range values.
pub fn point(latitude: f64, longitude: f64) -> Coordinate {
    Coordinate::new(latitude, longitude).expect("test coordinate should be valid")
}

/// An available, located driver candidate.
pub fn driver(id: &str, latitude: f64, longitude: f64, last_updated_ms: u64) -> DriverCandidate {
    DriverCandidate {
        id: id.to_owned(),
        location: Some(point(latitude, longitude)),
        is_available: true,
        last_updated_ms,
    }
}

/// An active, available driver row as the backend would publish it.
pub fn active_driver_row(
    id: &str,
    latitude: f64,
    longitude: f64,
    updated_at_ms: u64,
) -> DriverUpdate {
    DriverUpdate {
        id: id.to_owned(),
        location: Some(point(latitude, longitude)),
        status: DriverStatus::Active,
        is_available: true,
        updated_at_ms,
    }
}

/// Rider session context.
pub fn rider_context(has_active_ride: bool, is_searching: bool) -> ConnectionContext {
    ConnectionContext {
        role: Role::Rider,
        has_active_ride,
        is_available: false,
        is_searching,
    }
}

/// Driver session context.
pub fn driver_context(has_active_ride: bool, is_available: bool) -> ConnectionContext {
    ConnectionContext {
        role: Role::Driver,
        has_active_ride,
        is_available,
        is_searching: false,
    }
}

/// Route provider that always answers with a fixed estimate and counts its
/// calls.
pub struct StubRouteProvider {
    estimate: RouteEstimate,
    calls: AtomicUsize,
}

impl StubRouteProvider {
    pub fn new(distance_m: f64, duration_secs: f64) -> Self {
        Self {
            estimate: RouteEstimate {
                distance_m,
                duration_secs,
                polyline: Vec::new(),
            },
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of times `route` was called.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl RouteProvider for StubRouteProvider {
    fn route(&self, from: Coordinate, to: Coordinate) -> Result<RouteEstimate, RouteError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let mut estimate = self.estimate.clone();
        if estimate.polyline.is_empty() {
            estimate.polyline = vec![from, to];
        }
        Ok(estimate)
    }
}

/// Route provider that fails every call.
pub struct FailingRouteProvider;

impl RouteProvider for FailingRouteProvider {
    fn route(&self, _from: Coordinate, _to: Coordinate) -> Result<RouteEstimate, RouteError> {
        Err(RouteError::NoRoute)
    }
}

/// Transport that records every subscribe and unsubscribe for assertions.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    fail_subscribe: bool,
    next_handle: u64,
    pub subscribed: Vec<(SubscriptionHandle, String)>,
    pub unsubscribed: Vec<SubscriptionHandle>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport whose `subscribe` always fails.
    pub fn failing() -> Self {
        Self {
            fail_subscribe: true,
            ..Self::default()
        }
    }

    /// Subscriptions opened and not yet released.
    pub fn live_count(&self) -> usize {
        self.subscribed
            .iter()
            .filter(|(handle, _)| !self.unsubscribed.contains(handle))
            .count()
    }
}

impl RealtimeTransport for RecordingTransport {
    fn subscribe(&mut self, channel: &str) -> Result<SubscriptionHandle, TransportError> {
        if self.fail_subscribe {
            return Err(TransportError::SubscribeFailed("stubbed failure".to_owned()));
        }
        let handle = SubscriptionHandle(self.next_handle);
        self.next_handle += 1;
        self.subscribed.push((handle, channel.to_owned()));
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        self.unsubscribed.push(handle);
    }
}

/// Shared handle so tests can inspect a transport the manager owns.
impl RealtimeTransport for Arc<Mutex<RecordingTransport>> {
    fn subscribe(&mut self, channel: &str) -> Result<SubscriptionHandle, TransportError> {
        match self.lock() {
            Ok(mut transport) => transport.subscribe(channel),
            Err(_) => Err(TransportError::SubscribeFailed("poisoned lock".to_owned())),
        }
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        if let Ok(mut transport) = self.lock() {
            transport.unsubscribe(handle);
        }
    }
}
