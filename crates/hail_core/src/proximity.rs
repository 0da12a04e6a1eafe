//! Nearest-driver selection and debounced pickup estimation.
//!
//! [`select_nearest`] is the pure scoring rule; [`ProximityEstimator`] layers
//! route lookup and fare math on top of it. [`EstimateScheduler`] owns the
//! debounce window and the sequence gate that drops superseded answers.

use std::collections::HashMap;

use serde::Serialize;

use crate::candidates::{DriverCandidate, DEFAULT_FRESHNESS_WINDOW_MS};
use crate::geo::{haversine_km, Coordinate};
use crate::pricing::PricingConfig;
use crate::routing::{straight_line_estimate, RouteError, RouteEstimate, RouteProvider};
use crate::timer::DebounceQueue;

/// Debounce window applied to estimate requests, in milliseconds.
pub const DEFAULT_DEBOUNCE_MS: u64 = 600;

// ---------------------------------------------------------------------------
// Nearest driver
// ---------------------------------------------------------------------------

/// Pick the eligible driver with the smallest great-circle distance to
/// `pickup`. Returns `None` when nobody qualifies; ties keep the first
/// candidate encountered.
pub fn select_nearest<'a, I>(
    pickup: Coordinate,
    candidates: I,
    now_ms: u64,
    freshness_window_ms: u64,
) -> Option<&'a DriverCandidate>
where
    I: IntoIterator<Item = &'a DriverCandidate>,
{
    let mut best: Option<(&DriverCandidate, f64)> = None;

    for candidate in candidates {
        if !candidate.is_eligible(now_ms, freshness_window_ms) {
            continue;
        }
        let Some(location) = candidate.location else {
            continue;
        };
        let distance_km = haversine_km(location, pickup);

        match best {
            None => best = Some((candidate, distance_km)),
            Some((_, best_km)) if distance_km < best_km => {
                best = Some((candidate, distance_km))
            }
            _ => {}
        }
    }

    best.map(|(candidate, _)| candidate)
}

// ---------------------------------------------------------------------------
// Route-backed estimates
// ---------------------------------------------------------------------------

/// Where a returned route came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteSource {
    /// The configured provider answered.
    Provider,
    /// The provider failed; distance is great-circle and duration is the
    /// fixed fallback.
    StraightLineFallback,
}

/// Route-backed pickup estimate for the selected driver.
#[derive(Debug, Clone, Serialize)]
pub struct PickupEstimate {
    pub driver_id: String,
    /// Great-circle distance from the driver to the pickup point, km.
    pub straight_line_km: f64,
    pub route: RouteEstimate,
    pub source: RouteSource,
}

/// Priced route between two points.
#[derive(Debug, Clone, Serialize)]
pub struct TripQuote {
    pub route: RouteEstimate,
    pub source: RouteSource,
    /// Rider-facing amount under the config the quote was priced with.
    pub fare: f64,
}

/// Routes pickups and trips against a provider, falling back to great-circle
/// estimates when the provider cannot answer.
pub struct ProximityEstimator {
    provider: Box<dyn RouteProvider>,
    freshness_window_ms: u64,
}

impl ProximityEstimator {
    pub fn new(provider: Box<dyn RouteProvider>) -> Self {
        Self {
            provider,
            freshness_window_ms: DEFAULT_FRESHNESS_WINDOW_MS,
        }
    }

    pub fn with_freshness_window_ms(mut self, window_ms: u64) -> Self {
        self.freshness_window_ms = window_ms;
        self
    }

    /// Raw provider call, surfacing the provider's own error.
    pub fn estimate_route(
        &self,
        from: Coordinate,
        to: Coordinate,
    ) -> Result<RouteEstimate, RouteError> {
        self.provider.route(from, to)
    }

    /// Provider call that degrades to a great-circle estimate instead of
    /// failing. The source tells callers which answer they got.
    pub fn route_or_fallback(&self, from: Coordinate, to: Coordinate) -> (RouteEstimate, RouteSource) {
        match self.provider.route(from, to) {
            Ok(route) => (route, RouteSource::Provider),
            Err(err) => {
                log::warn!("route {from:?} -> {to:?} unavailable ({err}); using straight-line fallback");
                (
                    straight_line_estimate(from, to),
                    RouteSource::StraightLineFallback,
                )
            }
        }
    }

    /// Select the nearest eligible driver and route them to the pickup
    /// point. `None` means nobody in `candidates` qualifies right now.
    pub fn estimate_pickup<'a, I>(
        &self,
        pickup: Coordinate,
        candidates: I,
        now_ms: u64,
    ) -> Option<PickupEstimate>
    where
        I: IntoIterator<Item = &'a DriverCandidate>,
    {
        let driver = select_nearest(pickup, candidates, now_ms, self.freshness_window_ms)?;
        let location = driver.location?;
        let (route, source) = self.route_or_fallback(location, pickup);
        Some(PickupEstimate {
            driver_id: driver.id.clone(),
            straight_line_km: haversine_km(location, pickup),
            route,
            source,
        })
    }

    /// Route a trip and price it under `pricing`.
    pub fn estimate_trip(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        pricing: &PricingConfig,
    ) -> TripQuote {
        let (route, source) = self.route_or_fallback(origin, destination);
        let fare = pricing.estimate_fare(route.distance_m);
        TripQuote { route, source, fare }
    }
}

// ---------------------------------------------------------------------------
// Debounce and sequence gate
// ---------------------------------------------------------------------------

/// A provider answer arrived for a superseded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleResponse {
    pub expected_seq: u64,
    pub got_seq: u64,
}

impl std::fmt::Display for StaleResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "stale response: got seq {}, newest is {}",
            self.got_seq, self.expected_seq
        )
    }
}

impl std::error::Error for StaleResponse {}

/// Origin/destination pair an estimate was asked for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateRequest {
    pub origin: Coordinate,
    pub destination: Coordinate,
}

/// A debounced request that is now due, stamped with its sequence number.
#[derive(Debug, Clone, PartialEq)]
pub struct EstimateJob {
    pub key: String,
    pub seq: u64,
    pub request: EstimateRequest,
}

/// Debounces estimate requests per key and discards superseded answers.
///
/// Hosts drive it with their own clock: `request` on every input change,
/// `due_jobs` once `next_deadline` passes, `admit` before applying a
/// provider answer.
pub struct EstimateScheduler {
    debounce_ms: u64,
    queue: DebounceQueue<String, EstimateRequest>,
    latest_seq: HashMap<String, u64>,
    next_seq: u64,
}

impl EstimateScheduler {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            queue: DebounceQueue::new(),
            latest_seq: HashMap::new(),
            next_seq: 1,
        }
    }

    pub fn debounce_ms(&self) -> u64 {
        self.debounce_ms
    }

    /// Register an input change. Any pending request under the same key is
    /// superseded.
    pub fn request(&mut self, key: &str, now_ms: u64, request: EstimateRequest) {
        self.queue
            .schedule(key.to_owned(), now_ms, self.debounce_ms, request);
    }

    /// Drop the pending request for `key`, if any.
    pub fn cancel(&mut self, key: &str) -> bool {
        self.queue.cancel(key)
    }

    /// Requests whose debounce window has closed at `now_ms`, stamped with
    /// the sequence number their answers must carry.
    pub fn due_jobs(&mut self, now_ms: u64) -> Vec<EstimateJob> {
        self.queue
            .pop_due(now_ms)
            .into_iter()
            .map(|job| {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.latest_seq.insert(job.key.clone(), seq);
                EstimateJob {
                    key: job.key,
                    seq,
                    request: job.payload,
                }
            })
            .collect()
    }

    /// Accept an answer only if it carries the newest sequence issued for
    /// `key`.
    pub fn admit(&self, key: &str, seq: u64) -> Result<(), StaleResponse> {
        match self.latest_seq.get(key) {
            Some(&expected) if seq == expected => Ok(()),
            Some(&expected) => {
                log::debug!("discarding stale estimate for {key}: seq {seq}, newest {expected}");
                Err(StaleResponse {
                    expected_seq: expected,
                    got_seq: seq,
                })
            }
            None => Err(StaleResponse {
                expected_seq: 0,
                got_seq: seq,
            }),
        }
    }

    /// Earliest moment a pending request becomes due.
    pub fn next_deadline(&mut self) -> Option<u64> {
        self.queue.next_deadline()
    }

    /// Number of keys with a pending request.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl Default for EstimateScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE_MS)
    }
}
