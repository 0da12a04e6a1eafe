use std::sync::Arc;

use hail_core::candidates::{CandidatePool, DriverCandidate};
use hail_core::geo::haversine_km;
use hail_core::pricing::PricingConfig;
use hail_core::proximity::{select_nearest, ProximityEstimator, RouteSource};
use hail_core::routing::FALLBACK_DURATION_SECS;
use hail_core::test_helpers::{self, FailingRouteProvider, StubRouteProvider};

const NOW_MS: u64 = 1_700_000_000_000;
const DAY_MS: u64 = 24 * 60 * 60 * 1000;

#[test]
fn nearest_driver_wins_by_great_circle_distance() {
    let pickup = test_helpers::pickup_point();
    let fleet = vec![
        test_helpers::driver("d1", 13.69, -89.21, NOW_MS),
        test_helpers::driver("d2", 13.70, -89.22, NOW_MS),
    ];

    let picked = select_nearest(pickup, &fleet, NOW_MS, DAY_MS).expect("driver");
    assert_eq!(picked.id, "d2");

    let winner_km = haversine_km(picked.location.expect("located"), pickup);
    for candidate in &fleet {
        let km = haversine_km(candidate.location.expect("located"), pickup);
        assert!(winner_km <= km, "{} is closer than the winner", candidate.id);
    }
}

#[test]
fn unavailable_missing_or_stale_drivers_never_win() {
    let pickup = test_helpers::pickup_point();

    let mut offline = test_helpers::driver("offline", 13.6930, -89.2183, NOW_MS);
    offline.is_available = false;
    let mut unlocated = test_helpers::driver("unlocated", 13.6930, -89.2183, NOW_MS);
    unlocated.location = None;
    let stale = test_helpers::driver("stale", 13.6930, -89.2183, NOW_MS - DAY_MS - 1);
    let far = test_helpers::driver("far", 13.74, -89.15, NOW_MS);

    let fleet = vec![offline, unlocated, stale, far];
    let picked = select_nearest(pickup, &fleet, NOW_MS, DAY_MS).expect("driver");
    assert_eq!(picked.id, "far");
}

#[test]
fn empty_and_fully_ineligible_sets_return_none() {
    let pickup = test_helpers::pickup_point();

    let nobody: Vec<DriverCandidate> = Vec::new();
    assert!(select_nearest(pickup, &nobody, NOW_MS, DAY_MS).is_none());

    let all_stale = vec![test_helpers::driver("ghost", 13.70, -89.22, 0)];
    assert!(select_nearest(pickup, &all_stale, NOW_MS, DAY_MS).is_none());
}

#[test]
fn pickup_estimate_uses_road_route_from_provider() {
    let stub = Arc::new(StubRouteProvider::new(1_200.0, 240.0));
    let estimator = ProximityEstimator::new(Box::new(Arc::clone(&stub)));

    let fleet = vec![
        test_helpers::driver("d1", 13.69, -89.21, NOW_MS),
        test_helpers::driver("d2", 13.70, -89.22, NOW_MS),
    ];
    let estimate = estimator
        .estimate_pickup(test_helpers::pickup_point(), &fleet, NOW_MS)
        .expect("estimate");

    assert_eq!(estimate.driver_id, "d2");
    assert_eq!(estimate.source, RouteSource::Provider);
    assert_eq!(estimate.route.distance_m, 1_200.0);
    assert_eq!(estimate.route.duration_secs, 240.0);
    assert!(estimate.straight_line_km < 1.0);
    assert_eq!(stub.calls(), 1);
}

#[test]
fn provider_failure_falls_back_to_straight_line_and_default_duration() {
    let estimator = ProximityEstimator::new(Box::new(FailingRouteProvider));
    let origin = test_helpers::pickup_point();
    let destination = test_helpers::point(13.70, -89.22);

    let (route, source) = estimator.route_or_fallback(origin, destination);
    assert_eq!(source, RouteSource::StraightLineFallback);
    assert_eq!(route.duration_secs, FALLBACK_DURATION_SECS);

    let expected_m = haversine_km(origin, destination) * 1000.0;
    assert!((route.distance_m - expected_m).abs() < 1e-6);
    assert_eq!(route.polyline, vec![origin, destination]);
}

#[test]
fn trip_quote_prices_route_distance_with_market_config() {
    let stub = Arc::new(StubRouteProvider::new(8_000.0, 600.0));
    let estimator = ProximityEstimator::new(Box::new(Arc::clone(&stub)));

    let quote = estimator.estimate_trip(
        test_helpers::pickup_point(),
        test_helpers::point(13.70, -89.17),
        &PricingConfig::default(),
    );

    assert_eq!(quote.source, RouteSource::Provider);
    assert_eq!(quote.fare, 4.50);
}

#[test]
fn pool_snapshot_feeds_the_estimator() {
    let mut pool = CandidatePool::new();
    pool.load_snapshot(vec![
        test_helpers::active_driver_row("d1", 13.69, -89.21, NOW_MS),
        test_helpers::active_driver_row("d2", 13.70, -89.22, NOW_MS),
        test_helpers::active_driver_row("outskirts", 13.83, -89.05, NOW_MS),
    ]);

    let estimator = ProximityEstimator::new(Box::new(StubRouteProvider::new(1_200.0, 240.0)));
    let estimate = estimator
        .estimate_pickup(test_helpers::pickup_point(), pool.eligible(NOW_MS), NOW_MS)
        .expect("estimate");

    assert_eq!(estimate.driver_id, "d2");
}
