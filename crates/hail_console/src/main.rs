use std::error::Error;
use std::fs;
use std::process::exit;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use hail_core::candidates::{CandidatePool, DriverStatus, DriverUpdate};
use hail_core::connection::{
    ConnectionContext, ConnectionManager, ConnectionMode, PollingConfig, RealtimeTransport, Role,
    SubscriptionHandle, TransportError,
};
use hail_core::geo::Coordinate;
use hail_core::pricing::{find_market, PricingConfig, Receipt, MARKET_PRESETS};
use hail_core::proximity::{PickupEstimate, ProximityEstimator, RouteSource, TripQuote};
use hail_core::routing::{build_route_provider, polyline, RouteProviderKind};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "hail_console",
    about = "Console for the ride-hailing estimation core",
    long_about = "Drives driver proximity estimates, fare quotes, and realtime\n\
                  session prioritization from scenario files or built-in demo data."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate pickup and trip fare for a scenario
    Estimate {
        /// Scenario JSON file; omit to use the built-in San Salvador demo
        #[arg(long)]
        scenario: Option<String>,
        /// Market code for the fare table
        #[arg(long, default_value = "SV")]
        market: String,
        /// OSRM endpoint, e.g. http://localhost:5000
        #[arg(long, env = "OSRM_ENDPOINT")]
        osrm: Option<String>,
        /// Tip percentage applied to the receipt
        #[arg(long, default_value_t = 10.0)]
        tip_pct: f64,
        /// Restrict candidates to a cell disk of this radius around the pickup
        #[arg(long)]
        radius_cells: Option<u32>,
        /// Print the estimate as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Replay a realtime session script and print the connection book
    Sessions {
        /// Session script JSON file; omit to use the built-in demo script
        #[arg(long)]
        script: Option<String>,
        /// Realtime connection cap
        #[arg(long, default_value_t = 2)]
        cap: usize,
    },
    /// Print the launch-market fare tables
    Markets,
}

// ── scenario input ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Scenario {
    pickup: Coordinate,
    destination: Coordinate,
    drivers: Vec<DriverUpdate>,
    /// Overrides the market fare table when present.
    #[serde(default)]
    pricing: Option<PricingConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum SessionStep {
    Connect {
        user_id: String,
        #[serde(flatten)]
        context: ConnectionContext,
    },
    UpdateContext {
        user_id: String,
        #[serde(flatten)]
        context: ConnectionContext,
    },
    Disconnect {
        user_id: String,
    },
    Rebalance,
}

fn load_scenario(path: Option<&str>) -> Result<Scenario, Box<dyn Error>> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(demo_scenario()),
    }
}

fn load_script(path: Option<&str>) -> Result<Vec<SessionStep>, Box<dyn Error>> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(demo_script()),
    }
}

/// Pickup outside Metrocentro, drop-off near Paseo General Escalón.
fn demo_scenario() -> Scenario {
    Scenario {
        pickup: demo_point(13.6929, -89.2182),
        destination: demo_point(13.7011, -89.2247),
        drivers: vec![
            demo_driver("metrocentro-1", 13.7000, -89.2200, true),
            demo_driver("escalon-2", 13.6900, -89.2100, true),
            demo_driver("sanbenito-3", 13.6750, -89.2390, true),
            demo_driver("resting-4", 13.6980, -89.2160, false),
        ],
        pricing: None,
    }
}

fn demo_script() -> Vec<SessionStep> {
    let riding_rider = ConnectionContext {
        role: Role::Rider,
        has_active_ride: true,
        is_available: false,
        is_searching: false,
    };
    let riding_driver = ConnectionContext {
        role: Role::Driver,
        has_active_ride: true,
        is_available: false,
        is_searching: false,
    };
    let idle_rider = ConnectionContext {
        role: Role::Rider,
        has_active_ride: false,
        is_available: false,
        is_searching: false,
    };

    vec![
        SessionStep::Connect {
            user_id: "rider-ana".into(),
            context: riding_rider,
        },
        SessionStep::Connect {
            user_id: "rider-beto".into(),
            context: riding_rider,
        },
        SessionStep::Connect {
            user_id: "driver-carla".into(),
            context: riding_driver,
        },
        SessionStep::Rebalance,
        SessionStep::Disconnect {
            user_id: "rider-ana".into(),
        },
        SessionStep::Rebalance,
        SessionStep::UpdateContext {
            user_id: "rider-beto".into(),
            context: idle_rider,
        },
        SessionStep::Rebalance,
    ]
}

fn demo_point(latitude: f64, longitude: f64) -> Coordinate {
    Coordinate {
        latitude,
        longitude,
    }
}

fn demo_driver(id: &str, latitude: f64, longitude: f64, is_available: bool) -> DriverUpdate {
    DriverUpdate {
        id: id.to_owned(),
        location: Some(demo_point(latitude, longitude)),
        status: DriverStatus::Active,
        is_available,
        updated_at_ms: 0,
    }
}

// ── estimate ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct EstimateSummary {
    market: String,
    currency: String,
    pickup: PickupEstimate,
    trip: TripQuote,
    receipt: Receipt,
}

fn run_estimate(
    scenario_path: Option<&str>,
    market_code: &str,
    osrm: Option<String>,
    tip_pct: f64,
    radius_cells: Option<u32>,
    json: bool,
) -> Result<(), Box<dyn Error>> {
    let scenario = load_scenario(scenario_path)?;
    let now_ms = wall_clock_ms();

    let mut pool = CandidatePool::new();
    pool.load_snapshot(scenario.drivers.into_iter().map(|mut row| {
        if row.updated_at_ms == 0 {
            row.updated_at_ms = now_ms;
        }
        row
    }));

    let market = find_market(market_code);
    let config = scenario.pricing.unwrap_or(market.config);

    let kind = provider_kind(osrm);
    let estimator = ProximityEstimator::new(build_route_provider(&kind));

    let candidates = match radius_cells {
        Some(k) => pool.in_cell_disk(scenario.pickup, k),
        None => pool.eligible(now_ms),
    };
    log::info!("{} candidate drivers in play", candidates.len());

    let Some(pickup) = estimator.estimate_pickup(scenario.pickup, candidates, now_ms) else {
        println!("no eligible driver nearby right now");
        return Ok(());
    };

    let trip = estimator.estimate_trip(scenario.pickup, scenario.destination, &config);
    let receipt = Receipt::compute(trip.fare, tip_pct / 100.0, 0.0);

    log::debug!("trip geometry: {}", polyline::encode(&trip.route.polyline));

    if json {
        let summary = EstimateSummary {
            market: market.market.to_owned(),
            currency: market.currency.to_owned(),
            pickup,
            trip,
            receipt,
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "driver {}: {:.2} km away ({:.2} km straight-line), eta {:.0}s{}",
        pickup.driver_id,
        pickup.route.distance_km(),
        pickup.straight_line_km,
        pickup.route.duration_secs,
        source_note(pickup.source),
    );
    println!(
        "trip: {:.2} km, {:.0}s{}",
        trip.route.distance_km(),
        trip.route.duration_secs,
        source_note(trip.source),
    );
    println!(
        "fare: {:.2} {} (tip {:.2}, total {:.2})",
        receipt.base_fare, market.currency, receipt.tip, receipt.total
    );
    Ok(())
}

fn source_note(source: RouteSource) -> &'static str {
    match source {
        RouteSource::Provider => "",
        RouteSource::StraightLineFallback => " [straight-line fallback]",
    }
}

#[cfg(feature = "osrm")]
fn provider_kind(osrm: Option<String>) -> RouteProviderKind {
    match osrm {
        Some(endpoint) => RouteProviderKind::Osrm { endpoint },
        None => RouteProviderKind::StraightLine,
    }
}

#[cfg(not(feature = "osrm"))]
fn provider_kind(osrm: Option<String>) -> RouteProviderKind {
    if osrm.is_some() {
        log::warn!("built without the osrm feature; --osrm ignored");
    }
    RouteProviderKind::StraightLine
}

// ── sessions ───────────────────────────────────────────────────────

/// Transport that only logs; good enough to watch the prioritizer work.
#[derive(Debug, Default)]
struct LoggingTransport {
    next_handle: u64,
}

impl RealtimeTransport for LoggingTransport {
    fn subscribe(&mut self, channel: &str) -> Result<SubscriptionHandle, TransportError> {
        let handle = SubscriptionHandle(self.next_handle);
        self.next_handle += 1;
        log::info!("subscribed to {channel} (handle {})", handle.0);
        Ok(handle)
    }

    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        log::info!("unsubscribed handle {}", handle.0);
    }
}

fn run_sessions(script_path: Option<&str>, cap: usize) -> Result<(), Box<dyn Error>> {
    let steps = load_script(script_path)?;
    let mut manager =
        ConnectionManager::new(Box::new(LoggingTransport::default())).with_capacity(cap);

    for step in steps {
        match step {
            SessionStep::Connect { user_id, context } => {
                let mode = manager.connect_user(&user_id, context).mode;
                println!(
                    "connect {user_id:<14} -> {}",
                    mode_label(manager.polling(), mode)
                );
            }
            SessionStep::UpdateContext { user_id, context } => {
                if !manager.update_context(&user_id, context) {
                    log::warn!("update for unknown user {user_id}");
                }
            }
            SessionStep::Disconnect { user_id } => {
                manager.disconnect_user(&user_id);
                println!("disconnect {user_id}");
            }
            SessionStep::Rebalance => {
                manager.rebalance();
                println!("rebalance");
                print_slots(&manager);
            }
        }
    }

    println!();
    print_slots(&manager);
    Ok(())
}

fn print_slots(manager: &ConnectionManager) {
    println!("{:<14} {:>8}  {}", "user", "priority", "mode");
    for slot in manager.slots() {
        println!(
            "{:<14} {:>8}  {}",
            slot.user_id,
            format!("{:?}", slot.priority),
            mode_label(manager.polling(), slot.mode)
        );
    }
    let stats = manager.stats();
    println!(
        "{}/{} realtime, {} polling, {} total",
        stats.active_connections, stats.max_connections, stats.polling_users, stats.total_users
    );
}

fn mode_label(polling: &PollingConfig, mode: ConnectionMode) -> String {
    match polling.poll_interval_ms(mode) {
        None => "realtime".to_owned(),
        Some(interval_ms) => format!("poll every {}s", interval_ms / 1000),
    }
}

// ── markets ────────────────────────────────────────────────────────

fn run_markets() {
    println!(
        "{:<8} {:<9} {:>6} {:>12} {:>14} {:>8}",
        "market", "currency", "base", "included km", "per extra km", "minimum"
    );
    for preset in MARKET_PRESETS {
        let config = preset.config;
        println!(
            "{:<8} {:<9} {:>6.2} {:>12.1} {:>14.2} {:>8.2}",
            preset.market,
            preset.currency,
            config.base_price,
            config.included_km,
            config.price_per_extra_km,
            config.minimum_fare
        );
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn wall_clock_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Estimate {
            scenario,
            market,
            osrm,
            tip_pct,
            radius_cells,
            json,
        } => run_estimate(scenario.as_deref(), &market, osrm, tip_pct, radius_cells, json),
        Commands::Sessions { script, cap } => run_sessions(script.as_deref(), cap),
        Commands::Markets => {
            run_markets();
            Ok(())
        }
    };

    if let Err(error) = result {
        log::error!("{error}");
        exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_steps_parse_from_script_json() {
        let text = r#"[
            {"op": "connect", "user_id": "rider-ana", "role": "rider", "has_active_ride": true},
            {"op": "update_context", "user_id": "rider-ana", "role": "rider"},
            {"op": "disconnect", "user_id": "rider-ana"},
            {"op": "rebalance"}
        ]"#;

        let steps: Vec<SessionStep> = serde_json::from_str(text).expect("parse");
        assert_eq!(steps.len(), 4);
        match &steps[0] {
            SessionStep::Connect { user_id, context } => {
                assert_eq!(user_id, "rider-ana");
                assert!(context.has_active_ride);
            }
            other => panic!("expected connect, got {other:?}"),
        }
    }

    #[test]
    fn demo_scenario_filters_the_resting_driver() {
        let scenario = demo_scenario();
        let mut pool = CandidatePool::new();
        pool.load_snapshot(scenario.drivers.into_iter().map(|mut row| {
            row.updated_at_ms = 1;
            row
        }));

        assert_eq!(pool.len(), 3);
        assert!(pool.get("resting-4").is_none());
    }
}
