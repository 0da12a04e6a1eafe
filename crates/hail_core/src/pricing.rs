//! Distance-based fares, market presets, and receipt settlement.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Fare configuration
// ---------------------------------------------------------------------------

/// Distance-based fare settings for one market.
///
/// Fares follow `max(minimum_fare, base_price + max(0, km - included_km) *
/// price_per_extra_km)`, rounded to whole cents before the floor is applied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Flat amount charged on every trip.
    pub base_price: f64,
    /// Distance already covered by the base price, in kilometers.
    pub included_km: f64,
    /// Rate applied to each kilometer beyond the included distance.
    pub price_per_extra_km: f64,
    /// Lower bound on the final fare.
    pub minimum_fare: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            base_price: 2.00,
            included_km: 3.0,
            price_per_extra_km: 0.50,
            minimum_fare: 2.00,
        }
    }
}

impl PricingConfig {
    /// Fare table the first rider screens shipped with. Retired in favor of
    /// per-market configs; kept so fare parity against historic receipts can
    /// still be checked.
    pub fn legacy_screen() -> Self {
        Self {
            base_price: 2.00,
            included_km: 5.0,
            price_per_extra_km: 0.50,
            minimum_fare: 2.00,
        }
    }

    /// Price a trip of `distance_m` meters.
    ///
    /// Returns the rider-facing amount in currency units, rounded to cents.
    pub fn estimate_fare(&self, distance_m: f64) -> f64 {
        let km = distance_m / 1000.0;
        let extra_km = (km - self.included_km).max(0.0);
        let metered = self.base_price + extra_km * self.price_per_extra_km;
        round_cents(metered).max(self.minimum_fare)
    }
}

/// Round a currency amount to whole cents, halves away from zero.
pub fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Launch markets
// ---------------------------------------------------------------------------

/// Pricing bundle for one launch market.
#[derive(Debug, Clone, Copy)]
pub struct MarketPricing {
    pub market: &'static str,
    pub currency: &'static str,
    pub config: PricingConfig,
}

/// Fare tables for the markets the service operates in. `SV` doubles as the
/// default config.
pub const MARKET_PRESETS: &[MarketPricing] = &[
    MarketPricing {
        market: "SV",
        currency: "USD",
        config: PricingConfig {
            base_price: 2.00,
            included_km: 3.0,
            price_per_extra_km: 0.50,
            minimum_fare: 2.00,
        },
    },
    MarketPricing {
        market: "US-NY",
        currency: "USD",
        config: PricingConfig {
            base_price: 3.50,
            included_km: 2.0,
            price_per_extra_km: 1.20,
            minimum_fare: 4.00,
        },
    },
    MarketPricing {
        market: "MX",
        currency: "MXN",
        config: PricingConfig {
            base_price: 50.00,
            included_km: 3.0,
            price_per_extra_km: 15.00,
            minimum_fare: 50.00,
        },
    },
    MarketPricing {
        market: "ES",
        currency: "EUR",
        config: PricingConfig {
            base_price: 2.50,
            included_km: 2.5,
            price_per_extra_km: 0.80,
            minimum_fare: 3.00,
        },
    },
];

/// Look up a market by its code, ignoring case. Unknown codes fall back to a
/// USD market with the default fare table.
pub fn find_market(code: &str) -> MarketPricing {
    MARKET_PRESETS
        .iter()
        .copied()
        .find(|preset| preset.market.eq_ignore_ascii_case(code))
        .unwrap_or(MarketPricing {
            market: "default",
            currency: "USD",
            config: PricingConfig {
                base_price: 2.00,
                included_km: 3.0,
                price_per_extra_km: 0.50,
                minimum_fare: 2.00,
            },
        })
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

/// Line items for a settled trip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Receipt {
    pub base_fare: f64,
    pub tip: f64,
    pub discount: f64,
    pub total: f64,
}

impl Receipt {
    /// Settle a fare with a tip and a promotional discount, both given as
    /// fractions of the base fare. Each line is rounded to cents on its own
    /// and the total never goes below zero.
    pub fn compute(base_fare: f64, tip_rate: f64, discount_rate: f64) -> Self {
        let base_fare = round_cents(base_fare);
        let tip = round_cents(base_fare * tip_rate);
        let discount = round_cents(base_fare * discount_rate);
        let total = round_cents(base_fare + tip - discount).max(0.0);
        Receipt {
            base_fare,
            tip,
            discount,
            total,
        }
    }
}
