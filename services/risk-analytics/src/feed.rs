//! Synthetic price feed
//!
//! Produces one PricePoint per tick interval from a discretized
//! geometric Brownian motion with session-dependent volatility and
//! occasional fat-tail jumps. The random source is a seeded ChaCha8
//! generator so a given seed always replays the same price path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Timelike, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use tokio::time::sleep;
use tracing::info;

use crate::volatility::{PricePoint, VolatilityEngine};

/// Hours (local clock) with the Asian-session volatility multiplier;
/// also the low-liquidity window for the slippage surcharge.
pub fn is_asian_session(hour: u32) -> bool {
    (2..=6).contains(&hour)
}

/// Hours (local clock) with the US-session volatility multiplier.
pub fn is_us_session(hour: u32) -> bool {
    (14..=18).contains(&hour)
}

/// Instrument tracked by the synthetic feed.
pub const FEED_SYMBOL: &str = "BTC-USD";

const SECONDS_PER_DAY: f64 = 86_400.0;
/// Small positive drift per day.
const DRIFT: f64 = 0.0001;
/// Prices never fall below this (keeps the walk positive).
const PRICE_FLOOR: f64 = 1000.0;
/// Probability per tick of a widened (fat-tail) shock.
const JUMP_PROBABILITY: f64 = 0.001;
const JUMP_SCALE: f64 = 5.0;
const ASIAN_SESSION_MULTIPLIER: f64 = 1.5;
const US_SESSION_MULTIPLIER: f64 = 1.2;
/// Moves larger than this fraction of the price are logged.
const SIGNIFICANT_MOVE_FRACTION: f64 = 0.001;

/// Configuration for the synthetic feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Interval between ticks.
    pub tick_interval: Duration,
    /// Base daily volatility before session scaling.
    pub volatility_factor: f64,
    /// RNG seed; a fixed seed replays the same path.
    pub seed: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            volatility_factor: 0.02,
            seed: 42,
        }
    }
}

/// Deterministic GBM tick generator.
pub struct PriceSimulator {
    pub config: FeedConfig,
    rng: ChaCha8Rng,
}

impl PriceSimulator {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
        }
    }

    /// Generate the next tick from the current price.
    ///
    /// `priceChange = price * (drift*dt + vol*sqrt(dt)*shock)` with
    /// `dt` the tick interval as a fraction of a day, the volatility
    /// scaled up during the Asian and US session hours, and the
    /// standard-normal shock widened by 5x with 0.1% probability.
    pub fn next_point(
        &mut self,
        current_price: f64,
        hour: u32,
        timestamp: chrono::DateTime<Utc>,
    ) -> PricePoint {
        let dt = self.config.tick_interval.as_secs_f64() / SECONDS_PER_DAY;

        let mut volatility = self.config.volatility_factor;
        if is_asian_session(hour) {
            volatility *= ASIAN_SESSION_MULTIPLIER;
        } else if is_us_session(hour) {
            volatility *= US_SESSION_MULTIPLIER;
        }

        let mut shock: f64 = self.rng.sample(StandardNormal);
        if self.rng.gen_bool(JUMP_PROBABILITY) {
            shock *= JUMP_SCALE;
        }

        let change = current_price * (DRIFT * dt + volatility * dt.sqrt() * shock);
        let price = (current_price + change).max(PRICE_FLOOR);

        PricePoint {
            price,
            timestamp,
            change,
        }
    }
}

/// Tick loop: append one point per interval until the stop flag is
/// set. The flag is observed at the tick boundary; the loop never
/// terminates on its own.
pub async fn run_price_feed(
    engine: Arc<VolatilityEngine>,
    mut simulator: PriceSimulator,
    stop: Arc<AtomicBool>,
) {
    let interval = simulator.config.tick_interval;
    info!(
        interval_ms = interval.as_millis() as u64,
        volatility_factor = simulator.config.volatility_factor,
        "price feed started"
    );

    while !stop.load(Ordering::Relaxed) {
        let point = simulator.next_point(engine.current_price(), Local::now().hour(), Utc::now());
        if point.change.abs() > point.price * SIGNIFICANT_MOVE_FRACTION {
            info!(
                price = point.price,
                change = point.change,
                "significant price move"
            );
        }
        engine.apply_tick(point);

        sleep(interval).await;
    }

    info!("price feed stopped");
}
