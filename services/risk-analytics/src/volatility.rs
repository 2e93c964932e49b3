//! Volatility engine: realized volatility, percentile ranking, and
//! slippage estimation over a bounded trailing price window
//!
//! The engine owns the PricePoint ring exclusively; the feed loop is
//! the single writer and any number of readers take short read locks.
//! All derived values (volatility, percentile, slippage) are computed
//! on demand from the current window and never persisted.

use std::collections::VecDeque;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Timelike, Utc};
use tracing::debug;

use crate::feed::is_asian_session;

/// Retained price points. Oldest are evicted first once full.
pub const PRICE_WINDOW_CAPACITY: usize = 1000;

/// Below this many retained points the estimator reports zero
/// volatility (cold-start guard).
const MIN_POINTS_FOR_VOLATILITY: usize = 10;

/// Historical volatility is sampled in contiguous blocks of this many
/// points when ranking the current value against recent history.
const PERCENTILE_BLOCK_SIZE: usize = 10;

/// Annualization factor input: returns are per-minute-ish samples.
const MINUTES_PER_YEAR: f64 = 365.0 * 24.0 * 60.0;

// Slippage model, all in basis points.
const BASE_SLIPPAGE_BPS: f64 = 5.0;
const SIZE_IMPACT_DIVISOR: f64 = 100_000.0;
const SIZE_IMPACT_CAP_BPS: f64 = 50.0;
const VOLATILITY_IMPACT_SCALE: f64 = 1000.0;
const VOLATILITY_IMPACT_CAP_BPS: f64 = 20.0;
const LOW_LIQUIDITY_SURCHARGE_BPS: f64 = 5.0;

/// A single tick of the synthetic price series.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
    /// Signed change from the previous point.
    pub change: f64,
}

/// Configuration for the volatility engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum retained price points.
    pub window_capacity: usize,
    /// Trailing duration considered "current" for volatility.
    pub window_minutes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_capacity: PRICE_WINDOW_CAPACITY,
            window_minutes: 1,
        }
    }
}

/// Feed state mutated only by the tick loop.
struct FeedState {
    window: VecDeque<PricePoint>,
    current_price: f64,
    last_update: DateTime<Utc>,
}

/// Windowed volatility estimator over the synthetic price feed.
pub struct VolatilityEngine {
    config: EngineConfig,
    state: RwLock<FeedState>,
}

impl VolatilityEngine {
    /// Create an engine seeded at the configured starting price.
    pub fn new(config: EngineConfig, starting_price: f64) -> Self {
        Self {
            state: RwLock::new(FeedState {
                window: VecDeque::with_capacity(config.window_capacity),
                current_price: starting_price,
                last_update: Utc::now(),
            }),
            config,
        }
    }

    /// Append a tick, evicting the oldest point when the ring is full.
    pub fn apply_tick(&self, point: PricePoint) {
        let mut state = self.state.write().expect("feed state poisoned");
        if state.window.len() >= self.config.window_capacity {
            state.window.pop_front();
        }
        state.current_price = point.price;
        state.last_update = point.timestamp;
        state.window.push_back(point);
    }

    /// Latest price from the feed. No computation.
    pub fn current_price(&self) -> f64 {
        self.state.read().expect("feed state poisoned").current_price
    }

    /// Timestamp of the latest tick.
    pub fn last_update(&self) -> DateTime<Utc> {
        self.state.read().expect("feed state poisoned").last_update
    }

    /// Number of retained price points.
    pub fn point_count(&self) -> usize {
        self.state.read().expect("feed state poisoned").window.len()
    }

    /// Annualized realized volatility over the trailing window.
    pub fn current_volatility(&self) -> f64 {
        self.volatility_at(Utc::now())
    }

    /// Volatility with an explicit "now" for the window cutoff.
    ///
    /// Zero when fewer than 10 points are retained in total, or when
    /// fewer than 2 points fall inside the trailing window.
    pub fn volatility_at(&self, now: DateTime<Utc>) -> f64 {
        let state = self.state.read().expect("feed state poisoned");
        if state.window.len() < MIN_POINTS_FOR_VOLATILITY {
            return 0.0;
        }

        let cutoff = now - Duration::minutes(self.config.window_minutes);
        let recent: Vec<f64> = state
            .window
            .iter()
            .filter(|p| p.timestamp > cutoff)
            .map(|p| p.price)
            .collect();

        annualized_volatility(&recent)
    }

    /// Rank the current volatility against block-sampled history.
    ///
    /// The retained window is walked in strides of 10 points; blocks
    /// whose starting timestamp is older than the lookback are
    /// skipped. Returns the percentage of block volatilities strictly
    /// below the current value, or 50.0 (neutral) with no qualifying
    /// blocks. Always within [0, 100].
    pub fn volatility_percentile(&self, lookback_minutes: i64) -> f64 {
        self.volatility_percentile_at(lookback_minutes, Utc::now())
    }

    /// Percentile with an explicit "now" for the lookback cutoff.
    pub fn volatility_percentile_at(&self, lookback_minutes: i64, now: DateTime<Utc>) -> f64 {
        let current_vol = self.volatility_at(now);
        let cutoff = now - Duration::minutes(lookback_minutes);

        let state = self.state.read().expect("feed state poisoned");
        let points: Vec<&PricePoint> = state.window.iter().collect();

        let mut historical: Vec<f64> = Vec::new();
        let mut i = 0;
        while i + PERCENTILE_BLOCK_SIZE < points.len() {
            let block = &points[i..i + PERCENTILE_BLOCK_SIZE];
            i += PERCENTILE_BLOCK_SIZE;

            if block[0].timestamp < cutoff {
                continue;
            }
            let prices: Vec<f64> = block.iter().map(|p| p.price).collect();
            historical.push(annualized_volatility(&prices));
        }

        if historical.is_empty() {
            debug!("no qualifying volatility blocks, reporting neutral percentile");
            return 50.0;
        }

        let below = historical.iter().filter(|v| **v < current_vol).count();
        (below as f64 / historical.len() as f64) * 100.0
    }

    /// Retained points newer than `now - minutes`, in time order.
    pub fn price_history(&self, minutes: i64) -> Vec<PricePoint> {
        self.price_history_at(minutes, Utc::now())
    }

    /// History with an explicit "now" for the cutoff.
    pub fn price_history_at(&self, minutes: i64, now: DateTime<Utc>) -> Vec<PricePoint> {
        let cutoff = now - Duration::minutes(minutes);
        let state = self.state.read().expect("feed state poisoned");
        state
            .window
            .iter()
            .filter(|p| p.timestamp > cutoff)
            .cloned()
            .collect()
    }

    /// Estimated slippage in basis points for an order of the given
    /// notional, under current volatility and the local wall clock.
    pub fn calculate_slippage(&self, notional: f64) -> f64 {
        let hour = chrono::Local::now().hour();
        slippage_bps(notional, self.current_volatility(), hour)
    }
}

/// Slippage model: base cost plus capped size and volatility impacts,
/// plus a surcharge during the low-liquidity (Asian session) hours.
/// Strictly increasing in notional up to the size cap, non-decreasing
/// everywhere.
pub fn slippage_bps(notional: f64, volatility: f64, hour: u32) -> f64 {
    let size_impact = (notional / SIZE_IMPACT_DIVISOR).min(SIZE_IMPACT_CAP_BPS);
    let volatility_impact = (volatility * VOLATILITY_IMPACT_SCALE).min(VOLATILITY_IMPACT_CAP_BPS);
    let time_impact = if is_asian_session(hour) {
        LOW_LIQUIDITY_SURCHARGE_BPS
    } else {
        0.0
    };

    BASE_SLIPPAGE_BPS + size_impact + volatility_impact + time_impact
}

/// Annualized volatility of a price series: the standard deviation of
/// consecutive simple returns scaled by sqrt(minutes per year).
/// Zero when fewer than two prices are supplied.
fn annualized_volatility(prices: &[f64]) -> f64 {
    if prices.len() < 2 {
        return 0.0;
    }

    let returns: Vec<f64> = prices
        .windows(2)
        .map(|pair| (pair[1] - pair[0]) / pair[0])
        .collect();

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| {
            let d = r - mean;
            d * d
        })
        .sum::<f64>()
        / returns.len() as f64;

    variance.sqrt() * MINUTES_PER_YEAR.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn base_time() -> DateTime<Utc> {
        "2024-05-01T12:00:00Z".parse().unwrap()
    }

    /// Engine preloaded with `prices`, one tick per second ending at
    /// `base_time()`.
    fn engine_with_prices(prices: &[f64]) -> VolatilityEngine {
        let engine = VolatilityEngine::new(EngineConfig::default(), prices[0]);
        let start = base_time() - Duration::seconds(prices.len() as i64);
        let mut previous = prices[0];
        for (i, price) in prices.iter().enumerate() {
            engine.apply_tick(PricePoint {
                price: *price,
                timestamp: start + Duration::seconds(i as i64 + 1),
                change: price - previous,
            });
            previous = *price;
        }
        engine
    }

    // ── Cold start and window filters ──

    #[test]
    fn test_fewer_than_ten_points_reports_zero() {
        let engine = engine_with_prices(&[100.0; 9]);
        assert_eq!(engine.volatility_at(base_time()), 0.0);
    }

    #[test]
    fn test_fewer_than_two_points_in_window_reports_zero() {
        // 12 points, but all older than the 1-minute window except one
        let engine = VolatilityEngine::new(EngineConfig::default(), 100.0);
        for i in 0..11 {
            engine.apply_tick(PricePoint {
                price: 100.0 + i as f64,
                timestamp: base_time() - Duration::minutes(10) + Duration::seconds(i),
                change: 1.0,
            });
        }
        engine.apply_tick(PricePoint {
            price: 120.0,
            timestamp: base_time(),
            change: 9.0,
        });

        assert_eq!(engine.volatility_at(base_time()), 0.0);
    }

    #[test]
    fn test_flat_prices_have_zero_volatility() {
        let engine = engine_with_prices(&[100.0; 30]);
        assert_eq!(engine.volatility_at(base_time()), 0.0);
    }

    #[test]
    fn test_dispersed_prices_have_positive_volatility() {
        let prices: Vec<f64> = (0..30)
            .map(|i| if i % 2 == 0 { 100.0 } else { 102.0 })
            .collect();
        let engine = engine_with_prices(&prices);
        assert!(engine.volatility_at(base_time()) > 0.0);
    }

    #[test]
    fn test_annualized_volatility_known_value() {
        // returns 0.02 and -0.0392157, population stddev 0.0296078
        let vol = annualized_volatility(&[100.0, 102.0, 98.0]);
        assert!((vol - 0.029_607_843 * MINUTES_PER_YEAR.sqrt()).abs() < 1e-6);
    }

    // ── Ring capacity ──

    #[test]
    fn test_window_never_exceeds_capacity() {
        let engine = VolatilityEngine::new(EngineConfig::default(), 100.0);
        for i in 0..1200 {
            engine.apply_tick(PricePoint {
                price: 100.0 + i as f64,
                timestamp: base_time() + Duration::seconds(i),
                change: 1.0,
            });
        }

        assert_eq!(engine.point_count(), PRICE_WINDOW_CAPACITY);
        // The most recent ticks survive
        assert_eq!(engine.current_price(), 100.0 + 1199.0);
        let history = engine.price_history_at(60, base_time() + Duration::seconds(1200));
        assert_eq!(history.first().unwrap().price, 100.0 + 200.0);
    }

    // ── Percentile ──

    #[test]
    fn test_percentile_neutral_when_no_blocks() {
        let engine = engine_with_prices(&[100.0; 5]);
        assert_eq!(engine.volatility_percentile_at(60, base_time()), 50.0);
    }

    #[test]
    fn test_percentile_within_bounds() {
        let prices: Vec<f64> = (0..200).map(|i| 100.0 + (i % 7) as f64).collect();
        let engine = engine_with_prices(&prices);
        let p = engine.volatility_percentile_at(60, base_time());
        assert!((0.0..=100.0).contains(&p));
    }

    #[test]
    fn test_percentile_high_when_current_exceeds_history() {
        // Calm history, violent last minute
        let mut prices: Vec<f64> = vec![100.0; 180];
        for i in 0..40 {
            prices.push(if i % 2 == 0 { 100.0 } else { 110.0 });
        }
        let engine = engine_with_prices(&prices);
        let p = engine.volatility_percentile_at(60, base_time());
        assert!(p > 50.0, "expected elevated percentile, got {p}");
    }

    proptest! {
        #[test]
        fn prop_percentile_always_in_range(
            prices in proptest::collection::vec(1000.0_f64..100_000.0, 0..300),
            lookback in 1_i64..120,
        ) {
            let engine = VolatilityEngine::new(EngineConfig::default(), 45_000.0);
            let start = base_time() - Duration::seconds(prices.len() as i64);
            for (i, price) in prices.iter().enumerate() {
                engine.apply_tick(PricePoint {
                    price: *price,
                    timestamp: start + Duration::seconds(i as i64),
                    change: 0.0,
                });
            }
            let p = engine.volatility_percentile_at(lookback, base_time());
            prop_assert!((0.0..=100.0).contains(&p));
        }
    }

    // ── Price history ──

    #[test]
    fn test_price_history_respects_cutoff() {
        let engine = VolatilityEngine::new(EngineConfig::default(), 100.0);
        for i in 0..20 {
            engine.apply_tick(PricePoint {
                price: 100.0 + i as f64,
                timestamp: base_time() - Duration::minutes(19 - i),
                change: 1.0,
            });
        }

        let recent = engine.price_history_at(5, base_time());
        // Points at -4, -3, -2, -1, -0 minutes qualify; -5 is not
        // strictly newer than the cutoff
        assert_eq!(recent.len(), 5);
        // Time order preserved
        assert!(recent.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    // ── Slippage ──

    #[test]
    fn test_slippage_base_case() {
        // Off-session, zero volatility, tiny order: base cost only
        assert!((slippage_bps(100.0, 0.0, 12) - 5.001).abs() < 1e-9);
    }

    #[test]
    fn test_engine_slippage_includes_base_cost() {
        let engine = engine_with_prices(&[45_000.0; 20]);
        assert!(engine.calculate_slippage(10_000.0) >= BASE_SLIPPAGE_BPS);
    }

    #[test]
    fn test_slippage_low_liquidity_surcharge() {
        let off_session = slippage_bps(10_000.0, 0.01, 12);
        let asian = slippage_bps(10_000.0, 0.01, 3);
        assert!((asian - off_session - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_slippage_volatility_impact_capped() {
        let moderate = slippage_bps(10_000.0, 0.02, 12);
        let extreme = slippage_bps(10_000.0, 5.0, 12);
        assert!(extreme > moderate);
        // Cap: 5 base + 0.1 size + 20 vol
        assert!((extreme - 25.1).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_slippage_non_decreasing_in_notional(
            notional_a in 0.0_f64..10_000_000.0,
            delta in 0.0_f64..10_000_000.0,
            volatility in 0.0_f64..1.0,
            hour in 0_u32..24,
        ) {
            let lo = slippage_bps(notional_a, volatility, hour);
            let hi = slippage_bps(notional_a + delta, volatility, hour);
            prop_assert!(hi >= lo);
        }

        #[test]
        fn prop_slippage_strictly_increasing_below_cap(
            notional in 0.0_f64..4_000_000.0,
            volatility in 0.0_f64..1.0,
            hour in 0_u32..24,
        ) {
            let lo = slippage_bps(notional, volatility, hour);
            let hi = slippage_bps(notional + 1_000.0, volatility, hour);
            prop_assert!(hi > lo);
        }
    }
}
