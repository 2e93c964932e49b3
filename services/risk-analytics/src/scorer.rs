//! Composite risk scoring pipeline
//!
//! Each stage adds non-negative points and optional human-readable
//! reasons: volatility, slippage, user behavior, then market
//! conditions. The verdict thresholds apply to the raw accumulated
//! total; the reported score is clamped to 100. Given the engine and
//! tracker state plus the clock inputs, the result is deterministic.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Datelike, DateTime, Local, Timelike, Utc, Weekday};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use tracing::{debug, info};

use types::analysis::{RiskAnalysis, Verdict};
use types::order::Order;

use crate::behavior::{BehaviorSnapshot, UserBehaviorTracker};
use crate::volatility::{slippage_bps, VolatilityEngine};

// Stage point values.
const EXTREME_VOLATILITY_POINTS: f64 = 30.0;
const HIGH_VOLATILITY_POINTS: f64 = 15.0;
const PERCENTILE_POINTS: f64 = 10.0;
const HIGH_SLIPPAGE_POINTS: f64 = 20.0;
const MODERATE_SLIPPAGE_POINTS: f64 = 10.0;
const ORDER_FREQUENCY_POINTS: f64 = 25.0;
const SIZE_OUTLIER_POINTS: f64 = 15.0;
const FIRST_ORDER_POINTS: f64 = 5.0;
const OFF_HOURS_POINTS: f64 = 5.0;
const WEEKEND_POINTS: f64 = 10.0;
const PRICE_MOVE_POINTS: f64 = 10.0;

// Stage trigger thresholds.
const PERCENTILE_THRESHOLD: f64 = 90.0;
const HIGH_SLIPPAGE_BPS: f64 = 25.0;
const MODERATE_SLIPPAGE_BPS: f64 = 15.0;
const FREQUENCY_THRESHOLD: usize = 10;
const SIZE_OUTLIER_MULTIPLE: i64 = 5;
const MARKET_OPEN_HOUR: u32 = 9;
const MARKET_CLOSE_HOUR: u32 = 16;
const PRICE_MOVE_FRACTION: f64 = 0.005;
/// Price-history entries inspected for recent large moves.
const PRICE_MOVE_SAMPLE: usize = 10;

/// Scoring thresholds supplied at startup.
#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// Annualized volatility above which 15 points apply.
    pub high_volatility_threshold: f64,
    /// Annualized volatility above which 30 points apply.
    pub extreme_volatility_threshold: f64,
    /// Lookback for the percentile ranking, in minutes.
    pub percentile_lookback_minutes: i64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            high_volatility_threshold: 0.05,
            extreme_volatility_threshold: 0.10,
            percentile_lookback_minutes: 60,
        }
    }
}

/// Accumulates points and reasons across the pipeline stages.
struct ScoreCard {
    total: f64,
    reasons: Vec<String>,
}

impl ScoreCard {
    fn new() -> Self {
        Self {
            total: 0.0,
            reasons: Vec::new(),
        }
    }

    fn add(&mut self, points: f64, reason: String) {
        self.total += points;
        self.reasons.push(reason);
    }
}

/// Rule-based composite risk scorer.
pub struct RiskScorer {
    engine: Arc<VolatilityEngine>,
    tracker: Arc<UserBehaviorTracker>,
    config: ScorerConfig,
}

impl RiskScorer {
    pub fn new(
        engine: Arc<VolatilityEngine>,
        tracker: Arc<UserBehaviorTracker>,
        config: ScorerConfig,
    ) -> Self {
        Self {
            engine,
            tracker,
            config,
        }
    }

    /// Score an order against current market and user state.
    ///
    /// Holds the user's profile lock for the whole read-score-write
    /// sequence, so concurrent orders from one user serialize.
    pub async fn analyze(&self, order: &Order) -> RiskAnalysis {
        let local = Local::now();
        self.analyze_at(order, Utc::now(), local.hour(), local.weekday())
            .await
    }

    /// Scoring with explicit clock inputs.
    pub async fn analyze_at(
        &self,
        order: &Order,
        now: DateTime<Utc>,
        hour: u32,
        weekday: Weekday,
    ) -> RiskAnalysis {
        let started = Instant::now();

        let mut profile = self.tracker.lock_user(&order.user_id, now).await;
        let snapshot = profile.snapshot(now);

        let mut card = ScoreCard::new();
        let volatility = self.volatility_risk(&mut card, now);
        let slippage = self.slippage_risk(order, volatility, hour, &mut card);
        behavior_risk(&snapshot, order, &mut card);
        self.market_conditions_risk(order, hour, weekday, now, &mut card);

        let verdict = Verdict::from_score(card.total);
        let reported_score = card.total.min(100.0);
        card.reasons.insert(0, summary_reason(verdict, reported_score));

        let analysis = RiskAnalysis {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            symbol: order.symbol.clone(),
            risk_score: reported_score,
            verdict,
            volatility,
            slippage: slippage / 10_000.0,
            reasons: card.reasons,
            processing_time_ms: started.elapsed().as_millis() as u64,
            timestamp: now,
        };

        profile.record(order, &analysis, now);

        info!(
            order_id = %analysis.order_id,
            verdict = analysis.verdict.as_str(),
            score = analysis.risk_score,
            "risk analysis completed"
        );
        analysis
    }

    /// Stage 1: realized volatility level and percentile rank.
    fn volatility_risk(&self, card: &mut ScoreCard, now: DateTime<Utc>) -> f64 {
        let volatility = self.engine.volatility_at(now);
        let percentile = self
            .engine
            .volatility_percentile_at(self.config.percentile_lookback_minutes, now);

        if volatility > self.config.extreme_volatility_threshold {
            card.add(
                EXTREME_VOLATILITY_POINTS,
                format!("Extreme volatility detected: {:.2}%", volatility * 100.0),
            );
        } else if volatility > self.config.high_volatility_threshold {
            card.add(
                HIGH_VOLATILITY_POINTS,
                format!("High volatility detected: {:.2}%", volatility * 100.0),
            );
        }

        if percentile > PERCENTILE_THRESHOLD {
            card.add(
                PERCENTILE_POINTS,
                format!("Volatility in top 10% of recent range ({percentile:.1}th percentile)"),
            );
        }

        debug!(volatility, percentile, "volatility stage");
        volatility
    }

    /// Stage 2: slippage estimate for the order's notional. Returns
    /// the estimate in basis points; it is recorded on the analysis
    /// whether or not a threshold fires.
    fn slippage_risk(
        &self,
        order: &Order,
        volatility: f64,
        hour: u32,
        card: &mut ScoreCard,
    ) -> f64 {
        let notional = order.notional().to_f64().unwrap_or(0.0);
        let bps = slippage_bps(notional, volatility, hour);

        if bps > HIGH_SLIPPAGE_BPS {
            card.add(
                HIGH_SLIPPAGE_POINTS,
                format!("High slippage risk: {bps:.1} bps"),
            );
        } else if bps > MODERATE_SLIPPAGE_BPS {
            card.add(
                MODERATE_SLIPPAGE_POINTS,
                format!("Moderate slippage risk: {bps:.1} bps"),
            );
        }
        bps
    }

    /// Stage 4: time-of-day, weekend, and recent-price-move checks.
    fn market_conditions_risk(
        &self,
        order: &Order,
        hour: u32,
        weekday: Weekday,
        now: DateTime<Utc>,
        card: &mut ScoreCard,
    ) {
        if hour < MARKET_OPEN_HOUR || hour > MARKET_CLOSE_HOUR {
            card.add(
                OFF_HOURS_POINTS,
                "Trading outside market hours - reduced liquidity".to_string(),
            );
        }

        if weekday == Weekday::Sat || weekday == Weekday::Sun {
            card.add(
                WEEKEND_POINTS,
                "Weekend trading - limited market oversight".to_string(),
            );
        }

        let history = self.engine.price_history_at(5, now);
        if history.len() > 1 {
            let order_price = order.price.to_f64().unwrap_or(0.0);
            let largest = history
                .iter()
                .rev()
                .take(PRICE_MOVE_SAMPLE)
                .map(|p| p.change.abs())
                .fold(0.0_f64, f64::max);

            if largest > order_price * PRICE_MOVE_FRACTION {
                card.add(
                    PRICE_MOVE_POINTS,
                    format!(
                        "Recent large price movement: {:.2}%",
                        largest / order_price * 100.0
                    ),
                );
            }
        }
    }
}

/// Stage 3: frequency, size-outlier, and first-order signals. The
/// three conditions are independent and can all fire together.
fn behavior_risk(snapshot: &BehaviorSnapshot, order: &Order, card: &mut ScoreCard) {
    if snapshot.recent_order_count > FREQUENCY_THRESHOLD {
        card.add(
            ORDER_FREQUENCY_POINTS,
            format!(
                "High order frequency: {} orders in 5 minutes",
                snapshot.recent_order_count
            ),
        );
    }

    if let Some(average) = snapshot.average_notional {
        if !average.is_zero()
            && order.notional() > average * Decimal::from(SIZE_OUTLIER_MULTIPLE)
        {
            let ratio = (order.notional() / average).to_f64().unwrap_or(0.0);
            card.add(
                SIZE_OUTLIER_POINTS,
                format!("Unusually large order: {ratio:.1}x average size"),
            );
        }
    }

    if snapshot.first_order {
        card.add(FIRST_ORDER_POINTS, "First-time user".to_string());
    }
}

fn summary_reason(verdict: Verdict, score: f64) -> String {
    match verdict {
        Verdict::Reject => format!("High risk score: {score:.1}/100"),
        Verdict::Warn => format!("Moderate risk score: {score:.1}/100"),
        Verdict::Accept => format!("Low risk score: {score:.1}/100"),
    }
}
