//! Per-user order behavior tracking
//!
//! One profile per user id, created lazily on first sight and kept
//! for the process lifetime. Each profile sits behind its own async
//! mutex inside a concurrent map: the scorer holds the user's lock
//! across its read-score-write sequence, so two orders from the same
//! user cannot interleave while different users proceed in parallel.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};

use types::analysis::RiskAnalysis;
use types::ids::{OrderId, UserId};
use types::order::Order;

/// Recent order summaries kept per user. Oldest evicted first.
pub const RECENT_ORDER_CAPACITY: usize = 100;

/// Trailing window for the order-frequency signal.
const FREQUENCY_WINDOW_MINUTES: i64 = 5;

/// One scored order, as remembered in a user's recent history.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    /// Submission timestamp from the order itself.
    pub timestamp: DateTime<Utc>,
    pub notional: Decimal,
    pub risk_score: f64,
}

/// Rolling statistics for one user.
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub total_orders: u64,
    pub total_volume: Decimal,
    pub recent_orders: VecDeque<OrderSummary>,
    /// Orders that ended in a Warn or Reject verdict.
    pub risk_events: u64,
    pub last_activity: DateTime<Utc>,
}

/// What the scorer reads from a profile before scoring an order.
#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorSnapshot {
    /// Orders recorded within the trailing 5 minutes.
    pub recent_order_count: usize,
    /// Historical average notional; None for a user with no orders.
    pub average_notional: Option<Decimal>,
    /// True when the user has never ordered before.
    pub first_order: bool,
}

impl UserProfile {
    fn new(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_orders: 0,
            total_volume: Decimal::ZERO,
            recent_orders: VecDeque::with_capacity(RECENT_ORDER_CAPACITY),
            risk_events: 0,
            last_activity: now,
        }
    }

    /// Read the signals the scorer needs, before this order is added.
    pub fn snapshot(&self, now: DateTime<Utc>) -> BehaviorSnapshot {
        let cutoff = now - Duration::minutes(FREQUENCY_WINDOW_MINUTES);
        let recent_order_count = self
            .recent_orders
            .iter()
            .filter(|o| o.timestamp > cutoff)
            .count();

        let average_notional = if self.total_orders > 0 {
            Some(self.total_volume / Decimal::from(self.total_orders))
        } else {
            None
        };

        BehaviorSnapshot {
            recent_order_count,
            average_notional,
            first_order: self.total_orders == 0,
        }
    }

    /// Fold a scored order into the profile.
    pub fn record(&mut self, order: &Order, analysis: &RiskAnalysis, now: DateTime<Utc>) {
        self.total_orders += 1;
        self.total_volume += order.notional();
        self.last_activity = now;

        if self.recent_orders.len() >= RECENT_ORDER_CAPACITY {
            self.recent_orders.pop_front();
        }
        self.recent_orders.push_back(OrderSummary {
            order_id: order.order_id.clone(),
            timestamp: order.timestamp,
            notional: order.notional(),
            risk_score: analysis.risk_score,
        });

        if analysis.verdict.is_risk_event() {
            self.risk_events += 1;
        }
    }
}

/// Concurrent map of per-user profiles.
pub struct UserBehaviorTracker {
    profiles: DashMap<UserId, Arc<Mutex<UserProfile>>>,
}

impl UserBehaviorTracker {
    pub fn new() -> Self {
        Self {
            profiles: DashMap::new(),
        }
    }

    /// Lock a user's profile for a read-score-write sequence, creating
    /// a zeroed profile on first sight. The guard serializes analyses
    /// of the same user; other users are untouched.
    pub async fn lock_user(&self, user_id: &UserId, now: DateTime<Utc>) -> OwnedMutexGuard<UserProfile> {
        let cell = self
            .profiles
            .entry(user_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(UserProfile::new(user_id.clone(), now))))
            .clone();
        cell.lock_owned().await
    }

    /// Read-side copy of a user's profile, if the user has been seen.
    pub async fn user_analytics(&self, user_id: &UserId) -> Option<UserAnalytics> {
        let cell = self.profiles.get(user_id)?.clone();
        let profile = cell.lock().await;
        Some(UserAnalytics {
            user_id: profile.user_id.clone(),
            total_orders: profile.total_orders,
            total_volume: profile.total_volume,
            risk_events: profile.risk_events,
            recent_orders_tracked: profile.recent_orders.len(),
            last_activity: profile.last_activity,
        })
    }

    /// Number of distinct users seen.
    pub fn user_count(&self) -> usize {
        self.profiles.len()
    }
}

impl Default for UserBehaviorTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-side snapshot of a user profile.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnalytics {
    pub user_id: UserId,
    pub total_orders: u64,
    pub total_volume: Decimal,
    pub risk_events: u64,
    /// Entries currently held in the bounded recent history.
    pub recent_orders_tracked: usize,
    pub last_activity: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::analysis::Verdict;
    use types::ids::Symbol;
    use types::order::{OrderType, Side};

    fn base_time() -> DateTime<Utc> {
        "2024-05-01T12:00:00Z".parse().unwrap()
    }

    fn make_order(id: &str, user: &str, notional: u64, timestamp: DateTime<Utc>) -> Order {
        Order {
            order_id: OrderId::new(id),
            user_id: UserId::new(user),
            symbol: Symbol::new("BTC-USD"),
            side: Side::Buy,
            quantity: Decimal::ONE,
            price: Decimal::from(notional),
            order_type: OrderType::Limit,
            timestamp,
        }
    }

    fn make_analysis(order: &Order, score: f64, verdict: Verdict) -> RiskAnalysis {
        RiskAnalysis {
            order_id: order.order_id.clone(),
            user_id: order.user_id.clone(),
            symbol: order.symbol.clone(),
            risk_score: score,
            verdict,
            volatility: 0.0,
            slippage: 0.0,
            reasons: vec![],
            processing_time_ms: 0,
            timestamp: order.timestamp,
        }
    }

    // ── Snapshot signals ──

    #[tokio::test]
    async fn test_first_order_snapshot_is_zeroed() {
        let tracker = UserBehaviorTracker::new();
        let profile = tracker.lock_user(&UserId::new("u1"), base_time()).await;
        let snapshot = profile.snapshot(base_time());

        assert!(snapshot.first_order);
        assert_eq!(snapshot.recent_order_count, 0);
        assert_eq!(snapshot.average_notional, None);
    }

    #[tokio::test]
    async fn test_average_notional_after_orders() {
        let tracker = UserBehaviorTracker::new();
        let user = UserId::new("u1");
        let mut profile = tracker.lock_user(&user, base_time()).await;

        for (i, notional) in [1000_u64, 3000].iter().enumerate() {
            let order = make_order(&format!("o{i}"), "u1", *notional, base_time());
            let analysis = make_analysis(&order, 10.0, Verdict::Accept);
            profile.record(&order, &analysis, base_time());
        }

        let snapshot = profile.snapshot(base_time());
        assert!(!snapshot.first_order);
        assert_eq!(snapshot.average_notional, Some(Decimal::from(2000)));
    }

    #[tokio::test]
    async fn test_frequency_window_excludes_old_orders() {
        let tracker = UserBehaviorTracker::new();
        let user = UserId::new("u1");
        let mut profile = tracker.lock_user(&user, base_time()).await;

        // 3 stale orders, 2 fresh ones
        for i in 0..3 {
            let order = make_order(
                &format!("old{i}"),
                "u1",
                1000,
                base_time() - Duration::minutes(10),
            );
            profile.record(&order, &make_analysis(&order, 0.0, Verdict::Accept), base_time());
        }
        for i in 0..2 {
            let order = make_order(&format!("new{i}"), "u1", 1000, base_time());
            profile.record(&order, &make_analysis(&order, 0.0, Verdict::Accept), base_time());
        }

        let snapshot = profile.snapshot(base_time());
        assert_eq!(snapshot.recent_order_count, 2);
        assert_eq!(profile.total_orders, 5);
    }

    // ── History bound and risk events ──

    #[tokio::test]
    async fn test_recent_history_never_exceeds_capacity() {
        let tracker = UserBehaviorTracker::new();
        let user = UserId::new("u1");
        let mut profile = tracker.lock_user(&user, base_time()).await;

        for i in 0..(RECENT_ORDER_CAPACITY + 20) {
            let order = make_order(&format!("o{i}"), "u1", 1000, base_time());
            profile.record(&order, &make_analysis(&order, 0.0, Verdict::Accept), base_time());
        }

        assert_eq!(profile.recent_orders.len(), RECENT_ORDER_CAPACITY);
        // Oldest entries were dropped first
        assert_eq!(profile.recent_orders.front().unwrap().order_id.as_str(), "o20");
        assert_eq!(profile.total_orders, (RECENT_ORDER_CAPACITY + 20) as u64);
    }

    #[tokio::test]
    async fn test_risk_events_count_warn_and_reject() {
        let tracker = UserBehaviorTracker::new();
        let user = UserId::new("u1");
        let mut profile = tracker.lock_user(&user, base_time()).await;

        for (i, verdict) in [Verdict::Accept, Verdict::Warn, Verdict::Reject]
            .into_iter()
            .enumerate()
        {
            let order = make_order(&format!("o{i}"), "u1", 1000, base_time());
            profile.record(&order, &make_analysis(&order, 0.0, verdict), base_time());
        }

        assert_eq!(profile.risk_events, 2);
    }

    // ── Concurrency ──

    #[tokio::test]
    async fn test_same_user_updates_are_serialized() {
        let tracker = Arc::new(UserBehaviorTracker::new());
        let user = UserId::new("busy");

        let mut handles = Vec::new();
        for i in 0..50 {
            let tracker = tracker.clone();
            let user = user.clone();
            handles.push(tokio::spawn(async move {
                let mut profile = tracker.lock_user(&user, base_time()).await;
                let order = make_order(&format!("o{i}"), "busy", 1000, base_time());
                profile.record(&order, &make_analysis(&order, 0.0, Verdict::Accept), base_time());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let analytics = tracker.user_analytics(&user).await.unwrap();
        assert_eq!(analytics.total_orders, 50);
        assert_eq!(tracker.user_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_user_analytics_is_none() {
        let tracker = UserBehaviorTracker::new();
        assert!(tracker.user_analytics(&UserId::new("ghost")).await.is_none());
    }
}
