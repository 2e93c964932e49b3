//! Risk verdicts and the per-order analysis result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{OrderId, Symbol, UserId};

/// Verdict thresholds, applied to the raw accumulated score.
pub const REJECT_THRESHOLD: f64 = 70.0;
pub const WARN_THRESHOLD: f64 = 30.0;

/// Final classification of an order's risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Accept,
    Warn,
    Reject,
}

impl Verdict {
    /// Classify a raw accumulated score. Thresholds are inclusive:
    /// exactly 70 rejects, exactly 30 warns.
    pub fn from_score(score: f64) -> Self {
        if score >= REJECT_THRESHOLD {
            Verdict::Reject
        } else if score >= WARN_THRESHOLD {
            Verdict::Warn
        } else {
            Verdict::Accept
        }
    }

    /// Whether this verdict counts against the user's risk-event tally.
    pub fn is_risk_event(&self) -> bool {
        matches!(self, Verdict::Warn | Verdict::Reject)
    }

    /// Wire representation, matching the stored field value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Accept => "ACCEPT",
            Verdict::Warn => "WARN",
            Verdict::Reject => "REJECT",
        }
    }

    /// Parse a stored wire value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ACCEPT" => Some(Verdict::Accept),
            "WARN" => Some(Verdict::Warn),
            "REJECT" => Some(Verdict::Reject),
            _ => None,
        }
    }
}

/// Result of scoring one order. Immutable after construction;
/// persisted keyed by order id.
///
/// `risk_score` is clamped to [0, 100] for reporting. The verdict is
/// decided on the unclamped accumulated value before clamping, and
/// `reasons` always leads with the score-summary reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAnalysis {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub symbol: Symbol,
    pub risk_score: f64,
    pub verdict: Verdict,
    /// Annualized volatility used for scoring.
    pub volatility: f64,
    /// Estimated slippage as a decimal fraction (bps / 10_000).
    pub slippage: f64,
    pub reasons: Vec<String>,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}
