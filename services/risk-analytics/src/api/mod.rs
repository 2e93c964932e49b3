//! HTTP read-side: health, metrics, volatility, and analysis lookups
//!
//! Thin wrappers over the engine, scorer, and store. All state is
//! shared behind [`AppState`]; errors map to JSON bodies via
//! [`error::AppError`].

pub mod error;
pub mod handlers;
pub mod router;

pub use router::create_router;

use std::sync::Arc;

use crate::behavior::UserBehaviorTracker;
use crate::metrics::ServiceMetrics;
use crate::scorer::RiskScorer;
use crate::store::AnalysisStore;
use crate::volatility::VolatilityEngine;

/// Shared application state for the HTTP layer.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<VolatilityEngine>,
    pub scorer: Arc<RiskScorer>,
    pub tracker: Arc<UserBehaviorTracker>,
    pub store: AnalysisStore,
    pub metrics: Arc<ServiceMetrics>,
}
