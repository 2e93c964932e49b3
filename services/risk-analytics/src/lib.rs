//! Risk Analytics Service
//!
//! Consumes trade orders from a Redis stream and produces:
//! - A composite risk score and Accept/Warn/Reject verdict per order
//! - Realized-volatility and percentile estimates from a synthetic feed
//! - Slippage estimates driven by order size and current volatility
//! - Per-user behavior profiles (frequency, sizing, risk events)
//! - Persisted analysis results keyed by order id (24 h expiry)
//!
//! Delivery is at-least-once: a message is acknowledged to the
//! consumer group only after its result is persisted, and the result
//! write is idempotent per order id.
//!
//! # Architecture
//!
//! ```text
//!  Price Feed ──▶ Volatility Engine ──┬─▶ Slippage
//!  (GBM ticks)        (ring window)   │
//!                                     ▼
//!  orders:stream ──▶ Consumer ──▶ Risk Scorer ◀──▶ Behavior Tracker
//!                        │             │
//!                        │             ▼
//!                        │       Result Store (analysis:<orderId>)
//!                        └── ack on success only
//! ```

pub mod api;
pub mod behavior;
pub mod config;
pub mod consumer;
pub mod feed;
pub mod metrics;
pub mod scorer;
pub mod store;
pub mod volatility;

// Library version
pub const SERVICE_VERSION: &str = "0.1.0";

/// Service name reported by the health endpoint and log lines.
pub const SERVICE_NAME: &str = "risk-analytics";
