//! Service counters for Prometheus-style exposition
//!
//! Lock-free counters for the hot path plus a small bounded window of
//! per-order processing times for average/worst-case reporting.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use types::analysis::Verdict;

/// How many processing-time samples are retained.
const PROCESSING_SAMPLE_CAPACITY: usize = 1024;

/// Counters covering the consume-score-persist pipeline.
pub struct ServiceMetrics {
    pub orders_processed: AtomicU64,
    pub orders_accepted: AtomicU64,
    pub orders_warned: AtomicU64,
    pub orders_rejected: AtomicU64,
    pub parse_failures: AtomicU64,
    pub store_failures: AtomicU64,
    pub messages_acked: AtomicU64,
    pub poll_errors: AtomicU64,
    processing_ms: Mutex<SampleWindow>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            orders_processed: AtomicU64::new(0),
            orders_accepted: AtomicU64::new(0),
            orders_warned: AtomicU64::new(0),
            orders_rejected: AtomicU64::new(0),
            parse_failures: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            messages_acked: AtomicU64::new(0),
            poll_errors: AtomicU64::new(0),
            processing_ms: Mutex::new(SampleWindow::new(PROCESSING_SAMPLE_CAPACITY)),
        }
    }

    /// Record a completed analysis and its verdict.
    pub fn record_analysis(&self, verdict: Verdict, processing_time_ms: u64) {
        self.orders_processed.fetch_add(1, Ordering::Relaxed);
        match verdict {
            Verdict::Accept => self.orders_accepted.fetch_add(1, Ordering::Relaxed),
            Verdict::Warn => self.orders_warned.fetch_add(1, Ordering::Relaxed),
            Verdict::Reject => self.orders_rejected.fetch_add(1, Ordering::Relaxed),
        };
        if let Ok(mut window) = self.processing_ms.lock() {
            window.push(processing_time_ms);
        }
    }

    pub fn record_parse_failure(&self) {
        self.parse_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_ack(&self) {
        self.messages_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_error(&self) {
        self.poll_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Export every counter for the metrics endpoint.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut out = BTreeMap::new();
        out.insert(
            "orders_processed".to_string(),
            self.orders_processed.load(Ordering::Relaxed),
        );
        out.insert(
            "orders_accepted".to_string(),
            self.orders_accepted.load(Ordering::Relaxed),
        );
        out.insert(
            "orders_warned".to_string(),
            self.orders_warned.load(Ordering::Relaxed),
        );
        out.insert(
            "orders_rejected".to_string(),
            self.orders_rejected.load(Ordering::Relaxed),
        );
        out.insert(
            "parse_failures".to_string(),
            self.parse_failures.load(Ordering::Relaxed),
        );
        out.insert(
            "store_failures".to_string(),
            self.store_failures.load(Ordering::Relaxed),
        );
        out.insert(
            "messages_acked".to_string(),
            self.messages_acked.load(Ordering::Relaxed),
        );
        out.insert(
            "poll_errors".to_string(),
            self.poll_errors.load(Ordering::Relaxed),
        );
        if let Ok(window) = self.processing_ms.lock() {
            out.insert("processing_ms_avg".to_string(), window.average());
            out.insert("processing_ms_max".to_string(), window.max());
        }
        out
    }
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded FIFO of u64 samples.
struct SampleWindow {
    samples: VecDeque<u64>,
    capacity: usize,
}

impl SampleWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, value: u64) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn average(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        self.samples.iter().sum::<u64>() / self.samples.len() as u64
    }

    fn max(&self) -> u64 {
        self.samples.iter().copied().max().unwrap_or(0)
    }
}
