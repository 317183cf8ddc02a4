//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the keeper.
//!
//! # Metrics
//!
//! - `stream_record_updates_total` - Stream record mutations
//! - `stream_force_settlements_total` - Accounts force-settled
//! - `stream_settled_balance_total` - Balance swept to governance
//! - `stream_auto_settle_processed` - Histogram of entries re-checked per sweep
//! - `stream_overdraft_corrections_total` - Bank pulls covering a negative balance
//! - `stream_overdraft_correction_failures_total` - Bank pulls that failed
//! - `stream_auto_settle_backlog` - 1 when the last sweep hit its cap

use prometheus::{Counter, Histogram, HistogramOpts, IntCounter, IntGauge, Registry};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Stream record mutations
    pub record_updates: IntCounter,

    /// Accounts force-settled
    pub force_settlements: IntCounter,

    /// Balance swept to governance
    pub settled_balance: Counter,

    /// Entries re-checked per sweep
    pub auto_settle_processed: Histogram,

    /// Successful overdraft corrections
    pub overdraft_corrections: IntCounter,

    /// Failed overdraft corrections
    pub overdraft_correction_failures: IntCounter,

    /// Whether the last sweep left due entries behind
    pub auto_settle_backlog: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let record_updates = IntCounter::new(
            "stream_record_updates_total",
            "Stream record mutations",
        )?;
        registry.register(Box::new(record_updates.clone()))?;

        let force_settlements = IntCounter::new(
            "stream_force_settlements_total",
            "Accounts force-settled",
        )?;
        registry.register(Box::new(force_settlements.clone()))?;

        let settled_balance = Counter::new(
            "stream_settled_balance_total",
            "Balance swept to governance",
        )?;
        registry.register(Box::new(settled_balance.clone()))?;

        let auto_settle_processed = Histogram::with_opts(
            HistogramOpts::new(
                "stream_auto_settle_processed",
                "Entries re-checked per sweep",
            )
            .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0]),
        )?;
        registry.register(Box::new(auto_settle_processed.clone()))?;

        let overdraft_corrections = IntCounter::new(
            "stream_overdraft_corrections_total",
            "Bank pulls covering a negative static balance",
        )?;
        registry.register(Box::new(overdraft_corrections.clone()))?;

        let overdraft_correction_failures = IntCounter::new(
            "stream_overdraft_correction_failures_total",
            "Bank pulls that failed",
        )?;
        registry.register(Box::new(overdraft_correction_failures.clone()))?;

        let auto_settle_backlog = IntGauge::new(
            "stream_auto_settle_backlog",
            "1 when the last sweep left due entries behind",
        )?;
        registry.register(Box::new(auto_settle_backlog.clone()))?;

        Ok(Self {
            record_updates,
            force_settlements,
            settled_balance,
            auto_settle_processed,
            overdraft_corrections,
            overdraft_correction_failures,
            auto_settle_backlog,
            registry,
        })
    }

    /// Record a stream record mutation
    pub fn record_update(&self) {
        self.record_updates.inc();
    }

    /// Record a forced settlement
    pub fn record_force_settle(&self, settled: Decimal) {
        self.force_settlements.inc();
        if let Some(amount) = settled.to_f64().filter(|a| *a > 0.0) {
            self.settled_balance.inc_by(amount);
        }
    }

    /// Record an overdraft correction attempt
    pub fn record_overdraft_correction(&self, succeeded: bool) {
        if succeeded {
            self.overdraft_corrections.inc();
        } else {
            self.overdraft_correction_failures.inc();
        }
    }

    /// Record a finished sweep
    pub fn record_sweep(&self, processed: usize, backlog: bool) {
        self.auto_settle_processed.observe(processed as f64);
        self.auto_settle_backlog.set(i64::from(backlog));
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.record_updates.get(), 0);
        assert_eq!(metrics.force_settlements.get(), 0);

        // A second collector has its own registry
        assert!(Metrics::new().is_ok());
    }

    #[test]
    fn test_record_force_settle() {
        let metrics = Metrics::new().unwrap();
        metrics.record_force_settle(Decimal::from(250));
        metrics.record_force_settle(Decimal::ZERO);
        assert_eq!(metrics.force_settlements.get(), 2);
        assert_eq!(metrics.settled_balance.get(), 250.0);
    }

    #[test]
    fn test_record_sweep_backlog() {
        let metrics = Metrics::new().unwrap();
        metrics.record_sweep(100, true);
        assert_eq!(metrics.auto_settle_backlog.get(), 1);
        metrics.record_sweep(3, false);
        assert_eq!(metrics.auto_settle_backlog.get(), 0);
        assert_eq!(metrics.auto_settle_processed.get_sample_count(), 2);
    }
}
