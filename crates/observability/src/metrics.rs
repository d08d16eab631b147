//! Prometheus metrics infrastructure
//!
//! This module provides the Prometheus exporter and the ledger metric set
//! recorded by matching, settlement and the lifecycle batches.

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Initialize the Prometheus metrics exporter
///
/// This starts an HTTP server on the specified port that exposes metrics
/// at the `/metrics` endpoint.
///
/// # Example
///
/// ```ignore
/// observability::metrics::init_metrics(9090)?;
/// // Metrics available at http://localhost:9090/metrics
/// ```
pub fn init_metrics(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    tracing::info!(%addr, "Metrics server listening");
    Ok(())
}

/// Ledger metrics
///
/// Without an installed recorder every call is a no-op, so the handles
/// are safe to use in tests.
///
/// # Metrics
///
/// * `ledger_fills_total` - Settled fills
/// * `ledger_filled_quantity_total` - Units moved by settled fills
/// * `ledger_fill_notional` - Notional value per fill
/// * `ledger_self_trades_skipped_total` - Pairings skipped as self-trades
/// * `ledger_orders_total{event}` - Submitted/admitted/deferred/expired/cancelled orders
/// * `ledger_orders_rejected_total{reason}` - Rejected submissions and cancellations
/// * `ledger_batch_failures_total{batch}` - Orders whose batch step failed
/// * `ledger_batch_duration_seconds{batch}` - Batch wall time
/// * `ledger_last_batch_examined{batch}` - Orders looked at by the last batch
#[derive(Clone)]
pub struct LedgerMetrics {
    fills_total: Counter,
    filled_quantity_total: Counter,
    fill_notional: Histogram,
    self_trades_skipped: Counter,
    orders_by_event: fn(&'static str) -> Counter,
    rejections_by_reason: fn(&'static str) -> Counter,
    batch_failures: fn(&'static str) -> Counter,
    batch_duration: fn(&'static str) -> Histogram,
    batch_examined: fn(&'static str) -> Gauge,
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self {
            fills_total: counter!("ledger_fills_total"),
            filled_quantity_total: counter!("ledger_filled_quantity_total"),
            fill_notional: histogram!("ledger_fill_notional"),
            self_trades_skipped: counter!("ledger_self_trades_skipped_total"),
            orders_by_event: |event| counter!("ledger_orders_total", "event" => event),
            rejections_by_reason: |reason| {
                counter!("ledger_orders_rejected_total", "reason" => reason)
            },
            batch_failures: |batch| counter!("ledger_batch_failures_total", "batch" => batch),
            batch_duration: |batch| {
                histogram!("ledger_batch_duration_seconds", "batch" => batch)
            },
            batch_examined: |batch| gauge!("ledger_last_batch_examined", "batch" => batch),
        }
    }

    /// Record one settled fill
    pub fn record_fill(&self, quantity: u32, notional: f64) {
        self.fills_total.increment(1);
        self.filled_quantity_total.increment(u64::from(quantity));
        self.fill_notional.record(notional);
    }

    pub fn record_self_trade(&self) {
        self.self_trades_skipped.increment(1);
    }

    /// Count orders reaching a lifecycle event ("submitted", "admitted", ...)
    pub fn record_orders(&self, event: &'static str, count: u64) {
        if count > 0 {
            (self.orders_by_event)(event).increment(count);
        }
    }

    pub fn record_rejection(&self, reason: &'static str) {
        (self.rejections_by_reason)(reason).increment(1);
    }

    /// Record a finished batch run
    pub fn record_batch(&self, batch: &'static str, duration: Duration, examined: usize, failed: usize) {
        (self.batch_duration)(batch).record(duration.as_secs_f64());
        (self.batch_examined)(batch).set(examined as f64);
        if failed > 0 {
            (self.batch_failures)(batch).increment(failed as u64);
        }
    }
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder() {
        // No recorder installed: every call must be a silent no-op
        let metrics = LedgerMetrics::new();
        metrics.record_fill(200, 2900.0);
        metrics.record_self_trade();
        metrics.record_orders("admitted", 3);
        metrics.record_orders("deferred", 0);
        metrics.record_rejection("insufficient_funds");
        metrics.record_batch("expiry", Duration::from_millis(5), 4, 1);
    }
}
