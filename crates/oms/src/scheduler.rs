//! Session scheduler
//!
//! Fires the admission batch at every session open and the expiry batch at
//! every session close, sleeping in between.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use config::SchedulerConfig;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::lifecycle::Lifecycle;
use crate::types::BatchKind;

/// Next batch due and when
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledBatch {
    pub kind: BatchKind,
    pub at: DateTime<Utc>,
}

pub struct Scheduler {
    lifecycle: Arc<Lifecycle>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(lifecycle: Arc<Lifecycle>, config: SchedulerConfig) -> Self {
        Self { lifecycle, config }
    }

    /// The first session boundary strictly after `after`; an open and a
    /// close never coincide, so there is no tie to break
    pub fn next_batch(&self, after: DateTime<Utc>) -> Option<ScheduledBatch> {
        let calendar = self.lifecycle.calendar();
        let open = calendar.next_open(after).map(|at| ScheduledBatch {
            kind: BatchKind::Admission,
            at,
        });
        let close = calendar.next_close(after).map(|at| ScheduledBatch {
            kind: BatchKind::Expiry,
            at,
        });
        match (open, close) {
            (Some(open), Some(close)) => Some(if open.at <= close.at { open } else { close }),
            (open, close) => open.or(close),
        }
    }

    /// Run until `shutdown` turns true or its sender goes away
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            info!("Scheduler disabled, no batches will run");
            return;
        }
        info!(
            admission_on_startup = self.config.admission_on_startup,
            "Starting session scheduler"
        );

        if self.config.admission_on_startup {
            self.fire(BatchKind::Admission, self.lifecycle.clock().now()).await;
        }

        // Boundaries already handled; keeps a stalled clock from firing
        // the same boundary twice
        let mut cursor = self.lifecycle.clock().now();
        loop {
            let now = self.lifecycle.clock().now();
            let Some(next) = self.next_batch(cursor.max(now)) else {
                warn!("No upcoming session boundary, scheduler idle until shutdown");
                let _ = shutdown.wait_for(|stop| *stop).await;
                return;
            };
            let wait = (next.at - now).to_std().unwrap_or_default();
            info!(
                batch = %next.kind,
                at = %self.lifecycle.calendar().local(next.at),
                wait_secs = wait.as_secs(),
                "Next batch scheduled"
            );

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    self.fire(next.kind, next.at).await;
                    cursor = next.at;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler shutting down");
                        return;
                    }
                }
            }
        }
    }

    async fn fire(&self, kind: BatchKind, at: DateTime<Utc>) {
        let outcome = match kind {
            BatchKind::Admission => self.lifecycle.run_admission_batch_at(at).await,
            BatchKind::Expiry => self.lifecycle.run_expiry_batch().await,
        };
        if let Err(e) = outcome {
            error!(batch = %kind, error = %e, "Batch failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::TradingCalendar;
    use chrono::{FixedOffset, TimeZone};
    use common::{
        Account, AccountId, Clock, CustomerId, FixedClock, Stock, Trade, TradeAction, TradeStatus,
    };
    use matching_engine::MatchingEngine;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use storage::{InMemoryLedgerStore, LedgerStore};

    fn local(day: u32, hour: u32) -> DateTime<Utc> {
        FixedOffset::east_opt(8 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 3, day, hour, 0, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn scheduler(store: Arc<InMemoryLedgerStore>, clock: Arc<FixedClock>, config: SchedulerConfig) -> Scheduler {
        let engine = MatchingEngine::new(store.clone(), clock.clone());
        let lifecycle = Lifecycle::new(store, engine, TradingCalendar::standard(), clock);
        Scheduler::new(Arc::new(lifecycle), config)
    }

    #[test]
    fn test_next_batch_alternates() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let clock = Arc::new(FixedClock::new(local(4, 8)));
        let scheduler = scheduler(store, clock, SchedulerConfig::default());

        let first = scheduler.next_batch(local(4, 8)).unwrap();
        assert_eq!(first, ScheduledBatch { kind: BatchKind::Admission, at: local(4, 9) });
        let second = scheduler.next_batch(first.at).unwrap();
        assert_eq!(second, ScheduledBatch { kind: BatchKind::Expiry, at: local(4, 17) });
        // Friday close is followed by Monday open
        let weekend = scheduler.next_batch(local(8, 17)).unwrap();
        assert_eq!(weekend, ScheduledBatch { kind: BatchKind::Admission, at: local(11, 9) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_fires_admission_at_open() {
        let store = Arc::new(InMemoryLedgerStore::new());
        store.save_stock(Stock::new("XYZ", dec!(14))).await.unwrap();
        store
            .save_account(Account::new(AccountId(1), CustomerId(1), dec!(5000)))
            .await
            .unwrap();
        let clock = Arc::new(FixedClock::new(local(4, 8)));
        let pending = store
            .save_trade(Trade::new(
                TradeAction::Buy,
                "XYZ",
                100,
                dec!(15),
                AccountId(1),
                CustomerId(1),
                clock.now(),
            ))
            .await
            .unwrap();

        let scheduler = Arc::new(scheduler(store.clone(), clock, SchedulerConfig::default()));
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(rx).await }
        });

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert!(!store.get_trade(pending.id).await.unwrap().unwrap().processed);

        tokio::time::sleep(Duration::from_secs(31 * 60)).await;
        let admitted = store.get_trade(pending.id).await.unwrap().unwrap();
        assert!(admitted.processed);
        assert_eq!(admitted.status, TradeStatus::Open);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_scheduler_returns() {
        let store = Arc::new(InMemoryLedgerStore::new());
        let clock = Arc::new(FixedClock::new(local(4, 8)));
        let config = SchedulerConfig {
            enabled: false,
            admission_on_startup: false,
        };
        let (_tx, rx) = watch::channel(false);

        scheduler(store, clock, config).run(rx).await;
    }
}
