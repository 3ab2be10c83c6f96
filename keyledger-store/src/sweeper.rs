//! Expiry sweeper: periodically expires keys whose cryptoperiod has elapsed.
//!
//! A sweep lists due keys, then expires each one through the lifecycle
//! engine. Keys that changed state between the listing and the write are
//! skipped rather than failed, so manual operations and the sweeper can
//! race freely.

use chrono::{DateTime, Utc};
use keyledger::CryptoKeyId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audit::{AuditAction, AuditEvent};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::Ledger;
use crate::lifecycle::ExpiryCheck;
use crate::storage::Store;

/// Actor recorded on transitions made by the sweeper.
pub const SWEEPER_ACTOR: &str = "expiry-sweeper";

#[derive(Clone, Debug)]
pub struct SweeperConfig {
    /// Time between sweeps.
    pub interval: Duration,
    /// Report keys expiring within this window. `None` disables warnings.
    pub warn_within: Option<chrono::Duration>,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            warn_within: None,
        }
    }
}

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub expired: Vec<CryptoKeyId>,
    /// Keys listed as due that had moved on by the time they were written.
    pub skipped: usize,
    pub failed: Vec<(CryptoKeyId, String)>,
    /// Keys expiring within the warning window.
    pub upcoming: Vec<(CryptoKeyId, DateTime<Utc>)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SweepOutcome {
    Completed(SweepReport),
    /// Another sweep was still running.
    Skipped,
}

pub struct ExpirySweeper {
    ledger: Ledger,
    store: Arc<dyn Store>,
    config: SweeperConfig,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag even if the sweep panics.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ExpirySweeper {
    pub fn new(ledger: Ledger, store: Arc<dyn Store>, config: SweeperConfig) -> Self {
        Self {
            ledger,
            store,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Run one sweep on the current thread.
    ///
    /// Returns [`SweepOutcome::Skipped`] without touching the store when a
    /// sweep is already in progress.
    pub fn sweep(&self) -> LedgerResult<SweepOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("sweep already running, skipping");
            return Ok(SweepOutcome::Skipped);
        }
        let _guard = InFlight(&self.in_flight);
        self.sweep_once().map(SweepOutcome::Completed)
    }

    fn sweep_once(&self) -> LedgerResult<SweepReport> {
        let store = self.store.as_ref();
        let engine = self.ledger.lifecycle().acting_as(SWEEPER_ACTOR);
        let mut report = SweepReport {
            started_at: self.ledger.now(),
            ..SweepReport::default()
        };

        for key in store.due_for_expiry(report.started_at)? {
            match engine.check_expiry(store, &key.id) {
                Ok(ExpiryCheck::Expired(_)) => report.expired.push(key.id),
                Ok(ExpiryCheck::NotDue { .. })
                | Err(LedgerError::InvalidTransition { .. })
                | Err(LedgerError::NotFound { .. }) => report.skipped += 1,
                Err(e) => {
                    tracing::warn!(key_id = %key.id, error = %e, "failed to expire key");
                    report.failed.push((key.id, e.to_string()));
                }
            }
        }

        let until = self
            .config
            .warn_within
            .and_then(|window| report.started_at.checked_add_signed(window));
        if let Some(until) = until {
            for key in store.expiring_between(report.started_at, until)? {
                tracing::warn!(
                    key_id = %key.id,
                    key_type_id = %key.key_type_id,
                    expires_at = %key.expires_at,
                    "key approaching expiry"
                );
                report.upcoming.push((key.id, key.expires_at));
            }
        }

        tracing::info!(
            expired = report.expired.len(),
            skipped = report.skipped,
            failed = report.failed.len(),
            upcoming = report.upcoming.len(),
            "expiry sweep completed"
        );
        let mut event = AuditEvent::system_event(
            report.started_at,
            AuditAction::SweepCompleted {
                expired: report.expired.len(),
                skipped: report.skipped,
                failed: report.failed.len(),
                upcoming: report.upcoming.len(),
            },
        )
        .with_actor(SWEEPER_ACTOR);
        if !report.failed.is_empty() {
            event = event.with_failure();
        }
        self.ledger.audit(event);

        Ok(report)
    }

    /// Sweep on every tick until the task is dropped. The first sweep runs
    /// immediately.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let sweeper = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || sweeper.sweep()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => tracing::error!(error = %err, "expiry sweep failed"),
                Err(err) => tracing::error!(?err, "expiry sweep task join error"),
            }
        }
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tracing::info!(interval_secs = self.config.interval.as_secs(), "starting expiry sweeper");
        tokio::spawn(self.run())
    }
}
