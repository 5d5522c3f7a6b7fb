//! Rewards reconciliation
//!
//! A deliberately unaggressive periodic loop: probe connectivity when
//! offline, drain the tracker's due retries, then refresh the cached
//! rewards snapshot from the authoritative ledger. Reads through
//! [`RewardsService::status`] never touch the network; when the ledger is
//! unreachable the last cached snapshot is served marked as offline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::client::RewardApi;
use crate::config::RewardsConfig;
use crate::error::Result;
use crate::notify::{Notifier, Severity};
use crate::store::{ActivityStore, RewardsSnapshot};
use crate::tracker::ActivityTracker;

pub struct RewardsService {
    store: Arc<ActivityStore>,
    api: Arc<dyn RewardApi>,
    tracker: Arc<ActivityTracker>,
    notifier: Arc<dyn Notifier>,
    wallet: Option<String>,
    sync_interval: Duration,
}

impl RewardsService {
    pub fn new(
        store: Arc<ActivityStore>,
        api: Arc<dyn RewardApi>,
        tracker: Arc<ActivityTracker>,
        notifier: Arc<dyn Notifier>,
        wallet: Option<String>,
        config: &RewardsConfig,
    ) -> Self {
        Self {
            store,
            api,
            tracker,
            notifier,
            wallet,
            sync_interval: Duration::from_secs(config.sync_interval_secs),
        }
    }

    /// Current snapshot, served from cache with live local queue counts.
    /// Always defined — zero-valued before the first sync — and never
    /// blocks on the network.
    pub fn status(&self) -> RewardsSnapshot {
        let mut snapshot = self.store.snapshot();
        snapshot.pending_activities = self.store.pending_count() as u32;
        snapshot.failed_submissions = self.store.failed_count() as u32;
        snapshot.offline_mode = self.api.offline();
        snapshot
    }

    /// One reconciliation pass: probe, sweep, refresh.
    pub async fn sync_cycle(&self) -> Result<RewardsSnapshot> {
        if self.api.offline() {
            if let Err(e) = self.api.probe_health().await {
                tracing::debug!(error = %e, "health probe failed, staying offline");
            }
        }

        let report = self.tracker.sweep_due().await?;
        if report.submitted > 0 || report.demoted > 0 {
            tracing::info!(
                submitted = report.submitted,
                requeued = report.requeued,
                demoted = report.demoted,
                "retry sweep complete"
            );
        }

        if !self.api.offline() {
            if let Some(wallet) = &self.wallet {
                match self.api.wallet_rewards(wallet).await {
                    Ok(rewards) => {
                        let snapshot = RewardsSnapshot {
                            total_earned_estimate: rewards.total_earned_estimate,
                            pending_activities: self.store.pending_count() as u32,
                            failed_submissions: self.store.failed_count() as u32,
                            last_sync_ms: Utc::now().timestamp_millis(),
                            offline_mode: false,
                        };
                        self.store.set_snapshot(&snapshot)?;
                        return Ok(snapshot);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "ledger fetch failed, serving cached snapshot");
                    }
                }
            }
        }

        Ok(self.status())
    }

    /// Drive [`Self::sync_cycle`] forever on the configured interval.
    /// Failures degrade the view, they never stop the loop: tracking-side
    /// trouble must not interrupt mining or job submission.
    pub async fn run(self: Arc<Self>) {
        let mut timer = tokio::time::interval(self.sync_interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            match self.sync_cycle().await {
                Ok(snapshot) => tracing::debug!(
                    total = snapshot.total_earned_estimate,
                    pending = snapshot.pending_activities,
                    offline = snapshot.offline_mode,
                    "sync cycle complete"
                ),
                Err(e) => {
                    if e.is_fatal() {
                        self.notifier.notify(
                            &format!("Reward tracking degraded: {e}; manual reconciliation may be needed"),
                            Severity::Error,
                        );
                    }
                    tracing::warn!(error = %e, "sync cycle failed");
                }
            }
        }
    }
}
