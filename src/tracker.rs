//! Activity tracker — the durable submit-or-queue state machine
//!
//! Every trackable action is persisted before any network attempt, then
//! submitted through the failover client. Failures go onto a retry queue
//! keyed by next-retry time; crossing the retry ceiling demotes the record
//! to a terminal failed set kept for audit. Confirmed submissions remove
//! the record and fold the server-reported reward into the cached snapshot.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use chrono::Utc;

use crate::activity::{Activity, ActivityKind};
use crate::client::RewardApi;
use crate::config::TrackerConfig;
use crate::error::{ClientError, Result};
use crate::notify::{Notifier, Severity};
use crate::store::ActivityStore;

/// What became of one submission attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SubmitOutcome {
    Submitted { reward_amount: f64 },
    Queued { next_retry_at_ms: i64 },
    FailedPermanent,
    /// The record was already settled by another attempt.
    AlreadySettled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub submitted: usize,
    pub requeued: usize,
    pub demoted: usize,
}

pub struct ActivityTracker {
    store: Arc<ActivityStore>,
    api: Arc<dyn RewardApi>,
    notifier: Arc<dyn Notifier>,
    wallet: Option<String>,
    backoff_base_ms: i64,
    retry_ceiling: u32,
    retry_queue: Mutex<BinaryHeap<Reverse<(i64, String)>>>,
}

impl ActivityTracker {
    /// Build a tracker over an opened store, rebuilding the retry queue
    /// from whatever pending records survived the last process.
    pub fn new(
        store: Arc<ActivityStore>,
        api: Arc<dyn RewardApi>,
        notifier: Arc<dyn Notifier>,
        wallet: Option<String>,
        config: &TrackerConfig,
    ) -> Self {
        let mut queue = BinaryHeap::new();
        for activity in store.list_pending() {
            queue.push(Reverse((activity.next_retry_at_ms, activity.id)));
        }
        if !queue.is_empty() {
            tracing::info!(recovered = queue.len(), "recovered pending activities from store");
        }
        Self {
            store,
            api,
            notifier,
            wallet,
            backoff_base_ms: config.backoff_base_secs as i64 * 1000,
            retry_ceiling: config.retry_ceiling,
            retry_queue: Mutex::new(queue),
        }
    }

    /// Record one activity: persist it, then submit or queue it.
    ///
    /// An activity tracked while no wallet is connected is dropped outright,
    /// never queued — the identity layer above is mis-sequenced and queueing
    /// would attribute the action to nobody.
    pub async fn track(&self, kind: ActivityKind) -> Result<SubmitOutcome> {
        let Some(wallet) = &self.wallet else {
            tracing::warn!(kind = kind.tag(), "dropping activity tracked with no wallet connected");
            return Err(ClientError::MissingWallet);
        };
        let activity = Activity::new(wallet, kind);

        // Durability before any network I/O. A crash from here on leaves a
        // pending record the next startup re-queues.
        self.store.append(&activity)?;
        tracing::debug!(activity_id = %activity.id, kind = activity.kind.tag(), "activity persisted");

        if self.api.offline() {
            self.push_retry(activity.next_retry_at_ms, activity.id.clone());
            tracing::debug!(activity_id = %activity.id, "offline, queued without submission attempt");
            return Ok(SubmitOutcome::Queued {
                next_retry_at_ms: activity.next_retry_at_ms,
            });
        }
        self.attempt(activity).await
    }

    /// Re-attempt every queued activity whose retry time has arrived.
    ///
    /// One pass per call: the due set is drained up front, so an activity
    /// that fails again and re-queues waits for the next sweep instead of
    /// being hammered within this one.
    pub async fn sweep_due(&self) -> Result<SweepReport> {
        let now = now_ms();
        let due = {
            let mut queue = self.lock_queue();
            let mut due = Vec::new();
            while let Some(Reverse((at, _))) = queue.peek() {
                if *at > now {
                    break;
                }
                if let Some(Reverse((_, id))) = queue.pop() {
                    due.push(id);
                }
            }
            due
        };

        let mut report = SweepReport::default();
        for (idx, id) in due.iter().enumerate() {
            let Some(activity) = self.store.get_pending(id) else {
                // Settled or demoted since it was queued.
                continue;
            };
            if !activity.is_due(now) {
                // Stale queue entry; a fresher one carries the real retry time.
                continue;
            }

            match self.attempt(activity).await {
                Ok(SubmitOutcome::Submitted { .. }) => report.submitted += 1,
                Ok(SubmitOutcome::Queued { .. }) => report.requeued += 1,
                Ok(SubmitOutcome::FailedPermanent) => report.demoted += 1,
                Ok(SubmitOutcome::AlreadySettled) => {}
                Err(e) => {
                    // Keep this id and the unprocessed rest reachable by the
                    // next sweep before propagating.
                    let mut queue = self.lock_queue();
                    for id in &due[idx..] {
                        queue.push(Reverse((now, id.clone())));
                    }
                    return Err(e);
                }
            }
        }

        Ok(report)
    }

    async fn attempt(&self, mut activity: Activity) -> Result<SubmitOutcome> {
        match self.api.track_activity(&activity).await {
            Ok(response) => {
                if !self.store.remove(&activity.id)? {
                    return Ok(SubmitOutcome::AlreadySettled);
                }
                self.fold_reward(response.reward_amount)?;
                tracing::info!(
                    activity_id = %activity.id,
                    kind = activity.kind.tag(),
                    reward = response.reward_amount,
                    transaction = response.transaction_id.as_deref().unwrap_or("-"),
                    "activity submitted"
                );
                if response.reward_amount > 0.0 {
                    self.notifier.notify(
                        &format!(
                            "Earned {} AXON for {}",
                            response.reward_amount,
                            activity.kind.tag()
                        ),
                        Severity::Info,
                    );
                }
                Ok(SubmitOutcome::Submitted {
                    reward_amount: response.reward_amount,
                })
            }
            Err(e) if e.is_retryable() => {
                activity.schedule_retry(now_ms(), self.backoff_base_ms);
                if activity.retry_count > self.retry_ceiling {
                    self.demote(&activity, &e)?;
                    return Ok(SubmitOutcome::FailedPermanent);
                }
                self.store.update(&activity)?;
                self.push_retry(activity.next_retry_at_ms, activity.id.clone());
                tracing::debug!(
                    activity_id = %activity.id,
                    retry = activity.retry_count,
                    error = %e,
                    "submission failed, queued for retry"
                );
                Ok(SubmitOutcome::Queued {
                    next_retry_at_ms: activity.next_retry_at_ms,
                })
            }
            Err(e) => {
                // Permanent application rejection: the backoff ladder would
                // only replay a doomed request.
                self.demote(&activity, &e)?;
                Ok(SubmitOutcome::FailedPermanent)
            }
        }
    }

    fn demote(&self, activity: &Activity, cause: &ClientError) -> Result<()> {
        self.store.mark_failed_permanent(activity)?;
        tracing::error!(
            activity_id = %activity.id,
            kind = activity.kind.tag(),
            retries = activity.retry_count,
            error = %cause,
            "activity permanently failed"
        );
        self.notifier.notify(
            &format!(
                "Could not record {} after {} attempts; manual reconciliation may be needed",
                activity.kind.tag(),
                activity.retry_count
            ),
            Severity::Error,
        );
        Ok(())
    }

    fn fold_reward(&self, amount: f64) -> Result<()> {
        let mut snapshot = self.store.snapshot();
        snapshot.total_earned_estimate += amount;
        snapshot.pending_activities = self.store.pending_count() as u32;
        snapshot.failed_submissions = self.store.failed_count() as u32;
        self.store.set_snapshot(&snapshot)
    }

    fn push_retry(&self, due_ms: i64, id: String) {
        self.lock_queue().push(Reverse((due_ms, id)));
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, BinaryHeap<Reverse<(i64, String)>>> {
        match self.retry_queue.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
