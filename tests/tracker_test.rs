//! Tracker and reconciliation behavior against an in-memory reward ledger.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use axon_client::activity::{derive_id, Activity, ActivityKind, ActivityStatus};
use axon_client::client::{RewardApi, TrackResponse, WalletRewards};
use axon_client::config::{RewardsConfig, TrackerConfig};
use axon_client::error::{ClientError, Result};
use axon_client::notify::{Notifier, Severity};
use axon_client::rewards::RewardsService;
use axon_client::store::ActivityStore;
use axon_client::tracker::{ActivityTracker, SubmitOutcome, SweepReport};

/// Idempotent ledger double: duplicate ids are acknowledged but never
/// credited twice, matching the remote contract the tracker relies on.
struct FakeApi {
    reachable: AtomicBool,
    offline: AtomicBool,
    reject_permanently: bool,
    job_reward: f64,
    calls: AtomicU32,
    seen: Mutex<HashSet<String>>,
    credited: Mutex<f64>,
}

impl FakeApi {
    fn new(reachable: bool, job_reward: f64) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
            offline: AtomicBool::new(false),
            reject_permanently: false,
            job_reward,
            calls: AtomicU32::new(0),
            seen: Mutex::new(HashSet::new()),
            credited: Mutex::new(0.0),
        }
    }

    fn rejecting() -> Self {
        let mut api = Self::new(true, 0.0);
        api.reject_permanently = true;
        api
    }

    fn set_reachable(&self, up: bool) {
        self.reachable.store(up, Ordering::SeqCst);
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn credited(&self) -> f64 {
        *self.credited.lock().unwrap()
    }

    fn transport_failure(&self) -> ClientError {
        self.offline.store(true, Ordering::SeqCst);
        ClientError::AllEndpointsUnreachable
    }
}

#[async_trait]
impl RewardApi for FakeApi {
    async fn track_activity(&self, activity: &Activity) -> Result<TrackResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.transport_failure());
        }
        if self.reject_permanently {
            return Err(ClientError::Application {
                status: 400,
                message: "malformed payload".into(),
                retryable: false,
            });
        }
        self.offline.store(false, Ordering::SeqCst);

        let fresh = self.seen.lock().unwrap().insert(activity.id.clone());
        let reward = match &activity.kind {
            ActivityKind::JobCompleted { .. } => self.job_reward,
            _ => 0.0,
        };
        if fresh {
            *self.credited.lock().unwrap() += reward;
        }
        Ok(TrackResponse {
            status: "success".into(),
            reward_amount: reward,
            transaction_id: Some(format!("tx-{}", self.calls())),
        })
    }

    async fn wallet_rewards(&self, wallet: &str) -> Result<WalletRewards> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.transport_failure());
        }
        self.offline.store(false, Ordering::SeqCst);
        Ok(WalletRewards {
            total_earned_estimate: self.credited(),
            pending_activities: 0,
            failed_submissions: 0,
            last_sync: 0,
            wallet_address: wallet.into(),
        })
    }

    async fn probe_health(&self) -> Result<()> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(self.transport_failure());
        }
        self.offline.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<(String, Severity)>>,
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), severity));
    }
}

fn tracker_config() -> TrackerConfig {
    TrackerConfig {
        backoff_base_secs: 0,
        retry_ceiling: 5,
    }
}

fn job_completed(job: &str) -> ActivityKind {
    ActivityKind::JobCompleted {
        job_id: job.to_string(),
        duration_ms: 4200,
        earned: 2.5,
    }
}

fn tracker(
    store: Arc<ActivityStore>,
    api: Arc<FakeApi>,
    notifier: Arc<RecordingNotifier>,
) -> ActivityTracker {
    ActivityTracker::new(store, api, notifier, Some("0xW1".into()), &tracker_config())
}

#[tokio::test]
async fn crash_before_submit_is_recovered_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let api = Arc::new(FakeApi::new(false, 2.5));
    let notifier = Arc::new(RecordingNotifier::default());

    // First process: track while the network is down, then "crash".
    {
        let store = Arc::new(ActivityStore::open(dir.path()).unwrap());
        let t = tracker(store, api.clone(), notifier.clone());
        let outcome = t.track(job_completed("job-1")).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));
    }

    // Restart with the network back: the sweep submits exactly once.
    api.set_reachable(true);
    let store = Arc::new(ActivityStore::open(dir.path()).unwrap());
    let t = tracker(store.clone(), api.clone(), notifier);
    let report = t.sweep_due().await.unwrap();
    assert_eq!(report.submitted, 1);
    assert!(store.list_pending().is_empty());
    assert_eq!(api.credited(), 2.5);

    let expected_id = derive_id("0xW1", &job_completed("job-1"));
    assert!(api.seen.lock().unwrap().contains(&expected_id));

    // Nothing left to retry.
    assert_eq!(t.sweep_due().await.unwrap(), SweepReport::default());
}

#[tokio::test]
async fn resubmission_after_restart_folds_reward_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ActivityStore::open(dir.path()).unwrap());
    let api = Arc::new(FakeApi::new(true, 2.5));
    let notifier = Arc::new(RecordingNotifier::default());

    // A crash happened after the remote confirmed but before the local
    // record was removed: the pending record is all that survives.
    let activity = Activity::new("0xW1", job_completed("job-1"));
    store.append(&activity).unwrap();

    // Two trackers over the same store, as a restart race would produce.
    let first = tracker(store.clone(), api.clone(), notifier.clone());
    let second = tracker(store.clone(), api.clone(), notifier);

    let report = first.sweep_due().await.unwrap();
    assert_eq!(report.submitted, 1);
    assert_eq!(store.snapshot().total_earned_estimate, 2.5);

    // The second queue still holds the id, but the record is settled.
    assert_eq!(second.sweep_due().await.unwrap(), SweepReport::default());
    assert_eq!(store.snapshot().total_earned_estimate, 2.5);
    assert_eq!(api.calls(), 1);
}

#[tokio::test]
async fn retry_ceiling_demotes_permanently() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ActivityStore::open(dir.path()).unwrap());
    let api = Arc::new(FakeApi::new(false, 0.0));
    let notifier = Arc::new(RecordingNotifier::default());
    let t = tracker(store.clone(), api.clone(), notifier.clone());

    let outcome = t.track(job_completed("job-1")).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued { .. }));

    let mut demoted = 0;
    let mut sweeps = 0;
    while demoted == 0 {
        sweeps += 1;
        assert!(sweeps <= 10, "ceiling never reached");
        demoted = t.sweep_due().await.unwrap().demoted;
    }

    assert!(store.list_pending().is_empty());
    let failed = store.list_failed_permanent();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].status, ActivityStatus::FailedPermanent);
    assert_eq!(failed[0].retry_count, 6);

    // Terminal: no further automatic attempts.
    let calls = api.calls();
    assert_eq!(t.sweep_due().await.unwrap(), SweepReport::default());
    assert_eq!(api.calls(), calls);

    let messages = notifier.messages.lock().unwrap();
    assert!(messages.iter().any(|(_, s)| *s == Severity::Error));
}

#[tokio::test]
async fn permanent_rejection_skips_the_backoff_ladder() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ActivityStore::open(dir.path()).unwrap());
    let api = Arc::new(FakeApi::rejecting());
    let notifier = Arc::new(RecordingNotifier::default());
    let t = tracker(store.clone(), api.clone(), notifier);

    let outcome = t.track(job_completed("job-1")).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::FailedPermanent);
    assert_eq!(api.calls(), 1);
    assert!(store.list_pending().is_empty());
    assert_eq!(store.list_failed_permanent().len(), 1);
}

#[tokio::test]
async fn activities_without_wallet_are_dropped_not_queued() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ActivityStore::open(dir.path()).unwrap());
    let api = Arc::new(FakeApi::new(true, 0.0));
    let t = ActivityTracker::new(
        store.clone(),
        api.clone(),
        Arc::new(RecordingNotifier::default()),
        None,
        &tracker_config(),
    );

    let err = t.track(job_completed("job-1")).await.unwrap_err();
    assert!(matches!(err, ClientError::MissingWallet));
    assert!(store.list_pending().is_empty());
    assert_eq!(api.calls(), 0);
}

fn rewards_service(
    store: Arc<ActivityStore>,
    api: Arc<FakeApi>,
    t: Arc<ActivityTracker>,
) -> RewardsService {
    RewardsService::new(
        store,
        api,
        t,
        Arc::new(RecordingNotifier::default()),
        Some("0xW1".into()),
        &RewardsConfig {
            sync_interval_secs: 90,
        },
    )
}

#[tokio::test]
async fn status_is_always_defined_even_with_no_network() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ActivityStore::open(dir.path()).unwrap());
    let api = Arc::new(FakeApi::new(false, 0.0));
    let notifier = Arc::new(RecordingNotifier::default());
    let t = Arc::new(tracker(store.clone(), api.clone(), notifier));
    let service = rewards_service(store, api, t);

    let snapshot = service.status();
    assert_eq!(snapshot.total_earned_estimate, 0.0);
    assert_eq!(snapshot.pending_activities, 0);
    assert_eq!(snapshot.failed_submissions, 0);
    assert_eq!(snapshot.last_sync_ms, 0);

    // A full cycle with everything unreachable still returns a view.
    let after = service.sync_cycle().await.unwrap();
    assert_eq!(after.total_earned_estimate, 0.0);
    assert!(after.offline_mode);
}

#[tokio::test]
async fn sync_overwrites_snapshot_from_the_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ActivityStore::open(dir.path()).unwrap());
    let api = Arc::new(FakeApi::new(true, 2.5));
    let notifier = Arc::new(RecordingNotifier::default());
    let t = Arc::new(tracker(store.clone(), api.clone(), notifier));

    t.track(job_completed("job-1")).await.unwrap();
    let service = rewards_service(store.clone(), api, t);

    let snapshot = service.sync_cycle().await.unwrap();
    assert_eq!(snapshot.total_earned_estimate, 2.5);
    assert!(!snapshot.offline_mode);
    assert!(snapshot.last_sync_ms > 0);
    assert_eq!(store.snapshot(), snapshot);
}

#[tokio::test]
async fn offline_then_recovery_settles_the_queued_activity() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ActivityStore::open(dir.path()).unwrap());
    let api = Arc::new(FakeApi::new(true, 2.5));
    let notifier = Arc::new(RecordingNotifier::default());
    let t = Arc::new(tracker(store.clone(), api.clone(), notifier));
    let service = rewards_service(store.clone(), api.clone(), t.clone());

    // Mining starts while online: submitted, reward 0.
    let outcome = t
        .track(ActivityKind::MiningStarted {
            session_id: "s1".into(),
        })
        .await
        .unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Submitted { reward_amount: 0.0 }
    );

    // Network goes down; the job completion stays pending.
    api.set_reachable(false);
    let outcome = t.track(job_completed("job-1")).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::Queued { .. }));

    let view = service.sync_cycle().await.unwrap();
    assert!(view.offline_mode);
    assert_eq!(view.total_earned_estimate, 0.0);
    assert_eq!(view.pending_activities, 1);

    // Network restored: the next cycle probes, sweeps, and reconciles.
    api.set_reachable(true);
    let view = service.sync_cycle().await.unwrap();
    assert!(!view.offline_mode);
    assert_eq!(view.total_earned_estimate, 2.5);
    assert_eq!(view.pending_activities, 0);
    assert!(store.list_pending().is_empty());
}
