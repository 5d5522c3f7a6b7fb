//! Activity records — the unit of durable reward-tracking work

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One trackable miner/user action, tagged with its typed payload.
///
/// Serializes as `{"activity_type": "...", "activity_data": {...}}`, which
/// is exactly the shape the `/rewards/track` endpoint consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "activity_type", content = "activity_data", rename_all = "snake_case")]
pub enum ActivityKind {
    MiningStarted {
        session_id: String,
    },
    MiningStopped {
        session_id: String,
        duration_ms: i64,
    },
    JobPosted {
        job_id: String,
    },
    JobCompleted {
        job_id: String,
        duration_ms: i64,
        earned: f64,
    },
    TaskAssigned {
        task_id: String,
        job_id: String,
    },
    ValidationProvided {
        job_id: String,
        accepted: bool,
    },
    GpuDetected {
        device: String,
        memory_mb: u64,
    },
    GpuDetectionFailed {
        reason: String,
    },
    PlatformLogin {
        session_id: String,
    },
}

impl ActivityKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ActivityKind::MiningStarted { .. } => "mining_started",
            ActivityKind::MiningStopped { .. } => "mining_stopped",
            ActivityKind::JobPosted { .. } => "job_posted",
            ActivityKind::JobCompleted { .. } => "job_completed",
            ActivityKind::TaskAssigned { .. } => "task_assigned",
            ActivityKind::ValidationProvided { .. } => "validation_provided",
            ActivityKind::GpuDetected { .. } => "gpu_detected",
            ActivityKind::GpuDetectionFailed { .. } => "gpu_detection_failed",
            ActivityKind::PlatformLogin { .. } => "platform_login",
        }
    }

    /// Natural key of the underlying event, used for id derivation.
    /// Never a clock value: the id must survive a crash-restart unchanged
    /// so the remote can de-duplicate on it.
    pub fn natural_key(&self) -> &str {
        match self {
            ActivityKind::MiningStarted { session_id } => session_id,
            ActivityKind::MiningStopped { session_id, .. } => session_id,
            ActivityKind::JobPosted { job_id } => job_id,
            ActivityKind::JobCompleted { job_id, .. } => job_id,
            ActivityKind::TaskAssigned { task_id, .. } => task_id,
            ActivityKind::ValidationProvided { job_id, .. } => job_id,
            ActivityKind::GpuDetected { device, .. } => device,
            ActivityKind::GpuDetectionFailed { reason } => reason,
            ActivityKind::PlatformLogin { session_id } => session_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Pending,
    FailedPermanent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    #[serde(flatten)]
    pub kind: ActivityKind,
    pub wallet: String,
    pub timestamp_ms: i64,
    pub status: ActivityStatus,
    pub retry_count: u32,
    pub next_retry_at_ms: i64,
}

impl Activity {
    pub fn new(wallet: &str, kind: ActivityKind) -> Self {
        let id = derive_id(wallet, &kind);
        Self {
            id,
            kind,
            wallet: wallet.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            status: ActivityStatus::Pending,
            retry_count: 0,
            next_retry_at_ms: 0,
        }
    }

    /// Record a failed submission attempt and compute the next retry time:
    /// `now + retry_count * backoff_base`, so each attempt waits longer
    /// than the one before it.
    pub fn schedule_retry(&mut self, now_ms: i64, backoff_base_ms: i64) {
        self.retry_count += 1;
        self.next_retry_at_ms = now_ms + i64::from(self.retry_count) * backoff_base_ms;
    }

    pub fn is_due(&self, now_ms: i64) -> bool {
        now_ms >= self.next_retry_at_ms
    }
}

/// Deterministic activity id: sha256 over wallet, type tag, and the
/// payload's natural key. Two attempts to record the same logical event
/// always produce the same id, which is what makes restart-retry safe.
pub fn derive_id(wallet: &str, kind: &ActivityKind) -> String {
    let mut hasher = Sha256::new();
    hasher.update(wallet.as_bytes());
    hasher.update(b":");
    hasher.update(kind.tag().as_bytes());
    hasher.update(b":");
    hasher.update(kind.natural_key().as_bytes());
    hex::encode(hasher.finalize())
}
