//! Durable activity store
//!
//! Append-only local persistence for activity records and the cached
//! rewards snapshot. An activity is flushed to disk before any network
//! attempt; a crash between persist and submit therefore never loses a
//! record. Writes go to a temp file and are renamed into place so a crash
//! mid-write never leaves a truncated file behind.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::activity::{Activity, ActivityStatus};
use crate::error::{ClientError, Result};

const PENDING_FILE: &str = "pending.json";
const FAILED_FILE: &str = "failed.json";
const SNAPSHOT_FILE: &str = "snapshot.json";

/// Cached view of remote ledger state, overwritten wholesale on every
/// successful reconciliation and served as-is when offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardsSnapshot {
    pub total_earned_estimate: f64,
    pub pending_activities: u32,
    pub failed_submissions: u32,
    pub last_sync_ms: i64,
    pub offline_mode: bool,
}

impl Default for RewardsSnapshot {
    fn default() -> Self {
        Self {
            total_earned_estimate: 0.0,
            pending_activities: 0,
            failed_submissions: 0,
            last_sync_ms: 0,
            offline_mode: false,
        }
    }
}

struct StoreInner {
    pending: HashMap<String, Activity>,
    failed: HashMap<String, Activity>,
    snapshot: RewardsSnapshot,
}

pub struct ActivityStore {
    dir: PathBuf,
    inner: Mutex<StoreInner>,
}

impl ActivityStore {
    /// Open (or create) a store under `dir`, loading any prior state.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .map_err(|e| ClientError::Storage(format!("create {}: {e}", dir.display())))?;

        let pending: Vec<Activity> = read_json(&dir.join(PENDING_FILE))?.unwrap_or_default();
        let failed: Vec<Activity> = read_json(&dir.join(FAILED_FILE))?.unwrap_or_default();
        let snapshot: RewardsSnapshot = read_json(&dir.join(SNAPSHOT_FILE))?.unwrap_or_default();

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: Mutex::new(StoreInner {
                pending: pending.into_iter().map(|a| (a.id.clone(), a)).collect(),
                failed: failed.into_iter().map(|a| (a.id.clone(), a)).collect(),
                snapshot,
            }),
        })
    }

    /// Persist a pending activity. Flushed before this returns; the caller
    /// may only proceed to network I/O once this has succeeded.
    pub fn append(&self, activity: &Activity) -> Result<()> {
        let mut inner = self.lock();
        inner.pending.insert(activity.id.clone(), activity.clone());
        self.flush_pending(&inner)
    }

    /// Overwrite an existing pending record (retry bookkeeping).
    pub fn update(&self, activity: &Activity) -> Result<()> {
        self.append(activity)
    }

    /// Delete a record after confirmed remote success. Returns whether the
    /// record was still present, so the caller folds each confirmed
    /// submission into the cached totals at most once.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut inner = self.lock();
        if inner.pending.remove(id).is_none() {
            return Ok(false);
        }
        self.flush_pending(&inner)?;
        Ok(true)
    }

    /// Move a pending record to the terminal failed set, retained for
    /// audit and manual reconciliation.
    pub fn mark_failed_permanent(&self, activity: &Activity) -> Result<()> {
        let mut inner = self.lock();
        inner.pending.remove(&activity.id);
        let mut failed = activity.clone();
        failed.status = ActivityStatus::FailedPermanent;
        inner.failed.insert(failed.id.clone(), failed);
        self.flush_pending(&inner)?;
        self.flush_failed(&inner)
    }

    pub fn get_pending(&self, id: &str) -> Option<Activity> {
        self.lock().pending.get(id).cloned()
    }

    pub fn list_pending(&self) -> Vec<Activity> {
        self.lock().pending.values().cloned().collect()
    }

    pub fn list_failed_permanent(&self) -> Vec<Activity> {
        self.lock().failed.values().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn failed_count(&self) -> usize {
        self.lock().failed.len()
    }

    pub fn snapshot(&self) -> RewardsSnapshot {
        self.lock().snapshot.clone()
    }

    pub fn set_snapshot(&self, snapshot: &RewardsSnapshot) -> Result<()> {
        let mut inner = self.lock();
        inner.snapshot = snapshot.clone();
        write_json(&self.dir.join(SNAPSHOT_FILE), snapshot)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        // A poisoned mutex means a writer panicked mid-update; the maps are
        // still structurally valid, so recover the guard and continue.
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn flush_pending(&self, inner: &StoreInner) -> Result<()> {
        let records: Vec<&Activity> = inner.pending.values().collect();
        write_json(&self.dir.join(PENDING_FILE), &records)
    }

    fn flush_failed(&self, inner: &StoreInner) -> Result<()> {
        let records: Vec<&Activity> = inner.failed.values().collect();
        write_json(&self.dir.join(FAILED_FILE), &records)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let value = serde_json::from_str(&contents)
                .map_err(|e| ClientError::Storage(format!("parse {}: {e}", path.display())))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ClientError::Storage(format!("read {}: {e}", path.display()))),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| ClientError::Storage(format!("serialize {}: {e}", path.display())))?;
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)
        .map_err(|e| ClientError::Storage(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| ClientError::Storage(format!("rename {}: {e}", path.display())))
}
