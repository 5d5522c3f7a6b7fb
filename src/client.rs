//! Endpoint failover client for the AXON coordination API
//!
//! Holds an ordered list of candidate base URLs. A logical request makes at
//! most one full pass over the list: connection-level failures rotate to
//! the next endpoint, a well-formed error response is returned to the
//! caller as-is. Exhausting every endpoint flips the shared offline flag;
//! any subsequent response from a reachable endpoint clears it.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::activity::{Activity, ActivityKind};
use crate::config::ApiConfig;
use crate::error::{ClientError, Result};
use crate::hasher;
use crate::transfer::{CoordinationApi, JobMetadata, JobResults};

/// Response to a tracked activity submission.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackResponse {
    pub status: String,
    #[serde(default)]
    pub reward_amount: f64,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// Authoritative ledger state for one wallet.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletRewards {
    pub total_earned_estimate: f64,
    #[serde(default)]
    pub pending_activities: u32,
    #[serde(default)]
    pub failed_submissions: u32,
    #[serde(default)]
    pub last_sync: i64,
    pub wallet_address: String,
}

#[derive(Debug, Deserialize)]
struct CreatedJob {
    job: JobRef,
}

#[derive(Debug, Deserialize)]
struct JobRef {
    id: String,
}

#[derive(Serialize)]
struct TrackRequest<'a> {
    wallet_address: &'a str,
    #[serde(flatten)]
    kind: &'a ActivityKind,
    timestamp: i64,
    fingerprint: String,
}

/// The remote reward-ledger surface the tracker and reconciliation loop
/// depend on. Implemented by [`FailoverClient`]; tests substitute doubles.
#[async_trait]
pub trait RewardApi: Send + Sync {
    async fn track_activity(&self, activity: &Activity) -> Result<TrackResponse>;
    async fn wallet_rewards(&self, wallet: &str) -> Result<WalletRewards>;
    async fn probe_health(&self) -> Result<()>;
    fn offline(&self) -> bool;
}

pub struct FailoverClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    cursor: AtomicUsize,
    offline: Arc<AtomicBool>,
    request_timeout: Duration,
    probe_timeout: Duration,
}

impl FailoverClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        if config.endpoints.is_empty() {
            return Err(ClientError::Config("no API endpoints configured".into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            endpoints: config.endpoints.clone(),
            cursor: AtomicUsize::new(0),
            offline: Arc::new(AtomicBool::new(false)),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
        })
    }

    /// Shared offline flag. Written only by this client; read by the
    /// tracker, the reconciliation loop, and the realtime heartbeat.
    pub fn offline_flag(&self) -> Arc<AtomicBool> {
        self.offline.clone()
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Relaxed)
    }

    async fn request<T, B>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&B>,
        timeout: Duration,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + Sync,
    {
        let total = self.endpoints.len();
        let start = self.cursor.load(Ordering::Relaxed);

        for attempt in 0..total {
            let idx = (start + attempt) % total;
            let base = self.endpoints[idx].trim_end_matches('/');
            let url = format!("{base}{path}");

            let mut request = self.http.request(method.clone(), &url).timeout(timeout);
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    if attempt > 0 {
                        tracing::info!(endpoint = %base, "failed over to backup endpoint");
                    }
                    self.cursor.store(idx, Ordering::Relaxed);
                    self.offline.store(false, Ordering::Relaxed);
                    return decode(response).await;
                }
                Err(e) if is_transport(&e) => {
                    tracing::debug!(endpoint = %base, error = %e, "endpoint unreachable, rotating");
                }
                Err(e) => return Err(ClientError::Transport(e.to_string())),
            }
        }

        self.offline.store(true, Ordering::Relaxed);
        tracing::warn!(endpoints = total, "all endpoints unreachable, entering offline mode");
        Err(ClientError::AllEndpointsUnreachable)
    }
}

#[async_trait]
impl RewardApi for FailoverClient {
    async fn track_activity(&self, activity: &Activity) -> Result<TrackResponse> {
        let request = TrackRequest {
            wallet_address: &activity.wallet,
            kind: &activity.kind,
            timestamp: activity.timestamp_ms,
            fingerprint: hasher::sha256_hex(
                format!("{}:{}", activity.id, activity.wallet).as_bytes(),
            ),
        };
        let response: TrackResponse = self
            .request(
                reqwest::Method::POST,
                "/rewards/track",
                Some(&request),
                self.request_timeout,
            )
            .await?;

        // The endpoint reports failures in-band as well.
        if response.status != "success" {
            return Err(ClientError::Application {
                status: 200,
                message: format!("tracking rejected with status {:?}", response.status),
                retryable: true,
            });
        }
        Ok(response)
    }

    async fn wallet_rewards(&self, wallet: &str) -> Result<WalletRewards> {
        self.request(
            reqwest::Method::GET,
            &format!("/rewards/wallet/{wallet}"),
            Option::<&()>::None,
            self.request_timeout,
        )
        .await
    }

    /// Lightweight probe against the current preferred endpoint only.
    /// A response of any kind proves connectivity and clears offline mode;
    /// real requests handle rotation themselves.
    async fn probe_health(&self) -> Result<()> {
        let idx = self.cursor.load(Ordering::Relaxed) % self.endpoints.len();
        let base = self.endpoints[idx].trim_end_matches('/');
        let url = format!("{base}/health");

        match self.http.get(&url).timeout(self.probe_timeout).send().await {
            Ok(response) if response.status().is_success() => {
                if self.offline.swap(false, Ordering::Relaxed) {
                    tracing::info!(endpoint = %base, "connectivity restored, leaving offline mode");
                }
                Ok(())
            }
            Ok(response) => {
                self.offline.store(false, Ordering::Relaxed);
                Err(ClientError::Application {
                    status: response.status().as_u16(),
                    message: "health probe rejected".into(),
                    retryable: true,
                })
            }
            Err(e) => Err(ClientError::Transport(e.to_string())),
        }
    }

    fn offline(&self) -> bool {
        self.is_offline()
    }
}

#[async_trait]
impl CoordinationApi for FailoverClient {
    async fn create_job(&self, metadata: &JobMetadata) -> Result<String> {
        let created: CreatedJob = self
            .request(
                reqwest::Method::POST,
                "/jobs/create",
                Some(metadata),
                self.request_timeout,
            )
            .await?;
        Ok(created.job.id)
    }

    async fn submit_job_results(&self, job_id: &str, results: &JobResults) -> Result<()> {
        let _: serde_json::Value = self
            .request(
                reqwest::Method::POST,
                &format!("/jobs/{job_id}/results"),
                Some(results),
                self.request_timeout,
            )
            .await?;
        Ok(())
    }
}

/// Connection-level failures rotate endpoints; anything that produced an
/// HTTP status is an application-level concern for the caller.
fn is_transport(e: &reqwest::Error) -> bool {
    if e.is_builder() {
        return false;
    }
    e.is_connect() || e.is_timeout() || e.status().is_none()
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        response.json::<T>().await.map_err(|e| ClientError::Application {
            status: status.as_u16(),
            message: format!("malformed response body: {e}"),
            retryable: true,
        })
    } else {
        let body = response.text().await.unwrap_or_default();
        let (message, retryable) = parse_error_body(status.as_u16(), &body);
        Err(ClientError::Application {
            status: status.as_u16(),
            message,
            retryable,
        })
    }
}

/// Pull a message and retryability out of an error body. Explicit
/// `retryable` flags are honored; otherwise only payload-rejection codes
/// are treated as permanent, since losing a reward claim costs more than
/// retrying a doomed request a few extra times.
fn parse_error_body(status: u16, body: &str) -> (String, bool) {
    let default_retryable = !matches!(status, 400 | 422);
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let message = value
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or(body)
            .to_string();
        let retryable = value
            .get("retryable")
            .and_then(|r| r.as_bool())
            .unwrap_or(default_retryable);
        return (message, retryable);
    }
    (body.to_string(), default_retryable)
}
