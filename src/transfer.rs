//! Content-addressed dataset transfer
//!
//! Bulk job data never travels through the coordination API. Files are
//! chunked, pushed to content-addressed storage, and referenced from a
//! lightweight [`JobMetadata`] descriptor; retrieval re-verifies every
//! checksum and refuses to hand back corrupted bytes.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::config::TransferConfig;
use crate::error::{ClientError, Result};
use crate::hasher;

/// One uploaded file: whole-file digest plus the ordered chunk ids that
/// reassemble it. `checksum` is recomputed and compared on every fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub content_hash: String,
    pub file_name: String,
    pub file_size: u64,
    pub checksum: String,
    pub chunks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub cpus: u32,
    pub memory_mb: u64,
    pub gpu: bool,
}

/// Job descriptor submitted to the coordination service. Content hashes
/// and requirements only — O(1) in dataset size by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub files: Vec<TransferRecord>,
    pub requirements: ResourceRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResults {
    #[serde(rename = "resultsHash")]
    pub results_hash: String,
    #[serde(rename = "resultSize")]
    pub result_size: u64,
    #[serde(rename = "completedAt")]
    pub completed_at: String,
}

#[derive(Debug, Clone)]
pub struct FetchedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Content-addressed blob storage: put bytes, get them back by id.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>) -> Result<String>;
    async fn get(&self, cid: &str) -> Result<Vec<u8>>;
}

/// The coordination-service surface the transfer path needs.
#[async_trait]
pub trait CoordinationApi: Send + Sync {
    async fn create_job(&self, metadata: &JobMetadata) -> Result<String>;
    async fn submit_job_results(&self, job_id: &str, results: &JobResults) -> Result<()>;
}

/// IPFS-style gateway client.
pub struct HttpContentStore {
    gateway: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpContentStore {
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            gateway: config.gateway.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            timeout: Duration::from_secs(config.chunk_timeout_secs),
        }
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    async fn put(&self, bytes: Vec<u8>) -> Result<String> {
        #[derive(Deserialize)]
        struct AddResponse {
            #[serde(rename = "Hash")]
            hash: String,
        }

        let part = reqwest::multipart::Part::bytes(bytes).file_name("chunk");
        let form = reqwest::multipart::Form::new().part("file", part);
        let url = format!("{}/api/v0/add", self.gateway);

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::Transfer(format!(
                "gateway returned {} on add",
                response.status()
            )));
        }
        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Transfer(format!("malformed gateway response: {e}")))?;
        Ok(added.hash)
    }

    async fn get(&self, cid: &str) -> Result<Vec<u8>> {
        let url = format!("{}/ipfs/{}", self.gateway, cid);
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClientError::Transfer(format!(
                "gateway returned {} for {cid}",
                response.status()
            )));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

pub struct TransferCoordinator {
    store: Arc<dyn ContentStore>,
    api: Arc<dyn CoordinationApi>,
    chunk_size: usize,
    max_concurrent: usize,
    chunk_retries: u32,
}

impl TransferCoordinator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        api: Arc<dyn CoordinationApi>,
        config: &TransferConfig,
    ) -> Self {
        Self {
            store,
            api,
            chunk_size: config.chunk_size_bytes,
            max_concurrent: config.max_concurrent_uploads,
            chunk_retries: config.chunk_retries,
        }
    }

    /// Upload every input file to content-addressed storage and return
    /// the descriptors. Chunk uploads run through a bounded worker pool;
    /// a chunk that still fails after its retries fails the whole dataset.
    pub async fn upload_dataset(&self, files: &[std::path::PathBuf]) -> Result<Vec<TransferRecord>> {
        let mut records = Vec::with_capacity(files.len());
        for path in files {
            records.push(self.upload_file(path).await?);
        }
        Ok(records)
    }

    /// Full submission flow: upload the dataset, then register the job
    /// with the coordination service using metadata only.
    pub async fn submit_job(
        &self,
        files: &[std::path::PathBuf],
        requirements: ResourceRequirements,
    ) -> Result<(String, JobMetadata)> {
        let records = self.upload_dataset(files).await?;
        let metadata = JobMetadata {
            files: records,
            requirements,
        };
        let job_id = self.api.create_job(&metadata).await?;
        tracing::info!(job_id = %job_id, files = metadata.files.len(), "job created");
        Ok((job_id, metadata))
    }

    /// Retrieve a dataset by its descriptors. Every file's checksum is
    /// recomputed after reassembly; a mismatch is a hard error, never a
    /// warning.
    pub async fn fetch_dataset(&self, metadata: &JobMetadata) -> Result<Vec<FetchedFile>> {
        let mut files = Vec::with_capacity(metadata.files.len());
        for record in &metadata.files {
            let mut bytes = Vec::with_capacity(record.file_size as usize);
            for cid in &record.chunks {
                let chunk = get_with_retry(self.store.clone(), cid, self.chunk_retries).await?;
                bytes.extend_from_slice(&chunk);
            }
            let actual = hasher::sha256_hex(&bytes);
            if actual != record.checksum {
                return Err(ClientError::ChecksumMismatch {
                    file_name: record.file_name.clone(),
                    expected: record.checksum.clone(),
                    actual,
                });
            }
            files.push(FetchedFile {
                file_name: record.file_name.clone(),
                bytes,
            });
        }
        Ok(files)
    }

    /// Push job output and report its reference to the coordination
    /// service. Same push-then-reference pattern as dataset upload.
    pub async fn submit_results(&self, job_id: &str, result_bytes: Vec<u8>) -> Result<String> {
        let results_hash = hasher::sha256_hex(&result_bytes);
        let result_size = result_bytes.len() as u64;
        put_with_retry(self.store.clone(), result_bytes, self.chunk_retries).await?;

        let results = JobResults {
            results_hash: results_hash.clone(),
            result_size,
            completed_at: Utc::now().to_rfc3339(),
        };
        self.api.submit_job_results(job_id, &results).await?;
        Ok(results_hash)
    }

    async fn upload_file(&self, path: &Path) -> Result<TransferRecord> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(String::from)
            .ok_or_else(|| ClientError::Transfer(format!("invalid file name: {}", path.display())))?;

        let checksum = hasher::hash_file(path)
            .map_err(|e| ClientError::Transfer(format!("read {}: {e}", path.display())))?;
        let file_size = std::fs::metadata(path)
            .map_err(|e| ClientError::Transfer(format!("stat {}: {e}", path.display())))?
            .len();

        let total_chunks = chunk_count(file_size, self.chunk_size);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks: JoinSet<Result<(usize, String)>> = JoinSet::new();

        for idx in 0..total_chunks {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| ClientError::Transfer("upload pool closed".into()))?;
            let store = self.store.clone();
            let path = path.to_path_buf();
            let offset = idx as u64 * self.chunk_size as u64;
            let len = std::cmp::min(self.chunk_size as u64, file_size - offset) as usize;
            let retries = self.chunk_retries;

            tasks.spawn(async move {
                let _permit = permit;
                let bytes = read_chunk(&path, offset, len).await?;
                let cid = put_with_retry(store, bytes, retries).await?;
                Ok((idx, cid))
            });
        }

        let mut chunks = vec![String::new(); total_chunks];
        while let Some(joined) = tasks.join_next().await {
            let (idx, cid) =
                joined.map_err(|e| ClientError::Transfer(format!("upload task failed: {e}")))??;
            chunks[idx] = cid;
        }

        tracing::debug!(file = %file_name, size = file_size, chunks = total_chunks, "file uploaded");
        Ok(TransferRecord {
            content_hash: checksum.clone(),
            file_name,
            file_size,
            checksum,
            chunks,
        })
    }
}

fn chunk_count(file_size: u64, chunk_size: usize) -> usize {
    if file_size == 0 {
        return 1;
    }
    file_size.div_ceil(chunk_size as u64) as usize
}

async fn read_chunk(path: &Path, offset: u64, len: usize) -> Result<Vec<u8>> {
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| ClientError::Transfer(format!("open {}: {e}", path.display())))?;
    file.seek(std::io::SeekFrom::Start(offset))
        .await
        .map_err(|e| ClientError::Transfer(format!("seek {}: {e}", path.display())))?;
    let mut buffer = vec![0u8; len];
    file.read_exact(&mut buffer)
        .await
        .map_err(|e| ClientError::Transfer(format!("read {}: {e}", path.display())))?;
    Ok(buffer)
}

async fn put_with_retry(
    store: Arc<dyn ContentStore>,
    bytes: Vec<u8>,
    retries: u32,
) -> Result<String> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.put(bytes.clone()).await {
            Ok(cid) => return Ok(cid),
            Err(e) if attempt < retries => {
                tracing::warn!(attempt, error = %e, "chunk upload failed, retrying");
                tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
            }
            Err(e) => {
                return Err(ClientError::Transfer(format!(
                    "chunk upload failed after {attempt} attempts: {e}"
                )))
            }
        }
    }
}

async fn get_with_retry(
    store: Arc<dyn ContentStore>,
    cid: &str,
    retries: u32,
) -> Result<Vec<u8>> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match store.get(cid).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < retries => {
                tracing::warn!(attempt, cid = %cid, error = %e, "chunk fetch failed, retrying");
                tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
            }
            Err(e) => {
                return Err(ClientError::Transfer(format!(
                    "chunk {cid} fetch failed after {attempt} attempts: {e}"
                )))
            }
        }
    }
}
