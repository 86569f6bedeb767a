//! Parallel bulk copy, delete and download
//!
//! The worklist is listed up front, then every key becomes one spawned task.
//! A semaphore bounds how many tasks exist at once: the orchestrator takes an
//! owned permit before spawning and the task drops it when it finishes, times
//! out, or panics. Failures are recorded per key and never stop the rest of the
//! worklist.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::Instant;

use crate::config::{PaginationRetryConfig, TransferConfig};
use crate::download::{download_object, local_path};
use crate::error::Result;
use crate::multipart::{BULK_PART_SIZE, ChunkedCopyOptions, copy_object_chunked};
use crate::paginate::list_objects;
use crate::retry::{RetryConfig, StepBackoff, is_retryable_error, retry_with_backoff};
use crate::traits::{ObjectInfo, ObjectPath, ObjectStore};

/// How a single key's task ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TaskOutcome {
    Copied,
    Deleted,
    Downloaded,
    /// Destination already held an object of the same size, or there was
    /// nothing to write
    Skipped,
    Failed(String),
    TimedOut,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Copied
                | TaskOutcome::Deleted
                | TaskOutcome::Downloaded
                | TaskOutcome::Skipped
        )
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Copied => write!(f, "copied"),
            TaskOutcome::Deleted => write!(f, "deleted"),
            TaskOutcome::Downloaded => write!(f, "downloaded"),
            TaskOutcome::Skipped => write!(f, "skipped"),
            TaskOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            TaskOutcome::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Outcome of one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub key: String,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Outcomes of a whole bulk operation, in completion order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub tasks: Vec<TaskReport>,
}

/// Per-outcome counts of a [`BulkReport`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BulkSummary {
    pub total: usize,
    pub copied: usize,
    pub deleted: usize,
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl BulkReport {
    /// True iff no task failed or timed out
    pub fn success(&self) -> bool {
        self.tasks.iter().all(|t| t.outcome.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskReport> {
        self.tasks.iter().filter(|t| !t.outcome.is_success())
    }

    pub fn summary(&self) -> BulkSummary {
        let mut summary = BulkSummary {
            total: self.tasks.len(),
            ..Default::default()
        };
        for task in &self.tasks {
            match task.outcome {
                TaskOutcome::Copied => summary.copied += 1,
                TaskOutcome::Deleted => summary.deleted += 1,
                TaskOutcome::Downloaded => summary.downloaded += 1,
                TaskOutcome::Skipped => summary.skipped += 1,
                TaskOutcome::Failed(_) => summary.failed += 1,
                TaskOutcome::TimedOut => summary.timed_out += 1,
            }
        }
        summary
    }
}

/// Tuning for [`BulkEngine`]
#[derive(Debug, Clone)]
pub struct BulkOptions {
    /// Maximum tasks alive at once
    pub workers: usize,
    /// Wall-clock limit per task; the task is cancelled when it runs out
    pub task_timeout: Duration,
    /// Objects at least this large are copied in parts
    pub part_size: u64,
    /// Retry budget per copied part and per downloaded object
    pub part_retry: RetryConfig,
    pub list_backoff: StepBackoff,
    /// Receives every [`TaskReport`] as soon as its task ends
    pub status: Option<mpsc::UnboundedSender<TaskReport>>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            task_timeout: Duration::from_secs(300),
            part_size: BULK_PART_SIZE,
            part_retry: ChunkedCopyOptions::default().retry,
            list_backoff: StepBackoff::default(),
            status: None,
        }
    }
}

impl BulkOptions {
    pub fn from_config(transfer: &TransferConfig, retry: &PaginationRetryConfig) -> Self {
        Self {
            workers: transfer.workers,
            task_timeout: Duration::from_secs(transfer.task_timeout_secs),
            part_size: transfer.bulk_part_size,
            part_retry: transfer.part_retry(),
            list_backoff: retry.backoff(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: mpsc::UnboundedSender<TaskReport>) -> Self {
        self.status = Some(status);
        self
    }
}

/// Bounded-concurrency copy/delete/download over every key under a prefix
pub struct BulkEngine {
    store: Arc<dyn ObjectStore>,
    options: BulkOptions,
}

impl BulkEngine {
    pub fn new(store: Arc<dyn ObjectStore>, options: BulkOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &BulkOptions {
        &self.options
    }

    /// List every object under `prefix` in `bucket`
    pub async fn worklist(&self, bucket: &str, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        let objects: Vec<ObjectInfo> =
            list_objects(self.store.as_ref(), bucket, prefix, &self.options.list_backoff)
                .try_collect()
                .await?;
        tracing::info!(bucket, prefix = prefix.unwrap_or_default(), count = objects.len(), "Listed worklist");
        Ok(objects)
    }

    /// Copy every key under `prefix` from `src_bucket` to the same key in `dst_bucket`
    ///
    /// Only a failed listing is an error; per-key failures end up in the report.
    pub async fn copy_bucket(
        &self,
        src_bucket: &str,
        dst_bucket: &str,
        prefix: Option<&str>,
    ) -> Result<BulkReport> {
        let objects = self.worklist(src_bucket, prefix).await?;
        Ok(self.copy_objects(objects, src_bucket, dst_bucket).await)
    }

    /// Copy an already listed worklist from `src_bucket` to `dst_bucket`
    pub async fn copy_objects(
        &self,
        objects: Vec<ObjectInfo>,
        src_bucket: &str,
        dst_bucket: &str,
    ) -> BulkReport {
        let copy_options = ChunkedCopyOptions {
            part_size: self.options.part_size,
            retry: self.options.part_retry.clone(),
            parallel: 1,
            // Same as a timed out task, which is cancelled with its upload still open
            abort_on_failure: false,
        };

        self.run(objects, |object| {
            copy_one(
                self.store.clone(),
                ObjectPath::new(src_bucket, &object.key),
                ObjectPath::new(dst_bucket, object.key),
                copy_options.clone(),
            )
        })
        .await
    }

    /// Delete every key under `prefix` in `bucket`
    pub async fn delete_bucket(&self, bucket: &str, prefix: Option<&str>) -> Result<BulkReport> {
        let objects = self.worklist(bucket, prefix).await?;
        Ok(self.delete_objects(objects, bucket).await)
    }

    /// Delete an already listed worklist from `bucket`
    pub async fn delete_objects(&self, objects: Vec<ObjectInfo>, bucket: &str) -> BulkReport {
        self.run(objects, |object| {
            delete_one(self.store.clone(), ObjectPath::new(bucket, object.key))
        })
        .await
    }

    /// Download every key under `prefix` in `bucket` into `local_dir`
    ///
    /// Local names follow [`local_path`]. Files already present with the
    /// object's size are skipped.
    pub async fn sync_local(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        local_dir: &Path,
    ) -> Result<BulkReport> {
        let objects = self.worklist(bucket, prefix).await?;
        Ok(self
            .download_objects(objects, bucket, prefix, local_dir)
            .await)
    }

    /// Download an already listed worklist from `bucket` into `local_dir`
    pub async fn download_objects(
        &self,
        objects: Vec<ObjectInfo>,
        bucket: &str,
        prefix: Option<&str>,
        local_dir: &Path,
    ) -> BulkReport {
        let prefix = prefix.unwrap_or_default();
        self.run(objects, |object| {
            let dest = local_path(local_dir, prefix, &object.key);
            download_one(
                self.store.clone(),
                ObjectPath::new(bucket, object.key),
                object.size,
                dest,
                self.options.part_retry.clone(),
            )
        })
        .await
    }

    async fn run<F, Fut>(&self, objects: Vec<ObjectInfo>, task: F) -> BulkReport
    where
        F: Fn(ObjectInfo) -> Fut,
        Fut: Future<Output = TaskOutcome> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.options.workers.max(1)));
        let mut tasks = JoinSet::new();
        let mut pending: HashMap<Id, String> = HashMap::new();
        let mut report = BulkReport {
            tasks: Vec::with_capacity(objects.len()),
        };

        for object in objects {
            let permit = self
                .wait_for_permit(&semaphore, &mut tasks, &mut pending, &mut report)
                .await;
            let timeout = self.options.task_timeout;
            let key = object.key.clone();
            let work = task(object);

            let handle = tasks.spawn({
                let key = key.clone();
                async move {
                    let _permit = permit;
                    let started = Instant::now();
                    let outcome = tokio::time::timeout(timeout, work)
                        .await
                        .unwrap_or(TaskOutcome::TimedOut);
                    TaskReport {
                        key,
                        outcome,
                        elapsed: started.elapsed(),
                    }
                }
            });
            pending.insert(handle.id(), key);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            self.record(joined, &mut pending, &mut report);
        }

        let summary = report.summary();
        tracing::info!(
            total = summary.total,
            copied = summary.copied,
            deleted = summary.deleted,
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "Bulk operation finished"
        );
        report
    }

    /// Take a permit, collecting finished tasks while all workers are busy
    async fn wait_for_permit(
        &self,
        semaphore: &Arc<Semaphore>,
        tasks: &mut JoinSet<TaskReport>,
        pending: &mut HashMap<Id, String>,
        report: &mut BulkReport,
    ) -> OwnedSemaphorePermit {
        loop {
            if let Ok(permit) = semaphore.clone().try_acquire_owned() {
                return permit;
            }
            // Permits are only held by tasks in the set, so one is about to free up
            if let Some(joined) = tasks.join_next_with_id().await {
                self.record(joined, pending, report);
            } else {
                tokio::task::yield_now().await;
            }
        }
    }

    fn record(
        &self,
        joined: std::result::Result<(Id, TaskReport), JoinError>,
        pending: &mut HashMap<Id, String>,
        report: &mut BulkReport,
    ) {
        let task = match joined {
            Ok((id, task)) => {
                pending.remove(&id);
                task
            }
            Err(e) => TaskReport {
                key: pending.remove(&e.id()).unwrap_or_default(),
                outcome: TaskOutcome::Failed(format!("task aborted: {e}")),
                elapsed: Duration::ZERO,
            },
        };

        match &task.outcome {
            TaskOutcome::Failed(reason) => {
                tracing::warn!(key = %task.key, reason = %reason, "Task failed");
            }
            TaskOutcome::TimedOut => {
                tracing::warn!(key = %task.key, timeout_secs = self.options.task_timeout.as_secs(), "Task timed out");
            }
            outcome => {
                tracing::info!(key = %task.key, outcome = %outcome, elapsed_ms = task.elapsed.as_millis() as u64, "Task finished");
            }
        }

        if let Some(status) = &self.options.status {
            // A dropped receiver only means nobody is watching
            let _ = status.send(task.clone());
        }
        report.tasks.push(task);
    }
}

async fn copy_one(
    store: Arc<dyn ObjectStore>,
    src: ObjectPath,
    dst: ObjectPath,
    options: ChunkedCopyOptions,
) -> TaskOutcome {
    let source = match store.head_object(&src).await {
        Ok(Some(info)) => info,
        Ok(None) => return TaskOutcome::Failed(format!("{src} no longer exists")),
        Err(e) => return TaskOutcome::Failed(e.to_string()),
    };

    match store.head_object(&dst).await {
        Ok(Some(existing)) if existing.size == source.size => return TaskOutcome::Skipped,
        Ok(_) => {}
        Err(e) => return TaskOutcome::Failed(e.to_string()),
    }

    match copy_object_chunked(store.as_ref(), &src, source.size, &dst, &options).await {
        Ok(_) => TaskOutcome::Copied,
        Err(e) => TaskOutcome::Failed(e.to_string()),
    }
}

async fn download_one(
    store: Arc<dyn ObjectStore>,
    src: ObjectPath,
    size: u64,
    dest: Result<Option<PathBuf>>,
    retry: RetryConfig,
) -> TaskOutcome {
    let dest = match dest {
        Ok(Some(dest)) => dest,
        Ok(None) => return TaskOutcome::Skipped,
        Err(e) => return TaskOutcome::Failed(e.to_string()),
    };

    if let Ok(existing) = tokio::fs::metadata(&dest).await
        && existing.is_file()
        && existing.len() == size
    {
        return TaskOutcome::Skipped;
    }

    let downloaded = retry_with_backoff(
        &retry,
        || download_object(store.as_ref(), &src, &dest),
        is_retryable_error,
    )
    .await;
    match downloaded {
        Ok(_) => TaskOutcome::Downloaded,
        Err(e) => TaskOutcome::Failed(e.to_string()),
    }
}

async fn delete_one(store: Arc<dyn ObjectStore>, path: ObjectPath) -> TaskOutcome {
    match store.delete_object(&path).await {
        Ok(()) => TaskOutcome::Deleted,
        Err(e) => TaskOutcome::Failed(e.to_string()),
    }
}
