use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock, Semaphore};
use uuid::Uuid;

use super::retry::{execute_with_policy, JobError, JobStatus, RetryPolicy};

pub const MAX_RECENT_REPORTS: usize = 100;

pub type JobId = Uuid;

#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub attempt: u32,
    pub queue: String,
}

pub type JobFuture = Pin<Box<dyn Future<Output = Result<Value, JobError>> + Send>>;

pub type JobHandler = Arc<dyn Fn(JobContext, Value) -> JobFuture + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub job_type: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub job_type: String,
    pub queue: String,
    pub payload: Value,
    pub status: JobStatus,
    pub attempts: u32,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue {0} is full")]
    Full(String),
    #[error("queue {0} is closed")]
    Closed(String),
    #[error("no handler registered for job type {0}")]
    UnknownJobType(String),
}

/// A named in-process work queue. Jobs are accepted into a bounded channel
/// and executed by at most `workers` concurrent tasks, each job under the
/// queue's retry policy.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    name: String,
    policy: RetryPolicy,
    workers: usize,
    handlers: RwLock<HashMap<String, JobHandler>>,
    sender: mpsc::Sender<QueuedJob>,
    receiver: Mutex<Option<mpsc::Receiver<QueuedJob>>>,
    outstanding: watch::Sender<usize>,
    reports: RwLock<VecDeque<JobReport>>,
}

impl JobQueue {
    pub fn new(name: impl Into<String>, capacity: usize, workers: usize, policy: RetryPolicy) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                policy,
                workers: workers.max(1),
                handlers: RwLock::new(HashMap::new()),
                sender,
                receiver: Mutex::new(Some(receiver)),
                outstanding,
                reports: RwLock::new(VecDeque::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.inner.policy
    }

    pub async fn register_handler(&self, job_type: impl Into<String>, handler: JobHandler) {
        let mut handlers = self.inner.handlers.write().await;
        handlers.insert(job_type.into(), handler);
    }

    /// Spawn the dispatch loop. Returns `false` if the queue was already started.
    pub async fn start(&self) -> bool {
        let Some(mut receiver) = self.inner.receiver.lock().await.take() else {
            return false;
        };

        info!(
            "Starting job queue {} with {} worker(s)",
            self.inner.name, self.inner.workers
        );
        let queue = self.clone();
        let semaphore = Arc::new(Semaphore::new(self.inner.workers));

        tokio::spawn(async move {
            while let Some(job) = receiver.recv().await {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let queue = queue.clone();
                tokio::spawn(async move {
                    queue.run_job(job).await;
                    drop(permit);
                });
            }
        });
        true
    }

    /// Accept a job and return immediately.
    pub async fn enqueue(&self, job_type: &str, payload: Value) -> Result<JobId, QueueError> {
        if !self.inner.handlers.read().await.contains_key(job_type) {
            return Err(QueueError::UnknownJobType(job_type.to_string()));
        }

        let job = QueuedJob {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            payload,
            enqueued_at: Utc::now(),
        };
        let id = job.id;

        self.inner.outstanding.send_modify(|n| *n += 1);
        if let Err(e) = self.inner.sender.try_send(job) {
            self.finish_one();
            return Err(match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full(self.inner.name.clone()),
                mpsc::error::TrySendError::Closed(_) => {
                    QueueError::Closed(self.inner.name.clone())
                }
            });
        }

        debug!("Enqueued job {id} ({job_type}) on {}", self.inner.name);
        Ok(id)
    }

    /// Jobs accepted but not yet finished.
    pub fn pending(&self) -> usize {
        *self.inner.outstanding.borrow()
    }

    /// Resolves once every accepted job has run to completion or permanent
    /// failure. Never resolves if jobs are pending on a queue that was not
    /// started.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        loop {
            if *rx.borrow_and_update() == 0 {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub async fn recent_reports(&self) -> Vec<JobReport> {
        self.inner.reports.read().await.iter().cloned().collect()
    }

    async fn run_job(&self, job: QueuedJob) {
        let handler = self.inner.handlers.read().await.get(&job.job_type).cloned();
        let label = format!("{} job {}", job.job_type, job.id);

        let execution = match handler {
            Some(handler) => {
                let queue = self.inner.name.clone();
                let job_id = job.id;
                let payload = job.payload.clone();
                execute_with_policy(&self.inner.policy, &label, move |attempt| {
                    handler(
                        JobContext {
                            job_id,
                            attempt,
                            queue: queue.clone(),
                        },
                        payload.clone(),
                    )
                })
                .await
            }
            None => {
                let message = QueueError::UnknownJobType(job.job_type.clone()).to_string();
                execute_with_policy(&self.inner.policy, &label, move |_| {
                    let message = message.clone();
                    async move { Err(JobError::Permanent(message)) }
                })
                .await
            }
        };

        let status = execution.status();
        let duration_ms = execution.duration_ms();
        let (result, error) = match execution.result {
            Ok(value) => (Some(value), None),
            Err(e) => (None, Some(e.to_string())),
        };

        match &error {
            None => info!(
                "Job completed job={} type={} queue={} attempts={} duration_ms={}",
                job.id, job.job_type, self.inner.name, execution.attempts, duration_ms
            ),
            Some(e) => error!(
                "Job failed permanently job={} type={} queue={} attempts={} payload={} error={}",
                job.id, job.job_type, self.inner.name, execution.attempts, job.payload, e
            ),
        }

        let report = JobReport {
            job_id: job.id,
            job_type: job.job_type,
            queue: self.inner.name.clone(),
            payload: job.payload,
            status,
            attempts: execution.attempts,
            result,
            error,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            duration_ms,
        };

        {
            let mut reports = self.inner.reports.write().await;
            if reports.len() >= MAX_RECENT_REPORTS {
                reports.pop_front();
            }
            reports.push_back(report);
        }

        self.finish_one();
    }

    fn finish_one(&self) {
        self.inner.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }
}
