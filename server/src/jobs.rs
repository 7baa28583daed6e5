//! Report jobs: a pluggable store and a single-worker scheduler.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tracing::{info, warn};
use trove_core::pipeline::join_error_reason;
use trove_core::query::Corpus;
use trove_core::report::{generate, ReportKind, ReportParams};

pub const QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportJob {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ReportKind,
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub params: ReportParams,
    pub status: JobStatus,
    pub progress: usize,
    pub total: usize,
    pub message: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Submission order; larger is newer.
    #[serde(skip)]
    pub seq: u64,
}

pub trait JobStore: Send + Sync {
    fn put(&self, job: ReportJob);
    fn get(&self, id: &str) -> Option<ReportJob>;
    /// Newest first.
    fn list(&self) -> Vec<ReportJob>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<String, ReportJob>>,
}

impl JobStore for InMemoryJobStore {
    fn put(&self, job: ReportJob) { self.jobs.write().insert(job.id.clone(), job); }

    fn get(&self, id: &str) -> Option<ReportJob> { self.jobs.read().get(id).cloned() }

    fn list(&self) -> Vec<ReportJob> {
        let mut jobs: Vec<ReportJob> = self.jobs.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.seq.cmp(&a.seq));
        jobs
    }
}

fn update(store: &dyn JobStore, id: &str, f: impl FnOnce(&mut ReportJob)) {
    if let Some(mut job) = store.get(id) {
        f(&mut job);
        store.put(job);
    }
}

pub struct ReportScheduler {
    store: Arc<dyn JobStore>,
    queue: mpsc::Sender<String>,
    last_id: AtomicU64,
    seq: AtomicU64,
}

impl ReportScheduler {
    /// Starts the background worker on the current runtime.
    pub fn start(store: Arc<dyn JobStore>, corpus: Arc<Corpus>, reports_dir: PathBuf) -> Self {
        let (queue, mut rx) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let worker_store = store.clone();
        tokio::spawn(async move {
            while let Some(id) = rx.recv().await {
                let (corpus, dir) = (corpus.clone(), reports_dir.clone());
                execute(worker_store.clone(), id, move |store, id| run_job(store, &corpus, &dir, id)).await;
            }
        });
        Self { store, queue, last_id: AtomicU64::new(0), seq: AtomicU64::new(0) }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> { &self.store }

    fn next_id(&self, now: OffsetDateTime) -> String {
        let nanos = now.unix_timestamp_nanos().max(0) as u64;
        let prev = self
            .last_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(nanos.max(last + 1)))
            .unwrap_or(0);
        nanos.max(prev + 1).to_string()
    }

    /// Records the job as queued and enqueues it; a full queue marks it as errored.
    pub fn submit(&self, kind: ReportKind, params: ReportParams) -> ReportJob {
        let now = OffsetDateTime::now_utc();
        let stamp = now.format(format_description!("[month repr:short] [day padding:none] [hour]:[minute]")).unwrap_or_default();
        let params = params.resolved(kind);
        let mut job = ReportJob {
            id: self.next_id(now),
            kind,
            name: format!("{} - {stamp}", kind.title()),
            description: params.describe(kind),
            params,
            status: JobStatus::Queued,
            progress: 0,
            total: 0,
            message: String::new(),
            created_at: now.format(&Rfc3339).unwrap_or_default(),
            file_path: None,
            error: None,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
        };
        self.store.put(job.clone());
        if let Err(e) = self.queue.try_send(job.id.clone()) {
            warn!(id = %job.id, error = %e, "report queue rejected job");
            job.status = JobStatus::Error;
            job.error = Some("queue full".into());
            self.store.put(job.clone());
        } else {
            info!(id = %job.id, kind = kind.as_str(), "report queued");
        }
        job
    }
}

/// Runs `task` for job `id` on the blocking pool; a panic marks the job as errored.
async fn execute<F>(store: Arc<dyn JobStore>, id: String, task: F)
where
    F: FnOnce(&dyn JobStore, &str) + Send + 'static,
{
    let (task_store, task_id) = (store.clone(), id.clone());
    if let Err(e) = tokio::task::spawn_blocking(move || task(task_store.as_ref(), &task_id)).await {
        let reason = join_error_reason(e);
        warn!(id = %id, error = %reason, "report task ended abnormally");
        update(store.as_ref(), &id, |j| {
            j.status = JobStatus::Error;
            j.error = Some(format!("report generation panicked: {reason}"));
        });
    }
}

fn run_job(store: &dyn JobStore, corpus: &Corpus, dir: &std::path::Path, id: &str) {
    let Some(job) = store.get(id) else { return };
    update(store, id, |j| {
        j.status = JobStatus::Running;
        j.message = "Starting...".into();
    });
    let result = generate(corpus, job.kind, &job.params, dir, id, |progress, total, message| {
        update(store, id, |j| {
            j.status = JobStatus::Running;
            j.progress = progress;
            j.total = total;
            j.message = message;
        });
    });
    match result {
        Ok(path) => update(store, id, |j| {
            j.status = JobStatus::Done;
            j.progress = j.total;
            j.file_path = Some(path.display().to_string());
        }),
        Err(e) => {
            warn!(id, error = %e, "report failed");
            update(store, id, |j| {
                j.status = JobStatus::Error;
                j.error = Some(e.to_string());
            })
        }
    }
}
