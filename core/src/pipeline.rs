//! Bounded worker pool for per-file work.
//!
//! One producer feeds a bounded job queue, `workers` tasks drain it and run each
//! job on the blocking pool, and the calling task aggregates completions. Errors
//! and ignored items are funnelled to two single-consumer log sinks so lines
//! never interleave.

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::monitor::{monitor_for, ResourceMonitor};
use serde::Serialize;
use std::fs::{create_dir_all, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

const LOG_CHANNEL_CAPACITY: usize = 1000;

/// Why a single item produced no result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemError {
    /// Not an error, just nothing to do (e.g. unsupported format).
    Ignored(String),
    Failed(String),
}

impl From<std::io::Error> for ItemError {
    fn from(e: std::io::Error) -> Self { ItemError::Failed(e.to_string()) }
}

/// Result of one job as seen by the aggregator.
#[derive(Debug)]
pub enum Outcome<T> {
    Done(T),
    Ignored(String),
    Failed(String),
}

impl<T> Outcome<T> {
    pub fn into_done(self) -> Option<T> {
        match self {
            Outcome::Done(v) => Some(v),
            _ => None,
        }
    }
}

pub struct Job<J> {
    pub index: usize,
    /// Shown in log lines, usually the file path.
    pub label: String,
    pub payload: J,
}

impl<J> Job<J> {
    pub fn new(index: usize, label: impl Into<String>, payload: J) -> Self {
        Self { index, label: label.into(), payload }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub done: usize,
    pub ignored: usize,
    pub failed: usize,
}

pub struct Pipeline {
    config: PipelineConfig,
    monitor: Arc<dyn ResourceMonitor>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        let monitor = monitor_for(config.ram_limit);
        Self { config, monitor }
    }

    pub fn with_monitor(mut self, monitor: Arc<dyn ResourceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn config(&self) -> &PipelineConfig { &self.config }

    /// Runs `work` over every job and hands each outcome to `consume` on the calling task.
    ///
    /// Outcomes arrive in completion order, not job order. `consume` is the only
    /// place stage state is mutated.
    pub async fn run<J, T, W, C>(&self, jobs: Vec<Job<J>>, work: W, mut consume: C) -> Result<RunSummary>
    where
        J: Send + 'static,
        T: Send + 'static,
        W: Fn(J) -> std::result::Result<T, ItemError> + Send + Sync + 'static,
        C: FnMut(usize, Outcome<T>),
    {
        self.config.validate()?;
        let total = jobs.len();
        let workers = self.config.workers;
        let log_dir = self.config.log_dir.as_ref();
        let (errors_tx, errors_sink) = spawn_log_sink(log_dir.map(|d| d.join("errors.txt")), "error")?;
        let (ignored_tx, ignored_sink) = spawn_log_sink(log_dir.map(|d| d.join("ignored.txt")), "ignored")?;

        let (job_tx, job_rx) = mpsc::channel::<Job<J>>(workers * 2);
        let job_rx = Arc::new(Mutex::new(job_rx));
        let (done_tx, mut done_rx) = mpsc::channel::<(usize, Outcome<T>)>(workers * 2);
        let work = Arc::new(work);

        let monitor = self.monitor.clone();
        let pause = self.config.throttle_interval;
        let producer = tokio::spawn(async move {
            for job in jobs {
                let mut throttled = false;
                while monitor.under_pressure() {
                    if !throttled {
                        debug!(index = job.index, "memory ceiling reached, holding back jobs");
                        throttled = true;
                    }
                    tokio::time::sleep(pause).await;
                }
                if job_tx.send(job).await.is_err() {
                    break;
                }
            }
        });

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(workers);
        for _ in 0..workers {
            let rx = job_rx.clone();
            let tx = done_tx.clone();
            let work = work.clone();
            let errors = errors_tx.clone();
            let ignored = ignored_tx.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(Job { index, label, payload }) = next else { break };
                    let w = work.clone();
                    let outcome = match tokio::task::spawn_blocking(move || w(payload)).await {
                        Ok(Ok(value)) => Outcome::Done(value),
                        Ok(Err(ItemError::Ignored(reason))) => {
                            let _ = ignored.send(format!("{label}: {reason}")).await;
                            Outcome::Ignored(reason)
                        }
                        Ok(Err(ItemError::Failed(reason))) => {
                            let _ = errors.send(format!("{label}: {reason}")).await;
                            Outcome::Failed(reason)
                        }
                        Err(e) => {
                            let reason = join_error_reason(e);
                            let _ = errors.send(format!("{label}: PANIC during processing: {reason}")).await;
                            Outcome::Failed(reason)
                        }
                    };
                    if tx.send((index, outcome)).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(done_tx);

        let step = self.config.progress_step();
        let mut summary = RunSummary { total, ..RunSummary::default() };
        let mut finished = 0usize;
        while let Some((index, outcome)) = done_rx.recv().await {
            match &outcome {
                Outcome::Done(_) => summary.done += 1,
                Outcome::Ignored(_) => summary.ignored += 1,
                Outcome::Failed(_) => summary.failed += 1,
            }
            consume(index, outcome);
            finished += 1;
            if finished % step == 0 || finished == total {
                let percent = finished as f64 / total.max(1) as f64 * 100.0;
                info!(finished, total, percent = %format!("{percent:.1}"), "progress");
            }
        }

        if let Err(e) = producer.await {
            warn!(error = %e, "producer task ended abnormally");
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        drop(errors_tx);
        drop(ignored_tx);
        for sink in [errors_sink, ignored_sink] {
            if let Err(e) = sink.await {
                warn!(error = %e, "log sink ended abnormally");
            }
        }
        Ok(summary)
    }
}

/// Panic message of a failed task, or the join error itself.
pub fn join_error_reason(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Single consumer appending one line per message; without a path it only traces.
fn spawn_log_sink(path: Option<PathBuf>, kind: &'static str) -> Result<(mpsc::Sender<String>, JoinHandle<()>)> {
    let mut file = match path {
        Some(p) => {
            if let Some(parent) = p.parent() {
                create_dir_all(parent)?;
            }
            Some(BufWriter::new(OpenOptions::new().create(true).append(true).open(p)?))
        }
        None => None,
    };
    let (tx, mut rx) = mpsc::channel::<String>(LOG_CHANNEL_CAPACITY);
    let handle = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            if kind == "error" {
                warn!(kind, "{line}");
            } else {
                debug!(kind, "{line}");
            }
            if let Some(f) = file.as_mut() {
                if let Err(e) = writeln!(f, "{line}") {
                    warn!(kind, error = %e, "could not append to log");
                }
            }
        }
        if let Some(f) = file.as_mut() {
            let _ = f.flush();
        }
    });
    Ok((tx, handle))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PressureFor(AtomicUsize);

    impl ResourceMonitor for PressureFor {
        fn under_pressure(&self) -> bool {
            self.0
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    fn jobs(n: usize) -> Vec<Job<usize>> {
        (0..n).map(|i| Job::new(i, format!("job-{i}"), i)).collect()
    }

    #[tokio::test]
    async fn recovers_panics_and_counts_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = PipelineConfig::default().with_workers(3).with_log_dir(dir.path());
        let pipeline = Pipeline::new(cfg);
        let mut results = vec![None; 20];
        let summary = pipeline
            .run(
                jobs(20),
                |i| match i {
                    3 => panic!("boom on three"),
                    5 => Err(ItemError::Ignored("unsupported extension".into())),
                    7 => Err(ItemError::Failed("unreadable".into())),
                    _ => Ok(i * 2),
                },
                |index, outcome| results[index] = outcome.into_done(),
            )
            .await
            .unwrap();

        assert_eq!(summary, RunSummary { total: 20, done: 17, ignored: 1, failed: 2 });
        assert_eq!(results[4], Some(8));
        assert_eq!(results[3], None);

        let errors = std::fs::read_to_string(dir.path().join("errors.txt")).unwrap();
        assert!(errors.contains("job-3: PANIC during processing: boom on three"));
        assert!(errors.contains("job-7: unreadable"));
        let ignored = std::fs::read_to_string(dir.path().join("ignored.txt")).unwrap();
        assert_eq!(ignored.trim(), "job-5: unsupported extension");
    }

    #[tokio::test]
    async fn pressure_delays_but_never_drops_jobs() {
        let mut cfg = PipelineConfig::default().with_workers(2);
        cfg.throttle_interval = std::time::Duration::from_millis(1);
        let pipeline = Pipeline::new(cfg).with_monitor(Arc::new(PressureFor(AtomicUsize::new(5))));
        let mut seen = 0;
        let summary = pipeline.run(jobs(10), |i| Ok(i), |_, _| seen += 1).await.unwrap();
        assert_eq!(summary.done, 10);
        assert_eq!(seen, 10);
    }

    #[tokio::test]
    async fn empty_job_list_finishes() {
        let pipeline = Pipeline::new(PipelineConfig::default().with_workers(4));
        let summary = pipeline.run(Vec::<Job<()>>::new(), |_| Ok(()), |_, _: Outcome<()>| {}).await.unwrap();
        assert_eq!(summary.total, 0);
    }
}
