use crate::error::{Result, TroveError};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_N: usize = 8;

/// Knobs shared by every stage that runs on the worker pool.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    /// Soft ceiling on process memory in bytes; `None` disables throttling.
    pub ram_limit: Option<u64>,
    /// Report progress every this many completed jobs. Defaults to `workers`.
    pub progress_every: Option<usize>,
    /// Directory receiving `errors.txt` and `ignored.txt`; `None` logs through tracing only.
    pub log_dir: Option<PathBuf>,
    pub throttle_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            workers,
            ram_limit: None,
            progress_every: None,
            log_dir: None,
            throttle_interval: Duration::from_millis(100),
        }
    }
}

impl PipelineConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_ram_limit(mut self, limit: Option<u64>) -> Self {
        self.ram_limit = limit;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(TroveError::InvalidConfig("workers must be at least 1".into()));
        }
        Ok(())
    }

    pub(crate) fn progress_step(&self) -> usize {
        match self.progress_every {
            Some(step) if step > 0 => step,
            _ if self.workers > 0 => self.workers,
            _ => 10,
        }
    }
}

/// Parses `1GB`, `512M`, `64kb` or a plain byte count. Empty means no limit.
pub fn parse_memory_limit(s: &str) -> Result<Option<u64>> {
    let s = s.trim().to_ascii_uppercase();
    if s.is_empty() {
        return Ok(None);
    }
    let (digits, multiplier) = if let Some(v) = s.strip_suffix("GB").or_else(|| s.strip_suffix('G')) {
        (v, 1024 * 1024 * 1024)
    } else if let Some(v) = s.strip_suffix("MB").or_else(|| s.strip_suffix('M')) {
        (v, 1024 * 1024)
    } else if let Some(v) = s.strip_suffix("KB").or_else(|| s.strip_suffix('K')) {
        (v, 1024)
    } else {
        (s.strip_suffix('B').unwrap_or(&s), 1)
    };
    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| TroveError::InvalidConfig(format!("invalid memory format: {s}")))?;
    value
        .checked_mul(multiplier)
        .map(Some)
        .ok_or_else(|| TroveError::InvalidConfig(format!("memory limit too large: {s}")))
}

pub fn validate_max_n(max_n: usize) -> Result<()> {
    if max_n < 2 {
        return Err(TroveError::InvalidConfig("ngrams must be at least 2".into()));
    }
    Ok(())
}
