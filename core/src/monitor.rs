//! Resource-pressure signals consulted by the pipeline producer.

use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::{Pid, System};

/// Tells the producer whether it should hold back new jobs.
pub trait ResourceMonitor: Send + Sync {
    fn under_pressure(&self) -> bool;
}

/// Never throttles.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMonitor;

impl ResourceMonitor for NoopMonitor {
    fn under_pressure(&self) -> bool { false }
}

/// Compares the resident memory of this process against a soft ceiling.
pub struct ProcessMemoryMonitor {
    limit: u64,
    pid: Pid,
    sys: Mutex<System>,
}

impl ProcessMemoryMonitor {
    /// Returns `None` when the platform cannot identify the current process.
    pub fn new(limit: u64) -> Option<Self> {
        let pid = sysinfo::get_current_pid().ok()?;
        Some(Self { limit, pid, sys: Mutex::new(System::new()) })
    }

    pub fn resident_bytes(&self) -> Option<u64> {
        let mut sys = self.sys.lock();
        sys.refresh_process(self.pid);
        sys.process(self.pid).map(|p| p.memory())
    }

    pub fn limit(&self) -> u64 { self.limit }
}

impl ResourceMonitor for ProcessMemoryMonitor {
    fn under_pressure(&self) -> bool {
        match self.resident_bytes() {
            Some(used) => used >= self.limit,
            None => false,
        }
    }
}

/// Picks the sampling monitor when a ceiling is configured and the platform supports it.
pub fn monitor_for(limit: Option<u64>) -> Arc<dyn ResourceMonitor> {
    match limit.and_then(ProcessMemoryMonitor::new) {
        Some(m) => {
            tracing::debug!(limit = m.limit(), "memory throttling enabled");
            Arc::new(m)
        }
        None => Arc::new(NoopMonitor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_ceiling_reports_pressure() {
        let Some(m) = ProcessMemoryMonitor::new(1) else { return };
        if m.resident_bytes().is_some() {
            assert!(m.under_pressure());
        }
    }

    #[test]
    fn huge_ceiling_does_not() {
        let m = monitor_for(Some(u64::MAX));
        assert!(!m.under_pressure());
        assert!(!monitor_for(None).under_pressure());
    }
}
