// Resource Monitor - Per-execution accounting of time, memory, I/O and node count
//
// A monitor is shared (Arc) between an execution and the child executions of
// inlined functions. Exceeding any limit cancels its token, which every loop
// actor and timer observes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{BlueprintError, ErrorCode, Result};

/// Limits enforced around every node execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Wall time charged to the run
    pub max_execution_time_ms: u64,
    /// Peak sampled size of run state
    pub max_memory_bytes: u64,
    /// Cumulative declared disk bytes
    pub max_disk_bytes: u64,
    /// Cumulative declared network bytes
    pub max_network_bytes: u64,
    /// Number of node executions (including pure evaluations)
    pub max_node_executions: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_execution_time_ms: 30_000,
            max_memory_bytes: 64 * 1024 * 1024,
            max_disk_bytes: 10 * 1024 * 1024,
            max_network_bytes: 10 * 1024 * 1024,
            max_node_executions: 10_000,
        }
    }
}

/// Snapshot of resource counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceUsage {
    pub elapsed_ms: u64,
    pub node_executions: u64,
    pub peak_memory_bytes: u64,
    pub disk_bytes: u64,
    pub network_bytes: u64,
}

#[derive(Debug)]
pub struct ResourceMonitor {
    limits: ResourceLimits,
    started: Instant,
    node_executions: AtomicU64,
    peak_memory: AtomicU64,
    disk_bytes: AtomicU64,
    network_bytes: AtomicU64,
    token: CancellationToken,
    violation: Mutex<Option<BlueprintError>>,
}

impl ResourceMonitor {
    pub fn new(limits: ResourceLimits) -> Self {
        Self {
            limits,
            started: Instant::now(),
            node_executions: AtomicU64::new(0),
            peak_memory: AtomicU64::new(0),
            disk_bytes: AtomicU64::new(0),
            network_bytes: AtomicU64::new(0),
            token: CancellationToken::new(),
            violation: Mutex::new(None),
        }
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    /// Token cancelled when any limit fires or the run is aborted
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the execution deadline
    pub fn remaining(&self) -> Duration {
        Duration::from_millis(self.limits.max_execution_time_ms).saturating_sub(self.elapsed())
    }

    /// Cancel the run. The first recorded cause wins.
    pub fn cancel(&self, cause: BlueprintError) {
        {
            let mut violation = self.violation.lock();
            if violation.is_none() {
                warn!(code = %cause.code, "Cancelling execution: {}", cause.message);
                *violation = Some(cause);
            }
        }
        self.token.cancel();
    }

    /// The error that cancelled the run, if any
    pub fn cancellation(&self) -> Option<BlueprintError> {
        if !self.is_cancelled() {
            return None;
        }
        Some(
            self.violation
                .lock()
                .clone()
                .unwrap_or_else(|| BlueprintError::execution(ErrorCode::Cancelled, "execution cancelled")),
        )
    }

    fn violate(&self, code: ErrorCode, message: String) -> BlueprintError {
        let err = BlueprintError::resource(code, message);
        self.cancel(err.clone());
        err
    }

    fn time_exceeded(&self) -> BlueprintError {
        self.violate(
            ErrorCode::ExecutionTimeExceeded,
            format!(
                "execution time {}ms exceeds limit of {}ms",
                self.elapsed().as_millis(),
                self.limits.max_execution_time_ms
            ),
        )
    }

    /// Instant the execution-time limit fires; `None` when it cannot be represented
    pub fn deadline(&self) -> Option<Instant> {
        self.started
            .checked_add(Duration::from_millis(self.limits.max_execution_time_ms))
    }

    /// Fails if cancelled or past the deadline
    pub fn check(&self) -> Result<()> {
        if let Some(err) = self.cancellation() {
            return Err(err);
        }
        if self.elapsed().as_millis() as u64 > self.limits.max_execution_time_ms {
            return Err(self.time_exceeded());
        }
        Ok(())
    }

    /// Resolves with the cause once the run is cancelled or its deadline passes.
    /// Reaching the deadline cancels the token.
    pub async fn interrupted(&self) -> BlueprintError {
        match self.deadline() {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                        return self.time_exceeded();
                    }
                }
            }
            None => self.token.cancelled().await,
        }
        self.cancellation()
            .unwrap_or_else(|| BlueprintError::execution(ErrorCode::Cancelled, "execution cancelled"))
    }

    /// Called before every node execution
    pub fn begin_node(&self) -> Result<()> {
        self.check()?;
        let count = self.node_executions.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.limits.max_node_executions {
            return Err(self.violate(
                ErrorCode::NodeLimitExceeded,
                format!(
                    "node execution count exceeds limit of {}",
                    self.limits.max_node_executions
                ),
            ));
        }
        Ok(())
    }

    /// Record a memory sample; only the peak is kept
    pub fn sample_memory(&self, bytes: u64) -> Result<()> {
        let peak = self.peak_memory.fetch_max(bytes, Ordering::SeqCst).max(bytes);
        if peak > self.limits.max_memory_bytes {
            return Err(self.violate(
                ErrorCode::MemoryLimitExceeded,
                format!(
                    "memory usage {} bytes exceeds limit of {} bytes",
                    peak, self.limits.max_memory_bytes
                ),
            ));
        }
        Ok(())
    }

    pub fn charge_disk(&self, bytes: u64) -> Result<()> {
        let total = self.disk_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if total > self.limits.max_disk_bytes {
            return Err(self.violate(
                ErrorCode::DiskLimitExceeded,
                format!("disk usage {} bytes exceeds limit of {} bytes", total, self.limits.max_disk_bytes),
            ));
        }
        Ok(())
    }

    pub fn charge_network(&self, bytes: u64) -> Result<()> {
        let total = self.network_bytes.fetch_add(bytes, Ordering::SeqCst) + bytes;
        if total > self.limits.max_network_bytes {
            return Err(self.violate(
                ErrorCode::NetworkLimitExceeded,
                format!(
                    "network usage {} bytes exceeds limit of {} bytes",
                    total, self.limits.max_network_bytes
                ),
            ));
        }
        Ok(())
    }

    pub fn usage(&self) -> ResourceUsage {
        ResourceUsage {
            elapsed_ms: self.elapsed().as_millis() as u64,
            node_executions: self.node_executions.load(Ordering::SeqCst),
            peak_memory_bytes: self.peak_memory.load(Ordering::SeqCst),
            disk_bytes: self.disk_bytes.load(Ordering::SeqCst),
            network_bytes: self.network_bytes.load(Ordering::SeqCst),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_node_limit_cancels() {
        let monitor = ResourceMonitor::new(ResourceLimits {
            max_node_executions: 2,
            ..Default::default()
        });
        assert!(monitor.begin_node().is_ok());
        assert!(monitor.begin_node().is_ok());

        let err = monitor.begin_node().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resource);
        assert_eq!(err.code, ErrorCode::NodeLimitExceeded);
        assert!(monitor.is_cancelled());

        // Later checks report the original cause
        assert_eq!(monitor.check().unwrap_err().code, ErrorCode::NodeLimitExceeded);
    }

    #[test]
    fn test_memory_keeps_peak() {
        let monitor = ResourceMonitor::new(ResourceLimits {
            max_memory_bytes: 100,
            ..Default::default()
        });
        monitor.sample_memory(80).unwrap();
        monitor.sample_memory(10).unwrap();
        assert_eq!(monitor.usage().peak_memory_bytes, 80);
        assert!(monitor.sample_memory(101).is_err());
    }

    #[test]
    fn test_network_accumulates() {
        let monitor = ResourceMonitor::new(ResourceLimits {
            max_network_bytes: 10,
            ..Default::default()
        });
        monitor.charge_network(6).unwrap();
        let err = monitor.charge_network(6).unwrap_err();
        assert_eq!(err.code, ErrorCode::NetworkLimitExceeded);
    }

    #[test]
    fn test_deadline() {
        let monitor = ResourceMonitor::new(ResourceLimits {
            max_execution_time_ms: 0,
            ..Default::default()
        });
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(
            monitor.check().unwrap_err().code,
            ErrorCode::ExecutionTimeExceeded
        );
    }

    #[tokio::test]
    async fn test_interrupted_at_deadline() {
        let monitor = ResourceMonitor::new(ResourceLimits {
            max_execution_time_ms: 20,
            ..Default::default()
        });
        let err = monitor.interrupted().await;
        assert_eq!(err.kind, ErrorKind::Resource);
        assert_eq!(err.code, ErrorCode::ExecutionTimeExceeded);
        assert!(monitor.is_cancelled());
        assert_eq!(
            monitor.cancellation().map(|e| e.code),
            Some(ErrorCode::ExecutionTimeExceeded)
        );
    }

    #[tokio::test]
    async fn test_interrupted_by_cancel() {
        let monitor = ResourceMonitor::new(ResourceLimits::default());
        monitor.cancel(BlueprintError::execution(ErrorCode::Cancelled, "aborted"));
        assert_eq!(monitor.interrupted().await.code, ErrorCode::Cancelled);
    }

    #[test]
    fn test_external_cancel() {
        let monitor = ResourceMonitor::new(ResourceLimits::default());
        monitor.cancel(BlueprintError::execution(ErrorCode::Cancelled, "aborted"));
        assert!(monitor.token().is_cancelled());
        assert_eq!(monitor.check().unwrap_err().code, ErrorCode::Cancelled);
    }
}
