// Recovery - Strategy selection and per-execution attempt bookkeeping
//
// The policy is a pure function of (error, attempts so far). The manager owns
// the attempt counters for one execution, capped per (node, strategy).

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use blueprint_types::Value;

use crate::error::{BlueprintError, ErrorCode, ErrorKind};

// ─────────────────────────────────────────────────────────────────────────────
// Strategies
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    SubstituteDefault,
    Retry,
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryStrategy {
    /// Continue with a typed default in place of the failed value
    SubstituteDefault(Value),
    /// Run the failed operation again after a delay
    Retry { delay: Duration },
    /// Continue with a caller-provided fallback value
    Fallback(Value),
}

impl RecoveryStrategy {
    pub fn kind(&self) -> StrategyKind {
        match self {
            RecoveryStrategy::SubstituteDefault(_) => StrategyKind::SubstituteDefault,
            RecoveryStrategy::Retry { .. } => StrategyKind::Retry,
            RecoveryStrategy::Fallback(_) => StrategyKind::Fallback,
        }
    }

    /// Replacement value, for substitute and fallback strategies
    pub fn value(&self) -> Option<&Value> {
        match self {
            RecoveryStrategy::SubstituteDefault(v) | RecoveryStrategy::Fallback(v) => Some(v),
            RecoveryStrategy::Retry { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Cap per (execution, node, strategy)
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Randomise retry delays by ±20%
    pub jitter: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 100,
            max_backoff_ms: 5_000,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Attempts already spent on one node, by strategy
pub type AttemptCounts = HashMap<StrategyKind, u32>;

/// Scheduler faults are never recovered
fn is_scheduler_fault(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::MultipleActivation
            | ErrorCode::DoubleSignal
            | ErrorCode::DataCycle
            | ErrorCode::LoopNotSupported
            | ErrorCode::Cancelled
    )
}

/// Exponential backoff without jitter
pub fn backoff_delay(attempt: u32, config: &RecoveryConfig) -> Duration {
    let factor = config.backoff_multiplier.max(1.0).powi(attempt.min(32) as i32);
    let ms = (config.base_backoff_ms as f64 * factor).min(config.max_backoff_ms as f64);
    Duration::from_millis(ms as u64)
}

/// Pick a recovery strategy for an error, or `None` if it must surface.
///
/// `details.fallback` selects a fallback, connection errors retry with
/// backoff, `details.default` substitutes a default. Resource and security
/// errors are never recovered.
pub fn select_strategy(
    err: &BlueprintError,
    attempts: &AttemptCounts,
    config: &RecoveryConfig,
) -> Option<RecoveryStrategy> {
    if err.is_fatal() || is_scheduler_fault(err.code) {
        return None;
    }

    let spent = |kind: StrategyKind| attempts.get(&kind).copied().unwrap_or(0);

    let candidate = if let Some(value) = err.details.get("fallback") {
        RecoveryStrategy::Fallback(value.clone())
    } else if err.kind == ErrorKind::Connection {
        RecoveryStrategy::Retry {
            delay: backoff_delay(spent(StrategyKind::Retry), config),
        }
    } else if let Some(value) = err.details.get("default") {
        RecoveryStrategy::SubstituteDefault(value.clone())
    } else {
        return None;
    };

    if spent(candidate.kind()) >= config.max_attempts {
        return None;
    }
    Some(candidate)
}

// ─────────────────────────────────────────────────────────────────────────────
// Recovery Manager
// ─────────────────────────────────────────────────────────────────────────────

/// One entry in the recovery history of an execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryAttempt {
    pub node_id: String,
    pub code: ErrorCode,
    pub strategy: Option<StrategyKind>,
    /// 1-based attempt number for the (node, strategy) pair
    pub attempt: u32,
    pub success: bool,
}

/// Result of asking the manager to recover
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryOutcome {
    pub success: bool,
    pub strategy: Option<RecoveryStrategy>,
    /// Attempt number recorded in the history; 0 when nothing was selected
    pub attempt: u32,
}

impl RecoveryOutcome {
    pub fn failed() -> Self {
        Self {
            success: false,
            strategy: None,
            attempt: 0,
        }
    }

    /// Value to continue with, when the strategy provides one
    pub fn value(&self) -> Option<&Value> {
        self.strategy.as_ref().and_then(RecoveryStrategy::value)
    }

    pub fn is_retry(&self) -> bool {
        matches!(self.strategy, Some(RecoveryStrategy::Retry { .. }))
    }
}

#[derive(Debug)]
pub struct RecoveryManager {
    config: RecoveryConfig,
    counts: HashMap<(String, StrategyKind), u32>,
    history: Vec<RecoveryAttempt>,
}

impl RecoveryManager {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            counts: HashMap::new(),
            history: Vec::new(),
        }
    }

    fn attempts_for(&self, node_id: &str) -> AttemptCounts {
        self.counts
            .iter()
            .filter(|((node, _), _)| node == node_id)
            .map(|((_, kind), count)| (*kind, *count))
            .collect()
    }

    /// Select and record a strategy for an error raised by `node_id`
    pub fn attempt(&mut self, node_id: &str, err: &BlueprintError) -> RecoveryOutcome {
        let attempts = self.attempts_for(node_id);
        let strategy = select_strategy(err, &attempts, &self.config);

        let Some(mut strategy) = strategy else {
            self.history.push(RecoveryAttempt {
                node_id: node_id.to_string(),
                code: err.code,
                strategy: None,
                attempt: 0,
                success: false,
            });
            debug!(node_id = %node_id, code = %err.code, "No recovery strategy applies");
            return RecoveryOutcome::failed();
        };

        let count = self
            .counts
            .entry((node_id.to_string(), strategy.kind()))
            .or_insert(0);
        *count += 1;
        let attempt = *count;

        if let RecoveryStrategy::Retry { delay } = &mut strategy {
            if self.config.jitter {
                *delay = with_jitter(*delay);
            }
        }

        debug!(
            node_id = %node_id,
            code = %err.code,
            strategy = ?strategy.kind(),
            attempt,
            "Recovery strategy selected"
        );

        // A retry only counts once the re-run settles it
        let applied = !matches!(strategy, RecoveryStrategy::Retry { .. });
        self.history.push(RecoveryAttempt {
            node_id: node_id.to_string(),
            code: err.code,
            strategy: Some(strategy.kind()),
            attempt,
            success: applied,
        });

        RecoveryOutcome {
            success: true,
            strategy: Some(strategy),
            attempt,
        }
    }

    /// Record how a retry ended
    pub fn settle(&mut self, node_id: &str, attempt: u32, success: bool) {
        let entry = self.history.iter_mut().rev().find(|a| {
            a.node_id == node_id && a.strategy == Some(StrategyKind::Retry) && a.attempt == attempt
        });
        if let Some(entry) = entry {
            entry.success = success;
        }
    }

    pub fn history(&self) -> &[RecoveryAttempt] {
        &self.history
    }

    pub(crate) fn absorb(&mut self, attempts: Vec<RecoveryAttempt>) {
        self.history.extend(attempts);
    }

    pub(crate) fn take_history(&mut self) -> Vec<RecoveryAttempt> {
        std::mem::take(&mut self.history)
    }
}

/// ±20% jitter
fn with_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
