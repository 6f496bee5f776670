// =============================================================================
// Engine Metrics — domain counters collected off the hot path
// =============================================================================
//
// Plain atomics for the global counters so the dispatch loop never takes a
// lock for bookkeeping; the per-strategy table sits behind an RwLock and is
// touched once per strategy per event. The heartbeat task and the REST
// surface read consistent snapshots.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::info;

use crate::breaker::BreakerInfo;

/// Outcome of one strategy execution, for the result-labelled counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionResult {
    Signal,
    NoSignal,
    Error,
}

#[derive(Debug, Default)]
struct StrategyCounters {
    executions: u64,
    signals: u64,
    errors: u64,
    latency_sum_us: u64,
    latency_max_us: u64,
}

/// Per-strategy slice of the metrics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct StrategySnapshot {
    pub strategy: String,
    pub executions: u64,
    pub signals: u64,
    pub errors: u64,
    pub avg_latency_us: f64,
    pub max_latency_us: u64,
}

/// Full metrics snapshot for the heartbeat and the REST surface.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub messages_processed: u64,
    pub messages_per_second: f64,
    pub parse_errors: u64,
    pub unknown_streams: u64,
    pub validation_errors: u64,
    pub strategy_errors: u64,
    pub signals_published: u64,
    pub publish_errors: u64,
    pub publish_drops: u64,
    pub last_message_age_seconds: Option<i64>,
    pub strategies: Vec<StrategySnapshot>,
}

/// Process-wide domain counters.
pub struct EngineMetrics {
    messages_processed: AtomicU64,
    parse_errors: AtomicU64,
    unknown_streams: AtomicU64,
    validation_errors: AtomicU64,
    strategy_errors: AtomicU64,
    signals_published: AtomicU64,
    publish_errors: AtomicU64,
    publish_drops: AtomicU64,
    per_strategy: RwLock<HashMap<String, StrategyCounters>>,
    last_message_at: RwLock<Option<DateTime<Utc>>>,
    start_time: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            messages_processed: AtomicU64::new(0),
            parse_errors: AtomicU64::new(0),
            unknown_streams: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            strategy_errors: AtomicU64::new(0),
            signals_published: AtomicU64::new(0),
            publish_errors: AtomicU64::new(0),
            publish_drops: AtomicU64::new(0),
            per_strategy: RwLock::new(HashMap::new()),
            last_message_at: RwLock::new(None),
            start_time: Instant::now(),
        }
    }

    pub fn record_message(&self) {
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        *self.last_message_at.write() = Some(Utc::now());
    }

    /// Returns the running total so callers can bound their logging.
    pub fn record_parse_error(&self) -> u64 {
        self.parse_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the running total so callers can bound their logging.
    pub fn record_unknown_stream(&self) -> u64 {
        self.unknown_streams.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Returns the running total so callers can bound their logging.
    pub fn record_validation_error(&self) -> u64 {
        self.validation_errors.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_publish_success(&self) {
        self.signals_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_error(&self) {
        self.publish_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_drop(&self) {
        self.publish_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one strategy execution with its wall-clock cost.
    pub fn record_execution(&self, strategy: &str, result: ExecutionResult, latency_us: u64) {
        if result == ExecutionResult::Error {
            self.strategy_errors.fetch_add(1, Ordering::Relaxed);
        }

        let mut table = self.per_strategy.write();
        let counters = table.entry(strategy.to_string()).or_default();
        counters.executions += 1;
        counters.latency_sum_us += latency_us;
        counters.latency_max_us = counters.latency_max_us.max(latency_us);
        match result {
            ExecutionResult::Signal => counters.signals += 1,
            ExecutionResult::Error => counters.errors += 1,
            ExecutionResult::NoSignal => {}
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        let messages = self.messages_processed.load(Ordering::Relaxed);

        let mut strategies: Vec<StrategySnapshot> = self
            .per_strategy
            .read()
            .iter()
            .map(|(name, c)| StrategySnapshot {
                strategy: name.clone(),
                executions: c.executions,
                signals: c.signals,
                errors: c.errors,
                avg_latency_us: if c.executions > 0 {
                    c.latency_sum_us as f64 / c.executions as f64
                } else {
                    0.0
                },
                max_latency_us: c.latency_max_us,
            })
            .collect();
        strategies.sort_by(|a, b| a.strategy.cmp(&b.strategy));

        MetricsSnapshot {
            uptime_seconds: uptime,
            messages_processed: messages,
            messages_per_second: if uptime > 0 {
                messages as f64 / uptime as f64
            } else {
                0.0
            },
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            unknown_streams: self.unknown_streams.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            strategy_errors: self.strategy_errors.load(Ordering::Relaxed),
            signals_published: self.signals_published.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            publish_drops: self.publish_drops.load(Ordering::Relaxed),
            last_message_age_seconds: self
                .last_message_at
                .read()
                .map(|at| (Utc::now() - at).num_seconds()),
            strategies,
        }
    }

    /// Emit the periodic aggregated stats line.
    pub fn log_heartbeat(&self, breakers: &[BreakerInfo]) {
        let snap = self.snapshot();
        let open_breakers: Vec<&str> = breakers
            .iter()
            .filter(|b| b.state != crate::breaker::BreakerState::Closed)
            .map(|b| b.name.as_str())
            .collect();
        let signal_counts: Vec<String> = snap
            .strategies
            .iter()
            .map(|s| format!("{}={}", s.strategy, s.signals))
            .collect();

        info!(
            uptime_s = snap.uptime_seconds,
            messages = snap.messages_processed,
            rate = format!("{:.1}/s", snap.messages_per_second),
            signals = snap.signals_published,
            signals_by_strategy = %signal_counts.join(" "),
            parse_errors = snap.parse_errors,
            unknown_streams = snap.unknown_streams,
            strategy_errors = snap.strategy_errors,
            publish_drops = snap.publish_drops,
            open_breakers = ?open_breakers,
            "heartbeat"
        );
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
