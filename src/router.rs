// =============================================================================
// Router — fans one typed event out to the depth analyzer and strategies
// =============================================================================
//
// Dispatch is fully sequential: the analyzer first (depth events only),
// then every strategy whose stream kind matches, in registry order.
// Parameters are captured per strategy at the top of each dispatch, so a
// mid-dispatch reconfiguration is never observed.
//
// Failure isolation: every strategy (and the analyzer) runs behind its own
// circuit breaker and a panic guard. A crashing strategy is skipped for
// this event and counted; the others continue.
// =============================================================================

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error};

use crate::breaker::{BreakerInfo, CircuitBreaker};
use crate::config::ConfigManager;
use crate::market::{DepthAnalyzer, MarketEvent};
use crate::metrics::{EngineMetrics, ExecutionResult};
use crate::bus::Publisher;
use crate::signals::{SignalAdapter, TradeSignal};
use crate::strategies::{build_all, Strategy};

struct StrategySlot {
    strategy: Box<dyn Strategy>,
    breaker: Arc<CircuitBreaker>,
}

pub struct Router {
    slots: Vec<StrategySlot>,
    analyzer: Arc<DepthAnalyzer>,
    analyzer_breaker: Arc<CircuitBreaker>,
    config: Arc<ConfigManager>,
    adapter: SignalAdapter,
    publisher: Arc<Publisher>,
    metrics: Arc<EngineMetrics>,
}

impl Router {
    pub fn new(
        analyzer: Arc<DepthAnalyzer>,
        config: Arc<ConfigManager>,
        adapter: SignalAdapter,
        publisher: Arc<Publisher>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        let slots = build_all()
            .into_iter()
            .map(|strategy| {
                let breaker = Arc::new(CircuitBreaker::with_defaults(strategy.name()));
                StrategySlot { strategy, breaker }
            })
            .collect();

        Self {
            slots,
            analyzer,
            analyzer_breaker: Arc::new(CircuitBreaker::with_defaults("depth_analyzer")),
            config,
            adapter,
            publisher,
            metrics,
        }
    }

    /// Dispatch one event. Returns the wire signals that were emitted (they
    /// are also handed to the publisher).
    pub async fn dispatch(&mut self, event: MarketEvent) -> Vec<TradeSignal> {
        let now = Utc::now();
        let symbol = event.symbol().to_string();

        // ── Depth analyzer runs before the depth strategies ─────────────
        if let MarketEvent::Depth(snapshot) = &event {
            if self.analyzer_breaker.allow() {
                let started = Instant::now();
                let outcome = catch_unwind(AssertUnwindSafe(|| self.analyzer.update(snapshot)));
                let latency = started.elapsed().as_micros() as u64;
                match outcome {
                    Ok(_) => {
                        self.analyzer_breaker.record_success();
                        self.metrics.record_execution(
                            "depth_analyzer",
                            ExecutionResult::NoSignal,
                            latency,
                        );
                    }
                    Err(_) => {
                        // Metrics for this symbol stay stale until the next
                        // good event.
                        error!(symbol = %symbol, "depth analyzer panicked");
                        self.analyzer_breaker.record_failure();
                        self.metrics.record_execution(
                            "depth_analyzer",
                            ExecutionResult::Error,
                            latency,
                        );
                    }
                }
            }
        }

        // ── Strategies, sequential in registry order ────────────────────
        let mut emitted = Vec::new();

        for slot in &mut self.slots {
            if slot.strategy.stream_kind() != event.kind() {
                continue;
            }
            if !slot.breaker.allow() {
                debug!(strategy = slot.strategy.name(), "breaker open, skipped");
                continue;
            }

            // Parameters captured once per dispatch.
            let params = self.config.get(slot.strategy.name(), Some(&symbol)).await;
            if !params.enabled() {
                continue;
            }

            let name = slot.strategy.name();
            let started = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                slot.strategy.evaluate(&event, &params, now)
            }));
            let latency = started.elapsed().as_micros() as u64;

            match outcome {
                Err(_) => {
                    error!(strategy = name, symbol = %symbol, "strategy panicked");
                    slot.breaker.record_failure();
                    self.metrics
                        .record_execution(name, ExecutionResult::Error, latency);
                }
                Ok(None) => {
                    slot.breaker.record_success();
                    self.metrics
                        .record_execution(name, ExecutionResult::NoSignal, latency);
                }
                Ok(Some(mut signal)) => {
                    slot.breaker.record_success();
                    signal.config = params.provenance();

                    let wire = self.adapter.adapt(&signal);
                    self.metrics
                        .record_execution(name, ExecutionResult::Signal, latency);
                    self.publisher.publish(wire.clone());
                    emitted.push(wire);
                }
            }
        }

        emitted
    }

    /// Breaker states for every strategy, the analyzer, and the publisher.
    pub fn breaker_snapshots(&self) -> Vec<BreakerInfo> {
        self.breaker_handles().iter().map(|b| b.snapshot()).collect()
    }

    /// Shared handles to every breaker, for the REST surface and the
    /// heartbeat. Collected once at startup.
    pub fn breaker_handles(&self) -> Vec<Arc<CircuitBreaker>> {
        let mut handles: Vec<Arc<CircuitBreaker>> =
            self.slots.iter().map(|s| s.breaker.clone()).collect();
        handles.push(self.analyzer_breaker.clone());
        handles.push(self.publisher.breaker().clone());
        handles
    }
}
