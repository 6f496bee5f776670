// =============================================================================
// Signal Publisher — validated outbound publish with retry and backoff
// =============================================================================
//
// Fire-and-forget from the dispatch loop's point of view: a signal is
// validated, then handed to a spawned task that retries with exponential
// backoff under the publisher's own circuit breaker. After the attempt
// budget is exhausted the signal is dropped and counted; the event is never
// re-dispatched.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::breaker::CircuitBreaker;
use crate::metrics::EngineMetrics;
use crate::signals::TradeSignal;

/// Transport seam so the retry logic is testable without a live bus.
#[async_trait]
pub trait SignalSink: Send + Sync {
    async fn send(&self, subject: &str, payload: Bytes) -> Result<()>;
}

/// Production sink over a NATS client.
pub struct NatsSink {
    client: async_nats::Client,
}

impl NatsSink {
    pub fn new(client: async_nats::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SignalSink for NatsSink {
    async fn send(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .context("publishing to bus")?;
        self.client.flush().await.context("flushing bus client")?;
        Ok(())
    }
}

/// Outbound publisher for wire signals.
pub struct Publisher {
    sink: Arc<dyn SignalSink>,
    topic: String,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<EngineMetrics>,
    max_attempts: u32,
    io_deadline: Duration,
}

impl Publisher {
    pub fn new(
        sink: Arc<dyn SignalSink>,
        topic: impl Into<String>,
        metrics: Arc<EngineMetrics>,
        io_deadline: Duration,
    ) -> Self {
        Self {
            sink,
            topic: topic.into(),
            breaker: Arc::new(CircuitBreaker::with_defaults("publisher")),
            metrics,
            max_attempts: 3,
            io_deadline,
        }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Validate and publish a signal in the background. Invalid signals are
    /// dropped immediately and counted.
    pub fn publish(self: &Arc<Self>, signal: TradeSignal) {
        if let Err(errors) = signal.validate() {
            warn!(
                strategy_id = %signal.strategy_id,
                errors = ?errors,
                "signal failed pre-publish validation, dropped"
            );
            self.metrics.record_publish_drop();
            return;
        }

        let publisher = self.clone();
        tokio::spawn(async move {
            publisher.publish_with_retry(signal).await;
        });
    }

    async fn publish_with_retry(&self, signal: TradeSignal) {
        let payload = match serde_json::to_vec(&signal) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                error!(error = %e, "signal serialisation failed, dropped");
                self.metrics.record_publish_drop();
                return;
            }
        };

        let mut backoff = Duration::from_millis(100);
        for attempt in 1..=self.max_attempts {
            if !self.breaker.allow() {
                debug!(
                    signal_id = %signal.signal_id,
                    "publisher breaker open, signal dropped"
                );
                self.metrics.record_publish_drop();
                return;
            }

            let result =
                tokio::time::timeout(self.io_deadline, self.sink.send(&self.topic, payload.clone()))
                    .await;

            match result {
                Ok(Ok(())) => {
                    self.breaker.record_success();
                    self.metrics.record_publish_success();
                    debug!(
                        signal_id = %signal.signal_id,
                        symbol = %signal.symbol,
                        action = %signal.action,
                        attempt,
                        "signal published"
                    );
                    return;
                }
                Ok(Err(e)) => {
                    self.breaker.record_failure();
                    self.metrics.record_publish_error();
                    warn!(
                        signal_id = %signal.signal_id,
                        attempt,
                        error = %e,
                        "publish attempt failed"
                    );
                }
                Err(_) => {
                    self.breaker.record_failure();
                    self.metrics.record_publish_error();
                    warn!(
                        signal_id = %signal.signal_id,
                        attempt,
                        "publish attempt deadline expired"
                    );
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }

        warn!(
            signal_id = %signal.signal_id,
            attempts = self.max_attempts,
            "signal dropped after exhausting retries"
        );
        self.metrics.record_publish_drop();
    }
}
