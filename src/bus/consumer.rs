// =============================================================================
// Event Consumer — queue-group bus intake and dispatch
// =============================================================================
//
// Subscribes to the input topic with a queue group so N replicas split the
// stream; each message lands on exactly one pod. Dispatch is single-file:
// a message is fully routed before the next is read, which is the only
// back-pressure mechanism the engine needs.
//
// Malformed payloads and unknown streams are counted and dropped with
// bounded logging; nothing from intake ever propagates.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use tracing::{info, warn};

use crate::market::events::{classify_stream, decode_envelope, parse_event};
use crate::metrics::EngineMetrics;
use crate::router::Router;

/// Log one warning per this many dropped messages; the rest go uncounted
/// to the log but still hit the counters.
const DROP_LOG_EVERY: u64 = 1000;

/// Run one subscription until the stream ends or errors. The caller owns
/// reconnection.
pub async fn run(
    client: async_nats::Client,
    topic: &str,
    queue_group: &str,
    router: &mut Router,
    metrics: &Arc<EngineMetrics>,
) -> Result<()> {
    let mut subscription = client
        .queue_subscribe(topic.to_string(), queue_group.to_string())
        .await
        .context("subscribing to input topic")?;

    info!(topic, queue_group, "consumer subscribed");

    while let Some(message) = subscription.next().await {
        handle_message(&message.payload, router, metrics).await;
    }

    warn!(topic, "subscription stream ended");
    Ok(())
}

/// Decode, classify, convert, and dispatch a single payload.
pub async fn handle_message(payload: &[u8], router: &mut Router, metrics: &Arc<EngineMetrics>) {
    metrics.record_message();

    let envelope = match decode_envelope(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            let count = metrics.record_parse_error();
            if count % DROP_LOG_EVERY == 1 {
                warn!(error = %e, total = count, "dropping unparsable payloads");
            }
            return;
        }
    };

    let kind = match classify_stream(&envelope.stream) {
        Some(kind) => kind,
        None => {
            let count = metrics.record_unknown_stream();
            if count % DROP_LOG_EVERY == 1 {
                warn!(stream = %envelope.stream, total = count, "dropping unknown streams");
            }
            return;
        }
    };

    let event = match parse_event(kind, &envelope) {
        Ok(event) => event,
        Err(e) => {
            let count = metrics.record_validation_error();
            if count % DROP_LOG_EVERY == 1 {
                warn!(
                    stream = %envelope.stream,
                    error = %e,
                    total = count,
                    "dropping invalid events"
                );
            }
            return;
        }
    };

    router.dispatch(event).await;
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerState;
    use crate::bus::{Publisher, SignalSink};
    use crate::config::store::MemoryConfigStore;
    use crate::config::ConfigManager;
    use crate::market::DepthAnalyzer;
    use crate::signals::SignalAdapter;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    struct NullSink;

    #[async_trait]
    impl SignalSink for NullSink {
        async fn send(&self, _subject: &str, _payload: Bytes) -> Result<()> {
            Ok(())
        }
    }

    fn test_router(metrics: Arc<EngineMetrics>) -> Router {
        let config = Arc::new(ConfigManager::new(
            Arc::new(MemoryConfigStore::new()),
            Duration::from_secs(60),
            Duration::from_secs(5),
        ));
        let publisher = Arc::new(Publisher::new(
            Arc::new(NullSink),
            "signals.trading",
            metrics.clone(),
            Duration::from_secs(5),
        ));
        Router::new(
            Arc::new(DepthAnalyzer::new()),
            config,
            SignalAdapter::default(),
            publisher,
            metrics,
        )
    }

    #[tokio::test]
    async fn valid_depth_message_reaches_the_analyzer() {
        let metrics = Arc::new(EngineMetrics::new());
        let mut router = test_router(metrics.clone());

        let payload = serde_json::json!({
            "stream": "btcusdt@depth20@100ms",
            "data": {
                "lastUpdateId": 7,
                "bids": [["50000.0", "1.0"]],
                "asks": [["50001.0", "1.0"]]
            }
        });
        handle_message(payload.to_string().as_bytes(), &mut router, &metrics).await;

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_processed, 1);
        assert_eq!(snap.parse_errors, 0);
        assert_eq!(snap.validation_errors, 0);
    }

    #[tokio::test]
    async fn garbage_counts_as_parse_error() {
        let metrics = Arc::new(EngineMetrics::new());
        let mut router = test_router(metrics.clone());

        handle_message(b"not json", &mut router, &metrics).await;
        handle_message(br#"{"data": {}}"#, &mut router, &metrics).await;

        let snap = metrics.snapshot();
        assert_eq!(snap.messages_processed, 2);
        assert_eq!(snap.parse_errors, 2);
    }

    #[tokio::test]
    async fn unknown_stream_counts_separately() {
        let metrics = Arc::new(EngineMetrics::new());
        let mut router = test_router(metrics.clone());

        let payload = serde_json::json!({
            "stream": "btcusdt@kline_1m",
            "data": {}
        });
        handle_message(payload.to_string().as_bytes(), &mut router, &metrics).await;

        let snap = metrics.snapshot();
        assert_eq!(snap.unknown_streams, 1);
        assert_eq!(snap.parse_errors, 0);
    }

    #[tokio::test]
    async fn empty_side_depth_counts_as_validation_error() {
        let metrics = Arc::new(EngineMetrics::new());
        let mut router = test_router(metrics.clone());

        let payload = serde_json::json!({
            "stream": "btcusdt@depth20@100ms",
            "data": { "lastUpdateId": 7, "bids": [], "asks": [["50001.0", "1.0"]] }
        });
        handle_message(payload.to_string().as_bytes(), &mut router, &metrics).await;

        let snap = metrics.snapshot();
        assert_eq!(snap.validation_errors, 1);
        // Nothing reached the strategies.
        assert!(snap.strategies.is_empty());
    }

    #[tokio::test]
    async fn malformed_events_never_touch_breakers() {
        let metrics = Arc::new(EngineMetrics::new());
        let mut router = test_router(metrics.clone());

        for _ in 0..20 {
            handle_message(b"junk", &mut router, &metrics).await;
        }
        for info in router.breaker_snapshots() {
            assert_eq!(info.state, BreakerState::Closed);
            assert_eq!(info.consecutive_failures, 0);
        }
    }
}
