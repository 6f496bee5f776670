// =============================================================================
// Order-Book Skew — stateless bid/ask volume ratio strategy
// =============================================================================
//
// Sums the top-k quantities on each side of the book. A ratio far above 1
// means resting bid pressure (buy); far below 1 means resting ask pressure
// (sell). A wide spread marks an unreliable book, so the signal is
// suppressed above `min_spread_percent`.
// =============================================================================

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::ResolvedParams;
use crate::market::events::DepthSnapshot;
use crate::market::MarketEvent;
use crate::signals::InternalSignal;
use crate::strategies::{level_for_score, Strategy};
use crate::types::{SignalAction, StreamKind};

pub struct OrderBookSkew;

impl OrderBookSkew {
    pub fn new() -> Self {
        Self
    }

    fn analyze(
        &self,
        snapshot: &DepthSnapshot,
        params: &ResolvedParams,
        now: DateTime<Utc>,
    ) -> Option<InternalSignal> {
        let top_levels = params.i64("top_levels").unwrap_or(5).max(1) as usize;
        let buy_threshold = params.f64("buy_threshold").unwrap_or(1.2);
        let sell_threshold = params.f64("sell_threshold").unwrap_or(0.8);
        let min_spread_percent = params.f64("min_spread_percent").unwrap_or(0.1);
        let base_confidence = params.f64("base_confidence").unwrap_or(0.7);

        let bid_volume: f64 = snapshot.bids.iter().take(top_levels).map(|l| l.quantity).sum();
        let ask_volume: f64 = snapshot.asks.iter().take(top_levels).map(|l| l.quantity).sum();

        if ask_volume <= 0.0 {
            return None;
        }

        let best_bid = snapshot.best_bid()?.price;
        let best_ask = snapshot.best_ask()?.price;
        if best_bid <= 0.0 {
            return None;
        }

        let ratio = bid_volume / ask_volume;
        let spread_percent = (best_ask - best_bid) / best_bid * 100.0;

        // A wide spread means thin, unreliable microstructure.
        if spread_percent > min_spread_percent {
            debug!(
                symbol = %snapshot.symbol,
                spread_percent,
                "skew suppressed by spread guard"
            );
            return None;
        }

        let (action, threshold, price) = if ratio > buy_threshold {
            (SignalAction::OpenLong, buy_threshold, best_bid)
        } else if ratio < sell_threshold {
            (SignalAction::OpenShort, sell_threshold, best_ask)
        } else {
            return None;
        };

        let score = (base_confidence + (ratio - threshold).abs() * 0.5).min(0.95);

        let mut signal = InternalSignal::new(
            self.name(),
            snapshot.symbol.clone(),
            action,
            level_for_score(score),
            price,
        )
        .with_score(score)
        .with_current_price((best_bid + best_ask) / 2.0)
        .with_indicator("bid_volume", bid_volume)
        .with_indicator("ask_volume", ask_volume)
        .with_indicator("ratio", ratio)
        .with_indicator("spread_percent", spread_percent);
        signal.timestamp = now;

        Some(signal)
    }
}

impl Default for OrderBookSkew {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for OrderBookSkew {
    fn name(&self) -> &'static str {
        "orderbook_skew"
    }

    fn stream_kind(&self) -> StreamKind {
        StreamKind::Depth
    }

    fn evaluate(
        &mut self,
        event: &MarketEvent,
        params: &ResolvedParams,
        now: DateTime<Utc>,
    ) -> Option<InternalSignal> {
        match event {
            MarketEvent::Depth(snapshot) => self.analyze(snapshot, params, now),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::store::MemoryConfigStore;
    use crate::config::ConfigManager;
    use crate::market::events::PriceLevel;
    use crate::signals::SignalAdapter;
    use std::sync::Arc;
    use std::time::Duration;

    fn snapshot(bids: &[(f64, f64)], asks: &[(f64, f64)]) -> DepthSnapshot {
        DepthSnapshot {
            symbol: "BTCUSDT".to_string(),
            last_update_id: 1,
            bids: bids
                .iter()
                .map(|&(price, quantity)| PriceLevel { price, quantity })
                .collect(),
            asks: asks
                .iter()
                .map(|&(price, quantity)| PriceLevel { price, quantity })
                .collect(),
            event_time: Utc::now(),
        }
    }

    async fn default_params() -> ResolvedParams {
        let mgr = ConfigManager::new(
            Arc::new(MemoryConfigStore::new()),
            Duration::from_secs(60),
            Duration::from_secs(5),
        );
        mgr.get("orderbook_skew", Some("BTCUSDT")).await
    }

    #[tokio::test]
    async fn bid_heavy_book_buys_at_best_bid() {
        // S1: top-5 bid volume 8, ask volume 1.5, ratio 5.33 over the 1.2
        // threshold; spread 0.002% passes the 0.1% guard.
        let snap = snapshot(
            &[
                (50000.0, 3.0),
                (49999.0, 2.0),
                (49998.0, 1.0),
                (49997.0, 1.0),
                (49996.0, 1.0),
            ],
            &[
                (50001.0, 0.5),
                (50002.0, 0.4),
                (50003.0, 0.3),
                (50004.0, 0.2),
                (50005.0, 0.1),
            ],
        );

        let params = default_params().await;
        let mut strategy = OrderBookSkew::new();
        let signal = strategy
            .evaluate(&MarketEvent::Depth(snap), &params, Utc::now())
            .unwrap();

        assert_eq!(signal.action, SignalAction::OpenLong);
        assert!((signal.price - 50000.0).abs() < f64::EPSILON);
        let expected = (0.70 + (8.0 / 1.5 - 1.2) * 0.5_f64).min(0.95);
        assert!((signal.confidence_score.unwrap() - expected).abs() < 1e-9);
        assert!((signal.indicators["ratio"] - 8.0 / 1.5).abs() < 1e-9);
        assert!((signal.indicators["spread_percent"] - 0.002).abs() < 1e-9);

        // The adapter derives the documented strategy id.
        let wire = SignalAdapter::default().adapt(&signal);
        assert_eq!(wire.strategy_id, "orderbook_skew_BTCUSDT");
    }

    #[tokio::test]
    async fn wide_spread_suppresses_signal() {
        // S2: same bids, best ask 100 points away; spread 0.2% > 0.1%.
        let snap = snapshot(
            &[
                (50000.0, 3.0),
                (49999.0, 2.0),
                (49998.0, 1.0),
                (49997.0, 1.0),
                (49996.0, 1.0),
            ],
            &[(50100.0, 0.5), (50101.0, 0.4)],
        );

        let params = default_params().await;
        let mut strategy = OrderBookSkew::new();
        assert!(strategy
            .evaluate(&MarketEvent::Depth(snap), &params, Utc::now())
            .is_none());
    }

    #[tokio::test]
    async fn ask_heavy_book_sells_at_best_ask() {
        let snap = snapshot(
            &[(50000.0, 0.5)],
            &[(50001.0, 2.0), (50002.0, 2.0)],
        );
        let params = default_params().await;
        let mut strategy = OrderBookSkew::new();
        let signal = strategy
            .evaluate(&MarketEvent::Depth(snap), &params, Utc::now())
            .unwrap();
        assert_eq!(signal.action, SignalAction::OpenShort);
        assert!((signal.price - 50001.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn balanced_book_is_silent() {
        let snap = snapshot(&[(50000.0, 1.0)], &[(50001.0, 1.0)]);
        let params = default_params().await;
        let mut strategy = OrderBookSkew::new();
        assert!(strategy
            .evaluate(&MarketEvent::Depth(snap), &params, Utc::now())
            .is_none());
    }

    #[tokio::test]
    async fn confidence_caps_at_095() {
        let snap = snapshot(&[(50000.0, 100.0)], &[(50001.0, 1.0)]);
        let params = default_params().await;
        let mut strategy = OrderBookSkew::new();
        let signal = strategy
            .evaluate(&MarketEvent::Depth(snap), &params, Utc::now())
            .unwrap();
        assert!((signal.confidence_score.unwrap() - 0.95).abs() < f64::EPSILON);
    }
}
