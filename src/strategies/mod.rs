// =============================================================================
// Strategies — per-event microstructure analyzers
// =============================================================================
//
// Each strategy consumes one stream kind and emits at most one internal
// signal per event. State, where a strategy keeps any, is process-local
// and bounded (time windows or fixed-size rings); nothing is shared
// between strategies or pods.
//
// Dispatch order within a depth event: depth-analyzer runs first, then
// orderbook_skew, spread_liquidity, iceberg_detector. Trade events go to
// trade_momentum, ticker events to ticker_velocity. The order only affects
// metrics emission; strategies are independent.
// =============================================================================

pub mod iceberg_detector;
pub mod orderbook_skew;
pub mod spread_liquidity;
pub mod ticker_velocity;
pub mod trade_momentum;

use chrono::{DateTime, Utc};

use crate::config::ResolvedParams;
use crate::market::MarketEvent;
use crate::signals::InternalSignal;
use crate::types::{ConfidenceLevel, StreamKind};

/// A per-event analyzer. `evaluate` is pure computation over the event and
/// the strategy's own bounded state; it performs no I/O and never blocks.
pub trait Strategy: Send {
    /// Short name, also the configuration strategy id.
    fn name(&self) -> &'static str;

    /// The stream kind this strategy consumes.
    fn stream_kind(&self) -> StreamKind;

    /// Analyze one event under the parameters captured for this dispatch.
    /// Returns `None` when nothing is actionable.
    fn evaluate(
        &mut self,
        event: &MarketEvent,
        params: &ResolvedParams,
        now: DateTime<Utc>,
    ) -> Option<InternalSignal>;
}

/// All strategies in dispatch order.
pub fn build_all() -> Vec<Box<dyn Strategy>> {
    vec![
        Box::new(orderbook_skew::OrderBookSkew::new()),
        Box::new(spread_liquidity::SpreadLiquidity::new()),
        Box::new(iceberg_detector::IcebergDetector::new()),
        Box::new(trade_momentum::TradeMomentum::new()),
        Box::new(ticker_velocity::TickerVelocity::new()),
    ]
}

/// Band a numeric score into the categorical level strategies attach to
/// their signals. The adapter never reads this when a score is present;
/// it exists for human-facing provenance.
pub(crate) fn level_for_score(score: f64) -> ConfidenceLevel {
    if score >= 0.8 {
        ConfidenceLevel::High
    } else if score >= 0.6 {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_in_dispatch_order() {
        let names: Vec<&str> = build_all().iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            vec![
                "orderbook_skew",
                "spread_liquidity",
                "iceberg_detector",
                "trade_momentum",
                "ticker_velocity"
            ]
        );
    }

    #[test]
    fn level_bands() {
        assert_eq!(level_for_score(0.9), ConfidenceLevel::High);
        assert_eq!(level_for_score(0.7), ConfidenceLevel::Medium);
        assert_eq!(level_for_score(0.3), ConfidenceLevel::Low);
    }
}
