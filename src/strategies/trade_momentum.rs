// =============================================================================
// Trade Momentum — aggressor-weighted momentum on individual trades
// =============================================================================
//
// Momentum blends three components:
//
//   0.4 * price_momentum   (p - p_prev) / p_prev
//   0.3 * quantity_score   min(1, q / avg_q)
//   0.3 * maker_score      -1 when the buyer was maker, +1 otherwise
//
// Previous price and average quantity come from a small per-symbol trailing
// cache; the strategy stays effectively stateless per event.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::config::ResolvedParams;
use crate::market::events::Trade;
use crate::market::MarketEvent;
use crate::signals::InternalSignal;
use crate::strategies::{level_for_score, Strategy};
use crate::types::{SignalAction, StreamKind};

/// Trailing quantities retained per symbol for the rolling average.
const QUANTITY_WINDOW: usize = 50;

#[derive(Default)]
struct SymbolCache {
    prev_price: f64,
    quantities: VecDeque<f64>,
}

impl SymbolCache {
    fn avg_quantity(&self) -> f64 {
        if self.quantities.is_empty() {
            0.0
        } else {
            self.quantities.iter().sum::<f64>() / self.quantities.len() as f64
        }
    }

    fn record(&mut self, price: f64, quantity: f64) {
        self.prev_price = price;
        self.quantities.push_back(quantity);
        while self.quantities.len() > QUANTITY_WINDOW {
            self.quantities.pop_front();
        }
    }
}

pub struct TradeMomentum {
    cache: HashMap<String, SymbolCache>,
}

impl TradeMomentum {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    fn analyze(
        &mut self,
        trade: &Trade,
        params: &ResolvedParams,
        now: DateTime<Utc>,
    ) -> Option<InternalSignal> {
        let buy_threshold = params.f64("buy_threshold").unwrap_or(0.3);
        let sell_threshold = params.f64("sell_threshold").unwrap_or(-0.3);

        let cache = self.cache.entry(trade.symbol.clone()).or_default();

        let price_momentum = if cache.prev_price > 0.0 {
            (trade.price - cache.prev_price) / cache.prev_price
        } else {
            0.0
        };

        let avg_quantity = cache.avg_quantity();
        let quantity_score = if avg_quantity > 0.0 {
            (trade.quantity / avg_quantity).min(1.0)
        } else {
            0.0
        };

        // Buyer-maker means the taker hit the bid: seller aggression.
        let maker_score = if trade.is_buyer_maker { -1.0 } else { 1.0 };

        let momentum = 0.4 * price_momentum + 0.3 * quantity_score + 0.3 * maker_score;

        cache.record(trade.price, trade.quantity);

        let action = if momentum > buy_threshold {
            SignalAction::OpenLong
        } else if momentum < sell_threshold {
            SignalAction::OpenShort
        } else {
            return None;
        };

        let score = (0.65 + momentum.abs() * 0.2).min(0.95);

        let mut signal = InternalSignal::new(
            self.name(),
            trade.symbol.clone(),
            action,
            level_for_score(score),
            trade.price,
        )
        .with_score(score)
        .with_indicator("momentum", momentum)
        .with_indicator("price_momentum", price_momentum)
        .with_indicator("quantity_score", quantity_score)
        .with_indicator("maker_score", maker_score);
        signal.timestamp = now;

        Some(signal)
    }
}

impl Default for TradeMomentum {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for TradeMomentum {
    fn name(&self) -> &'static str {
        "trade_momentum"
    }

    fn stream_kind(&self) -> StreamKind {
        StreamKind::Trade
    }

    fn evaluate(
        &mut self,
        event: &MarketEvent,
        params: &ResolvedParams,
        now: DateTime<Utc>,
    ) -> Option<InternalSignal> {
        match event {
            MarketEvent::Trade(trade) => self.analyze(trade, params, now),
            _ => None,
        }
    }
}
