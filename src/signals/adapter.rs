// =============================================================================
// Signal Adapter — internal representation to executor contract
// =============================================================================
//
// Pure transformation, the only place where the categorical confidence
// level turns into a numeric wire confidence. Idempotent by construction:
// the wire metadata retains the original enums, so a wire signal fed back
// through the adapter produces the same wire object modulo identifiers and
// timestamps.
//
// Risk defaults when the strategy supplies no levels:
//   confidence >= 0.8          SL 2% / TP 5%
//   0.6 <= confidence < 0.8    SL 3% / TP 4%
//   confidence < 0.6           SL 5% / TP 3%
// =============================================================================

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::signals::model::{ConfigProvenance, InternalSignal, TradeSignal};
use crate::types::{ConfidenceLevel, OrderType, SignalAction, SignalStrength, TimeInForce, WireAction};

/// Constant `source` tag on every published signal.
pub const SIGNAL_SOURCE: &str = "realtime-strategies";

/// Stateless contract adapter.
#[derive(Debug, Clone)]
pub struct SignalAdapter {
    /// Quantity before confidence scaling.
    pub base_quantity: f64,
}

impl SignalAdapter {
    pub fn new(base_quantity: f64) -> Self {
        Self { base_quantity }
    }

    /// Transform an internal signal into the wire contract.
    pub fn adapt(&self, signal: &InternalSignal) -> TradeSignal {
        let action = map_action(signal.action);
        let confidence = signal
            .confidence_score
            .unwrap_or_else(|| default_score(signal.confidence))
            .clamp(0.0, 1.0);

        let strategy_id = signal
            .strategy_id
            .clone()
            .unwrap_or_else(|| format!("{}_{}", signal.strategy, signal.symbol));

        let (stop_loss, take_profit, stop_loss_pct, take_profit_pct) =
            self.risk_levels(signal, action, confidence);

        let quantity = self.base_quantity * confidence;

        let mut metadata = Map::new();
        metadata.insert(
            "original_signal_type".to_string(),
            json!(signal.action.to_string()),
        );
        metadata.insert(
            "original_signal_action".to_string(),
            json!(signal.action.to_string()),
        );
        metadata.insert(
            "original_confidence".to_string(),
            json!(signal.confidence.to_string()),
        );
        metadata.insert("config_source".to_string(), json!(signal.config.source));
        metadata.insert("config_version".to_string(), json!(signal.config.version));
        metadata.insert(
            "config_is_override".to_string(),
            json!(signal.config.is_override),
        );
        for (name, value) in &signal.indicators {
            metadata.insert(format!("indicator_{name}"), json!(value));
        }
        for (key, value) in &signal.extra {
            metadata.insert(key.clone(), value.clone());
        }

        let id = Uuid::new_v4().to_string();

        TradeSignal {
            signal_id: id.clone(),
            id,
            correlation_id: Uuid::new_v4().to_string(),
            strategy_id,
            symbol: signal.symbol.clone(),
            signal_type: action,
            action,
            confidence,
            strength: SignalStrength::from_score(confidence),
            price: signal.price,
            quantity,
            current_price: signal.current_price,
            source: SIGNAL_SOURCE.to_string(),
            strategy: signal.strategy.clone(),
            metadata,
            stop_loss,
            take_profit,
            stop_loss_pct,
            take_profit_pct,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            timeframe: signal.timeframe.clone(),
            timestamp: signal.timestamp,
        }
    }

    /// Reconstruct the internal representation of an already-adapted signal
    /// from its retained metadata. `adapt(internalize(wire))` reproduces
    /// `wire` up to identifiers and timestamps.
    pub fn internalize(wire: &TradeSignal) -> InternalSignal {
        let meta_str = |key: &str| -> Option<String> {
            wire.metadata
                .get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        let action = meta_str("original_signal_action")
            .as_deref()
            .and_then(parse_action)
            .unwrap_or(match wire.action {
                WireAction::Buy => SignalAction::OpenLong,
                WireAction::Sell => SignalAction::OpenShort,
                WireAction::Close => SignalAction::CloseLong,
                WireAction::Hold => SignalAction::Hold,
            });

        let confidence = meta_str("original_confidence")
            .as_deref()
            .and_then(parse_confidence)
            .unwrap_or_default();

        let config = ConfigProvenance {
            source: meta_str("config_source").unwrap_or_else(|| "default".to_string()),
            version: wire
                .metadata
                .get("config_version")
                .and_then(Value::as_i64)
                .unwrap_or(0),
            is_override: wire
                .metadata
                .get("config_is_override")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };

        let indicators = wire
            .metadata
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix("indicator_")
                    .zip(v.as_f64())
                    .map(|(name, value)| (name.to_string(), value))
            })
            .collect();

        let extra = wire
            .metadata
            .iter()
            .filter(|(k, _)| {
                !k.starts_with("indicator_")
                    && !k.starts_with("original_")
                    && !k.starts_with("config_")
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        InternalSignal {
            strategy: wire.strategy.clone(),
            strategy_id: Some(wire.strategy_id.clone()),
            symbol: wire.symbol.clone(),
            action,
            confidence,
            confidence_score: Some(wire.confidence),
            price: wire.price,
            current_price: wire.current_price,
            stop_loss: wire.stop_loss,
            take_profit: wire.take_profit,
            timeframe: wire.timeframe.clone(),
            indicators,
            extra,
            config,
            timestamp: wire.timestamp,
        }
    }

    /// Resolve absolute and fractional risk levels for a signal.
    ///
    /// Strategy-supplied absolute levels win; otherwise the confidence-band
    /// defaults are converted from `price` by side. Hold/close signals carry
    /// no levels.
    fn risk_levels(
        &self,
        signal: &InternalSignal,
        action: WireAction,
        confidence: f64,
    ) -> (Option<f64>, Option<f64>, f64, f64) {
        let directional = matches!(action, WireAction::Buy | WireAction::Sell);
        if !directional {
            return (None, None, 0.0, 0.0);
        }

        let price = signal.price;

        if let (Some(sl), Some(tp)) = (signal.stop_loss, signal.take_profit) {
            let sl_pct = if price > 0.0 { (price - sl).abs() / price } else { 0.0 };
            let tp_pct = if price > 0.0 { (tp - price).abs() / price } else { 0.0 };
            return (Some(sl), Some(tp), sl_pct, tp_pct);
        }

        let (sl_pct, tp_pct) = if confidence >= 0.8 {
            (0.02, 0.05)
        } else if confidence >= 0.6 {
            (0.03, 0.04)
        } else {
            (0.05, 0.03)
        };

        let (stop_loss, take_profit) = match action {
            WireAction::Buy => (price * (1.0 - sl_pct), price * (1.0 + tp_pct)),
            WireAction::Sell => (price * (1.0 + sl_pct), price * (1.0 - tp_pct)),
            _ => unreachable!("non-directional actions handled above"),
        };

        (Some(stop_loss), Some(take_profit), sl_pct, tp_pct)
    }
}

impl Default for SignalAdapter {
    fn default() -> Self {
        Self::new(1.0)
    }
}

fn map_action(action: SignalAction) -> WireAction {
    match action {
        SignalAction::OpenLong => WireAction::Buy,
        SignalAction::OpenShort => WireAction::Sell,
        SignalAction::CloseLong | SignalAction::CloseShort => WireAction::Close,
        SignalAction::Hold => WireAction::Hold,
    }
}

/// Categorical fallback used only when the strategy computed no score.
fn default_score(level: ConfidenceLevel) -> f64 {
    match level {
        ConfidenceLevel::High => 0.85,
        ConfidenceLevel::Medium => 0.65,
        ConfidenceLevel::Low => 0.35,
    }
}

fn parse_action(s: &str) -> Option<SignalAction> {
    match s {
        "OPEN_LONG" => Some(SignalAction::OpenLong),
        "OPEN_SHORT" => Some(SignalAction::OpenShort),
        "CLOSE_LONG" => Some(SignalAction::CloseLong),
        "CLOSE_SHORT" => Some(SignalAction::CloseShort),
        "HOLD" => Some(SignalAction::Hold),
        _ => None,
    }
}

fn parse_confidence(s: &str) -> Option<ConfidenceLevel> {
    match s {
        "HIGH" => Some(ConfidenceLevel::High),
        "MEDIUM" => Some(ConfidenceLevel::Medium),
        "LOW" => Some(ConfidenceLevel::Low),
        _ => None,
    }
}
