// =============================================================================
// Signal Models — internal strategy output and the wire contract
// =============================================================================
//
// Strategies emit `InternalSignal`: a categorical confidence level plus an
// optional numeric score, kept as separate fields of separate types so the
// two can never be compared. The executor-facing `TradeSignal` carries only
// the numeric confidence; `signals::adapter` owns the one mapping between
// the two representations.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    ConfidenceLevel, OrderType, SignalAction, SignalStrength, TimeInForce, WireAction,
};

// =============================================================================
// Config provenance
// =============================================================================

/// Which layer of the configuration chain produced the parameters a signal
/// was generated under. Travels on every signal for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigProvenance {
    pub source: String,
    pub version: i64,
    pub is_override: bool,
}

impl Default for ConfigProvenance {
    fn default() -> Self {
        Self {
            source: "default".to_string(),
            version: 0,
            is_override: false,
        }
    }
}

// =============================================================================
// Internal signal
// =============================================================================

/// Signal as produced by a strategy, before contract adaptation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalSignal {
    /// Strategy short name, e.g. `orderbook_skew`.
    pub strategy: String,
    /// Explicit strategy id. When absent the adapter derives
    /// `{strategy}_{symbol}`.
    pub strategy_id: Option<String>,
    pub symbol: String,
    pub action: SignalAction,
    /// Categorical confidence. Never compared against numbers.
    pub confidence: ConfidenceLevel,
    /// Numeric confidence score in [0, 1], when the strategy computes one.
    pub confidence_score: Option<f64>,
    /// Reference entry price.
    pub price: f64,
    /// Market price at generation time.
    pub current_price: f64,
    /// Absolute risk levels, when the strategy computes its own.
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub timeframe: String,
    /// Strategy-specific explainability values.
    pub indicators: HashMap<String, f64>,
    /// Free-form metadata merged into the wire signal, e.g. pattern names.
    pub extra: serde_json::Map<String, serde_json::Value>,
    /// Configuration layer the generating parameters came from.
    pub config: ConfigProvenance,
    pub timestamp: DateTime<Utc>,
}

impl InternalSignal {
    pub fn new(
        strategy: impl Into<String>,
        symbol: impl Into<String>,
        action: SignalAction,
        confidence: ConfidenceLevel,
        price: f64,
    ) -> Self {
        Self {
            strategy: strategy.into(),
            strategy_id: None,
            symbol: symbol.into(),
            action,
            confidence,
            confidence_score: None,
            price,
            current_price: price,
            stop_loss: None,
            take_profit: None,
            timeframe: "tick".to_string(),
            indicators: HashMap::new(),
            extra: serde_json::Map::new(),
            config: ConfigProvenance::default(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_score(mut self, score: f64) -> Self {
        self.confidence_score = Some(score);
        self
    }

    pub fn with_current_price(mut self, price: f64) -> Self {
        self.current_price = price;
        self
    }

    pub fn with_risk_levels(mut self, stop_loss: f64, take_profit: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self.take_profit = Some(take_profit);
        self
    }

    pub fn with_indicator(mut self, name: impl Into<String>, value: f64) -> Self {
        self.indicators.insert(name.into(), value);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

// =============================================================================
// Wire signal
// =============================================================================

/// Signal exactly as published to the executor topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: String,
    pub signal_id: String,
    pub correlation_id: String,
    pub strategy_id: String,
    pub symbol: String,
    pub signal_type: WireAction,
    pub action: WireAction,
    /// Numeric confidence in [0, 1]. Never categorical on the wire.
    pub confidence: f64,
    pub strength: SignalStrength,
    pub price: f64,
    pub quantity: f64,
    pub current_price: f64,
    pub source: String,
    pub strategy: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub timeframe: String,
    pub timestamp: DateTime<Utc>,
}

impl TradeSignal {
    /// Pre-publish validation: the executor rejects anything failing these,
    /// so the publisher refuses to send it in the first place.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.signal_id.is_empty() {
            errors.push("signal_id is empty".to_string());
        }
        if self.strategy_id.is_empty() {
            errors.push("strategy_id is empty".to_string());
        }
        if self.symbol.is_empty() {
            errors.push("symbol is empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            errors.push(format!("confidence {} outside [0, 1]", self.confidence));
        }
        if self.price <= 0.0 {
            errors.push(format!("price {} is not positive", self.price));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_populates_optionals() {
        let s = InternalSignal::new(
            "orderbook_skew",
            "BTCUSDT",
            SignalAction::OpenLong,
            ConfidenceLevel::High,
            50_000.0,
        )
        .with_score(0.82)
        .with_indicator("ratio", 1.9);

        assert_eq!(s.confidence, ConfidenceLevel::High);
        assert_eq!(s.confidence_score, Some(0.82));
        assert_eq!(s.timeframe, "tick");
        assert!((s.indicators["ratio"] - 1.9).abs() < f64::EPSILON);
        assert_eq!(s.config.source, "default");
    }

    #[test]
    fn validation_rejects_bad_signals() {
        let mut wire = TradeSignal {
            id: "x".into(),
            signal_id: "x".into(),
            correlation_id: "x".into(),
            strategy_id: "s_BTCUSDT".into(),
            symbol: "BTCUSDT".into(),
            signal_type: WireAction::Buy,
            action: WireAction::Buy,
            confidence: 0.9,
            strength: SignalStrength::Extreme,
            price: 100.0,
            quantity: 1.0,
            current_price: 100.0,
            source: "realtime-strategies".into(),
            strategy: "s".into(),
            metadata: serde_json::Map::new(),
            stop_loss: None,
            take_profit: None,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.05,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            timeframe: "tick".into(),
            timestamp: Utc::now(),
        };
        assert!(wire.validate().is_ok());

        wire.confidence = 1.5;
        wire.price = 0.0;
        let errors = wire.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn wire_signal_serialises_contract_keys() {
        let wire = TradeSignal {
            id: "a".into(),
            signal_id: "a".into(),
            correlation_id: "c".into(),
            strategy_id: "skew_BTCUSDT".into(),
            symbol: "BTCUSDT".into(),
            signal_type: WireAction::Sell,
            action: WireAction::Sell,
            confidence: 0.65,
            strength: SignalStrength::Medium,
            price: 100.0,
            quantity: 0.65,
            current_price: 100.0,
            source: "realtime-strategies".into(),
            strategy: "skew".into(),
            metadata: serde_json::Map::new(),
            stop_loss: Some(103.0),
            take_profit: Some(96.0),
            stop_loss_pct: 0.03,
            take_profit_pct: 0.04,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Gtc,
            timeframe: "tick".into(),
            timestamp: Utc::now(),
        };
        let json: serde_json::Value = serde_json::to_value(&wire).unwrap();
        for key in [
            "id",
            "signal_id",
            "strategy_id",
            "symbol",
            "signal_type",
            "action",
            "confidence",
            "strength",
            "price",
            "quantity",
            "current_price",
            "source",
            "strategy",
            "metadata",
            "stop_loss",
            "take_profit",
            "stop_loss_pct",
            "take_profit_pct",
            "order_type",
            "time_in_force",
            "timeframe",
            "timestamp",
        ] {
            assert!(json.get(key).is_some(), "missing contract key {key}");
        }
        assert_eq!(json["action"], "sell");
        assert_eq!(json["strength"], "medium");
        assert_eq!(json["time_in_force"], "GTC");
    }
}
