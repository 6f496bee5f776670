// =============================================================================
// Parameter Schemas — typed parameter definitions per strategy
// =============================================================================
//
// Every strategy registers a schema: parameter names, types, bounds, and
// compiled defaults. The ConfigManager validates every write against the
// owning schema and seeds every resolution from the schema defaults, so a
// resolved parameter map always contains every declared key.
// =============================================================================

use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// Declared type of a strategy parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Int,
    Float,
    Bool,
    String,
    Enum,
}

/// A parameter value as stored and transported. Scalar only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Parse an environment-variable string into this schema type.
    pub fn parse_as(kind: ParameterType, raw: &str) -> Option<Self> {
        match kind {
            ParameterType::Int => raw.parse::<i64>().ok().map(Self::Int),
            ParameterType::Float => raw.parse::<f64>().ok().map(Self::Float),
            ParameterType::Bool => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(Self::Bool(true)),
                "false" | "0" | "no" => Some(Self::Bool(false)),
                _ => None,
            },
            ParameterType::String | ParameterType::Enum => Some(Self::Str(raw.to_string())),
        }
    }

    fn matches(&self, kind: ParameterType) -> bool {
        matches!(
            (self, kind),
            (Self::Int(_), ParameterType::Int)
                | (Self::Float(_), ParameterType::Float)
                | (Self::Int(_), ParameterType::Float)
                | (Self::Bool(_), ParameterType::Bool)
                | (Self::Str(_), ParameterType::String)
                | (Self::Str(_), ParameterType::Enum)
        )
    }
}

/// One failed parameter check, with a message suitable for API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationError {
    pub parameter: String,
    pub message: String,
}

/// Schema for a single parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
    pub default: ParameterValue,
    pub description: String,
}

impl ParameterSchema {
    fn float(name: &str, default: f64, min: f64, max: f64, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParameterType::Float,
            min: Some(min),
            max: Some(max),
            allowed: None,
            default: ParameterValue::Float(default),
            description: description.to_string(),
        }
    }

    fn int(name: &str, default: i64, min: f64, max: f64, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParameterType::Int,
            min: Some(min),
            max: Some(max),
            allowed: None,
            default: ParameterValue::Int(default),
            description: description.to_string(),
        }
    }

    fn flag(name: &str, default: bool, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: ParameterType::Bool,
            min: None,
            max: None,
            allowed: None,
            default: ParameterValue::Bool(default),
            description: description.to_string(),
        }
    }

    fn check(&self, value: &ParameterValue) -> Result<(), String> {
        if !value.matches(self.kind) {
            return Err(format!("expected {:?} value", self.kind));
        }

        if let Some(num) = value.as_f64() {
            if let Some(min) = self.min {
                if num < min {
                    return Err(format!("{num} below minimum {min}"));
                }
            }
            if let Some(max) = self.max {
                if num > max {
                    return Err(format!("{num} above maximum {max}"));
                }
            }
        }

        if let (Some(allowed), Some(s)) = (&self.allowed, value.as_str()) {
            if !allowed.iter().any(|a| a == s) {
                return Err(format!("'{s}' not in allowed set {allowed:?}"));
            }
        }

        Ok(())
    }
}

/// Full schema for one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySchema {
    pub strategy: String,
    pub parameters: Vec<ParameterSchema>,
}

impl StrategySchema {
    /// Compiled defaults: every declared parameter at its default value.
    pub fn defaults(&self) -> HashMap<String, ParameterValue> {
        self.parameters
            .iter()
            .map(|p| (p.name.clone(), p.default.clone()))
            .collect()
    }

    /// Validate a proposed parameter map. Unknown names, type mismatches,
    /// and bound violations are all collected rather than short-circuited.
    pub fn validate(&self, parameters: &HashMap<String, ParameterValue>) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (name, value) in parameters {
            match self.parameters.iter().find(|p| &p.name == name) {
                None => errors.push(ValidationError {
                    parameter: name.clone(),
                    message: "unknown parameter".to_string(),
                }),
                Some(schema) => {
                    if let Err(message) = schema.check(value) {
                        errors.push(ValidationError {
                            parameter: name.clone(),
                            message,
                        });
                    }
                }
            }
        }

        errors.sort_by(|a, b| a.parameter.cmp(&b.parameter));
        errors
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Schemas for every registered strategy, in dispatch order.
pub fn all_schemas() -> &'static [StrategySchema] {
    static SCHEMAS: OnceLock<Vec<StrategySchema>> = OnceLock::new();
    SCHEMAS.get_or_init(build_schemas)
}

/// Look up the schema for one strategy.
pub fn schema_for(strategy: &str) -> Option<&'static StrategySchema> {
    all_schemas().iter().find(|s| s.strategy == strategy)
}

fn build_schemas() -> Vec<StrategySchema> {
    vec![
        StrategySchema {
            strategy: "orderbook_skew".to_string(),
            parameters: vec![
                ParameterSchema::flag("enabled", true, "Whether the strategy runs at all"),
                ParameterSchema::int("top_levels", 5, 1.0, 50.0, "Book levels summed per side"),
                ParameterSchema::float(
                    "buy_threshold",
                    1.2,
                    1.0,
                    100.0,
                    "Bid/ask volume ratio above which to buy",
                ),
                ParameterSchema::float(
                    "sell_threshold",
                    0.8,
                    0.0,
                    1.0,
                    "Bid/ask volume ratio below which to sell",
                ),
                ParameterSchema::float(
                    "min_spread_percent",
                    0.1,
                    0.0,
                    10.0,
                    "Suppress signals when the spread percent exceeds this",
                ),
                ParameterSchema::float("base_confidence", 0.7, 0.0, 1.0, "Confidence floor"),
            ],
        },
        StrategySchema {
            strategy: "trade_momentum".to_string(),
            parameters: vec![
                ParameterSchema::flag("enabled", true, "Whether the strategy runs at all"),
                ParameterSchema::float(
                    "buy_threshold",
                    0.3,
                    0.0,
                    1.0,
                    "Momentum score above which to buy",
                ),
                ParameterSchema::float(
                    "sell_threshold",
                    -0.3,
                    -1.0,
                    0.0,
                    "Momentum score below which to sell",
                ),
            ],
        },
        StrategySchema {
            strategy: "ticker_velocity".to_string(),
            parameters: vec![
                ParameterSchema::flag("enabled", true, "Whether the strategy runs at all"),
                ParameterSchema::int(
                    "time_window",
                    60,
                    5.0,
                    3600.0,
                    "Sliding window over ticker prices, seconds",
                ),
                ParameterSchema::float(
                    "buy_threshold",
                    0.5,
                    0.0,
                    100.0,
                    "Velocity in percent per minute above which to buy",
                ),
                ParameterSchema::float(
                    "sell_threshold",
                    -0.5,
                    -100.0,
                    0.0,
                    "Velocity in percent per minute below which to sell",
                ),
            ],
        },
        StrategySchema {
            strategy: "spread_liquidity".to_string(),
            parameters: vec![
                ParameterSchema::flag("enabled", true, "Whether the strategy runs at all"),
                ParameterSchema::int(
                    "lookback_ticks",
                    20,
                    5.0,
                    500.0,
                    "Spread snapshots retained per symbol",
                ),
                ParameterSchema::float(
                    "spread_threshold_bps",
                    10.0,
                    0.1,
                    1000.0,
                    "A spread below this counts as tight",
                ),
                ParameterSchema::float(
                    "spread_ratio_threshold",
                    2.5,
                    1.0,
                    100.0,
                    "Spread / rolling-average ratio that marks a widened regime",
                ),
                ParameterSchema::float(
                    "velocity_threshold",
                    0.5,
                    0.0,
                    100.0,
                    "Per-snapshot spread change rate that marks a fast move",
                ),
                ParameterSchema::int(
                    "persistence_threshold_seconds",
                    30,
                    1.0,
                    3600.0,
                    "How long a widened regime must persist before a narrowing buys",
                ),
                ParameterSchema::int(
                    "min_signal_interval_seconds",
                    60,
                    1.0,
                    3600.0,
                    "Per-symbol signal rate limit",
                ),
                ParameterSchema::float("base_confidence", 0.7, 0.0, 1.0, "Confidence floor"),
            ],
        },
        StrategySchema {
            strategy: "iceberg_detector".to_string(),
            parameters: vec![
                ParameterSchema::flag("enabled", true, "Whether the strategy runs at all"),
                ParameterSchema::int(
                    "track_levels",
                    10,
                    1.0,
                    50.0,
                    "Top book levels per side admitted into tracking",
                ),
                ParameterSchema::int(
                    "history_window_seconds",
                    300,
                    10.0,
                    3600.0,
                    "Per-level sample retention window",
                ),
                ParameterSchema::int(
                    "refill_speed_threshold_seconds",
                    5,
                    1.0,
                    300.0,
                    "Deplete-and-restore cycles faster than this count as refills",
                ),
                ParameterSchema::int(
                    "min_refill_count",
                    3,
                    1.0,
                    100.0,
                    "Refills required before the pattern fires",
                ),
                ParameterSchema::float(
                    "consistency_threshold",
                    0.15,
                    0.0,
                    1.0,
                    "Coefficient-of-variation bound for the consistent-size pattern",
                ),
                ParameterSchema::int(
                    "persistence_threshold_seconds",
                    180,
                    10.0,
                    3600.0,
                    "Continuous presence required for the anchor pattern",
                ),
                ParameterSchema::float(
                    "level_proximity_pct",
                    1.0,
                    0.01,
                    50.0,
                    "Maximum mid-to-level distance, percent, for a signal",
                ),
                ParameterSchema::int(
                    "max_symbols",
                    50,
                    1.0,
                    1000.0,
                    "Symbols tracked before the oldest is dropped",
                ),
                ParameterSchema::int(
                    "min_signal_interval_seconds",
                    60,
                    1.0,
                    3600.0,
                    "Per-symbol signal rate limit",
                ),
                ParameterSchema::float("base_confidence", 0.75, 0.0, 1.0, "Confidence floor"),
            ],
        },
    ]
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_covers_all_strategies() {
        let names: Vec<&str> = all_schemas().iter().map(|s| s.strategy.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "orderbook_skew",
                "trade_momentum",
                "ticker_velocity",
                "spread_liquidity",
                "iceberg_detector"
            ]
        );
        assert!(schema_for("orderbook_skew").is_some());
        assert!(schema_for("no_such_strategy").is_none());
    }

    #[test]
    fn defaults_cover_every_parameter() {
        for schema in all_schemas() {
            let defaults = schema.defaults();
            assert_eq!(defaults.len(), schema.parameters.len(), "{}", schema.strategy);
            // Every declared default passes its own validation.
            assert!(schema.validate(&defaults).is_empty(), "{}", schema.strategy);
        }
    }

    #[test]
    fn validation_flags_unknown_type_and_range() {
        let schema = schema_for("orderbook_skew").unwrap();

        let mut params = HashMap::new();
        params.insert("no_such".to_string(), ParameterValue::Float(1.0));
        params.insert("buy_threshold".to_string(), ParameterValue::Str("x".into()));
        params.insert("base_confidence".to_string(), ParameterValue::Float(2.0));

        let errors = schema.validate(&params);
        assert_eq!(errors.len(), 3);
        let params_with_errors: Vec<&str> =
            errors.iter().map(|e| e.parameter.as_str()).collect();
        assert_eq!(
            params_with_errors,
            vec!["base_confidence", "buy_threshold", "no_such"]
        );
    }

    #[test]
    fn int_accepted_where_float_expected() {
        let schema = schema_for("orderbook_skew").unwrap();
        let mut params = HashMap::new();
        params.insert("buy_threshold".to_string(), ParameterValue::Int(2));
        assert!(schema.validate(&params).is_empty());
    }

    #[test]
    fn env_parsing_honours_types() {
        assert_eq!(
            ParameterValue::parse_as(ParameterType::Float, "1.5"),
            Some(ParameterValue::Float(1.5))
        );
        assert_eq!(
            ParameterValue::parse_as(ParameterType::Int, "42"),
            Some(ParameterValue::Int(42))
        );
        assert_eq!(
            ParameterValue::parse_as(ParameterType::Bool, "true"),
            Some(ParameterValue::Bool(true))
        );
        assert_eq!(ParameterValue::parse_as(ParameterType::Int, "1.5"), None);
        assert_eq!(ParameterValue::parse_as(ParameterType::Bool, "maybe"), None);
    }

    #[test]
    fn untagged_serde_roundtrip() {
        let mut params = HashMap::new();
        params.insert("a".to_string(), ParameterValue::Float(1.5));
        params.insert("b".to_string(), ParameterValue::Int(3));
        params.insert("c".to_string(), ParameterValue::Bool(true));
        params.insert("d".to_string(), ParameterValue::Str("x".into()));

        let json = serde_json::to_string(&params).unwrap();
        let back: HashMap<String, ParameterValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(back["a"].as_f64(), Some(1.5));
        assert_eq!(back["b"].as_i64(), Some(3));
        assert_eq!(back["c"].as_bool(), Some(true));
        assert_eq!(back["d"].as_str(), Some("x"));
    }
}
