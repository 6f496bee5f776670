// =============================================================================
// Shared types used across the Aurora signal engine
// =============================================================================

use serde::{Deserialize, Serialize};

/// Which input stream a strategy consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Depth,
    Trade,
    Ticker,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Depth => write!(f, "depth"),
            Self::Trade => write!(f, "trade"),
            Self::Ticker => write!(f, "ticker"),
        }
    }
}

/// Direction of an internal strategy signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Hold,
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenLong => write!(f, "OPEN_LONG"),
            Self::OpenShort => write!(f, "OPEN_SHORT"),
            Self::CloseLong => write!(f, "CLOSE_LONG"),
            Self::CloseShort => write!(f, "CLOSE_SHORT"),
            Self::Hold => write!(f, "HOLD"),
        }
    }
}

/// Action on the outbound executor contract. Always lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireAction {
    Buy,
    Sell,
    Hold,
    Close,
}

impl std::fmt::Display for WireAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Hold => write!(f, "hold"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// Categorical confidence attached to internal signals.
///
/// Deliberately carries no numeric value and no ordering against floats;
/// the adapter owns the one mapping to a wire-level score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl Default for ConfidenceLevel {
    fn default() -> Self {
        Self::Medium
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// Signal strength band derived from the numeric confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalStrength {
    Weak,
    Medium,
    Strong,
    Extreme,
}

impl SignalStrength {
    /// Band a numeric confidence score into a strength label.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Extreme
        } else if score >= 0.7 {
            Self::Strong
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Weak
        }
    }
}

impl std::fmt::Display for SignalStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Weak => write!(f, "weak"),
            Self::Medium => write!(f, "medium"),
            Self::Strong => write!(f, "strong"),
            Self::Extreme => write!(f, "extreme"),
        }
    }
}

/// Order type on the executor contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
}

impl Default for OrderType {
    fn default() -> Self {
        Self::Market
    }
}

/// Time-in-force on the executor contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TimeInForce {
    Gtc,
    Ioc,
    Fok,
}

impl Default for TimeInForce {
    fn default() -> Self {
        Self::Gtc
    }
}
