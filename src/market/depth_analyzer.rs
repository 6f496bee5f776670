// =============================================================================
// Depth Analyzer — per-symbol real-time microstructure metrics
// =============================================================================
//
// Runs on every depth snapshot, in the same dispatch pass as the depth
// strategies. Computes the full metrics block (imbalance, pressure,
// liquidity, spread, VWAP) and maintains a rolling net-pressure history per
// symbol: a ring of at most 900 samples, roughly 15 minutes at the 100ms
// snapshot cadence.
//
// Symbols idle for more than the TTL are dropped by the periodic sweep so
// the map stays bounded by the live universe.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::market::events::DepthSnapshot;

/// Maximum net-pressure samples retained per symbol (~15 min at 100ms).
const PRESSURE_RING_CAP: usize = 900;
/// A symbol unseen for this long is evicted by the sweep.
const SYMBOL_TTL_SECONDS: i64 = 300;
/// Trend classification looks at this many most-recent samples.
const TREND_SAMPLES: usize = 10;

// =============================================================================
// Public types
// =============================================================================

/// Full metrics block computed from one depth snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthMetrics {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub last_update_id: u64,

    pub best_bid: f64,
    pub best_ask: f64,
    pub mid_price: f64,
    pub spread: f64,
    pub spread_bps: f64,

    pub bid_volume: f64,
    pub ask_volume: f64,
    /// (bid - ask) / total, in [-1, 1].
    pub imbalance_ratio: f64,
    /// bid share of total volume, percent.
    pub buy_pressure: f64,
    /// ask share of total volume, percent.
    pub sell_pressure: f64,
    /// buy_pressure - sell_pressure, in [-100, 100].
    pub net_pressure: f64,

    pub bid_depth_top5: f64,
    pub ask_depth_top5: f64,
    pub bid_depth_top10: f64,
    pub ask_depth_top10: f64,

    pub vwap_bid: f64,
    pub vwap_ask: f64,

    /// (price, quantity) of the largest bid level.
    pub strongest_bid_level: (f64, f64),
    /// (price, quantity) of the largest ask level.
    pub strongest_ask_level: (f64, f64),
}

/// One retained net-pressure observation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PressureSample {
    pub timestamp: DateTime<Utc>,
    pub net_pressure: f64,
}

/// Query window for the pressure history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureWindow {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
}

impl PressureWindow {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1m" => Some(Self::OneMinute),
            "5m" => Some(Self::FiveMinutes),
            "15m" => Some(Self::FifteenMinutes),
            _ => None,
        }
    }

    fn duration(self) -> Duration {
        match self {
            Self::OneMinute => Duration::seconds(60),
            Self::FiveMinutes => Duration::seconds(300),
            Self::FifteenMinutes => Duration::seconds(900),
        }
    }
}

impl std::fmt::Display for PressureWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OneMinute => write!(f, "1m"),
            Self::FiveMinutes => write!(f, "5m"),
            Self::FifteenMinutes => write!(f, "15m"),
        }
    }
}

/// Pressure history slice for one symbol and window.
#[derive(Debug, Clone, Serialize)]
pub struct PressureHistory {
    pub symbol: String,
    pub timeframe: String,
    pub samples: Vec<PressureSample>,
    pub avg_net_pressure: f64,
    pub trend: String,
    pub trend_strength: f64,
}

/// Aggregate view across all tracked symbols.
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzerSummary {
    pub symbols_tracked: usize,
    pub bullish: usize,
    pub bearish: usize,
    pub neutral: usize,
    pub symbols: Vec<SymbolTrend>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolTrend {
    pub symbol: String,
    pub net_pressure: f64,
    pub trend: String,
    pub trend_strength: f64,
}

// =============================================================================
// Analyzer
// =============================================================================

struct SymbolState {
    metrics: DepthMetrics,
    pressure: VecDeque<PressureSample>,
    last_seen: DateTime<Utc>,
}

/// Per-symbol metrics store with bounded pressure history and TTL eviction.
pub struct DepthAnalyzer {
    symbols: RwLock<HashMap<String, SymbolState>>,
}

impl DepthAnalyzer {
    pub fn new() -> Self {
        Self {
            symbols: RwLock::new(HashMap::new()),
        }
    }

    /// Compute metrics for a snapshot and fold them into the per-symbol state.
    pub fn update(&self, snapshot: &DepthSnapshot) -> DepthMetrics {
        self.update_at(snapshot, Utc::now())
    }

    /// Clock-injected variant of [`update`](Self::update).
    pub fn update_at(&self, snapshot: &DepthSnapshot, now: DateTime<Utc>) -> DepthMetrics {
        let metrics = compute_metrics(snapshot, now);

        let mut symbols = self.symbols.write();
        let state = symbols
            .entry(snapshot.symbol.clone())
            .or_insert_with(|| SymbolState {
                metrics: metrics.clone(),
                pressure: VecDeque::with_capacity(PRESSURE_RING_CAP),
                last_seen: now,
            });

        state.pressure.push_back(PressureSample {
            timestamp: now,
            net_pressure: metrics.net_pressure,
        });
        while state.pressure.len() > PRESSURE_RING_CAP {
            state.pressure.pop_front();
        }

        state.metrics = metrics.clone();
        state.last_seen = now;

        metrics
    }

    /// Latest metrics for a symbol.
    pub fn current(&self, symbol: &str) -> Option<DepthMetrics> {
        self.symbols.read().get(symbol).map(|s| s.metrics.clone())
    }

    /// Net-pressure history for a symbol over the requested window.
    pub fn pressure_history(
        &self,
        symbol: &str,
        window: PressureWindow,
    ) -> Option<PressureHistory> {
        self.pressure_history_at(symbol, window, Utc::now())
    }

    pub fn pressure_history_at(
        &self,
        symbol: &str,
        window: PressureWindow,
        now: DateTime<Utc>,
    ) -> Option<PressureHistory> {
        let symbols = self.symbols.read();
        let state = symbols.get(symbol)?;

        let cutoff = now - window.duration();
        let samples: Vec<PressureSample> = state
            .pressure
            .iter()
            .filter(|s| s.timestamp >= cutoff)
            .copied()
            .collect();

        let avg = if samples.is_empty() {
            0.0
        } else {
            samples.iter().map(|s| s.net_pressure).sum::<f64>() / samples.len() as f64
        };

        let (trend, strength) = classify_trend(&state.pressure);

        Some(PressureHistory {
            symbol: symbol.to_string(),
            timeframe: window.to_string(),
            samples,
            avg_net_pressure: avg,
            trend,
            trend_strength: strength,
        })
    }

    /// Latest metrics for every tracked symbol.
    pub fn all(&self) -> Vec<DepthMetrics> {
        self.symbols
            .read()
            .values()
            .map(|s| s.metrics.clone())
            .collect()
    }

    /// Aggregate trend view across all tracked symbols.
    pub fn summary(&self) -> AnalyzerSummary {
        let symbols = self.symbols.read();

        let mut per_symbol = Vec::with_capacity(symbols.len());
        let (mut bullish, mut bearish, mut neutral) = (0usize, 0usize, 0usize);

        for (symbol, state) in symbols.iter() {
            let (trend, strength) = classify_trend(&state.pressure);
            match trend.as_str() {
                "bullish" => bullish += 1,
                "bearish" => bearish += 1,
                _ => neutral += 1,
            }
            per_symbol.push(SymbolTrend {
                symbol: symbol.clone(),
                net_pressure: state.metrics.net_pressure,
                trend,
                trend_strength: strength,
            });
        }

        per_symbol.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        AnalyzerSummary {
            symbols_tracked: symbols.len(),
            bullish,
            bearish,
            neutral,
            symbols: per_symbol,
        }
    }

    /// Drop symbols idle longer than the TTL. Called by a periodic timer.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::seconds(SYMBOL_TTL_SECONDS);
        let mut symbols = self.symbols.write();
        let before = symbols.len();
        symbols.retain(|_, s| s.last_seen >= cutoff);
        let evicted = before - symbols.len();
        if evicted > 0 {
            debug!(evicted, remaining = symbols.len(), "depth analyzer sweep");
        }
        evicted
    }

    /// Number of symbols currently tracked.
    pub fn tracked_symbols(&self) -> usize {
        self.symbols.read().len()
    }
}

impl Default for DepthAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Metric computation
// =============================================================================

fn compute_metrics(snapshot: &DepthSnapshot, now: DateTime<Utc>) -> DepthMetrics {
    let best_bid = snapshot.best_bid().map(|l| l.price).unwrap_or(0.0);
    let best_ask = snapshot.best_ask().map(|l| l.price).unwrap_or(0.0);
    let mid = (best_bid + best_ask) / 2.0;

    let spread = best_ask - best_bid;
    let spread_bps = if mid > 0.0 { (spread / mid) * 10_000.0 } else { 0.0 };

    let bid_volume: f64 = snapshot.bids.iter().map(|l| l.quantity).sum();
    let ask_volume: f64 = snapshot.asks.iter().map(|l| l.quantity).sum();
    let total = bid_volume + ask_volume;

    let imbalance_ratio = if total > 0.0 {
        (bid_volume - ask_volume) / total
    } else {
        0.0
    };
    let buy_pressure = if total > 0.0 { bid_volume / total * 100.0 } else { 0.0 };
    let sell_pressure = if total > 0.0 { ask_volume / total * 100.0 } else { 0.0 };

    let top = |levels: &[crate::market::events::PriceLevel], n: usize| -> f64 {
        levels.iter().take(n).map(|l| l.quantity).sum()
    };

    let vwap = |levels: &[crate::market::events::PriceLevel]| -> f64 {
        let qty: f64 = levels.iter().map(|l| l.quantity).sum();
        if qty > 0.0 {
            levels.iter().map(|l| l.price * l.quantity).sum::<f64>() / qty
        } else {
            0.0
        }
    };

    let strongest = |levels: &[crate::market::events::PriceLevel]| -> (f64, f64) {
        levels
            .iter()
            .max_by(|a, b| a.quantity.partial_cmp(&b.quantity).unwrap_or(std::cmp::Ordering::Equal))
            .map(|l| (l.price, l.quantity))
            .unwrap_or((0.0, 0.0))
    };

    DepthMetrics {
        symbol: snapshot.symbol.clone(),
        timestamp: now,
        last_update_id: snapshot.last_update_id,
        best_bid,
        best_ask,
        mid_price: mid,
        spread,
        spread_bps,
        bid_volume,
        ask_volume,
        imbalance_ratio,
        buy_pressure,
        sell_pressure,
        net_pressure: buy_pressure - sell_pressure,
        bid_depth_top5: top(&snapshot.bids, 5),
        ask_depth_top5: top(&snapshot.asks, 5),
        bid_depth_top10: top(&snapshot.bids, 10),
        ask_depth_top10: top(&snapshot.asks, 10),
        vwap_bid: vwap(&snapshot.bids),
        vwap_ask: vwap(&snapshot.asks),
        strongest_bid_level: strongest(&snapshot.bids),
        strongest_ask_level: strongest(&snapshot.asks),
    }
}

/// Classify the trend over the most recent samples.
///
/// bullish above +20 mean net pressure, bearish below -20, else neutral;
/// strength scales the magnitude against 50 and saturates at 1.
fn classify_trend(pressure: &VecDeque<PressureSample>) -> (String, f64) {
    let n = pressure.len().min(TREND_SAMPLES);
    if n == 0 {
        return ("neutral".to_string(), 0.0);
    }

    let mean: f64 = pressure
        .iter()
        .rev()
        .take(n)
        .map(|s| s.net_pressure)
        .sum::<f64>()
        / n as f64;

    let trend = if mean > 20.0 {
        "bullish"
    } else if mean < -20.0 {
        "bearish"
    } else {
        "neutral"
    };

    (trend.to_string(), (mean.abs() / 50.0).min(1.0))
}
