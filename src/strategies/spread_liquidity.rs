// =============================================================================
// Spread-Liquidity — liquidity events read from bid-ask spread dynamics
// =============================================================================
//
// Two detections on the spread series of each symbol:
//
//   Widening (SELL): a tight spread blows out fast while top-of-book depth
//   halves. Liquidity is being pulled.
//
//   Narrowing (BUY): a widened regime that persisted collapses back down.
//   Liquidity is returning after the dislocation resolved.
//
// The rolling buffer holds the pre-regime baseline: while a widened regime
// is active the baseline is frozen, so the spread ratio keeps measuring the
// dislocation against normal conditions rather than against itself.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::config::ResolvedParams;
use crate::market::events::DepthSnapshot;
use crate::market::MarketEvent;
use crate::signals::InternalSignal;
use crate::strategies::{level_for_score, Strategy};
use crate::types::{SignalAction, StreamKind};

/// Stop-loss fraction on spread-liquidity entries.
const STOP_LOSS_PCT: f64 = 0.005;
/// Take-profit fraction on spread-liquidity entries.
const TAKE_PROFIT_PCT: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
struct SpreadSnap {
    ts: DateTime<Utc>,
    spread_bps: f64,
    mid: f64,
    depth_top5: f64,
}

#[derive(Default)]
struct SymbolSpread {
    /// Pre-regime baseline snapshots, capped at `lookback_ticks`.
    baseline: VecDeque<SpreadSnap>,
    /// The immediately preceding snapshot, regime or not.
    prev: Option<SpreadSnap>,
    /// When the current widened regime began.
    widened_since: Option<DateTime<Utc>>,
    /// Highest spread ratio seen during the current regime.
    regime_peak_ratio: f64,
    /// Baseline average frozen at regime entry.
    frozen_avg_bps: f64,
    last_signal: Option<DateTime<Utc>>,
}

impl SymbolSpread {
    fn avg_spread_bps(&self) -> Option<f64> {
        if self.baseline.is_empty() {
            return None;
        }
        Some(self.baseline.iter().map(|s| s.spread_bps).sum::<f64>() / self.baseline.len() as f64)
    }

    fn avg_depth_top5(&self) -> Option<f64> {
        if self.baseline.is_empty() {
            return None;
        }
        Some(self.baseline.iter().map(|s| s.depth_top5).sum::<f64>() / self.baseline.len() as f64)
    }

    fn push_baseline(&mut self, snap: SpreadSnap, cap: usize) {
        self.baseline.push_back(snap);
        while self.baseline.len() > cap {
            self.baseline.pop_front();
        }
    }
}

pub struct SpreadLiquidity {
    symbols: HashMap<String, SymbolSpread>,
}

impl SpreadLiquidity {
    pub fn new() -> Self {
        Self {
            symbols: HashMap::new(),
        }
    }

    fn analyze(
        &mut self,
        snapshot: &DepthSnapshot,
        params: &ResolvedParams,
        now: DateTime<Utc>,
    ) -> Option<InternalSignal> {
        let lookback = params.i64("lookback_ticks").unwrap_or(20).max(2) as usize;
        let tight_bps = params.f64("spread_threshold_bps").unwrap_or(10.0);
        let ratio_threshold = params.f64("spread_ratio_threshold").unwrap_or(2.5);
        let velocity_threshold = params.f64("velocity_threshold").unwrap_or(0.5);
        let persistence_secs = params.i64("persistence_threshold_seconds").unwrap_or(30);
        let min_interval = params.i64("min_signal_interval_seconds").unwrap_or(60);
        let base_confidence = params.f64("base_confidence").unwrap_or(0.7);

        let best_bid = snapshot.best_bid()?.price;
        let best_ask = snapshot.best_ask()?.price;
        let mid = (best_bid + best_ask) / 2.0;
        if mid <= 0.0 {
            return None;
        }

        let spread_bps = (best_ask - best_bid) / mid * 10_000.0;
        let depth_top5: f64 = snapshot.bids.iter().take(5).map(|l| l.quantity).sum::<f64>()
            + snapshot.asks.iter().take(5).map(|l| l.quantity).sum::<f64>();

        let snap = SpreadSnap {
            ts: now,
            spread_bps,
            mid,
            depth_top5,
        };

        let strategy_name = self.name();
        let state = self.symbols.entry(snapshot.symbol.clone()).or_default();

        let prev = state.prev.replace(snap);
        let velocity = match prev {
            Some(p) if p.spread_bps > 0.0 => (spread_bps - p.spread_bps) / p.spread_bps,
            _ => 0.0,
        };

        let rate_limited = state
            .last_signal
            .is_some_and(|t| (now - t).num_seconds() < min_interval);

        let mut signal = None;

        match state.widened_since {
            // ── Inside a widened regime ─────────────────────────────────
            Some(since) => {
                let ratio_now = if state.frozen_avg_bps > 0.0 {
                    spread_bps / state.frozen_avg_bps
                } else {
                    0.0
                };
                state.regime_peak_ratio = state.regime_peak_ratio.max(ratio_now);

                let persistence = (now - since).num_seconds();

                if velocity < -velocity_threshold && persistence >= persistence_secs {
                    // Narrowing: the dislocation persisted and is resolving.
                    if !rate_limited {
                        let score = (base_confidence
                            + (state.regime_peak_ratio - ratio_threshold) * 0.05
                            + (persistence as f64 / 300.0 * 0.10).min(0.10))
                        .min(0.95);

                        let mut s = InternalSignal::new(
                            strategy_name,
                            snapshot.symbol.clone(),
                            SignalAction::OpenLong,
                            level_for_score(score),
                            mid,
                        )
                        .with_score(score)
                        .with_risk_levels(mid * (1.0 - STOP_LOSS_PCT), mid * (1.0 + TAKE_PROFIT_PCT))
                        .with_indicator("spread_bps", spread_bps)
                        .with_indicator("avg_spread_bps", state.frozen_avg_bps)
                        .with_indicator("spread_ratio", state.regime_peak_ratio)
                        .with_indicator("spread_velocity", velocity)
                        .with_indicator("persistence_seconds", persistence as f64)
                        .with_extra("liquidity_event", json!("narrowing"));
                        s.timestamp = now;

                        state.last_signal = Some(now);
                        signal = Some(s);
                    }
                    state.widened_since = None;
                    state.regime_peak_ratio = 0.0;
                    state.push_baseline(snap, lookback);
                } else if ratio_now < ratio_threshold && velocity >= -velocity_threshold {
                    // Spread drifted back without a sharp collapse: the
                    // regime dissolves silently.
                    debug!(symbol = %snapshot.symbol, "widened regime dissolved");
                    state.widened_since = None;
                    state.regime_peak_ratio = 0.0;
                    state.push_baseline(snap, lookback);
                }
            }

            // ── Normal conditions ───────────────────────────────────────
            None => {
                let avg = state.avg_spread_bps();
                let ratio = match avg {
                    Some(avg) if avg > 0.0 => spread_bps / avg,
                    _ => 0.0,
                };

                if ratio > ratio_threshold {
                    // Regime entry. Freeze the baseline before it gets
                    // polluted by regime snapshots.
                    state.frozen_avg_bps = avg.unwrap_or(0.0);
                    state.widened_since = Some(now);
                    state.regime_peak_ratio = ratio;

                    let was_tight = prev.is_some_and(|p| p.spread_bps < tight_bps);
                    let depth_gate = state
                        .avg_depth_top5()
                        .is_some_and(|mean| depth_top5 < 0.5 * mean);

                    if was_tight && velocity > velocity_threshold && depth_gate && !rate_limited {
                        let mean_depth = state.avg_depth_top5().unwrap_or(depth_top5);
                        let depth_reduction = if mean_depth > 0.0 {
                            (1.0 - depth_top5 / mean_depth).max(0.0)
                        } else {
                            0.0
                        };

                        let score = (base_confidence
                            + velocity.abs() * 0.10
                            + depth_reduction * 0.15)
                            .min(0.95);

                        let mut s = InternalSignal::new(
                            strategy_name,
                            snapshot.symbol.clone(),
                            SignalAction::OpenShort,
                            level_for_score(score),
                            mid,
                        )
                        .with_score(score)
                        .with_risk_levels(mid * (1.0 + STOP_LOSS_PCT), mid * (1.0 - TAKE_PROFIT_PCT))
                        .with_indicator("spread_bps", spread_bps)
                        .with_indicator("avg_spread_bps", state.frozen_avg_bps)
                        .with_indicator("spread_ratio", ratio)
                        .with_indicator("spread_velocity", velocity)
                        .with_indicator("depth_reduction", depth_reduction)
                        .with_extra("liquidity_event", json!("widening"));
                        s.timestamp = now;

                        state.last_signal = Some(now);
                        signal = Some(s);
                    }
                } else {
                    state.push_baseline(snap, lookback);
                }
            }
        }

        signal
    }
}

impl Default for SpreadLiquidity {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for SpreadLiquidity {
    fn name(&self) -> &'static str {
        "spread_liquidity"
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
