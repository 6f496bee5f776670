// =============================================================================
// Iceberg Detector — hidden size read from per-level quantity histories
// =============================================================================
//
// Tracks the top book levels of each symbol as (timestamp, quantity)
// histories and looks for three signatures of hidden orders:
//
//   refill           the level depletes and restores quickly, repeatedly
//   consistent_size  the displayed quantity barely varies across samples
//   anchor           the level sits in the book continuously for minutes
//
// A detected level near the mid acts as support (bid side, buy) or
// resistance (ask side, sell). Histories are pruned by age; the symbol map
// is capped, dropping the stalest symbol when full.
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

/// Hard cap on levels tracked per symbol, regardless of churn.
const MAX_TRACKED_LEVELS: usize = 100;

struct LevelHistory {
    price: f64,
    is_bid: bool,
    samples: VecDeque<(DateTime<Utc>, f64)>,
    /// Set while the level has been present in every snapshot since.
    continuous_since: Option<DateTime<Utc>>,
    refill_count: u32,
}

struct SymbolLevels {
    levels: HashMap<u64, LevelHistory>,
    last_signal: Option<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Refill,
    ConsistentSize,
    Anchor,
}

impl Pattern {
    fn label(self) -> &'static str {
        match self {
            Self::Refill => "refill",
            Self::ConsistentSize => "consistent_size",
            Self::Anchor => "anchor",
        }
    }
}

struct Candidate {
    price: f64,
    is_bid: bool,
    pattern: Pattern,
    confidence: f64,
    refill_count: u32,
    persistence_seconds: f64,
    cv: f64,
}

pub struct IcebergDetector {
    symbols: HashMap<String, SymbolLevels>,
}

impl IcebergDetector {
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
        let track_levels = params.i64("track_levels").unwrap_or(10).max(1) as usize;
        let window_secs = params.i64("history_window_seconds").unwrap_or(300).max(1);
        let refill_speed_secs = params.i64("refill_speed_threshold_seconds").unwrap_or(5);
        let min_refills = params.i64("min_refill_count").unwrap_or(3).max(1) as u32;
        let consistency_threshold = params.f64("consistency_threshold").unwrap_or(0.15);
        let persistence_secs = params.i64("persistence_threshold_seconds").unwrap_or(180);
        let proximity_pct = params.f64("level_proximity_pct").unwrap_or(1.0);
        let max_symbols = params.i64("max_symbols").unwrap_or(50).max(1) as usize;
        let min_interval = params.i64("min_signal_interval_seconds").unwrap_or(60);
        let base_confidence = params.f64("base_confidence").unwrap_or(0.75);

        let mid = snapshot.mid_price()?;
        if mid <= 0.0 {
            return None;
        }

        self.admit_symbol(&snapshot.symbol, max_symbols, now);
        let state = self.symbols.get_mut(&snapshot.symbol)?;
        state.last_seen = now;

        // ── Fold the current top-N levels into the histories ────────────
        let mut present: HashMap<u64, (f64, f64, bool)> = HashMap::new();
        for level in snapshot.bids.iter().take(track_levels) {
            present.insert(level.price.to_bits(), (level.price, level.quantity, true));
        }
        for level in snapshot.asks.iter().take(track_levels) {
            present.insert(level.price.to_bits(), (level.price, level.quantity, false));
        }

        for (key, (price, quantity, is_bid)) in &present {
            let history = state.levels.entry(*key).or_insert_with(|| LevelHistory {
                price: *price,
                is_bid: *is_bid,
                samples: VecDeque::new(),
                continuous_since: None,
                refill_count: 0,
            });

            history.is_bid = *is_bid;
            history.samples.push_back((now, *quantity));
            if history.continuous_since.is_none() {
                history.continuous_since = Some(now);
            }

            // Deplete-and-restore cycle over the last three samples.
            let n = history.samples.len();
            if n >= 3 {
                let (_, v0) = history.samples[n - 3];
                let (t1, v1) = history.samples[n - 2];
                let (t2, v2) = history.samples[n - 1];
                let restored_fast = (t2 - t1).num_seconds() < refill_speed_secs;
                if v1 < 0.5 * v0 && v2 > 0.8 * v0 && restored_fast {
                    history.refill_count += 1;
                    debug!(
                        symbol = %snapshot.symbol,
                        price = history.price,
                        refills = history.refill_count,
                        "refill cycle observed"
                    );
                }
            }
        }

        // ── Prune: ages, absences, caps ─────────────────────────────────
        let cutoff = now - chrono::Duration::seconds(window_secs);
        state.levels.retain(|key, history| {
            if !present.contains_key(key) {
                // Presence gap breaks the anchoring clock.
                history.continuous_since = None;
            }
            while history.samples.front().is_some_and(|(ts, _)| *ts < cutoff) {
                history.samples.pop_front();
            }
            !history.samples.is_empty()
        });

        if state.levels.len() > MAX_TRACKED_LEVELS {
            let mut stalest: Vec<(u64, DateTime<Utc>)> = state
                .levels
                .iter()
                .map(|(k, h)| (*k, h.samples.back().map(|(ts, _)| *ts).unwrap_or(now)))
                .collect();
            stalest.sort_by_key(|(_, ts)| *ts);
            for (key, _) in stalest
                .iter()
                .take(state.levels.len() - MAX_TRACKED_LEVELS)
            {
                state.levels.remove(key);
            }
        }

        // ── Detection ───────────────────────────────────────────────────
        let rate_limited = state
            .last_signal
            .is_some_and(|t| (now - t).num_seconds() < min_interval);
        if rate_limited {
            return None;
        }

        let mut best: Option<Candidate> = None;
        for history in state.levels.values() {
            // Only levels near the mid are actionable support/resistance.
            let distance_pct = (mid - history.price).abs() / mid * 100.0;
            if distance_pct > proximity_pct {
                continue;
            }

            let candidate = detect_pattern(
                history,
                now,
                min_refills,
                consistency_threshold,
                persistence_secs,
                base_confidence,
            );

            if let Some(candidate) = candidate {
                let better = best
                    .as_ref()
                    .map_or(true, |b| candidate.confidence > b.confidence);
                if better {
                    best = Some(candidate);
                }
            }
        }

        let found = best?;

        let action = if found.is_bid {
            SignalAction::OpenLong
        } else {
            SignalAction::OpenShort
        };

        // ATR proxy from the mid-to-level distance.
        let atr = (mid - found.price).abs().max(mid * 0.005);
        let (stop_loss, take_profit) = if found.is_bid {
            (found.price - atr, mid + 2.5 * atr)
        } else {
            (found.price + atr, mid - 2.5 * atr)
        };

        state.last_signal = Some(now);

        let mut signal = InternalSignal::new(
            self.name(),
            snapshot.symbol.clone(),
            action,
            level_for_score(found.confidence),
            mid,
        )
        .with_score(found.confidence)
        .with_risk_levels(stop_loss, take_profit)
        .with_indicator("level_price", found.price)
        .with_indicator("refill_count", found.refill_count as f64)
        .with_indicator("persistence_seconds", found.persistence_seconds)
        .with_indicator("quantity_cv", found.cv)
        .with_extra("pattern", json!(found.pattern.label()));
        signal.timestamp = now;

        Some(signal)
    }

    /// Ensure the symbol is tracked, evicting the stalest symbol when the
    /// cap is reached.
    fn admit_symbol(&mut self, symbol: &str, max_symbols: usize, now: DateTime<Utc>) {
        if self.symbols.contains_key(symbol) {
            return;
        }
        while self.symbols.len() >= max_symbols {
            let stalest = self
                .symbols
                .iter()
                .min_by_key(|(_, s)| s.last_seen)
                .map(|(name, _)| name.clone());
            match stalest {
                Some(name) => {
                    debug!(symbol = %name, "iceberg tracker evicting stalest symbol");
                    self.symbols.remove(&name);
                }
                None => break,
            }
        }
        self.symbols.insert(
            symbol.to_string(),
            SymbolLevels {
                levels: HashMap::new(),
                last_signal: None,
                last_seen: now,
            },
        );
    }
}

fn detect_pattern(
    history: &LevelHistory,
    now: DateTime<Utc>,
    min_refills: u32,
    consistency_threshold: f64,
    persistence_secs: i64,
    base_confidence: f64,
) -> Option<Candidate> {
    let persistence = history
        .continuous_since
        .map(|since| (now - since).num_seconds() as f64)
        .unwrap_or(0.0);

    let (mean, cv) = quantity_cv(&history.samples);

    let mut candidates: Vec<(Pattern, f64)> = Vec::new();

    if history.refill_count >= min_refills {
        let confidence =
            (0.65 + (history.refill_count as f64 - 3.0) * 0.05).min(0.85);
        candidates.push((Pattern::Refill, confidence));
    }

    if history.samples.len() >= min_refills as usize && mean > 0.0 && cv < consistency_threshold {
        candidates.push((Pattern::ConsistentSize, base_confidence * (1.0 - cv)));
    }

    if persistence >= persistence_secs as f64 {
        let confidence = (0.75 + persistence / 600.0 * 0.10).min(0.85);
        candidates.push((Pattern::Anchor, confidence));
    }

    let (pattern, confidence) = candidates
        .into_iter()
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

    Some(Candidate {
        price: history.price,
        is_bid: history.is_bid,
        pattern,
        confidence,
        refill_count: history.refill_count,
        persistence_seconds: persistence,
        cv,
    })
}

/// Population coefficient of variation of the sampled quantities.
fn quantity_cv(samples: &VecDeque<(DateTime<Utc>, f64)>) -> (f64, f64) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|(_, q)| q).sum::<f64>() / n;
    if mean <= 0.0 {
        return (mean, 0.0);
    }
    let variance = samples
        .iter()
        .map(|(_, q)| (q - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean, variance.sqrt() / mean)
}

impl Default for IcebergDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for IcebergDetector {
    fn name(&self) -> &'static str {
        "iceberg_detector"
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
    use chrono::Duration;
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    /// Book with a tracked bid level at 0.5 whose quantity is driven by the
    /// test; the flanking levels wobble so only 0.5 can look consistent.
    fn snapshot(level_qty: f64, wobble: f64) -> DepthSnapshot {
        DepthSnapshot {
            symbol: "XRPUSDT".to_string(),
            last_update_id: 1,
            bids: vec![
                PriceLevel {
                    price: 0.5001,
                    quantity: 5.0 + wobble,
                },
                PriceLevel {
                    price: 0.5,
                    quantity: level_qty,
                },
            ],
            asks: vec![PriceLevel {
                price: 0.5003,
                quantity: 4.0 - wobble,
            }],
            event_time: Utc::now(),
        }
    }

    async fn default_params() -> ResolvedParams {
        let mgr = ConfigManager::new(
            Arc::new(MemoryConfigStore::new()),
            StdDuration::from_secs(60),
            StdDuration::from_secs(5),
        );
        mgr.get("iceberg_detector", Some("XRPUSDT")).await
    }

    #[tokio::test]
    async fn repeated_refills_fire_a_buy_at_the_bid_level() {
        // S5: level 0.5 cycles 2.0 -> depleted -> 2.0 three times, each
        // restoration inside the 5s speed threshold. mid = 0.5002.
        let params = default_params().await;
        let mut detector = IcebergDetector::new();
        let t0 = Utc::now();

        let sequence: &[(i64, f64)] = &[
            (0, 2.0),
            (5, 0.2),
            (8, 2.0),
            (15, 0.3),
            (18, 2.0),
            (25, 0.1),
        ];
        for (i, &(offset, qty)) in sequence.iter().enumerate() {
            // Flank quantities alternate hard so only 0.5 can look steady.
            let wobble = if i % 2 == 0 { 2.0 } else { -2.0 };
            let out = detector.evaluate(
                &MarketEvent::Depth(snapshot(qty, wobble)),
                &params,
                t0 + Duration::seconds(offset),
            );
            assert!(out.is_none(), "no signal before the third refill");
        }

        let signal = detector
            .evaluate(
                &MarketEvent::Depth(snapshot(2.0, 0.5)),
                &params,
                t0 + Duration::seconds(28),
            )
            .unwrap();

        assert_eq!(signal.action, SignalAction::OpenLong);
        assert_eq!(signal.extra["pattern"], "refill");
        assert!((signal.indicators["refill_count"] - 3.0).abs() < f64::EPSILON);
        // min(0.85, 0.65 + 0*0.05) = 0.65.
        assert!((signal.confidence_score.unwrap() - 0.65).abs() < 1e-9);

        // ATR proxy: max(|0.5002 - 0.5|, 0.5002 * 0.005) = 0.002501.
        let atr = 0.5002_f64 * 0.005;
        assert!((signal.stop_loss.unwrap() - (0.5 - atr)).abs() < 1e-9);
        assert!((signal.take_profit.unwrap() - (0.5002 + 2.5 * atr)).abs() < 1e-9);
        assert!((signal.take_profit.unwrap() - 0.506).abs() < 1e-3);
    }

    #[tokio::test]
    async fn consistent_size_fires_when_cv_is_tight() {
        let params = default_params().await;
        let mut detector = IcebergDetector::new();
        let t0 = Utc::now();

        // Level 0.5 shows a near-constant 2.0 while flanks wobble hard.
        let mut signal = None;
        for i in 0..4 {
            let qty = 2.0 + 0.01 * (i % 2) as f64;
            let wobble = if i % 2 == 0 { 2.0 } else { -2.0 };
            if let Some(s) = detector.evaluate(
                &MarketEvent::Depth(snapshot(qty, wobble)),
                &params,
                t0 + Duration::seconds(i),
            ) {
                signal = Some(s);
                break;
            }
        }

        let signal = signal.unwrap();
        assert_eq!(signal.extra["pattern"], "consistent_size");
        assert_eq!(signal.action, SignalAction::OpenLong);
        // confidence = base * (1 - cv), cv tiny.
        let cv = signal.indicators["quantity_cv"];
        assert!(cv < 0.15);
        assert!((signal.confidence_score.unwrap() - 0.75 * (1.0 - cv)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ask_side_level_fires_sell_with_inverted_risk() {
        let params = default_params().await;
        let mut detector = IcebergDetector::new();
        let t0 = Utc::now();

        // Constant ask level at 0.5003 while everything else wobbles.
        let make = |bid_wobble: f64| DepthSnapshot {
            symbol: "XRPUSDT".to_string(),
            last_update_id: 1,
            bids: vec![PriceLevel {
                price: 0.5001,
                quantity: 5.0 + bid_wobble,
            }],
            asks: vec![PriceLevel {
                price: 0.5003,
                quantity: 3.0,
            }],
            event_time: Utc::now(),
        };

        let mut signal = None;
        for i in 0..4 {
            let wobble = if i % 2 == 0 { 2.0 } else { -2.0 };
            if let Some(s) = detector.evaluate(
                &MarketEvent::Depth(make(wobble)),
                &params,
                t0 + Duration::seconds(i),
            ) {
                signal = Some(s);
                break;
            }
        }

        let signal = signal.unwrap();
        assert_eq!(signal.action, SignalAction::OpenShort);
        let mid = signal.price;
        assert!(signal.stop_loss.unwrap() > 0.5003);
        assert!(signal.take_profit.unwrap() < mid);
    }

    #[tokio::test]
    async fn signals_are_rate_limited() {
        let params = default_params().await;
        let mut detector = IcebergDetector::new();
        let t0 = Utc::now();

        let mut fired = 0;
        for i in 0..30 {
            let qty = 2.0 + 0.01 * (i % 2) as f64;
            let wobble = if i % 2 == 0 { 2.0 } else { -2.0 };
            if detector
                .evaluate(
                    &MarketEvent::Depth(snapshot(qty, wobble)),
                    &params,
                    t0 + Duration::seconds(i),
                )
                .is_some()
            {
                fired += 1;
            }
        }
        // 30 seconds of qualifying snapshots inside a 60s rate limit.
        assert_eq!(fired, 1);
    }

    #[tokio::test]
    async fn history_window_prunes_old_samples() {
        let params = default_params().await;
        let mut detector = IcebergDetector::new();
        let t0 = Utc::now();

        detector.evaluate(&MarketEvent::Depth(snapshot(2.0, 1.0)), &params, t0);
        // 400s later the first samples are outside the 300s window.
        detector.evaluate(
            &MarketEvent::Depth(snapshot(2.0, -1.0)),
            &params,
            t0 + Duration::seconds(400),
        );

        let state = &detector.symbols["XRPUSDT"];
        for history in state.levels.values() {
            assert_eq!(history.samples.len(), 1);
        }
    }

    #[tokio::test]
    async fn symbol_cap_evicts_stalest() {
        let params = default_params().await;
        let mut detector = IcebergDetector::new();
        let t0 = Utc::now();

        // Cap is 50 by default; admit 55 distinct symbols.
        for i in 0..55 {
            let mut snap = snapshot(2.0, 0.0);
            snap.symbol = format!("SYM{i}USDT");
            detector.evaluate(
                &MarketEvent::Depth(snap),
                &params,
                t0 + Duration::seconds(i),
            );
        }

        assert_eq!(detector.symbols.len(), 50);
        assert!(!detector.symbols.contains_key("SYM0USDT"));
        assert!(detector.symbols.contains_key("SYM54USDT"));
    }

    #[tokio::test]
    async fn distant_levels_are_ignored() {
        let params = default_params().await;
        let mut detector = IcebergDetector::new();
        let t0 = Utc::now();

        // A rock-steady level 5% below the mid: outside the 1% proximity.
        let make = || DepthSnapshot {
            symbol: "XRPUSDT".to_string(),
            last_update_id: 1,
            bids: vec![
                PriceLevel {
                    price: 0.5001,
                    quantity: 5.0,
                },
                PriceLevel {
                    price: 0.475,
                    quantity: 2.0,
                },
            ],
            asks: vec![PriceLevel {
                price: 0.5003,
                quantity: 4.0,
            }],
            event_time: Utc::now(),
        };

        // The 0.5001/0.5003 levels hold constant too, so suppress them by
        // alternating their quantities is not possible here; instead rely on
        // proximity for 0.475 and assert that any signal is NOT at 0.475.
        for i in 0..4 {
            if let Some(signal) = detector.evaluate(
                &MarketEvent::Depth(make()),
                &params,
                t0 + Duration::seconds(i),
            ) {
                assert!((signal.indicators["level_price"] - 0.475).abs() > 1e-9);
            }
        }
    }
}
