// =============================================================================
// Ticker Velocity — price change rate over a sliding time window
// =============================================================================
//
// Keeps a per-symbol ring of (timestamp, price) observations bounded by the
// configured time window, not by count. Velocity is the percent change
// between the oldest and newest retained prices, normalised to percent per
// minute.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};

use crate::config::ResolvedParams;
use crate::market::events::TickerUpdate;
use crate::market::MarketEvent;
use crate::signals::InternalSignal;
use crate::strategies::{level_for_score, Strategy};
use crate::types::{SignalAction, StreamKind};

pub struct TickerVelocity {
    history: HashMap<String, VecDeque<(DateTime<Utc>, f64)>>,
}

impl TickerVelocity {
    pub fn new() -> Self {
        Self {
            history: HashMap::new(),
        }
    }

    fn analyze(
        &mut self,
        ticker: &TickerUpdate,
        params: &ResolvedParams,
        now: DateTime<Utc>,
    ) -> Option<InternalSignal> {
        let window_secs = params.i64("time_window").unwrap_or(60).max(1);
        let buy_threshold = params.f64("buy_threshold").unwrap_or(0.5);
        let sell_threshold = params.f64("sell_threshold").unwrap_or(-0.5);

        let strategy_name = self.name();
        let ring = self.history.entry(ticker.symbol.clone()).or_default();

        ring.push_back((now, ticker.last_price));
        let cutoff = now - Duration::seconds(window_secs);
        while ring.front().is_some_and(|(ts, _)| *ts < cutoff) {
            ring.pop_front();
        }

        if ring.len() < 2 {
            return None;
        }

        let (oldest_ts, oldest_price) = *ring.front()?;
        let (_, latest_price) = *ring.back()?;

        let elapsed_minutes = (now - oldest_ts).num_milliseconds() as f64 / 60_000.0;
        if elapsed_minutes <= 0.0 || oldest_price <= 0.0 {
            return None;
        }

        let change_percent = (latest_price - oldest_price) / oldest_price * 100.0;
        let velocity = change_percent / elapsed_minutes;

        let action = if velocity > buy_threshold {
            SignalAction::OpenLong
        } else if velocity < sell_threshold {
            SignalAction::OpenShort
        } else {
            return None;
        };

        let score = (0.6 + velocity.abs() / 10.0).min(0.95);

        let mut signal = InternalSignal::new(
            strategy_name,
            ticker.symbol.clone(),
            action,
            level_for_score(score),
            latest_price,
        )
        .with_score(score)
        .with_indicator("velocity", velocity)
        .with_indicator("change_percent", change_percent)
        .with_indicator("elapsed_minutes", elapsed_minutes)
        .with_indicator("window_samples", ring.len() as f64);
        signal.timestamp = now;

        Some(signal)
    }
}

impl Default for TickerVelocity {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for TickerVelocity {
    fn name(&self) -> &'static str {
        "ticker_velocity"
    }

    fn stream_kind(&self) -> StreamKind {
        StreamKind::Ticker
    }

    fn evaluate(
        &mut self,
        event: &MarketEvent,
        params: &ResolvedParams,
        now: DateTime<Utc>,
    ) -> Option<InternalSignal> {
        match event {
            MarketEvent::Ticker(ticker) => self.analyze(ticker, params, now),
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
    use std::sync::Arc;
    use std::time::Duration as StdDuration;

    fn ticker(price: f64) -> MarketEvent {
        MarketEvent::Ticker(TickerUpdate {
            symbol: "ETHUSDT".to_string(),
            last_price: price,
            volume_24h: None,
            price_change_pct: None,
            event_time: Utc::now(),
        })
    }

    async fn default_params() -> ResolvedParams {
        let mgr = ConfigManager::new(
            Arc::new(MemoryConfigStore::new()),
            StdDuration::from_secs(60),
            StdDuration::from_secs(5),
        );
        mgr.get("ticker_velocity", Some("ETHUSDT")).await
    }

    #[tokio::test]
    async fn slow_drift_stays_silent_fast_move_buys() {
        // S3: 3000 -> 3003 -> 3006 over 60s is 0.2%/min, below the 0.5
        // threshold. Replacing the last print with 3020 gives 0.667%/min.
        let params = default_params().await;
        let t0 = Utc::now();

        let mut strategy = TickerVelocity::new();
        assert!(strategy.evaluate(&ticker(3000.0), &params, t0).is_none());
        assert!(strategy
            .evaluate(&ticker(3003.0), &params, t0 + Duration::seconds(30))
            .is_none());
        assert!(strategy
            .evaluate(&ticker(3006.0), &params, t0 + Duration::seconds(60))
            .is_none());

        let mut strategy = TickerVelocity::new();
        strategy.evaluate(&ticker(3000.0), &params, t0);
        strategy.evaluate(&ticker(3003.0), &params, t0 + Duration::seconds(30));
        let signal = strategy
            .evaluate(&ticker(3020.0), &params, t0 + Duration::seconds(60))
            .unwrap();

        assert_eq!(signal.action, SignalAction::OpenLong);
        let velocity = signal.indicators["velocity"];
        assert!((velocity - 20.0 / 3000.0 * 100.0).abs() < 1e-9);
        let expected_score = 0.6 + velocity / 10.0;
        assert!((signal.confidence_score.unwrap() - expected_score).abs() < 1e-9);
        assert!((signal.price - 3020.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn falling_price_sells() {
        let params = default_params().await;
        let t0 = Utc::now();
        let mut strategy = TickerVelocity::new();
        strategy.evaluate(&ticker(3000.0), &params, t0);
        let signal = strategy
            .evaluate(&ticker(2960.0), &params, t0 + Duration::seconds(60))
            .unwrap();
        assert_eq!(signal.action, SignalAction::OpenShort);
        assert!(signal.indicators["velocity"] < -0.5);
    }

    #[tokio::test]
    async fn single_observation_is_silent() {
        let params = default_params().await;
        let mut strategy = TickerVelocity::new();
        assert!(strategy
            .evaluate(&ticker(3000.0), &params, Utc::now())
            .is_none());
    }

    #[tokio::test]
    async fn window_evicts_by_age_not_count() {
        let params = default_params().await;
        let t0 = Utc::now();
        let mut strategy = TickerVelocity::new();

        strategy.evaluate(&ticker(1000.0), &params, t0);
        strategy.evaluate(&ticker(2000.0), &params, t0 + Duration::seconds(30));
        // At t0+61 the first print has aged out of the 60s window; the
        // 30s-old print and the current one remain.
        strategy.evaluate(&ticker(3000.0), &params, t0 + Duration::seconds(61));
        let ring = &strategy.history["ETHUSDT"];
        assert_eq!(ring.len(), 2);
        assert!((ring.front().unwrap().1 - 2000.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn zero_oldest_price_guard() {
        let params = default_params().await;
        let t0 = Utc::now();
        let mut strategy = TickerVelocity::new();
        strategy.evaluate(&ticker(0.0), &params, t0);
        assert!(strategy
            .evaluate(&ticker(3000.0), &params, t0 + Duration::seconds(10))
            .is_none());
    }
}
