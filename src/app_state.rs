// =============================================================================
// Application State — handles shared between the engine and the API
// =============================================================================
//
// The dispatch loop owns the router exclusively; everything the REST
// surface and the heartbeat need (config manager, depth analyzer, metrics,
// breaker handles) is shared here behind Arcs. Each subsystem manages its
// own interior mutability.
// =============================================================================

use std::sync::Arc;

use crate::breaker::{BreakerInfo, CircuitBreaker};
use crate::config::ConfigManager;
use crate::market::DepthAnalyzer;
use crate::metrics::EngineMetrics;
use crate::settings::Settings;

pub struct AppState {
    pub settings: Settings,
    pub config: Arc<ConfigManager>,
    pub analyzer: Arc<DepthAnalyzer>,
    pub metrics: Arc<EngineMetrics>,
    pub breakers: Vec<Arc<CircuitBreaker>>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        config: Arc<ConfigManager>,
        analyzer: Arc<DepthAnalyzer>,
        metrics: Arc<EngineMetrics>,
        breakers: Vec<Arc<CircuitBreaker>>,
    ) -> Self {
        Self {
            settings,
            config,
            analyzer,
            metrics,
            breakers,
        }
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerInfo> {
        self.breakers.iter().map(|b| b.snapshot()).collect()
    }
}
