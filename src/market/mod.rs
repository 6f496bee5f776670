// =============================================================================
// Market data domain — typed events and the depth metrics engine
// =============================================================================

pub mod depth_analyzer;
pub mod events;

pub use depth_analyzer::{DepthAnalyzer, DepthMetrics, PressureWindow};
pub use events::{DepthSnapshot, MarketEvent, PriceLevel, TickerUpdate, Trade};
