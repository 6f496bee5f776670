// =============================================================================
// Signal domain — internal representation and the executor-contract adapter
// =============================================================================

pub mod adapter;
pub mod model;

pub use adapter::SignalAdapter;
pub use model::{ConfigProvenance, InternalSignal, TradeSignal};
