// =============================================================================
// Bus plumbing — queue-group intake and fire-and-forget signal publishing
// =============================================================================

pub mod consumer;
pub mod publisher;

pub use publisher::{NatsSink, Publisher, SignalSink};
