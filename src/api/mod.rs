// =============================================================================
// REST API — configuration management and metrics queries
// =============================================================================

pub mod rest;
