// =============================================================================
// Runtime configuration — priority-resolved per-strategy parameters
// =============================================================================

pub mod manager;
pub mod schema;
pub mod store;

pub use manager::{ConfigError, ConfigManager, ConfigSource, ResolvedParams};
pub use schema::{ParameterSchema, ParameterType, ParameterValue, StrategySchema, ValidationError};
pub use store::{AuditAction, ConfigAuditRecord, ConfigStore, StrategyConfigRecord};
