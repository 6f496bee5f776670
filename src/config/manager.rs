// =============================================================================
// Config Manager — priority-resolved strategy parameters with a TTL cache
// =============================================================================
//
// Resolution priority, highest first:
//
//   1. cache (fresh within the TTL)
//   2. document-store symbol-specific record
//   3. document-store global record
//   4. environment variables ({STRATEGY}_{PARAMETER}, snake-upper)
//   5. compiled schema defaults
//
// `get` never errors: a store failure logs and falls through to the layers
// below, so the engine keeps running on last-known-good parameters.
//
// The cache holds fully-built parameter maps behind an `Arc`; invalidation
// and refresh replace whole entries, so readers always see a complete,
// consistent snapshot and never a half-populated map.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::schema::{all_schemas, schema_for, ParameterValue, ValidationError};
use crate::config::store::{AuditAction, ConfigAuditRecord, ConfigStore, StrategyConfigRecord};
use crate::signals::model::ConfigProvenance;

// =============================================================================
// Public types
// =============================================================================

/// Which layer of the priority chain supplied the winning record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigSource {
    Default,
    Env,
    DbGlobal,
    DbSymbol,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Env => write!(f, "env"),
            Self::DbGlobal => write!(f, "db-global"),
            Self::DbSymbol => write!(f, "db-symbol"),
        }
    }
}

/// A fully resolved parameter set for one (strategy, symbol?) scope.
///
/// The value map always contains every parameter the schema declares.
#[derive(Debug, Clone, Serialize)]
pub struct ResolvedParams {
    pub strategy_id: String,
    pub symbol: Option<String>,
    pub parameters: Arc<HashMap<String, ParameterValue>>,
    pub source: ConfigSource,
    pub version: i64,
    pub is_override: bool,
}

impl ResolvedParams {
    pub fn f64(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).and_then(ParameterValue::as_f64)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.parameters.get(name).and_then(ParameterValue::as_i64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.parameters.get(name).and_then(ParameterValue::as_bool)
    }

    /// Strategies honour the `enabled` flag before any computation.
    pub fn enabled(&self) -> bool {
        self.bool("enabled").unwrap_or(true)
    }

    pub fn provenance(&self) -> ConfigProvenance {
        ConfigProvenance {
            source: self.source.to_string(),
            version: self.version,
            is_override: self.is_override,
        }
    }
}

/// Registered-strategy summary for the REST surface.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyInfo {
    pub strategy: String,
    pub parameter_count: usize,
    pub has_global_config: bool,
    pub symbol_overrides: u64,
}

/// Error surface for configuration writes.
#[derive(Debug)]
pub enum ConfigError {
    /// The proposed parameters failed schema validation. No state changed.
    Validation(Vec<ValidationError>),
    /// The document store rejected or timed out on the operation.
    Transient(String),
    /// The strategy is not registered.
    UnknownStrategy(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(errors) => {
                write!(f, "validation failed: ")?;
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}: {}", e.parameter, e.message)?;
                }
                Ok(())
            }
            Self::Transient(msg) => write!(f, "document store unavailable: {msg}"),
            Self::UnknownStrategy(s) => write!(f, "unknown strategy: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// Manager
// =============================================================================

struct CacheEntry {
    resolved: ResolvedParams,
    cached_at: Instant,
}

/// Priority-resolving parameter store with a short-TTL cache and an
/// append-only audit trail behind it.
pub struct ConfigManager {
    store: Arc<dyn ConfigStore>,
    cache: RwLock<HashMap<(String, Option<String>), CacheEntry>>,
    ttl: Duration,
    io_deadline: Duration,
}

impl ConfigManager {
    pub fn new(store: Arc<dyn ConfigStore>, ttl: Duration, io_deadline: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            ttl,
            io_deadline,
        }
    }

    // -------------------------------------------------------------------------
    // Resolution
    // -------------------------------------------------------------------------

    /// Resolve parameters for a scope. Never errors: store failures fall
    /// through to environment variables and compiled defaults.
    pub async fn get(&self, strategy_id: &str, symbol: Option<&str>) -> ResolvedParams {
        let key = (strategy_id.to_string(), symbol.map(str::to_string));

        if let Some(entry) = self.cache.read().get(&key) {
            if entry.cached_at.elapsed() < self.ttl {
                return entry.resolved.clone();
            }
        }

        let resolved = self.resolve(strategy_id, symbol).await;

        self.cache.write().insert(
            key,
            CacheEntry {
                resolved: resolved.clone(),
                cached_at: Instant::now(),
            },
        );

        resolved
    }

    async fn resolve(&self, strategy_id: &str, symbol: Option<&str>) -> ResolvedParams {
        // Layer 5: compiled defaults.
        let mut parameters = match schema_for(strategy_id) {
            Some(schema) => schema.defaults(),
            None => HashMap::new(),
        };
        let mut source = ConfigSource::Default;
        let mut version = 0i64;
        let mut is_override = false;

        // Layer 4: environment variables.
        if let Some(schema) = schema_for(strategy_id) {
            let mut any = false;
            for param in &schema.parameters {
                let var = env_var_name(strategy_id, &param.name);
                if let Ok(raw) = std::env::var(&var) {
                    match ParameterValue::parse_as(param.kind, &raw) {
                        Some(value) => {
                            parameters.insert(param.name.clone(), value);
                            any = true;
                        }
                        None => warn!(var = %var, raw = %raw, "unparsable env override ignored"),
                    }
                }
            }
            if any {
                source = ConfigSource::Env;
            }
        }

        // Layer 3: document-store global record.
        match self.store_read(self.store.load_global(strategy_id)).await {
            Some(Some(record)) => {
                for (name, value) in &record.parameters {
                    parameters.insert(name.clone(), value.clone());
                }
                source = ConfigSource::DbGlobal;
                version = record.version;
            }
            Some(None) => {}
            None => debug!(strategy = strategy_id, "global config read failed, falling through"),
        }

        // Layer 2: document-store symbol override.
        if let Some(symbol) = symbol {
            match self
                .store_read(self.store.load_symbol(strategy_id, symbol))
                .await
            {
                Some(Some(record)) => {
                    for (name, value) in &record.parameters {
                        parameters.insert(name.clone(), value.clone());
                    }
                    source = ConfigSource::DbSymbol;
                    version = record.version;
                    is_override = true;
                }
                Some(None) => {}
                None => {
                    debug!(strategy = strategy_id, symbol, "symbol config read failed, falling through")
                }
            }
        }

        ResolvedParams {
            strategy_id: strategy_id.to_string(),
            symbol: symbol.map(str::to_string),
            parameters: Arc::new(parameters),
            source,
            version,
            is_override,
        }
    }

    /// Run a store read under the I/O deadline, flattening timeout and
    /// store errors into `None`.
    async fn store_read<T>(
        &self,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> Option<T> {
        match tokio::time::timeout(self.io_deadline, fut).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(error = %e, "config store read error");
                None
            }
            Err(_) => {
                warn!("config store read deadline expired");
                None
            }
        }
    }

    // -------------------------------------------------------------------------
    // Mutation
    // -------------------------------------------------------------------------

    /// Validate and (unless `validate_only`) persist parameters for a scope.
    ///
    /// Returns the saved record, or `None` in validate-only mode. Every
    /// persisted change bumps the scope version, appends exactly one audit
    /// record, and invalidates the strategy's cache entries.
    pub async fn set(
        &self,
        strategy_id: &str,
        symbol: Option<&str>,
        parameters: HashMap<String, ParameterValue>,
        changed_by: &str,
        reason: Option<String>,
        validate_only: bool,
    ) -> Result<Option<StrategyConfigRecord>, ConfigError> {
        let schema = schema_for(strategy_id)
            .ok_or_else(|| ConfigError::UnknownStrategy(strategy_id.to_string()))?;

        let errors = schema.validate(&parameters);
        if !errors.is_empty() {
            return Err(ConfigError::Validation(errors));
        }
        if validate_only {
            return Ok(None);
        }

        let existing = self
            .store_write(match symbol {
                None => self.store.load_global(strategy_id),
                Some(s) => self.store.load_symbol(strategy_id, s),
            })
            .await?;

        let record = StrategyConfigRecord {
            strategy_id: strategy_id.to_string(),
            symbol: symbol.map(str::to_string),
            parameters: parameters.clone(),
            version: existing.as_ref().map(|r| r.version + 1).unwrap_or(1),
            updated_at: Utc::now(),
            updated_by: changed_by.to_string(),
        };

        self.store_write(self.store.upsert(&record)).await?;

        let audit = ConfigAuditRecord {
            id: Uuid::new_v4().to_string(),
            strategy_id: strategy_id.to_string(),
            symbol: symbol.map(str::to_string),
            action: if existing.is_some() {
                AuditAction::Update
            } else {
                AuditAction::Create
            },
            old_parameters: existing.map(|r| r.parameters),
            new_parameters: Some(parameters),
            changed_by: changed_by.to_string(),
            changed_at: record.updated_at,
            reason,
        };
        self.store_write(self.store.append_audit(&audit)).await?;

        self.invalidate(strategy_id);
        info!(
            strategy = strategy_id,
            symbol = symbol.unwrap_or("global"),
            version = record.version,
            changed_by,
            "strategy config saved"
        );

        Ok(Some(record))
    }

    /// Remove the live record for a scope. Returns whether one existed.
    pub async fn delete(
        &self,
        strategy_id: &str,
        symbol: Option<&str>,
        changed_by: &str,
        reason: Option<String>,
    ) -> Result<bool, ConfigError> {
        schema_for(strategy_id)
            .ok_or_else(|| ConfigError::UnknownStrategy(strategy_id.to_string()))?;

        let existing = self
            .store_write(match symbol {
                None => self.store.load_global(strategy_id),
                Some(s) => self.store.load_symbol(strategy_id, s),
            })
            .await?;

        let Some(existing) = existing else {
            return Ok(false);
        };

        self.store_write(self.store.delete(strategy_id, symbol))
            .await?;

        let audit = ConfigAuditRecord {
            id: Uuid::new_v4().to_string(),
            strategy_id: strategy_id.to_string(),
            symbol: symbol.map(str::to_string),
            action: AuditAction::Delete,
            old_parameters: Some(existing.parameters),
            new_parameters: None,
            changed_by: changed_by.to_string(),
            changed_at: Utc::now(),
            reason,
        };
        self.store_write(self.store.append_audit(&audit)).await?;

        self.invalidate(strategy_id);
        info!(
            strategy = strategy_id,
            symbol = symbol.unwrap_or("global"),
            changed_by,
            "strategy config deleted"
        );

        Ok(true)
    }

    /// Run a store write under the I/O deadline, mapping failures to the
    /// transient error status.
    async fn store_write<T>(
        &self,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> Result<T, ConfigError> {
        match tokio::time::timeout(self.io_deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ConfigError::Transient(e.to_string())),
            Err(_) => Err(ConfigError::Transient("deadline expired".to_string())),
        }
    }

    // -------------------------------------------------------------------------
    // Query surface
    // -------------------------------------------------------------------------

    /// Registered strategies with their override counts.
    pub async fn list_strategies(&self) -> Vec<StrategyInfo> {
        let mut out = Vec::new();
        for schema in all_schemas() {
            let (has_global, overrides) = self
                .store_read(self.store.override_counts(&schema.strategy))
                .await
                .unwrap_or((false, 0));
            out.push(StrategyInfo {
                strategy: schema.strategy.clone(),
                parameter_count: schema.parameters.len(),
                has_global_config: has_global,
                symbol_overrides: overrides,
            });
        }
        out
    }

    /// Most-recent-first audit page for a scope.
    pub async fn audit(
        &self,
        strategy_id: &str,
        symbol: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ConfigAuditRecord>, ConfigError> {
        self.store_write(self.store.audit_page(strategy_id, symbol, limit))
            .await
    }

    // -------------------------------------------------------------------------
    // Cache control
    // -------------------------------------------------------------------------

    /// Drop every cached entry. The next `get` per scope re-resolves.
    pub fn refresh(&self) {
        let mut cache = self.cache.write();
        let dropped = cache.len();
        cache.clear();
        info!(dropped, "config cache refreshed");
    }

    /// Drop expired entries. Called by a periodic timer so the cache stays
    /// bounded by the live scope set.
    pub fn sweep(&self) -> usize {
        let mut cache = self.cache.write();
        let before = cache.len();
        cache.retain(|_, entry| entry.cached_at.elapsed() < self.ttl);
        before - cache.len()
    }

    fn invalidate(&self, strategy_id: &str) {
        // A global change affects every symbol scope that fell through to
        // it, so the whole strategy is dropped.
        self.cache
            .write()
            .retain(|(strategy, _), _| strategy != strategy_id);
    }
}

fn env_var_name(strategy_id: &str, parameter: &str) -> String {
    format!(
        "{}_{}",
        strategy_id.to_ascii_uppercase(),
        parameter.to_ascii_uppercase()
    )
}
