// =============================================================================
// Config Store — document-database persistence for strategy parameters
// =============================================================================
//
// Three collections:
//   strategy_configs_global  — one live record per strategy
//   strategy_configs_symbol  — one live record per (strategy, symbol)
//   strategy_config_audit    — append-only mutation history
//
// The `ConfigStore` trait keeps the manager testable without a running
// database; `MemoryConfigStore` backs both the tests and the no-database
// dev mode, where parameter writes stay process-local.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::{Collection, Database};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::schema::ParameterValue;

// =============================================================================
// Records
// =============================================================================

/// Live configuration record for one (strategy, symbol?) scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfigRecord {
    pub strategy_id: String,
    /// `None` marks the global scope.
    pub symbol: Option<String>,
    pub parameters: HashMap<String, ParameterValue>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
    pub updated_by: String,
}

/// What a mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

/// Append-only audit row for one parameter mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigAuditRecord {
    pub id: String,
    pub strategy_id: String,
    pub symbol: Option<String>,
    pub action: AuditAction,
    pub old_parameters: Option<HashMap<String, ParameterValue>>,
    pub new_parameters: Option<HashMap<String, ParameterValue>>,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

// =============================================================================
// Trait
// =============================================================================

/// Persistence seam for strategy configuration.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_global(&self, strategy_id: &str) -> Result<Option<StrategyConfigRecord>>;

    async fn load_symbol(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<Option<StrategyConfigRecord>>;

    /// Insert or replace the live record for the record's scope.
    async fn upsert(&self, record: &StrategyConfigRecord) -> Result<()>;

    /// Remove the live record for a scope. Returns whether one existed.
    async fn delete(&self, strategy_id: &str, symbol: Option<&str>) -> Result<bool>;

    async fn append_audit(&self, record: &ConfigAuditRecord) -> Result<()>;

    /// Most-recent-first audit page. `symbol = None` returns rows for every
    /// scope of the strategy.
    async fn audit_page(
        &self,
        strategy_id: &str,
        symbol: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ConfigAuditRecord>>;

    /// (global record exists, number of symbol overrides) for one strategy.
    async fn override_counts(&self, strategy_id: &str) -> Result<(bool, u64)>;
}

// =============================================================================
// MongoDB implementation
// =============================================================================

const GLOBAL_COLLECTION: &str = "strategy_configs_global";
const SYMBOL_COLLECTION: &str = "strategy_configs_symbol";
const AUDIT_COLLECTION: &str = "strategy_config_audit";

/// Document-store implementation over MongoDB.
pub struct MongoConfigStore {
    global: Collection<StrategyConfigRecord>,
    symbol: Collection<StrategyConfigRecord>,
    audit: Collection<ConfigAuditRecord>,
}

impl MongoConfigStore {
    pub fn new(db: &Database) -> Self {
        info!(database = %db.name(), "mongo config store attached");
        Self {
            global: db.collection(GLOBAL_COLLECTION),
            symbol: db.collection(SYMBOL_COLLECTION),
            audit: db.collection(AUDIT_COLLECTION),
        }
    }
}

#[async_trait]
impl ConfigStore for MongoConfigStore {
    async fn load_global(&self, strategy_id: &str) -> Result<Option<StrategyConfigRecord>> {
        self.global
            .find_one(doc! { "strategy_id": strategy_id })
            .await
            .context("loading global config")
    }

    async fn load_symbol(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<Option<StrategyConfigRecord>> {
        self.symbol
            .find_one(doc! { "strategy_id": strategy_id, "symbol": symbol })
            .await
            .context("loading symbol config")
    }

    async fn upsert(&self, record: &StrategyConfigRecord) -> Result<()> {
        match &record.symbol {
            None => {
                self.global
                    .replace_one(doc! { "strategy_id": &record.strategy_id }, record)
                    .upsert(true)
                    .await
                    .context("upserting global config")?;
            }
            Some(symbol) => {
                self.symbol
                    .replace_one(
                        doc! { "strategy_id": &record.strategy_id, "symbol": symbol },
                        record,
                    )
                    .upsert(true)
                    .await
                    .context("upserting symbol config")?;
            }
        }
        Ok(())
    }

    async fn delete(&self, strategy_id: &str, symbol: Option<&str>) -> Result<bool> {
        let result = match symbol {
            None => self
                .global
                .delete_one(doc! { "strategy_id": strategy_id })
                .await
                .context("deleting global config")?,
            Some(symbol) => self
                .symbol
                .delete_one(doc! { "strategy_id": strategy_id, "symbol": symbol })
                .await
                .context("deleting symbol config")?,
        };
        Ok(result.deleted_count > 0)
    }

    async fn append_audit(&self, record: &ConfigAuditRecord) -> Result<()> {
        self.audit
            .insert_one(record)
            .await
            .context("appending audit record")?;
        Ok(())
    }

    async fn audit_page(
        &self,
        strategy_id: &str,
        symbol: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ConfigAuditRecord>> {
        let filter = match symbol {
            None => doc! { "strategy_id": strategy_id },
            Some(symbol) => doc! { "strategy_id": strategy_id, "symbol": symbol },
        };

        let cursor = self
            .audit
            .find(filter)
            .sort(doc! { "changed_at": -1 })
            .limit(limit)
            .await
            .context("querying audit page")?;

        cursor.try_collect().await.context("draining audit cursor")
    }

    async fn override_counts(&self, strategy_id: &str) -> Result<(bool, u64)> {
        let global = self
            .global
            .count_documents(doc! { "strategy_id": strategy_id })
            .await
            .context("counting global configs")?;
        let symbols = self
            .symbol
            .count_documents(doc! { "strategy_id": strategy_id })
            .await
            .context("counting symbol configs")?;
        Ok((global > 0, symbols))
    }
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Default)]
struct MemoryInner {
    records: HashMap<(String, Option<String>), StrategyConfigRecord>,
    audit: Vec<ConfigAuditRecord>,
}

/// Process-local store used in tests and when no database is configured.
#[derive(Default)]
pub struct MemoryConfigStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load_global(&self, strategy_id: &str) -> Result<Option<StrategyConfigRecord>> {
        Ok(self
            .inner
            .lock()
            .records
            .get(&(strategy_id.to_string(), None))
            .cloned())
    }

    async fn load_symbol(
        &self,
        strategy_id: &str,
        symbol: &str,
    ) -> Result<Option<StrategyConfigRecord>> {
        Ok(self
            .inner
            .lock()
            .records
            .get(&(strategy_id.to_string(), Some(symbol.to_string())))
            .cloned())
    }

    async fn upsert(&self, record: &StrategyConfigRecord) -> Result<()> {
        self.inner.lock().records.insert(
            (record.strategy_id.clone(), record.symbol.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn delete(&self, strategy_id: &str, symbol: Option<&str>) -> Result<bool> {
        Ok(self
            .inner
            .lock()
            .records
            .remove(&(strategy_id.to_string(), symbol.map(str::to_string)))
            .is_some())
    }

    async fn append_audit(&self, record: &ConfigAuditRecord) -> Result<()> {
        self.inner.lock().audit.push(record.clone());
        Ok(())
    }

    async fn audit_page(
        &self,
        strategy_id: &str,
        symbol: Option<&str>,
        limit: i64,
    ) -> Result<Vec<ConfigAuditRecord>> {
        let inner = self.inner.lock();
        let mut rows: Vec<ConfigAuditRecord> = inner
            .audit
            .iter()
            .filter(|r| {
                r.strategy_id == strategy_id
                    && symbol.map_or(true, |s| r.symbol.as_deref() == Some(s))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.changed_at.cmp(&a.changed_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn override_counts(&self, strategy_id: &str) -> Result<(bool, u64)> {
        let inner = self.inner.lock();
        let global = inner
            .records
            .contains_key(&(strategy_id.to_string(), None));
        let symbols = inner
            .records
            .keys()
            .filter(|(s, sym)| s == strategy_id && sym.is_some())
            .count() as u64;
        Ok((global, symbols))
    }
}
