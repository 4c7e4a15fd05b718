//! SQLite implementation of HistoryStore
//!
//! ## Type Mapping
//!
//! | Domain Type     | SQL Type | Strategy                                  |
//! |-----------------|----------|-------------------------------------------|
//! | SyncKey         | TEXT     | `.as_str()` / `SyncKey::new()`            |
//! | epoch millis    | INTEGER  | stored as is                              |
//! | sizes (`u64`)   | INTEGER  | cast through `i64`                        |
//! | HistoryAction   | TEXT     | `.as_str()` / `HistoryAction::parse()`    |
//! | TriggerSource   | TEXT     | `.as_str()`, queryable column             |
//! | SyncPlan        | TEXT     | serde_json serialization                  |

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use tidesync_core::domain::{HistoryAction, HistoryEvent, SyncKey, SyncMapping, SyncPlan};
use tidesync_core::ports::HistoryStore;

use crate::CacheError;

/// SQLite-backed history of mappings, events and plans
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row conversion
// ============================================================================

fn parse_key(raw: &str) -> Result<SyncKey, CacheError> {
    SyncKey::new(raw)
        .map_err(|e| CacheError::SerializationError(format!("Invalid key '{}': {}", raw, e)))
}

fn mapping_from_row(row: &SqliteRow) -> Result<SyncMapping, CacheError> {
    let key: String = row.get("key");
    let local_mtime: i64 = row.get("local_mtime");
    let local_size: i64 = row.get("local_size");
    let remote_mtime: i64 = row.get("remote_mtime");
    let remote_size: i64 = row.get("remote_size");
    let remote_etag: Option<String> = row.get("remote_etag");

    Ok(SyncMapping {
        key: parse_key(&key)?,
        local_mtime,
        local_size: local_size as u64,
        remote_mtime,
        remote_size: remote_size as u64,
        remote_etag,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<HistoryEvent, CacheError> {
    let key: String = row.get("key");
    let action: String = row.get("action");
    let action_when: i64 = row.get("action_when");

    let action = HistoryAction::parse(&action).ok_or_else(|| {
        CacheError::SerializationError(format!("Unknown history action: {}", action))
    })?;
    Ok(HistoryEvent::new(parse_key(&key)?, action, action_when))
}

fn plan_from_row(row: &SqliteRow) -> Result<SyncPlan, CacheError> {
    let id: i64 = row.get("id");
    let plan: String = row.get("plan");
    serde_json::from_str(&plan)
        .map_err(|e| CacheError::SerializationError(format!("Invalid plan #{}: {}", id, e)))
}

// ============================================================================
// HistoryStore implementation
// ============================================================================

#[async_trait::async_trait]
impl HistoryStore for SqliteHistoryStore {
    // --- Mappings ---

    async fn mappings(&self) -> anyhow::Result<Vec<SyncMapping>> {
        let rows = sqlx::query("SELECT * FROM sync_mappings ORDER BY key ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut mappings = Vec::with_capacity(rows.len());
        for row in &rows {
            mappings.push(mapping_from_row(row)?);
        }
        Ok(mappings)
    }

    async fn upsert_mapping(&self, mapping: &SyncMapping) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_mappings \
             (key, local_mtime, local_size, remote_mtime, remote_size, remote_etag) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(mapping.key.as_str())
        .bind(mapping.local_mtime)
        .bind(mapping.local_size as i64)
        .bind(mapping.remote_mtime)
        .bind(mapping.remote_size as i64)
        .bind(&mapping.remote_etag)
        .execute(&self.pool)
        .await?;

        tracing::trace!(key = %mapping.key, "Saved mapping");
        Ok(())
    }

    async fn remove_mapping(&self, key: &SyncKey) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM sync_mappings WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;

        tracing::trace!(%key, "Removed mapping");
        Ok(())
    }

    // --- Events ---

    async fn events(&self) -> anyhow::Result<Vec<HistoryEvent>> {
        let rows = sqlx::query("SELECT * FROM file_history ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            events.push(event_from_row(row)?);
        }
        Ok(events)
    }

    async fn record_event(&self, event: &HistoryEvent) -> anyhow::Result<()> {
        sqlx::query("INSERT INTO file_history (key, action, action_when) VALUES (?, ?, ?)")
            .bind(event.key.as_str())
            .bind(event.action.as_str())
            .bind(event.action_when)
            .execute(&self.pool)
            .await?;

        tracing::trace!(key = %event.key, action = event.action.as_str(), "Recorded event");
        Ok(())
    }

    async fn clear_events(&self, key: &SyncKey) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM file_history WHERE key = ?")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // --- Plans ---

    async fn save_plan(&self, plan: &SyncPlan) -> anyhow::Result<()> {
        let json = serde_json::to_string(plan)
            .map_err(|e| anyhow::anyhow!("Failed to serialize plan: {}", e))?;

        sqlx::query(
            "INSERT INTO sync_plans (created_at, trigger_source, key_count, plan) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(plan.trigger_source.as_str())
        .bind(plan.len() as i64)
        .bind(&json)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            trigger = %plan.trigger_source,
            keys = plan.len(),
            "Saved sync plan"
        );
        Ok(())
    }

    async fn recent_plans(&self, limit: usize) -> anyhow::Result<Vec<SyncPlan>> {
        let rows = sqlx::query("SELECT id, plan FROM sync_plans ORDER BY id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut plans = Vec::with_capacity(rows.len());
        for row in &rows {
            plans.push(plan_from_row(row)?);
        }
        Ok(plans)
    }
}
