//! Postgres-backed scoped key-value store
//!
//! One store instance serves one table; the table, key column, and value
//! column are configuration so a single implementation backs both team data
//! and session data. Records are keyed by an opaque scope identifier (team
//! ID or session ID) with a uniqueness constraint on the key column, and
//! payloads are stored as JSON text.
//!
//! Concurrent first-time reads with a default race at the storage layer,
//! not behind a lock: exactly one conditional insert wins and every loser
//! re-reads the winner's row. The duplicate-key conflict is recovered
//! internally and never surfaced to callers.

use serde_json::Value;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Failures from the key-value backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid identifier in table configuration: {0:?}")]
    InvalidIdentifier(String),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Table layout for one store instance
#[derive(Debug, Clone)]
pub struct KvTableConfig {
    pub table: String,
    pub key_column: String,
    pub value_column: String,
}

impl KvTableConfig {
    pub fn new(table: &str, key_column: &str, value_column: &str) -> Self {
        Self {
            table: table.to_string(),
            key_column: key_column.to_string(),
            value_column: value_column.to_string(),
        }
    }
}

/// Identifiers are interpolated into SQL text, so they are restricted to an
/// allow-list; values always travel as bound parameters.
fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 63
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Rendered statements for one table layout, built once at construction
#[derive(Debug)]
struct Statements {
    create: String,
    select: String,
    insert_if_absent: String,
    upsert: String,
}

impl Statements {
    fn render(config: &KvTableConfig) -> Self {
        let KvTableConfig {
            table,
            key_column,
            value_column,
        } = config;
        Self {
            create: format!(
                "CREATE TABLE IF NOT EXISTS {table} ({key_column} VARCHAR(128) PRIMARY KEY, {value_column} TEXT)"
            ),
            select: format!("SELECT {value_column} FROM {table} WHERE {key_column} = $1"),
            insert_if_absent: format!(
                "INSERT INTO {table} ({key_column}, {value_column}) VALUES ($1, $2) \
                 ON CONFLICT ({key_column}) DO NOTHING"
            ),
            upsert: format!(
                "INSERT INTO {table} ({key_column}, {value_column}) VALUES ($1, $2) \
                 ON CONFLICT ({key_column}) DO UPDATE SET {value_column} = EXCLUDED.{value_column}"
            ),
        }
    }
}

/// Generic get/set/insert-if-absent persistence keyed by an opaque scope
/// identifier
#[derive(Clone, Debug)]
pub struct ScopedKvStore {
    pool: PgPool,
    statements: Arc<Statements>,
}

impl ScopedKvStore {
    /// Create a store over `pool` for the given table layout.
    ///
    /// Fails if any configured identifier is outside the allow-list.
    pub fn new(pool: PgPool, config: KvTableConfig) -> Result<Self, StoreError> {
        for identifier in [&config.table, &config.key_column, &config.value_column] {
            if !valid_identifier(identifier) {
                return Err(StoreError::InvalidIdentifier(identifier.clone()));
            }
        }

        Ok(Self {
            pool,
            statements: Arc::new(Statements::render(&config)),
        })
    }

    /// Idempotent creation of the backing table
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(&self.statements.create)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn select_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query(&self.statements.select)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<String, _>(0)?)),
            None => Ok(None),
        }
    }

    /// Read the record for `key`. Absence is `None`, not an error.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match self.select_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Read the record for `key`, atomically creating it with `default` if
    /// absent.
    ///
    /// When several callers race on a new key, exactly one insert wins; the
    /// others observe the conflict and re-read the winning row. Costs up to
    /// two round trips plus a re-read on conflict; single-writer-wins
    /// semantics without a distributed lock.
    pub async fn get_or_default(&self, key: &str, default: &Value) -> Result<Value, StoreError> {
        loop {
            if let Some(raw) = self.select_raw(key).await? {
                return Ok(serde_json::from_str(&raw)?);
            }

            let result = sqlx::query(&self.statements.insert_if_absent)
                .bind(key)
                .bind(serde_json::to_string(default)?)
                .execute(&self.pool)
                .await?;

            if result.rows_affected() == 1 {
                return Ok(default.clone());
            }

            // Someone else created the record between our select and
            // insert; re-read for the applied default.
            debug!(key, "lost default-insert race, re-reading");
        }
    }

    /// Write `value` for `key`, creating the record if it does not exist.
    ///
    /// Upsert rather than bare UPDATE: a set on a never-read key creates
    /// the row instead of silently matching zero rows.
    pub async fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        sqlx::query(&self.statements.upsert)
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    fn lazy_pool() -> PgPool {
        PgPoolOptions::new()
            .connect_lazy("postgres://localhost/huddle_test")
            .unwrap()
    }

    #[tokio::test]
    async fn accepts_plain_identifiers() {
        let config = KvTableConfig::new("team_data", "team", "data");
        assert!(ScopedKvStore::new(lazy_pool(), config).is_ok());
    }

    #[tokio::test]
    async fn rejects_identifier_with_injection() {
        let config = KvTableConfig::new("team_data; DROP TABLE x", "team", "data");
        let err = ScopedKvStore::new(lazy_pool(), config).unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn rejects_empty_column_name() {
        let config = KvTableConfig::new("team_data", "", "data");
        assert!(ScopedKvStore::new(lazy_pool(), config).is_err());
    }

    #[test]
    fn statements_use_configured_names() {
        let statements = Statements::render(&KvTableConfig::new("session_data", "session_id", "data"));
        assert_eq!(
            statements.select,
            "SELECT data FROM session_data WHERE session_id = $1"
        );
        assert!(statements
            .insert_if_absent
            .contains("ON CONFLICT (session_id) DO NOTHING"));
        assert!(statements
            .upsert
            .contains("ON CONFLICT (session_id) DO UPDATE SET data = EXCLUDED.data"));
        assert!(statements.create.contains("VARCHAR(128) PRIMARY KEY"));
    }
}
