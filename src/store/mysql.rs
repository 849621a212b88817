//! MySQL-backed [`QueueStore`] over a sqlx connection pool.
//!
//! The pool is capped at a single connection: a run is one sequential worker,
//! and one connection makes "acquired once per run, released at the end"
//! literally true. [`MySqlQueueStore::close`] releases it.

use super::{parse_image_locations, Completion, QueueEntry, QueueStore};
use crate::config::StoreConfig;
use crate::error::DrainError;
use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, Transaction};
use std::time::Duration;
use tracing::{debug, info, warn};

/// SQL text rendered once from the validated table layout.
#[derive(Debug, Clone)]
struct Statements {
    select_pending: String,
    lock_target: String,
    update_target: String,
    delete_entry: String,
}

impl Statements {
    fn render(c: &StoreConfig) -> Self {
        Self {
            select_pending: format!(
                "SELECT CAST(id AS SIGNED) AS id, \
                        CAST({target} AS SIGNED) AS target_id, \
                        CAST({image} AS CHAR) AS image_locations \
                 FROM {waiting} ORDER BY id",
                target = c.target_column,
                image = c.image_column,
                waiting = c.waiting_table,
            ),
            lock_target: format!("SELECT 1 FROM {} WHERE id = ? FOR UPDATE", c.record_table),
            update_target: format!(
                "UPDATE {} SET {} = ? WHERE id = ?",
                c.record_table, c.content_column
            ),
            delete_entry: format!("DELETE FROM {} WHERE id = ?", c.waiting_table),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WaitingRow {
    id: i64,
    target_id: i64,
    image_locations: Option<String>,
}

impl From<WaitingRow> for QueueEntry {
    fn from(row: WaitingRow) -> Self {
        let locations = row
            .image_locations
            .as_deref()
            .map(parse_image_locations)
            .unwrap_or_default();
        QueueEntry::new(row.id, row.target_id, locations)
    }
}

/// Waiting list and target records in MySQL.
#[derive(Debug, Clone)]
pub struct MySqlQueueStore {
    pool: MySqlPool,
    sql: Statements,
}

impl MySqlQueueStore {
    /// Validate the layout and open the connection for this run.
    pub async fn connect(config: &StoreConfig) -> Result<Self, DrainError> {
        config.validate()?;

        let options = match config.url {
            Some(ref url) => url
                .parse::<MySqlConnectOptions>()
                .map_err(|e| DrainError::InvalidConfig(format!("Invalid database URL: {e}")))?,
            None => {
                let mut opts = MySqlConnectOptions::new()
                    .host(&config.host)
                    .port(config.port)
                    .username(&config.user)
                    .database(&config.database);
                if let Some(ref pwd) = config.password {
                    opts = opts.password(pwd);
                }
                opts
            }
        };

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await
            .map_err(|e| DrainError::store("connect", e))?;

        info!("Connected to queue store ({})", config.waiting_table);
        Ok(Self::from_pool(pool, config))
    }

    /// Wrap an existing pool. The layout is trusted as already validated.
    pub fn from_pool(pool: MySqlPool, config: &StoreConfig) -> Self {
        Self {
            pool,
            sql: Statements::render(config),
        }
    }

    /// Close the pool, waiting for the connection to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("Queue store connection closed");
    }
}

#[async_trait]
impl QueueStore for MySqlQueueStore {
    async fn pending(&self) -> Result<Vec<QueueEntry>, DrainError> {
        let rows = sqlx::query_as::<_, WaitingRow>(&self.sql.select_pending)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| DrainError::store("select", e))?;

        debug!("Fetched {} waiting rows", rows.len());
        Ok(rows.into_iter().map(QueueEntry::from).collect())
    }

    async fn complete(
        &self,
        entry: &QueueEntry,
        content: &str,
    ) -> Result<Completion, DrainError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DrainError::store("begin", e))?;

        match write_pair(&mut tx, &self.sql, entry, content).await {
            Ok(true) => {
                tx.commit()
                    .await
                    .map_err(|e| DrainError::store("commit", e))?;
                Ok(Completion::Committed)
            }
            Ok(false) => {
                tx.rollback()
                    .await
                    .map_err(|e| DrainError::store("rollback", e))?;
                Ok(Completion::TargetMissing)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    warn!(entry = entry.id, "Rollback after failed write also failed: {}", rb);
                }
                Err(e)
            }
        }
    }
}

/// Run the record update and queue delete inside `tx`.
///
/// Returns `Ok(false)` without writing anything when the target record does
/// not exist.
async fn write_pair(
    tx: &mut Transaction<'_, MySql>,
    sql: &Statements,
    entry: &QueueEntry,
    content: &str,
) -> Result<bool, DrainError> {
    let target = sqlx::query(&sql.lock_target)
        .bind(entry.target_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| DrainError::store("lock target", e))?;
    if target.is_none() {
        return Ok(false);
    }

    sqlx::query(&sql.update_target)
        .bind(content)
        .bind(entry.target_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| DrainError::store("update", e))?;

    let deleted = sqlx::query(&sql.delete_entry)
        .bind(entry.id)
        .execute(&mut **tx)
        .await
        .map_err(|e| DrainError::store("delete", e))?;
    if deleted.rows_affected() == 0 {
        debug!(entry = entry.id, "Queue entry already gone at delete time");
    }

    Ok(true)
}
