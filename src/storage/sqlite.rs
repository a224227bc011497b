//! SQLite repository implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Readers (evaluator, rollups, API) don't block the result writer
//! - **Connection pooling**: Probe tasks persist concurrently
//! - **Migrations**: Schema versioning with `sqlx::migrate!`
//!
//! Monitor definitions are stored as JSON next to a few indexed columns, so new
//! protocol settings never need a schema change.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{HealthStatus, MonitorRepository, ResultQuery};
use super::error::{StorageError, StorageResult};
use crate::model::{AvailabilityPeriod, MonitorId, ProbeResult, ServiceAvailability, ServiceMonitor};

/// SQLite-backed monitor repository
pub struct SqliteRepository {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteRepository {
    /// Open (or create) the database and run migrations
    ///
    /// ```no_run
    /// # use service_sentinel::storage::sqlite::SqliteRepository;
    /// # async fn example() -> anyhow::Result<()> {
    /// let repository = SqliteRepository::new("./sentinel.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite repository at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }

    fn decode_monitors(rows: Vec<SqliteRow>) -> Vec<ServiceMonitor> {
        rows.into_iter()
            .filter_map(|row| {
                let id: i64 = row.get("id");
                let definition: String = row.get("definition");
                match serde_json::from_str::<ServiceMonitor>(&definition) {
                    Ok(monitor) => Some(monitor),
                    Err(e) => {
                        warn!("skipping monitor {} with undecodable definition: {}", id, e);
                        None
                    }
                }
            })
            .collect()
    }

    fn decode_result(row: &SqliteRow) -> ProbeResult {
        ProbeResult {
            monitor_id: row.get("monitor_id"),
            timestamp: Self::millis_to_timestamp(row.get("timestamp")),
            success: row.get::<i64, _>("success") != 0,
            latency_ms: row.get::<i64, _>("latency_ms").max(0) as u64,
            status_code: row
                .get::<Option<i64>, _>("status_code")
                .map(|code| code as u16),
            response_body: row.get("response_body"),
            error_message: row.get("error_message"),
        }
    }

    fn decode_availability(row: &SqliteRow) -> StorageResult<ServiceAvailability> {
        let period: String = row.get("period");
        let period = period
            .parse::<AvailabilityPeriod>()
            .map_err(StorageError::Decode)?;

        Ok(ServiceAvailability {
            monitor_id: row.get("monitor_id"),
            period,
            start_time: Self::millis_to_timestamp(row.get("start_time")),
            end_time: Self::millis_to_timestamp(row.get("end_time")),
            total_checks: row.get::<i64, _>("total_checks") as u64,
            successful_checks: row.get::<i64, _>("successful_checks") as u64,
            failed_checks: row.get::<i64, _>("failed_checks") as u64,
            availability: row.get("availability"),
            min_latency_ms: row.get::<Option<i64>, _>("min_latency_ms").map(|v| v as u64),
            avg_latency_ms: row.get("avg_latency_ms"),
            max_latency_ms: row.get::<Option<i64>, _>("max_latency_ms").map(|v| v as u64),
        })
    }
}

#[async_trait]
impl MonitorRepository for SqliteRepository {
    #[instrument(skip(self))]
    async fn list_enabled_monitors(&self) -> StorageResult<Vec<ServiceMonitor>> {
        let rows = sqlx::query(
            "SELECT id, definition FROM service_monitors WHERE enabled = 1 ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let monitors = Self::decode_monitors(rows);
        debug!("loaded {} enabled monitors", monitors.len());
        Ok(monitors)
    }

    #[instrument(skip(self))]
    async fn get_monitor(&self, id: MonitorId) -> StorageResult<Option<ServiceMonitor>> {
        let row = sqlx::query("SELECT id, definition FROM service_monitors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.and_then(|row| Self::decode_monitors(vec![row]).pop()))
    }

    #[instrument(skip(self, monitor), fields(monitor_id = monitor.id))]
    async fn upsert_monitor(&self, monitor: &ServiceMonitor) -> StorageResult<()> {
        let definition = serde_json::to_string(monitor)?;

        sqlx::query(
            r#"
            INSERT INTO service_monitors (id, name, probe_type, enabled, definition, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                probe_type = excluded.probe_type,
                enabled = excluded.enabled,
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(monitor.id)
        .bind(&monitor.name)
        .bind(monitor.probe_type().as_str())
        .bind(monitor.enabled)
        .bind(definition)
        .bind(Self::timestamp_to_millis(&Utc::now()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_monitor(&self, id: MonitorId) -> StorageResult<bool> {
        let result = sqlx::query("DELETE FROM service_monitors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, result), fields(monitor_id = result.monitor_id))]
    async fn save_result(&self, result: &ProbeResult) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO probe_results (
                monitor_id, timestamp, success, latency_ms,
                status_code, response_body, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(result.monitor_id)
        .bind(Self::timestamp_to_millis(&result.timestamp))
        .bind(result.success)
        .bind(result.latency_ms as i64)
        .bind(result.status_code.map(i64::from))
        .bind(&result.response_body)
        .bind(&result.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(monitor_id = query.monitor_id))]
    async fn query_results(&self, query: ResultQuery) -> StorageResult<Vec<ProbeResult>> {
        // Newest first so LIMIT keeps the most recent rows, reversed below
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);

        let rows = sqlx::query(
            r#"
            SELECT monitor_id, timestamp, success, latency_ms,
                   status_code, response_body, error_message
            FROM probe_results
            WHERE monitor_id = ? AND timestamp >= ? AND timestamp < ?
            ORDER BY timestamp DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(query.monitor_id)
        .bind(Self::timestamp_to_millis(&query.start))
        .bind(Self::timestamp_to_millis(&query.end))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut results: Vec<ProbeResult> = rows.iter().map(Self::decode_result).collect();
        results.reverse();
        debug!("query returned {} results", results.len());
        Ok(results)
    }

    #[instrument(skip(self, availability), fields(monitor_id = availability.monitor_id, period = %availability.period))]
    async fn save_availability(&self, availability: &ServiceAvailability) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO service_availability (
                monitor_id, period, start_time, end_time,
                total_checks, successful_checks, failed_checks, availability,
                min_latency_ms, avg_latency_ms, max_latency_ms
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (monitor_id, period, start_time) DO UPDATE SET
                end_time = excluded.end_time,
                total_checks = excluded.total_checks,
                successful_checks = excluded.successful_checks,
                failed_checks = excluded.failed_checks,
                availability = excluded.availability,
                min_latency_ms = excluded.min_latency_ms,
                avg_latency_ms = excluded.avg_latency_ms,
                max_latency_ms = excluded.max_latency_ms
            "#,
        )
        .bind(availability.monitor_id)
        .bind(availability.period.as_str())
        .bind(Self::timestamp_to_millis(&availability.start_time))
        .bind(Self::timestamp_to_millis(&availability.end_time))
        .bind(availability.total_checks as i64)
        .bind(availability.successful_checks as i64)
        .bind(availability.failed_checks as i64)
        .bind(availability.availability)
        .bind(availability.min_latency_ms.map(|v| v as i64))
        .bind(availability.avg_latency_ms)
        .bind(availability.max_latency_ms.map(|v| v as i64))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn query_availability(
        &self,
        monitor_id: MonitorId,
        period: AvailabilityPeriod,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<ServiceAvailability>> {
        let rows = sqlx::query(
            r#"
            SELECT monitor_id, period, start_time, end_time,
                   total_checks, successful_checks, failed_checks, availability,
                   min_latency_ms, avg_latency_ms, max_latency_ms
            FROM service_availability
            WHERE monitor_id = ? AND period = ? AND start_time >= ?
            ORDER BY start_time ASC
            "#,
        )
        .bind(monitor_id)
        .bind(period.as_str())
        .bind(Self::timestamp_to_millis(&since))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::decode_availability).collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_results(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM probe_results WHERE timestamp < ?")
            .bind(Self::timestamp_to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} probe results older than {}", deleted, before);
        Ok(deleted)
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "SQLite repository operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite repository");
        self.pool.close().await;
        Ok(())
    }
}
