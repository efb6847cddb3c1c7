//! PostgreSQL implementation of PendingRequestStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depchain_core::ids::{PendingRequestId, SourceStampId};
use depchain_core::pending::{BuildRequest, PendingBuildsetRequest};
use depchain_core::ports::PendingRequestStore;
use depchain_core::{Error, Result};
use sqlx::{PgPool, Row};

const PENDING_COLUMNS: &str = "id, sourcestamp_id, scheduler, dependencies, reason, external_id, properties, fingerprint, created_at";

/// PostgreSQL implementation of PendingRequestStore.
pub struct PgPendingRepository {
    pool: PgPool,
}

impl PgPendingRepository {
    /// Create a new PgPendingRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_pending(r: &sqlx::postgres::PgRow) -> Result<PendingBuildsetRequest> {
        Ok(PendingBuildsetRequest {
            id: PendingRequestId::new(r.get("id")),
            source_stamp_id: SourceStampId::new(r.get("sourcestamp_id")),
            scheduler: r.get("scheduler"),
            dependencies: serde_json::from_value(r.get("dependencies"))?,
            reason: r.get("reason"),
            external_id: r.get("external_id"),
            properties: serde_json::from_value(r.get("properties"))?,
            fingerprint: r.get("fingerprint"),
            created_at: r.get("created_at"),
        })
    }
}

#[async_trait]
impl PendingRequestStore for PgPendingRepository {
    async fn add_pending_request(
        &self,
        ssid: SourceStampId,
        scheduler: &str,
        dependencies: &[String],
        request: &BuildRequest,
    ) -> Result<PendingBuildsetRequest> {
        let dependencies = serde_json::to_value(dependencies)?;
        let properties = serde_json::to_value(&request.properties)?;

        // An equivalent row that slipped past the caller's check is returned
        // instead of duplicated.
        let row = sqlx::query(&format!(
            r#"INSERT INTO pending_buildsets (sourcestamp_id, scheduler, dependencies, reason, external_id, properties, fingerprint)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (sourcestamp_id, scheduler, fingerprint) DO UPDATE SET fingerprint = EXCLUDED.fingerprint
               RETURNING {}"#,
            PENDING_COLUMNS
        ))
        .bind(ssid.get())
        .bind(scheduler)
        .bind(&dependencies)
        .bind(&request.reason)
        .bind(&request.external_id)
        .bind(&properties)
        .bind(request.fingerprint())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Self::row_to_pending(&row)
    }

    async fn get_pending_requests(
        &self,
        ssid: SourceStampId,
        scheduler: &str,
    ) -> Result<Vec<PendingBuildsetRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pending_buildsets WHERE sourcestamp_id = $1 AND scheduler = $2 ORDER BY id",
            PENDING_COLUMNS
        ))
        .bind(ssid.get())
        .bind(scheduler)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_pending).collect()
    }

    async fn cancel_pending_requests(&self, ssid: SourceStampId, scheduler: &str) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM pending_buildsets WHERE sourcestamp_id = $1 AND scheduler = $2")
                .bind(ssid.get())
                .bind(scheduler)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn delete_pending_request(&self, id: PendingRequestId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM pending_buildsets WHERE id = $1")
            .bind(id.get())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_pending_requests(&self, scheduler: &str) -> Result<Vec<PendingBuildsetRequest>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM pending_buildsets WHERE scheduler = $1 ORDER BY id",
            PENDING_COLUMNS
        ))
        .bind(scheduler)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_pending).collect()
    }

    async fn expire_pending_requests(
        &self,
        scheduler: &str,
        older_than: DateTime<Utc>,
    ) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM pending_buildsets WHERE scheduler = $1 AND created_at < $2")
                .bind(scheduler)
                .bind(older_than)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
