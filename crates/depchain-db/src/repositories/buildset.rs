//! PostgreSQL implementation of the buildset ports.

use async_trait::async_trait;
use depchain_core::buildset::{BuildResult, Buildset};
use depchain_core::ids::{BuildsetId, SourceStampId};
use depchain_core::ports::{BuildExecutor, BuildsetCompleter, BuildsetStore};
use depchain_core::properties::{Properties, PropertyValue};
use depchain_core::{Error, Result};
use sqlx::{PgPool, Row};
use tracing::debug;

const BUILDSET_COLUMNS: &str =
    "id, sourcestamp_id, reason, external_id, builder, complete, results, submitted_at, completed_at";

/// PostgreSQL implementation of [`BuildsetStore`], [`BuildExecutor`] and
/// [`BuildsetCompleter`].
///
/// Admitting a buildset here only records it; builders pick up incomplete
/// buildsets and report back through [`BuildsetCompleter`].
pub struct PgBuildsetRepository {
    pool: PgPool,
}

impl PgBuildsetRepository {
    /// Create a new PgBuildsetRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_buildset(r: &sqlx::postgres::PgRow) -> Result<Buildset> {
        let result = match r.get::<Option<i32>, _>("results") {
            Some(code) => Some(
                BuildResult::from_code(code)
                    .ok_or_else(|| Error::Database(format!("Unknown result code {}", code)))?,
            ),
            None => None,
        };

        Ok(Buildset {
            id: BuildsetId::new(r.get("id")),
            source_stamp_id: SourceStampId::new(r.get("sourcestamp_id")),
            reason: r.get("reason"),
            external_id: r.get("external_id"),
            builder: r.get("builder"),
            complete: r.get("complete"),
            result,
            submitted_at: r.get("submitted_at"),
            completed_at: r.get("completed_at"),
        })
    }
}

#[async_trait]
impl BuildsetStore for PgBuildsetRepository {
    async fn get_buildsets_for_source_stamp(&self, ssid: SourceStampId) -> Result<Vec<Buildset>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM buildsets WHERE sourcestamp_id = $1 ORDER BY id",
            BUILDSET_COLUMNS
        ))
        .bind(ssid.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_buildset).collect()
    }

    async fn get_buildset_properties(&self, id: BuildsetId) -> Result<Properties> {
        let rows = sqlx::query(
            "SELECT property_name, property_value, source FROM buildset_properties WHERE buildset_id = $1",
        )
        .bind(id.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|r| {
                (
                    r.get::<String, _>("property_name"),
                    PropertyValue {
                        value: r.get("property_value"),
                        source: r.get("source"),
                    },
                )
            })
            .collect())
    }

    async fn get_buildset(&self, id: BuildsetId) -> Result<Option<Buildset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM buildsets WHERE id = $1",
            BUILDSET_COLUMNS
        ))
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::row_to_buildset(&r)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl BuildExecutor for PgBuildsetRepository {
    async fn admit_buildset(
        &self,
        ssid: SourceStampId,
        builder: &str,
        reason: &str,
        external_id: Option<&str>,
        properties: &Properties,
    ) -> Result<Buildset> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        let row = sqlx::query(&format!(
            "INSERT INTO buildsets (sourcestamp_id, reason, external_id, builder) VALUES ($1, $2, $3, $4) RETURNING {}",
            BUILDSET_COLUMNS
        ))
        .bind(ssid.get())
        .bind(reason)
        .bind(external_id)
        .bind(builder)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;
        let buildset = Self::row_to_buildset(&row)?;

        for (name, prop) in properties.iter() {
            sqlx::query(
                "INSERT INTO buildset_properties (buildset_id, property_name, property_value, source) VALUES ($1, $2, $3, $4)",
            )
            .bind(buildset.id.get())
            .bind(name)
            .bind(&prop.value)
            .bind(&prop.source)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Database(e.to_string()))?;

        debug!(buildset_id = %buildset.id, ssid = %ssid, builder, "Buildset recorded");
        Ok(buildset)
    }
}

#[async_trait]
impl BuildsetCompleter for PgBuildsetRepository {
    async fn complete_buildset(&self, id: BuildsetId, result: BuildResult) -> Result<Buildset> {
        let row = sqlx::query(&format!(
            "UPDATE buildsets SET complete = TRUE, results = $2, completed_at = NOW() WHERE id = $1 AND NOT complete RETURNING {}",
            BUILDSET_COLUMNS
        ))
        .bind(id.get())
        .bind(result.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        match row {
            Some(r) => Self::row_to_buildset(&r),
            None => match self.get_buildset(id).await? {
                Some(_) => Err(Error::BuildsetAlreadyComplete(id.to_string())),
                None => Err(Error::BuildsetNotFound(id.to_string())),
            },
        }
    }
}
