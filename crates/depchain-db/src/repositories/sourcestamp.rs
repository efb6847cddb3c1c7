//! PostgreSQL implementation of SourceStampRepository.

use async_trait::async_trait;
use depchain_core::ids::SourceStampId;
use depchain_core::ports::SourceStampRepository;
use depchain_core::sourcestamp::{NewSourceStamp, SourceStamp};
use depchain_core::{Error, Result};
use sqlx::{PgPool, Row};

/// PostgreSQL implementation of SourceStampRepository.
pub struct PgSourceStampRepository {
    pool: PgPool,
}

impl PgSourceStampRepository {
    /// Create a new PgSourceStampRepository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_stamp(r: &sqlx::postgres::PgRow) -> SourceStamp {
        SourceStamp {
            id: SourceStampId::new(r.get("id")),
            branch: r.get("branch"),
            revision: r.get("revision"),
            repository: r.get("repository"),
            created_at: r.get("created_at"),
        }
    }
}

#[async_trait]
impl SourceStampRepository for PgSourceStampRepository {
    async fn create(&self, stamp: &NewSourceStamp) -> Result<SourceStamp> {
        let row = sqlx::query(
            "INSERT INTO sourcestamps (branch, revision, repository) VALUES ($1, $2, $3) RETURNING id, branch, revision, repository, created_at",
        )
        .bind(&stamp.branch)
        .bind(&stamp.revision)
        .bind(&stamp.repository)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(Self::row_to_stamp(&row))
    }

    async fn get(&self, id: SourceStampId) -> Result<Option<SourceStamp>> {
        let row = sqlx::query(
            "SELECT id, branch, revision, repository, created_at FROM sourcestamps WHERE id = $1",
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_stamp))
    }

    async fn latest(&self, branch: Option<&str>) -> Result<Option<SourceStamp>> {
        let row = sqlx::query(
            "SELECT id, branch, revision, repository, created_at FROM sourcestamps WHERE ($1::TEXT IS NULL OR branch = $1) ORDER BY id DESC LIMIT 1",
        )
        .bind(branch)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        Ok(row.as_ref().map(Self::row_to_stamp))
    }
}
