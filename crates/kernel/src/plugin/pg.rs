//! PostgreSQL-backed state stores and SQL file migrations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Row};
use tracing::{debug, warn};
use trellis_sdk::extension::{Migration, MigrationError};

use super::store::{
    DesiredState, MigrationRecord, MigrationStore, StatusRecord, StatusStore, StoreError,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS extension_status (
    extension VARCHAR(64) PRIMARY KEY,
    status SMALLINT NOT NULL,
    version VARCHAR(32) NOT NULL,
    installed_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS extension_migration (
    id BIGSERIAL PRIMARY KEY,
    extension VARCHAR(64) NOT NULL,
    migration VARCHAR(255) NOT NULL,
    batch INTEGER NOT NULL,
    applied_at BIGINT NOT NULL,
    UNIQUE (extension, migration)
);
"#;

/// Status and migration stores on a shared pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct StatusRow {
    extension: String,
    status: i16,
    version: String,
    installed_at: i64,
    updated_at: i64,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the tracking tables if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl StatusStore for PgStore {
    async fn load_all(&self) -> Result<Vec<StatusRecord>, StoreError> {
        let rows = sqlx::query_as::<_, StatusRow>(
            "SELECT extension, status, version, installed_at, updated_at \
             FROM extension_status ORDER BY extension",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StatusRecord {
                extension: row.extension,
                state: DesiredState::from_i16(row.status),
                version: row.version,
                installed_at: row.installed_at,
                updated_at: row.updated_at,
            })
            .collect())
    }

    async fn set(
        &self,
        extension: &str,
        state: DesiredState,
        version: &str,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO extension_status (extension, status, version, installed_at, updated_at) \
             VALUES ($1, $2, $3, $4, $4) \
             ON CONFLICT (extension) DO UPDATE SET status = $2, version = $3, updated_at = $4, \
             installed_at = CASE WHEN extension_status.status = $5 THEN $4 \
             ELSE extension_status.installed_at END",
        )
        .bind(extension)
        .bind(state.as_i16())
        .bind(version)
        .bind(now)
        .bind(DesiredState::Uninstalled.as_i16())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl MigrationStore for PgStore {
    async fn applied(&self, extension: &str) -> Result<Vec<MigrationRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT migration, batch, applied_at FROM extension_migration \
             WHERE extension = $1 ORDER BY id",
        )
        .bind(extension)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| MigrationRecord {
                migration: r.get("migration"),
                batch: r.get("batch"),
                applied_at: r.get("applied_at"),
            })
            .collect())
    }

    async fn record(&self, extension: &str, migration: &str, batch: i32) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO extension_migration (extension, migration, batch, applied_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(extension)
        .bind(migration)
        .bind(batch)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, extension: &str, migration: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM extension_migration WHERE extension = $1 AND migration = $2")
            .bind(extension)
            .bind(migration)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// A migration backed by a `.sql` file; the revert lives in `<stem>.down.sql`.
#[derive(Debug, Clone)]
pub struct SqlFileMigration {
    id: String,
    up: PathBuf,
    down: PathBuf,
    pool: PgPool,
}

impl SqlFileMigration {
    /// `file` is the declared name, relative to `dir`; it doubles as the id.
    pub fn new(dir: &Path, file: &str, pool: PgPool) -> Self {
        let up = dir.join(file);
        let stem = file.strip_suffix(".sql").unwrap_or(file);
        let down = dir.join(format!("{stem}.down.sql"));
        Self {
            id: file.to_string(),
            up,
            down,
            pool,
        }
    }

    async fn execute(&self, path: &Path) -> Result<(), MigrationError> {
        let sql = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| MigrationError::new(format!("failed to read {}: {e}", path.display())))?;

        // raw_sql: migration files hold several statements.
        sqlx::raw_sql(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| MigrationError::new(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Migration for SqlFileMigration {
    fn id(&self) -> &str {
        &self.id
    }

    async fn apply(&self) -> Result<(), MigrationError> {
        debug!(migration = %self.id, path = %self.up.display(), "applying sql migration");
        self.execute(&self.up).await
    }

    async fn revert(&self) -> Result<(), MigrationError> {
        if !tokio::fs::try_exists(&self.down).await.unwrap_or(false) {
            warn!(
                migration = %self.id,
                path = %self.down.display(),
                "no down migration file, nothing to revert"
            );
            return Ok(());
        }
        debug!(migration = %self.id, path = %self.down.display(), "reverting sql migration");
        self.execute(&self.down).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    async fn down_file_derived_from_stem() {
        // connect_lazy never touches the network until a query runs.
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/trellis_test")
            .unwrap();
        let migration = SqlFileMigration::new(Path::new("/ext/blog/migrations"), "001_posts.sql", pool);

        assert_eq!(migration.id(), "001_posts.sql");
        assert_eq!(migration.down, Path::new("/ext/blog/migrations/001_posts.down.sql"));
    }

    #[tokio::test]
    async fn missing_down_file_reverts_as_noop() {
        let dir = tempfile::tempdir().unwrap();
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://localhost/trellis_test")
            .unwrap();
        let migration = SqlFileMigration::new(dir.path(), "001_posts.sql", pool);

        assert!(migration.revert().await.is_ok());
    }
}
