//! Persisted extension state.
//!
//! Two keyed stores back the plugin manager: desired extension status
//! (enabled/disabled/uninstalled, keyed by extension id) and applied migrations (an
//! ordered list of records per extension). Both are traits so the
//! PostgreSQL implementation can be swapped for [`InMemoryStore`] in tests
//! and in database-less mode.

use std::fmt;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;

/// Errors from a state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

/// Desired state of an extension the administrator has acted on.
///
/// `Uninstalled` keeps an uninstalled extension from being auto-installed
/// again when its files are rediscovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    Enabled,
    Disabled,
    Uninstalled,
}

impl DesiredState {
    /// Integer column value.
    pub fn as_i16(self) -> i16 {
        match self {
            Self::Disabled => 0,
            Self::Enabled => 1,
            Self::Uninstalled => 2,
        }
    }

    pub fn from_i16(value: i16) -> Self {
        match value {
            1 => Self::Enabled,
            2 => Self::Uninstalled,
            _ => Self::Disabled,
        }
    }

    pub fn is_installed(self) -> bool {
        self != Self::Uninstalled
    }
}

impl fmt::Display for DesiredState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled => f.write_str("enabled"),
            Self::Disabled => f.write_str("disabled"),
            Self::Uninstalled => f.write_str("uninstalled"),
        }
    }
}

/// A persisted status row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    pub extension: String,
    pub state: DesiredState,
    pub version: String,
    pub installed_at: i64,
    pub updated_at: i64,
}

/// A persisted applied-migration row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub migration: String,
    pub batch: i32,
    pub applied_at: i64,
}

/// Extension id → desired state.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// All rows, ordered by extension id.
    async fn load_all(&self) -> Result<Vec<StatusRecord>, StoreError>;

    /// Insert or update. `installed_at` is kept on update unless the row
    /// was `uninstalled`.
    async fn set(&self, extension: &str, state: DesiredState, version: &str)
    -> Result<(), StoreError>;
}

/// Extension id → ordered applied migrations.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    /// Records for one extension, in application order.
    async fn applied(&self, extension: &str) -> Result<Vec<MigrationRecord>, StoreError>;

    async fn record(&self, extension: &str, migration: &str, batch: i32) -> Result<(), StoreError>;

    async fn remove(&self, extension: &str, migration: &str) -> Result<(), StoreError>;
}

/// Process-local store for tests and database-less mode.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    statuses: DashMap<String, StatusRecord>,
    migrations: DashMap<String, Vec<MigrationRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatusStore for InMemoryStore {
    async fn load_all(&self) -> Result<Vec<StatusRecord>, StoreError> {
        let mut rows: Vec<StatusRecord> = self.statuses.iter().map(|r| r.value().clone()).collect();
        rows.sort_by(|a, b| a.extension.cmp(&b.extension));
        Ok(rows)
    }

    async fn set(
        &self,
        extension: &str,
        state: DesiredState,
        version: &str,
    ) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        self.statuses
            .entry(extension.to_string())
            .and_modify(|row| {
                if !row.state.is_installed() {
                    row.installed_at = now;
                }
                row.state = state;
                row.version = version.to_string();
                row.updated_at = now;
            })
            .or_insert_with(|| StatusRecord {
                extension: extension.to_string(),
                state,
                version: version.to_string(),
                installed_at: now,
                updated_at: now,
            });
        Ok(())
    }
}

#[async_trait]
impl MigrationStore for InMemoryStore {
    async fn applied(&self, extension: &str) -> Result<Vec<MigrationRecord>, StoreError> {
        Ok(self
            .migrations
            .get(extension)
            .map(|records| records.clone())
            .unwrap_or_default())
    }

    async fn record(&self, extension: &str, migration: &str, batch: i32) -> Result<(), StoreError> {
        self.migrations
            .entry(extension.to_string())
            .or_default()
            .push(MigrationRecord {
                migration: migration.to_string(),
                batch,
                applied_at: chrono::Utc::now().timestamp(),
            });
        Ok(())
    }

    async fn remove(&self, extension: &str, migration: &str) -> Result<(), StoreError> {
        if let Some(mut records) = self.migrations.get_mut(extension) {
            records.retain(|r| r.migration != migration);
        }
        self.migrations.remove_if(extension, |_, records| records.is_empty());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_set_keeps_installed_at() {
        let store = InMemoryStore::new();
        store.set("blog", DesiredState::Enabled, "1.0.0").await.unwrap();
        let first = store.load_all().await.unwrap().remove(0);

        store.set("blog", DesiredState::Disabled, "1.1.0").await.unwrap();
        let second = store.load_all().await.unwrap().remove(0);

        assert_eq!(second.state, DesiredState::Disabled);
        assert_eq!(second.version, "1.1.0");
        assert_eq!(second.installed_at, first.installed_at);
    }

    #[tokio::test]
    async fn uninstalled_rows_are_kept() {
        let store = InMemoryStore::new();
        store.set("blog", DesiredState::Enabled, "1.0.0").await.unwrap();
        store.set("blog", DesiredState::Uninstalled, "1.0.0").await.unwrap();

        let rows = store.load_all().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, DesiredState::Uninstalled);
        assert!(!rows[0].state.is_installed());
    }

    #[tokio::test]
    async fn migration_records_are_scoped_per_extension() {
        let store = InMemoryStore::new();
        store.record("a", "001", 1).await.unwrap();
        store.record("a", "002", 1).await.unwrap();
        store.record("b", "001", 1).await.unwrap();

        MigrationStore::remove(&store, "a", "001").await.unwrap();

        let a: Vec<_> = store.applied("a").await.unwrap().into_iter().map(|r| r.migration).collect();
        assert_eq!(a, vec!["002"]);
        assert_eq!(store.applied("b").await.unwrap().len(), 1);
    }

    #[test]
    fn desired_state_column_round_trip() {
        assert_eq!(DesiredState::from_i16(DesiredState::Enabled.as_i16()), DesiredState::Enabled);
        assert_eq!(DesiredState::from_i16(0), DesiredState::Disabled);
        assert_eq!(
            DesiredState::from_i16(DesiredState::Uninstalled.as_i16()),
            DesiredState::Uninstalled
        );
        assert_eq!(DesiredState::Disabled.to_string(), "disabled");
    }
}
