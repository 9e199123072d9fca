//! Extension migration runner.
//!
//! Applies an extension's declared migrations in order, recording each one
//! in the [`MigrationStore`] as soon as it succeeds. There is no transaction
//! spanning the batch: when a step fails, the steps before it stay applied
//! and recorded. Rollback walks the records in reverse application order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};
use trellis_sdk::extension::Migration;

use super::error::PluginError;
use super::store::{MigrationRecord, MigrationStore};

/// How much to roll back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackScope {
    /// The `n` most recently applied migrations.
    Steps(usize),
    All,
}

/// One line of [`MigrationRunner::status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub migration: String,
    pub applied: bool,
    pub batch: Option<i32>,
}

/// Runs migrations against a keyed store of applied records.
#[derive(Clone)]
pub struct MigrationRunner {
    store: Arc<dyn MigrationStore>,
    timeout: Duration,
}

impl MigrationRunner {
    pub fn new(store: Arc<dyn MigrationStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Per-extension time limit applied by [`MigrationRunner::apply_with_timeout`].
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn records(&self, extension: &str) -> Result<Vec<MigrationRecord>, PluginError> {
        self.store
            .applied(extension)
            .await
            .map_err(|e| PluginError::store(extension, e))
    }

    /// Run every migration not yet recorded for `extension`, in declared order.
    ///
    /// Returns the ids newly applied.
    pub async fn apply(
        &self,
        extension: &str,
        migrations: &[Arc<dyn Migration>],
    ) -> Result<Vec<String>, PluginError> {
        reject_duplicates(extension, migrations)?;
        if migrations.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.records(extension).await?;
        let applied: HashSet<&str> = records.iter().map(|r| r.migration.as_str()).collect();
        let pending: Vec<&Arc<dyn Migration>> = migrations
            .iter()
            .filter(|m| !applied.contains(m.id()))
            .collect();

        if pending.is_empty() {
            debug!(extension, "no pending migrations");
            return Ok(Vec::new());
        }

        let batch = records.iter().map(|r| r.batch).max().unwrap_or(0) + 1;
        info!(
            extension,
            count = pending.len(),
            batch,
            "running pending migrations"
        );

        let mut newly_applied = Vec::with_capacity(pending.len());
        for migration in pending {
            debug!(extension, migration = %migration.id(), "executing migration");

            migration
                .apply()
                .await
                .map_err(|e| PluginError::migration_failed(extension, migration.id(), e))?;

            self.store
                .record(extension, migration.id(), batch)
                .await
                .map_err(|e| PluginError::store(extension, e))?;

            newly_applied.push(migration.id().to_string());
        }

        info!(extension, applied = newly_applied.len(), "migrations complete");
        Ok(newly_applied)
    }

    /// [`MigrationRunner::apply`] bounded by the configured timeout.
    ///
    /// Migrations that finished before the deadline stay recorded.
    pub async fn apply_with_timeout(
        &self,
        extension: &str,
        migrations: &[Arc<dyn Migration>],
    ) -> Result<Vec<String>, PluginError> {
        match tokio::time::timeout(self.timeout, self.apply(extension, migrations)).await {
            Ok(result) => result,
            Err(_) => Err(PluginError::MigrationTimeout {
                extension: extension.to_string(),
                seconds: self.timeout.as_secs(),
            }),
        }
    }

    /// Revert the most recently applied migrations, newest first.
    ///
    /// Each record is removed as soon as its revert succeeds. A record with
    /// no matching migration is dropped with a warning. Returns the ids
    /// rolled back.
    pub async fn rollback(
        &self,
        extension: &str,
        scope: RollbackScope,
        migrations: &[Arc<dyn Migration>],
    ) -> Result<Vec<String>, PluginError> {
        let records = self.records(extension).await?;
        let take = match scope {
            RollbackScope::Steps(n) => n.min(records.len()),
            RollbackScope::All => records.len(),
        };

        let by_id: HashMap<&str, &Arc<dyn Migration>> =
            migrations.iter().map(|m| (m.id(), m)).collect();

        let mut reverted = Vec::with_capacity(take);
        for record in records.iter().rev().take(take) {
            match by_id.get(record.migration.as_str()) {
                Some(migration) => {
                    debug!(extension, migration = %record.migration, "reverting migration");
                    migration.revert().await.map_err(|e| {
                        PluginError::migration_failed(extension, &record.migration, e)
                    })?;
                }
                None => warn!(
                    extension,
                    migration = %record.migration,
                    "applied migration no longer declared, removing record without revert"
                ),
            }

            self.store
                .remove(extension, &record.migration)
                .await
                .map_err(|e| PluginError::store(extension, e))?;
            reverted.push(record.migration.clone());
        }

        if !reverted.is_empty() {
            info!(extension, reverted = reverted.len(), "rollback complete");
        }
        Ok(reverted)
    }

    /// Every declared migration with its applied state.
    pub async fn status(
        &self,
        extension: &str,
        migrations: &[Arc<dyn Migration>],
    ) -> Result<Vec<MigrationStatus>, PluginError> {
        let records = self.records(extension).await?;
        let batches: HashMap<&str, i32> = records
            .iter()
            .map(|r| (r.migration.as_str(), r.batch))
            .collect();

        Ok(migrations
            .iter()
            .map(|m| {
                let batch = batches.get(m.id()).copied();
                MigrationStatus {
                    migration: m.id().to_string(),
                    applied: batch.is_some(),
                    batch,
                }
            })
            .collect())
    }

    pub async fn has_pending(
        &self,
        extension: &str,
        migrations: &[Arc<dyn Migration>],
    ) -> Result<bool, PluginError> {
        Ok(self
            .status(extension, migrations)
            .await?
            .iter()
            .any(|s| !s.applied))
    }

    /// Number of applied-migration records for `extension`.
    pub async fn applied_count(&self, extension: &str) -> Result<usize, PluginError> {
        Ok(self.records(extension).await?.len())
    }
}

fn reject_duplicates(extension: &str, migrations: &[Arc<dyn Migration>]) -> Result<(), PluginError> {
    let mut seen = HashSet::new();
    for migration in migrations {
        if !seen.insert(migration.id()) {
            return Err(PluginError::DuplicateMigration {
                extension: extension.to_string(),
                migration: migration.id().to_string(),
            });
        }
    }
    Ok(())
}
