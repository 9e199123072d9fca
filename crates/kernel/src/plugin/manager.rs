//! Extension lifecycle orchestration.
//!
//! The [`PluginManager`] owns one record per discovered extension and is the
//! only thing that changes extension status. It drives discovery, dependency
//! resolution, activation (migrations, then boot hook, then `enabled`) and
//! the administrative install/enable/disable/uninstall operations.
//!
//! Admin operations take `&mut self`; share the manager behind a
//! `tokio::sync::Mutex` to serialize them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use trellis_sdk::extension::Extension;
use trellis_sdk::types::ExtensionManifest;

use crate::config::ManagerConfig;
use crate::menu::NavigationManager;
use crate::registry::Registries;

use super::boot::BootContext;
use super::dependency::{
    DependencyNode, NodeState, check_dependencies, resolve_activation_order,
};
use super::error::PluginError;
use super::gate::should_auto_install;
use super::loader::ExtensionLoader;
use super::manifest;
use super::migration::{MigrationRunner, RollbackScope};
use super::store::{DesiredState, InMemoryStore, MigrationStore, StatusStore};

/// Lifecycle status of an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionStatus {
    Discovered,
    Enabled,
    Disabled,
    Failed,
}

impl fmt::Display for ExtensionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Discovered => "discovered",
            Self::Enabled => "enabled",
            Self::Disabled => "disabled",
            Self::Failed => "failed",
        })
    }
}

struct ExtensionRecord {
    /// `None` when the manifest could not be parsed.
    manifest: Option<ExtensionManifest>,
    dir: PathBuf,
    status: ExtensionStatus,
    /// Persisted desired state; `None` means never installed.
    desired: Option<DesiredState>,
    failure: Option<String>,
    extension: Option<Arc<dyn Extension>>,
}

impl ExtensionRecord {
    fn installed(&self) -> bool {
        self.desired.is_some_and(DesiredState::is_installed)
    }

    fn discovered(manifest: ExtensionManifest, dir: PathBuf, desired: Option<DesiredState>) -> Self {
        let status = match desired {
            Some(DesiredState::Disabled) => ExtensionStatus::Disabled,
            _ => ExtensionStatus::Discovered,
        };
        Self {
            manifest: Some(manifest),
            dir,
            status,
            desired,
            failure: None,
            extension: None,
        }
    }

    fn broken(dir: PathBuf, reason: String, desired: Option<DesiredState>) -> Self {
        Self {
            manifest: None,
            dir,
            status: ExtensionStatus::Failed,
            desired,
            failure: Some(reason),
            extension: None,
        }
    }
}

/// Read-only view of an extension for admin listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: String,
    pub status: ExtensionStatus,
    pub installed: bool,
    pub dependencies: Vec<String>,
    pub failure: Option<String>,
    pub dir: PathBuf,
}

/// Outcome of an activation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivationReport {
    /// Extensions enabled in this pass, in activation order.
    pub activated: Vec<String>,
    /// Extensions that failed, with the reason.
    pub failed: BTreeMap<String, String>,
    /// Candidates left `discovered` because the pass was cancelled.
    pub pending: Vec<String>,
    pub cancelled: bool,
}

/// Counts returned by [`PluginManager::stats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    pub discovered: usize,
    pub failed: usize,
    pub by_category: BTreeMap<String, usize>,
}

/// Discovers, orders and activates extensions.
pub struct PluginManager {
    config: ManagerConfig,
    records: BTreeMap<String, ExtensionRecord>,
    registries: Arc<Registries>,
    navigation: Arc<NavigationManager>,
    runner: MigrationRunner,
    status_store: Arc<dyn StatusStore>,
    loader: ExtensionLoader,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("config", &self.config)
            .field("extensions", &self.records.keys().collect::<Vec<_>>())
            .field("loader", &self.loader)
            .finish()
    }
}

impl PluginManager {
    pub fn new(
        config: ManagerConfig,
        registries: Arc<Registries>,
        navigation: Arc<NavigationManager>,
        status_store: Arc<dyn StatusStore>,
        migration_store: Arc<dyn MigrationStore>,
        loader: ExtensionLoader,
    ) -> Self {
        let runner = MigrationRunner::new(migration_store, config.migration_timeout);
        Self {
            config,
            records: BTreeMap::new(),
            registries,
            navigation,
            runner,
            status_store,
            loader,
        }
    }

    /// A manager with fresh registries and process-local state.
    pub fn in_memory(config: ManagerConfig, loader: ExtensionLoader) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::new(
            config,
            Arc::new(Registries::new()),
            Arc::new(NavigationManager::new()),
            store.clone(),
            store,
            loader,
        )
    }

    pub fn registries(&self) -> &Arc<Registries> {
        &self.registries
    }

    pub fn navigation(&self) -> &Arc<NavigationManager> {
        &self.navigation
    }

    pub fn migration_runner(&self) -> &MigrationRunner {
        &self.runner
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Discover and activate everything eligible.
    pub async fn boot(&mut self, cancel: &CancellationToken) -> Result<ActivationReport, PluginError> {
        self.discover().await?;
        Ok(self.activate_all(cancel).await)
    }

    /// Scan the extensions directory and refresh extension records.
    ///
    /// A broken manifest marks only its own directory failed. Enabled
    /// extensions are left exactly as they are. Returns the number of
    /// manifests parsed successfully.
    pub async fn discover(&mut self) -> Result<usize, PluginError> {
        let persisted: BTreeMap<String, DesiredState> = self
            .status_store
            .load_all()
            .await
            .map_err(|e| PluginError::StoreUnavailable {
                details: e.to_string(),
            })?
            .into_iter()
            .map(|row| (row.extension, row.state))
            .collect();

        let root = self.config.extensions_dir.clone();
        let mut seen: BTreeMap<String, PathBuf> = BTreeMap::new();
        let mut parsed = 0;

        for dir in extension_dirs(&root) {
            let dir_id = dir
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or("unknown")
                .to_string();

            let outcome = manifest::find_manifest(&dir).and_then(|path| manifest::parse(&path));
            match outcome {
                Ok(manifest) => {
                    let id = manifest.id.clone();
                    if let Some(first) = seen.get(&id) {
                        let err = PluginError::DuplicateExtension {
                            extension: id,
                            first: first.display().to_string(),
                            second: dir.display().to_string(),
                        };
                        error!(error = %err, "discovery error");
                        continue;
                    }
                    seen.insert(id.clone(), dir.clone());
                    parsed += 1;

                    if self
                        .records
                        .get(&id)
                        .is_some_and(|r| r.status == ExtensionStatus::Enabled)
                    {
                        continue;
                    }

                    debug!(extension = %id, dir = %dir.display(), "discovered extension");
                    let desired = persisted.get(&id).copied();
                    self.records
                        .insert(id, ExtensionRecord::discovered(manifest, dir, desired));
                }
                Err(err) => {
                    let id = err.extension().unwrap_or(&dir_id).to_string();
                    error!(extension = %id, error = %err, "discovery error");
                    if seen.contains_key(&id) {
                        continue;
                    }
                    seen.insert(id.clone(), dir.clone());

                    if self
                        .records
                        .get(&id)
                        .is_some_and(|r| r.status == ExtensionStatus::Enabled)
                    {
                        continue;
                    }
                    let desired = persisted.get(&id).copied();
                    self.records
                        .insert(id, ExtensionRecord::broken(dir, err.to_string(), desired));
                }
            }
        }

        // Forget extensions whose directories are gone, unless they are running.
        self.records.retain(|id, record| {
            seen.contains_key(id) || record.status == ExtensionStatus::Enabled
        });

        info!(
            dir = %root.display(),
            discovered = parsed,
            records = self.records.len(),
            "extension discovery complete"
        );
        Ok(parsed)
    }

    fn wants_activation(&self, id: &str, record: &ExtensionRecord) -> bool {
        let Some(manifest) = &record.manifest else {
            return false;
        };
        match record.desired {
            Some(DesiredState::Enabled) => true,
            Some(DesiredState::Disabled | DesiredState::Uninstalled) => false,
            None => should_auto_install(
                self.config.auto_install,
                manifest.default_enabled,
                &self.config.disabled_extensions,
                id,
            ),
        }
    }

    /// Dependency graph over every extension with a manifest. Candidates are
    /// chosen by `is_candidate`; enabled extensions satisfy dependents.
    fn dependency_graph(
        &self,
        is_candidate: impl Fn(&str, &ExtensionRecord) -> bool,
    ) -> BTreeMap<String, DependencyNode> {
        self.records
            .iter()
            .filter_map(|(id, record)| {
                let manifest = record.manifest.as_ref()?;
                let state = if record.status == ExtensionStatus::Enabled {
                    NodeState::Enabled
                } else if is_candidate(id, record) {
                    NodeState::Candidate
                } else {
                    NodeState::Unavailable
                };
                Some((
                    id.clone(),
                    DependencyNode {
                        version: manifest.version.clone(),
                        dependencies: manifest.dependencies.clone(),
                        state,
                    },
                ))
            })
            .collect()
    }

    /// Activate every eligible extension in dependency order.
    ///
    /// Cancellation is honoured between activations: extensions already
    /// enabled stay enabled, the rest stay `discovered`.
    pub async fn activate_all(&mut self, cancel: &CancellationToken) -> ActivationReport {
        let mut report = ActivationReport::default();

        let nodes = self.dependency_graph(|id, record| {
            record.status == ExtensionStatus::Discovered && self.wants_activation(id, record)
        });
        let plan = resolve_activation_order(&nodes);

        for (id, err) in plan.failed {
            self.mark_failed(&id, &err);
            report.failed.insert(id, err.to_string());
        }

        let mut order = plan.order.into_iter();
        while let Some(id) = order.next() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                report.pending.push(id);
                report.pending.extend(order.by_ref());
                warn!(pending = report.pending.len(), "activation cancelled");
                break;
            }

            // A dependency may have failed earlier in this pass.
            if let Some(dependency) = self.disabled_dependency(&id) {
                let err = PluginError::DependencyNotEnabled {
                    extension: id.clone(),
                    dependency,
                };
                self.mark_failed(&id, &err);
                report.failed.insert(id, err.to_string());
                continue;
            }

            match self.activate(&id).await {
                Ok(()) => report.activated.push(id),
                Err(err) => {
                    self.mark_failed(&id, &err);
                    report.failed.insert(id, err.to_string());
                }
            }
        }

        info!(
            activated = report.activated.len(),
            failed = report.failed.len(),
            pending = report.pending.len(),
            "extension activation complete"
        );
        report
    }

    fn disabled_dependency(&self, id: &str) -> Option<String> {
        let manifest = self.records.get(id)?.manifest.as_ref()?;
        manifest
            .dependencies
            .keys()
            .find(|dep| {
                self.records
                    .get(dep.as_str())
                    .is_none_or(|r| r.status != ExtensionStatus::Enabled)
            })
            .cloned()
    }

    /// Run migrations, the boot hook, then persist `enabled`.
    async fn activate(&mut self, id: &str) -> Result<(), PluginError> {
        let (manifest, dir) = {
            let record = self.records.get(id).ok_or_else(|| PluginError::NotFound {
                extension: id.to_string(),
            })?;
            let manifest = record.manifest.clone().ok_or_else(|| PluginError::Unavailable {
                extension: id.to_string(),
                reason: record.failure.clone().unwrap_or_default(),
            })?;
            (manifest, record.dir.clone())
        };

        let extension = self.loader.load(&manifest, &dir)?;

        let applied = self
            .runner
            .apply_with_timeout(id, &extension.migrations())
            .await?;

        let mut ctx = BootContext::new(
            id,
            &self.registries,
            &self.navigation,
            self.config.strict_registration,
        );
        let booted = extension
            .boot(&mut ctx)
            .map_err(|e| PluginError::BootFailed {
                extension: id.to_string(),
                details: e.to_string(),
            })
            .and_then(|()| ctx.commit(&manifest));

        let summary = match booted {
            Ok(summary) => summary,
            Err(err) => {
                self.withdraw(id);
                return Err(err);
            }
        };

        if let Err(e) = self
            .status_store
            .set(id, DesiredState::Enabled, &manifest.version)
            .await
        {
            self.withdraw(id);
            return Err(PluginError::store(id, e));
        }

        if let Some(record) = self.records.get_mut(id) {
            record.status = ExtensionStatus::Enabled;
            record.desired = Some(DesiredState::Enabled);
            record.failure = None;
            record.extension = Some(extension);
        }

        info!(
            extension = id,
            version = %manifest.version,
            migrations = applied.len(),
            templates = summary.templates,
            layouts = summary.layouts,
            blocks = summary.blocks,
            navigation = summary.navigation,
            "extension enabled"
        );
        Ok(())
    }

    /// Remove every registry and navigation contribution of `id`.
    fn withdraw(&self, id: &str) {
        let descriptors = self.registries.unregister_extension(id);
        let items = self.navigation.remove_items(id);
        debug!(extension = id, descriptors, items, "withdrew contributions");
    }

    fn mark_failed(&mut self, id: &str, err: &PluginError) {
        error!(extension = id, error = %err, "extension failed");
        if let Some(record) = self.records.get_mut(id) {
            record.status = ExtensionStatus::Failed;
            record.failure = Some(err.to_string());
            record.extension = None;
        }
    }

    fn record(&self, id: &str) -> Result<&ExtensionRecord, PluginError> {
        self.records.get(id).ok_or_else(|| PluginError::NotFound {
            extension: id.to_string(),
        })
    }

    /// Require that every dependency of `id` is enabled and version-compatible.
    fn require_dependencies(&self, id: &str, manifest: &ExtensionManifest) -> Result<(), PluginError> {
        let nodes = self.dependency_graph(|_, _| false);
        check_dependencies(id, &manifest.dependencies, &nodes)
    }

    fn enabled_dependents(&self, id: &str) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, r)| r.status == ExtensionStatus::Enabled)
            .filter(|(_, r)| {
                r.manifest
                    .as_ref()
                    .is_some_and(|m| m.dependencies.contains_key(id))
            })
            .map(|(dependent, _)| dependent.clone())
            .collect()
    }

    fn activatable_manifest(&self, id: &str) -> Result<ExtensionManifest, PluginError> {
        let record = self.record(id)?;
        record.manifest.clone().ok_or_else(|| PluginError::Unavailable {
            extension: id.to_string(),
            reason: record.failure.clone().unwrap_or_default(),
        })
    }

    async fn activate_or_fail(&mut self, id: &str) -> Result<(), PluginError> {
        match self.activate(id).await {
            Ok(()) => Ok(()),
            Err(err) => {
                self.mark_failed(id, &err);
                Err(err)
            }
        }
    }

    /// Install a discovered extension that was never installed or has
    /// been uninstalled.
    pub async fn install(&mut self, id: &str) -> Result<(), PluginError> {
        let manifest = self.activatable_manifest(id)?;
        let record = self.record(id)?;
        if record.installed() || record.status == ExtensionStatus::Enabled {
            return Err(PluginError::AlreadyInstalled {
                extension: id.to_string(),
            });
        }
        self.require_dependencies(id, &manifest)?;

        self.activate_or_fail(id).await?;
        info!(extension = id, "extension installed");
        Ok(())
    }

    /// Re-enable an installed extension.
    pub async fn enable(&mut self, id: &str) -> Result<(), PluginError> {
        let manifest = self.activatable_manifest(id)?;
        let record = self.record(id)?;
        if record.status == ExtensionStatus::Enabled {
            return Err(PluginError::AlreadyEnabled {
                extension: id.to_string(),
            });
        }
        if !record.installed() {
            return Err(PluginError::NotInstalled {
                extension: id.to_string(),
            });
        }
        self.require_dependencies(id, &manifest)?;

        self.activate_or_fail(id).await
    }

    /// Withdraw an enabled extension's contributions and persist `disabled`.
    ///
    /// Migrations are left applied.
    pub async fn disable(&mut self, id: &str) -> Result<(), PluginError> {
        let record = self.record(id)?;
        if record.status != ExtensionStatus::Enabled {
            return Err(PluginError::NotEnabled {
                extension: id.to_string(),
            });
        }
        let dependents = self.enabled_dependents(id);
        if !dependents.is_empty() {
            return Err(PluginError::has_dependents(id, &dependents));
        }

        self.deactivate(id).await?;
        info!(extension = id, "extension disabled");
        Ok(())
    }

    async fn deactivate(&mut self, id: &str) -> Result<(), PluginError> {
        self.withdraw(id);

        let version = {
            let record = self.records.get_mut(id).ok_or_else(|| PluginError::NotFound {
                extension: id.to_string(),
            })?;
            if let Some(extension) = record.extension.take() {
                extension.shutdown();
            }
            record.status = ExtensionStatus::Disabled;
            record.desired = Some(DesiredState::Disabled);
            record
                .manifest
                .as_ref()
                .map(|m| m.version.clone())
                .unwrap_or_default()
        };

        self.status_store
            .set(id, DesiredState::Disabled, &version)
            .await
            .map_err(|e| PluginError::store(id, e))
    }

    /// Disable (if enabled), roll back every migration, and forget the
    /// extension. Its files stay on disk; `uninstalled` is persisted so a
    /// later discovery does not auto-install it again.
    pub async fn uninstall(&mut self, id: &str) -> Result<(), PluginError> {
        let record = self.record(id)?;
        if !record.installed() && record.status != ExtensionStatus::Enabled {
            return Err(PluginError::NotInstalled {
                extension: id.to_string(),
            });
        }

        if record.status == ExtensionStatus::Enabled {
            let dependents = self.enabled_dependents(id);
            if !dependents.is_empty() {
                return Err(PluginError::has_dependents(id, &dependents));
            }
            self.deactivate(id).await?;
        }

        let manifest = self.record(id)?.manifest.clone();
        let version = manifest
            .as_ref()
            .map(|m| m.version.clone())
            .unwrap_or_default();
        let migrations = match manifest {
            Some(manifest) => {
                let dir = self.record(id)?.dir.clone();
                match self.loader.load(&manifest, &dir) {
                    Ok(extension) => extension.migrations(),
                    Err(e) => {
                        warn!(extension = id, error = %e, "cannot load extension, dropping migration records without revert");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        let reverted = self
            .runner
            .rollback(id, RollbackScope::All, &migrations)
            .await?;

        self.status_store
            .set(id, DesiredState::Uninstalled, &version)
            .await
            .map_err(|e| PluginError::store(id, e))?;
        self.records.remove(id);

        info!(extension = id, reverted = reverted.len(), "extension uninstalled");
        Ok(())
    }

    pub fn status(&self, id: &str) -> Option<ExtensionStatus> {
        self.records.get(id).map(|r| r.status)
    }

    /// Failure reason recorded for `id`, if it failed.
    pub fn failure(&self, id: &str) -> Option<&str> {
        self.records.get(id).and_then(|r| r.failure.as_deref())
    }

    pub fn get(&self, id: &str) -> Option<ExtensionSummary> {
        self.records.get(id).map(|r| summarize(id, r))
    }

    /// Every known extension, sorted by id.
    pub fn list(&self) -> Vec<ExtensionSummary> {
        self.records
            .iter()
            .map(|(id, record)| summarize(id, record))
            .collect()
    }

    /// Ids of enabled extensions, sorted.
    pub fn enabled(&self) -> Vec<String> {
        self.records
            .iter()
            .filter(|(_, r)| r.status == ExtensionStatus::Enabled)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            total: self.records.len(),
            ..ManagerStats::default()
        };
        for record in self.records.values() {
            match record.status {
                ExtensionStatus::Enabled => stats.enabled += 1,
                ExtensionStatus::Disabled => stats.disabled += 1,
                ExtensionStatus::Discovered => stats.discovered += 1,
                ExtensionStatus::Failed => stats.failed += 1,
            }
            let category = record
                .manifest
                .as_ref()
                .map(|m| m.category.clone())
                .unwrap_or_else(|| "unknown".to_string());
            *stats.by_category.entry(category).or_default() += 1;
        }
        stats
    }
}

fn summarize(id: &str, record: &ExtensionRecord) -> ExtensionSummary {
    let manifest = record.manifest.as_ref();
    ExtensionSummary {
        id: id.to_string(),
        name: manifest.map(|m| m.name.clone()).unwrap_or_else(|| id.to_string()),
        version: manifest.map(|m| m.version.clone()).unwrap_or_default(),
        category: manifest.map(|m| m.category.clone()).unwrap_or_default(),
        status: record.status,
        installed: record.installed(),
        dependencies: manifest
            .map(|m| m.dependencies.keys().cloned().collect())
            .unwrap_or_default(),
        failure: record.failure.clone(),
        dir: record.dir.clone(),
    }
}

/// Sub-directories of `root`, sorted by name.
fn extension_dirs(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        info!(dir = %root.display(), "extensions directory does not exist, nothing to discover");
        return Vec::new();
    }

    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %root.display(), error = %e, "failed to read extensions directory");
            return Vec::new();
        }
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}
