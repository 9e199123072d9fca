//! Turns discovered manifests into [`Extension`] instances.
//!
//! Compiled-in extensions register a factory keyed by id. Anything without
//! a factory loads as a [`DeclarativeExtension`] whose boot hook registers
//! the descriptors and navigation written inline in its manifest.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use sqlx::PgPool;
use trellis_sdk::extension::{BootError, Extension, Migration, Registrar};
use trellis_sdk::types::ExtensionManifest;

use super::error::PluginError;
use super::pg::SqlFileMigration;

/// Builds an extension from its manifest and directory.
pub type ExtensionFactory = Arc<
    dyn Fn(&ExtensionManifest, &Path) -> Result<Arc<dyn Extension>, BootError> + Send + Sync,
>;

/// Registry of extension factories.
#[derive(Default, Clone)]
pub struct ExtensionLoader {
    factories: HashMap<String, ExtensionFactory>,
    pool: Option<PgPool>,
}

impl fmt::Debug for ExtensionLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<&String> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("ExtensionLoader")
            .field("factories", &ids)
            .field("pool", &self.pool.is_some())
            .finish()
    }
}

impl ExtensionLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool used to run declarative extensions' SQL migrations.
    pub fn with_pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Register a factory for a compiled-in extension.
    pub fn register<F>(&mut self, id: impl Into<String>, factory: F)
    where
        F: Fn(&ExtensionManifest, &Path) -> Result<Arc<dyn Extension>, BootError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
    }

    /// Register an already-built extension under its manifest id.
    pub fn register_instance(&mut self, extension: Arc<dyn Extension>) {
        let id = extension.manifest().id.clone();
        self.register(id, move |_, _| Ok(Arc::clone(&extension)));
    }

    pub fn has_factory(&self, id: &str) -> bool {
        self.factories.contains_key(id)
    }

    /// Build the extension for `manifest`, checking it reports the same id.
    pub fn load(
        &self,
        manifest: &ExtensionManifest,
        dir: &Path,
    ) -> Result<Arc<dyn Extension>, PluginError> {
        let extension = match self.factories.get(&manifest.id) {
            Some(factory) => factory(manifest, dir).map_err(|e| PluginError::LoadFailed {
                extension: manifest.id.clone(),
                details: e.to_string(),
            })?,
            None => Arc::new(DeclarativeExtension::new(
                manifest.clone(),
                dir,
                self.pool.as_ref(),
            )?),
        };

        let loaded_id = &extension.manifest().id;
        if loaded_id != &manifest.id {
            return Err(PluginError::LoadFailed {
                extension: manifest.id.clone(),
                details: format!("loaded extension reports id '{loaded_id}'"),
            });
        }

        Ok(extension)
    }
}

/// An extension defined entirely by its manifest.
pub struct DeclarativeExtension {
    manifest: ExtensionManifest,
    migrations: Vec<Arc<dyn Migration>>,
}

impl fmt::Debug for DeclarativeExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeclarativeExtension")
            .field("id", &self.manifest.id)
            .field("migrations", &self.migrations.len())
            .finish()
    }
}

impl DeclarativeExtension {
    pub fn new(
        manifest: ExtensionManifest,
        dir: &Path,
        pool: Option<&PgPool>,
    ) -> Result<Self, PluginError> {
        let files = &manifest.migrations.files;
        let migrations: Vec<Arc<dyn Migration>> = match (files.is_empty(), pool) {
            (true, _) => Vec::new(),
            (false, None) => {
                return Err(PluginError::LoadFailed {
                    extension: manifest.id.clone(),
                    details: "declares migrations but no database is configured".to_string(),
                });
            }
            (false, Some(pool)) => {
                let migration_dir = match &manifest.migrations.path {
                    Some(path) => dir.join(path),
                    None => dir.to_path_buf(),
                };
                files
                    .iter()
                    .map(|file| {
                        Arc::new(SqlFileMigration::new(&migration_dir, file, pool.clone()))
                            as Arc<dyn Migration>
                    })
                    .collect()
            }
        };

        Ok(Self {
            manifest,
            migrations,
        })
    }
}

impl Extension for DeclarativeExtension {
    fn manifest(&self) -> &ExtensionManifest {
        &self.manifest
    }

    fn boot(&self, registrar: &mut dyn Registrar) -> Result<(), BootError> {
        for layout in &self.manifest.layouts {
            registrar.register_layout(layout.clone())?;
        }
        for block in &self.manifest.blocks {
            registrar.register_block(block.clone())?;
        }
        for template in &self.manifest.templates {
            registrar.register_template(template.clone())?;
        }
        if !self.manifest.navigation.is_empty() {
            registrar.register_navigation(self.manifest.navigation.clone())?;
        }
        Ok(())
    }

    fn migrations(&self) -> Vec<Arc<dyn Migration>> {
        self.migrations.clone()
    }
}
