//! Shared setup for kernel integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;
use trellis_kernel::config::ManagerConfig;
use trellis_kernel::menu::NavigationManager;
use trellis_kernel::plugin::{ExtensionLoader, ExtensionStatus, InMemoryStore, PluginManager};
use trellis_kernel::registry::Registries;
use trellis_sdk::extension::Extension;
use trellis_test_utils::{StubExtension, manifest_toml, write_manifest};

/// A throwaway extensions directory plus the loader that knows its stubs.
pub struct Harness {
    pub dir: TempDir,
    pub loader: ExtensionLoader,
    pub store: Arc<InMemoryStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
            loader: ExtensionLoader::new(),
            store: Arc::new(InMemoryStore::new()),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Put a stub on disk and make the loader return it.
    pub fn add(&mut self, stub: &StubExtension) {
        let manifest = stub.manifest();
        let dependencies: Vec<(&str, &str)> = manifest
            .dependencies
            .iter()
            .map(|(id, req)| (id.as_str(), req.as_str()))
            .collect();
        write_manifest(
            self.root(),
            &manifest.id,
            &manifest_toml(&manifest.id, &manifest.version, &dependencies),
        )
        .unwrap();
        self.loader.register_instance(Arc::new(stub.clone()));
    }

    /// Write a raw manifest for a declarative (or broken) extension.
    pub fn add_raw(&self, dir: &str, toml: &str) {
        write_manifest(self.root(), dir, toml).unwrap();
    }

    pub fn config(&self) -> ManagerConfig {
        ManagerConfig::new(self.root())
    }

    /// A manager with fresh registries over this harness's persisted state.
    pub fn manager(&self) -> PluginManager {
        self.manager_with(self.config())
    }

    pub fn manager_with(&self, config: ManagerConfig) -> PluginManager {
        PluginManager::new(
            config,
            Arc::new(Registries::new()),
            Arc::new(NavigationManager::new()),
            self.store.clone(),
            self.store.clone(),
            self.loader.clone(),
        )
    }
}

pub fn status_of(manager: &PluginManager, id: &str) -> ExtensionStatus {
    manager
        .status(id)
        .unwrap_or_else(|| panic!("extension '{id}' unknown"))
}
